use object::{
    Array, Class, ClassId, Code, ExternalTypedData, HeaderFlags, MAX_CLASS_ID, ObjectKind,
    ScriptKind, SendPort, Type, TypeRef, TypedDataKind, Value, bigint,
};
use vm::dispatch_table::DispatchTable;
use vm::snapshot::{
    self, FullPolicy, MessagePolicy, SnapshotError, SnapshotReader, SnapshotWriter,
};
use vm::{Program, ProgramBuilder, SnapshotSettings, types};

fn program() -> Program {
    Program::bootstrapped(&SnapshotSettings::default()).unwrap()
}

fn round_trip(program: &mut Program, message: Value) -> Value {
    let bytes = snapshot::write_message(&program.heap, message).unwrap();
    snapshot::read_message(program, &bytes).unwrap()
}

fn elements(program: &Program, array: Value) -> Vec<Value> {
    program.heap.get_value::<Array>(array).unwrap().elements.clone()
}

/// `package:app/shapes.dart` with `Shape<T>` and `Circle extends Shape<int>`.
fn declare_shapes(program: &mut Program) -> (ClassId, ClassId) {
    let Program { heap, interns } = program;
    let int_type = heap.store.int_type;
    let double_type = heap.store.double_type;
    let mut builder = ProgramBuilder::new(heap, interns);
    let library = builder.library("package:app/shapes.dart");
    builder.script(library, "package:app/shapes.dart", "", ScriptKind::Library);
    let shape = builder.class(library, "Shape");
    let t = builder.type_parameter(shape, "T", Value::Null);
    builder.add_field(shape, "tag", t, false);
    let circle = builder.class(library, "Circle");
    let super_type = builder.ty(shape, &[int_type]);
    builder.set_super(circle, super_type);
    builder.add_field(circle, "radius", double_type, false);
    (shape, circle)
}

#[test]
fn shared_objects_keep_their_identity() {
    let mut program = program();
    let text = program.heap.new_string("shared").into();
    let array = program.heap.new_array(vec![text, text]).into();

    let received = round_trip(&mut program, array);
    assert_ne!(received, array);
    let received = elements(&program, received);
    assert_eq!(received[0], received[1]);
    assert_ne!(received[0], text);
    assert_eq!(program.heap.string_value(received[0]).as_deref(), Some("shared"));
}

#[test]
fn self_referencing_array_round_trips() {
    let mut program = program();
    let array = program.heap.new_array(Vec::new());
    program.heap.get_mut::<Array>(array).unwrap().elements = vec![array.into(), Value::Smi(3)];

    let received = round_trip(&mut program, array.into());
    let elements = elements(&program, received);
    assert_eq!(elements, vec![received, Value::Smi(3)]);
}

#[test]
fn growable_array_keeps_length_and_elements() {
    let mut program = program();
    let x = program.heap.new_string("x").into();
    let growable = program.heap.new_growable(vec![Value::Smi(1), x, Value::Smi(1)], 8);

    let received = round_trip(&mut program, growable.into());
    let live = program.heap.growable_elements(received).unwrap().to_vec();
    assert_eq!(live.len(), 3);
    assert_eq!(live[0], Value::Smi(1));
    assert_eq!(live[2], Value::Smi(1));
    assert_eq!(program.heap.string_value(live[1]).as_deref(), Some("x"));
}

#[test]
fn large_integers_survive() {
    let mut program = program();
    let (negative, digits) = bigint::parse("12345678901234567890").unwrap();
    let big = program.heap.new_bigint(negative, &digits).into();
    let mint = program.heap.new_integer(i64::MIN);
    let small = program.heap.new_integer(42);
    let array = program.heap.new_array(vec![big, mint, small]).into();

    let received = round_trip(&mut program, array);
    let received = elements(&program, received);
    assert_eq!(
        program.heap.bigint_to_decimal(received[0]).as_deref(),
        Some("12345678901234567890")
    );
    assert_eq!(program.heap.integer_value(received[1]), Some(i64::MIN));
    assert_eq!(received[2], Value::Smi(42));
}

#[test]
fn linked_hash_map_pairs_round_trip() {
    let mut program = program();
    let map = program.heap.new_linked_hash_map();
    let one = program.heap.new_string("one").into();
    let two = program.heap.new_string("two").into();
    program.heap.map_insert(map, Value::Smi(1), one);
    program.heap.map_insert(map, Value::Smi(2), two);
    program.heap.map_remove(map, Value::Smi(1));

    let received = round_trip(&mut program, map.into()).as_object().unwrap();
    let pairs = program.heap.map_pairs(received);
    assert_eq!(pairs.len(), 1);
    assert_eq!(pairs[0].0, Value::Smi(2));
    let value = program.heap.map_get(received, Value::Smi(2)).unwrap();
    assert_eq!(program.heap.string_value(value).as_deref(), Some("two"));
}

#[test]
fn ports_cannot_be_sent() {
    let mut program = program();
    let port = program.heap.allocate(ClassId::SEND_PORT, SendPort { port_id: 7 });
    let array = program.heap.new_array(vec![Value::Smi(1), port.into()]);
    assert_eq!(
        snapshot::write_message(&program.heap, array.into()),
        Err(SnapshotError::IllegalArgument {
            kind: ObjectKind::SendPort
        })
    );
}

#[test]
#[should_panic]
fn writing_code_is_a_contract_violation() {
    let mut program = program();
    let code = program.heap.allocate(ClassId::CODE, Code::default());
    let _ = snapshot::write_message(&program.heap, code.into());
}

#[test]
fn deep_nesting_is_forwarded() {
    let mut program = program();
    let mut value = Value::Smi(5);
    for _ in 0..10 {
        value = program.heap.new_array(vec![value]).into();
    }
    let bytes = {
        let mut writer =
            SnapshotWriter::new(&program.heap, &MessagePolicy).with_max_inline_depth(2);
        writer.write_value(value).unwrap();
        writer.finish().unwrap()
    };
    assert!(bytes.contains(&snapshot::tag::FORWARD));

    let mut received = snapshot::read_message(&mut program, &bytes).unwrap();
    for _ in 0..10 {
        let inner = elements(&program, received);
        assert_eq!(inner.len(), 1);
        received = inner[0];
    }
    assert_eq!(received, Value::Smi(5));
}

#[test]
fn canonical_objects_resolve_to_the_receivers_representatives() {
    let mut program = program();
    let Program { heap, interns } = &mut program;
    let symbol = interns.symbol(heap, "ping");
    let int_type = heap.store.int_type;
    let true_value = heap.store.true_value;
    let array = heap.new_array(vec![symbol, int_type, true_value]).into();

    let received = round_trip(&mut program, array);
    let received = elements(&program, received);
    assert_eq!(received, vec![symbol, int_type, true_value]);
}

#[test]
fn constants_sharing_an_earlier_element_unify() {
    let mut program = program();
    let Program { heap, interns } = &mut program;
    let mint = heap.new_integer(1 << 62);
    let mint = interns.canonicalize(heap, mint);
    let constant = heap.new_immutable_array(vec![mint]).into();
    let constant = interns.canonicalize(heap, constant);
    let constants = interns.num_constants();
    // The mint is read first; the constant array reaches it by back reference.
    let message = heap.new_array(vec![mint, constant]).into();

    let received = round_trip(&mut program, message);
    let received = elements(&program, received);
    assert_eq!(received, vec![mint, constant]);
    assert_eq!(program.interns.num_constants(), constants);
}

#[test]
fn external_data_is_copied_into_messages_only() {
    let mut program = program();
    let data = program.heap.allocate(
        ClassId::external_typed_data(TypedDataKind::Uint8),
        ExternalTypedData {
            kind: TypedDataKind::Uint8,
            data: vec![1, 2, 3],
            finalizer: None,
        },
    );

    let received = round_trip(&mut program, data.into());
    let copy = program.heap.get_value::<ExternalTypedData>(received).unwrap();
    assert_eq!(copy.data, vec![1, 2, 3]);
    assert!(copy.finalizer.is_some());
    let id = received.as_object().unwrap();
    assert!(program.heap.header(id).has_flag(HeaderFlags::FINALIZABLE));

    let mut writer = SnapshotWriter::new(&program.heap, &FullPolicy);
    writer.write_value(data.into()).unwrap();
    let bytes = writer.finish().unwrap();
    let mut target = Program::empty(&SnapshotSettings::default());
    let Program { heap, interns } = &mut target;
    let mut reader = SnapshotReader::new(heap, interns, &FullPolicy, &bytes).unwrap();
    assert_eq!(reader.read_value(), Err(SnapshotError::ExternalDataInFullSnapshot));
}

#[test]
fn snapshots_of_the_wrong_kind_are_rejected() {
    let mut program = program();
    let bytes = snapshot::write_message(&program.heap, Value::Smi(1)).unwrap();
    assert!(matches!(
        snapshot::read_script_snapshot(&mut program, &bytes),
        Err(SnapshotError::KindMismatch { .. })
    ));
    assert_eq!(
        snapshot::read_message(&mut program, b"NOTASNAP\x01\0\0\0\x02"),
        Err(SnapshotError::BadMagic)
    );
    assert!(matches!(
        snapshot::read_message(&mut program, &bytes[..bytes.len() - 2]),
        Err(SnapshotError::UnexpectedEnd { .. })
    ));
}

#[test]
fn full_snapshot_restores_the_program() {
    let mut program = program();
    let (shape, circle) = declare_shapes(&mut program);
    program.finalizer().finalize_all_classes().unwrap();

    let dispatch = DispatchTable::new(vec![0x40, 0x40, 0, 0x80]);
    let code_entry_points = [0x40, 0x80];
    let section = dispatch.serialize(&code_entry_points).unwrap();
    let bytes = snapshot::write_full_snapshot(&program.heap, Some(&section)).unwrap();

    let full = snapshot::read_full_snapshot(&bytes, &SnapshotSettings::default()).unwrap();
    assert_eq!(full.dispatch_table.as_deref(), Some(section.as_slice()));
    assert_eq!(
        DispatchTable::deserialize(&full.dispatch_table.unwrap(), &code_entry_points).unwrap(),
        Some(dispatch)
    );

    let read = full.program;
    let heap = &read.heap;
    assert_eq!(
        heap.class_ids().collect::<Vec<_>>(),
        program.heap.class_ids().collect::<Vec<_>>()
    );
    assert_eq!(heap.libraries().len(), program.heap.libraries().len());
    assert_eq!(types::class_name(heap, shape), "Shape");
    assert_eq!(types::class_name(heap, circle), "Circle");

    let int_type = heap.store.int_type;
    assert!(types::is_finalized(heap, int_type));
    assert!(heap.is_canonical(int_type));
    assert_eq!(read.interns.lookup_type(heap, int_type), int_type);
    assert!(!read.interns.lookup_symbol(heap, "Circle").is_null());

    let circle_class = heap.class(circle).unwrap();
    assert!(circle_class.is_finalized());
    assert_eq!(types::type_name(heap, circle_class.super_type), "Shape<int>");
    assert_eq!(heap.get_value::<Class>(heap.class_at(circle)).map(|c| c.id), Some(circle));
}

/// For `class D<T> extends B<D<T>>`: the `D<...>` argument of the super
/// type and the target of the reference closing its first slot.
fn recursive_argument(program: &Program, d: ClassId) -> (Value, Value) {
    let heap = &program.heap;
    let super_type = heap.class(d).unwrap().super_type;
    let arguments = heap.get_value::<Type>(super_type).unwrap().arguments;
    let inner = types::resolve(heap, types::argument_at(heap, arguments, 0));
    let inner_arguments = heap.get_value::<Type>(inner).unwrap().arguments;
    let reference = types::argument_at(heap, inner_arguments, 0);
    let target = heap.get_value::<TypeRef>(reference).unwrap().target;
    (inner, target)
}

#[test]
fn recursive_types_keep_their_cycle() {
    let mut program = program();
    let d = {
        let Program { heap, interns } = &mut program;
        let mut builder = ProgramBuilder::new(heap, interns);
        let library = builder.library("package:app/recursive.dart");
        let b = builder.class(library, "B");
        builder.type_parameter(b, "X", Value::Null);
        let d = builder.class(library, "D");
        let t = builder.type_parameter(d, "T", Value::Null);
        let d_of_t = builder.ty(d, &[t]);
        let super_type = builder.ty(b, &[d_of_t]);
        builder.set_super(d, super_type);
        d
    };
    program.finalizer().finalize_all_classes().unwrap();
    let (inner, target) = recursive_argument(&program, d);
    assert_eq!(target, inner);

    let bytes = snapshot::write_full_snapshot(&program.heap, None).unwrap();
    let read = snapshot::read_full_snapshot(&bytes, &SnapshotSettings::default())
        .unwrap()
        .program;
    let (inner, target) = recursive_argument(&read, d);
    assert_eq!(target, inner);
    let heap = &read.heap;
    assert_eq!(types::type_name(heap, heap.class(d).unwrap().super_type), "B<D<T>>");
}

#[test]
fn class_ids_past_the_stream_are_rejected() {
    let program = program();
    let full = snapshot::write_full_snapshot(&program.heap, None).unwrap();
    let settings = SnapshotSettings::default();
    let mut base = snapshot::read_full_snapshot(&full, &settings).unwrap().program;
    let forged = ClassId(MAX_CLASS_ID - 1);
    let library = {
        let Program { heap, interns } = &mut base;
        let mut builder = ProgramBuilder::new(heap, interns);
        let library = builder.library("package:app/forged.dart");
        let class = builder.class(library, "Forged");
        builder.heap().class_mut(class).unwrap().id = forged;
        library
    };
    let script = snapshot::write_script_snapshot(&base.heap, library).unwrap();

    let mut target = snapshot::read_full_snapshot(&full, &settings).unwrap().program;
    let classes = target.heap.num_classes();
    assert_eq!(
        snapshot::read_script_snapshot(&mut target, &script),
        Err(SnapshotError::InvalidClassId(forged))
    );
    assert_eq!(target.heap.num_classes(), classes);
}

#[test]
fn script_snapshot_links_against_the_base_program() {
    let mut program = program();
    let (shape, _) = declare_shapes(&mut program);
    program.finalizer().finalize_all_classes().unwrap();
    let full = snapshot::write_full_snapshot(&program.heap, None).unwrap();
    let settings = SnapshotSettings::default();

    let mut base = snapshot::read_full_snapshot(&full, &settings).unwrap().program;
    let (library, label) = {
        let Program { heap, interns } = &mut base;
        let string_type = heap.store.string_type;
        let mut builder = ProgramBuilder::new(heap, interns);
        let library = builder.library("package:app/labels.dart");
        builder.script(library, "package:app/labels.dart", "", ScriptKind::Library);
        let label = builder.class(library, "Label");
        let super_type = builder.ty(shape, &[string_type]);
        builder.set_super(label, super_type);
        (library, label)
    };
    base.finalizer().finalize_all_classes().unwrap();
    let script = snapshot::write_script_snapshot(&base.heap, library).unwrap();

    let mut target = snapshot::read_full_snapshot(&full, &settings).unwrap().program;
    let libraries_before = target.heap.libraries().len();
    let received = snapshot::read_script_snapshot(&mut target, &script).unwrap();
    let heap = &target.heap;
    assert_eq!(heap.libraries().len(), libraries_before + 1);
    assert_eq!(heap.libraries().last(), Some(&received));

    let class = heap.class(label).unwrap();
    assert_eq!(heap.string_value(class.name).as_deref(), Some("Label"));
    assert_eq!(class.library, received);
    let super_type = heap.get_value::<Type>(class.super_type).unwrap();
    assert_eq!(super_type.type_class_id, shape);
    assert_eq!(
        types::argument_at(heap, super_type.arguments, 0),
        heap.store.string_type
    );
}

#[test]
fn message_types_unify_with_the_receivers_canonical_types() {
    let mut program = program();
    let (shape, _) = declare_shapes(&mut program);
    program.finalizer().finalize_all_classes().unwrap();
    let declared = program.heap.class(shape).unwrap().declaration_type;

    let Program { heap, interns } = &mut program;
    let int_type = heap.store.int_type;
    let fresh = ProgramBuilder::new(heap, interns).ty(shape, &[int_type]);
    let shape_of_int = program
        .finalizer()
        .finalize_type(fresh, vm::FinalizationKind::Canonicalize)
        .unwrap();

    let array = program.heap.new_array(vec![declared, shape_of_int]).into();
    let received = round_trip(&mut program, array);
    let received = elements(&program, received);
    assert_eq!(received, vec![declared, shape_of_int]);
}
