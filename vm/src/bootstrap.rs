use object::{Bool, ClassId, HeaderFlags, ScriptKind, TypeArguments, Value};

use crate::builder::ProgramBuilder;
use crate::finalizer::{ClassFinalizer, FinalizeResult};
use crate::group::Program;

/// Predefined classes in declaration order with their super class.
const CORE_CLASSES: &[(ClassId, &str, Option<ClassId>)] = &[
    (ClassId::OBJECT, "Object", None),
    (ClassId::NULL, "Null", Some(ClassId::OBJECT)),
    (ClassId::DYNAMIC, "dynamic", None),
    (ClassId::VOID, "void", None),
    (ClassId::NUMBER, "num", Some(ClassId::OBJECT)),
    (ClassId::INTEGER, "int", Some(ClassId::NUMBER)),
    (ClassId::DOUBLE, "double", Some(ClassId::NUMBER)),
    (ClassId::STRING, "String", Some(ClassId::OBJECT)),
    (ClassId::BOOL, "bool", Some(ClassId::OBJECT)),
];

/// Populates an empty program with `dart:core`: the predefined classes,
/// `List<E>`, the booleans and the canonical empty type argument vector.
/// Everything is finalized and entered into the object store.
pub fn bootstrap(program: &mut Program) -> FinalizeResult<()> {
    let Program { heap, interns } = program;

    // 1. core library and its script
    let mut builder = ProgramBuilder::new(heap, interns);
    let core = builder.library("dart:core");
    builder.script(core, "dart:core/core.dart", "", ScriptKind::Library);

    // 2. predefined classes, super types after all classes exist
    for (class_id, name, _) in CORE_CLASSES {
        builder.class_at(*class_id, core, name);
    }
    for (class_id, _, parent) in CORE_CLASSES {
        if let Some(parent) = parent {
            let super_type = builder.ty(*parent, &[]);
            builder.set_super(*class_id, super_type);
        }
    }

    // 3. List<E> extends Object
    let list = builder.class(core, "List");
    builder.type_parameter(list, "E", Value::Null);
    let object_type = builder.ty(ClassId::OBJECT, &[]);
    builder.set_super(list, object_type);

    // 4. finalize; declaration types come out canonical
    let mut finalizer = ClassFinalizer::new(heap, interns);
    finalizer.finalize_all_classes()?;

    // 5. booleans and the empty vector
    let boolean = |heap: &mut heap::Heap, value: bool| {
        heap.allocate_with_flags(ClassId::BOOL, HeaderFlags::CANONICAL, Bool { value })
    };
    let true_value = boolean(heap, true);
    let false_value = boolean(heap, false);
    let empty = heap.allocate(ClassId::TYPE_ARGUMENTS, TypeArguments::default());
    let empty_type_arguments = interns.canonicalize_type_arguments(heap, empty.into());

    // 6. object store
    let declaration = |class_id: ClassId| {
        heap.class(class_id)
            .map_or(Value::Null, |c| c.declaration_type)
    };
    let store = heap::ObjectStore {
        object_type: declaration(ClassId::OBJECT),
        null_type: declaration(ClassId::NULL),
        dynamic_type: declaration(ClassId::DYNAMIC),
        void_type: declaration(ClassId::VOID),
        number_type: declaration(ClassId::NUMBER),
        int_type: declaration(ClassId::INTEGER),
        double_type: declaration(ClassId::DOUBLE),
        string_type: declaration(ClassId::STRING),
        bool_type: declaration(ClassId::BOOL),
        list_class: heap.class_at(list),
        true_value: true_value.into(),
        false_value: false_value.into(),
        core_library: core,
        empty_type_arguments,
    };
    heap.store = store;
    log::info!(
        "bootstrapped dart:core: {} classes, {} objects",
        heap.class_ids().count(),
        heap.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SnapshotSettings;
    use crate::types;

    #[test]
    fn core_types_are_finalized_and_canonical() {
        let program = Program::bootstrapped(&SnapshotSettings::default()).unwrap();
        let heap = &program.heap;
        let int_type = heap.store.int_type;
        assert!(types::is_finalized(heap, int_type));
        assert!(heap.is_canonical(int_type));
        assert_eq!(program.interns.lookup_type(heap, int_type), int_type);
        assert_eq!(types::type_name(heap, int_type), "int");
        assert!(heap.is_canonical(heap.store.empty_type_arguments));
        assert_eq!(heap.libraries(), &[heap.store.core_library]);
    }

    #[test]
    fn list_has_one_type_argument() {
        let mut program = Program::bootstrapped(&SnapshotSettings::default()).unwrap();
        let Program { heap, interns } = &mut program;
        let list = heap
            .get_value::<object::Class>(heap.store.list_class)
            .map(|c| c.id)
            .unwrap();
        assert_eq!(ClassFinalizer::new(heap, interns).num_type_arguments(list), 1);
    }
}
