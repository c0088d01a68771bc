use clap::{Parser as ClapParser, Subcommand};
use std::process;

use heap::HeapSettings;
use object::{ClassId, Library, ScriptKind, Value};

use vm::dispatch_table::DispatchTable;
use vm::snapshot::{self, MAX_INLINE_DEPTH, MessagePolicy, SnapshotWriter};
use vm::{IsolateGroup, Program, ProgramBuilder, SnapshotSettings, VmResult, types};

#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Box integers that fit a Smi as heap objects anyway
    #[arg(long, global = true)]
    keep_mints: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build a small program and round-trip it through every snapshot kind
    Demo {
        /// Deepest inline nesting before objects are forwarded
        #[arg(long, default_value_t = MAX_INLINE_DEPTH)]
        max_inline_depth: usize,
    },
    /// Round-trip a synthetic dispatch table
    Dispatch {
        #[arg(long, default_value_t = 4096)]
        entries: usize,
        #[arg(long, default_value_t = 200)]
        codes: usize,
        #[arg(long, default_value_t = 1)]
        seed: u64,
    },
}

/// Declares `package:demo/shapes.dart`: `Shape<T>` and
/// `Circle extends Shape<int>`.
fn declare_shapes(program: &mut Program) -> Value {
    let Program { heap, interns } = program;
    let int_type = heap.store.int_type;
    let double_type = heap.store.double_type;
    let object_type = heap.store.object_type;

    let mut builder = ProgramBuilder::new(heap, interns);
    let library = builder.library("package:demo/shapes.dart");
    builder.script(library, "package:demo/shapes.dart", "class Shape<T> {}", ScriptKind::Library);

    let shape = builder.class(library, "Shape");
    let t = builder.type_parameter(shape, "T", Value::Null);
    builder.set_super(shape, object_type);
    builder.add_field(shape, "tag", t, false);
    builder.add_function(shape, "area", double_type, &[]);

    let circle = builder.class(library, "Circle");
    let super_type = builder.ty(shape, &[int_type]);
    builder.set_super(circle, super_type);
    builder.add_field(circle, "radius", double_type, false);
    builder.add_function(circle, "scale", Value::Null, &[("factor", double_type)]);
    library
}

/// Declares a library that extends a class of the shapes library.
fn declare_script(program: &mut Program, shape: ClassId) -> Value {
    let Program { heap, interns } = program;
    let string_type = heap.store.string_type;
    let mut builder = ProgramBuilder::new(heap, interns);
    let library = builder.library("package:demo/labels.dart");
    let source = "class Label extends Shape<String> {}";
    builder.script(library, "package:demo/labels.dart", source, ScriptKind::Library);
    let label = builder.class(library, "Label");
    let super_type = builder.ty(shape, &[string_type]);
    builder.set_super(label, super_type);
    builder.add_field(label, "text", string_type, false);
    library
}

fn find_class(program: &Program, name: &str) -> Option<ClassId> {
    let heap = &program.heap;
    heap.class_ids().find(|cid| types::class_name(heap, *cid) == name)
}

fn run_demo(settings: &SnapshotSettings, max_inline_depth: usize) -> VmResult<()> {
    let mut program = Program::bootstrapped(settings)?;
    declare_shapes(&mut program);
    let finalized = program.finalizer().finalize_all_classes()?;
    let sorted = program.finalizer().sort_classes();
    println!(
        "program: {} classes finalized, ids {}",
        finalized,
        if sorted.is_identity() { "already sorted" } else { "renumbered" }
    );

    let full = snapshot::write_full_snapshot(&program.heap, None)?;
    println!("full snapshot: {} bytes, {} objects", full.len(), program.heap.len());

    let mut base = snapshot::read_full_snapshot(&full, settings)?.program;
    let Some(shape) = find_class(&base, "Shape") else {
        eprintln!("Shape is missing from the snapshot");
        process::exit(1);
    };
    let labels = declare_script(&mut base, shape);
    base.finalizer().finalize_all_classes()?;
    let script = snapshot::write_script_snapshot(&base.heap, labels)?;

    let mut target = snapshot::read_full_snapshot(&full, settings)?.program;
    let library = snapshot::read_script_snapshot(&mut target, &script)?;
    println!(
        "script snapshot: {} bytes, library {:?}, {} libraries loaded",
        script.len(),
        target.heap.get_value::<Library>(library).and_then(|l| target.heap.string_value(l.url)),
        target.heap.libraries().len()
    );

    let group = IsolateGroup::new(target);
    let message: Value = {
        let mut program = group.write();
        let Program { heap, .. } = &mut *program;
        let text: Value = heap.new_string("hello").into();
        let big = heap.new_integer(i64::MAX);
        let values = vec![Value::Smi(1), text, big, heap.store.int_type];
        heap.new_array(values).into()
    };
    let bytes = {
        let program = group.read();
        let mut writer =
            SnapshotWriter::new(&program.heap, &MessagePolicy).with_max_inline_depth(max_inline_depth);
        writer.write_value(message)?;
        writer.finish()?
    };
    let received = group.receive(&bytes)?;
    let program = group.read();
    println!(
        "message: {} bytes, {} symbols, {} canonical types, received {:?}",
        bytes.len(),
        program.interns.num_symbols(),
        program.interns.num_types(),
        received
    );
    Ok(())
}

fn run_dispatch(entries: usize, codes: usize, seed: u64) -> VmResult<()> {
    let code_entry_points: Vec<usize> = (1..=codes.max(1)).map(|i| 0x10_0000 + i * 0x40).collect();
    let mut state = seed.max(1);
    let mut next = || {
        // xorshift64
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        state
    };

    let mut table = Vec::with_capacity(entries);
    while table.len() < entries {
        let pick = next();
        let entry = match pick % 4 {
            0 => 0,
            1 => code_entry_points[(pick >> 8) as usize % 8usize.min(code_entry_points.len())],
            _ => code_entry_points[(pick >> 8) as usize % code_entry_points.len()],
        };
        let run = 1 + (next() % 6) as usize;
        table.extend(std::iter::repeat_n(entry, run.min(entries - table.len())));
    }

    let table = DispatchTable::new(table);
    let bytes = table.serialize(&code_entry_points)?;
    let decoded = DispatchTable::deserialize(&bytes, &code_entry_points)?;
    println!(
        "dispatch table: {} entries, {} bytes encoded ({} raw), round trip {}",
        table.len(),
        bytes.len(),
        table.len() * size_of::<usize>(),
        if decoded.as_ref() == Some(&table) { "ok" } else { "MISMATCH" }
    );
    Ok(())
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    let settings = SnapshotSettings {
        heap: HeapSettings {
            narrow_mints: !cli.keep_mints,
            ..Default::default()
        },
        ..Default::default()
    };

    let result = match cli.command {
        Command::Demo { max_inline_depth } => run_demo(&settings, max_inline_depth),
        Command::Dispatch { entries, codes, seed } => run_dispatch(entries, codes, seed),
    };
    if let Err(err) = result {
        eprintln!("Error: {}", err);
        process::exit(1);
    }
}
