//! Snapshot serialization.
//!
//! ```text
//! stream  := "VMSNAPSH" version:u32 kind:u8 payload forwards
//! value   := NULL | SMI i64 | BACKREF id:u32
//!          | INLINE id:u32 cid:u32 tags:u32 body
//!          | FORWARD id:u32 cid:u32 tags:u32
//!          | CLASS_REF cid:u32 | LIBRARY_REF index:u32
//!          | SCRIPT_REF library:u32 index:u32
//!          | MEMBER_REF cid:u32 kind:u8 index:u32
//! forwards := (id:u32 body)* 0xffffffff
//! ```
//!
//! All integers are little-endian. A full snapshot's payload is an
//! optional dispatch table section, the object store roots, the class
//! table and the library list. Script snapshots and messages carry one
//! root value.

mod canonicalize;
mod error;
mod policy;
mod reader;
mod stream;
mod writer;

pub use error::{SnapshotError, SnapshotResult};
pub use policy::{
    FullPolicy, MemberKind, MessagePolicy, Reference, ScriptPolicy, SnapshotKind, SnapshotPolicy,
    policy_for, resolve_reference,
};
pub use reader::SnapshotReader;
pub use stream::{ReadStream, WriteStream};
pub use writer::{MAX_INLINE_DEPTH, SnapshotWriter};

use heap::{Heap, ObjectStore};
use object::Value;

use crate::{Program, SnapshotSettings};

pub const MAGIC: &[u8; 8] = b"VMSNAPSH";
pub const VERSION: u32 = 1;

/// Leading byte of every value slot.
pub mod tag {
    pub const NULL: u8 = 0;
    pub const SMI: u8 = 1;
    pub const BACKREF: u8 = 2;
    pub const INLINE: u8 = 3;
    pub const FORWARD: u8 = 4;
    pub const CLASS_REF: u8 = 5;
    pub const LIBRARY_REF: u8 = 6;
    pub const SCRIPT_REF: u8 = 7;
    pub const MEMBER_REF: u8 = 8;

    pub const END_OF_FORWARDS: u32 = u32::MAX;
}

/// Writes the whole program: store roots, class table and libraries,
/// preceded by the encoded dispatch table if there is one.
pub fn write_full_snapshot(heap: &Heap, dispatch_table: Option<&[u8]>) -> SnapshotResult<Vec<u8>> {
    let mut writer = SnapshotWriter::new(heap, &FullPolicy);
    writer.write_section(dispatch_table.unwrap_or_default());
    for root in heap.store.roots() {
        writer.write_value(root)?;
    }
    writer.write_len(heap.num_classes());
    for index in 0..heap.num_classes() {
        writer.write_value(heap.class_at(object::ClassId(index as u32)))?;
    }
    writer.write_len(heap.libraries().len());
    for library in heap.libraries() {
        writer.write_value(*library)?;
    }
    writer.finish()
}

/// A program read from a full snapshot and the raw dispatch table
/// section, if the snapshot carried one.
pub struct FullSnapshot {
    pub program: Program,
    pub dispatch_table: Option<Vec<u8>>,
}

/// Reads a full snapshot into a fresh heap. Everything read becomes the
/// base that later script snapshots refer to.
pub fn read_full_snapshot(bytes: &[u8], settings: &SnapshotSettings) -> SnapshotResult<FullSnapshot> {
    let mut program = Program::empty(settings);
    let mut roots = Vec::with_capacity(ObjectStore::NAMES.len());
    let mut class_table;
    let mut libraries;
    let dispatch_table;
    {
        let Program { heap, interns } = &mut program;
        let mut reader = SnapshotReader::new(heap, interns, &FullPolicy, bytes)?;
        dispatch_table = reader.read_section()?.map(<[u8]>::to_vec);
        for _ in ObjectStore::NAMES {
            roots.push(reader.read_value()?);
        }
        let num_classes = reader.read_len(1)?;
        class_table = Vec::with_capacity(num_classes);
        for _ in 0..num_classes {
            class_table.push(reader.read_value()?);
        }
        let num_libraries = reader.read_len(1)?;
        libraries = Vec::with_capacity(num_libraries);
        for _ in 0..num_libraries {
            libraries.push(reader.read_value()?);
        }
        reader.finish(&mut [])?;
    }

    let heap = &mut program.heap;
    for (slot, root) in heap.store.roots_mut().into_iter().zip(roots) {
        *slot = root;
    }
    heap.set_class_table(class_table);
    for library in libraries {
        let id = library
            .as_object()
            .ok_or_else(|| SnapshotError::UnresolvedReference(format!("library {library:?}")))?;
        heap.add_library(id);
    }
    heap.mark_base();
    log::info!(
        "full snapshot read: {} objects, {} classes, {} libraries",
        heap.len(),
        heap.class_ids().count(),
        heap.libraries().len()
    );
    Ok(FullSnapshot {
        program,
        dispatch_table,
    })
}

/// Writes `root` (normally a library) against the base program: objects
/// of the full snapshot are written as references.
pub fn write_script_snapshot(heap: &Heap, root: Value) -> SnapshotResult<Vec<u8>> {
    let mut writer = SnapshotWriter::new(heap, &ScriptPolicy);
    writer.write_value(root)?;
    writer.finish()
}

pub fn read_script_snapshot(program: &mut Program, bytes: &[u8]) -> SnapshotResult<Value> {
    read_root(program, &ScriptPolicy, bytes)
}

/// Serializes a message; program structure travels by reference.
pub fn write_message(heap: &Heap, message: Value) -> SnapshotResult<Vec<u8>> {
    let mut writer = SnapshotWriter::new(heap, &MessagePolicy);
    writer.write_value(message)?;
    writer.finish()
}

pub fn read_message(program: &mut Program, bytes: &[u8]) -> SnapshotResult<Value> {
    read_root(program, &MessagePolicy, bytes)
}

fn read_root(program: &mut Program, policy: &dyn SnapshotPolicy, bytes: &[u8]) -> SnapshotResult<Value> {
    let Program { heap, interns } = program;
    let mut reader = SnapshotReader::new(heap, interns, policy, bytes)?;
    let mut root = [reader.read_value()?];
    reader.finish(&mut root)?;
    Ok(root[0])
}
