//! What differs between the three snapshot kinds.
//!
//! The codec itself is shared; a policy decides which objects are written
//! by reference instead of inline, which objects may be written at all,
//! and how canonical objects are treated on the reading side.

use heap::Heap;
use object::{Class, ClassId, Field, Function, Library, Object, ObjectId, Value};

use super::error::{SnapshotError, SnapshotResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SnapshotKind {
    /// The whole program; read into an empty heap.
    Full = 0,
    /// One script on top of the full snapshot it was written against.
    Script = 1,
    /// A message between isolates of the same group.
    Message = 2,
}

impl SnapshotKind {
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Full),
            1 => Some(Self::Script),
            2 => Some(Self::Message),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MemberKind {
    Field = 0,
    Function = 1,
}

/// A program element the reading side already has.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reference {
    Class(ClassId),
    /// Position in the library list.
    Library(u32),
    Script { library: u32, index: u32 },
    Member { class: ClassId, kind: MemberKind, index: u32 },
}

pub trait SnapshotPolicy {
    fn kind(&self) -> SnapshotKind;

    /// How to refer to `id` without writing it, if the reader has it.
    fn reference(&self, _heap: &Heap, _id: ObjectId) -> Option<Reference> {
        None
    }

    /// Called before an object is written inline.
    fn check_writable(&self, heap: &Heap, id: ObjectId) -> SnapshotResult<()> {
        let kind = heap.object(id).kind();
        if kind.is_native_resource() {
            return Err(SnapshotError::IllegalArgument { kind });
        }
        Ok(())
    }

    fn accepts_external_data(&self) -> bool {
        true
    }

    /// Canonical objects are looked up again in the reader's tables
    /// instead of trusting the writer.
    fn recanonicalize(&self) -> bool {
        true
    }
}

pub struct FullPolicy;

impl SnapshotPolicy for FullPolicy {
    fn kind(&self) -> SnapshotKind {
        SnapshotKind::Full
    }

    fn accepts_external_data(&self) -> bool {
        false
    }

    fn recanonicalize(&self) -> bool {
        false
    }
}

/// Objects of the base snapshot are referenced, everything else inline.
pub struct ScriptPolicy;

impl SnapshotPolicy for ScriptPolicy {
    fn kind(&self) -> SnapshotKind {
        SnapshotKind::Script
    }

    fn reference(&self, heap: &Heap, id: ObjectId) -> Option<Reference> {
        if !heap.is_base(id) {
            return None;
        }
        program_reference(heap, id)
    }
}

/// Program structure is shared by the group and always referenced.
pub struct MessagePolicy;

impl SnapshotPolicy for MessagePolicy {
    fn kind(&self) -> SnapshotKind {
        SnapshotKind::Message
    }

    fn reference(&self, heap: &Heap, id: ObjectId) -> Option<Reference> {
        program_reference(heap, id)
    }
}

pub fn policy_for(kind: SnapshotKind) -> &'static dyn SnapshotPolicy {
    match kind {
        SnapshotKind::Full => &FullPolicy,
        SnapshotKind::Script => &ScriptPolicy,
        SnapshotKind::Message => &MessagePolicy,
    }
}

fn library_index(heap: &Heap, library: Value) -> Option<u32> {
    heap.libraries()
        .iter()
        .position(|l| *l == library)
        .map(|i| i as u32)
}

fn program_reference(heap: &Heap, id: ObjectId) -> Option<Reference> {
    let value = Value::Object(id);
    match heap.object(id) {
        Object::Class(c) => (heap.class_at(c.id) == value).then_some(Reference::Class(c.id)),
        Object::Library(_) => library_index(heap, value).map(Reference::Library),
        Object::Script(_) => heap.libraries().iter().enumerate().find_map(|(library, l)| {
            let scripts = &heap.get_value::<Library>(*l)?.scripts;
            let index = scripts.iter().position(|s| *s == value)?;
            Some(Reference::Script {
                library: library as u32,
                index: index as u32,
            })
        }),
        Object::Field(Field { owner, .. }) => member_reference(heap, *owner, value, MemberKind::Field),
        Object::Function(Function { owner, .. }) => {
            member_reference(heap, *owner, value, MemberKind::Function)
        }
        _ => None,
    }
}

fn member_reference(heap: &Heap, owner: Value, member: Value, kind: MemberKind) -> Option<Reference> {
    let class = heap.get_value::<Class>(owner)?;
    if heap.class_at(class.id) != owner {
        return None;
    }
    let members = match kind {
        MemberKind::Field => &class.fields,
        MemberKind::Function => &class.functions,
    };
    let index = members.iter().position(|m| *m == member)?;
    Some(Reference::Member {
        class: class.id,
        kind,
        index: index as u32,
    })
}

/// Resolves a reference against the reading heap.
pub fn resolve_reference(heap: &Heap, reference: Reference) -> SnapshotResult<Value> {
    let unresolved = || SnapshotError::UnresolvedReference(format!("{reference:?}"));
    match reference {
        Reference::Class(class_id) => {
            let class = heap.class_at(class_id);
            if class.is_null() { Err(unresolved()) } else { Ok(class) }
        }
        Reference::Library(index) => heap
            .libraries()
            .get(index as usize)
            .copied()
            .ok_or_else(unresolved),
        Reference::Script { library, index } => heap
            .libraries()
            .get(library as usize)
            .and_then(|l| heap.get_value::<Library>(*l))
            .and_then(|l| l.scripts.get(index as usize).copied())
            .ok_or_else(unresolved),
        Reference::Member { class, kind, index } => heap
            .class(class)
            .and_then(|c| match kind {
                MemberKind::Field => c.fields.get(index as usize),
                MemberKind::Function => c.functions.get(index as usize),
            })
            .copied()
            .ok_or_else(unresolved),
    }
}

