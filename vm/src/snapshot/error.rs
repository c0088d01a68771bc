use std::fmt;

use object::{ClassId, ObjectKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    UnexpectedEnd { position: usize, wanted: usize },
    BadMagic,
    UnsupportedVersion(u32),
    KindMismatch { expected: u8, found: u8 },
    InvalidTag { position: usize, tag: u8 },
    InvalidClassId(ClassId),
    InvalidBackRef(u32),
    /// A reference to an object that should already exist on the reading
    /// side could not be resolved.
    UnresolvedReference(String),
    /// The object cannot leave its isolate (ports, mirrors, tags).
    IllegalArgument { kind: ObjectKind },
    ExternalDataInFullSnapshot,
    InvalidDispatchCode { position: usize, code: i32 },
}

impl fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedEnd { position, wanted } => {
                write!(f, "snapshot ends at {position}, {wanted} more bytes expected")
            }
            Self::BadMagic => write!(f, "not a snapshot"),
            Self::UnsupportedVersion(version) => {
                write!(f, "unsupported snapshot version {version}")
            }
            Self::KindMismatch { expected, found } => {
                write!(f, "expected snapshot kind {expected}, found {found}")
            }
            Self::InvalidTag { position, tag } => {
                write!(f, "invalid slot tag {tag:#x} at {position}")
            }
            Self::InvalidClassId(class_id) => write!(f, "invalid class id {}", class_id.0),
            Self::InvalidBackRef(id) => write!(f, "invalid back reference {id}"),
            Self::UnresolvedReference(what) => write!(f, "unresolved reference to {what}"),
            Self::IllegalArgument { kind } => {
                write!(f, "illegal argument in isolate message: object of kind {kind:?}")
            }
            Self::ExternalDataInFullSnapshot => {
                write!(f, "external typed data cannot be part of a full snapshot")
            }
            Self::InvalidDispatchCode { position, code } => {
                write!(f, "invalid dispatch table code {code} at {position}")
            }
        }
    }
}

impl std::error::Error for SnapshotError {}

pub type SnapshotResult<T> = Result<T, SnapshotError>;
