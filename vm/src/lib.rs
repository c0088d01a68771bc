pub mod bootstrap;
pub mod builder;
pub mod canonical;
pub mod class_sort;
pub mod dispatch_table;
pub mod finalizer;
pub mod group;
pub mod hash_table;
pub mod intern;
pub mod reload;
pub mod snapshot;
pub mod types;

use std::fmt;

use heap::HeapSettings;

pub use builder::ProgramBuilder;
pub use dispatch_table::DispatchTable;
pub use finalizer::{ClassFinalizer, FinalizationKind, FinalizeError, FinalizeResult};
pub use group::{IsolateGroup, Program};
pub use hash_table::LoadFactor;
pub use intern::InternTable;
pub use snapshot::{SnapshotError, SnapshotKind, SnapshotResult};

/// Settings for a program created from scratch or from a snapshot.
#[derive(Debug, Clone, Default)]
pub struct SnapshotSettings {
    pub heap: HeapSettings,
    /// Load factor band of the canonical tables.
    pub load: LoadFactor,
}

#[derive(Debug)]
pub enum VmError {
    Finalize(FinalizeError),
    Snapshot(SnapshotError),
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Finalize(err) => write!(f, "finalization failed: {err}"),
            Self::Snapshot(err) => write!(f, "snapshot failed: {err}"),
        }
    }
}

impl std::error::Error for VmError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Finalize(err) => Some(err),
            Self::Snapshot(err) => Some(err),
        }
    }
}

impl From<FinalizeError> for VmError {
    fn from(err: FinalizeError) -> Self {
        Self::Finalize(err)
    }
}

impl From<SnapshotError> for VmError {
    fn from(err: SnapshotError) -> Self {
        Self::Snapshot(err)
    }
}

pub type VmResult<T> = Result<T, VmError>;
