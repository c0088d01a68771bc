use std::sync::Arc;

use heap::Heap;
use object::Value;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::SnapshotSettings;
use crate::bootstrap;
use crate::class_sort::ClassIdMap;
use crate::finalizer::{ClassFinalizer, FinalizeResult};
use crate::intern::InternTable;
use crate::snapshot::{self, SnapshotResult};

/// A heap and the canonical tables that index it. The two only ever move
/// together.
pub struct Program {
    pub heap: Heap,
    pub interns: InternTable,
}

impl Program {
    /// An empty heap without any classes.
    pub fn empty(settings: &SnapshotSettings) -> Self {
        Self {
            heap: Heap::new(settings.heap.clone()),
            interns: InternTable::new(settings.load),
        }
    }

    /// A heap holding a finalized `dart:core`.
    pub fn bootstrapped(settings: &SnapshotSettings) -> FinalizeResult<Self> {
        let mut program = Self::empty(settings);
        bootstrap::bootstrap(&mut program)?;
        Ok(program)
    }

    pub fn finalizer(&mut self) -> ClassFinalizer<'_> {
        ClassFinalizer::new(&mut self.heap, &mut self.interns)
    }
}

/// Shared handle to one program. Holding the write guard is the
/// safepoint: canonical tables and the class table only change under it.
#[derive(Clone)]
pub struct IsolateGroup(Arc<RwLock<Program>>);

impl IsolateGroup {
    pub fn new(program: Program) -> Self {
        Self(Arc::new(RwLock::new(program)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Program> {
        self.0.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Program> {
        self.0.write()
    }

    pub fn finalize_all_classes(&self) -> FinalizeResult<usize> {
        self.0.write().finalizer().finalize_all_classes()
    }

    pub fn sort_classes(&self) -> ClassIdMap {
        self.0.write().finalizer().sort_classes()
    }

    /// Serializes `message` under the read lock.
    pub fn send(&self, message: Value) -> SnapshotResult<Vec<u8>> {
        let program = self.0.read();
        snapshot::write_message(&program.heap, message)
    }

    /// Materializes a message in this group's heap.
    pub fn receive(&self, bytes: &[u8]) -> SnapshotResult<Value> {
        let mut program = self.0.write();
        snapshot::read_message(&mut program, bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn messages_cross_threads() {
        let group = IsolateGroup::new(Program::bootstrapped(&SnapshotSettings::default()).unwrap());
        let bytes = {
            let mut program = group.write();
            let text = program.heap.new_string("ping");
            let array = program.heap.new_array(vec![Value::Smi(7), text.into()]);
            drop(program);
            group.send(array.into()).unwrap()
        };

        let receiver = group.clone();
        let received = thread::spawn(move || receiver.receive(&bytes).unwrap())
            .join()
            .unwrap();

        let program = group.read();
        let elements = &program.heap.get_value::<object::Array>(received).unwrap().elements;
        assert_eq!(elements[0], Value::Smi(7));
        assert_eq!(program.heap.string_value(elements[1]).as_deref(), Some("ping"));
    }
}
