//! Depth-first renumbering of program class ids.
//!
//! After sorting, every class and its transitive subclasses occupy one
//! contiguous id range starting at the class itself, which makes
//! "is a subclass of" a range check. Predefined ids never move.

use heap::Heap;
use object::{Class, ClassId, Object, Value};

use crate::intern::InternTable;
use crate::types;

/// Old-to-new class id mapping, indexed by the old id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassIdMap {
    new_ids: Vec<ClassId>,
}

impl ClassIdMap {
    pub fn map(&self, old: ClassId) -> ClassId {
        self.new_ids.get(old.index()).copied().unwrap_or(old)
    }

    pub fn is_identity(&self) -> bool {
        self.new_ids
            .iter()
            .enumerate()
            .all(|(index, new)| new.index() == index)
    }
}

fn super_class_id(heap: &Heap, class: &Class) -> Option<ClassId> {
    let super_type = types::resolve(heap, class.super_type);
    types::type_class_id(heap, super_type).filter(|cid| *cid != ClassId::DYNAMIC)
}

/// Computes the depth-first order without touching the heap.
pub fn compute_order(heap: &Heap) -> ClassIdMap {
    let num_classes = heap.num_classes();
    let mut children: Vec<Vec<ClassId>> = vec![Vec::new(); num_classes];
    let mut roots = Vec::new();
    for class_id in heap.class_ids().filter(|cid| !cid.is_predefined()) {
        let Some(class) = heap.class(class_id) else {
            continue;
        };
        match super_class_id(heap, class) {
            Some(parent) if !parent.is_predefined() && parent.index() < num_classes => {
                children[parent.index()].push(class_id)
            }
            _ => roots.push(class_id),
        }
    }

    let mut new_ids: Vec<ClassId> = (0..num_classes as u32).map(ClassId).collect();
    let mut visited = vec![false; num_classes];
    let mut next = ClassId::NUM_PREDEFINED;
    let mut stack = Vec::new();
    for root in roots {
        stack.push(root);
        while let Some(class_id) = stack.pop() {
            if std::mem::replace(&mut visited[class_id.index()], true) {
                continue;
            }
            new_ids[class_id.index()] = ClassId(next);
            next += 1;
            // Reversed so the lowest old id is numbered first.
            stack.extend(children[class_id.index()].iter().rev());
        }
    }
    // Classes on a hierarchy cycle are unreachable from any root; they
    // keep their relative order after everything else.
    for class_id in heap.class_ids().filter(|cid| !cid.is_predefined()) {
        if !visited[class_id.index()] {
            new_ids[class_id.index()] = ClassId(next);
            next += 1;
        }
    }
    ClassIdMap { new_ids }
}

/// Renumbers all program classes and rewrites every class id stored in
/// the heap. Cached hashes derived from class ids are dropped and the
/// canonical tables rebuilt.
pub fn sort_classes(heap: &mut Heap, interns: &mut InternTable) -> ClassIdMap {
    let map = compute_order(heap);
    if map.is_identity() {
        log::debug!("class ids already sorted");
        return map;
    }

    let mut table = vec![Value::Null; heap.num_classes()];
    for class_id in heap.class_ids().collect::<Vec<_>>() {
        table[map.map(class_id).index()] = heap.class_at(class_id);
    }
    heap.set_class_table(table);

    let mut moved = 0usize;
    for id in heap.object_ids() {
        let class_id = heap.header(id).class_id();
        let renumbered = map.map(class_id);
        if renumbered != class_id {
            heap.header_mut(id).set_class_id(renumbered);
            moved += 1;
        }
        match heap.object_mut(id) {
            Object::Class(c) => c.id = map.map(c.id),
            Object::Type(t) => {
                t.type_class_id = map.map(t.type_class_id);
                t.hash.clear();
            }
            Object::TypeParameter(p) => {
                p.parameterized_class_id = map.map(p.parameterized_class_id);
                p.hash.clear();
            }
            Object::TypeArguments(a) => a.hash.clear(),
            _ => {}
        }
    }
    interns.rehash(heap);
    log::info!(
        "sorted {} classes, {} instance headers rewritten",
        heap.class_ids().filter(|cid| !cid.is_predefined()).count(),
        moved
    );
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use heap::HeapSettings;
    use object::{Type, TypeState};

    fn class(heap: &mut Heap, class_id: ClassId, parent: Option<ClassId>) {
        let super_type = match parent {
            Some(parent) => heap
                .allocate(
                    ClassId::TYPE,
                    Type {
                        type_class_id: parent,
                        state: TypeState::Finalized,
                        ..Default::default()
                    },
                )
                .into(),
            None => Value::Null,
        };
        let id = heap.allocate(
            ClassId::CLASS,
            Class {
                id: class_id,
                super_type,
                ..Default::default()
            },
        );
        heap.register_class(id);
    }

    #[test]
    fn subclasses_become_contiguous() {
        let mut heap = Heap::new(HeapSettings::default());
        let base = ClassId::NUM_PREDEFINED;
        // c and d extend a; b sits between a and its subclasses.
        let a = ClassId(base);
        let b = ClassId(base + 1);
        let c = ClassId(base + 2);
        let d = ClassId(base + 3);
        class(&mut heap, a, None);
        class(&mut heap, b, None);
        class(&mut heap, c, Some(a));
        class(&mut heap, d, Some(a));

        let map = compute_order(&heap);
        assert_eq!(map.map(a), a);
        assert_eq!(map.map(c), ClassId(base + 1));
        assert_eq!(map.map(d), ClassId(base + 2));
        assert_eq!(map.map(b), ClassId(base + 3));
        assert_eq!(map.map(ClassId::STRING), ClassId::STRING);
    }

    #[test]
    fn sorted_program_is_left_alone() {
        let mut heap = Heap::new(HeapSettings::default());
        let base = ClassId::NUM_PREDEFINED;
        class(&mut heap, ClassId(base), None);
        class(&mut heap, ClassId(base + 1), Some(ClassId(base)));
        assert!(compute_order(&heap).is_identity());
    }
}
