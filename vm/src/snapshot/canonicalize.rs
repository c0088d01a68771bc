//! Recanonicalization of objects read from a script snapshot or message.
//!
//! The writer's canonical bit only says the object was canonical on the
//! writing side. After reading, every such object is looked up in the
//! reader's tables; when an equal representative already exists, all
//! edges to the copy are redirected to it.

use heap::{Edges, EdgesMut, Heap};
use object::{Object, ObjectId, Value};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::intern::InternTable;

type Replacements = FxHashMap<ObjectId, Value>;

fn redirect_slot(slot: &mut Value, replacements: &Replacements) {
    if let Value::Object(id) = *slot
        && let Some(replacement) = replacements.get(&id)
    {
        *slot = *replacement;
    }
}

fn redirect_edges(heap: &mut Heap, id: ObjectId, replacements: &Replacements) {
    heap.visit_edges_mut(id, &mut EdgesMut(|slot: &mut Value| {
        redirect_slot(slot, replacements)
    }));
}

enum Step {
    Enter(ObjectId),
    Exit(ObjectId),
}

/// Objects reachable from `canonical` inside the read set, children
/// before parents. A child reached again through a back reference still
/// precedes every object that points at it; only cycles are cut.
fn post_order(heap: &Heap, canonical: &[ObjectId], read: &FxHashSet<ObjectId>) -> Vec<ObjectId> {
    let mut order = Vec::with_capacity(read.len());
    let mut visited = FxHashSet::default();
    let mut stack: Vec<Step> = canonical.iter().rev().map(|id| Step::Enter(*id)).collect();
    let mut children = Vec::new();
    while let Some(step) = stack.pop() {
        let id = match step {
            Step::Exit(id) => {
                order.push(id);
                continue;
            }
            Step::Enter(id) => id,
        };
        if !visited.insert(id) {
            continue;
        }
        stack.push(Step::Exit(id));
        heap.visit_edges(id, &mut Edges(|value: Value| {
            if let Value::Object(child) = value
                && read.contains(&child)
                && !visited.contains(&child)
            {
                children.push(child);
            }
        }));
        stack.extend(children.drain(..).rev().map(Step::Enter));
    }
    order
}

/// Settles every canonical object read in this session. Objects are
/// visited children first and each one's edges are redirected before it
/// is hashed, so a container only ever meets settled representatives.
pub(super) fn canonicalize_read_objects(
    heap: &mut Heap,
    interns: &mut InternTable,
    canonical: &[ObjectId],
    allocated: &[ObjectId],
    roots: &mut [Value],
) {
    let read: FxHashSet<ObjectId> = allocated.iter().copied().collect();
    let is_canonical: FxHashSet<ObjectId> = canonical.iter().copied().collect();
    let mut replacements = Replacements::default();
    for id in post_order(heap, canonical, &read) {
        if !replacements.is_empty() {
            redirect_edges(heap, id, &replacements);
        }
        if !is_canonical.contains(&id) {
            continue;
        }
        let value = Value::Object(id);
        let representative = match heap.object(id) {
            Object::Bool(b) => {
                let shared = if b.value {
                    heap.store.true_value
                } else {
                    heap.store.false_value
                };
                if shared.is_null() {
                    interns.canonicalize(heap, value)
                } else {
                    shared
                }
            }
            _ => interns.canonicalize(heap, value),
        };
        if representative != value {
            replacements.insert(id, representative);
        }
    }
    if replacements.is_empty() {
        return;
    }
    for &id in allocated {
        redirect_edges(heap, id, &replacements);
    }
    for root in roots {
        redirect_slot(root, &replacements);
    }
    log::debug!(
        "{} of {} canonical objects replaced by existing representatives",
        replacements.len(),
        canonical.len()
    );
}
