//! Structural operations on types: instantiation, equivalence, hashing
//! and printing.
//!
//! A `Value::Null` in a type position stands for `dynamic`. That covers
//! raw types (null argument vectors) as well as slots of a vector that
//! are still being filled in.

use heap::Heap;
use object::{
    Class, ClassId, TypeArguments, TypeRef, TypeState, Value, combine_hash,
    finalize_hash,
};

/// Pairs of (original, counterpart) TypeRefs already visited by a
/// recursive operation.
pub type Trail = Vec<(Value, Value)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeEquality {
    /// Structural identity, used for canonical tables.
    Canonical,
    /// Looser equality: all top types are interchangeable.
    InSubtypeTest,
}

/// Follows TypeRefs to the type they stand for.
pub fn resolve(heap: &Heap, mut ty: Value) -> Value {
    while let Some(r) = heap.get_value::<TypeRef>(ty) {
        ty = r.target;
    }
    ty
}

pub fn dynamic_type(heap: &Heap) -> Value {
    heap.store.dynamic_type
}

pub fn is_type_ref(heap: &Heap, ty: Value) -> bool {
    heap.get_value::<TypeRef>(ty).is_some()
}

/// Class id of an interface type; `dynamic` for null.
pub fn type_class_id(heap: &Heap, ty: Value) -> Option<ClassId> {
    if ty.is_null() {
        return Some(ClassId::DYNAMIC);
    }
    heap.get_value::<object::Type>(ty).map(|t| t.type_class_id)
}

pub fn is_dynamic(heap: &Heap, ty: Value) -> bool {
    type_class_id(heap, resolve(heap, ty)) == Some(ClassId::DYNAMIC)
}

/// `dynamic`, `Object` and `void`.
pub fn is_top_type(heap: &Heap, ty: Value) -> bool {
    matches!(
        type_class_id(heap, resolve(heap, ty)),
        Some(ClassId::DYNAMIC | ClassId::OBJECT | ClassId::VOID)
    )
}

pub fn type_state(heap: &Heap, ty: Value) -> Option<TypeState> {
    match heap.object(ty.as_object()?) {
        object::Object::Type(t) => Some(t.state),
        object::Object::TypeParameter(p) => Some(p.state),
        object::Object::TypeRef(r) => type_state(heap, r.target),
        _ => None,
    }
}

pub fn is_finalized(heap: &Heap, ty: Value) -> bool {
    ty.is_null() || type_state(heap, ty) == Some(TypeState::Finalized)
}

pub fn is_being_finalized(heap: &Heap, ty: Value) -> bool {
    type_state(heap, ty) == Some(TypeState::BeingFinalized)
}

// ── Argument vectors ───────────────────────────────────────────────

pub fn arguments_len(heap: &Heap, args: Value) -> usize {
    heap.get_value::<TypeArguments>(args)
        .map_or(0, |a| a.types.len())
}

/// Element `index` of a vector; null (dynamic) when out of range.
pub fn argument_at(heap: &Heap, args: Value, index: usize) -> Value {
    heap.get_value::<TypeArguments>(args)
        .and_then(|a| a.types.get(index).copied())
        .unwrap_or(Value::Null)
}

/// Every element is `dynamic` (a null vector counts).
pub fn is_raw(heap: &Heap, args: Value) -> bool {
    match heap.get_value::<TypeArguments>(args) {
        Some(a) => a.types.iter().all(|t| is_dynamic(heap, *t)),
        None => true,
    }
}

// ── Instantiation ──────────────────────────────────────────────────

/// A type without free type parameters.
pub fn is_instantiated(heap: &Heap, ty: Value, trail: &mut Vec<Value>) -> bool {
    let Some(id) = ty.as_object() else {
        return true;
    };
    match heap.object(id) {
        object::Object::Type(t) => {
            let args = t.arguments;
            let len = arguments_len(heap, args);
            is_subvector_instantiated(heap, args, 0, len, trail)
        }
        object::Object::TypeParameter(_) => false,
        object::Object::TypeRef(r) => {
            if trail.contains(&ty) {
                return true;
            }
            trail.push(ty);
            is_instantiated(heap, r.target, trail)
        }
        _ => true,
    }
}

pub fn is_subvector_instantiated(
    heap: &Heap,
    args: Value,
    from: usize,
    len: usize,
    trail: &mut Vec<Value>,
) -> bool {
    (from..from + len).all(|i| is_instantiated(heap, argument_at(heap, args, i), trail))
}

/// Substitutes the type parameters of `ty` with elements of
/// `instantiator`; a null instantiator turns every parameter into
/// `dynamic`. Instantiating a type that is being finalized yields a type
/// that is also being finalized.
pub fn instantiate_from(heap: &mut Heap, ty: Value, instantiator: Value, trail: &mut Trail) -> Value {
    let Some(id) = ty.as_object() else {
        return ty;
    };
    if is_instantiated(heap, ty, &mut Vec::new()) {
        return ty;
    }
    match heap.object(id) {
        object::Object::TypeParameter(p) => {
            let index = p.index as usize;
            let arg = if instantiator.is_null() {
                Value::Null
            } else {
                argument_at(heap, instantiator, index)
            };
            if arg.is_null() { dynamic_type(heap) } else { arg }
        }
        object::Object::TypeRef(r) => {
            if let Some((_, buddy)) = trail.iter().find(|(original, _)| *original == ty) {
                return *buddy;
            }
            let target = r.target;
            let buddy = heap.allocate(ClassId::TYPE_REF, TypeRef::default());
            trail.push((ty, buddy.into()));
            let instantiated = instantiate_from(heap, target, instantiator, trail);
            if let Some(r) = heap.get_mut::<TypeRef>(buddy) {
                r.target = instantiated;
            }
            buddy.into()
        }
        object::Object::Type(t) => {
            let (class_id, arguments, state, token_pos) =
                (t.type_class_id, t.arguments, t.state, t.token_pos);
            let arguments = instantiate_arguments(heap, arguments, instantiator, trail);
            heap.allocate(
                ClassId::TYPE,
                object::Type {
                    type_class_id: class_id,
                    arguments,
                    state,
                    token_pos,
                    ..Default::default()
                },
            )
            .into()
        }
        _ => ty,
    }
}

pub fn instantiate_arguments(
    heap: &mut Heap,
    args: Value,
    instantiator: Value,
    trail: &mut Trail,
) -> Value {
    let Some(types) = heap.get_value::<TypeArguments>(args).map(|a| a.types.clone()) else {
        return args;
    };
    let len = types.len();
    if is_subvector_instantiated(heap, args, 0, len, &mut Vec::new()) {
        return args;
    }
    let types = types
        .into_iter()
        .map(|t| instantiate_from(heap, t, instantiator, trail))
        .collect();
    heap.allocate(
        ClassId::TYPE_ARGUMENTS,
        TypeArguments {
            types,
            ..Default::default()
        },
    )
    .into()
}

// ── Equivalence ────────────────────────────────────────────────────

pub fn is_equivalent(heap: &Heap, a: Value, b: Value, kind: TypeEquality, trail: &mut Trail) -> bool {
    if a == b {
        return true;
    }
    if is_type_ref(heap, a) || is_type_ref(heap, b) {
        if trail.contains(&(a, b)) {
            return true;
        }
        trail.push((a, b));
        let (a, b) = (step_ref(heap, a), step_ref(heap, b));
        return is_equivalent(heap, a, b, kind, trail);
    }
    if kind == TypeEquality::InSubtypeTest && is_top_type(heap, a) && is_top_type(heap, b) {
        return true;
    }
    if a.is_null() || b.is_null() {
        return is_dynamic(heap, a) && is_dynamic(heap, b);
    }
    match (heap.object_of(a), heap.object_of(b)) {
        (Some(object::Object::Type(x)), Some(object::Object::Type(y))) => {
            x.type_class_id == y.type_class_id
                && arguments_equivalent(heap, x.arguments, y.arguments, kind, trail)
        }
        (Some(object::Object::TypeParameter(x)), Some(object::Object::TypeParameter(y))) => {
            x.parameterized_class_id == y.parameterized_class_id && x.index == y.index
        }
        _ => false,
    }
}

fn step_ref(heap: &Heap, ty: Value) -> Value {
    heap.get_value::<TypeRef>(ty).map_or(ty, |r| r.target)
}

/// Vectors of equal length with pairwise equivalent elements. A null
/// vector is equivalent to any all-`dynamic` vector.
pub fn arguments_equivalent(heap: &Heap, a: Value, b: Value, kind: TypeEquality, trail: &mut Trail) -> bool {
    if a == b {
        return true;
    }
    if a.is_null() || b.is_null() {
        return is_raw(heap, a) && is_raw(heap, b);
    }
    let len = arguments_len(heap, a);
    if len != arguments_len(heap, b) {
        return false;
    }
    subvector_equivalent(heap, a, b, 0, len, kind, trail)
}

pub fn is_subvector_equivalent(
    heap: &Heap,
    a: Value,
    b: Value,
    from: usize,
    len: usize,
    kind: TypeEquality,
) -> bool {
    subvector_equivalent(heap, a, b, from, len, kind, &mut Trail::new())
}

fn subvector_equivalent(
    heap: &Heap,
    a: Value,
    b: Value,
    from: usize,
    len: usize,
    kind: TypeEquality,
    trail: &mut Trail,
) -> bool {
    (from..from + len).all(|i| {
        is_equivalent(heap, argument_at(heap, a, i), argument_at(heap, b, i), kind, trail)
    })
}

// ── Hashing ────────────────────────────────────────────────────────
//
// Element hashes only look one level deep (class id or parameter
// position), so hashing terminates on cyclic types and stays consistent
// with equivalence through TypeRefs.

fn shallow_hash(heap: &Heap, ty: Value) -> u32 {
    let ty = resolve(heap, ty);
    if ty.is_null() {
        return combine_hash(0, ClassId::DYNAMIC.0);
    }
    match heap.object_of(ty) {
        Some(object::Object::Type(t)) => combine_hash(0, t.type_class_id.0),
        Some(object::Object::TypeParameter(p)) => {
            combine_hash(combine_hash(0, p.parameterized_class_id.0), p.index as u32)
        }
        _ => 0,
    }
}

const RAW_ARGUMENTS_HASH: u32 = 1;

pub fn type_arguments_hash(heap: &Heap, args: Value) -> u32 {
    let Some(vector) = heap.get_value::<TypeArguments>(args) else {
        return RAW_ARGUMENTS_HASH;
    };
    if let Some(hash) = vector.hash.get() {
        return hash;
    }
    if is_raw(heap, args) {
        return RAW_ARGUMENTS_HASH;
    }
    let hash = vector
        .types
        .iter()
        .fold(vector.types.len() as u32, |h, t| combine_hash(h, shallow_hash(heap, *t)));
    let hash = finalize_hash(hash);
    if heap.is_canonical(args) {
        vector.hash.set(hash);
    }
    hash
}

pub fn type_hash(heap: &Heap, ty: Value) -> u32 {
    let ty = resolve(heap, ty);
    if ty.is_null() {
        return finalize_hash(combine_hash(ClassId::DYNAMIC.0, RAW_ARGUMENTS_HASH));
    }
    match heap.object_of(ty) {
        Some(object::Object::Type(t)) => {
            if let Some(hash) = t.hash.get() {
                return hash;
            }
            let hash = finalize_hash(combine_hash(
                t.type_class_id.0,
                type_arguments_hash(heap, t.arguments),
            ));
            if t.state == TypeState::Finalized {
                t.hash.set(hash);
            }
            hash
        }
        Some(object::Object::TypeParameter(_)) => finalize_hash(shallow_hash(heap, ty)),
        _ => 0,
    }
}

// ── Printing ───────────────────────────────────────────────────────

pub fn class_name(heap: &Heap, class_id: ClassId) -> String {
    if let Some(name) = heap.class(class_id).and_then(|c| heap.string_value(c.name)) {
        return name;
    }
    match class_id {
        ClassId::DYNAMIC => "dynamic".into(),
        ClassId::VOID => "void".into(),
        ClassId::OBJECT => "Object".into(),
        ClassId::NULL => "Null".into(),
        other => format!("<class {}>", other.0),
    }
}

/// User-visible name: only the class's own type arguments are printed.
pub fn type_name(heap: &Heap, ty: Value) -> String {
    let mut out = String::new();
    write_type_name(heap, ty, &mut Vec::new(), &mut out);
    out
}

fn write_type_name(heap: &Heap, ty: Value, trail: &mut Vec<Value>, out: &mut String) {
    if ty.is_null() {
        out.push_str("dynamic");
        return;
    }
    match heap.object_of(ty) {
        Some(object::Object::TypeRef(r)) => {
            if trail.contains(&ty) {
                let target = resolve(heap, r.target);
                let name = type_class_id(heap, target)
                    .map(|cid| class_name(heap, cid))
                    .unwrap_or_else(|| "?".into());
                out.push_str(&name);
                return;
            }
            trail.push(ty);
            write_type_name(heap, r.target, trail, out);
        }
        Some(object::Object::TypeParameter(p)) => {
            let name = heap.string_value(p.name).unwrap_or_else(|| format!("T{}", p.index));
            out.push_str(&name);
        }
        Some(object::Object::Type(t)) => {
            out.push_str(&class_name(heap, t.type_class_id));
            let len = arguments_len(heap, t.arguments);
            if len == 0 || is_raw(heap, t.arguments) {
                return;
            }
            let own = heap
                .class(t.type_class_id)
                .map_or(len, Class::num_type_parameters)
                .min(len);
            if own == 0 {
                return;
            }
            out.push('<');
            for (n, i) in (len - own..len).enumerate() {
                if n > 0 {
                    out.push_str(", ");
                }
                write_type_name(heap, argument_at(heap, t.arguments, i), trail, out);
            }
            out.push('>');
        }
        _ => out.push_str("<not a type>"),
    }
}
