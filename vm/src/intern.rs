//! The canonical tables of an isolate group.
//!
//! All tables live in one [`InternTable`] that is reached through an
//! explicit `&mut` borrow, normally obtained from the program write lock
//! (see [`crate::IsolateGroup`]).

use heap::Heap;
use object::{ClassId, Object, ObjectKind, StrRef, TypeArguments, TypeRef, Value};

use crate::canonical::{
    CanonicalConstantTraits, CanonicalTypeArgumentsTraits, CanonicalTypeTraits,
    SymbolTraits,
};
use crate::hash_table::{EnumIndexHashSet, LoadFactor, UnorderedHashSet};

pub struct InternTable {
    symbols: EnumIndexHashSet<SymbolTraits>,
    types: UnorderedHashSet<CanonicalTypeTraits>,
    type_arguments: UnorderedHashSet<CanonicalTypeArgumentsTraits>,
    constants: EnumIndexHashSet<CanonicalConstantTraits>,
}

impl Default for InternTable {
    fn default() -> Self {
        Self::new(LoadFactor::default())
    }
}

impl InternTable {
    pub fn new(load: LoadFactor) -> Self {
        Self {
            symbols: EnumIndexHashSet::with_load_factor(64, load),
            types: UnorderedHashSet::with_load_factor(32, load),
            type_arguments: UnorderedHashSet::with_load_factor(32, load),
            constants: EnumIndexHashSet::with_load_factor(16, load),
        }
    }

    pub fn num_symbols(&self) -> usize {
        self.symbols.len()
    }

    pub fn num_types(&self) -> usize {
        self.types.len()
    }

    pub fn num_type_arguments(&self) -> usize {
        self.type_arguments.len()
    }

    pub fn num_constants(&self) -> usize {
        self.constants.len()
    }

    /// Symbols in the order they were first interned.
    pub fn symbols(&self) -> impl Iterator<Item = Value> + '_ {
        self.symbols.iter()
    }

    // ── Symbols ────────────────────────────────────────────────────

    pub fn symbol(&mut self, heap: &mut Heap, text: &str) -> Value {
        self.symbols.insert_new_or_get(heap, text)
    }

    /// Interns raw characters; a string object is only allocated when the
    /// symbol is new.
    pub fn symbol_from(&mut self, heap: &mut Heap, text: StrRef<'_>) -> Value {
        self.symbols.insert_new_or_get(heap, &text)
    }

    pub fn lookup_symbol(&self, heap: &Heap, text: &str) -> Value {
        self.symbols.get_or_null(heap, text)
    }

    /// Interns an existing string object.
    pub fn canonicalize_string(&mut self, heap: &Heap, string: Value) -> Value {
        let canonical = self.symbols.insert_or_get(heap, string);
        if let Value::Object(id) = canonical {
            heap.set_canonical(id);
        }
        canonical
    }

    // ── Types ──────────────────────────────────────────────────────

    /// Canonical representative of a finalized type. The argument vector
    /// is canonicalized first; TypeRefs stay in place and have their
    /// targets canonicalized.
    pub fn canonicalize_type(&mut self, heap: &mut Heap, ty: Value) -> Value {
        self.canonicalize_type_in(heap, ty, &mut Vec::new())
    }

    pub fn canonicalize_type_arguments(&mut self, heap: &mut Heap, args: Value) -> Value {
        self.canonicalize_arguments_in(heap, args, &mut Vec::new())
    }

    fn canonicalize_type_in(&mut self, heap: &mut Heap, ty: Value, trail: &mut Vec<Value>) -> Value {
        let Value::Object(id) = ty else {
            return ty;
        };
        if heap.is_canonical(ty) {
            return ty;
        }
        match heap.object(id) {
            Object::TypeRef(r) => {
                if trail.contains(&ty) {
                    return ty;
                }
                trail.push(ty);
                let target = r.target;
                let target = self.canonicalize_type_in(heap, target, trail);
                if let Some(r) = heap.get_mut::<TypeRef>(id) {
                    r.target = target;
                }
                ty
            }
            Object::TypeParameter(_) => {
                heap.set_canonical(id);
                ty
            }
            Object::Type(t) => {
                let arguments = t.arguments;
                let arguments = self.canonicalize_arguments_in(heap, arguments, trail);
                if let Some(t) = heap.get_mut::<object::Type>(id) {
                    t.arguments = arguments;
                }
                // A nested reference may have canonicalized this type
                // already.
                if heap.is_canonical(ty) {
                    return ty;
                }
                let canonical = self.types.insert_or_get(heap, ty);
                if canonical == ty {
                    heap.set_canonical(id);
                }
                canonical
            }
            _ => ty,
        }
    }

    fn canonicalize_arguments_in(&mut self, heap: &mut Heap, args: Value, trail: &mut Vec<Value>) -> Value {
        let Value::Object(id) = args else {
            return args;
        };
        if heap.is_canonical(args) {
            return args;
        }
        let Some(types) = heap.get::<TypeArguments>(id).map(|a| a.types.clone()) else {
            return args;
        };
        for (index, ty) in types.into_iter().enumerate() {
            let canonical = self.canonicalize_type_in(heap, ty, trail);
            if let Some(a) = heap.get_mut::<TypeArguments>(id) {
                a.types[index] = canonical;
            }
        }
        if heap.is_canonical(args) {
            return args;
        }
        let canonical = self.type_arguments.insert_or_get(heap, args);
        if canonical == args {
            heap.set_canonical(id);
        }
        canonical
    }

    // ── Constants ──────────────────────────────────────────────────

    pub fn canonicalize_constant(&mut self, heap: &Heap, value: Value) -> Value {
        let canonical = self.constants.insert_or_get(heap, value);
        if let Value::Object(id) = canonical {
            heap.set_canonical(id);
        }
        canonical
    }

    /// Routes `value` to the table for its kind. Kinds without a table are
    /// canonical by identity.
    pub fn canonicalize(&mut self, heap: &mut Heap, value: Value) -> Value {
        let Value::Object(id) = value else {
            return value;
        };
        match heap.header(id).class_id().kind() {
            ObjectKind::Type | ObjectKind::TypeRef | ObjectKind::TypeParameter => {
                self.canonicalize_type(heap, value)
            }
            ObjectKind::TypeArguments => self.canonicalize_type_arguments(heap, value),
            ObjectKind::OneByteString | ObjectKind::TwoByteString | ObjectKind::FourByteString => {
                self.canonicalize_string(heap, value)
            }
            ObjectKind::Mint
            | ObjectKind::Double
            | ObjectKind::Bigint
            | ObjectKind::Array
            | ObjectKind::Instance => self.canonicalize_constant(heap, value),
            _ => {
                heap.set_canonical(id);
                value
            }
        }
    }

    /// Enters an object that is already canonical, e.g. one read from a
    /// full snapshot, without looking for an existing representative.
    pub fn register(&mut self, heap: &Heap, value: Value) {
        match heap.class_id_of(value).kind() {
            ObjectKind::OneByteString | ObjectKind::TwoByteString | ObjectKind::FourByteString => {
                self.symbols.insert(heap, value);
            }
            ObjectKind::Type => {
                self.types.insert(heap, value);
            }
            ObjectKind::TypeArguments => {
                self.type_arguments.insert(heap, value);
            }
            ObjectKind::Mint
            | ObjectKind::Double
            | ObjectKind::Bigint
            | ObjectKind::Array
            | ObjectKind::Instance => {
                self.constants.insert(heap, value);
            }
            _ => {}
        }
    }

    /// Rebuilds every table; required once stored hashes changed, e.g.
    /// after class ids were renumbered.
    pub fn rehash(&mut self, heap: &Heap) {
        self.symbols.rehash(heap);
        self.types.rehash(heap);
        self.type_arguments.rehash(heap);
        self.constants.rehash(heap);
        log::debug!(
            "rehashed intern tables: {} symbols, {} types, {} type arguments, {} constants",
            self.num_symbols(),
            self.num_types(),
            self.num_type_arguments(),
            self.num_constants()
        );
    }

    /// Interned type equal to `ty`, or null.
    pub fn lookup_type(&self, heap: &Heap, ty: Value) -> Value {
        self.types.get_or_null(heap, &ty)
    }

    pub fn contains_class_type(&self, heap: &Heap, class_id: ClassId) -> bool {
        self.types
            .iter()
            .any(|t| heap.get_value::<object::Type>(t).is_some_and(|t| t.type_class_id == class_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heap::HeapSettings;
    use object::{Mint, TypeState};

    fn finalized_type(heap: &mut Heap, class_id: ClassId, args: Vec<Value>) -> Value {
        let arguments = if args.is_empty() {
            Value::Null
        } else {
            heap.allocate(
                ClassId::TYPE_ARGUMENTS,
                TypeArguments {
                    types: args,
                    ..Default::default()
                },
            )
            .into()
        };
        heap.allocate(
            ClassId::TYPE,
            object::Type {
                type_class_id: class_id,
                arguments,
                state: TypeState::Finalized,
                ..Default::default()
            },
        )
        .into()
    }

    #[test]
    fn equal_types_share_one_representative() {
        let mut heap = Heap::new(HeapSettings::default());
        let mut interns = InternTable::default();
        let list = ClassId(ClassId::NUM_PREDEFINED);
        let int_a = finalized_type(&mut heap, ClassId::INTEGER, vec![]);
        let int_b = finalized_type(&mut heap, ClassId::INTEGER, vec![]);
        let list_a = finalized_type(&mut heap, list, vec![int_a]);
        let list_b = finalized_type(&mut heap, list, vec![int_b]);

        let first = interns.canonicalize_type(&mut heap, list_a);
        let second = interns.canonicalize_type(&mut heap, list_b);
        assert_eq!(first, list_a);
        assert_eq!(second, list_a);
        assert!(heap.is_canonical(list_a));
        assert!(!heap.is_canonical(list_b));
        assert_eq!(interns.num_types(), 2);
        assert_eq!(interns.num_type_arguments(), 1);
        assert_eq!(interns.lookup_type(&heap, list_b), list_a);
    }

    #[test]
    fn cyclic_type_canonicalizes() {
        let mut heap = Heap::new(HeapSettings::default());
        let mut interns = InternTable::default();
        let class_id = ClassId(ClassId::NUM_PREDEFINED);
        let reference = heap.allocate(ClassId::TYPE_REF, TypeRef::default());
        let ty = finalized_type(&mut heap, class_id, vec![reference.into()]);
        heap.get_mut::<TypeRef>(reference).unwrap().target = ty;

        assert_eq!(interns.canonicalize_type(&mut heap, ty), ty);
        assert!(heap.is_canonical(ty));
        assert!(interns.contains_class_type(&heap, class_id));
    }

    #[test]
    fn symbols_and_constants_route_by_kind() {
        let mut heap = Heap::new(HeapSettings::default());
        let mut interns = InternTable::default();
        let sym = interns.symbol(&mut heap, "main");
        let copy = heap.new_string("main");
        assert_eq!(interns.canonicalize(&mut heap, copy.into()), sym);
        assert_eq!(interns.lookup_symbol(&heap, "main"), sym);

        let a = heap.allocate(ClassId::MINT, Mint { value: i64::MIN });
        let b = heap.allocate(ClassId::MINT, Mint { value: i64::MIN });
        let ca = interns.canonicalize(&mut heap, a.into());
        assert_eq!(interns.canonicalize(&mut heap, b.into()), ca);
        assert_eq!(interns.num_constants(), 1);
        assert_eq!(interns.symbols().collect::<Vec<_>>(), vec![sym]);
    }
}
