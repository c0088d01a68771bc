//! Hash and identity policies for the canonical tables.

use heap::Heap;
use object::{
    Array, Bigint, ClassId, Double, Field, FourByteString, Function, Instance,
    Library, Mint, Object, OneByteString, StrRef, TwoByteString, Value,
    combine_hash, finalize_hash, hash_str,
};

use crate::hash_table::{HashTraits, NewKey, ProbeKey, UnorderedHashMap};
use crate::types::{self, Trail, TypeEquality};

#[inline(always)]
fn fold64(bits: u64) -> u32 {
    ((bits >> 32) ^ bits) as u32
}

/// Hash of a slot compared by identity.
fn identity_hash(value: Value) -> u32 {
    match value {
        Value::Null => 0,
        Value::Smi(v) => fold64(v as u64),
        Value::Object(id) => id.raw(),
    }
}

// ── Symbols ────────────────────────────────────────────────────────

/// Interned strings, compared by code points.
pub struct SymbolTraits;

impl HashTraits for SymbolTraits {
    const NAME: &'static str = "symbols";

    fn hash(heap: &Heap, key: Value) -> u32 {
        heap.object_of(key)
            .and_then(Object::string_hash)
            .unwrap_or(0)
    }

    fn is_match(heap: &Heap, a: Value, b: Value) -> bool {
        match (heap.str_ref(a), heap.str_ref(b)) {
            (Some(a), Some(b)) => a.content_eq(b),
            _ => false,
        }
    }
}

impl ProbeKey<SymbolTraits> for str {
    fn hash(&self, _heap: &Heap) -> u32 {
        hash_str(self)
    }

    fn is_match(&self, heap: &Heap, stored: Value) -> bool {
        heap.str_ref(stored)
            .is_some_and(|s| s.code_points().eq(self.chars().map(|c| c as u32)))
    }
}

impl NewKey<SymbolTraits> for str {
    fn new_key(&self, heap: &mut Heap) -> Value {
        let id = heap.new_string(self);
        heap.set_canonical(id);
        id.into()
    }
}

/// Raw characters, e.g. straight out of a snapshot buffer. Nothing is
/// allocated unless the symbol is new.
impl ProbeKey<SymbolTraits> for StrRef<'_> {
    fn hash(&self, _heap: &Heap) -> u32 {
        StrRef::hash(*self)
    }

    fn is_match(&self, heap: &Heap, stored: Value) -> bool {
        heap.str_ref(stored).is_some_and(|s| s.content_eq(*self))
    }
}

impl NewKey<SymbolTraits> for StrRef<'_> {
    fn new_key(&self, heap: &mut Heap) -> Value {
        let (class_id, object) = narrowest_string(*self);
        let id = heap.allocate(class_id, object);
        heap.set_canonical(id);
        id.into()
    }
}

/// Copies `text` into the narrowest layout holding all of its code
/// points; UTF-16 sources keep their code units.
pub fn narrowest_string(text: StrRef<'_>) -> (ClassId, Object) {
    let hash = text.hash();
    if text.code_points().all(|cp| cp < 0x100) {
        let s = OneByteString {
            data: text.code_points().map(|cp| cp as u8).collect(),
            ..Default::default()
        };
        s.hash.set(hash);
        return (ClassId::ONE_BYTE_STRING, s.into());
    }
    match text {
        StrRef::Utf32(points) => {
            let s = FourByteString {
                data: points.to_vec(),
                ..Default::default()
            };
            s.hash.set(hash);
            (ClassId::FOUR_BYTE_STRING, s.into())
        }
        _ => {
            let mut data = Vec::with_capacity(text.unit_len());
            for cp in text.code_points() {
                match char::from_u32(cp) {
                    Some(c) => data.extend_from_slice(c.encode_utf16(&mut [0; 2])),
                    // Lone surrogates survive as themselves.
                    None => data.push(cp as u16),
                }
            }
            let s = TwoByteString {
                data,
                ..Default::default()
            };
            s.hash.set(hash);
            (ClassId::TWO_BYTE_STRING, s.into())
        }
    }
}

// ── Types ──────────────────────────────────────────────────────────

pub struct CanonicalTypeTraits;

impl HashTraits for CanonicalTypeTraits {
    const NAME: &'static str = "canonical types";

    fn hash(heap: &Heap, key: Value) -> u32 {
        types::type_hash(heap, key)
    }

    fn is_match(heap: &Heap, a: Value, b: Value) -> bool {
        types::is_equivalent(heap, a, b, TypeEquality::Canonical, &mut Trail::new())
    }
}

pub struct CanonicalTypeArgumentsTraits;

impl HashTraits for CanonicalTypeArgumentsTraits {
    const NAME: &'static str = "canonical type arguments";

    fn hash(heap: &Heap, key: Value) -> u32 {
        types::type_arguments_hash(heap, key)
    }

    fn is_match(heap: &Heap, a: Value, b: Value) -> bool {
        types::arguments_equivalent(heap, a, b, TypeEquality::Canonical, &mut Trail::new())
    }
}

// ── Constants ──────────────────────────────────────────────────────

/// Boxed numbers, constant instances and immutable arrays. Keys of
/// different classes never match, so the class id is part of the hash.
/// Constant fields and elements are expected to be canonical already and
/// are compared by identity.
pub struct CanonicalConstantTraits;

impl CanonicalConstantTraits {
    fn content_hash(heap: &Heap, key: Value) -> u32 {
        let Some(object) = heap.object_of(key) else {
            return identity_hash(key);
        };
        match object {
            Object::Mint(m) => fold64(m.value as u64),
            Object::Double(d) => fold64(d.value.to_bits()),
            Object::Bigint(_) => heap.bigint_digits(key).map_or(0, |(negative, digits)| {
                digits.iter().fold(negative as u32, |h, d| combine_hash(h, *d))
            }),
            Object::Array(a) => a.elements.iter().fold(
                combine_hash(a.elements.len() as u32, identity_hash(a.type_arguments)),
                |h, e| combine_hash(h, identity_hash(*e)),
            ),
            Object::Instance(i) => i
                .fields
                .iter()
                .fold(i.fields.len() as u32, |h, f| combine_hash(h, identity_hash(*f))),
            other => other.string_hash().unwrap_or_else(|| identity_hash(key)),
        }
    }
}

impl HashTraits for CanonicalConstantTraits {
    const NAME: &'static str = "canonical constants";

    fn hash(heap: &Heap, key: Value) -> u32 {
        let class_id = heap.class_id_of(key);
        finalize_hash(combine_hash(class_id.0, Self::content_hash(heap, key)))
    }

    fn is_match(heap: &Heap, a: Value, b: Value) -> bool {
        if heap.class_id_of(a) != heap.class_id_of(b) {
            return false;
        }
        match (heap.object_of(a), heap.object_of(b)) {
            (Some(Object::Mint(Mint { value: x })), Some(Object::Mint(Mint { value: y }))) => x == y,
            (Some(Object::Double(Double { value: x })), Some(Object::Double(Double { value: y }))) => {
                x.to_bits() == y.to_bits()
            }
            (Some(Object::Bigint(Bigint { .. })), Some(Object::Bigint(Bigint { .. }))) => {
                heap.bigint_digits(a) == heap.bigint_digits(b)
            }
            (Some(Object::Array(Array { type_arguments: ta, elements: x })),
             Some(Object::Array(Array { type_arguments: tb, elements: y }))) => ta == tb && x == y,
            (Some(Object::Instance(Instance { fields: x })), Some(Object::Instance(Instance { fields: y }))) => {
                x == y
            }
            _ => heap.key_equals(a, b),
        }
    }
}

// ── Program metadata ───────────────────────────────────────────────

/// Matches program elements by name and owner chain instead of identity,
/// so an element of a replacement library finds its counterpart in the
/// library it replaces.
pub struct MetadataMapTraits;

impl MetadataMapTraits {
    fn name_hash(heap: &Heap, name: Value) -> u32 {
        heap.str_ref(name).map_or(0, StrRef::hash)
    }

    fn names_match(heap: &Heap, a: Value, b: Value) -> bool {
        match (heap.str_ref(a), heap.str_ref(b)) {
            (Some(a), Some(b)) => a.content_eq(b),
            (None, None) => true,
            _ => false,
        }
    }

    fn library_url(heap: &Heap, library: Value) -> Value {
        heap.get_value::<Library>(library).map_or(Value::Null, |l| l.url)
    }
}

impl HashTraits for MetadataMapTraits {
    const NAME: &'static str = "metadata";

    fn hash(heap: &Heap, key: Value) -> u32 {
        let Some(object) = heap.object_of(key) else {
            return identity_hash(key);
        };
        let hash = match object {
            Object::Library(l) => Self::name_hash(heap, l.url),
            Object::Class(c) => combine_hash(
                Self::name_hash(heap, Self::library_url(heap, c.library)),
                Self::name_hash(heap, c.name),
            ),
            Object::Function(Function { name, owner, .. }) | Object::Field(Field { name, owner, .. }) => {
                combine_hash(Self::hash(heap, *owner), Self::name_hash(heap, *name))
            }
            Object::TypeParameter(p) => combine_hash(
                Self::hash(heap, heap.class_at(p.parameterized_class_id)),
                Self::name_hash(heap, p.name),
            ),
            _ => identity_hash(key),
        };
        finalize_hash(hash)
    }

    fn is_match(heap: &Heap, a: Value, b: Value) -> bool {
        if a == b {
            return true;
        }
        match (heap.object_of(a), heap.object_of(b)) {
            (Some(Object::Library(x)), Some(Object::Library(y))) => Self::names_match(heap, x.url, y.url),
            (Some(Object::Class(x)), Some(Object::Class(y))) => {
                Self::names_match(heap, x.name, y.name)
                    && Self::names_match(
                        heap,
                        Self::library_url(heap, x.library),
                        Self::library_url(heap, y.library),
                    )
            }
            (Some(Object::Function(x)), Some(Object::Function(y))) => {
                x.kind == y.kind
                    && Self::names_match(heap, x.name, y.name)
                    && Self::is_match(heap, x.owner, y.owner)
            }
            (Some(Object::Field(x)), Some(Object::Field(y))) => {
                Self::names_match(heap, x.name, y.name) && Self::is_match(heap, x.owner, y.owner)
            }
            (Some(Object::TypeParameter(x)), Some(Object::TypeParameter(y))) => {
                Self::names_match(heap, x.name, y.name)
                    && Self::is_match(
                        heap,
                        heap.class_at(x.parameterized_class_id),
                        heap.class_at(y.parameterized_class_id),
                    )
            }
            _ => false,
        }
    }
}

/// Side table keyed by program elements.
pub type MetadataMap = UnorderedHashMap<MetadataMapTraits>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash_table::{EnumIndexHashSet, UnorderedHashSet};
    use heap::HeapSettings;
    use object::Class;

    #[test]
    fn symbols_probe_without_allocating() {
        let mut heap = Heap::new(HeapSettings::default());
        let mut symbols = EnumIndexHashSet::<SymbolTraits>::new(4);
        let first = symbols.insert_new_or_get(&mut heap, "hello");
        let objects = heap.len();

        let bytes: Vec<u8> = "hello".encode_utf16().flat_map(u16::to_le_bytes).collect();
        let again = symbols.insert_new_or_get(&mut heap, &StrRef::Utf16Le(&bytes));
        assert_eq!(again, first);
        assert_eq!(heap.len(), objects);
        assert!(heap.is_canonical(first));
        assert_eq!(symbols.get_or_null(&heap, "absent"), Value::Null);
    }

    #[test]
    fn wide_symbols_keep_their_width() {
        let mut heap = Heap::new(HeapSettings::default());
        let mut symbols = UnorderedHashSet::<SymbolTraits>::new(4);
        let units: Vec<u16> = "λx".encode_utf16().collect();
        let stored = symbols.insert_new_or_get(&mut heap, &StrRef::Utf16(&units));
        assert_eq!(heap.class_id_of(stored), ClassId::TWO_BYTE_STRING);
        assert_eq!(symbols.get_or_null(&heap, "λx"), stored);

        let latin = symbols.insert_new_or_get(&mut heap, &StrRef::Utf32(&[0x61, 0xE9]));
        assert_eq!(heap.class_id_of(latin), ClassId::ONE_BYTE_STRING);
        assert_eq!(heap.string_value(latin).as_deref(), Some("aé"));
    }

    #[test]
    fn constants_match_by_value_within_a_class() {
        let mut heap = Heap::new(HeapSettings::default());
        let a = heap.allocate(ClassId::MINT, Mint { value: 1 << 62 });
        let b = heap.allocate(ClassId::MINT, Mint { value: 1 << 62 });
        let d = heap.allocate(ClassId::DOUBLE, Double { value: 2.5 });
        let mut constants = UnorderedHashSet::<CanonicalConstantTraits>::new(4);
        assert_eq!(constants.insert_or_get(&heap, a.into()), Value::from(a));
        assert_eq!(constants.insert_or_get(&heap, b.into()), Value::from(a));
        assert_eq!(constants.insert_or_get(&heap, d.into()), Value::from(d));
        assert_eq!(constants.len(), 2);
    }

    fn library(heap: &mut Heap, url: &str) -> Value {
        let url = heap.new_string(url);
        heap.allocate(
            ClassId::LIBRARY,
            Library {
                url: url.into(),
                ..Default::default()
            },
        )
        .into()
    }

    fn class(heap: &mut Heap, library: Value, name: &str) -> Value {
        let name = heap.new_string(name);
        let id = heap.allocate_class_id();
        let class = heap.allocate(
            ClassId::CLASS,
            Class {
                id,
                name: name.into(),
                library,
                ..Default::default()
            },
        );
        heap.register_class(class);
        class.into()
    }

    fn field(heap: &mut Heap, owner: Value, name: &str) -> Value {
        let name = heap.new_string(name);
        heap.allocate(
            ClassId::FIELD,
            Field {
                name: name.into(),
                owner,
                ..Default::default()
            },
        )
        .into()
    }

    #[test]
    fn metadata_matches_through_owner_chain() {
        let mut heap = Heap::new(HeapSettings::default());
        let old_lib = library(&mut heap, "package:app/app.dart");
        let new_lib = library(&mut heap, "package:app/app.dart");
        let other_lib = library(&mut heap, "package:app/other.dart");
        let old_class = class(&mut heap, old_lib, "Point");
        let new_class = class(&mut heap, new_lib, "Point");
        let stray_class = class(&mut heap, other_lib, "Point");
        let old_field = field(&mut heap, old_class, "x");
        let new_field = field(&mut heap, new_class, "x");
        let stray_field = field(&mut heap, stray_class, "x");

        let mut map = MetadataMap::new(4);
        map.insert(&heap, old_field, Value::Smi(1));
        assert_eq!(map.get_or_null(&heap, &new_field), Value::Smi(1));
        assert_eq!(map.get_or_null(&heap, &stray_field), Value::Null);
        assert!(MetadataMapTraits::is_match(&heap, old_class, new_class));
        assert!(!MetadataMapTraits::is_match(&heap, old_class, stray_class));
    }
}
