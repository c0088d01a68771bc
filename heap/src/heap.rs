//! Arena heap.
//!
//! Objects live in one growable vector and are addressed by [`ObjectId`];
//! nothing ever moves, so ids stay valid for the lifetime of the heap.
//! There is no collector: a snapshot session or a test builds a heap,
//! uses it and drops it as a whole.

use object::{
    Array, Bigint, Class, ClassId, ExternalFinalizer, GrowableObjectArray,
    Header, HeaderFlags, Mint, Object, ObjectId, StrRef, TypedData,
    TypedDataKind, Value, Variant, bigint, string_object,
};

use crate::{EdgesMut, ObjectStore, Visitable, Visitor};

// ── Heap settings ─────────────────────────────────────────────────────

/// Configuration for the arena heap.
#[derive(Debug, Clone)]
pub struct HeapSettings {
    /// Number of object slots reserved up front.
    pub initial_capacity: usize,
    /// Number of class table entries reserved up front.
    pub initial_classes: usize,
    /// Box 64-bit integers that fit the Smi range as Smis.
    pub narrow_mints: bool,
}

impl Default for HeapSettings {
    fn default() -> Self {
        Self {
            initial_capacity: 4096,
            initial_classes: 256,
            narrow_mints: true,
        }
    }
}

impl HeapSettings {
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.initial_classes < ClassId::NUM_PREDEFINED as usize {
            return Err("initial_classes must cover the predefined class ids");
        }
        Ok(())
    }
}

// ── Roots ─────────────────────────────────────────────────────────────

/// Supplies values that are reachable from outside the heap.
///
/// The visitor receives `&mut Value` so whole-heap passes can redirect
/// roots in place.
pub trait RootProvider {
    fn visit_roots(&mut self, visitor: &mut dyn FnMut(&mut Value));
}

// ── Heap ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct HeapObject {
    pub header: Header,
    pub object: Object,
}

pub struct Heap {
    settings: HeapSettings,
    objects: Vec<HeapObject>,
    /// Class objects indexed by class id; `Null` marks a free id.
    class_table: Vec<Value>,
    libraries: Vec<Value>,
    pub store: ObjectStore,
    /// Objects below this index belong to the base (full) snapshot.
    base_watermark: u32,
    finalizers: Vec<(ObjectId, ExternalFinalizer)>,
}

impl Heap {
    pub fn new(settings: HeapSettings) -> Self {
        if let Err(reason) = settings.validate() {
            panic!("invalid heap settings: {reason}");
        }
        let mut class_table = Vec::with_capacity(settings.initial_classes);
        class_table.resize(ClassId::NUM_PREDEFINED as usize, Value::Null);
        Self {
            objects: Vec::with_capacity(settings.initial_capacity),
            class_table,
            libraries: Vec::new(),
            store: ObjectStore::default(),
            base_watermark: 0,
            finalizers: Vec::new(),
            settings,
        }
    }

    #[inline(always)]
    pub fn settings(&self) -> &HeapSettings {
        &self.settings
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn object_ids(&self) -> impl Iterator<Item = ObjectId> + use<> {
        (0..self.objects.len() as u32).map(ObjectId::new)
    }

    // ── Allocation ────────────────────────────────────────────────────

    pub fn allocate(&mut self, class_id: ClassId, object: impl Into<Object>) -> ObjectId {
        self.allocate_with_flags(class_id, HeaderFlags::empty(), object)
    }

    pub fn allocate_with_flags(
        &mut self,
        class_id: ClassId,
        flags: HeaderFlags,
        object: impl Into<Object>,
    ) -> ObjectId {
        let object = object.into();
        debug_assert_eq!(
            class_id.kind(),
            object.kind(),
            "class id {class_id:?} does not match layout"
        );
        let id = ObjectId::new(self.objects.len() as u32);
        let header = Header::with_flags(class_id, flags);
        if let Object::ExternalTypedData(data) = &object
            && let Some(finalizer) = data.finalizer
        {
            header.add_flag(HeaderFlags::FINALIZABLE);
            self.finalizers.push((id, finalizer));
        }
        self.objects.push(HeapObject { header, object });
        id
    }

    /// Overwrites the body and header of `id`, keeping its identity.
    ///
    /// Used to fill in placeholders allocated before their contents were
    /// known.
    pub fn replace(&mut self, id: ObjectId, header: Header, object: Object) {
        debug_assert_eq!(header.class_id().kind(), object.kind());
        if let Object::ExternalTypedData(data) = &object
            && let Some(finalizer) = data.finalizer
        {
            header.add_flag(HeaderFlags::FINALIZABLE);
            self.finalizers.push((id, finalizer));
        }
        self.objects[id.index()] = HeapObject { header, object };
    }

    // ── Access ────────────────────────────────────────────────────────

    #[inline(always)]
    pub fn header(&self, id: ObjectId) -> &Header {
        &self.objects[id.index()].header
    }

    #[inline(always)]
    pub fn header_mut(&mut self, id: ObjectId) -> &mut Header {
        &mut self.objects[id.index()].header
    }

    #[inline(always)]
    pub fn object(&self, id: ObjectId) -> &Object {
        &self.objects[id.index()].object
    }

    #[inline(always)]
    pub fn object_mut(&mut self, id: ObjectId) -> &mut Object {
        &mut self.objects[id.index()].object
    }

    /// Body behind a slot value; `None` for null and Smis.
    #[inline(always)]
    pub fn object_of(&self, value: Value) -> Option<&Object> {
        value.as_object().map(|id| self.object(id))
    }

    #[inline(always)]
    pub fn get<T: Variant>(&self, id: ObjectId) -> Option<&T> {
        T::from_object(self.object(id))
    }

    #[inline(always)]
    pub fn get_mut<T: Variant>(&mut self, id: ObjectId) -> Option<&mut T> {
        T::from_object_mut(self.object_mut(id))
    }

    /// Like [`Heap::get`] but starting from a slot value.
    #[inline(always)]
    pub fn get_value<T: Variant>(&self, value: Value) -> Option<&T> {
        value.as_object().and_then(|id| self.get(id))
    }

    pub fn class_id_of(&self, value: Value) -> ClassId {
        match value {
            Value::Null => ClassId::NULL,
            Value::Smi(_) => ClassId::SMI,
            Value::Object(id) => self.header(id).class_id(),
        }
    }

    /// Null and Smis are canonical by construction.
    pub fn is_canonical(&self, value: Value) -> bool {
        match value {
            Value::Object(id) => self.header(id).is_canonical(),
            _ => true,
        }
    }

    pub fn set_canonical(&self, id: ObjectId) {
        self.header(id).add_flag(HeaderFlags::CANONICAL);
    }

    // ── Class table ───────────────────────────────────────────────────

    #[inline(always)]
    pub fn num_classes(&self) -> usize {
        self.class_table.len()
    }

    pub fn class_at(&self, class_id: ClassId) -> Value {
        self.class_table
            .get(class_id.index())
            .copied()
            .unwrap_or(Value::Null)
    }

    pub fn class(&self, class_id: ClassId) -> Option<&Class> {
        self.get_value(self.class_at(class_id))
    }

    pub fn class_mut(&mut self, class_id: ClassId) -> Option<&mut Class> {
        let id = self.class_at(class_id).as_object()?;
        self.get_mut(id)
    }

    /// Next free program class id.
    pub fn allocate_class_id(&self) -> ClassId {
        ClassId(self.class_table.len().max(ClassId::NUM_PREDEFINED as usize) as u32)
    }

    /// Enters an allocated class object into the class table under the id
    /// stored in the class itself.
    pub fn register_class(&mut self, class: ObjectId) {
        let Some(class_id) = self.get::<Class>(class).map(|c| c.id) else {
            panic!("register_class: {class:?} is not a class");
        };
        self.set_class_at(class_id, class.into());
    }

    pub fn set_class_at(&mut self, class_id: ClassId, class: Value) {
        if class_id.index() >= self.class_table.len() {
            self.class_table.resize(class_id.index() + 1, Value::Null);
        }
        self.class_table[class_id.index()] = class;
    }

    pub fn class_ids(&self) -> impl Iterator<Item = ClassId> + '_ {
        self.class_table
            .iter()
            .enumerate()
            .filter(|(_, class)| !class.is_null())
            .map(|(index, _)| ClassId(index as u32))
    }

    /// Replaces the whole class table; used by class-id renumbering.
    pub fn set_class_table(&mut self, table: Vec<Value>) {
        self.class_table = table;
    }

    // ── Libraries ─────────────────────────────────────────────────────

    pub fn libraries(&self) -> &[Value] {
        &self.libraries
    }

    pub fn add_library(&mut self, library: ObjectId) {
        self.libraries.push(library.into());
    }

    // ── Base snapshot boundary ────────────────────────────────────────

    /// Everything allocated so far becomes part of the base snapshot.
    pub fn mark_base(&mut self) {
        self.base_watermark = self.objects.len() as u32;
        log::debug!("heap base watermark at {}", self.base_watermark);
    }

    #[inline(always)]
    pub fn is_base(&self, id: ObjectId) -> bool {
        id.raw() < self.base_watermark
    }

    // ── Edges ─────────────────────────────────────────────────────────

    pub fn visit_edges(&self, id: ObjectId, visitor: &mut impl Visitor) {
        self.object(id).visit_edges(visitor);
    }

    pub fn visit_edges_mut(&mut self, id: ObjectId, visitor: &mut impl Visitor) {
        self.object_mut(id).visit_edges_mut(visitor);
    }

    /// Rewrites every slot of every object and every root.
    pub fn redirect_all(&mut self, mut redirect: impl FnMut(&mut Value)) {
        for object in &mut self.objects {
            object.object.visit_edges_mut(&mut EdgesMut(&mut redirect));
        }
        self.visit_roots(&mut |slot| redirect(slot));
    }

    /// Runs registered external finalizers for objects at or above
    /// `watermark` and forgets them.
    pub fn run_finalizers_from(&mut self, watermark: u32) {
        let objects = &self.objects;
        self.finalizers.retain(|(id, finalizer)| {
            if id.raw() < watermark {
                return true;
            }
            if let Object::ExternalTypedData(data) = &objects[id.index()].object {
                finalizer(&data.data);
            }
            false
        });
    }

    // ── Strings ───────────────────────────────────────────────────────

    pub fn new_string(&mut self, text: &str) -> ObjectId {
        let (class_id, object) = string_object(text);
        self.allocate(class_id, object)
    }

    pub fn str_ref(&self, value: Value) -> Option<StrRef<'_>> {
        self.object(value.as_object()?).as_str_ref()
    }

    pub fn string_value(&self, value: Value) -> Option<String> {
        self.str_ref(value).map(StrRef::to_string_lossy)
    }

    // ── Numbers ───────────────────────────────────────────────────────

    /// A Smi when the value fits (and narrowing is on), a Mint otherwise.
    pub fn new_integer(&mut self, value: i64) -> Value {
        if self.settings.narrow_mints
            && let Some(smi) = Value::smi(value)
        {
            return smi;
        }
        self.allocate(ClassId::MINT, Mint { value }).into()
    }

    pub fn integer_value(&self, value: Value) -> Option<i64> {
        match value {
            Value::Smi(v) => Some(v),
            Value::Object(_) => self.get_value::<Mint>(value).map(|m| m.value),
            Value::Null => None,
        }
    }

    pub fn new_bigint(&mut self, negative: bool, digits: &[u32]) -> ObjectId {
        let used = bigint::normalize_len(digits);
        let storage = self.allocate(
            ClassId::typed_data(TypedDataKind::Uint32),
            TypedData::from_u32s(&digits[..used]),
        );
        self.allocate(
            ClassId::BIGINT,
            Bigint {
                negative: negative && used > 0,
                used: used as u32,
                digits: storage.into(),
            },
        )
    }

    /// Sign and significant digits of a Bigint.
    pub fn bigint_digits(&self, value: Value) -> Option<(bool, Vec<u32>)> {
        let big = self.get_value::<Bigint>(value)?;
        let storage = self.get_value::<TypedData>(big.digits);
        let digits = (0..big.used as usize)
            .map(|i| storage.map_or(0, |s| s.u32_at(i)))
            .collect();
        Some((big.negative, digits))
    }

    pub fn bigint_to_decimal(&self, value: Value) -> Option<String> {
        let (negative, digits) = self.bigint_digits(value)?;
        Some(bigint::to_decimal(negative, &digits))
    }

    // ── Collections ───────────────────────────────────────────────────

    pub fn new_array(&mut self, elements: Vec<Value>) -> ObjectId {
        self.allocate(
            ClassId::ARRAY,
            Array {
                type_arguments: Value::Null,
                elements,
            },
        )
    }

    pub fn new_immutable_array(&mut self, elements: Vec<Value>) -> ObjectId {
        self.allocate_with_flags(
            ClassId::IMMUTABLE_ARRAY,
            HeaderFlags::IMMUTABLE,
            Array {
                type_arguments: Value::Null,
                elements,
            },
        )
    }

    /// Growable array with `capacity` slots in its backing store.
    pub fn new_growable(&mut self, elements: Vec<Value>, capacity: usize) -> ObjectId {
        let length = elements.len();
        let mut backing = elements;
        backing.resize(capacity.max(length), Value::Null);
        let data = self.new_array(backing);
        self.allocate(
            ClassId::GROWABLE_OBJECT_ARRAY,
            GrowableObjectArray {
                type_arguments: Value::Null,
                length,
                data: data.into(),
            },
        )
    }

    /// Live elements of a growable array.
    pub fn growable_elements(&self, value: Value) -> Option<&[Value]> {
        let growable = self.get_value::<GrowableObjectArray>(value)?;
        let backing = self.get_value::<Array>(growable.data)?;
        backing.elements.get(..growable.length)
    }
}

impl RootProvider for Heap {
    fn visit_roots(&mut self, visitor: &mut dyn FnMut(&mut Value)) {
        for root in self.store.roots_mut() {
            visitor(root);
        }
        for class in &mut self.class_table {
            visitor(class);
        }
        for library in &mut self.libraries {
            visitor(library);
        }
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        self.run_finalizers_from(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object::{ExternalTypedData, Type};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn allocate_and_read_back() {
        let mut heap = Heap::new(HeapSettings::default());
        let id = heap.allocate(ClassId::MINT, Mint { value: 1 << 62 });
        assert_eq!(heap.class_id_of(id.into()), ClassId::MINT);
        assert_eq!(heap.get::<Mint>(id).map(|m| m.value), Some(1 << 62));
        assert!(heap.get::<Type>(id).is_none());
        assert_eq!(heap.class_id_of(Value::Null), ClassId::NULL);
        assert_eq!(heap.class_id_of(Value::Smi(3)), ClassId::SMI);
    }

    #[test]
    fn integers_narrow_to_smi() {
        let mut heap = Heap::new(HeapSettings::default());
        assert_eq!(heap.new_integer(42), Value::Smi(42));
        let boxed = heap.new_integer(i64::MAX);
        assert!(boxed.is_object());
        assert_eq!(heap.integer_value(boxed), Some(i64::MAX));

        let mut wide = Heap::new(HeapSettings {
            narrow_mints: false,
            ..Default::default()
        });
        assert!(wide.new_integer(42).is_object());
    }

    #[test]
    fn bigint_storage_round_trip() {
        let mut heap = Heap::new(HeapSettings::default());
        let (negative, digits) = bigint::parse("-12345678901234567890").unwrap();
        let big = heap.new_bigint(negative, &digits);
        assert_eq!(
            heap.bigint_to_decimal(big.into()).as_deref(),
            Some("-12345678901234567890")
        );
    }

    #[test]
    fn growable_array_exposes_live_prefix() {
        let mut heap = Heap::new(HeapSettings::default());
        let g = heap.new_growable(vec![Value::Smi(1), Value::Smi(2)], 8);
        assert_eq!(
            heap.growable_elements(g.into()),
            Some(&[Value::Smi(1), Value::Smi(2)][..])
        );
    }

    #[test]
    fn base_watermark_splits_heap() {
        let mut heap = Heap::new(HeapSettings::default());
        let old = heap.new_string("old");
        heap.mark_base();
        let new = heap.new_string("new");
        assert!(heap.is_base(old));
        assert!(!heap.is_base(new));
        assert_eq!(heap.string_value(new.into()).as_deref(), Some("new"));
    }

    #[test]
    fn class_table_grows_on_registration() {
        let mut heap = Heap::new(HeapSettings::default());
        let class_id = heap.allocate_class_id();
        assert_eq!(class_id.0, ClassId::NUM_PREDEFINED);
        let class = heap.allocate(
            ClassId::CLASS,
            Class {
                id: class_id,
                ..Default::default()
            },
        );
        heap.register_class(class);
        assert_eq!(heap.class_at(class_id), Value::Object(class));
        assert_eq!(heap.allocate_class_id().0, class_id.0 + 1);
        assert!(heap.class_ids().any(|cid| cid == class_id));
    }

    static FINALIZED: AtomicUsize = AtomicUsize::new(0);

    fn count_bytes(bytes: &[u8]) {
        FINALIZED.fetch_add(bytes.len(), Ordering::SeqCst);
    }

    #[test]
    fn external_data_finalizer_runs_on_drop() {
        let mut heap = Heap::new(HeapSettings::default());
        let id = heap.allocate(
            ClassId::external_typed_data(TypedDataKind::Uint8),
            ExternalTypedData {
                kind: TypedDataKind::Uint8,
                data: vec![1, 2, 3],
                finalizer: Some(count_bytes),
            },
        );
        assert!(heap.header(id).has_flag(HeaderFlags::FINALIZABLE));
        drop(heap);
        assert_eq!(FINALIZED.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn redirect_all_rewrites_objects_and_roots() {
        let mut heap = Heap::new(HeapSettings::default());
        let a = heap.new_string("a");
        let b = heap.new_string("b");
        let array = heap.new_array(vec![a.into(), a.into()]);
        heap.store.true_value = a.into();
        heap.redirect_all(|slot| {
            if *slot == Value::Object(a) {
                *slot = b.into();
            }
        });
        let elements = &heap.get::<Array>(array).unwrap().elements;
        assert_eq!(elements, &vec![Value::Object(b); 2]);
        assert_eq!(heap.store.true_value, Value::Object(b));
    }
}
