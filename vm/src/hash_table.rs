//! Open-addressing hash tables over a single contiguous slot array.
//!
//! ```text
//! entry i:  [ key | payload 0 .. payload n-1 | enum index? ]
//! ```
//!
//! The key slot carries the entry state (`Unused`, `Deleted`, `Used`).
//! Probing is linear from `hash & (capacity - 1)`. Tables never fill up:
//! callers keep the load below one through [`HashTable::ensure_load_factor`],
//! so every probe sequence ends at an unused slot.

use std::marker::PhantomData;

use heap::Heap;
use object::Value;

/// Identity and hashing policy for the keys of one kind of table.
pub trait HashTraits {
    const NAME: &'static str;

    /// Structural hash of a stored key.
    fn hash(heap: &Heap, key: Value) -> u32;

    /// Structural equality of two stored keys.
    fn is_match(heap: &Heap, a: Value, b: Value) -> bool;
}

/// Something a table of `T` can be searched with.
pub trait ProbeKey<T: HashTraits> {
    fn hash(&self, heap: &Heap) -> u32;
    fn is_match(&self, heap: &Heap, stored: Value) -> bool;
}

/// A probe key that can be turned into a stored key on first insertion.
pub trait NewKey<T: HashTraits>: ProbeKey<T> {
    fn new_key(&self, heap: &mut Heap) -> Value;
}

impl<T: HashTraits> ProbeKey<T> for Value {
    #[inline]
    fn hash(&self, heap: &Heap) -> u32 {
        T::hash(heap, *self)
    }

    #[inline]
    fn is_match(&self, heap: &Heap, stored: Value) -> bool {
        *self == stored || T::is_match(heap, *self, stored)
    }
}

impl<T: HashTraits> NewKey<T> for Value {
    #[inline]
    fn new_key(&self, _heap: &mut Heap) -> Value {
        *self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Unused,
    Deleted,
    Used(Value),
}

impl Slot {
    #[inline(always)]
    fn value(self) -> Value {
        match self {
            Slot::Used(value) => value,
            _ => Value::Null,
        }
    }
}

/// Outcome of [`HashTable::find_key_or_deleted_or_unused`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    /// The key is stored at this entry.
    Found(usize),
    /// The key is absent; this is where it should go.
    Vacant(usize),
}

/// Band the load factor `(occupied + deleted + 1) / capacity` must stay in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadFactor {
    pub low: f64,
    pub high: f64,
}

impl Default for LoadFactor {
    fn default() -> Self {
        Self { low: 0.0, high: 0.75 }
    }
}

impl LoadFactor {
    #[inline]
    pub fn target(self) -> f64 {
        (self.low + self.high) / 2.0
    }
}

pub struct HashTable<T: HashTraits> {
    data: Box<[Slot]>,
    payload_len: usize,
    enum_index: bool,
    num_occupied: usize,
    num_deleted: usize,
    next_enum_index: i64,
    _traits: PhantomData<T>,
}

impl<T: HashTraits> HashTable<T> {
    /// A table able to hold `num_occupied` keys while keeping at least one
    /// slot unused.
    pub fn new(num_occupied: usize, payload_len: usize, enum_index: bool) -> Self {
        let capacity = (num_occupied + 1).next_power_of_two().max(2);
        Self::with_capacity(capacity, payload_len, enum_index)
    }

    fn with_capacity(capacity: usize, payload_len: usize, enum_index: bool) -> Self {
        debug_assert!(capacity.is_power_of_two());
        let entry_len = 1 + payload_len + enum_index as usize;
        Self {
            data: vec![Slot::Unused; capacity * entry_len].into_boxed_slice(),
            payload_len,
            enum_index,
            num_occupied: 0,
            num_deleted: 0,
            next_enum_index: 0,
            _traits: PhantomData,
        }
    }

    #[inline(always)]
    fn entry_len(&self) -> usize {
        1 + self.payload_len + self.enum_index as usize
    }

    #[inline(always)]
    fn key_slot(&self, entry: usize) -> Slot {
        self.data[entry * self.entry_len()]
    }

    // ── statistics ─────────────────────────────────────────────────

    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.data.len() / self.entry_len()
    }

    #[inline(always)]
    pub fn num_occupied(&self) -> usize {
        self.num_occupied
    }

    #[inline(always)]
    pub fn num_deleted(&self) -> usize {
        self.num_deleted
    }

    #[inline(always)]
    pub fn num_unused(&self) -> usize {
        self.capacity() - self.num_occupied - self.num_deleted
    }

    #[inline(always)]
    pub fn payload_len(&self) -> usize {
        self.payload_len
    }

    // ── entry state ────────────────────────────────────────────────

    #[inline(always)]
    pub fn is_unused(&self, entry: usize) -> bool {
        self.key_slot(entry) == Slot::Unused
    }

    #[inline(always)]
    pub fn is_deleted(&self, entry: usize) -> bool {
        self.key_slot(entry) == Slot::Deleted
    }

    #[inline(always)]
    pub fn is_occupied(&self, entry: usize) -> bool {
        matches!(self.key_slot(entry), Slot::Used(_))
    }

    pub fn get_key(&self, entry: usize) -> Option<Value> {
        match self.key_slot(entry) {
            Slot::Used(key) => Some(key),
            _ => None,
        }
    }

    pub fn get_payload(&self, entry: usize, column: usize) -> Value {
        debug_assert!(column < self.payload_len);
        self.data[entry * self.entry_len() + 1 + column].value()
    }

    pub fn update_payload(&mut self, entry: usize, column: usize, value: Value) {
        debug_assert!(self.is_occupied(entry));
        debug_assert!(column < self.payload_len);
        let index = entry * self.entry_len() + 1 + column;
        self.data[index] = Slot::Used(value);
    }

    /// Insertion sequence number of an entry in an enum-index table.
    pub fn enum_index(&self, entry: usize) -> Option<i64> {
        if !self.enum_index {
            return None;
        }
        let index = entry * self.entry_len() + 1 + self.payload_len;
        self.data[index].value().as_smi()
    }

    // ── probing ────────────────────────────────────────────────────

    /// Entry holding `key`, skipping tombstones and stopping at the first
    /// unused slot.
    pub fn find_key<K: ProbeKey<T> + ?Sized>(&self, heap: &Heap, key: &K) -> Option<usize> {
        let mask = self.capacity() - 1;
        let mut probe = key.hash(heap) as usize & mask;
        loop {
            match self.key_slot(probe) {
                Slot::Unused => return None,
                Slot::Used(stored) if key.is_match(heap, stored) => return Some(probe),
                _ => {}
            }
            probe = (probe + 1) & mask;
        }
    }

    /// Entry holding `key`, or the slot an insertion should use: the first
    /// tombstone on the probe path if there is one, the terminating unused
    /// slot otherwise.
    pub fn find_key_or_deleted_or_unused<K: ProbeKey<T> + ?Sized>(
        &self,
        heap: &Heap,
        key: &K,
    ) -> Probe {
        let mask = self.capacity() - 1;
        let mut probe = key.hash(heap) as usize & mask;
        let mut deleted = None;
        loop {
            match self.key_slot(probe) {
                Slot::Unused => return Probe::Vacant(deleted.unwrap_or(probe)),
                Slot::Deleted => {
                    deleted.get_or_insert(probe);
                }
                Slot::Used(stored) => {
                    if key.is_match(heap, stored) {
                        return Probe::Found(probe);
                    }
                }
            }
            probe = (probe + 1) & mask;
        }
    }

    // ── mutation ───────────────────────────────────────────────────

    /// Occupies a vacant entry with `key`; payload columns start as null.
    pub fn insert_key(&mut self, entry: usize, key: Value) {
        debug_assert!(!self.is_occupied(entry), "entry {entry} already occupied");
        if self.is_deleted(entry) {
            self.num_deleted -= 1;
        }
        self.num_occupied += 1;
        let entry_len = self.entry_len();
        let base = entry * entry_len;
        self.data[base] = Slot::Used(key);
        for column in 0..self.payload_len {
            self.data[base + 1 + column] = Slot::Used(Value::Null);
        }
        if self.enum_index {
            self.data[base + entry_len - 1] = Slot::Used(Value::Smi(self.next_enum_index));
            self.next_enum_index += 1;
        }
    }

    /// Tombstones an occupied entry.
    pub fn delete_entry(&mut self, entry: usize) {
        debug_assert!(self.is_occupied(entry));
        let entry_len = self.entry_len();
        let base = entry * entry_len;
        for slot in &mut self.data[base..base + entry_len] {
            *slot = Slot::Deleted;
        }
        self.num_occupied -= 1;
        self.num_deleted += 1;
    }

    /// Occupied entries in slot order.
    pub fn occupied_entries(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.capacity()).filter(|&entry| self.is_occupied(entry))
    }

    /// Occupied entries in iteration order: insertion order for enum-index
    /// tables, slot order otherwise.
    pub fn ordered_entries(&self) -> Vec<usize> {
        let mut entries: Vec<usize> = self.occupied_entries().collect();
        if self.enum_index {
            entries.sort_by_key(|&entry| self.enum_index(entry).unwrap_or(i64::MAX));
        }
        entries
    }

    // ── load factor ────────────────────────────────────────────────

    /// Rebuilds the table when one more insertion would leave the band,
    /// or when tombstones outnumber live keys. Returns `true` on rebuild.
    pub fn ensure_load_factor(&mut self, heap: &Heap, load: LoadFactor) -> bool {
        let capacity = self.capacity() as f64;
        let current = (self.num_occupied + self.num_deleted + 1) as f64 / capacity;
        let too_many_deleted = self.num_deleted > 0 && self.num_deleted >= self.num_occupied;
        if (load.low..load.high).contains(&current) && !too_many_deleted {
            return false;
        }
        let wanted = ((1 + self.num_occupied) as f64 / load.target()).ceil() as usize;
        let new_capacity = wanted.next_power_of_two().max(2);
        self.rehash(heap, new_capacity);
        true
    }

    /// Rebuilds at `new_capacity`, recopying live entries in iteration
    /// order. Enum indices travel with their entries.
    pub fn rehash(&mut self, heap: &Heap, new_capacity: usize) {
        log::trace!(
            "{}: rehash {} -> {} ({} live, {} deleted)",
            T::NAME,
            self.capacity(),
            new_capacity,
            self.num_occupied,
            self.num_deleted
        );
        let mut rebuilt = Self::with_capacity(new_capacity, self.payload_len, self.enum_index);
        rebuilt.next_enum_index = self.next_enum_index;
        let entry_len = self.entry_len();
        for entry in self.ordered_entries() {
            let key = self.key_slot(entry).value();
            let Probe::Vacant(target) = rebuilt.find_key_or_deleted_or_unused(heap, &key) else {
                // Two live keys matching each other means a hash function
                // drifted; keep the first.
                log::warn!("{}: duplicate live key {:?} dropped on rehash", T::NAME, key);
                continue;
            };
            let (from, to) = (entry * entry_len, target * entry_len);
            rebuilt.data[to..to + entry_len].copy_from_slice(&self.data[from..from + entry_len]);
            rebuilt.num_occupied += 1;
        }
        *self = rebuilt;
    }
}

// ── Set and map wrappers ───────────────────────────────────────────

/// Set of keys; `ORDERED` sets iterate in insertion order.
pub struct HashSet<T: HashTraits, const ORDERED: bool> {
    table: HashTable<T>,
    load: LoadFactor,
}

pub type UnorderedHashSet<T> = HashSet<T, false>;
pub type EnumIndexHashSet<T> = HashSet<T, true>;

impl<T: HashTraits, const ORDERED: bool> HashSet<T, ORDERED> {
    pub fn new(num_occupied: usize) -> Self {
        Self::with_load_factor(num_occupied, LoadFactor::default())
    }

    pub fn with_load_factor(num_occupied: usize, load: LoadFactor) -> Self {
        Self {
            table: HashTable::new(num_occupied, 0, ORDERED),
            load,
        }
    }

    #[inline(always)]
    pub fn table(&self) -> &HashTable<T> {
        &self.table
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.table.num_occupied()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get_or_null<K: ProbeKey<T> + ?Sized>(&self, heap: &Heap, key: &K) -> Value {
        self.table
            .find_key(heap, key)
            .and_then(|entry| self.table.get_key(entry))
            .unwrap_or(Value::Null)
    }

    pub fn contains<K: ProbeKey<T> + ?Sized>(&self, heap: &Heap, key: &K) -> bool {
        self.table.find_key(heap, key).is_some()
    }

    /// Returns the stored key equal to `key`, inserting `key` if absent.
    pub fn insert_or_get(&mut self, heap: &Heap, key: Value) -> Value {
        self.table.ensure_load_factor(heap, self.load);
        match self.table.find_key_or_deleted_or_unused(heap, &key) {
            Probe::Found(entry) => self.table.get_key(entry).unwrap_or(key),
            Probe::Vacant(entry) => {
                self.table.insert_key(entry, key);
                key
            }
        }
    }

    /// Like [`HashSet::insert_or_get`], but materializes the stored key
    /// from the probe only when it is absent.
    pub fn insert_new_or_get<K: NewKey<T> + ?Sized>(&mut self, heap: &mut Heap, key: &K) -> Value {
        self.table.ensure_load_factor(heap, self.load);
        match self.table.find_key_or_deleted_or_unused(heap, key) {
            Probe::Found(entry) => self.table.get_key(entry).unwrap_or(Value::Null),
            Probe::Vacant(entry) => {
                let stored = key.new_key(heap);
                self.table.insert_key(entry, stored);
                stored
            }
        }
    }

    /// Returns `true` if an equal key was already present; in that case
    /// the stored key is replaced by `key`.
    pub fn insert(&mut self, heap: &Heap, key: Value) -> bool {
        self.table.ensure_load_factor(heap, self.load);
        match self.table.find_key_or_deleted_or_unused(heap, &key) {
            Probe::Found(entry) => {
                let base = entry * self.table.entry_len();
                self.table.data[base] = Slot::Used(key);
                true
            }
            Probe::Vacant(entry) => {
                self.table.insert_key(entry, key);
                false
            }
        }
    }

    pub fn remove<K: ProbeKey<T> + ?Sized>(&mut self, heap: &Heap, key: &K) -> bool {
        match self.table.find_key(heap, key) {
            Some(entry) => {
                self.table.delete_entry(entry);
                true
            }
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = Value> + '_ {
        self.table
            .ordered_entries()
            .into_iter()
            .filter_map(|entry| self.table.get_key(entry))
    }

    /// Rebuilds at a capacity fitting the current contents; needed after
    /// the hash of stored keys changed.
    pub fn rehash(&mut self, heap: &Heap) {
        let wanted = ((1 + self.len()) as f64 / self.load.target()).ceil() as usize;
        self.table.rehash(heap, wanted.next_power_of_two().max(2));
    }
}

/// Map from keys to one payload value; `ORDERED` maps iterate in
/// insertion order.
pub struct HashMap<T: HashTraits, const ORDERED: bool> {
    table: HashTable<T>,
    load: LoadFactor,
}

pub type UnorderedHashMap<T> = HashMap<T, false>;
pub type EnumIndexHashMap<T> = HashMap<T, true>;

impl<T: HashTraits, const ORDERED: bool> HashMap<T, ORDERED> {
    pub fn new(num_occupied: usize) -> Self {
        Self::with_load_factor(num_occupied, LoadFactor::default())
    }

    pub fn with_load_factor(num_occupied: usize, load: LoadFactor) -> Self {
        Self {
            table: HashTable::new(num_occupied, 1, ORDERED),
            load,
        }
    }

    #[inline(always)]
    pub fn table(&self) -> &HashTable<T> {
        &self.table
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.table.num_occupied()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Value stored under `key`, or null if absent.
    pub fn get_or_null<K: ProbeKey<T> + ?Sized>(&self, heap: &Heap, key: &K) -> Value {
        self.table
            .find_key(heap, key)
            .map(|entry| self.table.get_payload(entry, 0))
            .unwrap_or(Value::Null)
    }

    pub fn contains<K: ProbeKey<T> + ?Sized>(&self, heap: &Heap, key: &K) -> bool {
        self.table.find_key(heap, key).is_some()
    }

    /// Stores `value` under `key`. Returns `true` if the key was present.
    pub fn insert(&mut self, heap: &Heap, key: Value, value: Value) -> bool {
        self.table.ensure_load_factor(heap, self.load);
        match self.table.find_key_or_deleted_or_unused(heap, &key) {
            Probe::Found(entry) => {
                self.table.update_payload(entry, 0, value);
                true
            }
            Probe::Vacant(entry) => {
                self.table.insert_key(entry, key);
                self.table.update_payload(entry, 0, value);
                false
            }
        }
    }

    /// The value already stored under `key`, or `value` after inserting it.
    pub fn insert_or_get_value(&mut self, heap: &Heap, key: Value, value: Value) -> Value {
        self.table.ensure_load_factor(heap, self.load);
        match self.table.find_key_or_deleted_or_unused(heap, &key) {
            Probe::Found(entry) => self.table.get_payload(entry, 0),
            Probe::Vacant(entry) => {
                self.table.insert_key(entry, key);
                self.table.update_payload(entry, 0, value);
                value
            }
        }
    }

    /// Replaces the value of a present key. Returns `false` (and changes
    /// nothing) if the key is absent.
    pub fn update_value<K: ProbeKey<T> + ?Sized>(&mut self, heap: &Heap, key: &K, value: Value) -> bool {
        match self.table.find_key(heap, key) {
            Some(entry) => {
                self.table.update_payload(entry, 0, value);
                true
            }
            None => false,
        }
    }

    pub fn remove<K: ProbeKey<T> + ?Sized>(&mut self, heap: &Heap, key: &K) -> bool {
        match self.table.find_key(heap, key) {
            Some(entry) => {
                self.table.delete_entry(entry);
                true
            }
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Value, Value)> + '_ {
        self.table.ordered_entries().into_iter().filter_map(|entry| {
            let key = self.table.get_key(entry)?;
            Some((key, self.table.get_payload(entry, 0)))
        })
    }

    pub fn rehash(&mut self, heap: &Heap) {
        let wanted = ((1 + self.len()) as f64 / self.load.target()).ceil() as usize;
        self.table.rehash(heap, wanted.next_power_of_two().max(2));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heap::HeapSettings;
    use proptest::prelude::*;

    /// Keys compared the way map keys are: by content for strings and
    /// numbers.
    struct ValueTraits;

    impl HashTraits for ValueTraits {
        const NAME: &'static str = "values";

        fn hash(heap: &Heap, key: Value) -> u32 {
            heap.key_hash(key)
        }

        fn is_match(heap: &Heap, a: Value, b: Value) -> bool {
            heap.key_equals(a, b)
        }
    }

    fn strings(heap: &mut Heap, texts: &[&str]) -> Vec<Value> {
        texts.iter().map(|t| heap.new_string(t).into()).collect()
    }

    #[test]
    fn six_keys_fit_a_table_sized_for_five() {
        let mut heap = Heap::new(HeapSettings::default());
        let keys = strings(&mut heap, &["a", "b", "c", "d", "e", "f"]);
        let mut table = HashTable::<ValueTraits>::new(5, 0, false);
        assert_eq!(table.capacity(), 8);

        let mut slots = Vec::new();
        for key in &keys {
            let Probe::Vacant(entry) = table.find_key_or_deleted_or_unused(&heap, key) else {
                panic!("{key:?} already present");
            };
            table.insert_key(entry, *key);
            slots.push(entry);
        }
        assert_eq!(table.capacity(), 8);
        assert_eq!(table.num_occupied(), 6);
        for (key, slot) in keys.iter().zip(&slots) {
            assert_eq!(table.find_key(&heap, key), Some(*slot));
        }
        let probe = heap.new_string("d");
        assert_eq!(table.find_key(&heap, &Value::from(probe)), Some(slots[3]));
    }

    #[test]
    fn tombstones_are_reused_first() {
        let heap = Heap::new(HeapSettings::default());
        let mut table = HashTable::<ValueTraits>::new(7, 0, false);
        // Same bucket: hash(Smi(n)) folds to n.
        let (a, b, c) = (Value::Smi(1), Value::Smi(9), Value::Smi(17));
        for key in [a, b] {
            let Probe::Vacant(entry) = table.find_key_or_deleted_or_unused(&heap, &key) else {
                unreachable!()
            };
            table.insert_key(entry, key);
        }
        let a_entry = table.find_key(&heap, &a).unwrap();
        table.delete_entry(a_entry);
        assert_eq!(table.num_deleted(), 1);
        assert_eq!(table.find_key(&heap, &b), Some((a_entry + 1) & 7));

        assert_eq!(table.find_key_or_deleted_or_unused(&heap, &c), Probe::Vacant(a_entry));
        table.insert_key(a_entry, c);
        assert_eq!(table.num_deleted(), 0);
        assert_eq!(table.num_occupied(), 2);
    }

    /// Smis that match whenever they share a bucket of eight.
    struct DriftingTraits;

    impl HashTraits for DriftingTraits {
        const NAME: &'static str = "drifting";

        fn hash(_heap: &Heap, key: Value) -> u32 {
            key.as_smi().map_or(0, |n| n as u32)
        }

        fn is_match(_heap: &Heap, a: Value, b: Value) -> bool {
            matches!((a, b), (Value::Smi(a), Value::Smi(b)) if a % 8 == b % 8)
        }
    }

    #[test]
    fn rehash_keeps_the_first_of_two_matching_keys() {
        let heap = Heap::new(HeapSettings::default());
        let mut table = HashTable::<DriftingTraits>::new(7, 0, false);
        table.insert_key(1, Value::Smi(1));
        table.insert_key(2, Value::Smi(9));
        assert_eq!(table.num_occupied(), 2);

        table.rehash(&heap, 8);
        assert_eq!(table.num_occupied(), 1);
        assert_eq!(table.get_key(1), Some(Value::Smi(1)));
        assert!(table.is_unused(2));
    }

    #[test]
    fn enum_index_map_update_and_lookup() {
        let mut heap = Heap::new(HeapSettings::default());
        let keys = strings(&mut heap, &["a", "A", "AAA", "0"]);
        let (a, upper_a, triple_a, zero) = (keys[0], keys[1], keys[2], keys[3]);
        let mut map = EnumIndexHashMap::<ValueTraits>::new(4);
        assert!(!map.insert(&heap, a, upper_a));
        assert!(map.update_value(&heap, &a, triple_a));
        let found = map.get_or_null(&heap, &a);
        assert_eq!(heap.string_value(found).as_deref(), Some("AAA"));
        assert_eq!(map.get_or_null(&heap, &zero), Value::Null);
        assert!(!map.update_value(&heap, &zero, a));
    }

    #[test]
    fn enum_index_iteration_survives_rehash() {
        let heap = Heap::new(HeapSettings::default());
        let mut set = EnumIndexHashSet::<ValueTraits>::new(1);
        let keys: Vec<Value> = [40, 3, 17, 8, 25, 1, 99, 64, 12].map(Value::Smi).to_vec();
        for key in &keys {
            set.insert_or_get(&heap, *key);
        }
        assert!(set.table().capacity() > 2);
        assert_eq!(set.iter().collect::<Vec<_>>(), keys);

        set.remove(&heap, &Value::Smi(17));
        set.rehash(&heap);
        let expected: Vec<Value> = keys.iter().copied().filter(|k| *k != Value::Smi(17)).collect();
        assert_eq!(set.iter().collect::<Vec<_>>(), expected);
    }

    #[test]
    fn insert_or_get_returns_the_first_equal_key() {
        let mut heap = Heap::new(HeapSettings::default());
        let first = heap.new_string("same");
        let second = heap.new_string("same");
        let mut set = UnorderedHashSet::<ValueTraits>::new(4);
        assert_eq!(set.insert_or_get(&heap, first.into()), Value::from(first));
        assert_eq!(set.insert_or_get(&heap, second.into()), Value::from(first));
        assert_eq!(set.len(), 1);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Insert(i64),
        Remove(i64),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0i64..64).prop_map(Op::Insert),
            (0i64..64).prop_map(Op::Remove),
        ]
    }

    proptest! {
        #[test]
        fn load_factor_stays_below_high_watermark(ops in proptest::collection::vec(op(), 0..200)) {
            let heap = Heap::new(HeapSettings::default());
            let load = LoadFactor::default();
            let mut set = UnorderedHashSet::<ValueTraits>::new(0);
            let mut model = std::collections::BTreeSet::new();
            for op in ops {
                let table = set.table();
                let ratio = (table.num_occupied() + table.num_deleted()) as f64
                    / table.capacity() as f64;
                prop_assert!(ratio < load.high);
                prop_assert!(table.num_unused() > 0);
                match op {
                    Op::Insert(n) => {
                        set.insert(&heap, Value::Smi(n));
                        model.insert(n);
                    }
                    Op::Remove(n) => {
                        prop_assert_eq!(set.remove(&heap, &Value::Smi(n)), model.remove(&n));
                    }
                }
                prop_assert_eq!(set.len(), model.len());
            }
            for n in &model {
                prop_assert!(set.contains(&heap, &Value::Smi(*n)));
            }
        }

        #[test]
        fn rebuild_lands_at_target(occupied in 0usize..300) {
            let heap = Heap::new(HeapSettings::default());
            let load = LoadFactor::default();
            let mut table = HashTable::<ValueTraits>::new(0, 0, false);
            for n in 0..occupied as i64 {
                if table.ensure_load_factor(&heap, load) {
                    let ratio = (table.num_occupied() + 1) as f64 / table.capacity() as f64;
                    prop_assert!(ratio <= load.target());
                    prop_assert!(ratio > load.target() / 4.0);
                }
                let Probe::Vacant(entry) = table.find_key_or_deleted_or_unused(&heap, &Value::Smi(n)) else {
                    unreachable!()
                };
                table.insert_key(entry, Value::Smi(n));
            }
            prop_assert_eq!(table.num_occupied(), occupied);
        }
    }
}
