//! Operations on insertion-ordered hash maps.
//!
//! The bucket index of a [`LinkedHashMap`] is pure cache: it is dropped
//! whenever keys may have changed identity and rebuilt on the next lookup.

use object::{ClassId, LinkedHashMap, Object, ObjectId, Value};

use crate::Heap;

const EMPTY_BUCKET: u32 = 0;

impl Heap {
    pub fn new_linked_hash_map(&mut self) -> ObjectId {
        self.allocate(ClassId::LINKED_HASH_MAP, LinkedHashMap::default())
    }

    /// Hash consistent with [`Heap::key_equals`].
    pub fn key_hash(&self, key: Value) -> u32 {
        match key {
            Value::Null => 0,
            Value::Smi(v) => fold64(v as u64),
            Value::Object(id) => match self.object(id) {
                Object::Mint(m) => fold64(m.value as u64),
                Object::Double(d) => fold64(d.value.to_bits()),
                object => object
                    .string_hash()
                    .unwrap_or_else(|| fold64(id.raw() as u64)),
            },
        }
    }

    /// Value equality for numbers and strings, identity for the rest.
    pub fn key_equals(&self, a: Value, b: Value) -> bool {
        if a == b {
            return true;
        }
        let (Value::Object(x), Value::Object(y)) = (a, b) else {
            return false;
        };
        match (self.object(x), self.object(y)) {
            (Object::Mint(m), Object::Mint(n)) => m.value == n.value,
            (Object::Double(m), Object::Double(n)) => {
                m.value.to_bits() == n.value.to_bits()
            }
            (Object::Bigint(_), Object::Bigint(_)) => {
                self.bigint_digits(a) == self.bigint_digits(b)
            }
            (l, r) => match (l.as_str_ref(), r.as_str_ref()) {
                (Some(l), Some(r)) => l.content_eq(r),
                _ => false,
            },
        }
    }

    pub fn map_get(&mut self, map: ObjectId, key: Value) -> Option<Value> {
        let position = self.map_find(map, key)?;
        let entries = &self.get::<LinkedHashMap>(map)?.entries;
        entries[position].map(|(_, value)| value)
    }

    pub fn map_insert(&mut self, map: ObjectId, key: Value, value: Value) {
        if let Some(position) = self.map_find(map, key) {
            if let Some(m) = self.get_mut::<LinkedHashMap>(map) {
                m.entries[position] = Some((key, value));
            }
            return;
        }
        let hash = self.key_hash(key);
        let Some(m) = self.get_mut::<LinkedHashMap>(map) else {
            return;
        };
        m.entries.push(Some((key, value)));
        let position = m.entries.len() as u32;
        let mask = m.hash_mask as usize;
        let live = m.entries.len();
        if !m.index.as_ref().is_some_and(|index| live * 2 <= index.len()) {
            m.index = None;
            return;
        }
        if let Some(index) = &mut m.index {
            let mut bucket = hash as usize & mask;
            while index[bucket] != EMPTY_BUCKET {
                bucket = (bucket + 1) & mask;
            }
            index[bucket] = position;
        }
    }

    pub fn map_remove(&mut self, map: ObjectId, key: Value) -> Option<Value> {
        let position = self.map_find(map, key)?;
        let m = self.get_mut::<LinkedHashMap>(map)?;
        let (_, value) = m.entries[position].take()?;
        m.deleted += 1;
        if m.deleted * 2 > m.entries.len() {
            m.entries.retain(Option::is_some);
            m.deleted = 0;
        }
        m.index = None;
        Some(value)
    }

    /// Live pairs in insertion order.
    pub fn map_pairs(&self, map: ObjectId) -> Vec<(Value, Value)> {
        self.get::<LinkedHashMap>(map)
            .map(|m| m.live_pairs().collect())
            .unwrap_or_default()
    }

    fn map_find(&mut self, map: ObjectId, key: Value) -> Option<usize> {
        self.ensure_map_index(map);
        let m = self.get::<LinkedHashMap>(map)?;
        let index = m.index.as_ref()?;
        let mask = m.hash_mask as usize;
        let mut bucket = self.key_hash(key) as usize & mask;
        loop {
            let slot = index[bucket];
            if slot == EMPTY_BUCKET {
                return None;
            }
            let position = (slot - 1) as usize;
            if let Some((candidate, _)) = m.entries[position]
                && self.key_equals(candidate, key)
            {
                return Some(position);
            }
            bucket = (bucket + 1) & mask;
        }
    }

    fn ensure_map_index(&mut self, map: ObjectId) {
        let Some(m) = self.get::<LinkedHashMap>(map) else {
            return;
        };
        if m.index.is_some() {
            return;
        }
        let capacity = (m.entries.len() * 2).next_power_of_two().max(8);
        let mask = capacity - 1;
        let mut index = vec![EMPTY_BUCKET; capacity].into_boxed_slice();
        for (position, entry) in m.entries.iter().enumerate() {
            let Some((key, _)) = entry else { continue };
            let mut bucket = self.key_hash(*key) as usize & mask;
            while index[bucket] != EMPTY_BUCKET {
                bucket = (bucket + 1) & mask;
            }
            index[bucket] = position as u32 + 1;
        }
        if let Some(m) = self.get_mut::<LinkedHashMap>(map) {
            m.index = Some(index);
            m.hash_mask = mask as u32;
        }
    }
}

#[inline(always)]
fn fold64(bits: u64) -> u32 {
    ((bits >> 32) ^ bits) as u32
}

#[cfg(test)]
mod tests {
    use crate::{Heap, HeapSettings};
    use object::{LinkedHashMap, Value};

    #[test]
    fn insert_get_update_remove() {
        let mut heap = Heap::new(HeapSettings::default());
        let map = heap.new_linked_hash_map();
        let key = heap.new_string("k");
        let same_text = heap.new_string("k");

        heap.map_insert(map, key.into(), Value::Smi(1));
        heap.map_insert(map, Value::Smi(7), Value::Smi(2));
        assert_eq!(heap.map_get(map, same_text.into()), Some(Value::Smi(1)));

        heap.map_insert(map, same_text.into(), Value::Smi(3));
        assert_eq!(heap.map_get(map, key.into()), Some(Value::Smi(3)));
        assert_eq!(heap.map_pairs(map).len(), 2);

        assert_eq!(heap.map_remove(map, Value::Smi(7)), Some(Value::Smi(2)));
        assert_eq!(heap.map_get(map, Value::Smi(7)), None);
        assert_eq!(heap.map_pairs(map).len(), 1);
    }

    #[test]
    fn index_is_rebuilt_after_being_dropped() {
        let mut heap = Heap::new(HeapSettings::default());
        let map = heap.new_linked_hash_map();
        for i in 0..20 {
            heap.map_insert(map, Value::Smi(i), Value::Smi(i * 10));
        }
        assert_eq!(heap.map_get(map, Value::Smi(13)), Some(Value::Smi(130)));
        heap.get_mut::<LinkedHashMap>(map).unwrap().index = None;
        assert_eq!(heap.map_get(map, Value::Smi(19)), Some(Value::Smi(190)));
        let keys: Vec<_> = heap.map_pairs(map).into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, (0..20).map(Value::Smi).collect::<Vec<_>>());
    }
}
