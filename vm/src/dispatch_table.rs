//! Compressed encoding of the global dispatch table.
//!
//! The table is a long array of code entry points with heavy repetition.
//! Each entry is one `i32` code:
//!
//! ```text
//! 0          empty entry
//! 1..=63     repeat the previous entry that many more times
//! !r         entry point in recency slot r (0..64)
//! 64 + i     entry point of code object i; also enters the recency cache
//! ```
//!
//! The recency cache is a 64-slot ring filled in code order, so reader and
//! writer keep identical caches without transmitting them.

use heap::Heap;
use object::{Code, Value};
use rustc_hash::FxHashMap;

use crate::snapshot::{ReadStream, SnapshotError, SnapshotResult, WriteStream};

const RECENT_COUNT: usize = 64;
const RECENT_MASK: usize = RECENT_COUNT - 1;
const MAX_REPEAT: u32 = 63;
const INDEX_BASE: i32 = 64;
const EMPTY: i32 = 0;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DispatchTable {
    /// Entry points; `0` marks an empty entry.
    pub entries: Vec<usize>,
}

/// Ring of the most recently introduced entry points.
struct RecentCache {
    slots: [usize; RECENT_COUNT],
    next: usize,
}

impl RecentCache {
    fn new() -> Self {
        Self {
            slots: [0; RECENT_COUNT],
            next: 0,
        }
    }

    fn push(&mut self, entry: usize) {
        self.slots[self.next] = entry;
        self.next = (self.next + 1) & RECENT_MASK;
    }

    fn position(&self, entry: usize) -> Option<usize> {
        self.slots.iter().position(|slot| *slot == entry)
    }
}

/// Entry points of `codes`, in order. Anything that is not a code object
/// contributes an empty entry point.
pub fn entry_points(heap: &Heap, codes: &[Value]) -> Vec<usize> {
    codes
        .iter()
        .map(|code| heap.get_value::<Code>(*code).map_or(0, |c| c.entry_point))
        .collect()
}

impl DispatchTable {
    pub fn new(entries: Vec<usize>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Encodes the table against `code_entry_points`, the entry points of
    /// the code array that travels with the snapshot. Every non-empty
    /// entry must appear there.
    pub fn serialize(&self, code_entry_points: &[usize]) -> SnapshotResult<Vec<u8>> {
        let mut stream = WriteStream::new();
        stream.write_len(self.entries.len());

        let mut code_index = FxHashMap::default();
        for (index, entry) in code_entry_points.iter().enumerate() {
            code_index.entry(*entry).or_insert(index);
        }

        let mut recent = RecentCache::new();
        let mut previous = None;
        let mut repeat = 0u32;
        for &entry in &self.entries {
            if previous == Some(entry) {
                repeat += 1;
                if repeat == MAX_REPEAT {
                    stream.write_i32(MAX_REPEAT as i32);
                    repeat = 0;
                }
                continue;
            }
            if repeat > 0 {
                stream.write_i32(repeat as i32);
                repeat = 0;
            }
            previous = Some(entry);

            if entry == 0 {
                stream.write_i32(EMPTY);
            } else if let Some(slot) = recent.position(entry) {
                stream.write_i32(!(slot as i32));
            } else {
                let index = *code_index.get(&entry).ok_or_else(|| {
                    SnapshotError::UnresolvedReference(format!("entry point {entry:#x}"))
                })?;
                stream.write_i32(INDEX_BASE + index as i32);
                recent.push(entry);
            }
        }
        if repeat > 0 {
            stream.write_i32(repeat as i32);
        }

        let bytes = stream.into_bytes();
        log::debug!(
            "dispatch table: {} entries in {} bytes",
            self.entries.len(),
            bytes.len()
        );
        Ok(bytes)
    }

    /// Decodes a table written by [`DispatchTable::serialize`]; a zero
    /// length means there is no table.
    pub fn deserialize(bytes: &[u8], code_entry_points: &[usize]) -> SnapshotResult<Option<Self>> {
        let mut stream = ReadStream::new(bytes);
        let length = stream.read_u32()? as usize;
        if length == 0 {
            return Ok(None);
        }

        let mut entries = Vec::with_capacity(length.min(bytes.len()));
        let mut recent = RecentCache::new();
        let mut previous = None;
        while entries.len() < length {
            let position = stream.position();
            let code = stream.read_i32()?;
            let invalid = SnapshotError::InvalidDispatchCode { position, code };
            let entry = match code {
                EMPTY => 0,
                1..INDEX_BASE => {
                    let Some(previous) = previous else {
                        return Err(invalid);
                    };
                    let count = code as usize;
                    if entries.len() + count > length {
                        return Err(invalid);
                    }
                    entries.resize(entries.len() + count, previous);
                    continue;
                }
                INDEX_BASE.. => {
                    let entry = *code_entry_points
                        .get((code - INDEX_BASE) as usize)
                        .ok_or(invalid)?;
                    recent.push(entry);
                    entry
                }
                _ => {
                    let slot = !code as usize;
                    if slot >= RECENT_COUNT {
                        return Err(invalid);
                    }
                    recent.slots[slot]
                }
            };
            entries.push(entry);
            previous = Some(entry);
        }
        Ok(Some(Self { entries }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn codes(bytes: &[u8]) -> Vec<i32> {
        bytes[4..]
            .chunks_exact(4)
            .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    #[test]
    fn runs_recent_hits_and_empties_use_short_codes() {
        let code = [0x1000, 0x2000, 0x3000];
        let table = DispatchTable::new(vec![0x1000, 0x1000, 0x1000, 0, 0x2000, 0x1000, 0, 0]);
        let bytes = table.serialize(&code).unwrap();
        assert_eq!(&bytes[..4], &8u32.to_le_bytes());
        assert_eq!(codes(&bytes), vec![64, 2, 0, 65, !0, 0, 1]);
        assert_eq!(DispatchTable::deserialize(&bytes, &code).unwrap(), Some(table));
    }

    #[test]
    fn long_runs_split_at_the_repeat_limit() {
        let code = [0x10];
        let table = DispatchTable::new(vec![0x10; 1 + 63 + 5]);
        let bytes = table.serialize(&code).unwrap();
        assert_eq!(codes(&bytes), vec![64, 63, 5]);
        assert_eq!(DispatchTable::deserialize(&bytes, &code).unwrap(), Some(table));
    }

    #[test]
    fn empty_table_is_absent() {
        let bytes = DispatchTable::default().serialize(&[]).unwrap();
        assert_eq!(bytes, vec![0, 0, 0, 0]);
        assert_eq!(DispatchTable::deserialize(&bytes, &[]).unwrap(), None);
    }

    #[test]
    fn unknown_entry_point_is_rejected() {
        let table = DispatchTable::new(vec![0x42]);
        assert!(matches!(
            table.serialize(&[0x10]),
            Err(SnapshotError::UnresolvedReference(_))
        ));
    }

    #[test]
    fn repeat_without_previous_entry_is_rejected() {
        let mut stream = WriteStream::new();
        stream.write_u32(3);
        stream.write_i32(2);
        let bytes = stream.into_bytes();
        assert!(matches!(
            DispatchTable::deserialize(&bytes, &[]),
            Err(SnapshotError::InvalidDispatchCode { code: 2, .. })
        ));
    }

    #[test]
    fn evicted_entries_fall_back_to_code_indices() {
        // 65 distinct entry points push the first one out of the cache.
        let code: Vec<usize> = (1..=65).map(|i| i * 0x10).collect();
        let mut entries = code.clone();
        entries.push(code[0]);
        entries.push(code[1]);
        let table = DispatchTable::new(entries);
        let bytes = table.serialize(&code).unwrap();
        let written = codes(&bytes);
        // The 65th entry took slot 0 and the first entry, written again
        // by index, takes slot 1 from the second.
        assert_eq!(written[64], 64 + 64);
        assert_eq!(written[65], 64);
        assert_eq!(written[66], 65);
        assert_eq!(DispatchTable::deserialize(&bytes, &code).unwrap(), Some(table));
    }

    proptest! {
        #[test]
        fn round_trips(picks in proptest::collection::vec(0usize..12, 0..400)) {
            // Index 0 stands for an empty entry, the rest pick a code.
            let code: Vec<usize> = (1..12).map(|i| 0x4000 + i * 0x40).collect();
            let entries: Vec<usize> = picks
                .iter()
                .map(|p| if *p == 0 { 0 } else { code[p - 1] })
                .collect();
            let table = DispatchTable::new(entries);
            let bytes = table.serialize(&code).unwrap();
            let decoded = DispatchTable::deserialize(&bytes, &code).unwrap();
            if table.is_empty() {
                prop_assert_eq!(decoded, None);
            } else {
                prop_assert_eq!(decoded, Some(table));
            }
        }

        #[test]
        fn long_runs_round_trip(run in 1usize..300, entry in 1usize..4) {
            let code = [0x100, 0x200, 0x300];
            let mut entries = vec![code[entry - 1]; run];
            entries.extend(vec![0; run]);
            let table = DispatchTable::new(entries);
            let bytes = table.serialize(&code).unwrap();
            prop_assert_eq!(DispatchTable::deserialize(&bytes, &code).unwrap(), Some(table));
        }
    }
}
