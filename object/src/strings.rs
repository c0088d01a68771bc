use crate::{ClassId, FourByteString, Object, OneByteString, TwoByteString};

/// Width of the significant hash bits; keeps hashes Smi-sized on every
/// target.
pub const STRING_HASH_BITS: u32 = 30;

#[inline(always)]
pub fn combine_hash(hash: u32, value: u32) -> u32 {
    let mut hash = hash.wrapping_add(value);
    hash = hash.wrapping_add(hash << 10);
    hash ^ (hash >> 6)
}

/// Final avalanche of the one-at-a-time hash. Never returns zero.
#[inline(always)]
pub fn finalize_hash(hash: u32) -> u32 {
    let mut hash = hash.wrapping_add(hash << 3);
    hash ^= hash >> 11;
    hash = hash.wrapping_add(hash << 15);
    hash &= (1 << STRING_HASH_BITS) - 1;
    if hash == 0 { 1 } else { hash }
}

/// Borrowed view of string contents in any physical encoding.
///
/// All widths compare and hash by code point, so the same text stored as
/// one-byte and as two-byte characters is one value.
#[derive(Debug, Clone, Copy)]
pub enum StrRef<'a> {
    Latin1(&'a [u8]),
    Utf16(&'a [u16]),
    /// Little-endian UTF-16 straight out of a byte buffer.
    Utf16Le(&'a [u8]),
    Utf32(&'a [u32]),
}

impl<'a> StrRef<'a> {
    pub fn code_points(self) -> CodePoints<'a> {
        CodePoints {
            source: self,
            position: 0,
        }
    }

    /// Number of storage units (not code points).
    pub fn unit_len(self) -> usize {
        match self {
            Self::Latin1(bytes) => bytes.len(),
            Self::Utf16(units) => units.len(),
            Self::Utf16Le(bytes) => bytes.len() / 2,
            Self::Utf32(points) => points.len(),
        }
    }

    pub fn hash(self) -> u32 {
        finalize_hash(self.code_points().fold(0, combine_hash))
    }

    pub fn content_eq(self, other: StrRef<'_>) -> bool {
        match (self, other) {
            (StrRef::Latin1(a), StrRef::Latin1(b)) => a == b,
            (StrRef::Utf16(a), StrRef::Utf16(b)) => a == b,
            (StrRef::Utf32(a), StrRef::Utf32(b)) => a == b,
            _ => self.code_points().eq(other.code_points()),
        }
    }

    pub fn to_string_lossy(self) -> String {
        self.code_points()
            .map(|cp| char::from_u32(cp).unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect()
    }

    fn utf16_unit(self, index: usize) -> Option<u16> {
        match self {
            Self::Utf16(units) => units.get(index).copied(),
            Self::Utf16Le(bytes) => {
                let lo = *bytes.get(index * 2)?;
                let hi = *bytes.get(index * 2 + 1)?;
                Some(u16::from_le_bytes([lo, hi]))
            }
            _ => None,
        }
    }
}

/// Code point iterator over a [`StrRef`]; unpaired surrogates are yielded
/// as their own unit value.
pub struct CodePoints<'a> {
    source: StrRef<'a>,
    position: usize,
}

impl Iterator for CodePoints<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        match self.source {
            StrRef::Latin1(bytes) => {
                let byte = *bytes.get(self.position)?;
                self.position += 1;
                Some(byte as u32)
            }
            StrRef::Utf32(points) => {
                let point = *points.get(self.position)?;
                self.position += 1;
                Some(point)
            }
            StrRef::Utf16(_) | StrRef::Utf16Le(_) => {
                let unit = self.source.utf16_unit(self.position)?;
                self.position += 1;
                if (0xD800..0xDC00).contains(&unit) {
                    if let Some(low) = self.source.utf16_unit(self.position) {
                        if (0xDC00..0xE000).contains(&low) {
                            self.position += 1;
                            let high = (unit as u32 - 0xD800) << 10;
                            return Some(0x10000 + high + (low as u32 - 0xDC00));
                        }
                    }
                }
                Some(unit as u32)
            }
        }
    }
}

pub fn hash_str(text: &str) -> u32 {
    finalize_hash(text.chars().fold(0, |hash, c| combine_hash(hash, c as u32)))
}

/// Narrowest string layout able to hold `text`, with its hash cached.
pub fn string_object(text: &str) -> (ClassId, Object) {
    if text.chars().all(|c| (c as u32) < 0x100) {
        let string = OneByteString {
            data: text.chars().map(|c| c as u8).collect(),
            ..Default::default()
        };
        string.hash.set(hash_str(text));
        (ClassId::ONE_BYTE_STRING, string.into())
    } else {
        let string = TwoByteString {
            data: text.encode_utf16().collect(),
            ..Default::default()
        };
        string.hash.set(hash_str(text));
        (ClassId::TWO_BYTE_STRING, string.into())
    }
}

impl OneByteString {
    pub fn as_str_ref(&self) -> StrRef<'_> {
        StrRef::Latin1(&self.data)
    }
}

impl TwoByteString {
    pub fn as_str_ref(&self) -> StrRef<'_> {
        StrRef::Utf16(&self.data)
    }
}

impl FourByteString {
    pub fn as_str_ref(&self) -> StrRef<'_> {
        StrRef::Utf32(&self.data)
    }
}

impl Object {
    /// Contents of a string object, or `None` for any other layout.
    pub fn as_str_ref(&self) -> Option<StrRef<'_>> {
        match self {
            Self::OneByteString(s) => Some(s.as_str_ref()),
            Self::TwoByteString(s) => Some(s.as_str_ref()),
            Self::FourByteString(s) => Some(s.as_str_ref()),
            _ => None,
        }
    }

    /// Hash of a string object, computed and cached on first use.
    pub fn string_hash(&self) -> Option<u32> {
        let (cache, view) = match self {
            Self::OneByteString(s) => (&s.hash, s.as_str_ref()),
            Self::TwoByteString(s) => (&s.hash, s.as_str_ref()),
            Self::FourByteString(s) => (&s.hash, s.as_str_ref()),
            _ => return None,
        };
        Some(cache.get().unwrap_or_else(|| cache.set(view.hash())))
    }
}
