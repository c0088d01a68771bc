use std::sync::atomic::{AtomicU8, Ordering};

use bitflags::bitflags;

use crate::ClassId;

bitflags! {
    /// Bookkeeping bits stored next to the class id.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct HeaderFlags: u8 {
        /// The object is the unique representative of its value.
        const CANONICAL = 1 << 0;
        /// The object may not be mutated after construction.
        const IMMUTABLE = 1 << 1;
        /// The object owns external memory released by a finalizer.
        const FINALIZABLE = 1 << 2;
    }
}

const CLASS_ID_SHIFT: u32 = 8;
const FLAGS_MASK: u32 = 0xff;

/// Class ids must fit the 24 bits above the flags.
pub const MAX_CLASS_ID: u32 = (1 << (32 - CLASS_ID_SHIFT)) - 1;

/// The tags word at the start of every heap object.
///
/// ```text
/// bits 0..8:   flags (Canonical | Immutable | Finalizable)
/// bits 8..32:  class id
/// ```
///
/// The packed form is what travels in a snapshot; in memory the flags are
/// atomic so canonical marking works through a shared heap borrow.
pub struct Header {
    class_id: ClassId,
    flags: AtomicU8,
}

impl Header {
    pub fn new(class_id: ClassId) -> Self {
        Self::with_flags(class_id, HeaderFlags::empty())
    }

    pub fn with_flags(class_id: ClassId, flags: HeaderFlags) -> Self {
        Self {
            class_id,
            flags: AtomicU8::new(flags.bits()),
        }
    }

    /// Decode a packed tags word. Unknown flag bits are dropped.
    pub fn from_tags(tags: u32) -> Self {
        let flags = HeaderFlags::from_bits_truncate((tags & FLAGS_MASK) as u8);
        Self::with_flags(ClassId(tags >> CLASS_ID_SHIFT), flags)
    }

    #[inline(always)]
    pub fn tags(&self) -> u32 {
        debug_assert!(
            self.class_id.0 <= MAX_CLASS_ID,
            "class id {} overflows the tags word",
            self.class_id.0
        );
        (self.class_id.0 << CLASS_ID_SHIFT) | self.flags().bits() as u32
    }

    #[inline(always)]
    pub fn class_id(&self) -> ClassId {
        self.class_id
    }

    /// Rewrites the class id; only class-id renumbering does this.
    #[inline(always)]
    pub fn set_class_id(&mut self, class_id: ClassId) {
        self.class_id = class_id;
    }

    // ── flags ──────────────────────────────────────────────────────

    #[inline(always)]
    pub fn flags(&self) -> HeaderFlags {
        HeaderFlags::from_bits_truncate(self.flags.load(Ordering::Relaxed))
    }

    #[inline(always)]
    pub fn has_flag(&self, flag: HeaderFlags) -> bool {
        self.flags().contains(flag)
    }

    #[inline(always)]
    pub fn add_flag(&self, flag: HeaderFlags) {
        self.flags.fetch_or(flag.bits(), Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn remove_flag(&self, flag: HeaderFlags) {
        self.flags.fetch_and(!flag.bits(), Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn is_canonical(&self) -> bool {
        self.has_flag(HeaderFlags::CANONICAL)
    }
}

impl Clone for Header {
    fn clone(&self) -> Self {
        Self::with_flags(self.class_id, self.flags())
    }
}

impl core::fmt::Debug for Header {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Header")
            .field("class_id", &self.class_id)
            .field("flags", &self.flags())
            .finish()
    }
}
