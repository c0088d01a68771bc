/// Number of payload bits of a small integer.
///
/// Smis keep the 63-bit range a tagged word would give them, even though
/// nothing here is tagged any more.
pub const SMI_BITS: u32 = 62;
pub const SMI_MIN: i64 = -(1i64 << SMI_BITS);
pub const SMI_MAX: i64 = (1i64 << SMI_BITS) - 1;

/// Stable handle of an object living in the arena heap.
///
/// Two handles are the same object iff their indices are equal; the heap
/// never moves or reuses slots.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct ObjectId(u32);

impl ObjectId {
    #[inline(always)]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    #[inline(always)]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    #[inline(always)]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl core::fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Contents of a pointer slot.
///
/// Encoding:
/// - **Null**:   the null object, never heap allocated.
/// - **Smi**:    a small integer in `SMI_MIN..=SMI_MAX`, never heap allocated.
/// - **Object**: a reference to an arena object.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Value {
    #[default]
    Null,
    Smi(i64),
    Object(ObjectId),
}

impl Value {
    /// Returns `true` if `value` can be represented without a heap box.
    #[inline(always)]
    pub const fn fits_smi(value: i64) -> bool {
        value >= SMI_MIN && value <= SMI_MAX
    }

    /// Build a Smi, or `None` if `value` needs a Mint box.
    #[inline(always)]
    pub const fn smi(value: i64) -> Option<Self> {
        if Self::fits_smi(value) {
            Some(Self::Smi(value))
        } else {
            None
        }
    }

    #[inline(always)]
    pub const fn is_null(self) -> bool {
        matches!(self, Self::Null)
    }

    #[inline(always)]
    pub const fn is_smi(self) -> bool {
        matches!(self, Self::Smi(_))
    }

    #[inline(always)]
    pub const fn is_object(self) -> bool {
        matches!(self, Self::Object(_))
    }

    #[inline(always)]
    pub const fn as_smi(self) -> Option<i64> {
        match self {
            Self::Smi(value) => Some(value),
            _ => None,
        }
    }

    #[inline(always)]
    pub const fn as_object(self) -> Option<ObjectId> {
        match self {
            Self::Object(id) => Some(id),
            _ => None,
        }
    }
}

impl From<ObjectId> for Value {
    #[inline(always)]
    fn from(id: ObjectId) -> Self {
        Self::Object(id)
    }
}

impl core::fmt::Debug for Value {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Smi(value) => write!(f, "Smi({value})"),
            Self::Object(id) => write!(f, "Object({id:?})"),
        }
    }
}
