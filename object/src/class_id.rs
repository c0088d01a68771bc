/// Index into the class table.
///
/// Ids below [`ClassId::NUM_PREDEFINED`] are fixed at bootstrap and name the
/// VM's own object kinds; everything above is a program class whose
/// instances are plain [`Instance`](crate::Instance)s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[repr(transparent)]
pub struct ClassId(pub u32);

impl ClassId {
    pub const ILLEGAL: Self = Self(0);

    // ── Type system and program structure ──────────────────────────
    pub const CLASS: Self = Self(1);
    pub const TYPE: Self = Self(2);
    pub const TYPE_REF: Self = Self(3);
    pub const TYPE_PARAMETER: Self = Self(4);
    pub const TYPE_ARGUMENTS: Self = Self(5);
    pub const FUNCTION: Self = Self(6);
    pub const FIELD: Self = Self(7);
    pub const SCRIPT: Self = Self(8);
    pub const LIBRARY: Self = Self(9);
    pub const CLOSURE_DATA: Self = Self(10);
    pub const CONTEXT: Self = Self(11);
    pub const CLOSURE: Self = Self(12);

    // ── Execution-only artifacts ───────────────────────────────────
    pub const CODE: Self = Self(13);
    pub const INSTRUCTIONS: Self = Self(14);
    pub const IC_DATA: Self = Self(15);
    pub const STACK_MAP: Self = Self(16);

    // ── Collections ────────────────────────────────────────────────
    pub const ARRAY: Self = Self(17);
    pub const IMMUTABLE_ARRAY: Self = Self(18);
    pub const GROWABLE_OBJECT_ARRAY: Self = Self(19);
    pub const LINKED_HASH_MAP: Self = Self(20);

    // ── Numbers, booleans, strings ─────────────────────────────────
    pub const SMI: Self = Self(21);
    pub const MINT: Self = Self(22);
    pub const DOUBLE: Self = Self(23);
    pub const BIGINT: Self = Self(24);
    pub const BOOL: Self = Self(25);
    pub const ONE_BYTE_STRING: Self = Self(26);
    pub const TWO_BYTE_STRING: Self = Self(27);
    pub const FOUR_BYTE_STRING: Self = Self(28);

    // ── Native resources ───────────────────────────────────────────
    pub const SEND_PORT: Self = Self(29);
    pub const RECEIVE_PORT: Self = Self(30);
    pub const MIRROR_REFERENCE: Self = Self(31);
    pub const USER_TAG: Self = Self(32);

    // ── Typed data, one id per element kind ────────────────────────
    pub const TYPED_DATA_INT8: Self = Self(33);
    pub const EXTERNAL_TYPED_DATA_INT8: Self =
        Self(Self::TYPED_DATA_INT8.0 + TypedDataKind::COUNT);

    // ── Core classes without a VM-specific layout ──────────────────
    pub const OBJECT: Self =
        Self(Self::EXTERNAL_TYPED_DATA_INT8.0 + TypedDataKind::COUNT);
    pub const NULL: Self = Self(Self::OBJECT.0 + 1);
    pub const DYNAMIC: Self = Self(Self::OBJECT.0 + 2);
    pub const VOID: Self = Self(Self::OBJECT.0 + 3);
    pub const NUMBER: Self = Self(Self::OBJECT.0 + 4);
    pub const INTEGER: Self = Self(Self::OBJECT.0 + 5);
    pub const STRING: Self = Self(Self::OBJECT.0 + 6);

    pub const NUM_PREDEFINED: u32 = Self::STRING.0 + 1;

    #[inline(always)]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    #[inline(always)]
    pub const fn is_predefined(self) -> bool {
        self.0 < Self::NUM_PREDEFINED
    }

    pub fn typed_data(kind: TypedDataKind) -> Self {
        Self(Self::TYPED_DATA_INT8.0 + kind as u32)
    }

    pub fn external_typed_data(kind: TypedDataKind) -> Self {
        Self(Self::EXTERNAL_TYPED_DATA_INT8.0 + kind as u32)
    }

    /// Element kind of an internal typed-data class.
    pub fn typed_data_kind(self) -> Option<TypedDataKind> {
        let start = Self::TYPED_DATA_INT8.0;
        if (start..start + TypedDataKind::COUNT).contains(&self.0) {
            TypedDataKind::from_index(self.0 - start)
        } else {
            None
        }
    }

    /// Element kind of an external typed-data class.
    pub fn external_typed_data_kind(self) -> Option<TypedDataKind> {
        let start = Self::EXTERNAL_TYPED_DATA_INT8.0;
        if (start..start + TypedDataKind::COUNT).contains(&self.0) {
            TypedDataKind::from_index(self.0 - start)
        } else {
            None
        }
    }

    pub fn is_string(self) -> bool {
        matches!(
            self,
            Self::ONE_BYTE_STRING | Self::TWO_BYTE_STRING | Self::FOUR_BYTE_STRING
        )
    }

    pub fn is_array(self) -> bool {
        matches!(self, Self::ARRAY | Self::IMMUTABLE_ARRAY)
    }

    /// Layout of objects carrying this class id.
    pub fn kind(self) -> ObjectKind {
        match self {
            Self::CLASS => ObjectKind::Class,
            Self::TYPE => ObjectKind::Type,
            Self::TYPE_REF => ObjectKind::TypeRef,
            Self::TYPE_PARAMETER => ObjectKind::TypeParameter,
            Self::TYPE_ARGUMENTS => ObjectKind::TypeArguments,
            Self::FUNCTION => ObjectKind::Function,
            Self::FIELD => ObjectKind::Field,
            Self::SCRIPT => ObjectKind::Script,
            Self::LIBRARY => ObjectKind::Library,
            Self::CLOSURE_DATA => ObjectKind::ClosureData,
            Self::CONTEXT => ObjectKind::Context,
            Self::CLOSURE => ObjectKind::Closure,
            Self::CODE => ObjectKind::Code,
            Self::INSTRUCTIONS => ObjectKind::Instructions,
            Self::IC_DATA => ObjectKind::ICData,
            Self::STACK_MAP => ObjectKind::StackMap,
            Self::ARRAY | Self::IMMUTABLE_ARRAY => ObjectKind::Array,
            Self::GROWABLE_OBJECT_ARRAY => ObjectKind::GrowableObjectArray,
            Self::LINKED_HASH_MAP => ObjectKind::LinkedHashMap,
            Self::MINT => ObjectKind::Mint,
            Self::DOUBLE => ObjectKind::Double,
            Self::BIGINT => ObjectKind::Bigint,
            Self::BOOL => ObjectKind::Bool,
            Self::ONE_BYTE_STRING => ObjectKind::OneByteString,
            Self::TWO_BYTE_STRING => ObjectKind::TwoByteString,
            Self::FOUR_BYTE_STRING => ObjectKind::FourByteString,
            Self::SEND_PORT => ObjectKind::SendPort,
            Self::RECEIVE_PORT => ObjectKind::ReceivePort,
            Self::MIRROR_REFERENCE => ObjectKind::MirrorReference,
            Self::USER_TAG => ObjectKind::UserTag,
            cid if cid.typed_data_kind().is_some() => ObjectKind::TypedData,
            cid if cid.external_typed_data_kind().is_some() => {
                ObjectKind::ExternalTypedData
            }
            _ => ObjectKind::Instance,
        }
    }
}

/// Physical layout of a heap object.
///
/// Several class ids may share a layout (both array ids, all typed data
/// ids, every program class).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Class,
    Type,
    TypeRef,
    TypeParameter,
    TypeArguments,
    Function,
    Field,
    Script,
    Library,
    ClosureData,
    Context,
    Closure,
    Code,
    Instructions,
    ICData,
    StackMap,
    Array,
    GrowableObjectArray,
    LinkedHashMap,
    Mint,
    Double,
    Bigint,
    Bool,
    OneByteString,
    TwoByteString,
    FourByteString,
    SendPort,
    ReceivePort,
    MirrorReference,
    UserTag,
    TypedData,
    ExternalTypedData,
    Instance,
}

impl ObjectKind {
    /// Compiled code and friends are regenerated on load, never persisted.
    pub const fn is_execution_only(self) -> bool {
        matches!(
            self,
            Self::Code | Self::Instructions | Self::ICData | Self::StackMap
        )
    }

    /// Kinds wrapping process-local resources; they cannot cross isolates.
    pub const fn is_native_resource(self) -> bool {
        matches!(
            self,
            Self::SendPort
                | Self::ReceivePort
                | Self::MirrorReference
                | Self::UserTag
        )
    }
}

/// Element type of a typed-data object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TypedDataKind {
    Int8 = 0,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Float32,
    Float64,
}

impl TypedDataKind {
    pub const COUNT: u32 = Self::Float64 as u32 + 1;

    pub const fn element_size(self) -> usize {
        match self {
            Self::Int8 | Self::Uint8 => 1,
            Self::Int16 | Self::Uint16 => 2,
            Self::Int32 | Self::Uint32 | Self::Float32 => 4,
            Self::Int64 | Self::Uint64 | Self::Float64 => 8,
        }
    }

    pub const fn from_index(index: u32) -> Option<Self> {
        Some(match index {
            0 => Self::Int8,
            1 => Self::Uint8,
            2 => Self::Int16,
            3 => Self::Uint16,
            4 => Self::Int32,
            5 => Self::Uint32,
            6 => Self::Int64,
            7 => Self::Uint64,
            8 => Self::Float32,
            9 => Self::Float64,
            _ => return None,
        })
    }
}
