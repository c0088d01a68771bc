use std::sync::atomic::{AtomicU32, Ordering};

use bitflags::bitflags;

use crate::{ClassId, ObjectKind, TypedDataKind, Value};

/// Lazily computed structural hash.
///
/// Zero means "not computed yet"; computed hashes are never zero.
#[derive(Default)]
pub struct HashCache(AtomicU32);

impl HashCache {
    #[inline(always)]
    pub fn get(&self) -> Option<u32> {
        match self.0.load(Ordering::Relaxed) {
            0 => None,
            hash => Some(hash),
        }
    }

    #[inline(always)]
    pub fn set(&self, hash: u32) -> u32 {
        let hash = if hash == 0 { 1 } else { hash };
        self.0.store(hash, Ordering::Relaxed);
        hash
    }

    #[inline(always)]
    pub fn clear(&self) {
        self.0.store(0, Ordering::Relaxed);
    }
}

impl Clone for HashCache {
    fn clone(&self) -> Self {
        Self(AtomicU32::new(self.0.load(Ordering::Relaxed)))
    }
}

impl core::fmt::Debug for HashCache {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.get() {
            Some(hash) => write!(f, "{hash:#x}"),
            None => write!(f, "-"),
        }
    }
}

// ── Class ──────────────────────────────────────────────────────────

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ClassFlags: u16 {
        const ABSTRACT = 1 << 0;
        const ENUM = 1 << 1;
        const CONST = 1 << 2;
        /// Some other class lists this one in its `implements` clause.
        const IMPLEMENTED = 1 << 3;
        /// Type parameters, super type and interfaces are finalized.
        const TYPE_FINALIZED = 1 << 4;
        /// Members are finalized and the class is registered with its
        /// super class and interfaces.
        const FINALIZED = 1 << 5;
    }
}

/// A class declaration.
///
/// `num_type_arguments` is the length of the flattened type argument
/// vector (own parameters plus everything contributed by super types) and
/// is computed on first use.
#[derive(Debug, Clone, Default)]
pub struct Class {
    pub id: ClassId,
    pub name: Value,
    pub library: Value,
    pub script: Value,
    pub super_type: Value,
    pub interfaces: Vec<Value>,
    pub type_parameters: Vec<Value>,
    pub fields: Vec<Value>,
    pub functions: Vec<Value>,
    pub direct_subclasses: Vec<Value>,
    pub direct_implementors: Vec<Value>,
    pub declaration_type: Value,
    pub num_type_arguments: Option<u16>,
    pub flags: ClassFlags,
    pub token_pos: i32,
}

impl Class {
    #[inline(always)]
    pub fn num_type_parameters(&self) -> usize {
        self.type_parameters.len()
    }

    #[inline(always)]
    pub fn is_type_finalized(&self) -> bool {
        self.flags.contains(ClassFlags::TYPE_FINALIZED)
    }

    #[inline(always)]
    pub fn is_finalized(&self) -> bool {
        self.flags.contains(ClassFlags::FINALIZED)
    }
}

// ── Types ──────────────────────────────────────────────────────────

/// Finalization progress of a type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum TypeState {
    #[default]
    Allocated = 0,
    BeingFinalized = 1,
    Finalized = 2,
}

impl TypeState {
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Allocated),
            1 => Some(Self::BeingFinalized),
            2 => Some(Self::Finalized),
            _ => None,
        }
    }
}

/// A parameterized interface type, e.g. `Map<int, String>`.
///
/// Before finalization `arguments` holds only the class's own parameters;
/// afterwards it is the full flattened vector, or null for a raw type.
#[derive(Debug, Clone, Default)]
pub struct Type {
    pub type_class_id: ClassId,
    pub arguments: Value,
    pub state: TypeState,
    pub token_pos: i32,
    pub hash: HashCache,
}

/// Indirection used to close cycles in recursive types.
#[derive(Debug, Clone, Default)]
pub struct TypeRef {
    pub target: Value,
}

/// A class type parameter.
///
/// `index` is relative to the declaring class until finalization, then
/// relative to the flattened type argument vector.
#[derive(Debug, Clone, Default)]
pub struct TypeParameter {
    pub parameterized_class_id: ClassId,
    pub index: u16,
    pub name: Value,
    pub bound: Value,
    pub state: TypeState,
    pub token_pos: i32,
    pub hash: HashCache,
}

#[derive(Debug, Clone, Default)]
pub struct TypeArguments {
    pub types: Vec<Value>,
    pub hash: HashCache,
}

// ── Program structure ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum FunctionKind {
    #[default]
    Regular = 0,
    Closure,
    Getter,
    Setter,
    Constructor,
    ImplicitGetter,
    ImplicitSetter,
}

impl FunctionKind {
    pub const fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::Regular,
            1 => Self::Closure,
            2 => Self::Getter,
            3 => Self::Setter,
            4 => Self::Constructor,
            5 => Self::ImplicitGetter,
            6 => Self::ImplicitSetter,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct Function {
    pub name: Value,
    pub owner: Value,
    pub kind: FunctionKind,
    pub is_static: bool,
    pub is_abstract: bool,
    pub result_type: Value,
    pub parameter_types: Vec<Value>,
    pub parameter_names: Vec<Value>,
    pub data: Value,
    /// Compiled code; never persisted.
    pub code: Value,
    pub token_pos: i32,
}

#[derive(Debug, Clone, Default)]
pub struct ClosureData {
    pub parent_function: Value,
    pub signature_type: Value,
    pub implicit_closure: Value,
}

/// Statically known precision of a field's declared generic type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ExactnessState {
    #[default]
    NotTracking = 0,
    /// The declared type is an instantiated generic type, so the runtime
    /// may track whether stored values match it exactly.
    Uninitialized = 1,
}

impl ExactnessState {
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::NotTracking),
            1 => Some(Self::Uninitialized),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Field {
    pub name: Value,
    pub owner: Value,
    pub ty: Value,
    pub is_static: bool,
    pub is_final: bool,
    pub is_const: bool,
    pub static_value: Value,
    pub exactness: ExactnessState,
    pub token_pos: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ScriptKind {
    #[default]
    Library = 0,
    Part,
    Source,
}

impl ScriptKind {
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Library),
            1 => Some(Self::Part),
            2 => Some(Self::Source),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Script {
    pub url: Value,
    pub source: Value,
    pub kind: ScriptKind,
}

#[derive(Debug, Clone, Default)]
pub struct Library {
    pub name: Value,
    pub url: Value,
    pub index: i32,
    pub classes: Vec<Value>,
    pub scripts: Vec<Value>,
    pub imports: Vec<Value>,
    pub is_core: bool,
}

// ── Closures ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct Context {
    pub parent: Value,
    pub variables: Vec<Value>,
}

#[derive(Debug, Clone, Default)]
pub struct Closure {
    pub instantiator_type_arguments: Value,
    pub function: Value,
    pub context: Value,
}

// ── Execution-only artifacts ───────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct Code {
    pub entry_point: usize,
    pub owner: Value,
    pub instructions: Value,
}

#[derive(Debug, Clone, Default)]
pub struct Instructions {
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct ICData {
    pub owner: Value,
    pub target_name: Value,
    pub entries: Vec<Value>,
}

#[derive(Debug, Clone, Default)]
pub struct StackMap {
    pub pc_offset: u32,
    pub bits: Vec<u8>,
}

// ── Collections ────────────────────────────────────────────────────

/// Fixed-length array; immutability is expressed by the class id.
#[derive(Debug, Clone, Default)]
pub struct Array {
    pub type_arguments: Value,
    pub elements: Vec<Value>,
}

#[derive(Debug, Clone, Default)]
pub struct GrowableObjectArray {
    pub type_arguments: Value,
    pub length: usize,
    /// Backing [`Array`]; its length is the capacity.
    pub data: Value,
}

/// Insertion-ordered hash map.
///
/// `entries` keeps key/value pairs in insertion order with `None` for
/// removed pairs. `index` maps hash buckets to entry positions and is
/// rebuilt on demand, so it is never persisted.
#[derive(Debug, Clone, Default)]
pub struct LinkedHashMap {
    pub type_arguments: Value,
    pub entries: Vec<Option<(Value, Value)>>,
    pub deleted: usize,
    pub index: Option<Box<[u32]>>,
    pub hash_mask: u32,
}

impl LinkedHashMap {
    /// Number of live pairs.
    pub fn len(&self) -> usize {
        self.entries.len() - self.deleted
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn live_pairs(&self) -> impl Iterator<Item = (Value, Value)> + '_ {
        self.entries.iter().filter_map(|entry| *entry)
    }
}

// ── Numbers, booleans, strings ─────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct Mint {
    pub value: i64,
}

#[derive(Debug, Clone, Default)]
pub struct Double {
    pub value: f64,
}

/// Arbitrary precision integer.
///
/// The magnitude lives in a `Uint32` [`TypedData`], least significant
/// digit first; only the first `used` digits are meaningful.
#[derive(Debug, Clone, Default)]
pub struct Bigint {
    pub negative: bool,
    pub used: u32,
    pub digits: Value,
}

#[derive(Debug, Clone, Default)]
pub struct Bool {
    pub value: bool,
}

#[derive(Debug, Clone, Default)]
pub struct OneByteString {
    pub data: Vec<u8>,
    pub hash: HashCache,
}

#[derive(Debug, Clone, Default)]
pub struct TwoByteString {
    pub data: Vec<u16>,
    pub hash: HashCache,
}

#[derive(Debug, Clone, Default)]
pub struct FourByteString {
    pub data: Vec<u32>,
    pub hash: HashCache,
}

// ── Native resources ───────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct SendPort {
    pub port_id: u64,
}

#[derive(Debug, Clone, Default)]
pub struct ReceivePort {
    pub port_id: u64,
    pub send_port: Value,
}

#[derive(Debug, Clone, Default)]
pub struct MirrorReference {
    pub referent: Value,
}

#[derive(Debug, Clone, Default)]
pub struct UserTag {
    pub label: Value,
    pub tag: u64,
}

// ── Typed data ─────────────────────────────────────────────────────

/// Raw little-endian element storage; the element kind comes from the
/// class id.
#[derive(Debug, Clone)]
pub struct TypedData {
    pub kind: TypedDataKind,
    pub data: Vec<u8>,
}

impl Default for TypedData {
    fn default() -> Self {
        Self {
            kind: TypedDataKind::Uint8,
            data: Vec::new(),
        }
    }
}

impl TypedData {
    pub fn len(&self) -> usize {
        self.data.len() / self.kind.element_size()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn from_u32s(values: &[u32]) -> Self {
        let mut data = Vec::with_capacity(values.len() * 4);
        for value in values {
            data.extend_from_slice(&value.to_le_bytes());
        }
        Self {
            kind: TypedDataKind::Uint32,
            data,
        }
    }

    pub fn u32_at(&self, index: usize) -> u32 {
        let start = index * 4;
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.data[start..start + 4]);
        u32::from_le_bytes(bytes)
    }
}

/// Called with the owned bytes when an external typed-data object dies.
pub type ExternalFinalizer = fn(&[u8]);

/// Typed data whose storage was handed in from outside the heap.
#[derive(Debug, Clone)]
pub struct ExternalTypedData {
    pub kind: TypedDataKind,
    pub data: Vec<u8>,
    pub finalizer: Option<ExternalFinalizer>,
}

impl Default for ExternalTypedData {
    fn default() -> Self {
        Self {
            kind: TypedDataKind::Uint8,
            data: Vec::new(),
            finalizer: None,
        }
    }
}

/// Instance of a program class; the class id lives in the header.
#[derive(Debug, Clone, Default)]
pub struct Instance {
    pub fields: Vec<Value>,
}

// ── The closed sum of all layouts ──────────────────────────────────

/// Typed access to one variant of [`Object`].
pub trait Variant: Sized {
    const KIND: ObjectKind;
    fn from_object(object: &Object) -> Option<&Self>;
    fn from_object_mut(object: &mut Object) -> Option<&mut Self>;
}

macro_rules! objects {
    ($($name:ident),* $(,)?) => {
        /// Body of a heap object, one variant per [`ObjectKind`].
        #[derive(Debug, Clone)]
        pub enum Object {
            $($name($name),)*
        }

        impl Object {
            pub fn kind(&self) -> ObjectKind {
                match self {
                    $(Self::$name(_) => ObjectKind::$name,)*
                }
            }

            /// An empty body of the given layout, used as a placeholder
            /// until the real contents are known.
            pub fn placeholder(kind: ObjectKind) -> Self {
                match kind {
                    $(ObjectKind::$name => Self::$name($name::default()),)*
                }
            }
        }

        $(
            impl Variant for $name {
                const KIND: ObjectKind = ObjectKind::$name;

                #[inline(always)]
                fn from_object(object: &Object) -> Option<&Self> {
                    match object {
                        Object::$name(inner) => Some(inner),
                        _ => None,
                    }
                }

                #[inline(always)]
                fn from_object_mut(object: &mut Object) -> Option<&mut Self> {
                    match object {
                        Object::$name(inner) => Some(inner),
                        _ => None,
                    }
                }
            }

            impl From<$name> for Object {
                #[inline(always)]
                fn from(inner: $name) -> Self {
                    Self::$name(inner)
                }
            }
        )*
    };
}

objects! {
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
