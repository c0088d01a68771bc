use heap::Heap;
use object::{
    Array, Bigint, Bool, Class, ClassFlags, ClassId, Closure, ClosureData, Context, Double,
    ExactnessState, ExternalFinalizer, ExternalTypedData, Field, FourByteString, Function,
    FunctionKind, GrowableObjectArray, Header, HeaderFlags, Instance, Library, LinkedHashMap, Mint,
    Object, ObjectId, ObjectKind, OneByteString, Script, ScriptKind, StrRef, TwoByteString, Type,
    MAX_CLASS_ID, TypeArguments, TypeParameter, TypeRef, TypeState, TypedData, Value,
};
use rustc_hash::FxHashMap;

use super::canonicalize::canonicalize_read_objects;
use super::error::{SnapshotError, SnapshotResult};
use super::policy::{MemberKind, Reference, SnapshotKind, SnapshotPolicy, resolve_reference};
use super::stream::ReadStream;
use super::writer::is_leaf;
use super::{MAGIC, VERSION, tag};
use crate::intern::InternTable;

/// Default owner callback for external data copied out of a snapshot.
fn release_external(_data: &[u8]) {}

/// Decoded `[id][cid][tags]` prefix of an inline or forward object.
#[derive(Debug, Clone, Copy)]
struct ObjectHeader {
    index: u32,
    class_id: ClassId,
    kind: ObjectKind,
    /// Flags the object is allocated with.
    flags: HeaderFlags,
    /// The writer marked the object canonical.
    canonical: bool,
}

/// Materializes an object graph written by [`super::SnapshotWriter`].
///
/// Back-reference ids are assigned in stream order, so the table is a
/// plain vector and every inline or forward id must equal its length.
pub struct SnapshotReader<'a> {
    heap: &'a mut Heap,
    interns: &'a mut InternTable,
    policy: &'a dyn SnapshotPolicy,
    stream: ReadStream<'a>,
    backrefs: Vec<Value>,
    /// Forwarded objects still waiting for their body.
    pending: FxHashMap<u32, (ObjectId, ObjectHeader)>,
    /// Heap objects allocated by this read, in allocation order.
    allocated: Vec<ObjectId>,
    /// Objects that arrived with the canonical bit, in read order.
    canonical: Vec<ObjectId>,
    external_finalizer: ExternalFinalizer,
}

impl<'a> SnapshotReader<'a> {
    pub fn new(
        heap: &'a mut Heap,
        interns: &'a mut InternTable,
        policy: &'a dyn SnapshotPolicy,
        bytes: &'a [u8],
    ) -> SnapshotResult<Self> {
        let mut stream = ReadStream::new(bytes);
        if stream.read_bytes(MAGIC.len()).ok() != Some(MAGIC.as_slice()) {
            return Err(SnapshotError::BadMagic);
        }
        let version = stream.read_u32()?;
        if version != VERSION {
            return Err(SnapshotError::UnsupportedVersion(version));
        }
        let found = stream.read_u8()?;
        let expected = policy.kind();
        if SnapshotKind::from_u8(found) != Some(expected) {
            return Err(SnapshotError::KindMismatch {
                expected: expected as u8,
                found,
            });
        }
        Ok(Self {
            heap,
            interns,
            policy,
            stream,
            backrefs: Vec::new(),
            pending: FxHashMap::default(),
            allocated: Vec::new(),
            canonical: Vec::new(),
            external_finalizer: release_external,
        })
    }

    /// Callback attached to external typed data read from this snapshot.
    pub fn with_external_finalizer(mut self, finalizer: ExternalFinalizer) -> Self {
        self.external_finalizer = finalizer;
        self
    }

    /// Counterpart of [`super::SnapshotWriter::write_section`].
    pub fn read_section(&mut self) -> SnapshotResult<Option<&'a [u8]>> {
        let len = self.stream.read_len(1)?;
        if len == 0 {
            return Ok(None);
        }
        self.stream.read_bytes(len).map(Some)
    }

    pub fn read_len(&mut self, min_element_size: usize) -> SnapshotResult<usize> {
        self.stream.read_len(min_element_size)
    }

    pub fn read_value(&mut self) -> SnapshotResult<Value> {
        let position = self.stream.position();
        match self.stream.read_u8()? {
            tag::NULL => Ok(Value::Null),
            tag::SMI => {
                let n = self.stream.read_i64()?;
                Value::smi(n).ok_or(SnapshotError::InvalidTag {
                    position,
                    tag: tag::SMI,
                })
            }
            tag::BACKREF => {
                let index = self.stream.read_u32()?;
                self.backrefs
                    .get(index as usize)
                    .copied()
                    .ok_or(SnapshotError::InvalidBackRef(index))
            }
            tag::CLASS_REF => {
                let class_id = ClassId(self.stream.read_u32()?);
                resolve_reference(self.heap, Reference::Class(class_id))
            }
            tag::LIBRARY_REF => {
                let index = self.stream.read_u32()?;
                resolve_reference(self.heap, Reference::Library(index))
            }
            tag::SCRIPT_REF => {
                let library = self.stream.read_u32()?;
                let index = self.stream.read_u32()?;
                resolve_reference(self.heap, Reference::Script { library, index })
            }
            tag::MEMBER_REF => {
                let class = ClassId(self.stream.read_u32()?);
                let kind = match self.stream.read_u8()? {
                    0 => MemberKind::Field,
                    1 => MemberKind::Function,
                    tag => return Err(SnapshotError::InvalidTag { position, tag }),
                };
                let index = self.stream.read_u32()?;
                resolve_reference(self.heap, Reference::Member { class, kind, index })
            }
            tag::INLINE => self.read_inline(),
            tag::FORWARD => self.read_forward(),
            tag => Err(SnapshotError::InvalidTag { position, tag }),
        }
    }

    fn read_object_header(&mut self) -> SnapshotResult<ObjectHeader> {
        let index = self.stream.read_u32()?;
        if index as usize != self.backrefs.len() {
            return Err(SnapshotError::InvalidBackRef(index));
        }
        let class_id = ClassId(self.stream.read_u32()?);
        let tags = self.stream.read_u32()?;
        let kind = class_id.kind();
        if class_id == ClassId::ILLEGAL
            || class_id == ClassId::SMI
            || class_id.0 > MAX_CLASS_ID
            || kind.is_execution_only()
            || kind.is_native_resource()
        {
            return Err(SnapshotError::InvalidClassId(class_id));
        }
        let written = Header::from_tags(tags).flags();
        let canonical = written.contains(HeaderFlags::CANONICAL);
        // The heap re-derives FINALIZABLE; CANONICAL is only trusted when
        // the reader does not look objects up again.
        let mut flags = written - HeaderFlags::FINALIZABLE;
        if self.policy.recanonicalize() {
            flags -= HeaderFlags::CANONICAL;
        }
        Ok(ObjectHeader {
            index,
            class_id,
            kind,
            flags,
            canonical,
        })
    }

    fn read_inline(&mut self) -> SnapshotResult<Value> {
        let header = self.read_object_header()?;
        if is_leaf(header.kind) {
            let value = self.read_leaf(header)?;
            self.backrefs.push(value);
            return Ok(value);
        }
        // Registered before the body so that cycles back to it resolve.
        let id = self.allocate(header, Object::placeholder(header.kind));
        let object = self.read_body(header)?;
        self.heap
            .replace(id, Header::with_flags(header.class_id, header.flags), object);
        Ok(Value::Object(id))
    }

    fn read_forward(&mut self) -> SnapshotResult<Value> {
        let header = self.read_object_header()?;
        if is_leaf(header.kind) {
            return Err(SnapshotError::InvalidClassId(header.class_id));
        }
        let id = self.allocate(header, Object::placeholder(header.kind));
        self.pending.insert(header.index, (id, header));
        Ok(Value::Object(id))
    }

    /// Allocates, records and registers the back reference of an object.
    fn allocate(&mut self, header: ObjectHeader, object: Object) -> ObjectId {
        let id = self
            .heap
            .allocate_with_flags(header.class_id, header.flags, object);
        self.allocated.push(id);
        if header.canonical {
            self.canonical.push(id);
        }
        if !is_leaf(header.kind) {
            self.backrefs.push(Value::Object(id));
        }
        id
    }

    fn read_values(&mut self) -> SnapshotResult<Vec<Value>> {
        let len = self.stream.read_len(1)?;
        let mut values = Vec::with_capacity(len);
        for _ in 0..len {
            values.push(self.read_value()?);
        }
        Ok(values)
    }

    fn read_enum<T>(&mut self, decode: fn(u8) -> Option<T>) -> SnapshotResult<T> {
        let position = self.stream.position();
        let tag = self.stream.read_u8()?;
        decode(tag).ok_or(SnapshotError::InvalidTag { position, tag })
    }

    /// Numbers, strings and raw data. Nothing inside them can refer back,
    /// so they are registered once complete.
    fn read_leaf(&mut self, header: ObjectHeader) -> SnapshotResult<Value> {
        let class_id = header.class_id;
        let object: Object = match header.kind {
            ObjectKind::Mint => {
                let value = self.stream.read_i64()?;
                if self.heap.settings().narrow_mints
                    && let Some(smi) = Value::smi(value)
                {
                    return Ok(smi);
                }
                Mint { value }.into()
            }
            ObjectKind::Double => Double {
                value: self.stream.read_f64()?,
            }
            .into(),
            ObjectKind::Bool => Bool {
                value: self.stream.read_bool()?,
            }
            .into(),
            ObjectKind::OneByteString | ObjectKind::TwoByteString | ObjectKind::FourByteString => {
                return self.read_string(header);
            }
            ObjectKind::TypedData => {
                let kind = class_id
                    .typed_data_kind()
                    .ok_or(SnapshotError::InvalidClassId(class_id))?;
                let len = self.stream.read_len(kind.element_size())?;
                TypedData {
                    kind,
                    data: self.stream.read_bytes(len * kind.element_size())?.to_vec(),
                }
                .into()
            }
            ObjectKind::ExternalTypedData => {
                if !self.policy.accepts_external_data() {
                    return Err(SnapshotError::ExternalDataInFullSnapshot);
                }
                let kind = class_id
                    .external_typed_data_kind()
                    .ok_or(SnapshotError::InvalidClassId(class_id))?;
                let len = self.stream.read_len(kind.element_size())?;
                ExternalTypedData {
                    kind,
                    data: self.stream.read_bytes(len * kind.element_size())?.to_vec(),
                    finalizer: Some(self.external_finalizer),
                }
                .into()
            }
            _ => return Err(SnapshotError::InvalidClassId(class_id)),
        };
        Ok(Value::Object(self.allocate(header, object)))
    }

    fn read_string(&mut self, header: ObjectHeader) -> SnapshotResult<Value> {
        let unit = match header.kind {
            ObjectKind::OneByteString => 1,
            ObjectKind::TwoByteString => 2,
            _ => 4,
        };
        let len = self.stream.read_len(unit)?;
        let hash = self.stream.read_u32()?;
        let bytes = self.stream.read_bytes(len * unit)?;
        let wide: Vec<u32> = if unit == 4 {
            bytes
                .chunks_exact(4)
                .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect()
        } else {
            Vec::new()
        };

        // Canonical strings go straight to the symbol table. Narrow
        // contents are probed in place and only copied if the symbol is
        // new.
        if header.canonical && self.policy.recanonicalize() {
            let text = match header.kind {
                ObjectKind::OneByteString => StrRef::Latin1(bytes),
                ObjectKind::TwoByteString => StrRef::Utf16Le(bytes),
                _ => StrRef::Utf32(&wide),
            };
            return Ok(self.interns.symbol_from(self.heap, text));
        }

        let object: Object = match header.kind {
            ObjectKind::OneByteString => OneByteString {
                data: bytes.to_vec(),
                ..Default::default()
            }
            .into(),
            ObjectKind::TwoByteString => TwoByteString {
                data: bytes
                    .chunks_exact(2)
                    .map(|c| u16::from_le_bytes([c[0], c[1]]))
                    .collect(),
                ..Default::default()
            }
            .into(),
            _ => FourByteString {
                data: wide,
                ..Default::default()
            }
            .into(),
        };
        let id = self.allocate(header, object);
        if hash != 0 {
            match self.heap.object(id) {
                Object::OneByteString(s) => s.hash.set(hash),
                Object::TwoByteString(s) => s.hash.set(hash),
                Object::FourByteString(s) => s.hash.set(hash),
                _ => 0,
            };
        }
        Ok(Value::Object(id))
    }

    fn read_body(&mut self, header: ObjectHeader) -> SnapshotResult<Object> {
        Ok(match header.kind {
            ObjectKind::Class => Class {
                id: ClassId(self.stream.read_u32()?),
                name: self.read_value()?,
                library: self.read_value()?,
                script: self.read_value()?,
                super_type: self.read_value()?,
                interfaces: self.read_values()?,
                type_parameters: self.read_values()?,
                fields: self.read_values()?,
                functions: self.read_values()?,
                direct_subclasses: self.read_values()?,
                direct_implementors: self.read_values()?,
                declaration_type: self.read_value()?,
                num_type_arguments: u16::try_from(self.stream.read_i32()?).ok(),
                flags: ClassFlags::from_bits_truncate(self.stream.read_u16()?),
                token_pos: self.stream.read_i32()?,
            }
            .into(),
            ObjectKind::Type => Type {
                type_class_id: ClassId(self.stream.read_u32()?),
                arguments: self.read_value()?,
                state: self.read_enum(TypeState::from_u8)?,
                token_pos: self.stream.read_i32()?,
                ..Default::default()
            }
            .into(),
            ObjectKind::TypeRef => TypeRef {
                target: self.read_value()?,
            }
            .into(),
            ObjectKind::TypeParameter => TypeParameter {
                parameterized_class_id: ClassId(self.stream.read_u32()?),
                index: self.stream.read_u16()?,
                name: self.read_value()?,
                bound: self.read_value()?,
                state: self.read_enum(TypeState::from_u8)?,
                token_pos: self.stream.read_i32()?,
                ..Default::default()
            }
            .into(),
            ObjectKind::TypeArguments => TypeArguments {
                types: self.read_values()?,
                ..Default::default()
            }
            .into(),
            ObjectKind::Function => Function {
                name: self.read_value()?,
                owner: self.read_value()?,
                kind: self.read_enum(FunctionKind::from_u8)?,
                is_static: self.stream.read_bool()?,
                is_abstract: self.stream.read_bool()?,
                result_type: self.read_value()?,
                parameter_types: self.read_values()?,
                parameter_names: self.read_values()?,
                data: self.read_value()?,
                code: Value::Null,
                token_pos: self.stream.read_i32()?,
            }
            .into(),
            ObjectKind::Field => Field {
                name: self.read_value()?,
                owner: self.read_value()?,
                ty: self.read_value()?,
                is_static: self.stream.read_bool()?,
                is_final: self.stream.read_bool()?,
                is_const: self.stream.read_bool()?,
                static_value: self.read_value()?,
                exactness: self.read_enum(ExactnessState::from_u8)?,
                token_pos: self.stream.read_i32()?,
            }
            .into(),
            ObjectKind::Script => Script {
                url: self.read_value()?,
                source: self.read_value()?,
                kind: self.read_enum(ScriptKind::from_u8)?,
            }
            .into(),
            ObjectKind::Library => Library {
                name: self.read_value()?,
                url: self.read_value()?,
                index: self.stream.read_i32()?,
                classes: self.read_values()?,
                scripts: self.read_values()?,
                imports: self.read_values()?,
                is_core: self.stream.read_bool()?,
            }
            .into(),
            ObjectKind::ClosureData => ClosureData {
                parent_function: self.read_value()?,
                signature_type: self.read_value()?,
                implicit_closure: self.read_value()?,
            }
            .into(),
            ObjectKind::Context => Context {
                parent: self.read_value()?,
                variables: self.read_values()?,
            }
            .into(),
            ObjectKind::Closure => Closure {
                instantiator_type_arguments: self.read_value()?,
                function: self.read_value()?,
                context: self.read_value()?,
            }
            .into(),
            ObjectKind::Array => Array {
                type_arguments: self.read_value()?,
                elements: self.read_values()?,
            }
            .into(),
            ObjectKind::GrowableObjectArray => GrowableObjectArray {
                type_arguments: self.read_value()?,
                length: self.stream.read_u32()? as usize,
                data: self.read_value()?,
            }
            .into(),
            ObjectKind::LinkedHashMap => {
                let type_arguments = self.read_value()?;
                let len = self.stream.read_len(2)?;
                let mut entries = Vec::with_capacity(len);
                for _ in 0..len {
                    let key = self.read_value()?;
                    let value = self.read_value()?;
                    entries.push(Some((key, value)));
                }
                // The bucket index is rebuilt on first lookup.
                LinkedHashMap {
                    type_arguments,
                    entries,
                    ..Default::default()
                }
                .into()
            }
            ObjectKind::Bigint => Bigint {
                negative: self.stream.read_bool()?,
                used: self.stream.read_u32()?,
                digits: self.read_value()?,
            }
            .into(),
            ObjectKind::Instance => Instance {
                fields: self.read_values()?,
            }
            .into(),
            _ => return Err(SnapshotError::InvalidClassId(header.class_id)),
        })
    }

    /// Reads the deferred bodies and settles canonical objects.
    ///
    /// `roots` are values read from this snapshot that live outside the
    /// heap; they are redirected when a recanonicalized object is replaced
    /// by an existing representative.
    pub fn finish(mut self, roots: &mut [Value]) -> SnapshotResult<()> {
        loop {
            let index = self.stream.read_u32()?;
            if index == tag::END_OF_FORWARDS {
                break;
            }
            let (id, header) = self
                .pending
                .remove(&index)
                .ok_or(SnapshotError::InvalidBackRef(index))?;
            let object = self.read_body(header)?;
            self.heap
                .replace(id, Header::with_flags(header.class_id, header.flags), object);
        }
        if let Some(index) = self.pending.keys().min() {
            return Err(SnapshotError::UnresolvedReference(format!(
                "forwarded object #{index}"
            )));
        }

        if self.policy.recanonicalize() {
            self.register_program_structure()?;
            canonicalize_read_objects(
                self.heap,
                self.interns,
                &self.canonical,
                &self.allocated,
                roots,
            );
        } else {
            for id in &self.canonical {
                self.interns.register(self.heap, Value::Object(*id));
            }
        }
        log::debug!(
            "{:?} snapshot: read {} objects ({} canonical)",
            self.policy.kind(),
            self.allocated.len(),
            self.canonical.len()
        );
        Ok(())
    }

    /// Classes and libraries that arrived inline join the reading
    /// program under the ids they were written with. An id may extend the
    /// class table by at most the number of classes in the stream.
    fn register_program_structure(&mut self) -> SnapshotResult<()> {
        let heap = &mut *self.heap;
        let declared = self
            .allocated
            .iter()
            .filter(|id| matches!(heap.object(**id), Object::Class(_)))
            .count();
        let limit = (heap.num_classes() + declared).min(MAX_CLASS_ID as usize + 1);
        let mut instances = Vec::new();
        for &id in &self.allocated {
            match heap.object(id) {
                Object::Class(class) => {
                    let class_id = class.id;
                    if class_id.index() >= limit {
                        return Err(SnapshotError::InvalidClassId(class_id));
                    }
                    let existing = heap.class_at(class_id);
                    if existing.is_null() {
                        heap.set_class_at(class_id, Value::Object(id));
                    } else if existing != Value::Object(id) {
                        return Err(SnapshotError::InvalidClassId(class_id));
                    }
                }
                Object::Library(_) => {
                    if !heap.libraries().contains(&Value::Object(id)) {
                        heap.add_library(id);
                    }
                }
                Object::Instance(_) => instances.push(heap.header(id).class_id()),
                _ => {}
            }
        }
        match instances
            .into_iter()
            .find(|class_id| !class_id.is_predefined() && heap.class_at(*class_id).is_null())
        {
            Some(class_id) => Err(SnapshotError::InvalidClassId(class_id)),
            None => Ok(()),
        }
    }
}
