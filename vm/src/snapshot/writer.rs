use std::collections::VecDeque;

use heap::Heap;
use object::{Object, ObjectId, ObjectKind, Value};
use rustc_hash::FxHashMap;

use super::error::SnapshotResult;
use super::policy::{Reference, SnapshotPolicy};
use super::stream::WriteStream;
use super::{MAGIC, VERSION, tag};

/// Inline nesting beyond this depth is written as a forward record.
pub const MAX_INLINE_DEPTH: usize = 64;

/// Serializes an object graph.
///
/// Every object written inline gets the next back-reference id; later
/// occurrences are written as that id. Objects the policy can name on the
/// reading side are written as references and get no id.
pub struct SnapshotWriter<'a> {
    heap: &'a Heap,
    policy: &'a dyn SnapshotPolicy,
    stream: WriteStream,
    backrefs: FxHashMap<ObjectId, u32>,
    forward: VecDeque<ObjectId>,
    depth: usize,
    max_inline_depth: usize,
    references: usize,
}

impl<'a> SnapshotWriter<'a> {
    pub fn new(heap: &'a Heap, policy: &'a dyn SnapshotPolicy) -> Self {
        let mut stream = WriteStream::new();
        stream.write_bytes(MAGIC);
        stream.write_u32(VERSION);
        stream.write_u8(policy.kind() as u8);
        Self {
            heap,
            policy,
            stream,
            backrefs: FxHashMap::default(),
            forward: VecDeque::new(),
            depth: 0,
            max_inline_depth: MAX_INLINE_DEPTH,
            references: 0,
        }
    }

    pub fn with_max_inline_depth(mut self, depth: usize) -> Self {
        self.max_inline_depth = depth;
        self
    }

    /// Opaque length-prefixed bytes; an empty section reads back as none.
    pub fn write_section(&mut self, bytes: &[u8]) {
        self.stream.write_len(bytes.len());
        self.stream.write_bytes(bytes);
    }

    pub fn write_len(&mut self, len: usize) {
        self.stream.write_len(len);
    }

    pub fn write_value(&mut self, value: Value) -> SnapshotResult<()> {
        let id = match value {
            Value::Null => {
                self.stream.write_u8(tag::NULL);
                return Ok(());
            }
            Value::Smi(n) => {
                self.stream.write_u8(tag::SMI);
                self.stream.write_i64(n);
                return Ok(());
            }
            Value::Object(id) => id,
        };
        if let Some(&index) = self.backrefs.get(&id) {
            self.stream.write_u8(tag::BACKREF);
            self.stream.write_u32(index);
            return Ok(());
        }
        if let Some(reference) = self.policy.reference(self.heap, id) {
            self.write_reference(reference);
            return Ok(());
        }

        let kind = self.heap.object(id).kind();
        if kind.is_execution_only() {
            unreachable!("{kind:?} objects are never written to a snapshot");
        }
        self.policy.check_writable(self.heap, id)?;

        let index = self.backrefs.len() as u32;
        self.backrefs.insert(id, index);
        let header = self.heap.header(id);
        let deferred = self.depth >= self.max_inline_depth && !is_leaf(kind);
        self.stream.write_u8(if deferred { tag::FORWARD } else { tag::INLINE });
        self.stream.write_u32(index);
        self.stream.write_u32(header.class_id().0);
        self.stream.write_u32(header.tags());
        log::trace!("write #{index} {kind:?}{}", if deferred { " (deferred)" } else { "" });

        if deferred {
            self.forward.push_back(id);
            return Ok(());
        }
        self.depth += 1;
        let result = self.write_body(id);
        self.depth -= 1;
        result
    }

    fn write_reference(&mut self, reference: Reference) {
        self.references += 1;
        let s = &mut self.stream;
        match reference {
            Reference::Class(class_id) => {
                s.write_u8(tag::CLASS_REF);
                s.write_u32(class_id.0);
            }
            Reference::Library(index) => {
                s.write_u8(tag::LIBRARY_REF);
                s.write_u32(index);
            }
            Reference::Script { library, index } => {
                s.write_u8(tag::SCRIPT_REF);
                s.write_u32(library);
                s.write_u32(index);
            }
            Reference::Member { class, kind, index } => {
                s.write_u8(tag::MEMBER_REF);
                s.write_u32(class.0);
                s.write_u8(kind as u8);
                s.write_u32(index);
            }
        }
    }

    fn write_values(&mut self, values: &[Value]) -> SnapshotResult<()> {
        self.stream.write_len(values.len());
        for value in values {
            self.write_value(*value)?;
        }
        Ok(())
    }

    fn write_body(&mut self, id: ObjectId) -> SnapshotResult<()> {
        let heap = self.heap;
        match heap.object(id) {
            Object::Class(c) => {
                self.stream.write_u32(c.id.0);
                self.write_value(c.name)?;
                self.write_value(c.library)?;
                self.write_value(c.script)?;
                self.write_value(c.super_type)?;
                self.write_values(&c.interfaces)?;
                self.write_values(&c.type_parameters)?;
                self.write_values(&c.fields)?;
                self.write_values(&c.functions)?;
                self.write_values(&c.direct_subclasses)?;
                self.write_values(&c.direct_implementors)?;
                self.write_value(c.declaration_type)?;
                self.stream
                    .write_i32(c.num_type_arguments.map_or(-1, i32::from));
                self.stream.write_u16(c.flags.bits());
                self.stream.write_i32(c.token_pos);
            }
            Object::Type(t) => {
                self.stream.write_u32(t.type_class_id.0);
                self.write_value(t.arguments)?;
                self.stream.write_u8(t.state as u8);
                self.stream.write_i32(t.token_pos);
            }
            Object::TypeRef(r) => self.write_value(r.target)?,
            Object::TypeParameter(p) => {
                self.stream.write_u32(p.parameterized_class_id.0);
                self.stream.write_u16(p.index);
                self.write_value(p.name)?;
                self.write_value(p.bound)?;
                self.stream.write_u8(p.state as u8);
                self.stream.write_i32(p.token_pos);
            }
            Object::TypeArguments(a) => self.write_values(&a.types)?,
            Object::Function(f) => {
                self.write_value(f.name)?;
                self.write_value(f.owner)?;
                self.stream.write_u8(f.kind as u8);
                self.stream.write_bool(f.is_static);
                self.stream.write_bool(f.is_abstract);
                self.write_value(f.result_type)?;
                self.write_values(&f.parameter_types)?;
                self.write_values(&f.parameter_names)?;
                self.write_value(f.data)?;
                self.stream.write_i32(f.token_pos);
            }
            Object::Field(f) => {
                self.write_value(f.name)?;
                self.write_value(f.owner)?;
                self.write_value(f.ty)?;
                self.stream.write_bool(f.is_static);
                self.stream.write_bool(f.is_final);
                self.stream.write_bool(f.is_const);
                self.write_value(f.static_value)?;
                self.stream.write_u8(f.exactness as u8);
                self.stream.write_i32(f.token_pos);
            }
            Object::Script(s) => {
                self.write_value(s.url)?;
                self.write_value(s.source)?;
                self.stream.write_u8(s.kind as u8);
            }
            Object::Library(l) => {
                self.write_value(l.name)?;
                self.write_value(l.url)?;
                self.stream.write_i32(l.index);
                self.write_values(&l.classes)?;
                self.write_values(&l.scripts)?;
                self.write_values(&l.imports)?;
                self.stream.write_bool(l.is_core);
            }
            Object::ClosureData(d) => {
                self.write_value(d.parent_function)?;
                self.write_value(d.signature_type)?;
                self.write_value(d.implicit_closure)?;
            }
            Object::Context(c) => {
                self.write_value(c.parent)?;
                self.write_values(&c.variables)?;
            }
            Object::Closure(c) => {
                self.write_value(c.instantiator_type_arguments)?;
                self.write_value(c.function)?;
                self.write_value(c.context)?;
            }
            Object::Array(a) => {
                self.write_value(a.type_arguments)?;
                self.write_values(&a.elements)?;
            }
            Object::GrowableObjectArray(g) => {
                self.write_value(g.type_arguments)?;
                self.stream.write_len(g.length);
                self.write_value(g.data)?;
            }
            Object::LinkedHashMap(m) => {
                self.write_value(m.type_arguments)?;
                self.stream.write_len(m.len());
                for (key, value) in m.live_pairs() {
                    self.write_value(key)?;
                    self.write_value(value)?;
                }
            }
            Object::Mint(m) => self.stream.write_i64(m.value),
            Object::Double(d) => self.stream.write_f64(d.value),
            Object::Bigint(b) => {
                self.stream.write_bool(b.negative);
                self.stream.write_u32(b.used);
                self.write_value(b.digits)?;
            }
            Object::Bool(b) => self.stream.write_bool(b.value),
            Object::OneByteString(s) => {
                self.write_string_header(heap, id, s.data.len());
                self.stream.write_bytes(&s.data);
            }
            Object::TwoByteString(s) => {
                self.write_string_header(heap, id, s.data.len());
                for unit in &s.data {
                    self.stream.write_u16(*unit);
                }
            }
            Object::FourByteString(s) => {
                self.write_string_header(heap, id, s.data.len());
                for unit in &s.data {
                    self.stream.write_u32(*unit);
                }
            }
            Object::TypedData(t) => {
                self.stream.write_len(t.len());
                self.stream.write_bytes(&t.data);
            }
            Object::ExternalTypedData(t) => {
                self.stream.write_len(t.data.len() / t.kind.element_size());
                self.stream.write_bytes(&t.data);
            }
            Object::Instance(i) => self.write_values(&i.fields)?,
            Object::SendPort(_)
            | Object::ReceivePort(_)
            | Object::MirrorReference(_)
            | Object::UserTag(_) => {
                unreachable!("native resources are rejected before their body is written")
            }
            Object::Code(_) | Object::Instructions(_) | Object::ICData(_) | Object::StackMap(_) => {
                unreachable!("execution-only objects are never written to a snapshot")
            }
        }
        Ok(())
    }

    fn write_string_header(&mut self, heap: &Heap, id: ObjectId, len: usize) {
        self.stream.write_len(len);
        self.stream
            .write_u32(heap.object(id).string_hash().unwrap_or_default());
    }

    /// Writes the bodies of deferred objects and returns the stream.
    pub fn finish(mut self) -> SnapshotResult<Vec<u8>> {
        while let Some(id) = self.forward.pop_front() {
            let index = self.backrefs[&id];
            self.stream.write_u32(index);
            self.write_body(id)?;
        }
        self.stream.write_u32(tag::END_OF_FORWARDS);
        log::debug!(
            "{:?} snapshot: {} objects, {} references, {} bytes",
            self.policy.kind(),
            self.backrefs.len(),
            self.references,
            self.stream.position()
        );
        Ok(self.stream.into_bytes())
    }
}

/// Kinds whose body holds no object slots to recurse into.
pub(super) fn is_leaf(kind: ObjectKind) -> bool {
    matches!(
        kind,
        ObjectKind::Mint
            | ObjectKind::Double
            | ObjectKind::Bool
            | ObjectKind::OneByteString
            | ObjectKind::TwoByteString
            | ObjectKind::FourByteString
            | ObjectKind::TypedData
            | ObjectKind::ExternalTypedData
    )
}
