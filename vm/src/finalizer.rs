//! Class finalization.
//!
//! Declared types carry only the class's own type arguments. Finalization
//! expands them to the flattened vector (super type slots first, own
//! slots last), shifts type parameter indices to match, and optionally
//! canonicalizes the result.
//!
//! Recursive types are closed with TypeRefs: while a type is
//! `BeingFinalized` it sits on the pending list, and instantiating it
//! again with the same own arguments yields a reference to it instead of
//! a new expansion. Instantiations that keep growing are rejected as
//! non-contractive.

use std::fmt;

use heap::Heap;
use object::{
    Class, ClassFlags, ClassId, ClosureData, ExactnessState, Field, Function,
    Object, TypeArguments, TypeParameter, TypeRef, TypeState, Value,
};
use rustc_hash::FxHashSet;

use crate::class_sort::{self, ClassIdMap};
use crate::intern::InternTable;
use crate::types::{self, Trail, TypeEquality};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizationKind {
    Finalize,
    /// Finalize, then replace the root by its canonical representative.
    Canonicalize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeError {
    /// Expanding the type would never terminate.
    NonContractiveType { class: String, type_name: String },
    CyclicHierarchy { class: String },
    /// The super type is not an interface type.
    MalformedSuperType { class: String },
}

impl fmt::Display for FinalizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonContractiveType { class, type_name } => write!(
                f,
                "illegal recursive type '{type_name}' in the declaration of class '{class}'"
            ),
            Self::CyclicHierarchy { class } => {
                write!(f, "class '{class}' has a cycle in its super class chain")
            }
            Self::MalformedSuperType { class } => {
                write!(f, "class '{class}' cannot extend a type parameter")
            }
        }
    }
}

impl std::error::Error for FinalizeError {}

pub type FinalizeResult<T> = Result<T, FinalizeError>;

pub struct ClassFinalizer<'a> {
    heap: &'a mut Heap,
    interns: &'a mut InternTable,
    /// Classes whose type parameters are being finalized further up the
    /// stack.
    params_in_progress: FxHashSet<ClassId>,
}

impl<'a> ClassFinalizer<'a> {
    pub fn new(heap: &'a mut Heap, interns: &'a mut InternTable) -> Self {
        Self {
            heap,
            interns,
            params_in_progress: FxHashSet::default(),
        }
    }

    fn class_name(&self, class_id: ClassId) -> String {
        types::class_name(self.heap, class_id)
    }

    fn super_class_id(&self, class_id: ClassId) -> Option<ClassId> {
        let super_type = self.heap.class(class_id)?.super_type;
        types::type_class_id(self.heap, types::resolve(self.heap, super_type))
            .filter(|_| !super_type.is_null())
    }

    fn own_type_parameters(&self, class_id: ClassId) -> Vec<Value> {
        self.heap
            .class(class_id)
            .map(|c| c.type_parameters.clone())
            .unwrap_or_default()
    }

    // ── Hierarchy ──────────────────────────────────────────────────

    /// Walks the super class chain of `class_id`.
    fn check_hierarchy(&self, class_id: ClassId) -> FinalizeResult<()> {
        let mut seen = vec![class_id];
        let mut current = class_id;
        while let Some(class) = self.heap.class(current) {
            let super_type = types::resolve(self.heap, class.super_type);
            if super_type.is_null() {
                break;
            }
            let next = match self.heap.object_of(super_type) {
                Some(Object::Type(t)) => t.type_class_id,
                _ => {
                    return Err(FinalizeError::MalformedSuperType {
                        class: self.class_name(current),
                    });
                }
            };
            if seen.contains(&next) {
                return Err(FinalizeError::CyclicHierarchy {
                    class: self.class_name(class_id),
                });
            }
            seen.push(next);
            current = next;
        }
        Ok(())
    }

    /// Length of the flattened type argument vector of `class_id`: the
    /// super type's vector followed by the class's own parameters.
    pub fn num_type_arguments(&mut self, class_id: ClassId) -> usize {
        let Some(class) = self.heap.class(class_id) else {
            return 0;
        };
        if let Some(n) = class.num_type_arguments {
            return n as usize;
        }
        let mut chain = vec![class_id];
        let mut total = 0;
        let mut current = class_id;
        loop {
            let Some(class) = self.heap.class(current) else {
                break;
            };
            if let Some(n) = class.num_type_arguments {
                total += n as usize;
                break;
            }
            total += class.num_type_parameters();
            match self.super_class_id(current) {
                Some(next) if !chain.contains(&next) => {
                    chain.push(next);
                    current = next;
                }
                _ => break,
            }
        }
        if let Some(class) = self.heap.class_mut(class_id) {
            class.num_type_arguments = Some(total as u16);
        }
        total
    }

    // ── Type parameters ────────────────────────────────────────────

    /// Shifts the parameters of `class_id` into the flattened vector and
    /// finalizes their bounds. Re-entrant calls for the same class return
    /// immediately; the outermost call finishes the bounds.
    pub fn finalize_type_parameters(&mut self, class_id: ClassId) -> FinalizeResult<()> {
        let params = self.own_type_parameters(class_id);
        let all_done = params.iter().all(|p| {
            self.heap
                .get_value::<TypeParameter>(*p)
                .is_none_or(|p| p.state == TypeState::Finalized)
        });
        if all_done || !self.params_in_progress.insert(class_id) {
            return Ok(());
        }
        let result = self.finalize_type_parameters_in(class_id, &params);
        self.params_in_progress.remove(&class_id);
        result
    }

    fn finalize_type_parameters_in(&mut self, class_id: ClassId, params: &[Value]) -> FinalizeResult<()> {
        self.check_hierarchy(class_id)?;
        let offset = self.num_type_arguments(class_id) - params.len();
        for param in params {
            let Some(p) = param.as_object().and_then(|id| self.heap.get_mut::<TypeParameter>(id)) else {
                continue;
            };
            if p.state == TypeState::Allocated {
                p.index += offset as u16;
                p.state = TypeState::BeingFinalized;
            }
        }
        for param in params {
            let Some(bound) = self.heap.get_value::<TypeParameter>(*param).map(|p| p.bound) else {
                continue;
            };
            if bound.is_null() {
                continue;
            }
            let bound = self.finalize_type(bound, FinalizationKind::Finalize)?;
            if let Some(p) = param.as_object().and_then(|id| self.heap.get_mut::<TypeParameter>(id)) {
                p.bound = bound;
            }
        }
        for param in params {
            if let Some(p) = param.as_object().and_then(|id| self.heap.get_mut::<TypeParameter>(id)) {
                p.state = TypeState::Finalized;
            }
        }
        log::trace!("finalized {} type parameters of {}", params.len(), self.class_name(class_id));
        Ok(())
    }

    // ── Types ──────────────────────────────────────────────────────

    pub fn finalize_type(&mut self, ty: Value, kind: FinalizationKind) -> FinalizeResult<Value> {
        let mut pending = Vec::new();
        let finalized = self.finalize_in(ty, &mut pending)?;
        match kind {
            FinalizationKind::Finalize => Ok(finalized),
            FinalizationKind::Canonicalize => Ok(self.interns.canonicalize_type(self.heap, finalized)),
        }
    }

    fn finalize_in(&mut self, ty: Value, pending: &mut Vec<Value>) -> FinalizeResult<Value> {
        let Some(id) = ty.as_object() else {
            return Ok(ty);
        };
        match self.heap.object(id) {
            Object::TypeParameter(p) => {
                if p.state == TypeState::Allocated {
                    let class_id = p.parameterized_class_id;
                    self.finalize_type_parameters(class_id)?;
                    // Parameters not declared by a class keep their index.
                    if let Some(p) = self.heap.get_mut::<TypeParameter>(id)
                        && p.state == TypeState::Allocated
                    {
                        p.state = TypeState::Finalized;
                    }
                }
                Ok(ty)
            }
            Object::Type(t) => match t.state {
                TypeState::Finalized | TypeState::BeingFinalized => Ok(ty),
                TypeState::Allocated => {
                    self.expand_and_finalize_type_arguments(ty, pending)?;
                    if let Some(t) = self.heap.get_mut::<object::Type>(id) {
                        t.state = TypeState::Finalized;
                    }
                    Ok(ty)
                }
            },
            _ => Ok(ty),
        }
    }

    fn set_arguments(&mut self, ty: Value, arguments: Value) {
        if let Some(t) = ty.as_object().and_then(|id| self.heap.get_mut::<object::Type>(id)) {
            t.arguments = arguments;
        }
    }

    fn set_argument(&mut self, vector: Value, index: usize, value: Value) {
        if let Some(a) = vector.as_object().and_then(|id| self.heap.get_mut::<TypeArguments>(id)) {
            a.types[index] = value;
        }
    }

    fn expand_and_finalize_type_arguments(&mut self, ty: Value, pending: &mut Vec<Value>) -> FinalizeResult<()> {
        let Some(id) = ty.as_object() else {
            return Ok(());
        };
        let Some((class_id, own_args)) = self
            .heap
            .get::<object::Type>(id)
            .map(|t| (t.type_class_id, t.arguments))
        else {
            return Ok(());
        };
        self.finalize_type_parameters(class_id)?;
        let total = self.num_type_arguments(class_id);
        let own = self.heap.class(class_id).map_or(0, Class::num_type_parameters);
        let offset = total - own;
        let raw = own_args.is_null() || types::arguments_len(self.heap, own_args) != own;

        if let Some(t) = self.heap.get_mut::<object::Type>(id) {
            t.state = TypeState::BeingFinalized;
        }
        pending.push(ty);

        if total == 0 {
            self.set_arguments(ty, Value::Null);
            return Ok(());
        }

        let dynamic = types::dynamic_type(self.heap);
        let mut full = vec![Value::Null; total];
        for i in 0..own {
            full[offset + i] = if raw {
                dynamic
            } else {
                types::argument_at(self.heap, own_args, i)
            };
        }
        let vector: Value = self
            .heap
            .allocate(
                ClassId::TYPE_ARGUMENTS,
                TypeArguments {
                    types: full,
                    ..Default::default()
                },
            )
            .into();
        self.set_arguments(ty, vector);

        for i in offset..total {
            let arg = types::argument_at(self.heap, vector, i);
            let arg = self.finalize_in(arg, pending)?;
            self.set_argument(vector, i, arg);
        }

        if offset > 0 {
            let super_type = self.heap.class(class_id).map_or(Value::Null, |c| c.super_type);
            let super_type = types::resolve(self.heap, super_type);
            if types::type_state(self.heap, super_type) == Some(TypeState::Allocated) {
                self.finalize_in(super_type, pending)?;
            }
            let super_args = self
                .heap
                .get_value::<object::Type>(super_type)
                .map_or(Value::Null, |t| t.arguments);
            let mut trail = Trail::new();
            for j in 0..offset {
                let arg = types::argument_at(self.heap, super_args, j);
                let arg = self.instantiate_pending(arg, vector, pending, &mut trail)?;
                self.set_argument(vector, j, arg);
            }
        }

        if types::is_raw(self.heap, vector) {
            self.set_arguments(ty, Value::Null);
        }
        Ok(())
    }

    /// Instantiation that tolerates types still being finalized.
    fn instantiate_pending(
        &mut self,
        ty: Value,
        instantiator: Value,
        pending: &mut Vec<Value>,
        trail: &mut Trail,
    ) -> FinalizeResult<Value> {
        let Some(id) = ty.as_object() else {
            return Ok(types::dynamic_type(self.heap));
        };
        match self.heap.object(id) {
            Object::TypeParameter(p) => {
                let arg = types::argument_at(self.heap, instantiator, p.index as usize);
                Ok(if arg.is_null() { types::dynamic_type(self.heap) } else { arg })
            }
            Object::TypeRef(r) => {
                if let Some((_, buddy)) = trail.iter().find(|(original, _)| *original == ty) {
                    return Ok(*buddy);
                }
                if types::is_instantiated(self.heap, ty, &mut Vec::new()) {
                    return Ok(ty);
                }
                let target = r.target;
                let buddy: Value = self.heap.allocate(ClassId::TYPE_REF, TypeRef::default()).into();
                trail.push((ty, buddy));
                let instantiated = self.instantiate_pending(target, instantiator, pending, trail)?;
                if let Some(r) = buddy.as_object().and_then(|b| self.heap.get_mut::<TypeRef>(b)) {
                    r.target = instantiated;
                }
                Ok(buddy)
            }
            Object::Type(t) => {
                if types::is_instantiated(self.heap, ty, &mut Vec::new()) {
                    return Ok(ty);
                }
                match t.state {
                    TypeState::Allocated => {
                        self.finalize_in(ty, pending)?;
                        self.instantiate_pending(ty, instantiator, pending, trail)
                    }
                    TypeState::Finalized => {
                        let (class_id, arguments) = (t.type_class_id, t.arguments);
                        let len = types::arguments_len(self.heap, arguments);
                        let mut instantiated = Vec::with_capacity(len);
                        for i in 0..len {
                            let arg = types::argument_at(self.heap, arguments, i);
                            instantiated.push(self.instantiate_pending(arg, instantiator, pending, trail)?);
                        }
                        let arguments = self.new_vector(instantiated);
                        Ok(self.new_type(class_id, arguments, TypeState::Finalized))
                    }
                    TypeState::BeingFinalized => self.instantiate_being_finalized(ty, instantiator, pending, trail),
                }
            }
            _ => Ok(ty),
        }
    }

    fn new_vector(&mut self, types: Vec<Value>) -> Value {
        self.heap
            .allocate(
                ClassId::TYPE_ARGUMENTS,
                TypeArguments {
                    types,
                    ..Default::default()
                },
            )
            .into()
    }

    fn new_type(&mut self, class_id: ClassId, arguments: Value, state: TypeState) -> Value {
        self.heap
            .allocate(
                ClassId::TYPE,
                object::Type {
                    type_class_id: class_id,
                    arguments,
                    state,
                    ..Default::default()
                },
            )
            .into()
    }

    /// Own arguments of a type: the tail of a (being) finalized vector,
    /// the whole declared vector otherwise.
    fn own_arguments(&mut self, ty: Value) -> Vec<Value> {
        let Some((class_id, arguments, state)) = self
            .heap
            .get_value::<object::Type>(ty)
            .map(|t| (t.type_class_id, t.arguments, t.state))
        else {
            return Vec::new();
        };
        let own = self.heap.class(class_id).map_or(0, Class::num_type_parameters);
        let from = match state {
            TypeState::Allocated => 0,
            _ => self.num_type_arguments(class_id) - own,
        };
        (from..from + own)
            .map(|i| types::argument_at(self.heap, arguments, i))
            .collect()
    }

    fn instantiate_being_finalized(
        &mut self,
        ty: Value,
        instantiator: Value,
        pending: &mut Vec<Value>,
        trail: &mut Trail,
    ) -> FinalizeResult<Value> {
        let class_id = types::type_class_id(self.heap, ty).unwrap_or(ClassId::DYNAMIC);
        let own = self.own_arguments(ty);
        let mut instantiated = Vec::with_capacity(own.len());
        for arg in &own {
            instantiated.push(self.instantiate_pending(*arg, instantiator, pending, trail)?);
        }

        let same_class: Vec<Value> = std::iter::once(ty)
            .chain(pending.iter().copied())
            .filter(|p| types::type_class_id(self.heap, *p) == Some(class_id))
            .collect();
        for candidate in same_class {
            if !types::is_being_finalized(self.heap, candidate) {
                continue;
            }
            let existing = self.own_arguments(candidate);
            let identical = existing.len() == instantiated.len()
                && existing
                    .iter()
                    .zip(&instantiated)
                    .all(|(a, b)| types::resolve(self.heap, *a) == types::resolve(self.heap, *b));
            if identical {
                let reference = self.heap.allocate(ClassId::TYPE_REF, TypeRef { target: candidate });
                return Ok(reference.into());
            }
        }

        let arguments = if instantiated.is_empty() {
            Value::Null
        } else {
            self.new_vector(instantiated)
        };
        let expanded = self.new_type(class_id, arguments, TypeState::Allocated);
        self.check_recursive_type(expanded, pending)?;
        self.finalize_in(expanded, pending)
    }

    /// Rejects `ty` if some pending type of the same class has own
    /// arguments that differ from it even after erasing type parameters
    /// to `dynamic`.
    fn check_recursive_type(&mut self, ty: Value, pending: &[Value]) -> FinalizeResult<()> {
        let class_id = types::type_class_id(self.heap, ty);
        let own = self.own_arguments(ty);
        for candidate in pending {
            if types::type_class_id(self.heap, *candidate) != class_id
                || !types::is_being_finalized(self.heap, *candidate)
            {
                continue;
            }
            let existing = self.own_arguments(*candidate);
            if self.all_equivalent(&existing, &own) {
                continue;
            }
            if !existing.iter().all(|a| types::is_instantiated(self.heap, *a, &mut Vec::new())) {
                let existing = self.erase(&existing);
                let own = self.erase(&own);
                if self.all_equivalent(&existing, &own) {
                    continue;
                }
            }
            let class = class_id.map_or_else(String::new, |cid| self.class_name(cid));
            let type_name = types::type_name(self.heap, ty);
            log::debug!("rejecting non-contractive type {type_name} in {class}");
            return Err(FinalizeError::NonContractiveType { class, type_name });
        }
        Ok(())
    }

    fn all_equivalent(&self, a: &[Value], b: &[Value]) -> bool {
        a.len() == b.len()
            && a.iter().zip(b).all(|(x, y)| {
                types::is_equivalent(self.heap, *x, *y, TypeEquality::InSubtypeTest, &mut Trail::new())
            })
    }

    /// Instantiates every element with `dynamic` for all type parameters.
    fn erase(&mut self, args: &[Value]) -> Vec<Value> {
        args.iter()
            .map(|a| types::instantiate_from(self.heap, *a, Value::Null, &mut Trail::new()))
            .collect()
    }

    // ── Members ────────────────────────────────────────────────────

    /// Finalizes and canonicalizes the result and parameter types of a
    /// function, and the signature type of a closure.
    pub fn finalize_signature(&mut self, function: Value) -> FinalizeResult<()> {
        let Some((result, params, data)) = self
            .heap
            .get_value::<Function>(function)
            .map(|f| (f.result_type, f.parameter_types.clone(), f.data))
        else {
            return Ok(());
        };
        let result = self.finalize_type(result, FinalizationKind::Canonicalize)?;
        let mut finalized = Vec::with_capacity(params.len());
        for param in params {
            finalized.push(self.finalize_type(param, FinalizationKind::Canonicalize)?);
        }
        if let Some(f) = function.as_object().and_then(|id| self.heap.get_mut::<Function>(id)) {
            f.result_type = result;
            f.parameter_types = finalized;
        }
        if let Some(signature) = self.heap.get_value::<ClosureData>(data).map(|d| d.signature_type) {
            let signature = self.finalize_type(signature, FinalizationKind::Canonicalize)?;
            if let Some(d) = data.as_object().and_then(|id| self.heap.get_mut::<ClosureData>(id)) {
                d.signature_type = signature;
            }
        }
        Ok(())
    }

    fn finalize_field(&mut self, field: Value) -> FinalizeResult<()> {
        let Some(ty) = self.heap.get_value::<Field>(field).map(|f| f.ty) else {
            return Ok(());
        };
        let ty = self.finalize_type(ty, FinalizationKind::Canonicalize)?;
        let exactness = self.exactness_of(ty);
        if let Some(f) = field.as_object().and_then(|id| self.heap.get_mut::<Field>(id)) {
            f.ty = ty;
            f.exactness = exactness;
        }
        Ok(())
    }

    /// Only instantiated generic types can be tracked for exactness.
    fn exactness_of(&mut self, ty: Value) -> ExactnessState {
        let resolved = types::resolve(self.heap, ty);
        let Some((class_id, arguments)) = self
            .heap
            .get_value::<object::Type>(resolved)
            .map(|t| (t.type_class_id, t.arguments))
        else {
            return ExactnessState::NotTracking;
        };
        if self.num_type_arguments(class_id) == 0 || arguments.is_null() {
            return ExactnessState::NotTracking;
        }
        if types::is_instantiated(self.heap, resolved, &mut Vec::new()) {
            ExactnessState::Uninitialized
        } else {
            ExactnessState::NotTracking
        }
    }

    // ── Classes ────────────────────────────────────────────────────

    pub fn finalize_class(&mut self, class_id: ClassId) -> FinalizeResult<()> {
        let Some(class) = self.heap.class(class_id) else {
            return Ok(());
        };
        if class.is_finalized() {
            return Ok(());
        }
        self.check_hierarchy(class_id)?;
        let super_class = self.super_class_id(class_id);
        if let Some(super_class) = super_class {
            self.finalize_class(super_class)?;
        }
        self.finalize_type_parameters(class_id)?;

        let Some(class) = self.heap.class(class_id) else {
            return Ok(());
        };
        let (super_type, interfaces, declaration_type) =
            (class.super_type, class.interfaces.clone(), class.declaration_type);

        let super_type = self.finalize_type(super_type, FinalizationKind::Canonicalize)?;
        let mut finalized_interfaces = Vec::with_capacity(interfaces.len());
        for interface in interfaces {
            let interface = self.finalize_type(interface, FinalizationKind::Canonicalize)?;
            if let Some(cid) = types::type_class_id(self.heap, types::resolve(self.heap, interface))
                && let Some(implemented) = self.heap.class_mut(cid)
            {
                implemented.flags |= ClassFlags::IMPLEMENTED;
            }
            finalized_interfaces.push(interface);
        }

        let declaration_type = if declaration_type.is_null() {
            self.new_declaration_type(class_id)
        } else {
            declaration_type
        };
        let declaration_type = self.finalize_type(declaration_type, FinalizationKind::Canonicalize)?;

        let class_value = self.heap.class_at(class_id);
        let (fields, functions) = {
            let Some(class) = self.heap.class_mut(class_id) else {
                return Ok(());
            };
            class.super_type = super_type;
            class.interfaces = finalized_interfaces.clone();
            class.declaration_type = declaration_type;
            class.flags |= ClassFlags::TYPE_FINALIZED;
            (class.fields.clone(), class.functions.clone())
        };

        for field in fields {
            self.finalize_field(field)?;
        }
        for function in functions {
            self.finalize_signature(function)?;
        }

        for interface in finalized_interfaces {
            if let Some(cid) = types::type_class_id(self.heap, types::resolve(self.heap, interface))
                && let Some(implemented) = self.heap.class_mut(cid)
                && !implemented.direct_implementors.contains(&class_value)
            {
                implemented.direct_implementors.push(class_value);
            }
        }
        if let Some(super_class) = super_class
            && let Some(parent) = self.heap.class_mut(super_class)
            && !parent.direct_subclasses.contains(&class_value)
        {
            parent.direct_subclasses.push(class_value);
        }
        if let Some(class) = self.heap.class_mut(class_id) {
            class.flags |= ClassFlags::FINALIZED;
        }
        log::debug!("finalized class {}", self.class_name(class_id));
        Ok(())
    }

    /// `C<T0, ..., Tn>` over the class's own parameters.
    fn new_declaration_type(&mut self, class_id: ClassId) -> Value {
        let params = self.own_type_parameters(class_id);
        let arguments = if params.is_empty() {
            Value::Null
        } else {
            self.new_vector(params)
        };
        self.new_type(class_id, arguments, TypeState::Allocated)
    }

    /// Finalizes every registered class in class id order. Returns the
    /// number of classes finalized by this call.
    pub fn finalize_all_classes(&mut self) -> FinalizeResult<usize> {
        let pending: Vec<ClassId> = self
            .heap
            .class_ids()
            .filter(|cid| self.heap.class(*cid).is_some_and(|c| !c.is_finalized()))
            .collect();
        for class_id in &pending {
            self.finalize_class(*class_id)?;
        }
        log::info!("finalized {} classes", pending.len());
        Ok(pending.len())
    }

    /// Renumbers program classes depth first; see [`crate::class_sort`].
    pub fn sort_classes(&mut self) -> ClassIdMap {
        class_sort::sort_classes(self.heap, self.interns)
    }
}
