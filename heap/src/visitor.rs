use object::{Object, Value};

/// Receives the pointer slots of an object.
pub trait Visitor {
    fn visit(&mut self, value: Value) {
        let _ = value;
    }
    fn visit_mut(&mut self, value: &mut Value) {
        let _ = value;
    }
}

pub trait Visitable {
    fn visit_edges(&self, visitor: &mut impl Visitor);
    fn visit_edges_mut(&mut self, visitor: &mut impl Visitor);
}

/// Adapts a closure to [`Visitor::visit`].
pub struct Edges<F: FnMut(Value)>(pub F);

impl<F: FnMut(Value)> Visitor for Edges<F> {
    #[inline]
    fn visit(&mut self, value: Value) {
        (self.0)(value)
    }
}

/// Adapts a closure to [`Visitor::visit_mut`].
pub struct EdgesMut<F: FnMut(&mut Value)>(pub F);

impl<F: FnMut(&mut Value)> Visitor for EdgesMut<F> {
    #[inline]
    fn visit_mut(&mut self, value: &mut Value) {
        (self.0)(value)
    }
}

// One arm per layout; both directions must agree on the slot order.
macro_rules! edges {
    ($object:expr, $visit:ident, $slot:ident => $body:expr, $slots:ident => $many:expr) => {
        match $object {
            Object::Class(c) => {
                { let $slot = $visit!(c.name); $body }
                { let $slot = $visit!(c.library); $body }
                { let $slot = $visit!(c.script); $body }
                { let $slot = $visit!(c.super_type); $body }
                { let $slots = $visit!(c.interfaces); $many }
                { let $slots = $visit!(c.type_parameters); $many }
                { let $slots = $visit!(c.fields); $many }
                { let $slots = $visit!(c.functions); $many }
                { let $slots = $visit!(c.direct_subclasses); $many }
                { let $slots = $visit!(c.direct_implementors); $many }
                { let $slot = $visit!(c.declaration_type); $body }
            }
            Object::Type(t) => {
                let $slot = $visit!(t.arguments);
                $body
            }
            Object::TypeRef(r) => {
                let $slot = $visit!(r.target);
                $body
            }
            Object::TypeParameter(p) => {
                { let $slot = $visit!(p.name); $body }
                { let $slot = $visit!(p.bound); $body }
            }
            Object::TypeArguments(a) => {
                let $slots = $visit!(a.types);
                $many
            }
            Object::Function(f) => {
                { let $slot = $visit!(f.name); $body }
                { let $slot = $visit!(f.owner); $body }
                { let $slot = $visit!(f.result_type); $body }
                { let $slots = $visit!(f.parameter_types); $many }
                { let $slots = $visit!(f.parameter_names); $many }
                { let $slot = $visit!(f.data); $body }
                { let $slot = $visit!(f.code); $body }
            }
            Object::ClosureData(d) => {
                { let $slot = $visit!(d.parent_function); $body }
                { let $slot = $visit!(d.signature_type); $body }
                { let $slot = $visit!(d.implicit_closure); $body }
            }
            Object::Field(f) => {
                { let $slot = $visit!(f.name); $body }
                { let $slot = $visit!(f.owner); $body }
                { let $slot = $visit!(f.ty); $body }
                { let $slot = $visit!(f.static_value); $body }
            }
            Object::Script(s) => {
                { let $slot = $visit!(s.url); $body }
                { let $slot = $visit!(s.source); $body }
            }
            Object::Library(l) => {
                { let $slot = $visit!(l.name); $body }
                { let $slot = $visit!(l.url); $body }
                { let $slots = $visit!(l.classes); $many }
                { let $slots = $visit!(l.scripts); $many }
                { let $slots = $visit!(l.imports); $many }
            }
            Object::Context(c) => {
                { let $slot = $visit!(c.parent); $body }
                { let $slots = $visit!(c.variables); $many }
            }
            Object::Closure(c) => {
                { let $slot = $visit!(c.instantiator_type_arguments); $body }
                { let $slot = $visit!(c.function); $body }
                { let $slot = $visit!(c.context); $body }
            }
            Object::Code(c) => {
                { let $slot = $visit!(c.owner); $body }
                { let $slot = $visit!(c.instructions); $body }
            }
            Object::ICData(ic) => {
                { let $slot = $visit!(ic.owner); $body }
                { let $slot = $visit!(ic.target_name); $body }
                { let $slots = $visit!(ic.entries); $many }
            }
            Object::Array(a) => {
                { let $slot = $visit!(a.type_arguments); $body }
                { let $slots = $visit!(a.elements); $many }
            }
            Object::GrowableObjectArray(g) => {
                { let $slot = $visit!(g.type_arguments); $body }
                { let $slot = $visit!(g.data); $body }
            }
            Object::Bigint(b) => {
                let $slot = $visit!(b.digits);
                $body
            }
            Object::ReceivePort(p) => {
                let $slot = $visit!(p.send_port);
                $body
            }
            Object::MirrorReference(m) => {
                let $slot = $visit!(m.referent);
                $body
            }
            Object::UserTag(t) => {
                let $slot = $visit!(t.label);
                $body
            }
            Object::Instance(i) => {
                let $slots = $visit!(i.fields);
                $many
            }
            Object::LinkedHashMap(_)
            | Object::Instructions(_)
            | Object::StackMap(_)
            | Object::Mint(_)
            | Object::Double(_)
            | Object::Bool(_)
            | Object::OneByteString(_)
            | Object::TwoByteString(_)
            | Object::FourByteString(_)
            | Object::SendPort(_)
            | Object::TypedData(_)
            | Object::ExternalTypedData(_) => {}
        }
    };
}

macro_rules! by_ref {
    ($place:expr) => {
        &$place
    };
}

macro_rules! by_mut {
    ($place:expr) => {
        &mut $place
    };
}

impl Visitable for Object {
    fn visit_edges(&self, visitor: &mut impl Visitor) {
        edges!(self, by_ref, slot => visitor.visit(*slot), slots => {
            for slot in slots.iter() {
                visitor.visit(*slot);
            }
        });
        if let Object::LinkedHashMap(map) = self {
            visitor.visit(map.type_arguments);
            for (key, value) in map.live_pairs() {
                visitor.visit(key);
                visitor.visit(value);
            }
        }
    }

    fn visit_edges_mut(&mut self, visitor: &mut impl Visitor) {
        edges!(self, by_mut, slot => visitor.visit_mut(slot), slots => {
            for slot in slots.iter_mut() {
                visitor.visit_mut(slot);
            }
        });
        if let Object::LinkedHashMap(map) = self {
            visitor.visit_mut(&mut map.type_arguments);
            for (key, value) in map.entries.iter_mut().flatten() {
                visitor.visit_mut(key);
                visitor.visit_mut(value);
            }
            // Keys may have been redirected; the bucket index is stale.
            map.index = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object::{Array, ObjectId, Type, TypeArguments};

    fn id(n: u32) -> Value {
        Value::Object(ObjectId::new(n))
    }

    #[test]
    fn collects_array_edges_in_order() {
        let array: Object = Array {
            type_arguments: id(1),
            elements: vec![Value::Smi(1), id(2), Value::Null],
        }
        .into();
        let mut seen = Vec::new();
        array.visit_edges(&mut Edges(|v| seen.push(v)));
        assert_eq!(seen, vec![id(1), Value::Smi(1), id(2), Value::Null]);
    }

    #[test]
    fn mutable_visit_rewrites_slots() {
        let mut ty: Object = Type {
            arguments: id(4),
            ..Default::default()
        }
        .into();
        ty.visit_edges_mut(&mut EdgesMut(|v: &mut Value| {
            if *v == id(4) {
                *v = id(9);
            }
        }));
        match &ty {
            Object::Type(t) => assert_eq!(t.arguments, id(9)),
            _ => unreachable!(),
        }
    }

    #[test]
    fn leaf_objects_have_no_edges() {
        let args: Object = TypeArguments::default().into();
        let mut count = 0;
        args.visit_edges(&mut Edges(|_| count += 1));
        assert_eq!(count, 0);
    }
}
