//! Construction of program structure without a front end.

use heap::Heap;
use object::{
    Class, ClassId, Field, Function, FunctionKind, Library, Script, ScriptKind, Type,
    TypeArguments, TypeParameter, TypeState, Value,
};

use crate::intern::InternTable;

/// Allocates libraries, classes, types and members with interned names.
///
/// Everything is left unfinalized; run the
/// [`ClassFinalizer`](crate::ClassFinalizer) afterwards.
pub struct ProgramBuilder<'a> {
    heap: &'a mut Heap,
    interns: &'a mut InternTable,
}

impl<'a> ProgramBuilder<'a> {
    pub fn new(heap: &'a mut Heap, interns: &'a mut InternTable) -> Self {
        Self { heap, interns }
    }

    pub fn heap(&mut self) -> &mut Heap {
        self.heap
    }

    pub fn symbol(&mut self, text: &str) -> Value {
        self.interns.symbol(self.heap, text)
    }

    pub fn library(&mut self, url: &str) -> Value {
        let name = url.rsplit([':', '/']).next().unwrap_or(url);
        let library = Library {
            name: self.symbol(name),
            url: self.symbol(url),
            index: self.heap.libraries().len() as i32,
            is_core: url == "dart:core",
            ..Default::default()
        };
        let id = self.heap.allocate(ClassId::LIBRARY, library);
        self.heap.add_library(id);
        id.into()
    }

    pub fn script(&mut self, library: Value, url: &str, source: &str, kind: ScriptKind) -> Value {
        let script = Script {
            url: self.symbol(url),
            source: self.heap.new_string(source).into(),
            kind,
        };
        let script: Value = self.heap.allocate(ClassId::SCRIPT, script).into();
        if let Some(library) = library.as_object().and_then(|id| self.heap.get_mut::<Library>(id)) {
            library.scripts.push(script);
        }
        script
    }

    /// A new program class under the next free class id.
    pub fn class(&mut self, library: Value, name: &str) -> ClassId {
        let class_id = self.heap.allocate_class_id();
        self.class_at(class_id, library, name)
    }

    /// A class under a fixed id, used for the predefined classes.
    pub fn class_at(&mut self, class_id: ClassId, library: Value, name: &str) -> ClassId {
        let script = self
            .heap
            .get_value::<Library>(library)
            .and_then(|l| l.scripts.first().copied())
            .unwrap_or(Value::Null);
        let class = Class {
            id: class_id,
            name: self.symbol(name),
            library,
            script,
            ..Default::default()
        };
        let id = self.heap.allocate(ClassId::CLASS, class);
        self.heap.register_class(id);
        if let Some(library) = library.as_object().and_then(|l| self.heap.get_mut::<Library>(l)) {
            library.classes.push(id.into());
        }
        class_id
    }

    /// Appends a type parameter to `class`; `bound` null means unbounded.
    pub fn type_parameter(&mut self, class: ClassId, name: &str, bound: Value) -> Value {
        let index = self
            .heap
            .class(class)
            .map_or(0, |c| c.num_type_parameters()) as u16;
        let parameter = TypeParameter {
            parameterized_class_id: class,
            index,
            name: self.symbol(name),
            bound,
            ..Default::default()
        };
        let parameter: Value = self.heap.allocate(ClassId::TYPE_PARAMETER, parameter).into();
        if let Some(c) = self.heap.class_mut(class) {
            c.type_parameters.push(parameter);
        }
        parameter
    }

    /// `class<arguments>` with only the class's own arguments, as written
    /// in source.
    pub fn ty(&mut self, class: ClassId, arguments: &[Value]) -> Value {
        let arguments = if arguments.is_empty() {
            Value::Null
        } else {
            self.heap
                .allocate(
                    ClassId::TYPE_ARGUMENTS,
                    TypeArguments {
                        types: arguments.to_vec(),
                        ..Default::default()
                    },
                )
                .into()
        };
        self.heap
            .allocate(
                ClassId::TYPE,
                Type {
                    type_class_id: class,
                    arguments,
                    state: TypeState::Allocated,
                    ..Default::default()
                },
            )
            .into()
    }

    pub fn set_super(&mut self, class: ClassId, super_type: Value) {
        if let Some(c) = self.heap.class_mut(class) {
            c.super_type = super_type;
        }
    }

    pub fn add_interface(&mut self, class: ClassId, interface: Value) {
        if let Some(c) = self.heap.class_mut(class) {
            c.interfaces.push(interface);
        }
    }

    pub fn add_field(&mut self, class: ClassId, name: &str, ty: Value, is_static: bool) -> Value {
        let field = Field {
            name: self.symbol(name),
            owner: self.heap.class_at(class),
            ty,
            is_static,
            ..Default::default()
        };
        let field: Value = self.heap.allocate(ClassId::FIELD, field).into();
        if let Some(c) = self.heap.class_mut(class) {
            c.fields.push(field);
        }
        field
    }

    /// A regular instance method.
    pub fn add_function(
        &mut self,
        class: ClassId,
        name: &str,
        result_type: Value,
        parameters: &[(&str, Value)],
    ) -> Value {
        let mut parameter_names = Vec::with_capacity(parameters.len());
        for (name, _) in parameters {
            parameter_names.push(self.symbol(name));
        }
        let function = Function {
            name: self.symbol(name),
            owner: self.heap.class_at(class),
            kind: FunctionKind::Regular,
            result_type,
            parameter_types: parameters.iter().map(|(_, ty)| *ty).collect(),
            parameter_names,
            ..Default::default()
        };
        let function: Value = self.heap.allocate(ClassId::FUNCTION, function).into();
        if let Some(c) = self.heap.class_mut(class) {
            c.functions.push(function);
        }
        function
    }
}
