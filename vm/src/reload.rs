//! Pairing of program elements across a library replacement.

use heap::Heap;
use object::{Class, Library, Value};

use crate::canonical::MetadataMap;

fn class_members(heap: &Heap, class: Value, out: &mut Vec<Value>) {
    let Some(class) = heap.get_value::<Class>(class) else {
        return;
    };
    out.extend(&class.type_parameters);
    out.extend(&class.fields);
    out.extend(&class.functions);
}

/// Classes of `library` followed by their members.
fn library_elements(heap: &Heap, library: Value) -> Vec<Value> {
    let mut elements = Vec::new();
    let Some(library) = heap.get_value::<Library>(library) else {
        return elements;
    };
    for class in &library.classes {
        elements.push(*class);
        class_members(heap, *class, &mut elements);
    }
    elements
}

/// Pairs every element of `new_library` with its counterpart in
/// `old_library`, matching by name and owner chain. Elements without a
/// counterpart are left out. Pairs are `(old, new)` in the order the new
/// library declares them.
pub fn match_library_elements(heap: &Heap, old_library: Value, new_library: Value) -> Vec<(Value, Value)> {
    let old_elements = library_elements(heap, old_library);
    let mut old = MetadataMap::new(old_elements.len());
    for element in old_elements {
        old.insert(heap, element, element);
    }

    let pairs: Vec<_> = library_elements(heap, new_library)
        .into_iter()
        .filter_map(|element| {
            let counterpart = old.get_or_null(heap, &element);
            (!counterpart.is_null()).then_some((counterpart, element))
        })
        .collect();
    log::debug!("reload: matched {} of {} old elements", pairs.len(), old.len());
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ProgramBuilder;
    use crate::intern::InternTable;
    use heap::HeapSettings;

    struct Shape {
        library: Value,
        class: Value,
        field: Value,
        method: Value,
        parameter: Value,
    }

    fn declare(builder: &mut ProgramBuilder<'_>, extra_class: bool) -> Shape {
        let library = builder.library("package:app/app.dart");
        let point = builder.class(library, "Point");
        let parameter = builder.type_parameter(point, "T", Value::Null);
        let field = builder.add_field(point, "x", Value::Null, false);
        let method = builder.add_function(point, "norm", Value::Null, &[]);
        if extra_class {
            let line = builder.class(library, "Line");
            builder.add_field(line, "x", Value::Null, false);
        }
        let class = builder.heap().class_at(point);
        Shape {
            library,
            class,
            field,
            method,
            parameter,
        }
    }

    #[test]
    fn members_pair_by_name_and_owner() {
        let mut heap = Heap::new(HeapSettings::default());
        let mut interns = InternTable::default();
        let mut builder = ProgramBuilder::new(&mut heap, &mut interns);
        let old = declare(&mut builder, false);
        let new = declare(&mut builder, true);

        let pairs = match_library_elements(&heap, old.library, new.library);
        assert_eq!(
            pairs,
            vec![
                (old.class, new.class),
                (old.parameter, new.parameter),
                (old.field, new.field),
                (old.method, new.method),
            ]
        );
    }

    #[test]
    fn libraries_with_different_urls_share_nothing() {
        let mut heap = Heap::new(HeapSettings::default());
        let mut interns = InternTable::default();
        let mut builder = ProgramBuilder::new(&mut heap, &mut interns);
        let old = declare(&mut builder, false);
        let other = builder.library("package:app/other.dart");
        let point = builder.class(other, "Point");
        builder.add_field(point, "x", Value::Null, false);

        assert!(match_library_elements(&heap, old.library, other).is_empty());
    }
}
