use object::Value;

macro_rules! object_store {
    ($($(#[$meta:meta])* $field:ident),* $(,)?) => {
        /// Well-known objects every isolate group starts from.
        ///
        /// The field order is the order the full snapshot writes them in.
        #[derive(Debug, Clone, Default)]
        pub struct ObjectStore {
            $($(#[$meta])* pub $field: Value,)*
        }

        impl ObjectStore {
            pub const NAMES: &'static [&'static str] = &[$(stringify!($field)),*];

            pub fn roots(&self) -> Vec<Value> {
                vec![$(self.$field),*]
            }

            pub fn roots_mut(&mut self) -> Vec<&mut Value> {
                vec![$(&mut self.$field),*]
            }
        }
    };
}

object_store! {
    object_type,
    null_type,
    dynamic_type,
    void_type,
    number_type,
    int_type,
    double_type,
    string_type,
    bool_type,
    /// `List`, the class behind literal arrays.
    list_class,
    true_value,
    false_value,
    core_library,
    /// Canonical empty type argument vector.
    empty_type_arguments,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roots_follow_field_order() {
        let mut store = ObjectStore {
            int_type: Value::Smi(5),
            ..Default::default()
        };
        let position = ObjectStore::NAMES
            .iter()
            .position(|name| *name == "int_type")
            .unwrap();
        assert_eq!(store.roots()[position], Value::Smi(5));
        *store.roots_mut()[position] = Value::Smi(6);
        assert_eq!(store.int_type, Value::Smi(6));
        assert_eq!(store.roots().len(), ObjectStore::NAMES.len());
    }
}
