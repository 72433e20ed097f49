use std::collections::BTreeMap;

use crate::vm::{ObjectStore, ObjectId, Property, Value};

/// Built-in values of a realm, captured before untrusted code runs.
///
/// Keys are dotted paths from the global object (`TypeError.prototype`).
/// Accessors are stored as `name[[get]]` and `name[[set]]`.
#[derive(Debug, Clone, Default)]
pub struct Primordials {
    values: BTreeMap<String, Value>,
}

impl Primordials {
    pub fn capture(heap: &dyn ObjectStore, global: ObjectId) -> Self {
        let mut primordials = Self::default();
        primordials.copy_all(heap, "", global, &mut Vec::new());
        primordials
    }

    /// Record `value` under `name`, along with everything reachable from it.
    pub fn define(&mut self, heap: &dyn ObjectStore, name: &str, value: Value) {
        self.copy_property(name, &Property::Data(value.clone()));
        if let Value::Object(id) = value {
            self.copy_all(heap, &format!("{name}."), id, &mut Vec::new());
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn object(&self, name: &str) -> Option<ObjectId> {
        self.get(name).and_then(Value::as_object)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    fn copy_all(&mut self, heap: &dyn ObjectStore, prefix: &str, source: ObjectId, stack: &mut Vec<ObjectId>) {
        if stack.contains(&source) {
            return;
        }
        stack.push(source);
        for key in heap.own_keys(source) {
            let Some(property) = heap.get_own(source, &key).cloned() else {
                continue;
            };
            let name = format!("{prefix}{key}");
            self.copy_property(&name, &property);
            if let Property::Data(Value::Object(child)) = property {
                self.copy_all(heap, &format!("{name}."), child, stack);
            }
        }
        stack.pop();
    }

    fn copy_property(&mut self, name: &str, property: &Property) {
        match property {
            Property::Data(value) => {
                self.values.insert(name.to_string(), value.clone());
            }
            Property::Accessor { get, set } => {
                if let Some(getter) = get {
                    self.values
                        .insert(format!("{name}[[get]]"), Value::Object(*getter));
                }
                if let Some(setter) = set {
                    self.values
                        .insert(format!("{name}[[set]]"), Value::Object(*setter));
                }
            }
        }
    }
}
