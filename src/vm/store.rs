use std::rc::Rc;

use super::heap::{EnvironmentId, FunctionData, ObjectKind, Property};
use super::intrinsics::Intrinsics;
use super::value::{ObjectId, Value};

/// The object model a realm runs on.
///
/// A store hands out object handles, keeps their prototype links and
/// properties, and records the global environment each object was created in.
/// The realm only talks to the engine through this trait; [`Heap`](super::Heap)
/// is the in-process implementation.
pub trait ObjectStore {
    /// Create an isolated global environment with its own built-ins.
    fn create_environment(&mut self) -> (EnvironmentId, ObjectId, Intrinsics);

    fn allocate(
        &mut self,
        environment: EnvironmentId,
        prototype: Option<ObjectId>,
        kind: ObjectKind,
    ) -> ObjectId;

    fn contains(&self, id: ObjectId) -> bool;

    /// The environment `id` was created in.
    fn environment_of(&self, id: ObjectId) -> EnvironmentId;

    fn prototype_of(&self, id: ObjectId) -> Option<ObjectId>;

    fn set_prototype(&mut self, id: ObjectId, prototype: Option<ObjectId>);

    fn kind(&self, id: ObjectId) -> &ObjectKind;

    fn set_kind(&mut self, id: ObjectId, kind: ObjectKind);

    fn get_own(&self, id: ObjectId, key: &str) -> Option<&Property>;

    /// Own property keys in definition order.
    fn own_keys(&self, id: ObjectId) -> Vec<Rc<str>>;

    fn define(&mut self, id: ObjectId, key: &str, property: Property);

    fn delete(&mut self, id: ObjectId, key: &str) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `id` itself followed by every object on its prototype chain.
    fn chain(&self, id: ObjectId) -> Vec<ObjectId> {
        let mut chain = vec![id];
        let mut current = self.prototype_of(id);
        while let Some(next) = current {
            if chain.contains(&next) {
                break;
            }
            chain.push(next);
            current = self.prototype_of(next);
        }
        chain
    }

    /// Whether `prototype` appears on the prototype chain of `id` (excluding `id`).
    fn inherits_from(&self, id: ObjectId, prototype: ObjectId) -> bool {
        self.chain(id).into_iter().skip(1).any(|ancestor| ancestor == prototype)
    }

    fn is_error(&self, id: ObjectId) -> bool {
        matches!(self.kind(id), ObjectKind::Error)
    }

    fn function(&self, id: ObjectId) -> Option<FunctionData> {
        match self.kind(id) {
            ObjectKind::Function(function) => Some(function.clone()),
            _ => None,
        }
    }

    fn is_callable(&self, id: ObjectId) -> bool {
        matches!(self.kind(id), ObjectKind::Function(_))
    }

    fn array_elements(&self, id: ObjectId) -> Option<&[Value]> {
        match self.kind(id) {
            ObjectKind::Array(elements) => Some(elements.as_slice()),
            _ => None,
        }
    }

    fn has_own(&self, id: ObjectId, key: &str) -> bool {
        self.get_own(id, key).is_some()
    }

    fn define_value(&mut self, id: ObjectId, key: &str, value: Value) {
        self.define(id, key, Property::Data(value));
    }

    /// Find `key` on `id` or its prototype chain.
    fn lookup(&self, id: ObjectId, key: &str) -> Option<(ObjectId, Property)> {
        self.chain(id).into_iter().find_map(|holder| {
            self.get_own(holder, key)
                .map(|property| (holder, property.clone()))
        })
    }

    /// Read an own data property without running accessors.
    fn own_data(&self, id: ObjectId, key: &str) -> Option<Value> {
        match self.get_own(id, key) {
            Some(Property::Data(value)) => Some(value.clone()),
            _ => None,
        }
    }

    /// The `name` data property of a function, if it is a string.
    fn function_name(&self, id: ObjectId) -> Option<Rc<str>> {
        match self.own_data(id, "name") {
            Some(Value::String(name)) => Some(name),
            _ => None,
        }
    }
}
