use std::any::Any;
use std::collections::HashMap;
use std::rc::Rc;

use super::identity::{HostObject, TypeTag, INTERFACE_OBJECT};
use crate::vm::ObjectId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceRole {
    Constructor,
    Prototype,
}

/// Host side of an interface constructor or its prototype object.
#[derive(Debug)]
pub struct InterfaceObject {
    tag: &'static TypeTag,
    role: InterfaceRole,
}

impl InterfaceObject {
    pub fn new(tag: &'static TypeTag, role: InterfaceRole) -> Self {
        Self { tag, role }
    }

    pub fn interface_tag(&self) -> &'static TypeTag {
        self.tag
    }

    pub fn role(&self) -> InterfaceRole {
        self.role
    }

    pub fn is(&self, tag: &'static TypeTag, role: InterfaceRole) -> bool {
        std::ptr::eq(self.tag, tag) && self.role == role
    }
}

impl HostObject for InterfaceObject {
    fn type_tag(&self) -> &'static TypeTag {
        &INTERFACE_OBJECT
    }

    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

/// Script objects making up one installed interface.
#[derive(Debug, Clone)]
pub struct InterfaceObjects {
    pub constructor: ObjectId,
    pub prototype: ObjectId,
    /// Accessors defined on every instance (`[LegacyUnforgeable]`).
    pub unforgeables: Vec<(Rc<str>, ObjectId)>,
}

#[derive(Debug, Default)]
pub struct InterfaceRegistry {
    by_name: HashMap<&'static str, InterfaceObjects>,
}

impl InterfaceRegistry {
    pub fn register(&mut self, tag: &'static TypeTag, objects: InterfaceObjects) {
        self.by_name.insert(tag.name, objects);
    }

    pub fn get(&self, tag: &'static TypeTag) -> Option<&InterfaceObjects> {
        self.by_name.get(tag.name)
    }

    pub fn get_mut(&mut self, tag: &'static TypeTag) -> Option<&mut InterfaceObjects> {
        self.by_name.get_mut(tag.name)
    }

    /// Interface objects of `tag` or of its nearest installed ancestor.
    pub fn nearest(&self, tag: &'static TypeTag) -> Option<&InterfaceObjects> {
        tag.lineage().find_map(|ancestor| self.get(ancestor))
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}
