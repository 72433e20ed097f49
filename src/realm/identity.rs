use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::{Rc, Weak};

use super::error::AlreadyAssociatedError;
use crate::vm::{ObjectStore, ObjectId, Value};

/// Names a family of implementation objects, with its single parent family.
///
/// Implementation lookups compare tags instead of walking script-visible
/// prototype chains.
#[derive(Debug)]
pub struct TypeTag {
    pub name: &'static str,
    pub parent: Option<&'static TypeTag>,
}

impl TypeTag {
    pub const fn new(name: &'static str, parent: Option<&'static TypeTag>) -> Self {
        Self { name, parent }
    }

    /// Whether `self` is `other` or descends from it.
    pub fn is_a(&'static self, other: &'static TypeTag) -> bool {
        let mut current = Some(self);
        while let Some(tag) = current {
            if std::ptr::eq(tag, other) {
                return true;
            }
            current = tag.parent;
        }
        false
    }

    /// `self` followed by its ancestors.
    pub fn lineage(&'static self) -> impl Iterator<Item = &'static TypeTag> {
        std::iter::successors(Some(self), |tag| tag.parent)
    }
}

pub static EVENT_TARGET: TypeTag = TypeTag::new("EventTarget", None);
pub static EVENT: TypeTag = TypeTag::new("Event", None);
pub static CUSTOM_EVENT: TypeTag = TypeTag::new("CustomEvent", Some(&EVENT));
pub static DOM_EXCEPTION: TypeTag = TypeTag::new("DOMException", None);
pub static ABORT_SIGNAL: TypeTag = TypeTag::new("AbortSignal", Some(&EVENT_TARGET));
pub static HOST_ERROR: TypeTag = TypeTag::new("HostError", None);
pub static INTERFACE_OBJECT: TypeTag = TypeTag::new("InterfaceObject", None);

/// A host-only implementation object.
pub trait HostObject: Any {
    fn type_tag(&self) -> &'static TypeTag;

    fn into_any(self: Rc<Self>) -> Rc<dyn Any>;

    /// The implementation this one extends, consulted by `interface_of`.
    fn parent_implementation(&self) -> Option<HostRef> {
        None
    }
}

/// Shared handle to an implementation object. Compares by identity.
#[derive(Clone)]
pub struct HostRef(Rc<dyn HostObject>);

impl HostRef {
    pub fn new<T: HostObject>(object: Rc<T>) -> Self {
        Self(object)
    }

    pub fn type_tag(&self) -> &'static TypeTag {
        self.0.type_tag()
    }

    pub fn downcast<T: HostObject>(&self) -> Option<Rc<T>> {
        self.0.clone().into_any().downcast::<T>().ok()
    }

    pub fn is<T: HostObject>(&self) -> bool {
        self.downcast::<T>().is_some()
    }

    pub fn ptr_eq(&self, other: &HostRef) -> bool {
        self.address() == other.address()
    }

    fn address(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }

    pub fn downgrade(&self) -> WeakHostRef {
        WeakHostRef(Rc::downgrade(&self.0))
    }

    fn parent(&self) -> Option<HostRef> {
        self.0.parent_implementation()
    }
}

/// Non-owning [`HostRef`], for back references from a part to its owner.
#[derive(Clone)]
pub struct WeakHostRef(Weak<dyn HostObject>);

impl WeakHostRef {
    pub fn upgrade(&self) -> Option<HostRef> {
        self.0.upgrade().map(HostRef)
    }
}

impl fmt::Debug for WeakHostRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(host) => write!(f, "Weak({host:?})"),
            None => f.write_str("Weak(dropped)"),
        }
    }
}

impl<T: HostObject> From<Rc<T>> for HostRef {
    fn from(object: Rc<T>) -> Self {
        HostRef::new(object)
    }
}

impl PartialEq for HostRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for HostRef {}

impl Hash for HostRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address().hash(state);
    }
}

impl fmt::Debug for HostRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostRef({}@{:#x})", self.type_tag().name, self.address())
    }
}

/// Bidirectional interface/implementation registry of one realm.
#[derive(Debug, Default)]
pub struct IdentityMap {
    implementations: HashMap<ObjectId, HostRef>,
    interfaces: HashMap<HostRef, ObjectId>,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Link `interface` and `implementation`. Linking the same pair twice is a no-op.
    pub fn associate(
        &mut self,
        interface: ObjectId,
        implementation: HostRef,
    ) -> Result<(), AlreadyAssociatedError> {
        if let Some(existing) = self.implementations.get(&interface) {
            if *existing == implementation {
                return Ok(());
            }
            return Err(AlreadyAssociatedError::Interface);
        }
        if let Some(existing) = self.interfaces.get(&implementation) {
            if *existing == interface {
                return Ok(());
            }
            return Err(AlreadyAssociatedError::Implementation);
        }
        self.implementations.insert(interface, implementation.clone());
        self.interfaces.insert(implementation, interface);
        Ok(())
    }

    pub fn own_implementation_of(&self, value: &Value) -> Option<HostRef> {
        let id = value.as_object()?;
        self.implementations.get(&id).cloned()
    }

    /// Implementation of `value` or of the nearest prototype that has one.
    pub fn implementation_of(&self, heap: &dyn ObjectStore, value: &Value) -> Option<HostRef> {
        let id = value.as_object()?;
        heap.chain(id)
            .into_iter()
            .find_map(|ancestor| self.implementations.get(&ancestor).cloned())
    }

    pub fn own_interface_of(&self, value: &Value) -> Option<ObjectId> {
        let host = value.as_host()?;
        self.interfaces.get(host).copied()
    }

    /// Interface of `value` or of the nearest parent implementation that has one.
    pub fn interface_of(&self, value: &Value) -> Option<ObjectId> {
        let mut current = value.as_host().cloned();
        while let Some(host) = current {
            if let Some(id) = self.interfaces.get(&host) {
                return Some(*id);
            }
            current = host.parent();
        }
        None
    }

    pub fn has_own_implementation(&self, value: &Value) -> bool {
        self.own_implementation_of(value).is_some()
    }

    pub fn has_implementation(&self, heap: &dyn ObjectStore, value: &Value) -> bool {
        self.implementation_of(heap, value).is_some()
    }

    pub fn has_own_interface(&self, value: &Value) -> bool {
        self.own_interface_of(value).is_some()
    }

    pub fn has_interface(&self, value: &Value) -> bool {
        self.interface_of(value).is_some()
    }

    /// Remove the association held by the interface object `value`.
    pub fn dissociate_interface(&mut self, value: &Value) -> Option<HostRef> {
        let id = value.as_object()?;
        let implementation = self.implementations.remove(&id)?;
        self.interfaces.remove(&implementation);
        Some(implementation)
    }

    /// Remove the association held by the implementation object `value`.
    pub fn dissociate_implementation(&mut self, value: &Value) -> Option<ObjectId> {
        let host = value.as_host()?;
        let id = self.interfaces.remove(host)?;
        self.implementations.remove(&id);
        Some(id)
    }

    /// Remove whichever association `value` takes part in.
    pub fn dissociate(&mut self, value: &Value) -> bool {
        match value {
            Value::Object(_) => self.dissociate_interface(value).is_some(),
            Value::Host(_) => self.dissociate_implementation(value).is_some(),
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.implementations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.implementations.is_empty()
    }
}
