//! The bridge between untrusted script and host implementation objects.

mod error;
mod exceptions;
mod identity;
pub mod interceptors;
mod interface;
mod lock;
mod native;
mod primordials;
mod script;

use std::rc::Rc;
use std::time::Instant;

use anyhow::Context;
use tracing::{error, info};

pub use error::{AlreadyAssociatedError, LockProtocolError, ProtocolError, RealmError};
pub use exceptions::{Exception, ExceptionTranslator, HostError, HostErrorClass, Translator};
pub use identity::{
    HostObject, HostRef, IdentityMap, TypeTag, WeakHostRef, ABORT_SIGNAL, CUSTOM_EVENT,
    DOM_EXCEPTION, EVENT, EVENT_TARGET, HOST_ERROR, INTERFACE_OBJECT,
};
pub use interface::{InterfaceObject, InterfaceObjects, InterfaceRegistry, InterfaceRole};
pub use lock::{LockFrame, LockGuard, LockStack, TrustLevel};
pub use native::{
    after, before, catch, finally, After, Before, CallContext, Catch, Finally, Implementation,
    Interceptors, NativeFunction, NativeFunctionBuilder, NativeResult,
};
pub use primordials::Primordials;
pub use script::TO_STRING_TAG;

use crate::config::RealmConfig;
use crate::dom::{self, DetachedTree, DomTree, Event, EventTarget};
use crate::vm::{EnvironmentId, Heap, Intrinsics, ObjectId, ObjectStore, Value};

/// An isolated script environment and the host state bound to it.
pub struct Realm {
    config: RealmConfig,
    heap: Box<dyn ObjectStore>,
    environment: EnvironmentId,
    global: ObjectId,
    intrinsics: Intrinsics,
    primordials: Primordials,
    identity: IdentityMap,
    locks: Rc<LockStack>,
    translators: ExceptionTranslator,
    interfaces: InterfaceRegistry,
    tree: Rc<dyn DomTree>,
    global_target: Option<Rc<EventTarget>>,
    current_event: Option<Rc<Event>>,
    frames: Vec<Rc<str>>,
    time_origin: Instant,
    reported: Vec<String>,
}

impl Realm {
    pub fn new(config: RealmConfig) -> Result<Self, ProtocolError> {
        Self::with_tree(config, Rc::new(DetachedTree))
    }

    /// Create a realm whose event targets live in `tree`.
    pub fn with_tree(config: RealmConfig, tree: Rc<dyn DomTree>) -> Result<Self, ProtocolError> {
        Self::with_store(config, tree, Box::new(Heap::new()))
    }

    /// Create a realm whose objects live in `heap`.
    pub fn with_store(
        config: RealmConfig,
        tree: Rc<dyn DomTree>,
        mut heap: Box<dyn ObjectStore>,
    ) -> Result<Self, ProtocolError> {
        let (environment, global, intrinsics) = heap.create_environment();
        let primordials = Primordials::capture(&*heap, global);
        let mut realm = Self {
            config,
            heap,
            environment,
            global,
            intrinsics,
            primordials,
            identity: IdentityMap::new(),
            locks: Rc::new(LockStack::new()),
            translators: ExceptionTranslator::standard(),
            interfaces: InterfaceRegistry::default(),
            tree,
            global_target: None,
            current_event: None,
            frames: Vec::new(),
            time_origin: Instant::now(),
            reported: Vec::new(),
        };
        realm.associate_error_classes()?;
        dom::install(&mut realm)?;
        info!(
            target = "webrealm",
            global = %realm.config.global_name,
            primordials = realm.primordials.len(),
            "realm created"
        );
        Ok(realm)
    }

    /// Create a realm configured from `WEBREALM_CONFIG`, with logging set up.
    pub fn from_env() -> anyhow::Result<Self> {
        crate::telemetry::init_tracing();
        let config = RealmConfig::from_env().context("failed to load realm configuration")?;
        Realm::new(config).context("failed to create realm")
    }

    fn associate_error_classes(&mut self) -> Result<(), ProtocolError> {
        for error in self.intrinsics.errors.clone() {
            self.associate(
                error.constructor,
                HostRef::new(Rc::new(HostErrorClass {
                    kind: error.kind,
                    prototype: false,
                })),
            )?;
            self.associate(
                error.prototype,
                HostRef::new(Rc::new(HostErrorClass {
                    kind: error.kind,
                    prototype: true,
                })),
            )?;
        }
        Ok(())
    }

    pub fn config(&self) -> &RealmConfig {
        &self.config
    }

    /// Whether the global object claims `platform_type`, e.g. `Window`.
    pub fn is(&self, platform_type: &str) -> bool {
        self.config.is(platform_type)
    }

    pub fn global(&self) -> ObjectId {
        self.global
    }

    pub fn global_value(&self) -> Value {
        Value::Object(self.global)
    }

    pub fn environment(&self) -> EnvironmentId {
        self.environment
    }

    pub fn heap(&self) -> &dyn ObjectStore {
        &*self.heap
    }

    pub(crate) fn heap_mut(&mut self) -> &mut dyn ObjectStore {
        &mut *self.heap
    }

    pub fn intrinsics(&self) -> &Intrinsics {
        &self.intrinsics
    }

    pub fn primordials(&self) -> &Primordials {
        &self.primordials
    }

    pub fn primordial(&self, name: &str) -> Option<Value> {
        self.primordials.get(name).cloned()
    }

    /// Snapshot a value installed after realm creation.
    pub fn define_primordial(&mut self, name: &str, value: Value) {
        self.primordials.define(&*self.heap, name, value);
    }

    pub fn interfaces(&self) -> &InterfaceRegistry {
        &self.interfaces
    }

    pub(crate) fn interfaces_mut(&mut self) -> &mut InterfaceRegistry {
        &mut self.interfaces
    }

    pub fn translators_mut(&mut self) -> &mut ExceptionTranslator {
        &mut self.translators
    }

    pub fn tree(&self) -> Rc<dyn DomTree> {
        Rc::clone(&self.tree)
    }

    /// The global object's implementation, present in `Window` realms.
    pub fn global_target(&self) -> Option<Rc<EventTarget>> {
        self.global_target.clone()
    }

    pub(crate) fn set_global_target(&mut self, target: Rc<EventTarget>) {
        self.global_target = Some(target);
    }

    /// The event whose listeners are running (`window.event`).
    pub fn current_event(&self) -> Option<Rc<Event>> {
        self.current_event.clone()
    }

    pub(crate) fn replace_current_event(&mut self, event: Option<Rc<Event>>) -> Option<Rc<Event>> {
        std::mem::replace(&mut self.current_event, event)
    }

    /// Milliseconds since the realm was created.
    pub fn now(&self) -> f64 {
        self.time_origin.elapsed().as_secs_f64() * 1000.0
    }

    // Identity bridge.

    pub fn identity(&self) -> &IdentityMap {
        &self.identity
    }

    pub fn associate(&mut self, interface: ObjectId, implementation: HostRef) -> Result<(), ProtocolError> {
        self.identity.associate(interface, implementation).map_err(|err| {
            error!(target = "webrealm", error = %err, interface = %interface, "conflicting association");
            ProtocolError::from(err)
        })
    }

    pub fn implementation_of(&self, value: &Value) -> Option<HostRef> {
        self.identity.implementation_of(&*self.heap, value)
    }

    pub fn own_implementation_of(&self, value: &Value) -> Option<HostRef> {
        self.identity.own_implementation_of(value)
    }

    pub fn interface_of(&self, value: &Value) -> Option<ObjectId> {
        self.identity.interface_of(value)
    }

    pub fn own_interface_of(&self, value: &Value) -> Option<ObjectId> {
        self.identity.own_interface_of(value)
    }

    pub fn has_implementation(&self, value: &Value) -> bool {
        self.identity.has_implementation(&*self.heap, value)
    }

    pub fn has_own_implementation(&self, value: &Value) -> bool {
        self.identity.has_own_implementation(value)
    }

    pub fn has_interface(&self, value: &Value) -> bool {
        self.identity.has_interface(value)
    }

    pub fn has_own_interface(&self, value: &Value) -> bool {
        self.identity.has_own_interface(value)
    }

    pub fn dissociate_interface(&mut self, value: &Value) -> Option<HostRef> {
        self.identity.dissociate_interface(value)
    }

    pub fn dissociate_implementation(&mut self, value: &Value) -> Option<ObjectId> {
        self.identity.dissociate_implementation(value)
    }

    pub fn dissociate(&mut self, value: &Value) -> bool {
        self.identity.dissociate(value)
    }

    /// The interface object of `implementation`, created on first use.
    ///
    /// Its prototype is that of the nearest installed interface for the
    /// implementation's type tag.
    pub fn expose(&mut self, implementation: &HostRef) -> Result<ObjectId, ProtocolError> {
        if let Some(interface) = self.own_interface_of(&Value::Host(implementation.clone())) {
            return Ok(interface);
        }
        let tag = implementation.type_tag();
        let (prototype, unforgeables) = match self.interfaces.nearest(tag) {
            Some(objects) => (objects.prototype, objects.unforgeables.clone()),
            None => (self.intrinsics.object_prototype, Vec::new()),
        };
        let object = self.new_object_id(Some(prototype));
        self.associate(object, implementation.clone())?;
        self.install_unforgeables(object, &unforgeables);
        Ok(object)
    }

    // Privilege lock stack.

    pub fn locks(&self) -> &Rc<LockStack> {
        &self.locks
    }

    pub fn enter_lock(&self) {
        self.locks.enter_lock();
    }

    pub fn leave_lock(&self) -> Result<(), ProtocolError> {
        self.locks.leave_lock().map_err(|err| self.lock_violation(err))
    }

    pub fn enter_unlock(&self) {
        self.locks.enter_unlock();
    }

    pub fn leave_unlock(&self) -> Result<(), ProtocolError> {
        self.locks.leave_unlock().map_err(|err| self.lock_violation(err))
    }

    fn lock_violation(&self, err: LockProtocolError) -> ProtocolError {
        error!(target = "webrealm", error = %err, depth = self.locks.depth(), "lock stack violation");
        ProtocolError::from(err)
    }

    pub fn is_locked(&self) -> bool {
        self.locks.is_locked()
    }

    pub fn trust_level(&self) -> TrustLevel {
        self.locks.trust_level()
    }

    // Script execution.

    /// Run untrusted code under a lock frame.
    ///
    /// An uncaught exception is reported and returned as [`RealmError::Uncaught`].
    pub fn run_script<F>(&mut self, name: &str, script: F) -> Result<Value, RealmError>
    where
        F: FnOnce(&mut Realm) -> NativeResult,
    {
        let guard = self.locks.lock_guard();
        self.frames.push(Rc::from(name));
        let result = script(self);
        self.frames.pop();
        drop(guard);
        result.map_err(|exception| {
            let message = self.report_exception(&exception);
            RealmError::Uncaught {
                script: name.to_string(),
                message,
                exception,
            }
        })
    }

    /// Log an exception nobody caught and remember its description.
    pub fn report_exception(&mut self, exception: &Exception) -> String {
        let message = self.describe_exception(exception);
        error!(target = "webrealm", error = %message, "uncaught exception");
        self.reported.push(message.clone());
        message
    }

    /// Descriptions of every exception reported so far, oldest first.
    pub fn reported_exceptions(&self) -> &[String] {
        &self.reported
    }

    pub fn describe_exception(&mut self, exception: &Exception) -> String {
        match exception {
            Exception::Value(value) => self.to_display_string(value),
            Exception::Host(error) => error.to_string(),
            Exception::Fatal(err) => format!("protocol violation: {err}"),
        }
    }
}

impl std::fmt::Debug for Realm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Realm")
            .field("global_name", &self.config.global_name)
            .field("objects", &self.heap.len())
            .field("associations", &self.identity.len())
            .field("lock_depth", &self.locks.depth())
            .finish_non_exhaustive()
    }
}
