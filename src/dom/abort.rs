use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use super::event::EventInit;
use super::event_target::EventTarget;
use crate::realm::{HostObject, HostRef, ProtocolError, Realm, TypeTag, ABORT_SIGNAL};
use crate::vm::Value;

type AbortAlgorithm = Box<dyn FnOnce()>;

/// Host side of an `AbortSignal`.
pub struct AbortSignal {
    target: Rc<EventTarget>,
    aborted: Cell<bool>,
    reason: RefCell<Value>,
    algorithms: RefCell<Vec<AbortAlgorithm>>,
}

impl AbortSignal {
    pub fn new() -> Rc<Self> {
        let signal = Rc::new(Self {
            target: EventTarget::new(),
            aborted: Cell::new(false),
            reason: RefCell::new(Value::Undefined),
            algorithms: RefCell::new(Vec::new()),
        });
        signal.target.set_owner(&HostRef::new(Rc::clone(&signal)));
        signal
    }

    /// The event target `abort` events are fired at.
    pub fn target(&self) -> &Rc<EventTarget> {
        &self.target
    }

    pub fn aborted(&self) -> bool {
        self.aborted.get()
    }

    pub fn reason(&self) -> Value {
        self.reason.borrow().clone()
    }

    /// Run `algorithm` when the signal aborts. Ignored once aborted.
    pub fn add<F>(&self, algorithm: F)
    where
        F: FnOnce() + 'static,
    {
        if self.aborted() {
            return;
        }
        self.algorithms.borrow_mut().push(Box::new(algorithm));
    }

    /// Mark the signal aborted and run its algorithms once, in order.
    ///
    /// Returns `false` when it was already aborted.
    pub fn abort(&self, reason: Value) -> bool {
        if self.aborted.replace(true) {
            return false;
        }
        *self.reason.borrow_mut() = reason;
        let algorithms = std::mem::take(&mut *self.algorithms.borrow_mut());
        for algorithm in algorithms {
            algorithm();
        }
        true
    }
}

impl fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortSignal")
            .field("aborted", &self.aborted.get())
            .field("algorithms", &self.algorithms.borrow().len())
            .finish()
    }
}

impl HostObject for AbortSignal {
    fn type_tag(&self) -> &'static TypeTag {
        &ABORT_SIGNAL
    }

    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

impl Realm {
    /// Abort `signal` and fire `abort` at it.
    ///
    /// An undefined `reason` becomes an `AbortError` DOMException.
    pub fn abort_signal(&mut self, signal: &Rc<AbortSignal>, reason: Value) -> Result<bool, ProtocolError> {
        if signal.aborted() {
            return Ok(false);
        }
        let reason = match reason {
            Value::Undefined => self
                .dom_exception("signal is aborted without reason", "AbortError")
                .value()
                .cloned()
                .unwrap_or_default(),
            reason => reason,
        };
        signal.abort(reason);
        self.fire_event(signal.target(), "abort", EventInit::default())?;
        Ok(true)
    }
}
