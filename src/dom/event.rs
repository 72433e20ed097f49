use std::any::Any;
use std::cell::{Cell, Ref, RefCell};
use std::fmt;
use std::rc::Rc;

use super::event_target::EventTarget;
use crate::realm::{Exception, HostObject, Realm, TypeTag, CUSTOM_EVENT, EVENT};
use crate::vm::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u16)]
pub enum EventPhase {
    #[default]
    None = 0,
    Capturing = 1,
    AtTarget = 2,
    Bubbling = 3,
}

impl EventPhase {
    /// Constant names exposed on `Event` and `Event.prototype`.
    pub const CONSTANTS: [(&'static str, EventPhase); 4] = [
        ("NONE", EventPhase::None),
        ("CAPTURING_PHASE", EventPhase::Capturing),
        ("AT_TARGET", EventPhase::AtTarget),
        ("BUBBLING_PHASE", EventPhase::Bubbling),
    ];

    pub fn code(self) -> u16 {
        self as u16
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Event,
    Custom,
}

/// `EventInit` and `CustomEventInit` members.
#[derive(Debug, Clone, Default)]
pub struct EventInit {
    pub bubbles: bool,
    pub cancelable: bool,
    pub composed: bool,
    /// Present only for custom events.
    pub detail: Option<Value>,
}

impl EventInit {
    /// Read an init dictionary passed from script.
    pub fn from_value(realm: &mut Realm, kind: EventKind, init: &Value) -> Result<Self, Exception> {
        let mut result = EventInit {
            detail: (kind == EventKind::Custom).then_some(Value::Null),
            ..EventInit::default()
        };
        if !matches!(init, Value::Object(_)) {
            return Ok(result);
        }
        result.bubbles = realm.get(init, "bubbles")?.to_boolean();
        result.cancelable = realm.get(init, "cancelable")?.to_boolean();
        result.composed = realm.get(init, "composed")?.to_boolean();
        if kind == EventKind::Custom {
            let detail = realm.get(init, "detail")?;
            if !detail.is_undefined() {
                result.detail = Some(detail);
            }
        }
        Ok(result)
    }

    pub fn bubbles(mut self) -> Self {
        self.bubbles = true;
        self
    }

    pub fn cancelable(mut self) -> Self {
        self.cancelable = true;
        self
    }

    pub fn composed(mut self) -> Self {
        self.composed = true;
        self
    }

    pub fn detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

/// One step of an event path.
#[derive(Debug, Clone)]
pub struct PathEntry {
    pub invocation_target: Rc<EventTarget>,
    pub invocation_target_in_shadow_tree: bool,
    pub shadow_adjusted_target: Option<Rc<EventTarget>>,
    pub related_target: Option<Rc<EventTarget>>,
    pub touch_targets: Vec<Rc<EventTarget>>,
    pub root_of_closed_tree: bool,
    pub slot_in_closed_tree: bool,
}

/// Host side of `Event` and `CustomEvent`.
pub struct Event {
    kind: EventKind,
    event_type: RefCell<Rc<str>>,
    is_trusted: Cell<bool>,
    bubbles: Cell<bool>,
    cancelable: Cell<bool>,
    composed: Cell<bool>,
    time_stamp: Cell<f64>,
    phase: Cell<EventPhase>,
    stop_propagation: Cell<bool>,
    stop_immediate_propagation: Cell<bool>,
    canceled: Cell<bool>,
    in_passive_listener: Cell<bool>,
    initialized: Cell<bool>,
    dispatching: Cell<bool>,
    target: RefCell<Option<Rc<EventTarget>>>,
    current_target: RefCell<Option<Rc<EventTarget>>>,
    related_target: RefCell<Option<Rc<EventTarget>>>,
    touch_targets: RefCell<Vec<Rc<EventTarget>>>,
    path: RefCell<Vec<PathEntry>>,
    detail: RefCell<Value>,
}

impl Event {
    /// An uninitialized event, as `document.createEvent` would return.
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            event_type: RefCell::new(Rc::from("")),
            is_trusted: Cell::new(false),
            bubbles: Cell::new(false),
            cancelable: Cell::new(false),
            composed: Cell::new(false),
            time_stamp: Cell::new(0.0),
            phase: Cell::new(EventPhase::None),
            stop_propagation: Cell::new(false),
            stop_immediate_propagation: Cell::new(false),
            canceled: Cell::new(false),
            in_passive_listener: Cell::new(false),
            initialized: Cell::new(false),
            dispatching: Cell::new(false),
            target: RefCell::new(None),
            current_target: RefCell::new(None),
            related_target: RefCell::new(None),
            touch_targets: RefCell::new(Vec::new()),
            path: RefCell::new(Vec::new()),
            detail: RefCell::new(Value::Null),
        }
    }

    /// Create an initialized event of `event_type`.
    pub fn create(kind: EventKind, event_type: &str, init: EventInit, time_stamp: f64) -> Rc<Self> {
        let event = Self::new(kind);
        event.initialized.set(true);
        event.time_stamp.set(time_stamp);
        *event.event_type.borrow_mut() = Rc::from(event_type);
        event.bubbles.set(init.bubbles);
        event.cancelable.set(init.cancelable);
        event.composed.set(init.composed);
        if let Some(detail) = init.detail {
            *event.detail.borrow_mut() = detail;
        }
        Rc::new(event)
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn event_type(&self) -> Rc<str> {
        self.event_type.borrow().clone()
    }

    pub(crate) fn set_event_type(&self, event_type: Rc<str>) {
        *self.event_type.borrow_mut() = event_type;
    }

    pub fn is_trusted(&self) -> bool {
        self.is_trusted.get()
    }

    pub fn set_trusted(&self, trusted: bool) {
        self.is_trusted.set(trusted);
    }

    pub fn bubbles(&self) -> bool {
        self.bubbles.get()
    }

    pub fn cancelable(&self) -> bool {
        self.cancelable.get()
    }

    pub fn composed(&self) -> bool {
        self.composed.get()
    }

    pub fn time_stamp(&self) -> f64 {
        self.time_stamp.get()
    }

    pub fn phase(&self) -> EventPhase {
        self.phase.get()
    }

    pub(crate) fn set_phase(&self, phase: EventPhase) {
        self.phase.set(phase);
    }

    pub fn target(&self) -> Option<Rc<EventTarget>> {
        self.target.borrow().clone()
    }

    pub(crate) fn set_target(&self, target: Option<Rc<EventTarget>>) {
        *self.target.borrow_mut() = target;
    }

    pub fn current_target(&self) -> Option<Rc<EventTarget>> {
        self.current_target.borrow().clone()
    }

    pub(crate) fn set_current_target(&self, target: Option<Rc<EventTarget>>) {
        *self.current_target.borrow_mut() = target;
    }

    pub fn related_target(&self) -> Option<Rc<EventTarget>> {
        self.related_target.borrow().clone()
    }

    /// Set by hosts creating events such as `mouseover`, before dispatch.
    pub fn set_related_target(&self, target: Option<Rc<EventTarget>>) {
        *self.related_target.borrow_mut() = target;
    }

    pub fn touch_targets(&self) -> Vec<Rc<EventTarget>> {
        self.touch_targets.borrow().clone()
    }

    pub fn set_touch_targets(&self, targets: Vec<Rc<EventTarget>>) {
        *self.touch_targets.borrow_mut() = targets;
    }

    pub fn detail(&self) -> Value {
        self.detail.borrow().clone()
    }

    pub fn initialized(&self) -> bool {
        self.initialized.get()
    }

    pub fn dispatching(&self) -> bool {
        self.dispatching.get()
    }

    pub(crate) fn set_dispatching(&self, dispatching: bool) {
        self.dispatching.set(dispatching);
    }

    pub fn propagation_stopped(&self) -> bool {
        self.stop_propagation.get()
    }

    pub fn immediate_propagation_stopped(&self) -> bool {
        self.stop_immediate_propagation.get()
    }

    pub fn in_passive_listener(&self) -> bool {
        self.in_passive_listener.get()
    }

    pub(crate) fn set_in_passive_listener(&self, passive: bool) {
        self.in_passive_listener.set(passive);
    }

    pub fn default_prevented(&self) -> bool {
        self.canceled.get()
    }

    pub fn stop_propagation(&self) {
        self.stop_propagation.set(true);
    }

    pub fn stop_immediate_propagation(&self) {
        self.stop_propagation.set(true);
        self.stop_immediate_propagation.set(true);
    }

    /// Cancel the event, unless it is not cancelable or a passive listener runs.
    pub fn set_the_canceled_flag(&self) {
        if self.cancelable.get() && !self.in_passive_listener.get() {
            self.canceled.set(true);
        }
    }

    pub fn prevent_default(&self) {
        self.set_the_canceled_flag();
    }

    pub fn cancel_bubble(&self) -> bool {
        self.stop_propagation.get()
    }

    /// Setting `true` stops propagation. `false` is ignored.
    pub fn set_cancel_bubble(&self, value: bool) {
        if value {
            self.stop_propagation.set(true);
        }
    }

    pub fn return_value(&self) -> bool {
        !self.canceled.get()
    }

    /// Setting `false` cancels the event. `true` is ignored.
    pub fn set_return_value(&self, value: bool) {
        if !value {
            self.set_the_canceled_flag();
        }
    }

    /// Reset the event for `initEvent`.
    pub fn initialize(&self, event_type: &str, bubbles: bool, cancelable: bool) {
        self.initialized.set(true);
        self.stop_propagation.set(false);
        self.stop_immediate_propagation.set(false);
        self.canceled.set(false);
        self.is_trusted.set(false);
        self.set_target(None);
        *self.event_type.borrow_mut() = Rc::from(event_type);
        self.bubbles.set(bubbles);
        self.cancelable.set(cancelable);
    }

    /// `initEvent`. Does nothing while the event is being dispatched.
    pub fn init_event(&self, event_type: &str, bubbles: bool, cancelable: bool) {
        if self.dispatching() {
            return;
        }
        self.initialize(event_type, bubbles, cancelable);
    }

    /// `initCustomEvent`. Does nothing while the event is being dispatched.
    pub fn init_custom_event(&self, event_type: &str, bubbles: bool, cancelable: bool, detail: Value) {
        if self.dispatching() {
            return;
        }
        self.initialize(event_type, bubbles, cancelable);
        *self.detail.borrow_mut() = detail;
    }

    pub fn path(&self) -> Ref<'_, Vec<PathEntry>> {
        self.path.borrow()
    }

    pub(crate) fn push_path_entry(&self, entry: PathEntry) {
        self.path.borrow_mut().push(entry);
    }

    pub(crate) fn path_entry(&self, index: usize) -> Option<PathEntry> {
        self.path.borrow().get(index).cloned()
    }

    pub(crate) fn clear_path(&self) {
        self.path.borrow_mut().clear();
    }

    pub(crate) fn clear_propagation_flags(&self) {
        self.stop_propagation.set(false);
        self.stop_immediate_propagation.set(false);
    }

    /// The targets listeners of the current target may observe.
    ///
    /// Entries inside closed shadow trees the current target cannot see are
    /// hidden.
    pub fn composed_path(&self) -> Vec<Rc<EventTarget>> {
        let path = self.path.borrow();
        if path.is_empty() {
            return Vec::new();
        }
        let Some(current_target) = self.current_target() else {
            return Vec::new();
        };
        let mut composed = vec![Rc::clone(&current_target)];

        let mut current_index = 0;
        let mut current_target_hidden_level = 0i64;
        let mut index = path.len() as i64 - 1;
        while index >= 0 {
            let entry = &path[index as usize];
            if entry.root_of_closed_tree {
                current_target_hidden_level += 1;
            }
            if Rc::ptr_eq(&entry.invocation_target, &current_target) {
                current_index = index;
                break;
            }
            if entry.slot_in_closed_tree {
                current_target_hidden_level -= 1;
            }
            index -= 1;
        }

        let mut current_hidden_level = current_target_hidden_level;
        let mut max_hidden_level = current_hidden_level;
        let mut index = current_index - 1;
        while index >= 0 {
            let entry = &path[index as usize];
            if entry.root_of_closed_tree {
                current_hidden_level += 1;
            }
            if current_hidden_level <= max_hidden_level {
                composed.insert(0, Rc::clone(&entry.invocation_target));
            }
            if entry.slot_in_closed_tree {
                current_hidden_level -= 1;
                if current_hidden_level < max_hidden_level {
                    max_hidden_level = current_hidden_level;
                }
            }
            index -= 1;
        }

        let mut current_hidden_level = current_target_hidden_level;
        let mut max_hidden_level = current_target_hidden_level;
        let mut index = current_index as usize + 1;
        while index < path.len() {
            let entry = &path[index];
            if entry.slot_in_closed_tree {
                current_hidden_level += 1;
            }
            if current_hidden_level <= max_hidden_level {
                composed.push(Rc::clone(&entry.invocation_target));
            }
            if entry.root_of_closed_tree {
                current_hidden_level -= 1;
                if current_hidden_level < max_hidden_level {
                    max_hidden_level = current_hidden_level;
                }
            }
            index += 1;
        }
        composed
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("kind", &self.kind)
            .field("type", &self.event_type.borrow())
            .field("trusted", &self.is_trusted.get())
            .field("phase", &self.phase.get())
            .field("dispatching", &self.dispatching.get())
            .field("canceled", &self.canceled.get())
            .finish_non_exhaustive()
    }
}

impl HostObject for Event {
    fn type_tag(&self) -> &'static TypeTag {
        match self.kind {
            EventKind::Event => &EVENT,
            EventKind::Custom => &CUSTOM_EVENT,
        }
    }

    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}
