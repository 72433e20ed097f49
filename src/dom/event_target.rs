use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use super::abort::AbortSignal;
use crate::realm::{Exception, HostObject, HostRef, Realm, TypeTag, WeakHostRef, EVENT_TARGET};
use crate::vm::Value;

static NEXT_TARGET_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity of an event target, used to key tree collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(u64);

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "target#{}", self.0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ListenerOptions {
    pub capture: bool,
    pub once: bool,
    pub passive: bool,
    pub signal: Option<Rc<AbortSignal>>,
}

pub struct Listener {
    event_type: Rc<str>,
    callback: Value,
    capture: bool,
    once: bool,
    passive: bool,
    signal: Option<Rc<AbortSignal>>,
    removed: Cell<bool>,
}

impl Listener {
    pub fn new(event_type: &str, callback: Value, options: ListenerOptions) -> Self {
        Self {
            event_type: Rc::from(event_type),
            callback,
            capture: options.capture,
            once: options.once,
            passive: options.passive,
            signal: options.signal,
            removed: Cell::new(false),
        }
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn callback(&self) -> &Value {
        &self.callback
    }

    pub fn capture(&self) -> bool {
        self.capture
    }

    pub fn once(&self) -> bool {
        self.once
    }

    pub fn passive(&self) -> bool {
        self.passive
    }

    pub fn removed(&self) -> bool {
        self.removed.get()
    }

    fn matches(&self, event_type: &str, callback: &Value, capture: bool) -> bool {
        self.capture == capture && &*self.event_type == event_type && self.callback == *callback
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("type", &self.event_type)
            .field("callback", &self.callback)
            .field("capture", &self.capture)
            .field("once", &self.once)
            .field("passive", &self.passive)
            .field("removed", &self.removed.get())
            .finish()
    }
}

/// Host side of an `EventTarget`: an ordered listener list.
pub struct EventTarget {
    id: TargetId,
    listeners: RefCell<Vec<Rc<Listener>>>,
    owner: RefCell<Option<WeakHostRef>>,
}

impl EventTarget {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            id: TargetId(NEXT_TARGET_ID.fetch_add(1, Ordering::Relaxed)),
            listeners: RefCell::new(Vec::new()),
            owner: RefCell::new(None),
        })
    }

    pub fn id(&self) -> TargetId {
        self.id
    }

    /// Make `owner` stand in for this target wherever script observes it.
    pub fn set_owner(&self, owner: &HostRef) {
        *self.owner.borrow_mut() = Some(owner.downgrade());
    }

    pub fn owner(&self) -> Option<HostRef> {
        self.owner.borrow().as_ref().and_then(WeakHostRef::upgrade)
    }

    /// The implementation script sees for this target.
    pub fn host_ref(self: &Rc<Self>) -> HostRef {
        self.owner().unwrap_or_else(|| HostRef::new(Rc::clone(self)))
    }

    /// A copy of the listener list. Later mutations do not affect it.
    pub fn listeners(&self) -> Vec<Rc<Listener>> {
        self.listeners.borrow().clone()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.borrow().len()
    }

    /// "Add an event listener". Returns whether the listener was added.
    pub fn add_an_event_listener(self: &Rc<Self>, listener: Listener) -> bool {
        if listener
            .signal
            .as_ref()
            .map(|signal| signal.aborted())
            .unwrap_or(false)
        {
            return false;
        }
        if !matches!(listener.callback, Value::Object(_)) {
            return false;
        }
        let duplicate = self
            .listeners
            .borrow()
            .iter()
            .any(|other| other.matches(&listener.event_type, &listener.callback, listener.capture));
        if duplicate {
            return false;
        }
        let listener = Rc::new(listener);
        self.listeners.borrow_mut().push(Rc::clone(&listener));
        if let Some(signal) = &listener.signal {
            let target: Weak<EventTarget> = Rc::downgrade(self);
            let removed = Rc::downgrade(&listener);
            signal.add(move || {
                if let (Some(target), Some(listener)) = (target.upgrade(), removed.upgrade()) {
                    target.remove_an_event_listener(&listener);
                }
            });
        }
        true
    }

    /// "Remove an event listener".
    pub fn remove_an_event_listener(&self, listener: &Rc<Listener>) {
        listener.removed.set(true);
        self.listeners
            .borrow_mut()
            .retain(|other| !Rc::ptr_eq(other, listener));
    }

    /// Remove the listener registered for `(event_type, callback, capture)`, if any.
    pub fn remove_matching(&self, event_type: &str, callback: &Value, capture: bool) -> bool {
        let matching: Vec<_> = self
            .listeners
            .borrow()
            .iter()
            .filter(|listener| listener.matches(event_type, callback, capture))
            .cloned()
            .collect();
        for listener in &matching {
            self.remove_an_event_listener(listener);
        }
        !matching.is_empty()
    }
}

impl fmt::Debug for EventTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventTarget")
            .field("id", &self.id)
            .field("listeners", &self.listeners.borrow().len())
            .finish()
    }
}

impl HostObject for EventTarget {
    fn type_tag(&self) -> &'static TypeTag {
        &EVENT_TARGET
    }

    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }

    fn parent_implementation(&self) -> Option<HostRef> {
        self.owner()
    }
}

/// The `capture` value of a boolean or `EventListenerOptions` dictionary.
pub fn flatten(realm: &mut Realm, options: &Value) -> Result<bool, Exception> {
    match options {
        Value::Object(_) => Ok(realm.get(options, "capture")?.to_boolean()),
        Value::Undefined | Value::Null => Ok(false),
        other => Ok(other.to_boolean()),
    }
}

/// Flatten `AddEventListenerOptions`.
pub fn flatten_more(realm: &mut Realm, options: &Value) -> Result<ListenerOptions, Exception> {
    let capture = flatten(realm, options)?;
    if !matches!(options, Value::Object(_)) {
        return Ok(ListenerOptions {
            capture,
            ..ListenerOptions::default()
        });
    }
    let once = realm.get(options, "once")?.to_boolean();
    let passive = realm.get(options, "passive")?.to_boolean();
    let signal = match realm.get(options, "signal")? {
        Value::Undefined => None,
        value => {
            let signal = realm
                .implementation_of(&value)
                .and_then(|implementation| implementation.downcast::<AbortSignal>());
            match signal {
                Some(signal) => Some(signal),
                None => {
                    return Err(realm.type_error(
                        "Failed to execute 'addEventListener' on 'EventTarget': Failed to read the 'signal' property from 'AddEventListenerOptions': Failed to convert value to 'AbortSignal'.",
                    ))
                }
            }
        }
    };
    Ok(ListenerOptions {
        capture,
        once,
        passive,
        signal,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RealmConfig;

    fn callback(realm: &mut Realm) -> Value {
        realm.new_script_function("listener", |_, _, _| Ok(Value::Undefined))
    }

    #[test]
    fn capture_is_part_of_listener_identity() {
        let mut realm = Realm::new(RealmConfig::default()).unwrap();
        let target = EventTarget::new();
        let callback = callback(&mut realm);
        let bubble = ListenerOptions::default();
        let capture = ListenerOptions {
            capture: true,
            ..ListenerOptions::default()
        };
        assert!(target.add_an_event_listener(Listener::new("x", callback.clone(), bubble.clone())));
        assert!(target.add_an_event_listener(Listener::new("x", callback.clone(), capture)));
        assert!(!target.add_an_event_listener(Listener::new("x", callback.clone(), bubble)));
        assert_eq!(target.listener_count(), 2);

        assert!(target.remove_matching("x", &callback, true));
        assert_eq!(target.listener_count(), 1);
        assert!(!target.listeners()[0].capture());
    }

    #[test]
    fn non_object_callbacks_are_ignored() {
        let target = EventTarget::new();
        assert!(!target.add_an_event_listener(Listener::new(
            "x",
            Value::Null,
            ListenerOptions::default()
        )));
        assert_eq!(target.listener_count(), 0);
    }

    #[test]
    fn abort_signal_removes_listener() {
        let mut realm = Realm::new(RealmConfig::default()).unwrap();
        let target = EventTarget::new();
        let signal = AbortSignal::new();
        let options = ListenerOptions {
            signal: Some(Rc::clone(&signal)),
            ..ListenerOptions::default()
        };
        let callback = callback(&mut realm);
        assert!(target.add_an_event_listener(Listener::new("x", callback.clone(), options.clone())));
        let snapshot = target.listeners();
        signal.abort(Value::Undefined);
        assert_eq!(target.listener_count(), 0);
        assert!(snapshot[0].removed());
        assert!(!target.add_an_event_listener(Listener::new("x", callback, options)));
    }

    #[test]
    fn options_flatten_from_booleans_and_dictionaries() {
        let mut realm = Realm::new(RealmConfig::default()).unwrap();
        assert!(flatten(&mut realm, &Value::from(true)).unwrap());
        assert!(!flatten(&mut realm, &Value::Undefined).unwrap());

        let options = realm.new_object();
        realm.set(&options, "capture", Value::from(1.0)).unwrap();
        realm.set(&options, "once", Value::from(true)).unwrap();
        let flattened = flatten_more(&mut realm, &options).unwrap();
        assert!(flattened.capture);
        assert!(flattened.once);
        assert!(!flattened.passive);
        assert!(flattened.signal.is_none());

        realm.set(&options, "signal", Value::from("nope")).unwrap();
        let err = flatten_more(&mut realm, &options).unwrap_err();
        let err = err.value().cloned().unwrap();
        assert_eq!(
            realm.to_display_string(&err),
            "TypeError: Failed to execute 'addEventListener' on 'EventTarget': Failed to read the 'signal' property from 'AddEventListenerOptions': Failed to convert value to 'AbortSignal'."
        );
    }
}
