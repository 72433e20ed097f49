//! The event dispatch algorithm.

use std::rc::Rc;

use tracing::{debug, error, trace};

use super::event::{Event, EventInit, EventKind, EventPhase, PathEntry};
use super::event_target::{EventTarget, Listener};
use super::tree::{DomTree, ShadowRootMode};
use crate::realm::{Exception, HostRef, ProtocolError, Realm};
use crate::vm::Value;

/// Flags of the legacy entry points into dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LegacyDispatch {
    /// Dispatch to a window as if to its associated document.
    pub target_override: bool,
    /// Set when any listener threw.
    pub listener_did_throw: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListenerPhase {
    Capturing,
    Bubbling,
}

fn same(a: &Rc<EventTarget>, b: Option<&Rc<EventTarget>>) -> bool {
    b.map(|b| Rc::ptr_eq(a, b)).unwrap_or(false)
}

fn retarget_all(tree: &dyn DomTree, targets: &[Rc<EventTarget>], against: &Rc<EventTarget>) -> Vec<Rc<EventTarget>> {
    targets
        .iter()
        .filter_map(|target| tree.retarget(Some(target), against))
        .collect()
}

fn append_to_event_path(
    tree: &dyn DomTree,
    event: &Event,
    invocation_target: Rc<EventTarget>,
    shadow_adjusted_target: Option<Rc<EventTarget>>,
    related_target: Option<Rc<EventTarget>>,
    touch_targets: Vec<Rc<EventTarget>>,
    slot_in_closed_tree: bool,
) {
    let invocation_target_in_shadow_tree = tree.root_is_shadow_root(&invocation_target);
    let root_of_closed_tree = tree.shadow_root_mode(&invocation_target) == Some(ShadowRootMode::Closed);
    event.push_path_entry(PathEntry {
        invocation_target,
        invocation_target_in_shadow_tree,
        shadow_adjusted_target,
        related_target,
        touch_targets,
        root_of_closed_tree,
        slot_in_closed_tree,
    });
}

/// Dispatch `event` to `target` and return whether it was not canceled.
///
/// A protocol violation inside a listener stops dispatch. The event is still
/// reset, activation behavior does not run, and the violation is returned.
pub fn dispatch(
    realm: &mut Realm,
    target: &Rc<EventTarget>,
    event: &Rc<Event>,
    legacy: &mut LegacyDispatch,
) -> Result<bool, ProtocolError> {
    let tree = realm.tree();
    let tree = &*tree;
    event.set_dispatching(true);
    trace!(target = "webrealm", event = %event.event_type(), target_id = %target.id(), "dispatching event");

    let target_override = if legacy.target_override {
        tree.associated_document(target)
            .unwrap_or_else(|| Rc::clone(target))
    } else {
        Rc::clone(target)
    };
    let mut activation_target: Option<Rc<EventTarget>> = None;
    let event_related_target = event.related_target();
    let mut related_target = tree.retarget(event_related_target.as_ref(), target);
    let mut clear_targets = false;
    let mut fatal = None;

    if !same(target, related_target.as_ref()) || same(target, event_related_target.as_ref()) {
        let mut target = Rc::clone(target);
        let mut touch_targets = retarget_all(tree, &event.touch_targets(), &target);
        append_to_event_path(
            tree,
            event,
            Rc::clone(&target),
            Some(target_override),
            related_target.clone(),
            touch_targets,
            false,
        );

        let is_activation_event = realm.config().is_activation_event(&event.event_type());
        if is_activation_event && tree.has_activation_behavior(&target) {
            activation_target = Some(Rc::clone(&target));
        }

        let mut slottable = tree.is_assigned_slottable(&target).then(|| Rc::clone(&target));
        let mut slot_in_closed_tree = false;
        let global = realm.global_target();
        let window = realm.is("Window");
        let mut parent = tree.get_the_parent(&target, event, global.as_ref());

        while let Some(current) = parent {
            if slottable.is_some() {
                slottable = None;
                if tree.root_mode(&current) == Some(ShadowRootMode::Closed) {
                    slot_in_closed_tree = true;
                }
            }
            if tree.is_assigned_slottable(&current) {
                slottable = Some(Rc::clone(&current));
            }
            related_target = tree.retarget(event_related_target.as_ref(), &current);
            touch_targets = retarget_all(tree, &event.touch_targets(), &current);

            let is_global = window && same(&current, global.as_ref());
            if is_global
                || (tree.is_node(&current) && tree.root_is_shadow_including_inclusive_ancestor_of(&target, &current))
            {
                if is_activation_event
                    && event.bubbles()
                    && activation_target.is_none()
                    && tree.has_activation_behavior(&current)
                {
                    activation_target = Some(Rc::clone(&current));
                }
                append_to_event_path(
                    tree,
                    event,
                    Rc::clone(&current),
                    None,
                    related_target.clone(),
                    touch_targets.clone(),
                    slot_in_closed_tree,
                );
            } else if same(&current, related_target.as_ref()) {
                break;
            } else {
                target = Rc::clone(&current);
                if is_activation_event
                    && activation_target.is_none()
                    && tree.has_activation_behavior(&target)
                {
                    activation_target = Some(Rc::clone(&target));
                }
                append_to_event_path(
                    tree,
                    event,
                    Rc::clone(&current),
                    Some(Rc::clone(&target)),
                    related_target.clone(),
                    touch_targets.clone(),
                    slot_in_closed_tree,
                );
            }

            parent = tree.get_the_parent(&current, event, global.as_ref());
            slot_in_closed_tree = false;
        }

        let clear_targets_entry = event
            .path()
            .iter()
            .rev()
            .find(|entry| entry.shadow_adjusted_target.is_some())
            .cloned();
        if let Some(entry) = clear_targets_entry {
            clear_targets = entry
                .shadow_adjusted_target
                .iter()
                .chain(entry.related_target.iter())
                .chain(entry.touch_targets.iter())
                .any(|candidate| tree.is_node(candidate) && tree.root_is_shadow_root(candidate));
        }

        if let Some(activation_target) = &activation_target {
            tree.legacy_pre_activation_behavior(realm, activation_target);
        }

        let length = event.path().len();
        for index in (0..length).rev() {
            let Some(entry) = event.path_entry(index) else {
                continue;
            };
            event.set_phase(if entry.shadow_adjusted_target.is_some() {
                EventPhase::AtTarget
            } else {
                EventPhase::Capturing
            });
            if let Err(err) = invoke(realm, &entry, index, event, ListenerPhase::Capturing, legacy) {
                fatal = Some(err);
                break;
            }
        }
        for index in 0..length {
            if fatal.is_some() {
                break;
            }
            let Some(entry) = event.path_entry(index) else {
                continue;
            };
            if entry.shadow_adjusted_target.is_some() {
                event.set_phase(EventPhase::AtTarget);
            } else {
                if !event.bubbles() {
                    continue;
                }
                event.set_phase(EventPhase::Bubbling);
            }
            if let Err(err) = invoke(realm, &entry, index, event, ListenerPhase::Bubbling, legacy) {
                fatal = Some(err);
            }
        }
    }

    event.set_phase(EventPhase::None);
    event.set_current_target(None);
    event.clear_path();
    event.set_dispatching(false);
    event.clear_propagation_flags();
    if clear_targets {
        event.set_target(None);
        event.set_related_target(None);
        event.set_touch_targets(Vec::new());
    }
    if let Some(err) = fatal {
        error!(target = "webrealm", event = %event.event_type(), error = %err, "dispatch aborted");
        return Err(err);
    }

    if let Some(activation_target) = activation_target {
        if !event.default_prevented() {
            tree.activation_behavior(realm, &activation_target, event);
        } else {
            tree.legacy_canceled_activation_behavior(realm, &activation_target);
        }
    }

    Ok(!event.default_prevented())
}

fn invoke(
    realm: &mut Realm,
    entry: &PathEntry,
    index: usize,
    event: &Rc<Event>,
    phase: ListenerPhase,
    legacy: &mut LegacyDispatch,
) -> Result<(), ProtocolError> {
    let shadow_adjusted_target = event
        .path()
        .iter()
        .take(index + 1)
        .rev()
        .find_map(|entry| entry.shadow_adjusted_target.clone());
    event.set_target(shadow_adjusted_target);
    event.set_related_target(entry.related_target.clone());
    event.set_touch_targets(entry.touch_targets.clone());
    if event.propagation_stopped() {
        return Ok(());
    }
    event.set_current_target(Some(Rc::clone(&entry.invocation_target)));

    let listeners = entry.invocation_target.listeners();
    let in_shadow_tree = entry.invocation_target_in_shadow_tree;
    let found = inner_invoke(realm, event, &listeners, phase, in_shadow_tree, legacy)?;
    if found || !event.is_trusted() {
        return Ok(());
    }
    let original_type = event.event_type();
    let Some(alias) = realm.config().legacy_alias(&original_type).map(Rc::<str>::from) else {
        return Ok(());
    };
    debug!(target = "webrealm", event = %original_type, alias = %alias, "retrying with legacy event type");
    event.set_event_type(alias);
    let result = inner_invoke(realm, event, &listeners, phase, in_shadow_tree, legacy);
    event.set_event_type(original_type);
    result.map(|_| ())
}

fn inner_invoke(
    realm: &mut Realm,
    event: &Rc<Event>,
    listeners: &[Rc<Listener>],
    phase: ListenerPhase,
    in_shadow_tree: bool,
    legacy: &mut LegacyDispatch,
) -> Result<bool, ProtocolError> {
    let mut found = false;
    let event_type = event.event_type();
    for listener in listeners {
        if listener.removed() || listener.event_type() != &*event_type {
            continue;
        }
        found = true;
        if (phase == ListenerPhase::Capturing && !listener.capture())
            || (phase == ListenerPhase::Bubbling && listener.capture())
        {
            continue;
        }
        let Some(current_target) = event.current_target() else {
            continue;
        };
        if listener.once() {
            current_target.remove_an_event_listener(listener);
        }

        let tracks_current_event = realm.is("Window");
        let previous_event = realm.current_event();
        if tracks_current_event && !in_shadow_tree {
            realm.replace_current_event(Some(Rc::clone(event)));
        }
        if listener.passive() {
            event.set_in_passive_listener(true);
        }

        let outcome = call_listener(realm, listener.callback(), event, &current_target);

        event.set_in_passive_listener(false);
        if tracks_current_event {
            realm.replace_current_event(previous_event);
        }
        match outcome {
            Ok(_) => {}
            Err(Exception::Fatal(err)) => return Err(err),
            Err(exception) => {
                legacy.listener_did_throw = true;
                if realm.config().report_listener_errors {
                    realm.report_exception(&exception);
                } else {
                    let message = realm.describe_exception(&exception);
                    error!(target = "webrealm", event = %event_type, error = %message, "listener threw");
                }
            }
        }
        if event.immediate_propagation_stopped() {
            return Ok(found);
        }
    }
    Ok(found)
}

/// Call a listener callback, or its `handleEvent` method.
fn call_listener(
    realm: &mut Realm,
    callback: &Value,
    event: &Rc<Event>,
    current_target: &Rc<EventTarget>,
) -> Result<Value, Exception> {
    let event = Value::Object(realm.expose(&HostRef::new(Rc::clone(event)))?);
    let this = Value::Object(realm.expose(&current_target.host_ref())?);
    if realm.is_callable(callback) {
        return realm.call(callback, this, vec![event]);
    }
    let handle_event = realm.get(callback, "handleEvent")?;
    realm.call(&handle_event, callback.clone(), vec![event])
}

impl Realm {
    /// Fire a trusted event of `event_type` at `target`.
    ///
    /// A `detail` in `init` makes it a `CustomEvent`. Returns whether the
    /// event was not canceled.
    pub fn fire_event(
        &mut self,
        target: &Rc<EventTarget>,
        event_type: &str,
        init: EventInit,
    ) -> Result<bool, ProtocolError> {
        let kind = if init.detail.is_some() {
            EventKind::Custom
        } else {
            EventKind::Event
        };
        let event = Event::create(kind, event_type, init, self.now());
        event.set_trusted(true);
        dispatch(self, target, &event, &mut LegacyDispatch::default())
    }

    /// `dispatchEvent`: dispatch an untrusted event.
    pub fn dispatch_event(&mut self, target: &Rc<EventTarget>, event: &Rc<Event>) -> Result<bool, Exception> {
        if event.dispatching() {
            return Err(self.dom_exception(
                "Failed to execute 'dispatchEvent' on 'EventTarget': The event is already being dispatched.",
                "InvalidStateError",
            ));
        }
        if !event.initialized() {
            return Err(self.dom_exception(
                "Failed to execute 'dispatchEvent' on 'EventTarget': The event provided is uninitialized.",
                "InvalidStateError",
            ));
        }
        event.set_trusted(false);
        Ok(dispatch(self, target, event, &mut LegacyDispatch::default())?)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::config::RealmConfig;
    use crate::dom::{ListenerOptions, NodeTree, ShadowRootMode};
    use crate::realm::NativeFunction;

    type Log = Rc<RefCell<Vec<String>>>;

    fn recorder(realm: &mut Realm, log: &Log, label: &str) -> Value {
        let log = Rc::clone(log);
        let name = label.to_string();
        realm.new_script_function(label, move |realm, _, arguments| {
            let event = realm.implementation_of(&arguments[0]).and_then(|host| host.downcast::<Event>());
            let phase = event.map(|event| event.phase().code()).unwrap_or_default();
            log.borrow_mut().push(format!("{name}:{phase}"));
            Ok(Value::Undefined)
        })
    }

    fn listen(target: &Rc<EventTarget>, event_type: &str, callback: Value, capture: bool) {
        target.add_an_event_listener(Listener::new(
            event_type,
            callback,
            ListenerOptions {
                capture,
                ..ListenerOptions::default()
            },
        ));
    }

    #[test]
    fn capture_target_bubble_order() {
        let tree = NodeTree::new();
        let mut realm = Realm::with_tree(RealmConfig::default(), tree.clone()).unwrap();
        let document = tree.create_document(true);
        let parent = tree.create_element("div");
        let child = tree.create_element("span");
        tree.append_child(&document, &parent);
        tree.append_child(&parent, &child);

        let log: Log = Rc::default();
        let window = realm.global_target().unwrap();
        for (name, target) in [("window", &window), ("parent", &parent), ("child", &child)] {
            let capture = recorder(&mut realm, &log, &format!("{name}-capture"));
            let bubble = recorder(&mut realm, &log, &format!("{name}-bubble"));
            listen(target, "ping", capture, true);
            listen(target, "ping", bubble, false);
        }

        assert!(realm.fire_event(&child, "ping", EventInit::default().bubbles()).unwrap());
        assert_eq!(
            *log.borrow(),
            vec![
                "window-capture:1",
                "parent-capture:1",
                "child-capture:2",
                "child-bubble:2",
                "parent-bubble:3",
                "window-bubble:3",
            ]
        );
    }

    #[test]
    fn non_bubbling_events_skip_ancestors_on_the_way_up() {
        let tree = NodeTree::new();
        let mut realm = Realm::with_tree(RealmConfig::default(), tree.clone()).unwrap();
        let parent = tree.create_element("div");
        let child = tree.create_element("span");
        tree.append_child(&parent, &child);

        let log: Log = Rc::default();
        let on_parent = recorder(&mut realm, &log, "parent");
        let on_child = recorder(&mut realm, &log, "child");
        listen(&parent, "ping", on_parent, false);
        listen(&child, "ping", on_child, false);
        realm.fire_event(&child, "ping", EventInit::default()).unwrap();
        assert_eq!(*log.borrow(), vec!["child:2"]);
    }

    #[test]
    fn state_is_reset_after_dispatch() {
        let mut realm = Realm::new(RealmConfig::default()).unwrap();
        let target = EventTarget::new();
        let event = Event::create(EventKind::Event, "ping", EventInit::default().cancelable(), 0.0);
        let canceler = realm.new_script_function("cancel", |realm, _, arguments| {
            if let Some(event) = realm.implementation_of(&arguments[0]).and_then(|host| host.downcast::<Event>()) {
                event.prevent_default();
                event.stop_propagation();
            }
            Ok(Value::Undefined)
        });
        listen(&target, "ping", canceler, false);
        assert!(!realm.dispatch_event(&target, &event).unwrap());
        assert_eq!(event.phase(), EventPhase::None);
        assert!(event.current_target().is_none());
        assert!(event.path().is_empty());
        assert!(!event.dispatching());
        assert!(!event.propagation_stopped());
        assert!(Rc::ptr_eq(&event.target().unwrap(), &target));
        assert!(event.default_prevented());
        // The event can be dispatched again.
        assert!(realm.dispatch_event(&target, &event).is_ok());
    }

    #[test]
    fn legacy_alias_applies_only_to_trusted_events() {
        let mut realm = Realm::new(RealmConfig::default()).unwrap();
        let target = EventTarget::new();
        let log: Log = Rc::default();
        let legacy = recorder(&mut realm, &log, "legacy");
        listen(&target, "webkitTransitionEnd", legacy, false);

        let event = Event::create(EventKind::Event, "transitionend", EventInit::default(), 0.0);
        realm.dispatch_event(&target, &event).unwrap();
        assert!(log.borrow().is_empty());

        realm.fire_event(&target, "transitionend", EventInit::default()).unwrap();
        assert_eq!(*log.borrow(), vec!["legacy:2"]);
    }

    #[test]
    fn listener_errors_are_reported_and_flagged() {
        let mut realm = Realm::new(RealmConfig::default()).unwrap();
        let target = EventTarget::new();
        let thrower = realm.new_script_function("thrower", |realm, _, _| Err(realm.type_error("listener failed")));
        listen(&target, "ping", thrower, false);
        let event = Event::create(EventKind::Event, "ping", EventInit::default(), 0.0);
        let mut legacy = LegacyDispatch::default();
        assert_eq!(dispatch(&mut realm, &target, &event, &mut legacy), Ok(true));
        assert!(legacy.listener_did_throw);
        assert_eq!(realm.reported_exceptions(), ["TypeError: listener failed"]);
    }

    #[test]
    fn unreported_listener_errors_still_flag_the_dispatch() {
        let config = RealmConfig {
            report_listener_errors: false,
            ..RealmConfig::default()
        };
        let mut realm = Realm::new(config).unwrap();
        let target = EventTarget::new();
        let thrower = realm.new_script_function("thrower", |realm, _, _| Err(realm.type_error("quiet failure")));
        let log: Log = Rc::default();
        let after = recorder(&mut realm, &log, "after");
        listen(&target, "ping", thrower, false);
        listen(&target, "ping", after, false);
        let event = Event::create(EventKind::Event, "ping", EventInit::default(), 0.0);
        let mut legacy = LegacyDispatch::default();
        assert_eq!(dispatch(&mut realm, &target, &event, &mut legacy), Ok(true));
        assert!(legacy.listener_did_throw);
        assert!(realm.reported_exceptions().is_empty());
        assert_eq!(*log.borrow(), vec!["after:2"]);
    }

    #[test]
    fn protocol_violations_abort_dispatch() {
        let mut realm = Realm::new(RealmConfig::default()).unwrap();
        let target = EventTarget::new();
        let leak = NativeFunction::builder("leak", |_, _| Ok(Value::Host(HostRef::new(EventTarget::new())))).build();
        let leak = Value::Object(realm.new_native_function(leak));
        let caller = realm.new_script_function("caller", move |realm, _, _| {
            realm.call(&leak, Value::Undefined, Vec::new())
        });
        let log: Log = Rc::default();
        let later = recorder(&mut realm, &log, "later");
        listen(&target, "ping", caller, false);
        listen(&target, "ping", later, false);

        let event = Event::create(EventKind::Event, "ping", EventInit::default(), 0.0);
        let mut legacy = LegacyDispatch::default();
        let result = dispatch(&mut realm, &target, &event, &mut legacy);
        assert_eq!(
            result,
            Err(ProtocolError::HostValueEscaped {
                function: "leak".to_string()
            })
        );
        assert!(!legacy.listener_did_throw);
        assert!(realm.reported_exceptions().is_empty());
        assert!(log.borrow().is_empty());
        assert!(!event.dispatching());
        assert!(event.path().is_empty());

        let again = Event::create(EventKind::Event, "ping", EventInit::default(), 0.0);
        let exception = realm.dispatch_event(&target, &again).unwrap_err();
        assert!(exception.is_fatal());
    }

    #[test]
    fn target_override_retargets_window_to_its_document() {
        let tree = NodeTree::new();
        let mut realm = Realm::with_tree(RealmConfig::default(), tree.clone()).unwrap();
        let window = realm.global_target().unwrap();
        let document = tree.create_document(true);
        tree.associate_document(&window, &document);

        let seen: Rc<RefCell<Option<Rc<EventTarget>>>> = Rc::default();
        let observed = Rc::clone(&seen);
        let listener = realm.new_script_function("listener", move |realm, _, arguments| {
            let event = realm.implementation_of(&arguments[0]).and_then(|host| host.downcast::<Event>());
            *observed.borrow_mut() = event.and_then(|event| event.target());
            Ok(Value::Undefined)
        });
        listen(&window, "load", listener, false);

        let event = Event::create(EventKind::Event, "load", EventInit::default(), 0.0);
        let mut legacy = LegacyDispatch {
            target_override: true,
            ..LegacyDispatch::default()
        };
        assert_eq!(dispatch(&mut realm, &window, &event, &mut legacy), Ok(true));
        assert!(Rc::ptr_eq(seen.borrow().as_ref().unwrap(), &document));
    }

    #[test]
    fn shadow_targets_are_cleared_after_dispatch() {
        let tree = NodeTree::new();
        let mut realm = Realm::with_tree(RealmConfig::default(), tree.clone()).unwrap();
        let host = tree.create_element("div");
        let root = tree.attach_shadow(&host, ShadowRootMode::Closed);
        let inner = tree.create_element("span");
        tree.append_child(&root, &inner);

        let contained = Event::create(EventKind::Event, "ping", EventInit::default().bubbles(), 0.0);
        realm.dispatch_event(&inner, &contained).unwrap();
        assert!(contained.target().is_none());

        let composed = Event::create(EventKind::Event, "ping", EventInit::default().bubbles().composed(), 0.0);
        realm.dispatch_event(&inner, &composed).unwrap();
        assert!(Rc::ptr_eq(&composed.target().unwrap(), &host));
    }
}
