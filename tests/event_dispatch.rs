use std::cell::RefCell;
use std::rc::Rc;

use webrealm::dom::{AbortSignal, EventTarget, NodeTree};
use webrealm::realm::HostRef;
use webrealm::{EventInit, Realm, RealmConfig, Value};

type Log = Rc<RefCell<Vec<String>>>;

fn realm() -> Realm {
    Realm::new(RealmConfig::default()).expect("realm")
}

fn construct(realm: &mut Realm, interface: &str, arguments: Vec<Value>) -> Value {
    let constructor = realm.global_property(interface).expect("constructor");
    realm.construct(&constructor, arguments).expect("construct")
}

fn dictionary(realm: &mut Realm, members: &[(&str, Value)]) -> Value {
    let object = realm.new_object();
    for (key, value) in members {
        realm.set(&object, key, value.clone()).expect("set member");
    }
    object
}

/// A script listener that appends `label` to `log`.
fn logger(realm: &mut Realm, log: &Log, label: &str) -> Value {
    let log = Rc::clone(log);
    let label = label.to_string();
    realm.new_script_function("listener", move |_, _, _| {
        log.borrow_mut().push(label.clone());
        Ok(Value::Undefined)
    })
}

fn listen(realm: &mut Realm, target: &Value, event_type: &str, listener: Value, options: Value) {
    realm
        .invoke_method(
            target,
            "addEventListener",
            vec![Value::from(event_type), listener, options],
        )
        .expect("addEventListener");
}

fn listener_count(realm: &Realm, target: &Value) -> usize {
    realm
        .implementation_of(target)
        .and_then(|host| host.downcast::<EventTarget>())
        .map(|target| target.listener_count())
        .expect("event target implementation")
}

#[test]
fn listener_on_lone_target_runs_at_target() {
    let mut realm = realm();
    let phases = Rc::new(RefCell::new(Vec::new()));
    let returned = realm
        .run_script("lone-target.js", |realm| {
            let target = construct(realm, "EventTarget", vec![]);
            let seen = Rc::clone(&phases);
            let listener = realm.new_script_function("listener", move |realm, _, arguments| {
                let phase = realm.get(&arguments[0], "eventPhase")?;
                seen.borrow_mut().push(phase);
                Ok(Value::Undefined)
            });
            listen(realm, &target, "x", listener, Value::Undefined);
            let event = construct(realm, "Event", vec![Value::from("x")]);
            realm.invoke_method(&target, "dispatchEvent", vec![event])
        })
        .expect("dispatch");
    assert_eq!(returned, Value::from(true));
    assert_eq!(*phases.borrow(), vec![Value::from(2u16)]);
}

#[test]
fn listeners_are_snapshotted_when_dispatch_reaches_a_target() {
    let mut realm = realm();
    let log: Log = Rc::default();
    let target = construct(&mut realm, "EventTarget", vec![]);
    let second = logger(&mut realm, &log, "second");
    let late = logger(&mut realm, &log, "late");
    let first = {
        let log = Rc::clone(&log);
        let target = target.clone();
        let second = second.clone();
        let late = late.clone();
        realm.new_script_function("first", move |realm, _, _| {
            log.borrow_mut().push("first".to_string());
            realm.invoke_method(&target, "addEventListener", vec![Value::from("x"), late.clone()])?;
            realm.invoke_method(&target, "removeEventListener", vec![Value::from("x"), second.clone()])
        })
    };
    listen(&mut realm, &target, "x", first, Value::Undefined);
    listen(&mut realm, &target, "x", second, Value::Undefined);

    let event = construct(&mut realm, "Event", vec![Value::from("x")]);
    realm
        .invoke_method(&target, "dispatchEvent", vec![event])
        .expect("dispatch");
    assert_eq!(*log.borrow(), vec!["first"]);

    let event = construct(&mut realm, "Event", vec![Value::from("x")]);
    realm
        .invoke_method(&target, "dispatchEvent", vec![event])
        .expect("dispatch");
    assert_eq!(*log.borrow(), vec!["first", "first", "late"]);
}

#[test]
fn capture_flag_is_part_of_listener_identity() {
    let mut realm = realm();
    let log: Log = Rc::default();
    let target = construct(&mut realm, "EventTarget", vec![]);
    let listener = logger(&mut realm, &log, "hit");
    let capture = dictionary(&mut realm, &[("capture", Value::from(true))]);

    listen(&mut realm, &target, "x", listener.clone(), Value::from(false));
    listen(&mut realm, &target, "x", listener.clone(), capture.clone());
    assert_eq!(listener_count(&realm, &target), 2);
    listen(&mut realm, &target, "x", listener.clone(), Value::Undefined);
    listen(&mut realm, &target, "x", listener.clone(), Value::from(true));
    assert_eq!(listener_count(&realm, &target), 2);

    let event = construct(&mut realm, "Event", vec![Value::from("x")]);
    realm
        .invoke_method(&target, "dispatchEvent", vec![event])
        .expect("dispatch");
    assert_eq!(log.borrow().len(), 2);

    realm
        .invoke_method(
            &target,
            "removeEventListener",
            vec![Value::from("x"), listener, capture],
        )
        .expect("removeEventListener");
    assert_eq!(listener_count(&realm, &target), 1);
}

#[test]
fn non_bubbling_event_skips_bubble_listeners_on_ancestors() {
    let tree = NodeTree::new();
    let mut realm = Realm::with_tree(RealmConfig::default(), tree.clone()).expect("realm");
    let ancestor = tree.create_element("div");
    let child = tree.create_element("span");
    tree.append_child(&ancestor, &child);
    let ancestor = Value::Object(realm.expose(&HostRef::new(ancestor)).expect("expose"));
    let child = Value::Object(realm.expose(&HostRef::new(child)).expect("expose"));

    let log: Log = Rc::default();
    let capture = logger(&mut realm, &log, "ancestor-capture");
    let bubble = logger(&mut realm, &log, "ancestor-bubble");
    let at_target = logger(&mut realm, &log, "target-capture");
    listen(&mut realm, &ancestor, "x", capture, Value::from(true));
    listen(&mut realm, &ancestor, "x", bubble, Value::from(false));
    listen(&mut realm, &child, "x", at_target, Value::from(true));

    realm
        .run_script("non-bubbling.js", |realm| {
            let event = construct(realm, "Event", vec![Value::from("x")]);
            realm.invoke_method(&child, "dispatchEvent", vec![event])
        })
        .expect("dispatch");
    assert_eq!(*log.borrow(), vec!["ancestor-capture", "target-capture"]);
}

#[test]
fn redispatch_during_dispatch_is_an_invalid_state_error() {
    let mut realm = realm();
    let target = construct(&mut realm, "EventTarget", vec![]);
    let observed: Rc<RefCell<Vec<Value>>> = Rc::default();
    let seen = Rc::clone(&observed);
    let listener = realm.new_script_function("redispatch", move |realm, this, arguments| {
        let err = realm
            .invoke_method(&this, "dispatchEvent", vec![arguments[0].clone()])
            .expect_err("nested dispatch must fail");
        let thrown = err.value().cloned().expect("realm exception");
        let name = realm.get(&thrown, "name")?;
        let code = realm.get(&thrown, "code")?;
        let message = realm.get(&thrown, "message")?;
        seen.borrow_mut().extend([name, code, message]);
        Ok(Value::Undefined)
    });
    listen(&mut realm, &target, "x", listener, Value::Undefined);

    let event = construct(&mut realm, "Event", vec![Value::from("x")]);
    realm
        .run_script("redispatch.js", |realm| {
            realm.invoke_method(&target, "dispatchEvent", vec![event])
        })
        .expect("outer dispatch completes");
    assert_eq!(
        *observed.borrow(),
        vec![
            Value::from("InvalidStateError"),
            Value::from(11u16),
            Value::from(
                "Failed to execute 'dispatchEvent' on 'EventTarget': The event is already being dispatched."
            ),
        ]
    );
    assert_eq!(listener_count(&realm, &target), 1);
}

#[test]
fn uninitialized_event_cannot_be_dispatched() {
    let mut realm = realm();
    let target = EventTarget::new();
    let event = Rc::new(webrealm::Event::new(webrealm::dom::EventKind::Event));
    let err = realm.dispatch_event(&target, &event).expect_err("uninitialized");
    let thrown = err.value().cloned().expect("realm exception");
    assert_eq!(
        realm.to_display_string(&thrown),
        "InvalidStateError: Failed to execute 'dispatchEvent' on 'EventTarget': The event provided is uninitialized."
    );
}

#[test]
fn once_listeners_fire_once() {
    let mut realm = realm();
    let log: Log = Rc::default();
    let target = construct(&mut realm, "EventTarget", vec![]);
    let listener = logger(&mut realm, &log, "once");
    let once = dictionary(&mut realm, &[("once", Value::from(true))]);
    listen(&mut realm, &target, "x", listener, once);
    for _ in 0..3 {
        let event = construct(&mut realm, "Event", vec![Value::from("x")]);
        realm
            .invoke_method(&target, "dispatchEvent", vec![event])
            .expect("dispatch");
    }
    assert_eq!(log.borrow().len(), 1);
    assert_eq!(listener_count(&realm, &target), 0);
}

#[test]
fn stop_immediate_propagation_halts_remaining_listeners() {
    let tree = NodeTree::new();
    let mut realm = Realm::with_tree(RealmConfig::default(), tree.clone()).expect("realm");
    let parent = tree.create_element("div");
    let child = tree.create_element("span");
    tree.append_child(&parent, &child);
    let parent = Value::Object(realm.expose(&HostRef::new(parent)).expect("expose"));
    let child = Value::Object(realm.expose(&HostRef::new(child)).expect("expose"));

    let log: Log = Rc::default();
    let first_log = Rc::clone(&log);
    let first = realm.new_script_function("first", move |realm, _, arguments| {
        first_log.borrow_mut().push("first".to_string());
        realm.invoke_method(&arguments[0], "stopImmediatePropagation", vec![])?;
        Ok(Value::Undefined)
    });
    let second = logger(&mut realm, &log, "second");
    let on_parent = logger(&mut realm, &log, "parent");
    listen(&mut realm, &child, "x", first, Value::Undefined);
    listen(&mut realm, &child, "x", second, Value::Undefined);
    listen(&mut realm, &parent, "x", on_parent, Value::Undefined);

    let init = dictionary(&mut realm, &[("bubbles", Value::from(true))]);
    let event = construct(&mut realm, "Event", vec![Value::from("x"), init]);
    let returned = realm
        .invoke_method(&child, "dispatchEvent", vec![event])
        .expect("dispatch returns normally");
    assert_eq!(returned, Value::from(true));
    assert_eq!(*log.borrow(), vec!["first"]);
}

fn canceling_listener(realm: &mut Realm) -> Value {
    realm.new_script_function("cancel", |realm, _, arguments| {
        realm.invoke_method(&arguments[0], "preventDefault", vec![])?;
        Ok(Value::Undefined)
    })
}

#[test]
fn prevent_default_cancels_only_cancelable_events() {
    let mut realm = realm();
    let target = construct(&mut realm, "EventTarget", vec![]);
    let listener = canceling_listener(&mut realm);
    listen(&mut realm, &target, "x", listener, Value::Undefined);

    let init = dictionary(&mut realm, &[("cancelable", Value::from(true))]);
    let cancelable = construct(&mut realm, "Event", vec![Value::from("x"), init]);
    let returned = realm
        .invoke_method(&target, "dispatchEvent", vec![cancelable.clone()])
        .expect("dispatch");
    assert_eq!(returned, Value::from(false));
    assert_eq!(realm.get(&cancelable, "defaultPrevented").unwrap(), Value::from(true));
    assert_eq!(realm.get(&cancelable, "returnValue").unwrap(), Value::from(false));

    let plain = construct(&mut realm, "Event", vec![Value::from("x")]);
    let returned = realm
        .invoke_method(&target, "dispatchEvent", vec![plain.clone()])
        .expect("dispatch");
    assert_eq!(returned, Value::from(true));
    assert_eq!(realm.get(&plain, "defaultPrevented").unwrap(), Value::from(false));
}

#[test]
fn passive_listeners_cannot_cancel() {
    let mut realm = realm();
    let target = construct(&mut realm, "EventTarget", vec![]);
    let listener = canceling_listener(&mut realm);
    let passive = dictionary(&mut realm, &[("passive", Value::from(true))]);
    listen(&mut realm, &target, "x", listener, passive);

    let init = dictionary(&mut realm, &[("cancelable", Value::from(true))]);
    let event = construct(&mut realm, "Event", vec![Value::from("x"), init]);
    let returned = realm
        .invoke_method(&target, "dispatchEvent", vec![event])
        .expect("dispatch");
    assert_eq!(returned, Value::from(true));
}

#[test]
fn composed_path_of_undispatched_event_is_empty() {
    let mut realm = realm();
    let event = construct(&mut realm, "Event", vec![Value::from("x")]);
    let path = realm
        .invoke_method(&event, "composedPath", vec![])
        .expect("composedPath");
    assert_eq!(realm.array_elements(&path), Some(Vec::new()));
    assert_eq!(realm.get(&event, "target").unwrap(), Value::Null);
}

#[test]
fn handle_event_objects_are_called_with_themselves_as_this() {
    let mut realm = realm();
    let target = construct(&mut realm, "EventTarget", vec![]);
    let listener = realm.new_object();
    let receivers: Rc<RefCell<Vec<Value>>> = Rc::default();
    let seen = Rc::clone(&receivers);
    let handle_event = realm.new_script_function("handleEvent", move |_, this, _| {
        seen.borrow_mut().push(this);
        Ok(Value::Undefined)
    });
    realm
        .set(&listener, "handleEvent", handle_event)
        .expect("set handleEvent");
    listen(&mut realm, &target, "x", listener.clone(), Value::Undefined);

    let event = construct(&mut realm, "Event", vec![Value::from("x")]);
    realm
        .invoke_method(&target, "dispatchEvent", vec![event])
        .expect("dispatch");
    assert_eq!(*receivers.borrow(), vec![listener]);
}

#[test]
fn listener_exceptions_are_reported_and_dispatch_continues() {
    let mut realm = realm();
    let log: Log = Rc::default();
    let target = construct(&mut realm, "EventTarget", vec![]);
    let thrower = realm.new_script_function("thrower", |realm, _, _| {
        Err(realm.type_error("listener exploded"))
    });
    let after = logger(&mut realm, &log, "after");
    listen(&mut realm, &target, "x", thrower, Value::Undefined);
    listen(&mut realm, &target, "x", after, Value::Undefined);

    let event = construct(&mut realm, "Event", vec![Value::from("x")]);
    let returned = realm
        .invoke_method(&target, "dispatchEvent", vec![event])
        .expect("listener errors do not escape");
    assert_eq!(returned, Value::from(true));
    assert_eq!(*log.borrow(), vec!["after"]);
    assert_eq!(realm.reported_exceptions(), ["TypeError: listener exploded"]);
}

#[test]
fn aborting_a_signal_removes_its_listeners() {
    let mut realm = realm();
    let log: Log = Rc::default();
    let target = construct(&mut realm, "EventTarget", vec![]);
    let signal = AbortSignal::new();
    let signal_object = Value::Object(
        realm
            .expose(&HostRef::new(Rc::clone(&signal)))
            .expect("expose signal"),
    );
    let listener = logger(&mut realm, &log, "x");
    let options = dictionary(&mut realm, &[("signal", signal_object.clone())]);
    listen(&mut realm, &target, "x", listener, options);
    let on_abort = logger(&mut realm, &log, "abort");
    listen(&mut realm, &signal_object, "abort", on_abort, Value::Undefined);

    assert_eq!(realm.abort_signal(&signal, Value::Undefined), Ok(true));
    assert_eq!(listener_count(&realm, &target), 0);
    assert_eq!(*log.borrow(), vec!["abort"]);
    assert_eq!(realm.get(&signal_object, "aborted").unwrap(), Value::from(true));
    let reason = realm.get(&signal_object, "reason").unwrap();
    assert_eq!(realm.get(&reason, "name").unwrap(), Value::from("AbortError"));

    let event = construct(&mut realm, "Event", vec![Value::from("x")]);
    realm
        .invoke_method(&target, "dispatchEvent", vec![event])
        .expect("dispatch");
    assert_eq!(*log.borrow(), vec!["abort"]);
}

#[test]
fn window_event_tracks_the_running_listener() {
    let mut realm = realm();
    let window = realm.global_value();
    let observed: Rc<RefCell<Vec<Value>>> = Rc::default();
    let seen = Rc::clone(&observed);
    let listener = realm.new_script_function("listener", move |realm, _, arguments| {
        let global = realm.global_value();
        let current = realm.get(&global, "event")?;
        seen.borrow_mut().push(Value::from(current == arguments[0]));
        Ok(Value::Undefined)
    });
    listen(&mut realm, &window, "ping", listener, Value::Undefined);

    let global_target = realm.global_target().expect("window target");
    assert_eq!(realm.fire_event(&global_target, "ping", EventInit::default()), Ok(true));
    assert_eq!(*observed.borrow(), vec![Value::from(true)]);
    assert_eq!(realm.get(&window, "event").unwrap(), Value::Undefined);
    assert!(realm.current_event().is_none());
}

#[test]
fn trusted_custom_events_carry_host_detail() {
    let mut realm = realm();
    let target = EventTarget::new();
    let target_object = Value::Object(
        realm
            .expose(&HostRef::new(Rc::clone(&target)))
            .expect("expose target"),
    );
    let observed: Rc<RefCell<Vec<Value>>> = Rc::default();
    let seen = Rc::clone(&observed);
    let listener = realm.new_script_function("listener", move |realm, _, arguments| {
        let detail = realm.get(&arguments[0], "detail")?;
        let count = realm.get(&detail, "count")?;
        let trusted = realm.get(&arguments[0], "isTrusted")?;
        seen.borrow_mut().extend([count, trusted]);
        Ok(Value::Undefined)
    });
    listen(&mut realm, &target_object, "ready", listener, Value::Undefined);

    let detail = realm.value_from_json(&serde_json::json!({ "count": 3 }));
    assert_eq!(realm.fire_event(&target, "ready", EventInit::default().detail(detail)), Ok(true));
    assert_eq!(*observed.borrow(), vec![Value::from(3.0), Value::from(true)]);
}
