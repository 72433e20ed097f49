use std::any::Any;
use std::io::Write;
use std::rc::Rc;

use tempfile::NamedTempFile;
use webrealm::realm::{
    interceptors, Exception, HostError, HostObject, HostRef, NativeFunction, ProtocolError,
    TrustLevel, TypeTag,
};
use webrealm::vm::ErrorKind;
use webrealm::{Realm, RealmConfig, RealmError, Value};

fn realm() -> Realm {
    Realm::new(RealmConfig::default()).expect("realm")
}

fn native(realm: &mut Realm, function: NativeFunction) -> Value {
    Value::Object(realm.new_native_function(function))
}

#[test]
fn host_errors_translate_once_and_round_trip_unchanged() {
    let mut realm = realm();
    let error = Rc::new(HostError::new(ErrorKind::RangeError, "too far"));
    let thrown = Rc::clone(&error);
    let fail = NativeFunction::builder("fail", move |_, _| Err(Exception::Host(Rc::clone(&thrown))))
        .build();
    let fail = native(&mut realm, fail);

    let rethrow_from_script = {
        let fail = fail.clone();
        realm.new_script_function("rethrow", move |realm, _, _| {
            realm.call(&fail, Value::Undefined, vec![])
        })
    };
    let relay = NativeFunction::builder("relay", move |realm, _| {
        realm.call(&rethrow_from_script, Value::Undefined, vec![])
    })
    .build();
    let relay = native(&mut realm, relay);

    let (first, second, relayed) = realm
        .run_script("round-trip.js", |realm| {
            let first = realm.call(&fail, Value::Undefined, vec![]).unwrap_err();
            let second = realm.call(&fail, Value::Undefined, vec![]).unwrap_err();
            let relayed = realm.call(&relay, Value::Undefined, vec![]).unwrap_err();
            Ok(realm.new_array(vec![
                first.value().cloned().unwrap_or_default(),
                second.value().cloned().unwrap_or_default(),
                relayed.value().cloned().unwrap_or_default(),
            ]))
        })
        .map(|array| {
            let values = realm.array_elements(&array).expect("array");
            (values[0].clone(), values[1].clone(), values[2].clone())
        })
        .expect("script completes");

    assert!(matches!(first, Value::Object(_)));
    assert_eq!(first, second);
    assert_eq!(first, relayed);
    assert_eq!(realm.to_display_string(&first), "RangeError: too far");
    let implementation = realm.implementation_of(&first).expect("linked to host error");
    assert!(implementation.ptr_eq(&HostRef::new(error)));
}

#[test]
fn script_runs_restricted_and_natives_run_ambient() {
    let mut realm = realm();
    let is_ambient = NativeFunction::builder("isAmbient", |realm, _| {
        Ok(Value::from(realm.trust_level() == TrustLevel::Ambient))
    })
    .build();
    let is_ambient = native(&mut realm, is_ambient);
    let observed = realm
        .run_script("trust.js", |realm| {
            let restricted = realm.trust_level() == TrustLevel::Restricted;
            let ambient = realm.call(&is_ambient, Value::Undefined, vec![])?;
            Ok(realm.new_array(vec![Value::from(restricted), ambient]))
        })
        .expect("script completes");
    assert_eq!(
        realm.array_elements(&observed),
        Some(vec![Value::from(true), Value::from(true)])
    );
    assert_eq!(realm.locks().depth(), 0);
    assert_eq!(realm.trust_level(), TrustLevel::Ambient);
}

#[derive(Debug)]
struct Secret;

static SECRET: TypeTag = TypeTag::new("Secret", None);

impl HostObject for Secret {
    fn type_tag(&self) -> &'static TypeTag {
        &SECRET
    }

    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

#[test]
fn unwrapped_host_values_never_reach_script() {
    let mut realm = realm();
    let leak = NativeFunction::builder("leak", |_, _| Ok(Value::Host(HostRef::new(Rc::new(Secret)))))
        .build();
    let leak = native(&mut realm, leak);
    let err = realm
        .run_script("leak.js", |realm| realm.call(&leak, Value::Undefined, vec![]))
        .expect_err("leak must fail");
    match err {
        RealmError::Uncaught { exception, .. } => assert!(matches!(
            exception,
            Exception::Fatal(ProtocolError::HostValueEscaped { ref function }) if function == "leak"
        )),
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(realm.locks().depth(), 0);

    let exposed = NativeFunction::builder("exposed", |_, _| Ok(Value::Host(HostRef::new(Rc::new(Secret)))))
        .after(interceptors::expose_return_value())
        .build();
    let exposed = native(&mut realm, exposed);
    let value = realm
        .run_script("exposed.js", |realm| realm.call(&exposed, Value::Undefined, vec![]))
        .expect("wrapped value");
    let implementation = realm.implementation_of(&value).expect("opaque object");
    assert!(implementation.is::<Secret>());
}

#[test]
fn untranslatable_host_exceptions_become_opaque_objects() {
    let mut realm = realm();
    let secret = Rc::new(Secret);
    let thrown = Rc::clone(&secret);
    let throw_secret = NativeFunction::builder("throwSecret", move |_, _| {
        Err(Exception::Value(Value::Host(HostRef::new(Rc::clone(&thrown)))))
    })
    .build();
    let throw_secret = native(&mut realm, throw_secret);
    let err = realm
        .run_script("opaque.js", |realm| realm.call(&throw_secret, Value::Undefined, vec![]))
        .expect_err("throws");
    let RealmError::Uncaught { exception, message, .. } = err else {
        panic!("expected an uncaught exception");
    };
    let value = exception.value().cloned().expect("realm value");
    assert!(matches!(value, Value::Object(_)));
    assert_eq!(message, "[object Object]");
    let implementation = realm.implementation_of(&value).expect("associated");
    assert!(implementation.ptr_eq(&HostRef::new(secret)));
}

#[test]
fn conflicting_associations_are_protocol_errors() {
    let mut realm = realm();
    let first = realm.new_object().as_object().expect("object");
    let second = realm.new_object().as_object().expect("object");
    let secret = HostRef::new(Rc::new(Secret));
    realm.associate(first, secret.clone()).expect("first association");
    realm.associate(first, secret.clone()).expect("same pair again");
    assert!(matches!(
        realm.associate(second, secret),
        Err(ProtocolError::Association(_))
    ));
    assert!(matches!(
        realm.associate(first, HostRef::new(Rc::new(Secret))),
        Err(ProtocolError::Association(_))
    ));
}

#[test]
fn primordials_survive_script_tampering() {
    let mut realm = realm();
    realm
        .run_script("tamper.js", |realm| {
            let global = realm.global_value();
            realm.set(&global, "Event", Value::from("gone"))?;
            realm.set(&global, "TypeError", Value::Null)?;
            Ok(Value::Undefined)
        })
        .expect("tampering succeeds");
    let event = realm.primordial("Event").expect("Event primordial");
    assert!(realm.is_callable(&event));
    let created = realm
        .construct(&event, vec![Value::from("still-works")])
        .expect("construct from primordial");
    assert_eq!(realm.get(&created, "type").unwrap(), Value::from("still-works"));

    let err = realm.type_error("still typed");
    let thrown = err.value().cloned().expect("realm value");
    assert_eq!(realm.to_display_string(&thrown), "TypeError: still typed");
}

#[test]
fn constructors_require_new_and_arguments() {
    let mut realm = realm();
    let event = realm.global_property("Event").expect("Event");
    let err = realm.call(&event, Value::Undefined, vec![Value::from("x")]).unwrap_err();
    let thrown = err.value().cloned().expect("realm value");
    assert_eq!(
        realm.to_display_string(&thrown),
        "TypeError: Failed to construct 'Event': Please use the 'new' operator, this DOM object constructor cannot be called as a function."
    );
    let err = realm.construct(&event, vec![]).unwrap_err();
    let thrown = err.value().cloned().expect("realm value");
    assert_eq!(
        realm.to_display_string(&thrown),
        "TypeError: Failed to construct 'Event': 1 argument required, but only 0 present."
    );
    let event_target = realm.primordial("EventTarget").expect("EventTarget");
    let prototype = realm.get(&event_target, "prototype").unwrap();
    let add = realm.get(&prototype, "addEventListener").unwrap();
    let err = realm.construct(&add, vec![]).unwrap_err();
    let thrown = err.value().cloned().expect("realm value");
    assert_eq!(
        realm.to_display_string(&thrown),
        "TypeError: addEventListener is not a constructor"
    );
}

#[test]
fn dom_exceptions_are_realm_errors() {
    let mut realm = realm();
    let constructor = realm.global_property("DOMException").expect("DOMException");
    let exception = realm
        .construct(&constructor, vec![Value::from("gone"), Value::from("NotFoundError")])
        .expect("construct");
    assert_eq!(realm.get(&exception, "code").unwrap(), Value::from(8u16));
    assert_eq!(realm.get(&exception, "NOT_FOUND_ERR").unwrap(), Value::from(8u16));
    assert_eq!(realm.to_display_string(&exception), "NotFoundError: gone");
    let error = realm.global_property("Error").expect("Error");
    let error_prototype = realm.get(&error, "prototype").unwrap();
    assert!(realm.heap().inherits_from(
        exception.as_object().unwrap(),
        error_prototype.as_object().unwrap()
    ));
    let stack = realm.get(&exception, "stack").unwrap();
    assert!(stack.as_str().unwrap().starts_with("NotFoundError: gone"));

    let custom = realm
        .construct(&constructor, vec![Value::from("odd"), Value::from("MadeUpError")])
        .expect("construct");
    assert_eq!(realm.get(&custom, "code").unwrap(), Value::from(0u16));
    let defaulted = realm.construct(&constructor, vec![]).expect("construct");
    assert_eq!(realm.get(&defaulted, "name").unwrap(), Value::from("Error"));
    assert_eq!(realm.get(&defaulted, "message").unwrap(), Value::from(""));
}

#[test]
fn realm_reads_yaml_configuration() {
    let mut file = NamedTempFile::new().expect("temp file");
    writeln!(
        file,
        "global_types:\n  - Worker\n  - WorkerGlobalScope\nglobal_name: DedicatedWorkerGlobalScope"
    )
    .expect("write config");
    let config = RealmConfig::load(Some(file.path().to_path_buf())).expect("config");
    let mut realm = Realm::new(config).expect("realm");
    assert!(realm.is("WorkerGlobalScope"));
    assert!(!realm.is("Window"));
    assert!(realm.global_target().is_none());
    let constructor = realm
        .global_property("DedicatedWorkerGlobalScope")
        .expect("global constructor");
    assert!(realm.is_callable(&constructor));
}
