//! Script interfaces installed into every realm.

use std::rc::Rc;

use tracing::debug;

use super::abort::AbortSignal;
use super::dom_exception;
use super::event::{Event, EventInit, EventKind, EventPhase};
use super::event_target::{flatten, flatten_more, EventTarget, Listener};
use crate::realm::interceptors::{
    argument_implementation, expose_return_value, minimum_constructor_arguments,
    minimum_method_arguments, this_implementation, unwrap_own_this, unwrap_this,
    validate_argument_type_and_unwrap,
    validate_class_implementation, validate_class_invocation, validate_native_invocation,
};
use crate::realm::{
    CallContext, Exception, HostRef, InterfaceObjects, NativeFunction, NativeFunctionBuilder,
    NativeResult, ProtocolError, Realm, TypeTag, ABORT_SIGNAL, CUSTOM_EVENT, EVENT, EVENT_TARGET,
    TO_STRING_TAG,
};
use crate::vm::{ObjectId, Value};

pub(crate) fn install(realm: &mut Realm) -> Result<(), ProtocolError> {
    let event_target = install_event_target(realm)?;
    let event = install_event(realm)?;
    let custom_event = install_custom_event(realm, &event)?;
    let abort_signal = install_abort_signal(realm, &event_target)?;
    let dom_exception = dom_exception::install(realm)?;
    install_global(realm, &event_target)?;

    let global = realm.global();
    let interfaces = [
        ("EventTarget", &event_target),
        ("Event", &event),
        ("CustomEvent", &custom_event),
        ("AbortSignal", &abort_signal),
        ("DOMException", &dom_exception),
    ];
    for (name, objects) in interfaces {
        let constructor = Value::Object(objects.constructor);
        realm.define_value(global, name, constructor.clone());
        realm.define_primordial(name, constructor);
    }
    debug!(
        target = "webrealm",
        interfaces = realm.interfaces().len(),
        "installed event interfaces"
    );
    Ok(())
}

fn event_target_of(realm: &mut Realm, value: &Value) -> Result<Rc<EventTarget>, Exception> {
    let host = value.as_host();
    if let Some(target) = host.and_then(|host| host.downcast::<EventTarget>()) {
        return Ok(target);
    }
    if let Some(signal) = host.and_then(|host| host.downcast::<AbortSignal>()) {
        return Ok(Rc::clone(signal.target()));
    }
    Err(realm.type_error("Illegal invocation"))
}

fn target_value(target: Option<Rc<EventTarget>>) -> Value {
    match target {
        Some(target) => Value::Host(target.host_ref()),
        None => Value::Null,
    }
}

fn illegal_constructor(name: &str) -> NativeFunction {
    NativeFunction::builder(name, |realm, _| Err(realm.type_error("Illegal constructor"))).build()
}

fn install_event_target(realm: &mut Realm) -> Result<InterfaceObjects, ProtocolError> {
    let constructor = NativeFunction::builder("EventTarget", |realm, context| {
        let Some(object) = context.this.as_object() else {
            return Err(realm.type_error("Illegal constructor"));
        };
        realm.associate(object, HostRef::new(EventTarget::new()))?;
        Ok(context.this.clone())
    })
    .before(validate_class_invocation("EventTarget"))
    .before(validate_class_implementation(&EVENT_TARGET))
    .build();
    let object_prototype = realm.intrinsics().object_prototype;
    let objects = realm.define_interface(&EVENT_TARGET, constructor, object_prototype)?;
    let prototype = objects.prototype;

    let add_event_listener = NativeFunction::builder("addEventListener", |realm, context| {
        let target = event_target_of(realm, &context.this)?;
        let event_type = realm.to_display_string(&context.argument(0));
        let callback = context.argument(1);
        if !matches!(callback, Value::Object(_) | Value::Null | Value::Undefined) {
            return Err(realm.type_error(
                "Failed to execute 'addEventListener' on 'EventTarget': parameter 2 is not of type 'Object'.",
            ));
        }
        let options = flatten_more(realm, &context.argument(2))?;
        target.add_an_event_listener(Listener::new(&event_type, callback, options));
        Ok(Value::Undefined)
    })
    .length(2)
    .allow_new(false)
    .before(validate_native_invocation(&EVENT_TARGET))
    .before(minimum_method_arguments(2, "addEventListener", "EventTarget"))
    .before(unwrap_this())
    .build();
    realm.define_native_method(prototype, add_event_listener);

    let remove_event_listener = NativeFunction::builder("removeEventListener", |realm, context| {
        let target = event_target_of(realm, &context.this)?;
        let event_type = realm.to_display_string(&context.argument(0));
        let capture = flatten(realm, &context.argument(2))?;
        target.remove_matching(&event_type, &context.argument(1), capture);
        Ok(Value::Undefined)
    })
    .length(2)
    .allow_new(false)
    .before(validate_native_invocation(&EVENT_TARGET))
    .before(minimum_method_arguments(2, "removeEventListener", "EventTarget"))
    .before(unwrap_this())
    .build();
    realm.define_native_method(prototype, remove_event_listener);

    let dispatch_event = NativeFunction::builder("dispatchEvent", |realm, context| {
        let target = event_target_of(realm, &context.this)?;
        let event = argument_implementation::<Event>(realm, &context.argument(0))?;
        realm.dispatch_event(&target, &event).map(Value::from)
    })
    .length(1)
    .allow_new(false)
    .before(validate_native_invocation(&EVENT_TARGET))
    .before(minimum_method_arguments(1, "dispatchEvent", "EventTarget"))
    .before(validate_argument_type_and_unwrap(
        "EventTarget",
        "dispatchEvent",
        0,
        "Event",
        &EVENT,
    ))
    .before(unwrap_this())
    .build();
    realm.define_native_method(prototype, dispatch_event);

    realm.define_value(prototype, TO_STRING_TAG, Value::from("EventTarget"));
    Ok(objects)
}

fn event_constructor(name: &'static str, kind: EventKind, tag: &'static TypeTag) -> NativeFunction {
    NativeFunction::builder(name, move |realm, context| {
        let event_type = realm.to_display_string(&context.argument(0));
        let init = EventInit::from_value(realm, kind, &context.argument(1))?;
        let Some(object) = context.this.as_object() else {
            return Err(realm.type_error("Illegal constructor"));
        };
        let event = Event::create(kind, &event_type, init, realm.now());
        realm.associate(object, HostRef::new(event))?;
        let unforgeables = realm
            .interfaces()
            .nearest(tag)
            .map(|objects| objects.unforgeables.clone())
            .unwrap_or_default();
        realm.install_unforgeables(object, &unforgeables);
        Ok(context.this.clone())
    })
    .length(1)
    .before(validate_class_invocation(name))
    .before(validate_class_implementation(tag))
    .before(minimum_constructor_arguments(1, name))
    .build()
}

/// A native operation on an `Event`, with `this` validated and unwrapped.
fn event_operation<F>(name: &str, tag: &'static TypeTag, operation: F) -> NativeFunctionBuilder
where
    F: Fn(&mut Realm, &Rc<Event>, &CallContext) -> NativeResult + 'static,
{
    NativeFunction::builder(name, move |realm, context| {
        let event = this_implementation::<Event>(realm, context)?;
        operation(realm, &event, context)
    })
    .allow_new(false)
    .before(validate_native_invocation(tag))
    .before(unwrap_this())
}

fn event_getter<F>(name: &str, read: F) -> NativeFunction
where
    F: Fn(&Event) -> Value + 'static,
{
    event_operation(name, &EVENT, move |_, event, _| Ok(read(event))).build()
}

fn target_getter<F>(name: &str, read: F) -> NativeFunction
where
    F: Fn(&Event) -> Option<Rc<EventTarget>> + 'static,
{
    event_operation(name, &EVENT, move |_, event, _| Ok(target_value(read(event))))
        .after(expose_return_value())
        .build()
}

fn event_setter<F>(name: &str, write: F) -> NativeFunction
where
    F: Fn(&Event, bool) + 'static,
{
    event_operation(name, &EVENT, move |_, event, context| {
        write(event, context.argument(0).to_boolean());
        Ok(Value::Undefined)
    })
    .length(1)
    .build()
}

fn define_phase_constants(realm: &mut Realm, object: ObjectId) {
    for (name, phase) in EventPhase::CONSTANTS {
        realm.define_value(object, name, Value::from(phase.code()));
    }
}

fn install_event(realm: &mut Realm) -> Result<InterfaceObjects, ProtocolError> {
    let constructor = event_constructor("Event", EventKind::Event, &EVENT);
    let object_prototype = realm.intrinsics().object_prototype;
    let objects = realm.define_interface(&EVENT, constructor, object_prototype)?;
    let prototype = objects.prototype;

    let getters: Vec<(&str, NativeFunction)> = vec![
        ("type", event_getter("type", |event| Value::from(event.event_type()))),
        ("eventPhase", event_getter("eventPhase", |event| Value::from(event.phase().code()))),
        ("bubbles", event_getter("bubbles", |event| Value::from(event.bubbles()))),
        ("cancelable", event_getter("cancelable", |event| Value::from(event.cancelable()))),
        (
            "defaultPrevented",
            event_getter("defaultPrevented", |event| Value::from(event.default_prevented())),
        ),
        ("composed", event_getter("composed", |event| Value::from(event.composed()))),
        ("timeStamp", event_getter("timeStamp", |event| Value::from(event.time_stamp()))),
        ("target", target_getter("target", Event::target)),
        ("srcElement", target_getter("srcElement", Event::target)),
        ("currentTarget", target_getter("currentTarget", Event::current_target)),
    ];
    for (key, getter) in getters {
        realm.define_native_accessor(prototype, key, getter, None);
    }
    realm.define_native_accessor(
        prototype,
        "returnValue",
        event_getter("returnValue", |event| Value::from(event.return_value())),
        Some(event_setter("returnValue", Event::set_return_value)),
    );
    realm.define_native_accessor(
        prototype,
        "cancelBubble",
        event_getter("cancelBubble", |event| Value::from(event.cancel_bubble())),
        Some(event_setter("cancelBubble", Event::set_cancel_bubble)),
    );

    let composed_path = event_operation("composedPath", &EVENT, |realm, event, _| {
        let mut path = Vec::new();
        for target in event.composed_path() {
            path.push(Value::Object(realm.expose(&target.host_ref())?));
        }
        Ok(realm.new_array(path))
    })
    .build();
    realm.define_native_method(prototype, composed_path);

    let stop_propagation = event_operation("stopPropagation", &EVENT, |_, event, _| {
        event.stop_propagation();
        Ok(Value::Undefined)
    })
    .build();
    realm.define_native_method(prototype, stop_propagation);

    let stop_immediate_propagation =
        event_operation("stopImmediatePropagation", &EVENT, |_, event, _| {
            event.stop_immediate_propagation();
            Ok(Value::Undefined)
        })
        .build();
    realm.define_native_method(prototype, stop_immediate_propagation);

    let prevent_default = event_operation("preventDefault", &EVENT, |_, event, _| {
        event.prevent_default();
        Ok(Value::Undefined)
    })
    .build();
    realm.define_native_method(prototype, prevent_default);

    let init_event = event_operation("initEvent", &EVENT, |realm, event, context| {
        let event_type = realm.to_display_string(&context.argument(0));
        event.init_event(
            &event_type,
            context.argument(1).to_boolean(),
            context.argument(2).to_boolean(),
        );
        Ok(Value::Undefined)
    })
    .length(1)
    .before(minimum_method_arguments(1, "initEvent", "Event"))
    .build();
    realm.define_native_method(prototype, init_event);

    define_phase_constants(realm, objects.constructor);
    define_phase_constants(realm, prototype);
    realm.define_value(prototype, TO_STRING_TAG, Value::from("Event"));

    // Unforgeable: only the instance the accessor was installed on answers.
    let is_trusted = NativeFunction::builder("isTrusted", |realm, context| {
        let event = this_implementation::<Event>(realm, context)?;
        Ok(Value::from(event.is_trusted()))
    })
    .allow_new(false)
    .before(validate_native_invocation(&EVENT))
    .before(unwrap_own_this())
    .build();
    let is_trusted = realm.new_native_function(is_trusted);
    if let Some(objects) = realm.interfaces_mut().get_mut(&EVENT) {
        objects.unforgeables.push((Rc::from("isTrusted"), is_trusted));
    }
    Ok(objects)
}

fn install_custom_event(
    realm: &mut Realm,
    event: &InterfaceObjects,
) -> Result<InterfaceObjects, ProtocolError> {
    let constructor = event_constructor("CustomEvent", EventKind::Custom, &CUSTOM_EVENT);
    let objects = realm.define_interface(&CUSTOM_EVENT, constructor, event.prototype)?;
    realm
        .heap_mut()
        .set_prototype(objects.constructor, Some(event.constructor));
    let unforgeables = realm
        .interfaces()
        .get(&EVENT)
        .map(|objects| objects.unforgeables.clone())
        .unwrap_or_default();
    if let Some(objects) = realm.interfaces_mut().get_mut(&CUSTOM_EVENT) {
        objects.unforgeables = unforgeables;
    }
    let prototype = objects.prototype;

    let detail = event_operation("detail", &CUSTOM_EVENT, |_, event, _| Ok(event.detail())).build();
    realm.define_native_accessor(prototype, "detail", detail, None);

    let init_custom_event = event_operation("initCustomEvent", &CUSTOM_EVENT, |realm, event, context| {
        let event_type = realm.to_display_string(&context.argument(0));
        let detail = match context.argument(3) {
            Value::Undefined => Value::Null,
            detail => detail,
        };
        event.init_custom_event(
            &event_type,
            context.argument(1).to_boolean(),
            context.argument(2).to_boolean(),
            detail,
        );
        Ok(Value::Undefined)
    })
    .length(1)
    .before(minimum_method_arguments(1, "initCustomEvent", "CustomEvent"))
    .build();
    realm.define_native_method(prototype, init_custom_event);

    realm.define_value(prototype, TO_STRING_TAG, Value::from("CustomEvent"));
    Ok(objects)
}

fn signal_getter<F>(name: &str, read: F) -> NativeFunction
where
    F: Fn(&AbortSignal) -> Value + 'static,
{
    NativeFunction::builder(name, move |realm, context| {
        let signal = this_implementation::<AbortSignal>(realm, context)?;
        Ok(read(&signal))
    })
    .allow_new(false)
    .before(validate_native_invocation(&ABORT_SIGNAL))
    .before(unwrap_this())
    .build()
}

fn install_abort_signal(
    realm: &mut Realm,
    event_target: &InterfaceObjects,
) -> Result<InterfaceObjects, ProtocolError> {
    let objects = realm.define_interface(
        &ABORT_SIGNAL,
        illegal_constructor("AbortSignal"),
        event_target.prototype,
    )?;
    realm
        .heap_mut()
        .set_prototype(objects.constructor, Some(event_target.constructor));
    let prototype = objects.prototype;
    realm.define_native_accessor(
        prototype,
        "aborted",
        signal_getter("aborted", |signal| Value::from(signal.aborted())),
        None,
    );
    realm.define_native_accessor(
        prototype,
        "reason",
        signal_getter("reason", AbortSignal::reason),
        None,
    );
    let throw_if_aborted = NativeFunction::builder("throwIfAborted", |realm, context| {
        let signal = this_implementation::<AbortSignal>(realm, context)?;
        if signal.aborted() {
            return Err(Exception::Value(signal.reason()));
        }
        Ok(Value::Undefined)
    })
    .allow_new(false)
    .before(validate_native_invocation(&ABORT_SIGNAL))
    .before(unwrap_this())
    .build();
    realm.define_native_method(prototype, throw_if_aborted);
    realm.define_value(prototype, TO_STRING_TAG, Value::from("AbortSignal"));
    Ok(objects)
}

/// Give the global object its class, and in a `Window` realm make it an event target.
fn install_global(realm: &mut Realm, event_target: &InterfaceObjects) -> Result<(), ProtocolError> {
    let name = realm.config().global_name.clone();
    let window = realm.is("Window");
    let parent = if window {
        event_target.prototype
    } else {
        realm.intrinsics().object_prototype
    };
    let constructor = realm.new_native_function(illegal_constructor(&name));
    let prototype = realm.new_object_id(Some(parent));
    realm.define_value(constructor, "prototype", Value::Object(prototype));
    realm.define_value(prototype, "constructor", Value::Object(constructor));
    realm.define_value(prototype, TO_STRING_TAG, Value::from(name.as_str()));
    if window {
        realm
            .heap_mut()
            .set_prototype(constructor, Some(event_target.constructor));
    }
    let global = realm.global();
    realm.heap_mut().set_prototype(global, Some(prototype));
    realm.define_value(global, &name, Value::Object(constructor));

    if window {
        let target = EventTarget::new();
        realm.associate(global, HostRef::new(Rc::clone(&target)))?;
        realm.set_global_target(target);
        install_event_accessor(realm);
    }
    Ok(())
}

fn global_receiver(realm: &mut Realm, context: &CallContext) -> Result<ObjectId, Exception> {
    let global = realm.global();
    match &context.this {
        Value::Undefined | Value::Null => Ok(global),
        Value::Object(object) if *object == global => Ok(global),
        _ => Err(realm.type_error("Illegal invocation")),
    }
}

/// `window.event`: the event whose listeners are running.
fn install_event_accessor(realm: &mut Realm) {
    let getter = NativeFunction::builder("event", |realm, context| {
        global_receiver(realm, context)?;
        match realm.current_event() {
            Some(event) => Ok(Value::Object(realm.expose(&HostRef::new(event))?)),
            None => Ok(Value::Undefined),
        }
    })
    .allow_new(false)
    .build();
    let setter = NativeFunction::builder("event", |realm, context| {
        let global = global_receiver(realm, context)?;
        realm.define_value(global, "event", context.argument(0));
        Ok(Value::Undefined)
    })
    .length(1)
    .allow_new(false)
    .build();
    let global = realm.global();
    realm.define_native_accessor(global, "event", getter, Some(setter));
}
