//! Standard interceptors shared by every interface the realm installs.
//!
//! Unwrapping replaces interface objects with [`Value::Host`] handles before the
//! implementation runs; wrapping maps implementation objects back afterwards.

use std::rc::Rc;

use tracing::error;

use super::exceptions::Exception;
use super::identity::{HostObject, TypeTag};
use super::interface::{InterfaceObject, InterfaceRole};
use super::native::{after, before, finally, After, Before, CallContext, Finally};
use super::Realm;
use crate::vm::Value;

pub fn unwrap_this() -> Before {
    before(|realm, context| {
        if let Some(implementation) = realm.implementation_of(&context.this) {
            context.this = Value::Host(implementation);
        }
        Ok(())
    })
}

pub fn unwrap_own_this() -> Before {
    before(|realm, context| {
        if let Some(implementation) = realm.own_implementation_of(&context.this) {
            context.this = Value::Host(implementation);
        }
        Ok(())
    })
}

pub fn unwrap_arguments(indices: &[usize]) -> Before {
    let indices = indices.to_vec();
    before(move |realm, context| {
        for &index in &indices {
            let Some(argument) = context.arguments.get(index) else {
                continue;
            };
            if let Some(implementation) = realm.implementation_of(argument) {
                context.arguments[index] = Value::Host(implementation);
            }
        }
        Ok(())
    })
}

pub fn unwrap_all_arguments() -> Before {
    before(|realm, context| {
        for argument in context.arguments.iter_mut() {
            if let Some(implementation) = realm.implementation_of(argument) {
                *argument = Value::Host(implementation);
            }
        }
        Ok(())
    })
}

pub fn wrap_return_value() -> After {
    after(|realm, value, _| {
        Ok(match realm.interface_of(&value) {
            Some(interface) => Value::Object(interface),
            None => value,
        })
    })
}

pub fn wrap_own_return_value() -> After {
    after(|realm, value, _| {
        Ok(match realm.own_interface_of(&value) {
            Some(interface) => Value::Object(interface),
            None => value,
        })
    })
}

/// Like [`wrap_own_return_value`], creating the interface object when missing.
pub fn expose_return_value() -> After {
    after(|realm, value, _| match value {
        Value::Host(host) => Ok(Value::Object(realm.expose(&host)?)),
        value => Ok(value),
    })
}

pub fn enter_unlock() -> Before {
    before(|realm, _| {
        realm.locks().enter_unlock();
        Ok(())
    })
}

pub fn leave_unlock() -> Finally {
    finally(|realm, _| {
        if let Err(err) = realm.locks().leave_unlock() {
            error!(target = "webrealm", error = %err, "unbalanced unlock interceptor");
        }
    })
}

/// `this` must be an instance carrying an implementation of `tag`.
pub fn validate_native_invocation(tag: &'static TypeTag) -> Before {
    before(move |realm, context| {
        let is_instance = match (context.this.as_object(), realm.interfaces().nearest(tag)) {
            (Some(object), Some(interface)) => {
                realm.heap().inherits_from(object, interface.prototype)
            }
            (Some(_), None) => true,
            _ => false,
        };
        let implements = realm
            .implementation_of(&context.this)
            .map(|implementation| implementation.type_tag().is_a(tag))
            .unwrap_or(false);
        if !is_instance || !implements {
            return Err(realm.type_error("Illegal invocation"));
        }
        Ok(())
    })
}

pub fn validate_class_invocation(name: &str) -> Before {
    let message = format!(
        "Failed to construct '{name}': Please use the 'new' operator, this DOM object constructor cannot be called as a function."
    );
    before(move |realm, context| {
        if context.new_target.is_none() {
            return Err(realm.type_error(&message));
        }
        Ok(())
    })
}

/// `new.target` must be the interface constructor of `tag`, or derive from it.
pub fn validate_class_implementation(tag: &'static TypeTag) -> Before {
    before(move |realm, context| {
        let Some(new_target) = context.new_target.clone() else {
            return Err(realm.type_error("Illegal constructor"));
        };
        let prototype = realm.get(&new_target, "prototype")?;
        let is_interface = |realm: &Realm, value: &Value, role: InterfaceRole| {
            realm
                .implementation_of(value)
                .and_then(|implementation| implementation.downcast::<InterfaceObject>())
                .map(|interface| interface.is(tag, role))
                .unwrap_or(false)
        };
        if !is_interface(&*realm, &new_target, InterfaceRole::Constructor)
            || !is_interface(&*realm, &prototype, InterfaceRole::Prototype)
        {
            return Err(realm.type_error("Illegal constructor"));
        }
        Ok(())
    })
}

fn argument_count(required: usize) -> String {
    if required == 1 {
        "1 argument required".to_string()
    } else {
        format!("{required} arguments required")
    }
}

pub fn minimum_constructor_arguments(required: usize, interface: &str) -> Before {
    let prefix = format!("Failed to construct '{interface}'");
    before(move |realm, context| {
        let present = context.arguments.len();
        if present < required {
            let message = format!(
                "{prefix}: {}, but only {present} present.",
                argument_count(required)
            );
            return Err(realm.type_error(&message));
        }
        Ok(())
    })
}

pub fn minimum_method_arguments(required: usize, method: &str, interface: &str) -> Before {
    let prefix = format!("Failed to execute '{method}' on '{interface}'");
    before(move |realm, context| {
        let present = context.arguments.len();
        if present < required {
            let message = format!(
                "{prefix}: {}, but only {present} present.",
                argument_count(required)
            );
            return Err(realm.type_error(&message));
        }
        Ok(())
    })
}

/// Argument `index` must implement `tag`; it is replaced by its implementation.
pub fn validate_argument_type_and_unwrap(
    interface: &str,
    method: &str,
    index: usize,
    type_name: &str,
    tag: &'static TypeTag,
) -> Before {
    let message = format!(
        "Failed to execute '{method}' on '{interface}': parameter {} is not of type '{type_name}'.",
        index + 1
    );
    before(move |realm, context| {
        let implementation = realm
            .implementation_of(&context.argument(index))
            .filter(|implementation| implementation.type_tag().is_a(tag));
        match implementation {
            Some(implementation) if index < context.arguments.len() => {
                context.arguments[index] = Value::Host(implementation);
                Ok(())
            }
            _ => Err(realm.type_error(&message)),
        }
    })
}

/// The unwrapped `this` of a method call, as implementation type `T`.
pub fn this_implementation<T: HostObject>(
    realm: &mut Realm,
    context: &CallContext,
) -> Result<Rc<T>, Exception> {
    argument_implementation(realm, &context.this)
}

/// An unwrapped value as implementation type `T`.
pub fn argument_implementation<T: HostObject>(
    realm: &mut Realm,
    value: &Value,
) -> Result<Rc<T>, Exception> {
    match value.as_host().and_then(|host| host.downcast::<T>()) {
        Some(implementation) => Ok(implementation),
        None => Err(realm.type_error("Illegal invocation")),
    }
}
