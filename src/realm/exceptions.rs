use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use thiserror::Error;
use tracing::debug;

use super::error::ProtocolError;
use super::identity::{HostObject, HostRef, TypeTag, HOST_ERROR};
use super::Realm;
use crate::vm::{ErrorKind, ObjectId, Value};

/// What unwinds through the native call pipeline.
#[derive(Debug, Clone, Error)]
pub enum Exception {
    /// A value thrown inside the realm.
    #[error("uncaught script exception ({})", .0.type_name())]
    Value(Value),
    /// A host error that has not crossed into the realm yet.
    #[error("{0}")]
    Host(Rc<HostError>),
    /// A host bug. Never rewritten by `catch` interceptors.
    #[error("protocol violation: {0}")]
    Fatal(#[from] ProtocolError),
}

impl Exception {
    pub fn host(kind: ErrorKind, message: impl Into<String>) -> Self {
        Exception::Host(Rc::new(HostError::new(kind, message)))
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Exception::Fatal(_))
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Exception::Value(value) => Some(value),
            _ => None,
        }
    }
}

/// An error raised by host code, before translation.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct HostError {
    kind: ErrorKind,
    message: String,
    /// Stack recorded where the host error was raised.
    stack: Option<String>,
    /// Members of an `AggregateError`, in order.
    errors: Vec<Value>,
}

impl HostError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            stack: None,
            errors: Vec::new(),
        }
    }

    pub fn aggregate(message: impl Into<String>, errors: Vec<Value>) -> Self {
        Self {
            kind: ErrorKind::AggregateError,
            message: message.into(),
            stack: None,
            errors,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn stack(&self) -> Option<&str> {
        self.stack.as_deref()
    }

    pub fn errors(&self) -> &[Value] {
        &self.errors
    }
}

impl HostObject for HostError {
    fn type_tag(&self) -> &'static TypeTag {
        &HOST_ERROR
    }

    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

/// Host side of a realm error constructor or prototype.
#[derive(Debug)]
pub struct HostErrorClass {
    pub kind: ErrorKind,
    pub prototype: bool,
}

impl HostObject for HostErrorClass {
    fn type_tag(&self) -> &'static TypeTag {
        &HOST_ERROR
    }

    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

pub type Translator = fn(&mut Realm, &Rc<HostError>) -> Result<ObjectId, Exception>;

/// Converts host errors into realm-local error objects, by error kind.
#[derive(Clone, Default)]
pub struct ExceptionTranslator {
    table: HashMap<ErrorKind, Translator>,
}

impl fmt::Debug for ExceptionTranslator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.table.keys()).finish()
    }
}

impl ExceptionTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Translators for every built-in error kind.
    pub fn standard() -> Self {
        let mut translator = Self::new();
        for kind in ErrorKind::ALL {
            if kind != ErrorKind::AggregateError {
                translator.register(kind, translate_error);
            }
        }
        translator.register(ErrorKind::AggregateError, translate_aggregate_error);
        translator
    }

    pub fn register(&mut self, kind: ErrorKind, translator: Translator) -> Option<Translator> {
        self.table.insert(kind, translator)
    }

    pub fn get(&self, kind: ErrorKind) -> Option<Translator> {
        self.table.get(&kind).copied()
    }
}

fn translate_error(realm: &mut Realm, error: &Rc<HostError>) -> Result<ObjectId, Exception> {
    let object = realm.create_error(error.kind(), error.message());
    match error.stack() {
        Some(stack) => realm.define_value(object, "stack", Value::from(stack)),
        None => realm.capture_stack_trace(object)?,
    }
    realm.associate(object, HostRef::new(Rc::clone(error)))?;
    Ok(object)
}

fn translate_aggregate_error(
    realm: &mut Realm,
    error: &Rc<HostError>,
) -> Result<ObjectId, Exception> {
    let object = translate_error(realm, error)?;
    let mut members = Vec::with_capacity(error.errors().len());
    for member in error.errors() {
        members.push(realm.translate_value(member.clone())?);
    }
    let members = realm.new_array(members);
    realm.define_value(object, "errors", members);
    Ok(object)
}

impl Realm {
    /// Make `exception` safe to deliver to script.
    pub(crate) fn translate_exception(&mut self, exception: Exception) -> Exception {
        let value = match exception {
            Exception::Fatal(err) => return Exception::Fatal(err),
            Exception::Value(value) => value,
            Exception::Host(error) => Value::Host(HostRef::new(error)),
        };
        match self.translate_value(value) {
            Ok(value) => Exception::Value(value),
            Err(exception) => exception,
        }
    }

    /// Realm values pass through; host values become their interface, a
    /// translated error, or an opaque object.
    pub(crate) fn translate_value(&mut self, value: Value) -> Result<Value, Exception> {
        let Value::Host(host) = value else {
            return Ok(value);
        };
        if let Some(interface) = self.own_interface_of(&Value::Host(host.clone())) {
            return Ok(Value::Object(interface));
        }
        if let Some(error) = host.downcast::<HostError>() {
            if let Some(translate) = self.translators.get(error.kind()) {
                debug!(target = "webrealm", error = %error, "translating host error");
                return translate(self, &error).map(Value::Object);
            }
        }
        Ok(Value::Object(self.expose(&host)?))
    }
}
