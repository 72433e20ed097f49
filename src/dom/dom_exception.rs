use std::any::Any;
use std::fmt;
use std::rc::Rc;

use crate::realm::interceptors::{
    this_implementation, unwrap_this, validate_class_implementation, validate_class_invocation,
    validate_native_invocation,
};
use crate::realm::{
    after, Exception, HostObject, HostRef, InterfaceObjects, NativeFunction, ProtocolError,
    Realm, TypeTag, DOM_EXCEPTION, TO_STRING_TAG,
};
use crate::vm::{ErrorKind, ObjectKind, Value};

/// Legacy error codes, by exception name. Names outside the table have code 0.
const NAME_CODES: &[(&str, u16)] = &[
    ("IndexSizeError", 1),
    ("HierarchyRequestError", 3),
    ("WrongDocumentError", 4),
    ("InvalidCharacterError", 5),
    ("NoModificationAllowedError", 7),
    ("NotFoundError", 8),
    ("NotSupportedError", 9),
    ("InUseAttributeError", 10),
    ("InvalidStateError", 11),
    ("SyntaxError", 12),
    ("InvalidModificationError", 13),
    ("NamespaceError", 14),
    ("InvalidAccessError", 15),
    ("TypeMismatchError", 17),
    ("SecurityError", 18),
    ("NetworkError", 19),
    ("AbortError", 20),
    ("URLMismatchError", 21),
    ("QuotaExceededError", 22),
    ("TimeoutError", 23),
    ("InvalidNodeTypeError", 24),
    ("DataCloneError", 25),
];

pub const CONSTANTS: &[(&str, u16)] = &[
    ("INDEX_SIZE_ERR", 1),
    ("DOMSTRING_SIZE_ERR", 2),
    ("HIERARCHY_REQUEST_ERR", 3),
    ("WRONG_DOCUMENT_ERR", 4),
    ("INVALID_CHARACTER_ERR", 5),
    ("NO_DATA_ALLOWED_ERR", 6),
    ("NO_MODIFICATION_ALLOWED_ERR", 7),
    ("NOT_FOUND_ERR", 8),
    ("NOT_SUPPORTED_ERR", 9),
    ("INUSE_ATTRIBUTE_ERR", 10),
    ("INVALID_STATE_ERR", 11),
    ("SYNTAX_ERR", 12),
    ("INVALID_MODIFICATION_ERR", 13),
    ("NAMESPACE_ERR", 14),
    ("INVALID_ACCESS_ERR", 15),
    ("VALIDATION_ERR", 16),
    ("TYPE_MISMATCH_ERR", 17),
    ("SECURITY_ERR", 18),
    ("NETWORK_ERR", 19),
    ("ABORT_ERR", 20),
    ("URL_MISMATCH_ERR", 21),
    ("QUOTA_EXCEEDED_ERR", 22),
    ("TIMEOUT_ERR", 23),
    ("INVALID_NODE_TYPE_ERR", 24),
    ("DATA_CLONE_ERR", 25),
];

pub fn legacy_code(name: &str) -> u16 {
    NAME_CODES
        .iter()
        .find(|(known, _)| *known == name)
        .map(|(_, code)| *code)
        .unwrap_or(0)
}

/// Host side of a `DOMException`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomException {
    name: String,
    message: String,
    code: u16,
}

impl DomException {
    pub fn new(message: impl Into<String>, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            code: legacy_code(&name),
            name,
            message: message.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn code(&self) -> u16 {
        self.code
    }
}

impl fmt::Display for DomException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl HostObject for DomException {
    fn type_tag(&self) -> &'static TypeTag {
        &DOM_EXCEPTION
    }

    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

impl Realm {
    /// A `DOMException` ready to be thrown into the realm.
    pub fn dom_exception(&mut self, message: &str, name: &str) -> Exception {
        let prototype = match self.interfaces().get(&DOM_EXCEPTION) {
            Some(objects) => objects.prototype,
            None => self.intrinsics().error(ErrorKind::Error).prototype,
        };
        let object = self.new_object_id(Some(prototype));
        self.heap_mut().set_kind(object, ObjectKind::Error);
        let implementation = HostRef::new(Rc::new(DomException::new(message, name)));
        if let Err(err) = self.associate(object, implementation) {
            return Exception::Fatal(err);
        }
        if let Err(exception) = self.capture_stack_trace(object) {
            return exception;
        }
        Exception::Value(Value::Object(object))
    }
}

fn getter<F>(name: &str, read: F) -> NativeFunction
where
    F: Fn(&DomException) -> Value + 'static,
{
    NativeFunction::builder(name, move |realm, context| {
        let exception = this_implementation::<DomException>(realm, context)?;
        Ok(read(&exception))
    })
    .allow_new(false)
    .before(validate_native_invocation(&DOM_EXCEPTION))
    .before(unwrap_this())
    .build()
}

pub(crate) fn install(realm: &mut Realm) -> Result<InterfaceObjects, ProtocolError> {
    let constructor = NativeFunction::builder("DOMException", |realm, context| {
        let message = match context.argument(0) {
            Value::Undefined => String::new(),
            message => realm.to_display_string(&message),
        };
        let name = match context.argument(1) {
            Value::Undefined => "Error".to_string(),
            name => realm.to_display_string(&name),
        };
        let Some(object) = context.this.as_object() else {
            return Err(realm.type_error("Illegal constructor"));
        };
        realm.heap_mut().set_kind(object, ObjectKind::Error);
        realm.associate(object, HostRef::new(Rc::new(DomException::new(message, name))))?;
        Ok(context.this.clone())
    })
    .before(validate_class_invocation("DOMException"))
    .before(validate_class_implementation(&DOM_EXCEPTION))
    .after(after(|realm, value, _| {
        if let Some(object) = value.as_object() {
            realm.capture_stack_trace(object)?;
        }
        Ok(value)
    }))
    .build();

    let error = realm.intrinsics().error(ErrorKind::Error).clone();
    let objects = realm.define_interface(&DOM_EXCEPTION, constructor, error.prototype)?;
    realm
        .heap_mut()
        .set_prototype(objects.constructor, Some(error.constructor));

    let prototype = objects.prototype;
    realm.define_native_accessor(
        prototype,
        "name",
        getter("name", |exception| Value::from(exception.name())),
        None,
    );
    realm.define_native_accessor(
        prototype,
        "message",
        getter("message", |exception| Value::from(exception.message())),
        None,
    );
    realm.define_native_accessor(
        prototype,
        "code",
        getter("code", |exception| Value::from(exception.code())),
        None,
    );
    for (name, code) in CONSTANTS {
        realm.define_value(objects.constructor, name, Value::from(*code));
        realm.define_value(prototype, name, Value::from(*code));
    }
    realm.define_value(prototype, TO_STRING_TAG, Value::from("DOMException"));
    Ok(objects)
}
