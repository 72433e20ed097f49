//! Script-facing operations: property access, calls, object creation.

use std::rc::Rc;

use tracing::error;

use super::exceptions::Exception;
use super::identity::{HostRef, TypeTag};
use super::interface::{InterfaceObject, InterfaceObjects, InterfaceRole};
use super::native::{CallContext, NativeFunction, NativeResult};
use super::{ProtocolError, Realm};
use crate::vm::{
    format_number, ErrorKind, FunctionData, IntrinsicFunction, ObjectId, ObjectKind, Property,
    ScriptFunction, Value,
};

/// Property naming the class shown by `to_display_string`, in place of `Symbol.toStringTag`.
pub const TO_STRING_TAG: &str = "Symbol.toStringTag";

/// Largest valid array index, 2^32 - 2.
const MAX_ARRAY_INDEX: usize = 4_294_967_294;

/// An array index key in canonical form.
fn array_index(key: &str) -> Option<usize> {
    if key.len() > 1 && key.starts_with('0') {
        return None;
    }
    key.parse::<usize>()
        .ok()
        .filter(|index| *index <= MAX_ARRAY_INDEX)
}

impl Realm {
    pub fn get(&mut self, target: &Value, key: &str) -> NativeResult {
        let id = match target {
            Value::Object(id) => *id,
            Value::String(value) if key == "length" => {
                return Ok(Value::from(value.encode_utf16().count() as f64))
            }
            Value::Undefined | Value::Null => {
                let message = format!(
                    "Cannot read properties of {} (reading '{key}')",
                    target.type_name()
                );
                return Err(self.type_error(&message));
            }
            _ => return Ok(Value::Undefined),
        };
        if let Some(elements) = self.heap.array_elements(id) {
            if key == "length" {
                return Ok(Value::from(elements.len() as f64));
            }
            if let Some(index) = array_index(key) {
                return Ok(elements.get(index).cloned().unwrap_or_default());
            }
        }
        match self.heap.lookup(id, key) {
            Some((_, Property::Data(value))) => Ok(value),
            Some((_, Property::Accessor { get: Some(getter), .. })) => {
                self.call(&Value::Object(getter), target.clone(), Vec::new())
            }
            _ => Ok(Value::Undefined),
        }
    }

    pub fn set(&mut self, target: &Value, key: &str, value: Value) -> Result<(), Exception> {
        let id = match target {
            Value::Object(id) => *id,
            Value::Undefined | Value::Null => {
                let message = format!(
                    "Cannot set properties of {} (setting '{key}')",
                    target.type_name()
                );
                return Err(self.type_error(&message));
            }
            _ => return Ok(()),
        };
        let length = self.heap.array_elements(id).map(<[Value]>::len);
        if let (Some(length), Some(index)) = (length, array_index(key)) {
            if index > length {
                let message = format!("Cannot write array index {index} past length {length}");
                return Err(self.range_error(&message));
            }
            let mut elements = self
                .heap
                .array_elements(id)
                .map(<[Value]>::to_vec)
                .unwrap_or_default();
            if index == length {
                elements.push(value);
            } else {
                elements[index] = value;
            }
            self.heap.set_kind(id, ObjectKind::Array(elements));
            return Ok(());
        }
        match self.heap.lookup(id, key) {
            Some((_, Property::Accessor { set: Some(setter), .. })) => {
                self.call(&Value::Object(setter), target.clone(), vec![value])?;
                Ok(())
            }
            Some((_, Property::Accessor { set: None, .. })) => Ok(()),
            _ => {
                self.heap.define_value(id, key, value);
                Ok(())
            }
        }
    }

    pub fn define_value(&mut self, object: ObjectId, key: &str, value: Value) {
        self.heap.define_value(object, key, value);
    }

    pub fn define_accessor(
        &mut self,
        object: ObjectId,
        key: &str,
        getter: Option<ObjectId>,
        setter: Option<ObjectId>,
    ) {
        self.heap.define(
            object,
            key,
            Property::Accessor {
                get: getter,
                set: setter,
            },
        );
    }

    pub fn has_own_property(&self, object: &Value, key: &str) -> bool {
        object
            .as_object()
            .map(|id| self.heap.has_own(id, key))
            .unwrap_or(false)
    }

    pub fn is_callable(&self, value: &Value) -> bool {
        value
            .as_object()
            .map(|id| self.heap.is_callable(id))
            .unwrap_or(false)
    }

    pub fn call(&mut self, function: &Value, this: Value, arguments: Vec<Value>) -> NativeResult {
        match function {
            Value::Object(id) if self.heap.is_callable(*id) => {
                self.call_object(*id, CallContext::new(this, arguments))
            }
            _ => {
                let message = format!("{} is not a function", self.to_display_string(function));
                Err(self.type_error(&message))
            }
        }
    }

    pub fn invoke_method(&mut self, target: &Value, name: &str, arguments: Vec<Value>) -> NativeResult {
        let method = self.get(target, name)?;
        self.call(&method, target.clone(), arguments)
    }

    pub fn construct(&mut self, constructor: &Value, arguments: Vec<Value>) -> NativeResult {
        self.construct_with_new_target(constructor, arguments, constructor)
    }

    /// `Reflect.construct(constructor, arguments, new_target)`.
    pub fn construct_with_new_target(
        &mut self,
        constructor: &Value,
        arguments: Vec<Value>,
        new_target: &Value,
    ) -> NativeResult {
        let function = constructor
            .as_object()
            .and_then(|id| self.heap.function(id).map(|function| (id, function)));
        let Some((id, function)) = function else {
            let message = format!("{} is not a constructor", self.to_display_string(constructor));
            return Err(self.type_error(&message));
        };
        if let FunctionData::Native(native) = &function {
            if !native.allow_new() {
                let message = format!("{} is not a constructor", native.name());
                return Err(self.type_error(&message));
            }
        }
        let prototype = match self.get(new_target, "prototype")? {
            Value::Object(prototype) => prototype,
            _ => self.intrinsics.object_prototype,
        };
        if let FunctionData::Intrinsic(intrinsic) = function {
            return self.construct_intrinsic(intrinsic, arguments, prototype);
        }
        let this = self.new_object_id(Some(prototype));
        let context = CallContext {
            this: Value::Object(this),
            arguments,
            new_target: Some(new_target.clone()),
        };
        match self.call_object(id, context)? {
            Value::Object(result) => Ok(Value::Object(result)),
            _ => Ok(Value::Object(this)),
        }
    }

    pub(crate) fn call_object(&mut self, id: ObjectId, context: CallContext) -> NativeResult {
        let Some(function) = self.heap.function(id) else {
            return Err(self.type_error("value is not a function"));
        };
        let name = self
            .heap
            .function_name(id)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| Rc::from("<anonymous>"));
        self.frames.push(name);
        let result = match function {
            FunctionData::Native(native) => self.invoke_native(&native, context),
            FunctionData::Script(script) => {
                let _guard = self.locks.lock_guard();
                (script.body)(self, context.this, context.arguments)
            }
            FunctionData::Intrinsic(intrinsic) => {
                let prototype = self.intrinsic_prototype(intrinsic);
                self.construct_intrinsic(intrinsic, context.arguments, prototype)
            }
        };
        self.frames.pop();
        result
    }

    /// Call a native function, through the locked executor when script holds the lock.
    fn invoke_native(&mut self, native: &Rc<NativeFunction>, context: CallContext) -> NativeResult {
        if !self.locks.is_locked() {
            return native.invoke(self, context);
        }
        let _unlock = self.locks.unlock_guard();
        match native.invoke(self, context) {
            Ok(Value::Host(host)) => {
                error!(
                    target = "webrealm",
                    function = native.name(),
                    host = ?host,
                    "native function returned an unwrapped host value"
                );
                Err(Exception::Fatal(ProtocolError::HostValueEscaped {
                    function: native.name().to_string(),
                }))
            }
            Ok(value) => Ok(value),
            Err(exception) => Err(self.translate_exception(exception)),
        }
    }

    fn intrinsic_prototype(&self, intrinsic: IntrinsicFunction) -> ObjectId {
        match intrinsic {
            IntrinsicFunction::Object => self.intrinsics.object_prototype,
            IntrinsicFunction::Function => self.intrinsics.function_prototype,
            IntrinsicFunction::Array => self.intrinsics.array_prototype,
            IntrinsicFunction::Error(kind) => self.intrinsics.error(kind).prototype,
        }
    }

    fn construct_intrinsic(
        &mut self,
        intrinsic: IntrinsicFunction,
        arguments: Vec<Value>,
        prototype: ObjectId,
    ) -> NativeResult {
        match intrinsic {
            IntrinsicFunction::Object => match arguments.into_iter().next() {
                Some(Value::Object(object)) => Ok(Value::Object(object)),
                _ => Ok(Value::Object(self.new_object_id(Some(prototype)))),
            },
            IntrinsicFunction::Array => {
                let array = self.new_array(arguments);
                if let Value::Object(id) = array {
                    self.heap.set_prototype(id, Some(prototype));
                }
                Ok(array)
            }
            IntrinsicFunction::Function => {
                Err(self.type_error("Code generation from strings disallowed for this context"))
            }
            IntrinsicFunction::Error(kind) => {
                let mut arguments = arguments.into_iter();
                let errors = if kind == ErrorKind::AggregateError {
                    let errors = arguments.next().unwrap_or_default();
                    Some(self.array_elements(&errors).unwrap_or_default())
                } else {
                    None
                };
                let object = self.heap.allocate(self.environment, Some(prototype), ObjectKind::Error);
                if let Some(message) = arguments.next().filter(|message| !message.is_undefined()) {
                    let message = self.to_display_string(&message);
                    self.define_value(object, "message", Value::string(message));
                }
                if let Some(errors) = errors {
                    let errors = self.new_array(errors);
                    self.define_value(object, "errors", errors);
                }
                self.capture_stack_trace(object)?;
                Ok(Value::Object(object))
            }
        }
    }

    pub fn global_property(&mut self, name: &str) -> NativeResult {
        let global = self.global_value();
        self.get(&global, name)
    }

    pub fn new_object(&mut self) -> Value {
        Value::Object(self.new_object_id(Some(self.intrinsics.object_prototype)))
    }

    pub fn new_object_with_prototype(&mut self, prototype: Option<ObjectId>) -> Value {
        Value::Object(self.new_object_id(prototype))
    }

    pub(crate) fn new_object_id(&mut self, prototype: Option<ObjectId>) -> ObjectId {
        self.heap
            .allocate(self.environment, prototype, ObjectKind::Ordinary)
    }

    pub fn new_array(&mut self, elements: Vec<Value>) -> Value {
        Value::Object(self.heap.allocate(
            self.environment,
            Some(self.intrinsics.array_prototype),
            ObjectKind::Array(elements),
        ))
    }

    pub fn array_elements(&self, array: &Value) -> Option<Vec<Value>> {
        array
            .as_object()
            .and_then(|id| self.heap.array_elements(id))
            .map(<[Value]>::to_vec)
    }

    /// Define a function written in the untrusted realm. It always runs locked.
    pub fn new_script_function<F>(&mut self, name: &str, body: F) -> Value
    where
        F: Fn(&mut Realm, Value, Vec<Value>) -> NativeResult + 'static,
    {
        let function = self.new_function_object(
            name,
            0,
            FunctionData::Script(ScriptFunction {
                name: Rc::from(name),
                body: Rc::new(body),
            }),
        );
        let prototype = self.new_object_id(Some(self.intrinsics.object_prototype));
        self.define_value(prototype, "constructor", Value::Object(function));
        self.define_value(function, "prototype", Value::Object(prototype));
        Value::Object(function)
    }

    pub fn new_native_function(&mut self, function: NativeFunction) -> ObjectId {
        let name = function.name().to_string();
        let length = function.length();
        self.new_function_object(&name, length, FunctionData::Native(Rc::new(function)))
    }

    fn new_function_object(&mut self, name: &str, length: u16, data: FunctionData) -> ObjectId {
        let function = self.heap.allocate(
            self.environment,
            Some(self.intrinsics.function_prototype),
            ObjectKind::Function(data),
        );
        self.define_value(function, "name", Value::from(name));
        self.define_value(function, "length", Value::from(length));
        function
    }

    /// Install a native constructor with a fresh prototype inheriting `parent`,
    /// and link both to the host side of interface `tag`.
    pub fn define_interface(
        &mut self,
        tag: &'static TypeTag,
        constructor: NativeFunction,
        parent: ObjectId,
    ) -> Result<InterfaceObjects, ProtocolError> {
        let constructor = self.new_native_function(constructor);
        let prototype = self.new_object_id(Some(parent));
        self.define_value(constructor, "prototype", Value::Object(prototype));
        self.define_value(prototype, "constructor", Value::Object(constructor));
        self.associate(
            constructor,
            HostRef::new(Rc::new(InterfaceObject::new(tag, InterfaceRole::Constructor))),
        )?;
        self.associate(
            prototype,
            HostRef::new(Rc::new(InterfaceObject::new(tag, InterfaceRole::Prototype))),
        )?;
        let objects = InterfaceObjects {
            constructor,
            prototype,
            unforgeables: Vec::new(),
        };
        self.interfaces_mut().register(tag, objects.clone());
        Ok(objects)
    }

    /// Define a getter (and optional setter) built from native functions.
    pub fn define_native_accessor(
        &mut self,
        object: ObjectId,
        key: &str,
        getter: NativeFunction,
        setter: Option<NativeFunction>,
    ) {
        let getter = self.new_native_function(getter);
        let setter = setter.map(|setter| self.new_native_function(setter));
        self.define_accessor(object, key, Some(getter), setter);
    }

    pub fn define_native_method(&mut self, object: ObjectId, method: NativeFunction) {
        let name = method.name().to_string();
        let method = self.new_native_function(method);
        self.define_value(object, &name, Value::Object(method));
    }

    pub(crate) fn install_unforgeables(&mut self, object: ObjectId, unforgeables: &[(Rc<str>, ObjectId)]) {
        for (name, getter) in unforgeables {
            self.define_accessor(object, name, Some(*getter), None);
        }
    }

    /// Create an error object from the snapshot taken at realm creation.
    pub fn create_error(&mut self, kind: ErrorKind, message: &str) -> ObjectId {
        let prototype = self
            .primordials
            .object(&format!("{}.prototype", kind.name()))
            .unwrap_or_else(|| self.intrinsics.error(kind).prototype);
        let object = self
            .heap
            .allocate(self.environment, Some(prototype), ObjectKind::Error);
        self.define_value(object, "message", Value::from(message));
        object
    }

    /// A realm `TypeError` ready to be thrown.
    pub fn type_error(&mut self, message: &str) -> Exception {
        self.error_exception(ErrorKind::TypeError, message)
    }

    pub fn range_error(&mut self, message: &str) -> Exception {
        self.error_exception(ErrorKind::RangeError, message)
    }

    fn error_exception(&mut self, kind: ErrorKind, message: &str) -> Exception {
        let object = self.create_error(kind, message);
        if let Err(exception) = self.capture_stack_trace(object) {
            return exception;
        }
        Exception::Value(Value::Object(object))
    }

    /// Write a `stack` string for `object`: its `name: message` header followed
    /// by the active call frames, innermost first.
    pub fn capture_stack_trace(&mut self, object: ObjectId) -> Result<(), Exception> {
        let target = Value::Object(object);
        let name = self.get(&target, "name")?;
        let message = self.get(&target, "message")?;
        let name = match name {
            Value::Undefined => "Error".to_string(),
            name => self.to_display_string(&name),
        };
        let message = self.to_display_string(&message);
        let mut stack = if message.is_empty() {
            name
        } else {
            format!("{name}: {message}")
        };
        for frame in self.frames.iter().rev() {
            stack.push_str("\n    at ");
            stack.push_str(frame);
        }
        self.define_value(object, "stack", Value::string(stack));
        Ok(())
    }

    /// ECMAScript `ToString`, without invoking script `toString` methods.
    pub fn to_display_string(&mut self, value: &Value) -> String {
        match value {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Boolean(value) => value.to_string(),
            Value::Number(value) => format_number(*value),
            Value::String(value) => value.to_string(),
            Value::Host(host) => format!("[object {}]", host.type_tag().name),
            Value::Object(id) => {
                let id = *id;
                if let Some(elements) = self.array_elements(value) {
                    return elements
                        .iter()
                        .map(|element| match element {
                            Value::Undefined | Value::Null => String::new(),
                            element => self.to_display_string(element),
                        })
                        .collect::<Vec<_>>()
                        .join(",");
                }
                if self.heap.is_callable(id) {
                    let name = self.heap.function_name(id).unwrap_or_else(|| Rc::from(""));
                    return format!("function {name}() {{ [native code] }}");
                }
                if self.is_error_object(id) {
                    let name = self.get(value, "name").ok().filter(|name| !name.is_undefined());
                    let message = self.get(value, "message").ok().unwrap_or_default();
                    let name = match name {
                        Some(name) => self.to_display_string(&name),
                        None => "Error".to_string(),
                    };
                    let message = self.to_display_string(&message);
                    return if message.is_empty() {
                        name
                    } else {
                        format!("{name}: {message}")
                    };
                }
                match self.heap.lookup(id, TO_STRING_TAG) {
                    Some((_, Property::Data(Value::String(tag)))) => format!("[object {tag}]"),
                    _ => "[object Object]".to_string(),
                }
            }
        }
    }

    fn is_error_object(&self, id: ObjectId) -> bool {
        self.heap.is_error(id)
            || self
                .heap
                .inherits_from(id, self.intrinsics.error(ErrorKind::Error).prototype)
    }

    /// Build a realm value from JSON, e.g. a `CustomEvent` detail supplied by the host.
    pub fn value_from_json(&mut self, json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(value) => Value::Boolean(*value),
            serde_json::Value::Number(value) => Value::Number(value.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(value) => Value::string(value),
            serde_json::Value::Array(elements) => {
                let elements = elements
                    .iter()
                    .map(|element| self.value_from_json(element))
                    .collect();
                self.new_array(elements)
            }
            serde_json::Value::Object(members) => {
                let object = self.new_object_id(Some(self.intrinsics.object_prototype));
                for (key, member) in members {
                    let member = self.value_from_json(member);
                    self.define_value(object, key, member);
                }
                Value::Object(object)
            }
        }
    }
}
