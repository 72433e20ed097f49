use std::fmt;

use super::heap::{EnvironmentId, FunctionData, ObjectKind};
use super::store::ObjectStore;
use super::value::{ObjectId, Value};

/// The built-in error classes of a global environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Error,
    EvalError,
    RangeError,
    ReferenceError,
    SyntaxError,
    TypeError,
    UriError,
    AggregateError,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 8] = [
        ErrorKind::Error,
        ErrorKind::EvalError,
        ErrorKind::RangeError,
        ErrorKind::ReferenceError,
        ErrorKind::SyntaxError,
        ErrorKind::TypeError,
        ErrorKind::UriError,
        ErrorKind::AggregateError,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::Error => "Error",
            ErrorKind::EvalError => "EvalError",
            ErrorKind::RangeError => "RangeError",
            ErrorKind::ReferenceError => "ReferenceError",
            ErrorKind::SyntaxError => "SyntaxError",
            ErrorKind::TypeError => "TypeError",
            ErrorKind::UriError => "URIError",
            ErrorKind::AggregateError => "AggregateError",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Built-in constructors implemented by the VM itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntrinsicFunction {
    Object,
    Function,
    Array,
    Error(ErrorKind),
}

#[derive(Debug, Clone, Copy)]
pub struct ErrorIntrinsic {
    pub kind: ErrorKind,
    pub constructor: ObjectId,
    pub prototype: ObjectId,
}

/// Well-known objects of one global environment.
#[derive(Debug, Clone)]
pub struct Intrinsics {
    pub global: ObjectId,
    pub object_prototype: ObjectId,
    pub function_prototype: ObjectId,
    pub array_prototype: ObjectId,
    pub object_constructor: ObjectId,
    pub function_constructor: ObjectId,
    pub array_constructor: ObjectId,
    pub errors: Vec<ErrorIntrinsic>,
}

impl Intrinsics {
    pub(crate) fn create<S: ObjectStore + ?Sized>(heap: &mut S, environment: EnvironmentId) -> Self {
        let object_prototype = heap.allocate(environment, None, ObjectKind::Ordinary);
        let function_prototype =
            heap.allocate(environment, Some(object_prototype), ObjectKind::Ordinary);
        let array_prototype = heap.allocate(
            environment,
            Some(object_prototype),
            ObjectKind::Array(Vec::new()),
        );
        let global = heap.allocate(environment, Some(object_prototype), ObjectKind::Ordinary);

        let constructor = |heap: &mut S,
                           function: IntrinsicFunction,
                           prototype: ObjectId,
                           name: &str,
                           length: u16| {
            let id = heap.allocate(
                environment,
                Some(function_prototype),
                ObjectKind::Function(FunctionData::Intrinsic(function)),
            );
            heap.define_value(id, "name", Value::from(name));
            heap.define_value(id, "length", Value::from(length));
            heap.define_value(id, "prototype", Value::Object(prototype));
            heap.define_value(prototype, "constructor", Value::Object(id));
            heap.define_value(global, name, Value::Object(id));
            id
        };

        let object_constructor =
            constructor(heap, IntrinsicFunction::Object, object_prototype, "Object", 1);
        let function_constructor =
            constructor(heap, IntrinsicFunction::Function, function_prototype, "Function", 1);
        let array_constructor =
            constructor(heap, IntrinsicFunction::Array, array_prototype, "Array", 1);

        let mut errors = Vec::with_capacity(ErrorKind::ALL.len());
        let mut base_prototype = object_prototype;
        for kind in ErrorKind::ALL {
            let prototype = heap.allocate(environment, Some(base_prototype), ObjectKind::Ordinary);
            heap.define_value(prototype, "name", Value::from(kind.name()));
            heap.define_value(prototype, "message", Value::from(""));
            let length = if kind == ErrorKind::AggregateError { 2 } else { 1 };
            let id = constructor(heap, IntrinsicFunction::Error(kind), prototype, kind.name(), length);
            errors.push(ErrorIntrinsic {
                kind,
                constructor: id,
                prototype,
            });
            if kind == ErrorKind::Error {
                base_prototype = prototype;
            }
        }

        heap.define_value(global, "globalThis", Value::Object(global));

        Self {
            global,
            object_prototype,
            function_prototype,
            array_prototype,
            object_constructor,
            function_constructor,
            array_constructor,
            errors,
        }
    }

    pub fn error(&self, kind: ErrorKind) -> &ErrorIntrinsic {
        self.errors
            .iter()
            .find(|error| error.kind == kind)
            .unwrap_or(&self.errors[0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::Heap;

    #[test]
    fn error_prototypes_inherit_from_error() {
        let mut heap = Heap::new();
        let (_, global, intrinsics) = heap.create_environment();
        let type_error = intrinsics.error(ErrorKind::TypeError);
        let base = intrinsics.error(ErrorKind::Error);
        assert!(heap.inherits_from(type_error.prototype, base.prototype));
        assert_eq!(
            heap.own_data(global, "TypeError"),
            Some(Value::Object(type_error.constructor))
        );
    }

    #[test]
    fn names_round_trip() {
        for kind in ErrorKind::ALL {
            assert_eq!(ErrorKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(ErrorKind::UriError.name(), "URIError");
        assert_eq!(ErrorKind::from_name("DOMException"), None);
    }
}
