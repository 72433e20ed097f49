//! The object model a realm runs on: values, the [`ObjectStore`] seam with
//! prototype chains and per-environment built-ins, and [`Heap`], an in-process
//! store that stands in for a script engine.

mod heap;
mod intrinsics;
mod store;
mod value;

pub use heap::{EnvironmentId, FunctionData, Heap, ObjectKind, Property, ScriptBody, ScriptFunction};
pub use store::ObjectStore;
pub use intrinsics::{ErrorIntrinsic, ErrorKind, IntrinsicFunction, Intrinsics};
pub(crate) use value::format_number;
pub use value::{ObjectId, Value};
