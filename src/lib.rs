//! A sandboxed script realm bridged to host implementation objects, with
//! DOM event dispatch built on top of it.

pub mod config;
pub mod dom;
pub mod realm;
pub mod telemetry;
pub mod vm;

pub use config::{ConfigError, RealmConfig};
pub use dom::{Event, EventInit, EventTarget, NodeTree};
pub use realm::{Exception, ProtocolError, Realm, RealmError};
pub use vm::Value;
