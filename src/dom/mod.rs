//! Events, event targets and the dispatch algorithm.

mod abort;
mod bindings;
mod dispatch;
mod dom_exception;
mod event;
mod event_target;
mod tree;

pub use abort::AbortSignal;
pub use dispatch::{dispatch, LegacyDispatch};
pub use dom_exception::{legacy_code, DomException, CONSTANTS as DOM_EXCEPTION_CONSTANTS};
pub use event::{Event, EventInit, EventKind, EventPhase, PathEntry};
pub use event_target::{flatten, flatten_more, EventTarget, Listener, ListenerOptions, TargetId};
pub use tree::{ActivationBehavior, DetachedTree, DomTree, NodeTree, ShadowRootMode};

pub(crate) use bindings::install;
