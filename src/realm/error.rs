use thiserror::Error;

use super::exceptions::Exception;
use crate::config::ConfigError;

/// Which side of an association already has a different partner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AlreadyAssociatedError {
    #[error("interface object already has an implementation in this realm")]
    Interface,
    #[error("implementation object already has an interface in this realm")]
    Implementation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LockProtocolError {
    #[error("the realm is not locked")]
    NotLocked,
    #[error("the realm is not unlocked")]
    NotUnlocked,
}

/// Host bugs. These are never delivered to script as catchable values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Association(#[from] AlreadyAssociatedError),
    #[error(transparent)]
    Lock(#[from] LockProtocolError),
    #[error("native function '{function}' returned a host value with no interface")]
    HostValueEscaped { function: String },
}

#[derive(Debug, Error)]
pub enum RealmError {
    #[error("failed to create realm: {0}")]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("uncaught exception in {script}: {message}")]
    Uncaught {
        script: String,
        message: String,
        exception: Exception,
    },
}
