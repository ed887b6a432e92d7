use crate::models::ClientId;
use crate::models::TimerKey;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Client unavailable: {0}")]
    ClientUnavailable(ClientId),
    #[error("Client not found: {0}")]
    ClientNotFound(ClientId),
    #[error("Timer not found: {0}")]
    TimerNotFound(TimerKey),
    #[error("No clients")]
    NoClients,
    #[error("Manager not active")]
    ManagerNotActive,
    #[error("Invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: crate::manager::ManagerState,
        to: crate::manager::ManagerState,
    },
    #[error("std::io error: {0}")]
    IoError(std::io::Error),
    #[error("JSON error: {0}")]
    JsonError(serde_json::Error),
    #[error("YAML error: {0}")]
    YamlError(serde_yaml::Error),
    #[error("actlet error: {0}")]
    ActletError(actlet::Error),
    #[error(transparent)]
    AnyhowError(#[from] anyhow::Error),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::JsonError(err)
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Self::YamlError(err)
    }
}

impl From<actlet::Error> for Error {
    fn from(err: actlet::Error) -> Self {
        Self::ActletError(err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
