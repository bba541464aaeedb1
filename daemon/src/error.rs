use thiserror::Error;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("instance #{id} cannot start: {free} bytes of memory free, {required} required")]
    ResourceExhausted { id: u16, free: u64, required: u64 },

    #[error("invalid configuration: {0}")]
    ConfigValidation(String),

    #[error("unknown state key: {0}")]
    StateKey(String),

    #[error("value of the wrong type for state key: {0}")]
    StateValue(&'static str),

    #[error("invalid state: {0}")]
    State(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ledger format error: {0}")]
    Ledger(#[from] serde_json::Error),

    #[error("{operation} is not supported on {platform}")]
    PlatformUnsupported {
        operation: &'static str,
        platform: &'static str,
    },

    #[error("unexpected game version: '{0}'")]
    UnexpectedVersion(String),
}

impl SupervisorError {
    pub fn unsupported(operation: &'static str) -> Self {
        SupervisorError::PlatformUnsupported {
            operation,
            platform: std::env::consts::OS,
        }
    }
}

pub type Result<T, E = SupervisorError> = std::result::Result<T, E>;
