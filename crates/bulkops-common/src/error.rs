use thiserror::Error;

#[derive(Debug, Error)]
pub enum BulkopsError {
    #[error("job not found: {0}")]
    JobNotFound(String),
    #[error("job already terminal: {0}")]
    JobAlreadyTerminal(String),
    #[error("invalid job transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("invalid progress: {0}")]
    InvalidProgress(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("missing configuration: {0}")]
    MissingConfiguration(String),
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("job cancelled")]
    Cancelled,
    #[error("job lease lost")]
    LeaseLost,
    #[error("internal error: {0}")]
    InternalError(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BulkopsError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::JobNotFound(_) => "JobNotFound",
            Self::JobAlreadyTerminal(_) => "JobAlreadyTerminal",
            Self::InvalidTransition { .. } => "InvalidTransition",
            Self::InvalidProgress(_) => "InvalidProgress",
            Self::InvalidArgument(_) => "InvalidArgument",
            Self::MissingConfiguration(_) => "MissingConfiguration",
            Self::AccessDenied(_) => "AccessDenied",
            Self::Cancelled => "Cancelled",
            Self::LeaseLost => "LeaseLost",
            Self::InternalError(_) => "InternalError",
            Self::Io(_) => "InternalError",
        }
    }
}

pub type Result<T> = std::result::Result<T, BulkopsError>;
