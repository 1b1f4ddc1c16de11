use thiserror::Error;

/// Failure of a mutating allocation entry point.
///
/// Whenever an entry point returns this error, none of the structures passed to it were modified.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum AllocError {
    #[error("Infeasible request: {0}")]
    Infeasible(String),
    #[error("Invalid topology: {0}")]
    InvalidTopology(String),
    #[error("Inconsistent bookkeeping: {0}")]
    Inconsistent(String),
}

impl AllocError {
    pub fn is_infeasible(&self) -> bool {
        matches!(self, AllocError::Infeasible(_))
    }

    pub fn is_invalid_topology(&self) -> bool {
        matches!(self, AllocError::InvalidTopology(_))
    }

    pub fn is_inconsistent(&self) -> bool {
        matches!(self, AllocError::Inconsistent(_))
    }
}

pub type AllocResult<T> = std::result::Result<T, AllocError>;

#[allow(clippy::enum_variant_names)]
#[derive(Debug, Error)]
pub enum GresError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error(transparent)]
    AllocError(#[from] AllocError),
    #[error("Error: {0}")]
    GenericError(String),
}

impl From<serde_json::error::Error> for GresError {
    fn from(e: serde_json::error::Error) -> Self {
        Self::SerializationError(e.to_string())
    }
}
impl From<String> for GresError {
    fn from(e: String) -> Self {
        Self::GenericError(e)
    }
}
impl From<&str> for GresError {
    fn from(e: &str) -> Self {
        Self::GenericError(e.to_string())
    }
}
