use thiserror::Error;

/// Errors that can occur in the shared foundation layer.
#[derive(Debug, Error)]
pub enum TempoError {
    /// The config file could not be read or did not deserialize.
    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, TempoError>;
