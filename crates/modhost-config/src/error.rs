//! Configuration error types.

/// Result type alias for config operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read a config file.
    #[error("failed to read config file '{path}': {source}")]
    ReadFile {
        path: String,
        source: std::io::Error,
    },

    /// Failed to parse TOML.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Missing required field.
    #[error("missing required field '{field}' in {context}")]
    MissingField { field: String, context: String },

    /// A field has a value that cannot be used.
    #[error("invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },

    /// Two modules resolve to the same storage location.
    #[error(
        "modules '{first}' and '{second}' both resolve to storage '{location}'; set a distinct sub_storage for one of them"
    )]
    StorageCollision {
        first: String,
        second: String,
        location: String,
    },
}
