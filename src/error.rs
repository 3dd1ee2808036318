use std::path::PathBuf;
use thiserror::Error;

/// Exit code for a malformed command line.
pub const EXIT_ARGUMENT_ERROR: i32 = 2;
/// Exit code when a mandatory configuration value was never supplied.
pub const EXIT_MISSING_VALUE: i32 = 99;
/// Exit code for any other failure, including errors returned by `main`.
pub const EXIT_FAILURE: i32 = 1;

#[derive(Debug, Error)]
pub enum LayerfigError {
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Missing mandatory value: {key}")]
    MissingMandatoryValue { key: String },

    #[error("Missing mandatory values: {}", keys.join(", "))]
    MissingMandatoryValues { keys: Vec<String> },

    #[error("Interpolation cycle detected while resolving '{key}'")]
    ResolutionCycle { key: String },

    #[error("Cannot interpolate '{key}': {reason}")]
    Interpolation { key: String, reason: String },

    #[error("Unknown resolver '{name}' used in '{key}'")]
    UnknownResolver { key: String, name: String },

    #[error("Cannot convert '{key}': {reason}")]
    TypeConversion { key: String, reason: String },

    #[error("Type {0} is registered at more than one path — look it up by key instead")]
    AmbiguousType(&'static str),

    #[error("Type {0} is not registered — call .setup_schema() or .setup_value() first")]
    TypeNotRegistered(&'static str),

    #[error("Invalid helper not in configuration [{0}]")]
    InvalidHelper(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid key path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("{0}")]
    Argument(String),

    #[error("Failed to parse {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Failed to read {path}: {source}")]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Unsupported configuration file format: {0}")]
    UnsupportedFormat(PathBuf),

    #[error("Configuration already set up for this application")]
    AlreadyConfigured,

    #[error("Application is not configured — call .setup_configuration() first")]
    NotConfigured,

    #[error("Logging setup failed: {0}")]
    Logging(String),

    #[error(transparent)]
    Application(#[from] anyhow::Error),
}

impl LayerfigError {
    /// Process exit code for this error when it ends a CLI run.
    pub fn exit_code(&self) -> i32 {
        match self {
            LayerfigError::Argument(_) => EXIT_ARGUMENT_ERROR,
            LayerfigError::MissingMandatoryValue { .. }
            | LayerfigError::MissingMandatoryValues { .. } => EXIT_MISSING_VALUE,
            _ => EXIT_FAILURE,
        }
    }

    /// Whether this error means "value absent or not supplied", as opposed to
    /// a broken configuration.
    pub fn is_missing(&self) -> bool {
        matches!(
            self,
            LayerfigError::KeyNotFound(_) | LayerfigError::MissingMandatoryValue { .. }
        )
    }
}
