//! Error handling for the post-processing supervisor.

use thiserror::Error;

/// Result type for supervisor operations.
pub type SchedResult<T> = Result<T, SchedError>;

/// Errors that can occur while scheduling and monitoring year-set jobs.
#[derive(Error, Debug)]
pub enum SchedError {
    /// A job status change that the state machine does not allow.
    #[error("Invalid job transition for {job}: {from} -> {to}")]
    InvalidTransition {
        job: String,
        from: String,
        to: String,
    },

    /// Job dependency cycle detected.
    #[error("Dependency cycle detected among job types: {0}")]
    DependencyCycle(String),

    /// Invalid dependency reference.
    #[error("Invalid dependency: job type {0} is not declared")]
    InvalidDependency(String),

    /// SLURM submission failed.
    #[error("SLURM submission failed: {0}")]
    SlurmSubmitError(String),

    /// SLURM command execution failed.
    #[error("SLURM command failed: {command} - {message}")]
    SlurmCommandError { command: String, message: String },

    /// PBS submission failed.
    #[error("PBS submission failed: {0}")]
    PbsSubmitError(String),

    /// PBS command execution failed.
    #[error("PBS command failed: {command} - {message}")]
    PbsCommandError { command: String, message: String },

    /// Output hosting failed.
    #[error("Hosting failed: {0}")]
    HostingError(String),

    /// Batch script template could not be rendered.
    #[error("Template error: {0}")]
    TemplateError(String),

    /// IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// YAML configuration parse error.
    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml_ng::Error),

    /// Timeout waiting for an external command.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The supervisor task stopped unexpectedly.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SchedError {
    /// Shorthand for a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        SchedError::ConfigError(message.into())
    }
}
