//! Error types for configuration and pass orchestration

use std::io;
use std::path::PathBuf;

use lumos_classfile::ClassFileError;
use lumos_model::DescriptorError;
use thiserror::Error;

/// Invalid or unreadable configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// E-CONFIG-001: Configuration file cannot be read
    #[error("cannot read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// E-CONFIG-002: Configuration is not valid TOML for the schema
    #[error("{origin}: {source}")]
    Parse {
        origin: String,
        #[source]
        source: toml::de::Error,
    },

    /// E-CONFIG-003: Target descriptor given on the command line is invalid
    #[error("invalid target: {0}")]
    Target(#[from] DescriptorError),

    /// E-CONFIG-004: Class name that cannot be a JVM class
    #[error("`{value}` is not a valid class name for {field}")]
    InvalidClassName { field: &'static str, value: String },

    /// E-CONFIG-005: Zero worker threads requested
    #[error("threads must be at least 1")]
    ZeroThreads,
}

impl ConfigError {
    /// Error code for machine-readable output
    pub fn code(&self) -> &'static str {
        match self {
            ConfigError::Read { .. } => "E-CONFIG-001",
            ConfigError::Parse { .. } => "E-CONFIG-002",
            ConfigError::Target(_) => "E-CONFIG-003",
            ConfigError::InvalidClassName { .. } => "E-CONFIG-004",
            ConfigError::ZeroThreads => "E-CONFIG-005",
        }
    }
}

/// Failures that stop a pass before any unit is committed
#[derive(Debug, Error)]
pub enum EngineError {
    /// Bad configuration, reported under its E-CONFIG code
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// E-ENGINE-002: Input directory does not exist
    #[error("input directory {} does not exist", .0.display())]
    InputNotFound(PathBuf),

    /// E-ENGINE-003: Filesystem failure while reading or writing artifacts
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// E-ENGINE-004: Worker pool could not be started
    #[error("cannot start worker pool: {0}")]
    ThreadPool(String),

    /// E-ENGINE-005: Runtime classes could not be synthesized
    #[error("cannot generate runtime classes: {0}")]
    Runtime(#[from] ClassFileError),

    /// E-ENGINE-006: Report could not be serialized
    #[error("cannot serialize report: {0}")]
    Report(#[from] serde_json::Error),
}

impl EngineError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        EngineError::Io {
            path: path.into(),
            source,
        }
    }

    /// Error code for machine-readable output
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Config(e) => e.code(),
            EngineError::InputNotFound(_) => "E-ENGINE-002",
            EngineError::Io { .. } => "E-ENGINE-003",
            EngineError::ThreadPool(_) => "E-ENGINE-004",
            EngineError::Runtime(_) => "E-ENGINE-005",
            EngineError::Report(_) => "E-ENGINE-006",
        }
    }
}
