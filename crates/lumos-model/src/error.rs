//! Error types shared across the weaving pipeline

use lumos_classfile::ClassFileError;
use thiserror::Error;

/// Invalid call-site metadata
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetadataError {
    #[error("metadata field `{0}` must not be empty")]
    EmptyField(&'static str),

    #[error("line number must be at least 1")]
    ZeroLine,

    #[error("line number {0} does not fit a JVM int")]
    LineOutOfRange(u32),

    #[error("file name `{file_name}` is not the last component of `{file_path}`")]
    FileNameMismatch { file_path: String, file_name: String },
}

/// A target descriptor that could not be parsed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    #[error("empty target descriptor")]
    Empty,

    #[error("unexpected `{found}` at offset {offset} in `{text}`")]
    UnexpectedToken { text: String, found: String, offset: usize },

    #[error("unexpected end of `{0}`")]
    UnexpectedEnd(String),

    #[error("`{0}` names no owner; expected Owner.method")]
    MissingOwner(String),

    #[error("empty {0} in target descriptor")]
    EmptyPart(&'static str),
}

/// Failures of the weaving pass
#[derive(Debug, Clone, Error)]
pub enum WeaveError {
    /// E-WEAVE-001: Descriptor matches no method (warning)
    #[error("target descriptor `{descriptor}` matches no method")]
    UnresolvedDescriptor { descriptor: String },

    /// E-WEAVE-002: Unit lacks the debug tables needed for call-site coordinates
    #[error("{unit}: missing debug info in {method}: {reason}")]
    MissingDebugInfo {
        unit: String,
        method: String,
        reason: String,
    },

    /// E-WEAVE-003: Woven descriptor collides with an existing overload
    #[error("{unit}: appending metadata to {method} collides with existing {descriptor}")]
    SignatureCollision {
        unit: String,
        method: String,
        descriptor: String,
    },

    /// E-WEAVE-004: Post-weave consistency check failed
    #[error("{unit}: verification failed: {reason}")]
    VerificationFailure { unit: String, reason: String },

    /// E-WEAVE-005: One method matched by several descriptors
    #[error("{method} is matched by several descriptors: {}", .descriptors.join(", "))]
    AmbiguousTarget {
        method: String,
        descriptors: Vec<String>,
    },

    /// E-WEAVE-006: Unit could not be parsed or re-encoded
    #[error("{unit}: {source}")]
    Malformed {
        unit: String,
        #[source]
        source: ClassFileError,
    },

    /// E-WEAVE-007: Bytecode shape the weaver refuses to rewrite
    #[error("{unit}: cannot rewrite {method}: {reason}")]
    Unsupported {
        unit: String,
        method: String,
        reason: String,
    },

    /// E-WEAVE-008: Pass aborted before the unit was committed
    #[error("{unit}: pass aborted")]
    Aborted { unit: String },
}

impl WeaveError {
    /// Whether this error makes the pass fail
    pub fn is_hard_error(&self) -> bool {
        !matches!(self, WeaveError::UnresolvedDescriptor { .. })
    }

    /// Error code for machine-readable output
    pub fn code(&self) -> &'static str {
        match self {
            WeaveError::UnresolvedDescriptor { .. } => "E-WEAVE-001",
            WeaveError::MissingDebugInfo { .. } => "E-WEAVE-002",
            WeaveError::SignatureCollision { .. } => "E-WEAVE-003",
            WeaveError::VerificationFailure { .. } => "E-WEAVE-004",
            WeaveError::AmbiguousTarget { .. } => "E-WEAVE-005",
            WeaveError::Malformed { .. } => "E-WEAVE-006",
            WeaveError::Unsupported { .. } => "E-WEAVE-007",
            WeaveError::Aborted { .. } => "E-WEAVE-008",
        }
    }

    /// Compilation unit the error belongs to, if unit-scoped
    pub fn unit(&self) -> Option<&str> {
        match self {
            WeaveError::MissingDebugInfo { unit, .. }
            | WeaveError::SignatureCollision { unit, .. }
            | WeaveError::VerificationFailure { unit, .. }
            | WeaveError::Malformed { unit, .. }
            | WeaveError::Unsupported { unit, .. }
            | WeaveError::Aborted { unit } => Some(unit),
            WeaveError::UnresolvedDescriptor { .. } | WeaveError::AmbiguousTarget { .. } => None,
        }
    }

    pub fn malformed(unit: impl Into<String>, source: ClassFileError) -> Self {
        WeaveError::Malformed {
            unit: unit.into(),
            source,
        }
    }
}

pub type WeaveResult<T> = std::result::Result<T, WeaveError>;
