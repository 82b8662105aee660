//! Lumos metadata model
//!
//! The value object delivered to woven targets ([`CallSiteMetadata`]), the
//! target descriptors that select methods, their per-language interpretation,
//! and the records passed between the resolver, locator, weaver and verifier.

pub mod callsite;
pub mod descriptor;
pub mod error;
pub mod language;
pub mod lexer;
pub mod metadata;
pub mod plan;
pub mod state;
pub mod symbol;
pub mod target;
pub mod types;
pub mod unit;

pub use callsite::{CallSite, DeferReason};
pub use descriptor::TargetDescriptor;
pub use error::{DescriptorError, MetadataError, WeaveError, WeaveResult};
pub use language::SourceLanguage;
pub use metadata::CallSiteMetadata;
pub use plan::{DeferredCall, PlannedCall, RewritePlan, SignatureEdit};
pub use state::{UnitOutcome, UnitState};
pub use symbol::{Interner, MethodKey, Symbol};
pub use target::{MatchOrigin, ResolvedTarget};
pub use types::TypePattern;
pub use unit::{CompilationUnit, MethodInfo};

/// Internal name of the runtime metadata class
pub const DEFAULT_METADATA_CLASS: &str = "com/lumos/runtime/Lumen";

/// Annotation marking methods as targets
pub const DEFAULT_MARKER_ANNOTATION: &str = "com/lumos/runtime/LumosMaxima";

/// Method attribute recording the pre-weave descriptor of a woven target
pub const WOVEN_MARKER_ATTRIBUTE: &str = "LumosWoven";

/// Constructor of the metadata class: file path, file name, line, target name
pub const METADATA_CONSTRUCTOR_DESCRIPTOR: &str =
    "(Ljava/lang/String;Ljava/lang/String;ILjava/lang/String;)V";

/// Name of the local variable entry added for the metadata parameter
pub const METADATA_LOCAL_NAME: &str = "lumen";

/// `com.lumos.runtime.Lumen` or `com/lumos/runtime/Lumen` -> internal form
pub fn internal_name(name: &str) -> String {
    name.trim().replace('.', "/")
}
