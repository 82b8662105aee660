//! lumos-engine: configuration and the weaving pass
//!
//! [`Engine::run`] discovers the class files under an input directory,
//! resolves targets over the whole set and takes every unit through
//! locate, plan, weave and verify on a rayon pool. Units that verify are
//! written back atomically; all others keep their original bytes and are
//! reported with the error that stopped them.

mod abort;
mod config;
mod discovery;
mod error;
mod pass;
mod report;

pub use abort::AbortFlag;
pub use config::{Config, DEFAULT_CONFIG_FILE};
pub use discovery::{discover, Artifacts};
pub use error::{ConfigError, EngineError};
pub use pass::{emit_runtime, CallSiteEntry, Engine, Survey, TargetEntry};
pub use report::{DeferredSite, Diagnostic, PassReport, UnitReport};

use std::path::Path;

/// Run one pass over `input` with the default verifier
pub fn run(config: Config, input: &Path) -> Result<PassReport, EngineError> {
    Engine::new(config)?.run(input)
}
