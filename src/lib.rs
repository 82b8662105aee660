//! Lumos - call-site metadata weaving for compiled JVM classes
//!
//! This is the root workspace crate that provides integration tests.
//! The implementation lives in the workspace member crates.

// Re-export main crates for convenience
pub use lumos_classfile as classfile;
pub use lumos_engine as engine;
pub use lumos_model as model;

pub use lumos_engine::{run, Config, Engine, PassReport};
