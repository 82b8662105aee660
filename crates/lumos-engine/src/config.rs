//! `lumos.toml` configuration
//!
//! ```toml
//! targets = [
//!     "com.example.JavaExample.targetMethodInJava(int)",
//!     { type = "com.example.KotlinExample", method = "targetMethodInKotlin", params = ["String"] },
//! ]
//! metadata_class = "com.lumos.runtime.Lumen"
//! marker_annotation = "com.lumos.runtime.LumosMaxima"
//! source_roots = ["src/main/java", "src/main/kotlin"]
//! output = "build/woven"
//! emit_runtime = true
//! threads = 4
//! ```
//!
//! Relative paths are resolved against the directory of the file.

use std::fs;
use std::path::{Path, PathBuf};

use lumos_model::{internal_name, TargetDescriptor, DEFAULT_MARKER_ANNOTATION, DEFAULT_METADATA_CLASS};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_CONFIG_FILE: &str = "lumos.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub targets: Vec<TargetDescriptor>,
    /// Metadata class, dotted or internal form
    pub metadata_class: Option<String>,
    pub marker_annotation: Option<String>,
    /// Roots searched for source files named by `SourceFile` attributes
    pub source_roots: Vec<PathBuf>,
    /// Output directory; the input is rewritten in place when unset
    pub output: Option<PathBuf>,
    pub emit_runtime: bool,
    pub threads: Option<usize>,
}

fn is_valid_class_name(name: &str) -> bool {
    !name.is_empty()
        && name.split('/').all(|segment| {
            !segment.is_empty() && !segment.contains(['.', ';', '[', '<', '>', '(', ')', ' '])
        })
}

impl Config {
    /// Parse configuration text; `origin` names it in errors
    pub fn parse(text: &str, origin: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            origin: origin.to_string(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::parse(&text, &path.display().to_string())?;
        if let Some(dir) = path.parent() {
            config.rebase(dir);
        }
        Ok(config)
    }

    /// Make relative paths relative to `dir`
    pub fn rebase(&mut self, dir: &Path) {
        for root in &mut self.source_roots {
            if root.is_relative() {
                *root = dir.join(&*root);
            }
        }
        if let Some(output) = &mut self.output {
            if output.is_relative() {
                *output = dir.join(&*output);
            }
        }
    }

    /// Add targets given as descriptor strings
    pub fn add_targets<S: AsRef<str>>(&mut self, texts: &[S]) -> Result<(), ConfigError> {
        for text in texts {
            self.targets.push(TargetDescriptor::parse(text.as_ref())?);
        }
        Ok(())
    }

    /// Internal name of the metadata class
    pub fn metadata_class(&self) -> String {
        internal_name(self.metadata_class.as_deref().unwrap_or(DEFAULT_METADATA_CLASS))
    }

    /// Internal name of the marker annotation
    pub fn marker_annotation(&self) -> String {
        internal_name(self.marker_annotation.as_deref().unwrap_or(DEFAULT_MARKER_ANNOTATION))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let names = [
            ("metadata_class", self.metadata_class()),
            ("marker_annotation", self.marker_annotation()),
        ];
        for (field, value) in names {
            if !is_valid_class_name(&value) {
                return Err(ConfigError::InvalidClassName { field, value });
            }
        }
        if self.threads == Some(0) {
            return Err(ConfigError::ZeroThreads);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config = Config::parse(
            r#"
            targets = [
                "com.example.JavaExample.targetMethodInJava(int)",
                { type = "KotlinExample", method = "targetMethodInKotlin", params = ["String"] },
            ]
            metadata_class = "com.acme.Meta"
            source_roots = ["src/main/java"]
            output = "out"
            emit_runtime = true
            threads = 2
            "#,
            "inline",
        )
        .unwrap();
        assert_eq!(config.targets.len(), 2);
        assert_eq!(config.metadata_class(), "com/acme/Meta");
        assert_eq!(config.marker_annotation(), DEFAULT_MARKER_ANNOTATION);
        assert!(config.emit_runtime);
        assert_eq!(config.threads, Some(2));
        config.validate().unwrap();
    }

    #[test]
    fn test_defaults_and_rebase() {
        let mut config = Config::parse("source_roots = [\"src\", \"/abs\"]\noutput = \"out\"", "inline").unwrap();
        assert_eq!(config.metadata_class(), DEFAULT_METADATA_CLASS);
        config.rebase(Path::new("/project"));
        assert_eq!(config.source_roots, [PathBuf::from("/project/src"), PathBuf::from("/abs")]);
        assert_eq!(config.output, Some(PathBuf::from("/project/out")));
    }

    #[test]
    fn test_rejects_unknown_keys_and_bad_values() {
        let err = Config::parse("target = []", "inline").unwrap_err();
        assert_eq!(err.code(), "E-CONFIG-002");

        let err = Config::parse("targets = [\"nomethod\"]", "inline").unwrap_err();
        assert_eq!(err.code(), "E-CONFIG-002");

        let config = Config::parse("metadata_class = \"com..Meta\"", "inline").unwrap();
        assert_eq!(config.validate().unwrap_err().code(), "E-CONFIG-004");

        let config = Config::parse("threads = 0", "inline").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::ZeroThreads)));

        let mut config = Config::default();
        assert_eq!(config.add_targets(&["A.b(int"]).unwrap_err().code(), "E-CONFIG-003");
    }
}
