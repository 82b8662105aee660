//! The call-site metadata value delivered to woven targets

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::MetadataError;

/// Source coordinates of one call, as seen by the called target
///
/// Mirrors the runtime `Lumen` class field for field. Instances can only be
/// built through [`CallSiteMetadata::new`], which enforces that every field is
/// present and the line is a real 1-based line.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawMetadata")]
pub struct CallSiteMetadata {
    file_path: String,
    file_name: String,
    line_number: u32,
    target_function_name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMetadata {
    file_path: String,
    file_name: String,
    line_number: u32,
    target_function_name: String,
}

impl TryFrom<RawMetadata> for CallSiteMetadata {
    type Error = MetadataError;

    fn try_from(raw: RawMetadata) -> Result<Self, Self::Error> {
        CallSiteMetadata::new(
            raw.file_path,
            raw.file_name,
            raw.line_number,
            raw.target_function_name,
        )
    }
}

impl CallSiteMetadata {
    pub fn new(
        file_path: impl Into<String>,
        file_name: impl Into<String>,
        line_number: u32,
        target_function_name: impl Into<String>,
    ) -> Result<Self, MetadataError> {
        let file_path = file_path.into();
        let file_name = file_name.into();
        let target_function_name = target_function_name.into();

        if file_path.is_empty() {
            return Err(MetadataError::EmptyField("filePath"));
        }
        if file_name.is_empty() {
            return Err(MetadataError::EmptyField("fileName"));
        }
        if target_function_name.is_empty() {
            return Err(MetadataError::EmptyField("targetFunctionName"));
        }
        if line_number == 0 {
            return Err(MetadataError::ZeroLine);
        }
        if line_number > i32::MAX as u32 {
            return Err(MetadataError::LineOutOfRange(line_number));
        }
        let last_component = file_path.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or(&file_path);
        if last_component != file_name {
            return Err(MetadataError::FileNameMismatch {
                file_path,
                file_name,
            });
        }

        Ok(Self {
            file_path,
            file_name,
            line_number,
            target_function_name,
        })
    }

    pub fn file_path(&self) -> &str {
        &self.file_path
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn line_number(&self) -> u32 {
        self.line_number
    }

    pub fn target_function_name(&self) -> &str {
        &self.target_function_name
    }
}

impl fmt::Display for CallSiteMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Lumen(filePath={}, fileName={}, lineNumber={}, targetFunctionName={})",
            self.file_path, self.file_name, self.line_number, self.target_function_name
        )
    }
}
