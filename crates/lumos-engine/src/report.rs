//! Pass report

use std::fmt;

use lumos_model::{UnitOutcome, UnitState, WeaveError};
use serde::Serialize;

/// A pass-level warning or error
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    pub message: String,
}

impl From<&WeaveError> for Diagnostic {
    fn from(e: &WeaveError) -> Self {
        Self {
            code: e.code().to_string(),
            unit: e.unit().map(str::to_string),
            message: e.to_string(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

/// A call left unwoven this pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeferredSite {
    pub caller: String,
    pub pc: u32,
    pub line: u32,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitReport {
    /// Path relative to the input root
    pub unit: String,
    /// Last state reached
    pub state: UnitState,
    pub outcome: UnitOutcome,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub deferred: Vec<DeferredSite>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    /// Units in path order
    pub units: Vec<UnitReport>,
    pub warnings: Vec<Diagnostic>,
    pub errors: Vec<Diagnostic>,
    /// Number of methods resolved as targets
    pub targets: usize,
    /// Class files written (woven units plus runtime classes)
    pub written: usize,
    pub aborted: bool,
}

impl PassReport {
    /// No pass errors, no failed units and not aborted
    pub fn is_success(&self) -> bool {
        !self.aborted && self.errors.is_empty() && self.units.iter().all(|u| u.outcome.is_success())
    }

    pub fn unit(&self, path: &str) -> Option<&UnitReport> {
        self.units.iter().find(|u| u.unit == path)
    }

    pub fn modified(&self) -> usize {
        self.units.iter().filter(|u| u.outcome.is_modified()).count()
    }

    pub fn failed(&self) -> impl Iterator<Item = &UnitReport> {
        self.units.iter().filter(|u| !u.outcome.is_success())
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// One-line summary for logs and the CLI
    pub fn summary(&self) -> String {
        format!(
            "{} units, {} woven, {} failed, {} targets, {} warnings, {} errors",
            self.units.len(),
            self.modified(),
            self.failed().count(),
            self.targets,
            self.warnings.len(),
            self.errors.len()
        )
    }
}
