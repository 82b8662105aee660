//! Unit lifecycle and reported outcomes

use std::fmt;

use serde::{Deserialize, Serialize};

/// Where a unit is in the pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnitState {
    Scanned,
    PlanBuilt,
    Woven,
    Verified,
    RewriteFailed,
    VerificationFailed,
    RolledBack,
}

impl UnitState {
    /// Whether `self -> next` is a legal transition
    pub fn allows(self, next: UnitState) -> bool {
        use UnitState::*;
        matches!(
            (self, next),
            (Scanned, PlanBuilt)
                | (Scanned, RewriteFailed)
                | (PlanBuilt, Woven)
                | (PlanBuilt, RewriteFailed)
                | (Woven, Verified)
                | (Woven, VerificationFailed)
                | (VerificationFailed, RolledBack)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            UnitState::Verified | UnitState::RewriteFailed | UnitState::RolledBack
        )
    }
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UnitState::Scanned => "scanned",
            UnitState::PlanBuilt => "plan-built",
            UnitState::Woven => "woven",
            UnitState::Verified => "verified",
            UnitState::RewriteFailed => "rewrite-failed",
            UnitState::VerificationFailed => "verification-failed",
            UnitState::RolledBack => "rolled-back",
        };
        f.write_str(name)
    }
}

/// Final per-unit result in the pass report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum UnitOutcome {
    Verified {
        signatures: usize,
        call_sites: usize,
        deferred: usize,
    },
    RewriteFailed {
        code: String,
        reason: String,
    },
    VerificationFailed {
        code: String,
        reason: String,
    },
}

impl UnitOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, UnitOutcome::Verified { .. })
    }

    /// Whether the unit's bytes changed
    pub fn is_modified(&self) -> bool {
        matches!(self, UnitOutcome::Verified { signatures, call_sites, .. } if signatures + call_sites > 0)
    }

    pub fn label(&self) -> &'static str {
        match self {
            UnitOutcome::Verified { .. } => "Verified",
            UnitOutcome::RewriteFailed { .. } => "RewriteFailed",
            UnitOutcome::VerificationFailed { .. } => "VerificationFailed",
        }
    }
}

impl fmt::Display for UnitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitOutcome::Verified {
                signatures,
                call_sites,
                deferred,
            } => write!(
                f,
                "Verified ({signatures} signatures, {call_sites} call sites, {deferred} deferred)"
            ),
            UnitOutcome::RewriteFailed { code, reason } => write!(f, "RewriteFailed[{code}]({reason})"),
            UnitOutcome::VerificationFailed { code, reason } => {
                write!(f, "VerificationFailed[{code}]({reason})")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        assert!(UnitState::Scanned.allows(UnitState::PlanBuilt));
        assert!(UnitState::Woven.allows(UnitState::VerificationFailed));
        assert!(UnitState::VerificationFailed.allows(UnitState::RolledBack));
        assert!(!UnitState::Woven.allows(UnitState::RolledBack));
        assert!(!UnitState::Verified.allows(UnitState::Woven));
        assert!(UnitState::RolledBack.is_terminal());
        assert!(!UnitState::VerificationFailed.is_terminal());
    }

    #[test]
    fn test_outcome_serializes_with_status_tag() {
        let outcome = UnitOutcome::RewriteFailed {
            code: "E-WEAVE-003".into(),
            reason: "collision".into(),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "RewriteFailed");
        assert_eq!(json["code"], "E-WEAVE-003");
        assert!(!outcome.is_success());

        let verified = UnitOutcome::Verified {
            signatures: 0,
            call_sites: 0,
            deferred: 1,
        };
        assert!(verified.is_success());
        assert!(!verified.is_modified());
    }
}
