//! Located invocations of targets

use serde::Serialize;

use crate::symbol::MethodKey;

/// One invocation instruction resolving to a target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSite {
    /// Index of the calling method in its class
    pub caller_method: usize,
    /// `name` + descriptor of the calling method, for diagnostics
    pub caller_name: String,
    /// Bytecode offset of the invoke instruction
    pub pc: u32,
    pub opcode: u8,
    pub target: MethodKey,
    /// Source line of the original call expression
    pub line: u32,
    /// The call sits inside the target method itself
    pub recursive: bool,
}

/// Why a located call is left for a later pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeferReason {
    /// Recursive call whose target signature is not rewritten in this pass
    Recursive,
    /// The target's own unit cannot be rewritten this pass
    BlockedTarget,
}

impl DeferReason {
    pub fn describe(&self) -> &'static str {
        match self {
            DeferReason::Recursive => "self-recursive call without a rewritten signature in scope",
            DeferReason::BlockedTarget => "target signature blocked in its declaring unit",
        }
    }
}
