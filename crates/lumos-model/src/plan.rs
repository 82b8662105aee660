//! Per-unit rewrite plans

use crate::callsite::{CallSite, DeferReason};
use crate::metadata::CallSiteMetadata;
use crate::symbol::MethodKey;

/// Append the metadata parameter to one method
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureEdit {
    pub method_index: usize,
    pub key: MethodKey,
    pub original_descriptor: String,
    pub woven_descriptor: String,
    pub is_static: bool,
}

/// Rewrite one call site to construct and pass `metadata`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedCall {
    pub site: CallSite,
    pub woven_descriptor: String,
    pub metadata: CallSiteMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredCall {
    pub site: CallSite,
    pub reason: DeferReason,
}

/// Every edit for one compilation unit, applied all-or-nothing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewritePlan {
    /// Relative path of the unit
    pub unit: String,
    /// Ordered by method index
    pub signature_edits: Vec<SignatureEdit>,
    /// Ordered by caller method, then offset
    pub calls: Vec<PlannedCall>,
    pub deferred: Vec<DeferredCall>,
}

impl RewritePlan {
    pub fn new(unit: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            ..Default::default()
        }
    }

    /// Nothing to write back
    pub fn is_empty(&self) -> bool {
        self.signature_edits.is_empty() && self.calls.is_empty()
    }

    pub fn edit_for(&self, method_index: usize) -> Option<&SignatureEdit> {
        self.signature_edits.iter().find(|e| e.method_index == method_index)
    }

    /// Planned calls inside one method, in offset order
    pub fn calls_in(&self, method_index: usize) -> impl Iterator<Item = &PlannedCall> {
        self.calls.iter().filter(move |c| c.site.caller_method == method_index)
    }

    /// Methods touched by the plan
    pub fn touched_methods(&self) -> Vec<usize> {
        let mut methods: Vec<usize> = self
            .signature_edits
            .iter()
            .map(|e| e.method_index)
            .chain(self.calls.iter().map(|c| c.site.caller_method))
            .collect();
        methods.sort_unstable();
        methods.dedup();
        methods
    }

    /// Sort edits and calls into their canonical order
    pub fn normalize(&mut self) {
        self.signature_edits.sort_by_key(|e| e.method_index);
        self.calls.sort_by_key(|c| (c.site.caller_method, c.site.pc));
        self.deferred.sort_by_key(|d| (d.site.caller_method, d.site.pc));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::{Interner, MethodKey};

    fn site(interner: &mut Interner, caller: usize, pc: u32) -> CallSite {
        CallSite {
            caller_method: caller,
            caller_name: "main([Ljava/lang/String;)V".into(),
            pc,
            opcode: 0xb6,
            target: MethodKey::new(interner, "com/example/JavaExample", "targetMethodInJava", "(I)V"),
            line: 42,
            recursive: false,
        }
    }

    #[test]
    fn test_plan_ordering_and_touched_methods() {
        let mut interner = Interner::new();
        let metadata = CallSiteMetadata::new("Foo.java", "Foo.java", 42, "JavaExample.targetMethodInJava").unwrap();
        let mut plan = RewritePlan::new("com/example/Foo.class");
        assert!(plan.is_empty());

        for (caller, pc) in [(3, 20), (1, 9), (3, 4)] {
            plan.calls.push(PlannedCall {
                site: site(&mut interner, caller, pc),
                woven_descriptor: "(ILcom/lumos/runtime/Lumen;)V".into(),
                metadata: metadata.clone(),
            });
        }
        plan.signature_edits.push(SignatureEdit {
            method_index: 2,
            key: MethodKey::new(&mut interner, "com/example/Foo", "run", "()V"),
            original_descriptor: "()V".into(),
            woven_descriptor: "(Lcom/lumos/runtime/Lumen;)V".into(),
            is_static: true,
        });
        plan.normalize();

        let order: Vec<(usize, u32)> = plan.calls.iter().map(|c| (c.site.caller_method, c.site.pc)).collect();
        assert_eq!(order, vec![(1, 9), (3, 4), (3, 20)]);
        assert_eq!(plan.touched_methods(), vec![1, 2, 3]);
        assert_eq!(plan.calls_in(3).count(), 2);
        assert!(plan.edit_for(2).is_some());
        assert!(!plan.is_empty());
    }
}
