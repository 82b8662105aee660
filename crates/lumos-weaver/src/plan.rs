//! Building the per-unit rewrite plan

use std::collections::HashSet;

use lumos_locator::{base_name, SourceIndex};
use lumos_model::{
    CallSite, CallSiteMetadata, CompilationUnit, DeferReason, DeferredCall, MethodKey, PlannedCall,
    RewritePlan, SignatureEdit, WeaveError, WeaveResult,
};
use lumos_resolver::Resolution;

/// Plan every edit for `unit`
///
/// `blocked` holds targets whose declaring unit failed earlier in the pass;
/// like targets in collided units, their signatures stay unchanged and calls to
/// them are deferred.
pub fn build_plan(
    unit: &CompilationUnit,
    sites: Vec<CallSite>,
    resolution: &Resolution,
    sources: &SourceIndex,
    blocked: &HashSet<MethodKey>,
) -> WeaveResult<RewritePlan> {
    if let Some(err) = resolution.unit_error(&unit.path) {
        return Err(err.clone());
    }
    let is_blocked = |key: &MethodKey| resolution.is_blocked(key) || blocked.contains(key);

    let mut plan = RewritePlan::new(&unit.path);
    for target in resolution.targets_in(&unit.path) {
        if target.needs_signature_edit() && !is_blocked(&target.key) {
            plan.signature_edits.push(SignatureEdit {
                method_index: target.method_index,
                key: target.key,
                original_descriptor: target.original_descriptor.clone(),
                woven_descriptor: target.woven_descriptor.clone(),
                is_static: target.is_static,
            });
        }
    }

    let mut source: Option<(String, String)> = None;
    for site in sites {
        let Some(target) = resolution.target(&site.target) else {
            continue;
        };
        if is_blocked(&site.target) {
            plan.deferred.push(DeferredCall {
                site,
                reason: DeferReason::BlockedTarget,
            });
            continue;
        }
        if site.recursive {
            let edited_here = target.unit == unit.path && plan.edit_for(target.method_index).is_some();
            if !edited_here && !target.already_woven {
                plan.deferred.push(DeferredCall {
                    site,
                    reason: DeferReason::Recursive,
                });
                continue;
            }
        }

        if source.is_none() {
            let source_file = unit.source_file.as_deref().ok_or_else(|| WeaveError::MissingDebugInfo {
                unit: unit.path.clone(),
                method: site.caller_name.clone(),
                reason: "class has no SourceFile attribute".into(),
            })?;
            source = Some((
                sources.resolve(&unit.name, source_file),
                base_name(source_file).to_string(),
            ));
        }
        let Some((file_path, file_name)) = &source else {
            continue;
        };

        let metadata = CallSiteMetadata::new(
            file_path.as_str(),
            file_name.as_str(),
            site.line,
            target.target_name.as_str(),
        )
        .map_err(|e| WeaveError::MissingDebugInfo {
            unit: unit.path.clone(),
            method: site.caller_name.clone(),
            reason: e.to_string(),
        })?;
        plan.calls.push(PlannedCall {
            woven_descriptor: target.woven_descriptor.clone(),
            site,
            metadata,
        });
    }

    plan.normalize();
    for deferred in &plan.deferred {
        tracing::debug!(
            unit = %unit.path,
            caller = %deferred.site.caller_name,
            pc = deferred.site.pc,
            reason = deferred.reason.describe(),
            "deferred call site"
        );
    }
    Ok(plan)
}
