//! lumos-weaver: apply rewrite plans to class files
//!
//! [`build_plan`] turns the located call sites of one unit into a
//! [`RewritePlan`]; [`weave`] applies it and returns the new class file bytes.
//! A plan is applied to a copy of the parsed class, so a failure anywhere in
//! the unit leaves nothing half-written. [`runtime`] synthesizes the classes
//! woven code links against.

mod code;
mod plan;
pub mod runtime;
mod signature;

pub use code::{construction_block, CONSTRUCTION_STACK};
pub use plan::build_plan;
pub use runtime::{runtime_classes, RuntimeClass};
pub use signature::append_signature_parameter;

use lumos_classfile::{ClassFile, ClassFileError};
use lumos_model::{CompilationUnit, MethodInfo, PlannedCall, RewritePlan, WeaveError, WeaveResult, DEFAULT_METADATA_CLASS};

use code::{MethodContext, RewriteError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeaveOptions {
    /// Internal name of the metadata class
    pub metadata_class: String,
}

impl Default for WeaveOptions {
    fn default() -> Self {
        Self {
            metadata_class: DEFAULT_METADATA_CLASS.to_string(),
        }
    }
}

fn unit_error(unit: &CompilationUnit, method: &MethodInfo, err: RewriteError) -> WeaveError {
    match err {
        RewriteError::Unsupported(reason) => WeaveError::Unsupported {
            unit: unit.path.clone(),
            method: method.display_name(),
            reason,
        },
        RewriteError::ClassFile(e) => WeaveError::malformed(unit.path.clone(), e),
    }
}

/// Apply `plan` to `unit`, returning the woven class file
///
/// An empty plan returns the original bytes unchanged.
pub fn weave(unit: &CompilationUnit, plan: &RewritePlan, options: &WeaveOptions) -> WeaveResult<Vec<u8>> {
    if plan.is_empty() {
        return Ok(unit.bytes.clone());
    }

    let mut class = unit.class.clone();
    let ClassFile {
        constant_pool: pool,
        methods,
        this_class,
        ..
    } = &mut class;

    for index in plan.touched_methods() {
        let missing = || {
            WeaveError::malformed(
                unit.path.clone(),
                ClassFileError::Malformed(format!("plan names method #{index} which does not exist")),
            )
        };
        let info = unit.methods.get(index).ok_or_else(missing)?;
        let method = methods.get_mut(index).ok_or_else(missing)?;
        let edit = plan.edit_for(index);
        let calls: Vec<&PlannedCall> = plan.calls_in(index).collect();

        match method.code(pool).map_err(|e| WeaveError::malformed(unit.path.clone(), e))? {
            Some(code) => {
                let ctx = MethodContext {
                    this_class: *this_class,
                    is_static: info.is_static(),
                    is_constructor: info.name == "<init>",
                    descriptor: &info.descriptor,
                    edit,
                    calls: &calls,
                    options,
                };
                let rewritten = code::rewrite_code(pool, &code, &ctx).map_err(|e| unit_error(unit, info, e))?;
                method
                    .set_code(pool, &rewritten)
                    .map_err(|e| unit_error(unit, info, e.into()))?;
            }
            None if calls.is_empty() => {}
            None => {
                return Err(WeaveError::malformed(
                    unit.path.clone(),
                    ClassFileError::Malformed(format!("calls planned in {} which has no code", info.display_name())),
                ))
            }
        }

        if let Some(edit) = edit {
            signature::apply_signature_edit(pool, method, edit, &options.metadata_class)
                .map_err(|e| unit_error(unit, info, e.into()))?;
        }
    }

    tracing::debug!(
        unit = %unit.path,
        signatures = plan.signature_edits.len(),
        call_sites = plan.calls.len(),
        "woven"
    );
    Ok(class.to_bytes())
}
