//! Invocation scanning

use lumos_classfile::opcode::is_method_invoke;
use lumos_classfile::{decode, ConstantPool, Instruction};
use lumos_model::{CallSite, CompilationUnit, MethodInfo, WeaveError, WeaveResult};
use lumos_resolver::Resolution;

/// Every call in `unit` whose resolved target is in `resolution`, ordered by
/// calling method and offset
///
/// Calls already referencing a woven descriptor are not call sites: they were
/// rewritten by an earlier pass.
pub fn locate(unit: &CompilationUnit, resolution: &Resolution) -> WeaveResult<Vec<CallSite>> {
    if resolution.is_empty() {
        return Ok(Vec::new());
    }

    let pool = &unit.class.constant_pool;
    let mut sites = Vec::new();

    for (method_index, member) in unit.class.methods.iter().enumerate() {
        let Some(code) = member
            .code(pool)
            .map_err(|e| WeaveError::malformed(&unit.path, e))?
        else {
            continue;
        };
        let instructions = decode(&code.code).map_err(|e| WeaveError::malformed(&unit.path, e))?;
        let method = &unit.methods[method_index];
        let enclosing = resolution.target_at(&unit.path, method_index).map(|t| t.key);

        let mut found = Vec::new();
        for ins in &instructions {
            if let Some((pc, target)) = invoked_target(ins, pool, resolution, &unit.path)? {
                found.push((pc, ins.opcode, target));
            }
        }
        if found.is_empty() {
            continue;
        }

        let lines = code
            .line_numbers(pool)
            .map_err(|e| WeaveError::malformed(&unit.path, e))?
            .ok_or_else(|| missing_debug_info(unit, method, "no LineNumberTable".into()))?;
        if unit.source_file.is_none() {
            return Err(missing_debug_info(unit, method, "class has no SourceFile attribute".into()));
        }

        for (pc, opcode, target) in found {
            let line = match lines.line_for_pc(pc) {
                Some(line) if line > 0 => line as u32,
                _ => {
                    return Err(missing_debug_info(
                        unit,
                        method,
                        format!("no line number covers offset {pc}"),
                    ))
                }
            };
            sites.push(CallSite {
                caller_method: method_index,
                caller_name: method.display_name(),
                pc,
                opcode,
                target,
                line,
                recursive: enclosing == Some(target),
            });
        }
    }

    tracing::debug!(unit = %unit.path, call_sites = sites.len(), "located call sites");
    Ok(sites)
}

fn invoked_target(
    ins: &Instruction,
    pool: &ConstantPool,
    resolution: &Resolution,
    unit: &str,
) -> WeaveResult<Option<(u32, lumos_model::MethodKey)>> {
    if !is_method_invoke(ins.opcode) {
        return Ok(None);
    }
    let (Some(pc), Some(index)) = (ins.label, ins.constant_index()) else {
        return Ok(None);
    };
    let member = pool
        .member_ref(index)
        .map_err(|e| WeaveError::malformed(unit, e))?;
    if member.owner.starts_with('[') {
        return Ok(None);
    }
    Ok(resolution
        .resolve_invocation(member.owner, member.name, member.descriptor)
        .map(|t| (pc, t.key)))
}

fn missing_debug_info(unit: &CompilationUnit, method: &MethodInfo, reason: String) -> WeaveError {
    WeaveError::MissingDebugInfo {
        unit: unit.path.clone(),
        method: method.display_name(),
        reason,
    }
}
