//! lumos-verifier: post-weave consistency checks
//!
//! A woven unit is only written back after a [`Verifier`] accepts it. The
//! default [`ConsistencyVerifier`] re-parses the output and compares it with
//! the original unit and its plan; any difference the plan does not explain
//! fails the unit with `VerificationFailure`.

mod consistency;

use lumos_model::{CompilationUnit, RewritePlan, WeaveError, WeaveResult, DEFAULT_METADATA_CLASS};

use consistency::Consistency;

/// Check a woven unit before it is committed
pub trait Verifier: Send + Sync {
    fn verify(&self, original: &CompilationUnit, woven: &[u8], plan: &RewritePlan) -> WeaveResult<()>;
}

#[derive(Debug, Clone)]
pub struct ConsistencyVerifier {
    metadata_class: String,
}

impl ConsistencyVerifier {
    pub fn new(metadata_class: impl Into<String>) -> Self {
        Self {
            metadata_class: metadata_class.into(),
        }
    }
}

impl Default for ConsistencyVerifier {
    fn default() -> Self {
        Self::new(DEFAULT_METADATA_CLASS)
    }
}

impl Verifier for ConsistencyVerifier {
    fn verify(&self, original: &CompilationUnit, woven: &[u8], plan: &RewritePlan) -> WeaveResult<()> {
        let check = Consistency {
            metadata_class: &self.metadata_class,
            original,
            plan,
        };
        check.check(woven).map_err(|reason| {
            tracing::debug!(unit = %original.path, %reason, "consistency check failed");
            WeaveError::VerificationFailure {
                unit: original.path.clone(),
                reason,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::path::PathBuf;

    use lumos_classfile::access::{ACC_PUBLIC, ACC_STATIC};
    use lumos_classfile::opcode::*;
    use lumos_classfile::{assemble, decode, ClassBuilder, ClassFile, CodeBuilder, MethodBuilder, Operand};
    use lumos_locator::{locate, SourceIndex};
    use lumos_model::TargetDescriptor;
    use lumos_resolver::{resolve, ResolveOptions};
    use lumos_weaver::{build_plan, weave, WeaveOptions};

    fn unit(builder: ClassBuilder) -> CompilationUnit {
        let class = builder.build_class().unwrap();
        let path = format!("{}.class", class.this_class_name().unwrap());
        CompilationUnit::parse(path, class.to_bytes()).unwrap()
    }

    /// Caller unit, its plan and the woven bytes
    fn woven_caller() -> (CompilationUnit, RewritePlan, Vec<u8>) {
        let target = unit(
            ClassBuilder::new("com/example/JavaExample")
                .source_file("JavaExample.java")
                .method(
                    MethodBuilder::new(ACC_PUBLIC | ACC_STATIC, "targetMethodInJava", "(I)V")
                        .code(CodeBuilder::new(0, 1).line(3).op(RETURN)),
                ),
        );
        let body = CodeBuilder::new(1, 1)
            .line(42)
            .local(ILOAD, 0)
            .jump(IFEQ, 1)
            .push_int(1)
            .member(INVOKESTATIC, "com/example/JavaExample", "targetMethodInJava", "(I)V")
            .label(1)
            .line(44)
            .op(RETURN);
        let caller = unit(
            ClassBuilder::new("com/example/Foo")
                .source_file("Foo.java")
                .method(MethodBuilder::new(ACC_PUBLIC | ACC_STATIC, "main", "(I)V").code(body))
                .method(
                    MethodBuilder::new(ACC_PUBLIC | ACC_STATIC, "idle", "()V")
                        .code(CodeBuilder::new(0, 0).line(50).op(RETURN)),
                ),
        );

        let units = vec![target, caller];
        let descriptors: Vec<TargetDescriptor> = vec!["JavaExample.targetMethodInJava(int)".parse().unwrap()];
        let resolution = resolve(&units, &descriptors, &ResolveOptions::default());
        let caller = &units[1];
        let sites = locate(caller, &resolution).unwrap();
        let plan = build_plan(caller, sites, &resolution, &SourceIndex::build::<PathBuf>(&[]), &HashSet::new()).unwrap();
        let bytes = weave(caller, &plan, &WeaveOptions::default()).unwrap();
        (caller.clone(), plan, bytes)
    }

    /// Rewrite the code of method `index` with `edit` applied to its instructions
    fn tamper(bytes: &[u8], index: usize, edit: impl Fn(&mut Vec<lumos_classfile::Instruction>)) -> Vec<u8> {
        let mut class = ClassFile::parse(bytes).unwrap();
        let mut code = class.methods[index].code(&class.constant_pool).unwrap().unwrap();
        let mut instructions = decode(&code.code).unwrap();
        edit(&mut instructions);
        code.code = assemble(&instructions, code.code.len() as u32).unwrap().code;
        class.methods[index].set_code(&mut class.constant_pool, &code).unwrap();
        class.to_bytes()
    }

    #[test]
    fn test_accepts_woven_unit() {
        let (original, plan, bytes) = woven_caller();
        assert_eq!(plan.calls.len(), 1);
        ConsistencyVerifier::default().verify(&original, &bytes, &plan).unwrap();
    }

    #[test]
    fn test_rejects_wrong_line_literal() {
        let (original, plan, bytes) = woven_caller();
        let tampered = tamper(&bytes, 0, |ins| {
            for i in ins.iter_mut() {
                if i.operand == Operand::Byte(42) {
                    i.operand = Operand::Byte(41);
                }
            }
        });
        let err = ConsistencyVerifier::default().verify(&original, &tampered, &plan).unwrap_err();
        assert_eq!(err.code(), "E-WEAVE-004");
        assert!(err.to_string().contains("line literal"), "{err}");
    }

    #[test]
    fn test_rejects_changed_untouched_method() {
        let (original, plan, bytes) = woven_caller();
        let tampered = tamper(&bytes, 1, |ins| ins.insert(0, lumos_classfile::Instruction::simple(NOP)));
        let err = ConsistencyVerifier::default().verify(&original, &tampered, &plan).unwrap_err();
        assert!(err.to_string().contains("untouched method idle()V changed"), "{err}");
    }

    #[test]
    fn test_rejects_changes_without_plan() {
        let (original, _, bytes) = woven_caller();
        let empty = RewritePlan::new(&original.path);
        assert!(ConsistencyVerifier::default().verify(&original, &original.bytes, &empty).is_ok());
        assert!(ConsistencyVerifier::default().verify(&original, &bytes, &empty).is_err());
    }
}
