//! lumos-locator: find the calls to resolved targets
//!
//! [`locate`] scans one unit's method bodies for `invoke*` instructions that
//! resolve to a target and attaches the source line from the method's
//! `LineNumberTable`. [`SourceIndex`] turns a unit's `SourceFile` name into the
//! path reported to the target.

mod locate;
mod source_index;

pub use locate::locate;
pub use source_index::{base_name, SourceIndex};

#[cfg(test)]
mod tests {
    use super::*;
    use lumos_classfile::access::{ACC_PUBLIC, ACC_STATIC};
    use lumos_classfile::opcode::*;
    use lumos_classfile::{ClassBuilder, CodeBuilder, MethodBuilder};
    use lumos_model::{CompilationUnit, TargetDescriptor, WeaveError};
    use lumos_resolver::{resolve, ResolveOptions};

    fn unit(builder: ClassBuilder) -> CompilationUnit {
        let class = builder.build_class().unwrap();
        let path = format!("{}.class", class.this_class_name().unwrap());
        CompilationUnit::parse(path, class.to_bytes()).unwrap()
    }

    fn target_class() -> CompilationUnit {
        // static void count(int n) { if (n > 0) count(n - 1); }
        let body = CodeBuilder::new(2, 1)
            .line(5)
            .local(ILOAD, 0)
            .jump(IFEQ, 1)
            .line(6)
            .local(ILOAD, 0)
            .push_int(1)
            .op(0x64) // isub
            .member(INVOKESTATIC, "com/example/Target", "count", "(I)V")
            .label(1)
            .line(7)
            .op(RETURN);
        unit(
            ClassBuilder::new("com/example/Target")
                .source_file("Target.java")
                .method(MethodBuilder::new(ACC_PUBLIC | ACC_STATIC, "count", "(I)V").code(body)),
        )
    }

    fn caller(name: &str, source: Option<&str>, with_lines: bool) -> CompilationUnit {
        let mut body = CodeBuilder::new(1, 1);
        if with_lines {
            body = body.line(42);
        }
        body = body
            .push_int(7)
            .member(INVOKESTATIC, "com/example/Target", "count", "(I)V")
            .push_int(3)
            .member(INVOKESTATIC, "com/example/Target", "other", "(I)V")
            .op(RETURN);
        let mut builder = ClassBuilder::new(name)
            .method(MethodBuilder::new(ACC_PUBLIC | ACC_STATIC, "main", "()V").code(body));
        if let Some(source) = source {
            builder = builder.source_file(source);
        }
        unit(builder)
    }

    fn targets() -> Vec<TargetDescriptor> {
        vec!["com.example.Target.count(int)".parse().unwrap()]
    }

    #[test]
    fn test_locates_calls_with_lines() {
        let units = vec![target_class(), caller("com/example/Foo", Some("Foo.java"), true)];
        let resolution = resolve(&units, &targets(), &ResolveOptions::default());

        let sites = locate(&units[1], &resolution).unwrap();
        assert_eq!(sites.len(), 1);
        assert_eq!(sites[0].line, 42);
        assert_eq!(sites[0].pc, 2);
        assert_eq!(sites[0].opcode, INVOKESTATIC);
        assert!(!sites[0].recursive);
        assert_eq!(sites[0].caller_name, "main()V");
    }

    #[test]
    fn test_flags_recursive_calls() {
        let units = vec![target_class()];
        let resolution = resolve(&units, &targets(), &ResolveOptions::default());

        let sites = locate(&units[0], &resolution).unwrap();
        assert_eq!(sites.len(), 1);
        assert!(sites[0].recursive);
        assert_eq!(sites[0].line, 6);
    }

    #[test]
    fn test_missing_debug_info() {
        let units = vec![
            target_class(),
            caller("com/example/NoLines", Some("NoLines.java"), false),
            caller("com/example/NoSource", None, true),
        ];
        let resolution = resolve(&units, &targets(), &ResolveOptions::default());

        for unit in &units[1..] {
            let err = locate(unit, &resolution).unwrap_err();
            assert!(matches!(err, WeaveError::MissingDebugInfo { .. }), "{err}");
        }
    }

    #[test]
    fn test_no_targets_no_sites() {
        let units = vec![caller("com/example/Foo", None, false)];
        let resolution = resolve(&units, &targets(), &ResolveOptions::default());
        assert!(locate(&units[0], &resolution).unwrap().is_empty());
    }
}
