//! lumos-resolver: find the methods that receive call-site metadata
//!
//! Resolution runs once per pass over the whole artifact set and produces an
//! immutable [`Resolution`]:
//! - methods matched by a target descriptor, through the unit's language front-end
//! - methods carrying the marker annotation
//! - methods related to a matched method by overriding, up and down the
//!   hierarchy within the set
//! - `AmbiguousTarget` errors, `UnresolvedDescriptor` warnings and units
//!   blocked by a `SignatureCollision`
//! - units blocked because a `MethodHandle` constant names one of their targets
//!
//! Already-woven methods match on their pre-weave descriptor and are flagged,
//! which is what makes a second pass a no-op.

mod hierarchy;
mod resolution;
mod resolver;

pub use hierarchy::ClassHierarchy;
pub use resolution::Resolution;
pub use resolver::ResolveOptions;

use lumos_model::{CompilationUnit, TargetDescriptor};

/// Resolve `descriptors` (and annotated methods) against `units`
pub fn resolve(
    units: &[CompilationUnit],
    descriptors: &[TargetDescriptor],
    options: &ResolveOptions,
) -> Resolution {
    resolver::Resolver::new(units, descriptors, options).resolve()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumos_classfile::access::{ACC_ABSTRACT, ACC_INTERFACE, ACC_PRIVATE, ACC_PUBLIC, ACC_STATIC};
    use lumos_classfile::opcode::*;
    use lumos_classfile::{ClassBuilder, CodeBuilder, MethodBuilder};
    use lumos_model::{MatchOrigin, WeaveError};

    fn unit(builder: ClassBuilder) -> CompilationUnit {
        let class = builder.build_class().unwrap();
        let path = format!("{}.class", class.this_class_name().unwrap());
        CompilationUnit::parse(path, class.to_bytes()).unwrap()
    }

    fn void_method(access: u16, name: &str, descriptor: &str) -> MethodBuilder {
        MethodBuilder::new(access, name, descriptor).code(CodeBuilder::new(0, 4).op(RETURN))
    }

    fn descriptors(texts: &[&str]) -> Vec<TargetDescriptor> {
        texts.iter().map(|t| t.parse().unwrap()).collect()
    }

    fn java_example() -> CompilationUnit {
        unit(
            ClassBuilder::new("com/example/JavaExample")
                .source_file("JavaExample.java")
                .method(void_method(ACC_PUBLIC, "targetMethodInJava", "(I)V"))
                .method(void_method(ACC_PUBLIC, "targetMethodInJava", "(Ljava/lang/String;)V"))
                .method(void_method(ACC_PUBLIC, "<init>", "()V")),
        )
    }

    #[test]
    fn test_resolves_descriptor_by_simple_owner() {
        let units = vec![java_example()];
        let resolution = resolve(
            &units,
            &descriptors(&["JavaExample.targetMethodInJava(int)"]),
            &ResolveOptions::default(),
        );

        let targets = resolution.targets();
        assert_eq!(targets.len(), 1);
        let t = targets[0];
        assert_eq!(t.method_index, 0);
        assert_eq!(t.original_descriptor, "(I)V");
        assert_eq!(t.woven_descriptor, "(ILcom/lumos/runtime/Lumen;)V");
        assert_eq!(t.target_name, "JavaExample.targetMethodInJava");
        assert_eq!(t.origin, MatchOrigin::Descriptor(0));
        assert!(!t.already_woven);
        assert!(resolution.warnings().is_empty());
        assert!(resolution
            .resolve_invocation("com/example/JavaExample", "targetMethodInJava", "(I)V")
            .is_some());
    }

    #[test]
    fn test_qualified_descriptor_names_target_by_simple_class() {
        let units = vec![java_example()];
        let resolution = resolve(
            &units,
            &descriptors(&["com.example.JavaExample.targetMethodInJava(int)"]),
            &ResolveOptions::default(),
        );
        let targets = resolution.targets();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].target_name, "JavaExample.targetMethodInJava");
    }

    #[test]
    fn test_unresolved_descriptor_is_a_warning() {
        let units = vec![java_example()];
        let resolution = resolve(
            &units,
            &descriptors(&["JavaExample.missing(int)", "JavaExample.missing(int)"]),
            &ResolveOptions::default(),
        );
        assert!(resolution.is_empty());
        assert_eq!(resolution.warnings().len(), 1);
        assert!(!resolution.warnings()[0].is_hard_error());
        assert!(resolution.errors().is_empty());
    }

    #[test]
    fn test_ambiguous_target() {
        let units = vec![java_example()];
        let resolution = resolve(
            &units,
            &descriptors(&[
                "JavaExample.targetMethodInJava(int)",
                "com.example.JavaExample.targetMethodInJava(int)",
            ]),
            &ResolveOptions::default(),
        );
        assert!(resolution.is_empty());
        assert!(matches!(
            resolution.errors(),
            [WeaveError::AmbiguousTarget { descriptors, .. }] if descriptors.len() == 2
        ));
    }

    #[test]
    fn test_kotlin_top_level_and_annotation_targets() {
        let units = vec![
            unit(
                ClassBuilder::new("com/example/UtilsKt")
                    .source_file("Utils.kt")
                    .method(void_method(ACC_PUBLIC | ACC_STATIC, "greet", "(Ljava/lang/String;Ljava/lang/Integer;)V")),
            ),
            unit(
                ClassBuilder::new("com/example/Marked").source_file("Marked.kt").method(
                    void_method(ACC_PUBLIC, "trace", "()V").annotation("Lcom/lumos/runtime/LumosMaxima;"),
                ),
            ),
        ];
        let resolution = resolve(
            &units,
            &descriptors(&["com.example.greet(String, Int?)"]),
            &ResolveOptions::default(),
        );
        let targets = resolution.targets();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].target_name, "Marked.trace");
        assert_eq!(targets[0].origin, MatchOrigin::Annotation);
        assert_eq!(targets[1].target_name, "UtilsKt.greet");
        assert!(targets[1].is_static);

        let no_annotations = ResolveOptions {
            marker_annotation: None,
            ..ResolveOptions::default()
        };
        assert_eq!(
            resolve(&units, &descriptors(&["com.example.greet(String, Int?)"]), &no_annotations).len(),
            1
        );
    }

    #[test]
    fn test_overrides_become_targets() {
        let units = vec![
            unit(ClassBuilder::new("a/Base").method(void_method(ACC_PUBLIC, "run", "(I)V"))),
            unit(
                ClassBuilder::new("a/Child")
                    .super_class("a/Base")
                    .method(void_method(ACC_PUBLIC, "run", "(I)V"))
                    .method(void_method(ACC_PRIVATE, "helper", "(I)V")),
            ),
            unit(ClassBuilder::new("a/Unrelated").method(void_method(ACC_PUBLIC, "run", "(I)V"))),
        ];
        let resolution = resolve(&units, &descriptors(&["a.Base.run(int)"]), &ResolveOptions::default());

        let targets = resolution.targets();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[1].unit, "a/Child.class");
        assert_eq!(targets[1].origin, MatchOrigin::Override);
        assert_eq!(targets[1].target_name, "Child.run");
        // An invocation through the subtype finds the subtype's own target
        let via_child = resolution.resolve_invocation("a/Child", "run", "(I)V").unwrap();
        assert_eq!(via_child.unit, "a/Child.class");
    }

    fn api_family() -> Vec<CompilationUnit> {
        vec![
            unit(
                ClassBuilder::new("a/Api")
                    .access(ACC_PUBLIC | ACC_INTERFACE | ACC_ABSTRACT)
                    .method(MethodBuilder::new(ACC_PUBLIC | ACC_ABSTRACT, "call", "(I)V")),
            ),
            unit(
                ClassBuilder::new("a/Impl")
                    .interface("a/Api")
                    .method(void_method(ACC_PUBLIC, "call", "(I)V")),
            ),
            unit(
                ClassBuilder::new("a/Other")
                    .interface("a/Api")
                    .method(void_method(ACC_PUBLIC, "call", "(I)V")),
            ),
        ]
    }

    #[test]
    fn test_overridden_supertype_methods_become_targets() {
        let units = api_family();
        let resolution = resolve(&units, &descriptors(&["a.Impl.call(int)"]), &ResolveOptions::default());

        let targets = resolution.targets();
        let names: Vec<&str> = targets.iter().map(|t| t.target_name.as_str()).collect();
        assert_eq!(names, ["Api.call", "Impl.call", "Other.call"]);
        assert_eq!(targets[0].origin, MatchOrigin::Override);
        assert_eq!(targets[1].origin, MatchOrigin::Descriptor(0));
        assert_eq!(targets[2].origin, MatchOrigin::Override);
        assert_eq!(resolution.family(&targets[1].key).len(), 3);
        // Dispatch through the interface reaches a target too
        assert!(resolution.resolve_invocation("a/Api", "call", "(I)V").is_some());

        let units = vec![
            unit(ClassBuilder::new("a/Base").method(void_method(ACC_PUBLIC, "run", "(I)V"))),
            unit(
                ClassBuilder::new("a/Child")
                    .super_class("a/Base")
                    .method(void_method(ACC_PUBLIC, "run", "(I)V")),
            ),
        ];
        let resolution = resolve(&units, &descriptors(&["a.Child.run(int)"]), &ResolveOptions::default());
        let names: Vec<&str> = resolution.targets().iter().map(|t| t.target_name.as_str()).collect();
        assert_eq!(names, ["Base.run", "Child.run"]);
    }

    #[test]
    fn test_collision_blocks_whole_override_family() {
        let mut units = api_family();
        units[1] = unit(
            ClassBuilder::new("a/Impl")
                .interface("a/Api")
                .method(void_method(ACC_PUBLIC, "call", "(I)V"))
                .method(void_method(ACC_PUBLIC, "call", "(ILcom/lumos/runtime/Lumen;)V")),
        );
        let resolution = resolve(&units, &descriptors(&["a.Api.call(int)"]), &ResolveOptions::default());

        assert_eq!(resolution.len(), 3);
        assert!(resolution.unit_error("a/Impl.class").is_some());
        assert!(resolution.unit_error("a/Api.class").is_none());
        for t in resolution.targets() {
            assert!(resolution.is_blocked(&t.key), "{} is not blocked", t.target_name);
        }
    }

    #[test]
    fn test_signature_collision_blocks_unit() {
        let units = vec![unit(
            ClassBuilder::new("com/example/JavaExample")
                .method(void_method(ACC_PUBLIC, "targetMethodInJava", "(I)V"))
                .method(void_method(
                    ACC_PUBLIC,
                    "targetMethodInJava",
                    "(ILcom/lumos/runtime/Lumen;)V",
                )),
        )];
        let resolution = resolve(
            &units,
            &descriptors(&["JavaExample.targetMethodInJava(int)"]),
            &ResolveOptions::default(),
        );
        let err = resolution.unit_error("com/example/JavaExample.class").unwrap();
        assert_eq!(err.code(), "E-WEAVE-003");
        let key = resolution.targets()[0].key;
        assert!(resolution.is_blocked(&key));
    }

    #[test]
    fn test_method_handle_to_target_blocks_declaring_unit() {
        let mut holder = ClassBuilder::new("com/example/Holder")
            .source_file("Holder.java")
            .build_class()
            .unwrap();
        let pool = &mut holder.constant_pool;
        let reference = pool
            .method_ref_index("com/example/JavaExample", "targetMethodInJava", "(I)V", false)
            .unwrap();
        pool.method_handle_index(lumos_classfile::constant_pool::REF_INVOKE_VIRTUAL, reference)
            .unwrap();
        let units = vec![
            java_example(),
            CompilationUnit::parse("com/example/Holder.class", holder.to_bytes()).unwrap(),
        ];

        let resolution = resolve(
            &units,
            &descriptors(&["JavaExample.targetMethodInJava(int)"]),
            &ResolveOptions::default(),
        );
        let err = resolution.unit_error("com/example/JavaExample.class").unwrap();
        assert_eq!(err.code(), "E-WEAVE-007");
        assert!(err.to_string().contains("com/example/Holder.class"), "{err}");
        assert!(resolution.unit_error("com/example/Holder.class").is_none());
        assert!(resolution.is_blocked(&resolution.targets()[0].key));
    }

    #[test]
    fn test_already_woven_matches_logical_descriptor() {
        let woven = MethodBuilder::new(ACC_PUBLIC, "targetMethodInJava", "(ILcom/lumos/runtime/Lumen;)V")
            .code(CodeBuilder::new(0, 3).op(RETURN));
        let mut class = ClassBuilder::new("com/example/JavaExample").method(woven).build_class().unwrap();
        let pool = &mut class.constant_pool;
        let original = pool.utf8_index("(I)V").unwrap();
        let name = pool.utf8_index(lumos_model::WOVEN_MARKER_ATTRIBUTE).unwrap();
        class.methods[0].attributes.push(lumos_classfile::Attribute::new(
            name,
            lumos_classfile::attribute::index_attribute_bytes(original),
        ));
        let units = vec![CompilationUnit::parse("com/example/JavaExample.class", class.to_bytes()).unwrap()];

        let resolution = resolve(
            &units,
            &descriptors(&["JavaExample.targetMethodInJava(int)"]),
            &ResolveOptions::default(),
        );
        let t = resolution.targets()[0];
        assert!(t.already_woven);
        assert_eq!(t.original_descriptor, "(I)V");
        assert!(resolution.unit_error("com/example/JavaExample.class").is_none());
    }
}
