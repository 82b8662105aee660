//! Supertype relations within the artifact set

use std::collections::{HashMap, HashSet, VecDeque};

use lumos_model::CompilationUnit;

#[derive(Debug, Clone)]
struct ClassNode {
    unit: usize,
    supertypes: Vec<String>,
}

/// Superclass and interface edges of every class in the set
///
/// Classes outside the set (JDK, libraries) appear only as edge endpoints.
#[derive(Debug, Clone, Default)]
pub struct ClassHierarchy {
    classes: HashMap<String, ClassNode>,
}

impl ClassHierarchy {
    pub fn build(units: &[CompilationUnit]) -> Self {
        let mut classes = HashMap::with_capacity(units.len());
        for (index, unit) in units.iter().enumerate() {
            if classes.contains_key(&unit.name) {
                tracing::warn!(class = %unit.name, unit = %unit.path, "duplicate class in artifact set, keeping the first");
                continue;
            }
            let supertypes = unit
                .super_name
                .iter()
                .chain(unit.interfaces.iter())
                .cloned()
                .collect();
            classes.insert(unit.name.clone(), ClassNode { unit: index, supertypes });
        }
        Self { classes }
    }

    /// Index of the unit declaring `class`
    pub fn unit_of(&self, class: &str) -> Option<usize> {
        self.classes.get(class).map(|n| n.unit)
    }

    pub fn contains(&self, class: &str) -> bool {
        self.classes.contains_key(class)
    }

    /// Proper supertypes of `class`, nearest first (superclass before interfaces)
    pub fn ancestors(&self, class: &str) -> Vec<&str> {
        let mut out = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();

        if let Some(node) = self.classes.get(class) {
            queue.extend(node.supertypes.iter().map(String::as_str));
        }
        while let Some(name) = queue.pop_front() {
            if name == class || !seen.insert(name) {
                continue;
            }
            out.push(name);
            if let Some(node) = self.classes.get(name) {
                queue.extend(node.supertypes.iter().map(String::as_str));
            }
        }
        out
    }

    pub fn is_subtype(&self, sub: &str, sup: &str) -> bool {
        sub == sup || self.ancestors(sub).contains(&sup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumos_classfile::access::{ACC_ABSTRACT, ACC_INTERFACE, ACC_PUBLIC};
    use lumos_classfile::ClassBuilder;

    fn unit(builder: ClassBuilder) -> CompilationUnit {
        let class = builder.build_class().unwrap();
        let path = format!("{}.class", class.this_class_name().unwrap());
        CompilationUnit::parse(path, class.to_bytes()).unwrap()
    }

    #[test]
    fn test_ancestors_walk_classes_and_interfaces() {
        let units = vec![
            unit(ClassBuilder::new("a/Base").interface("a/Service")),
            unit(ClassBuilder::new("a/Service").access(ACC_PUBLIC | ACC_INTERFACE | ACC_ABSTRACT)),
            unit(ClassBuilder::new("a/Impl").super_class("a/Base")),
        ];
        let hierarchy = ClassHierarchy::build(&units);

        assert_eq!(hierarchy.ancestors("a/Impl"), vec!["a/Base", "java/lang/Object", "a/Service"]);
        assert!(hierarchy.is_subtype("a/Impl", "a/Service"));
        assert!(!hierarchy.is_subtype("a/Base", "a/Impl"));
        assert_eq!(hierarchy.unit_of("a/Impl"), Some(2));
        assert!(hierarchy.ancestors("java/lang/Object").is_empty());
    }
}
