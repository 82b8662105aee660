//! Source-language front-ends
//!
//! Java and Kotlin compile to the same class-file representation but spell
//! owners and parameter types differently in target descriptors. Each unit is
//! assigned a front-end from its `SourceFile` attribute; matching then goes
//! through the front-end so a single descriptor can name targets in both.

use serde::{Deserialize, Serialize};

use crate::types::TypePattern;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceLanguage {
    Java,
    Kotlin,
}

/// `com/example/Foo$Inner` -> `com.example.Foo.Inner`
fn dotted(internal: &str) -> String {
    internal.replace(['/', '$'], ".")
}

/// Whether `name` equals `suffix` or ends with `.suffix`
fn dotted_suffix(name: &str, suffix: &str) -> bool {
    name == suffix
        || (name.len() > suffix.len()
            && name.ends_with(suffix)
            && name.as_bytes()[name.len() - suffix.len() - 1] == b'.')
}

impl SourceLanguage {
    /// Pick the front-end from a unit's `SourceFile` attribute
    pub fn from_source_file(source_file: Option<&str>) -> Self {
        match source_file {
            Some(name) if name.ends_with(".kt") || name.ends_with(".kts") => SourceLanguage::Kotlin,
            _ => SourceLanguage::Java,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SourceLanguage::Java => "java",
            SourceLanguage::Kotlin => "kotlin",
        }
    }

    /// Normalize a parameter type spelled in this language
    pub fn type_pattern(&self, raw: &str) -> TypePattern {
        match self {
            SourceLanguage::Java => TypePattern::java(raw),
            SourceLanguage::Kotlin => TypePattern::kotlin(raw),
        }
    }

    /// Whether a descriptor owner names the class `class_internal`
    ///
    /// Owners match the dotted class name or any `.`-aligned suffix of it, so
    /// both `com.example.Foo` and `Foo` name `com/example/Foo`. For Kotlin an
    /// owner may also name the package of a `...Kt` file facade, which is where
    /// top-level functions are compiled.
    pub fn owner_matches(&self, owner: &str, class_internal: &str) -> bool {
        let owner = owner.replace('$', ".");
        let class_name = dotted(class_internal);
        if dotted_suffix(&class_name, &owner) {
            return true;
        }

        match self {
            SourceLanguage::Java => false,
            SourceLanguage::Kotlin => {
                let (package, simple) = match class_internal.rfind('/') {
                    Some(i) => (class_internal[..i].replace('/', "."), &class_internal[i + 1..]),
                    None => (String::new(), class_internal),
                };
                simple.ends_with("Kt") && !package.is_empty() && dotted_suffix(&package, &owner)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_from_source_file() {
        assert_eq!(SourceLanguage::from_source_file(Some("Foo.kt")), SourceLanguage::Kotlin);
        assert_eq!(SourceLanguage::from_source_file(Some("build.gradle.kts")), SourceLanguage::Kotlin);
        assert_eq!(SourceLanguage::from_source_file(Some("Foo.java")), SourceLanguage::Java);
        assert_eq!(SourceLanguage::from_source_file(None), SourceLanguage::Java);
    }

    #[test]
    fn test_java_owner_matching() {
        let java = SourceLanguage::Java;
        assert!(java.owner_matches("JavaExample", "com/example/JavaExample"));
        assert!(java.owner_matches("com.example.JavaExample", "com/example/JavaExample"));
        assert!(java.owner_matches("Outer.Inner", "com/example/Outer$Inner"));
        assert!(java.owner_matches("Outer$Inner", "com/example/Outer$Inner"));
        assert!(!java.owner_matches("Example", "com/example/JavaExample"));
        assert!(!java.owner_matches("com.example", "com/example/UtilsKt"));
    }

    #[test]
    fn test_kotlin_facade_matching() {
        let kotlin = SourceLanguage::Kotlin;
        assert!(kotlin.owner_matches("com.example", "com/example/UtilsKt"));
        assert!(kotlin.owner_matches("com.example.UtilsKt", "com/example/UtilsKt"));
        assert!(kotlin.owner_matches("KotlinExample", "com/example/KotlinExample"));
        assert!(!kotlin.owner_matches("com.example", "com/example/Utils"));
        assert!(!kotlin.owner_matches("com.other", "com/example/UtilsKt"));
    }
}
