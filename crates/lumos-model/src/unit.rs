//! Parsed compilation units

use lumos_classfile::attribute::parse_index_attribute;
use lumos_classfile::{access, ClassFile};

use crate::error::{WeaveError, WeaveResult};
use crate::language::SourceLanguage;
use crate::WOVEN_MARKER_ATTRIBUTE;

/// Name, descriptor and flags of one method, decoded once per pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodInfo {
    pub name: String,
    pub descriptor: String,
    pub access_flags: u16,
    /// Original descriptor recorded by the weave marker, if present
    pub woven_from: Option<String>,
}

impl MethodInfo {
    pub fn is_static(&self) -> bool {
        access::has(self.access_flags, access::ACC_STATIC)
    }

    pub fn is_private(&self) -> bool {
        access::has(self.access_flags, access::ACC_PRIVATE)
    }

    /// Constructors, initializers, bridges, synthetic and native methods are never woven
    pub fn is_excluded(&self) -> bool {
        self.name.starts_with('<')
            || access::has(
                self.access_flags,
                access::ACC_BRIDGE | access::ACC_SYNTHETIC | access::ACC_NATIVE,
            )
    }

    /// `name(descriptor)` for diagnostics
    pub fn display_name(&self) -> String {
        format!("{}{}", self.name, self.descriptor)
    }
}

/// One class file of the artifact set
#[derive(Debug, Clone)]
pub struct CompilationUnit {
    /// Path relative to the input root, `/`-separated
    pub path: String,
    /// Bytes as read; restored on any failure
    pub bytes: Vec<u8>,
    pub class: ClassFile,
    /// Internal class name
    pub name: String,
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
    pub source_file: Option<String>,
    pub language: SourceLanguage,
    pub methods: Vec<MethodInfo>,
}

impl CompilationUnit {
    pub fn parse(path: impl Into<String>, bytes: Vec<u8>) -> WeaveResult<Self> {
        let path = path.into();
        let malformed = |e| WeaveError::malformed(path.clone(), e);

        let class = ClassFile::parse(&bytes).map_err(malformed)?;
        let pool = &class.constant_pool;
        let name = class.this_class_name().map_err(malformed)?.to_string();
        let super_name = class.super_class_name().map_err(malformed)?.map(str::to_string);
        let interfaces = class
            .interface_names()
            .map_err(malformed)?
            .into_iter()
            .map(str::to_string)
            .collect();
        let source_file = class.source_file().map_err(malformed)?.map(str::to_string);
        let language = SourceLanguage::from_source_file(source_file.as_deref());

        let mut methods = Vec::with_capacity(class.methods.len());
        for member in &class.methods {
            let woven_from = match member.find_attribute(pool, WOVEN_MARKER_ATTRIBUTE) {
                Some(attr) => {
                    let index = parse_index_attribute(&attr.info).map_err(malformed)?;
                    Some(pool.utf8(index).map_err(malformed)?.to_string())
                }
                None => None,
            };
            methods.push(MethodInfo {
                name: member.name(pool).map_err(malformed)?.to_string(),
                descriptor: member.descriptor(pool).map_err(malformed)?.to_string(),
                access_flags: member.access_flags,
                woven_from,
            });
        }

        Ok(Self {
            path,
            bytes,
            class,
            name,
            super_name,
            interfaces,
            source_file,
            language,
            methods,
        })
    }

    /// Index of the method with this name and exact descriptor
    pub fn find_method(&self, name: &str, descriptor: &str) -> Option<usize> {
        self.methods
            .iter()
            .position(|m| m.name == name && m.descriptor == descriptor)
    }

    /// Simple class name with nested classes dotted (`Outer.Inner`)
    pub fn simple_name(&self) -> String {
        let simple = self.name.rsplit('/').next().unwrap_or(&self.name);
        simple.replace('$', ".")
    }

    /// Package in internal form (`com/example`), empty for the default package
    pub fn package(&self) -> &str {
        match self.name.rfind('/') {
            Some(i) => &self.name[..i],
            None => "",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumos_classfile::access::{ACC_PUBLIC, ACC_STATIC, ACC_SYNTHETIC};
    use lumos_classfile::attribute::index_attribute_bytes;
    use lumos_classfile::{ClassBuilder, ClassFileError, CodeBuilder, MethodBuilder};
    use lumos_classfile::opcode::RETURN;

    #[test]
    fn test_parse_unit() {
        let mut class = ClassBuilder::new("com/example/Outer$Inner")
            .source_file("Outer.kt")
            .method(MethodBuilder::new(ACC_PUBLIC | ACC_STATIC, "run", "()V").code(CodeBuilder::new(0, 0).op(RETURN)))
            .method(MethodBuilder::new(ACC_PUBLIC | ACC_SYNTHETIC, "run$default", "()V"))
            .build_class()
            .unwrap();
        let original = class.constant_pool.utf8_index("(I)V").unwrap();
        let name = class.constant_pool.utf8_index(WOVEN_MARKER_ATTRIBUTE).unwrap();
        class.methods[0]
            .attributes
            .push(lumos_classfile::Attribute::new(name, index_attribute_bytes(original)));

        let unit = CompilationUnit::parse("com/example/Outer$Inner.class", class.to_bytes()).unwrap();
        assert_eq!(unit.name, "com/example/Outer$Inner");
        assert_eq!(unit.simple_name(), "Outer.Inner");
        assert_eq!(unit.package(), "com/example");
        assert_eq!(unit.language, SourceLanguage::Kotlin);
        assert_eq!(unit.methods[0].woven_from.as_deref(), Some("(I)V"));
        assert!(unit.methods[0].is_static());
        assert!(unit.methods[1].is_excluded());
        assert_eq!(unit.find_method("run", "()V"), Some(0));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let err = CompilationUnit::parse("Broken.class", vec![0xCA, 0xFE]).unwrap_err();
        assert_eq!(err.code(), "E-WEAVE-006");
        assert!(matches!(
            err,
            WeaveError::Malformed {
                source: ClassFileError::UnexpectedEof { .. },
                ..
            }
        ));
    }
}
