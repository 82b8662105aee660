//! Synthesis of the runtime classes woven code links against
//!
//! Woven targets take an instance of the metadata class as their last
//! parameter, and unwoven callers may mark targets with the marker annotation.
//! Both classes are generated here so a build can ship them without depending
//! on a separate runtime artifact.

use lumos_classfile::access::{ACC_ABSTRACT, ACC_ANNOTATION, ACC_FINAL, ACC_INTERFACE, ACC_PRIVATE, ACC_PUBLIC, ACC_SUPER};
use lumos_classfile::opcode::*;
use lumos_classfile::{ClassBuilder, CodeBuilder, MethodBuilder, Result};
use lumos_model::METADATA_CONSTRUCTOR_DESCRIPTOR;

const STRING: &str = "Ljava/lang/String;";
const STRING_BUILDER: &str = "java/lang/StringBuilder";

/// A generated class file and its path relative to an output root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeClass {
    /// Internal name
    pub name: String,
    pub bytes: Vec<u8>,
}

impl RuntimeClass {
    /// `com/lumos/runtime/Lumen.class`
    pub fn relative_path(&self) -> String {
        format!("{}.class", self.name)
    }
}

/// Fields of the metadata class, in constructor order
const FIELDS: &[(&str, &str, &str)] = &[
    ("filePath", STRING, "getFilePath"),
    ("fileName", STRING, "getFileName"),
    ("lineNumber", "I", "getLineNumber"),
    ("targetFunctionName", STRING, "getTargetFunctionName"),
];

/// Generate the metadata class `metadata_class`
///
/// Immutable: four private final fields set by the constructor, a getter per
/// field, and `toString` rendering
/// `Lumen(filePath=..., fileName=..., lineNumber=..., targetFunctionName=...)`.
pub fn metadata_class(metadata_class: &str) -> Result<RuntimeClass> {
    let simple = metadata_class.rsplit('/').next().unwrap_or(metadata_class);
    let mut class = ClassBuilder::new(metadata_class)
        .access(ACC_PUBLIC | ACC_FINAL | ACC_SUPER)
        .source_file(format!("{simple}.java"));

    let mut ctor = CodeBuilder::new(2, 5)
        .local(ALOAD, 0)
        .member(INVOKESPECIAL, "java/lang/Object", "<init>", "()V");
    let mut slot = 1;
    for (name, descriptor, _) in FIELDS {
        let load = if *descriptor == "I" { ILOAD } else { ALOAD };
        ctor = ctor
            .local(ALOAD, 0)
            .local(load, slot)
            .member(PUTFIELD, metadata_class, *name, *descriptor);
        slot += 1;
    }
    class = class.method(
        MethodBuilder::new(ACC_PUBLIC, "<init>", METADATA_CONSTRUCTOR_DESCRIPTOR)
            .code(ctor.op(RETURN))
            .parameter_names(&["filePath", "fileName", "lineNumber", "targetFunctionName"]),
    );

    for (name, descriptor, getter) in FIELDS {
        class = class.field(ACC_PRIVATE | ACC_FINAL, *name, *descriptor);
        let ret = if *descriptor == "I" { IRETURN } else { ARETURN };
        let code = CodeBuilder::new(1, 1)
            .local(ALOAD, 0)
            .member(GETFIELD, metadata_class, *name, *descriptor)
            .op(ret);
        class = class.method(MethodBuilder::new(ACC_PUBLIC, *getter, format!("(){descriptor}")).code(code));
    }

    let mut to_string = CodeBuilder::new(3, 1)
        .type_op(NEW, STRING_BUILDER)
        .op(DUP)
        .member(INVOKESPECIAL, STRING_BUILDER, "<init>", "()V");
    for (i, (name, descriptor, _)) in FIELDS.iter().enumerate() {
        let label = if i == 0 {
            format!("{simple}({name}=")
        } else {
            format!(", {name}=")
        };
        to_string = to_string
            .ldc_string(label)
            .member(INVOKEVIRTUAL, STRING_BUILDER, "append", "(Ljava/lang/String;)Ljava/lang/StringBuilder;")
            .local(ALOAD, 0)
            .member(GETFIELD, metadata_class, *name, *descriptor)
            .member(
                INVOKEVIRTUAL,
                STRING_BUILDER,
                "append",
                format!("({descriptor})Ljava/lang/StringBuilder;"),
            );
    }
    let to_string = to_string
        .ldc_string(")")
        .member(INVOKEVIRTUAL, STRING_BUILDER, "append", "(Ljava/lang/String;)Ljava/lang/StringBuilder;")
        .member(INVOKEVIRTUAL, STRING_BUILDER, "toString", "()Ljava/lang/String;")
        .op(ARETURN);
    class = class.method(MethodBuilder::new(ACC_PUBLIC, "toString", "()Ljava/lang/String;").code(to_string));

    Ok(RuntimeClass {
        name: metadata_class.to_string(),
        bytes: class.build()?,
    })
}

/// Generate the marker annotation interface `annotation`
pub fn marker_annotation(annotation: &str) -> Result<RuntimeClass> {
    let bytes = ClassBuilder::new(annotation)
        .access(ACC_PUBLIC | ACC_INTERFACE | ACC_ABSTRACT | ACC_ANNOTATION)
        .interface("java/lang/annotation/Annotation")
        .build()?;
    Ok(RuntimeClass {
        name: annotation.to_string(),
        bytes,
    })
}

/// Every runtime class: the metadata class, then the marker annotation if any
pub fn runtime_classes(metadata: &str, annotation: Option<&str>) -> Result<Vec<RuntimeClass>> {
    let mut classes = vec![metadata_class(metadata)?];
    if let Some(annotation) = annotation {
        classes.push(marker_annotation(annotation)?);
    }
    Ok(classes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumos_classfile::{decode, ClassFile};
    use lumos_model::DEFAULT_METADATA_CLASS;

    #[test]
    fn test_metadata_class_shape() {
        let runtime = metadata_class(DEFAULT_METADATA_CLASS).unwrap();
        assert_eq!(runtime.relative_path(), "com/lumos/runtime/Lumen.class");

        let class = ClassFile::parse(&runtime.bytes).unwrap();
        assert_eq!(class.this_class_name().unwrap(), DEFAULT_METADATA_CLASS);
        assert_eq!(class.fields.len(), 4);
        assert!(class.find_method("<init>", METADATA_CONSTRUCTOR_DESCRIPTOR).is_some());
        assert!(class.find_method("getFilePath", "()Ljava/lang/String;").is_some());
        assert!(class.find_method("getLineNumber", "()I").is_some());
        assert!(class.find_method("getTargetFunctionName", "()Ljava/lang/String;").is_some());

        let pool = &class.constant_pool;
        let index = class.find_method("toString", "()Ljava/lang/String;").unwrap();
        let code = class.methods[index].code(pool).unwrap().unwrap();
        let strings: Vec<String> = decode(&code.code)
            .unwrap()
            .iter()
            .filter(|i| i.opcode == LDC)
            .filter_map(|i| i.constant_index())
            .filter_map(|idx| pool.string(idx).ok().map(str::to_string))
            .collect();
        assert_eq!(
            strings,
            ["Lumen(filePath=", ", fileName=", ", lineNumber=", ", targetFunctionName=", ")"]
        );
    }

    #[test]
    fn test_marker_annotation_is_annotation_interface() {
        let runtime = marker_annotation("com/lumos/runtime/LumosMaxima").unwrap();
        let class = ClassFile::parse(&runtime.bytes).unwrap();
        assert!(class.is_interface());
        assert_ne!(class.access_flags & ACC_ANNOTATION, 0);
        assert_eq!(class.interface_names().unwrap(), ["java/lang/annotation/Annotation"]);
    }
}
