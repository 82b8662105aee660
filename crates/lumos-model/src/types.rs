//! Normalized parameter types
//!
//! Descriptor parameters are written in source spelling (`int`, `String`,
//! `kotlin.Int?`, `Array<out String>`, `String...`). They are normalized to
//! Java names with explicit array depth so they can be compared against the
//! JVM descriptors of compiled methods.

use std::fmt;

use lumos_classfile::FieldType;

/// A parameter type as written in a target descriptor, after normalization
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypePattern {
    /// Element type in Java spelling, `.` separated (`int`, `java.lang.String`, `String`)
    pub base: String,
    /// Array depth
    pub dims: usize,
}

const KOTLIN_PRIMITIVES: &[(&str, &str, &str)] = &[
    ("Int", "int", "java.lang.Integer"),
    ("Long", "long", "java.lang.Long"),
    ("Short", "short", "java.lang.Short"),
    ("Byte", "byte", "java.lang.Byte"),
    ("Char", "char", "java.lang.Character"),
    ("Boolean", "boolean", "java.lang.Boolean"),
    ("Float", "float", "java.lang.Float"),
    ("Double", "double", "java.lang.Double"),
];

const KOTLIN_PRIMITIVE_ARRAYS: &[(&str, &str)] = &[
    ("IntArray", "int"),
    ("LongArray", "long"),
    ("ShortArray", "short"),
    ("ByteArray", "byte"),
    ("CharArray", "char"),
    ("BooleanArray", "boolean"),
    ("FloatArray", "float"),
    ("DoubleArray", "double"),
];

const KOTLIN_MAPPED: &[(&str, &str)] = &[
    ("String", "java.lang.String"),
    ("Any", "java.lang.Object"),
    ("CharSequence", "java.lang.CharSequence"),
    ("Number", "java.lang.Number"),
    ("Throwable", "java.lang.Throwable"),
    ("Comparable", "java.lang.Comparable"),
    ("Enum", "java.lang.Enum"),
    ("Nothing", "java.lang.Void"),
];

const KOTLIN_COLLECTIONS: &[(&str, &str)] = &[
    ("List", "java.util.List"),
    ("MutableList", "java.util.List"),
    ("Set", "java.util.Set"),
    ("MutableSet", "java.util.Set"),
    ("Map", "java.util.Map"),
    ("MutableMap", "java.util.Map"),
    ("Collection", "java.util.Collection"),
    ("MutableCollection", "java.util.Collection"),
    ("Iterable", "java.lang.Iterable"),
    ("MutableIterable", "java.lang.Iterable"),
    ("Iterator", "java.util.Iterator"),
    ("MutableIterator", "java.util.Iterator"),
];

const JAVA_PRIMITIVES: &[&str] = &["int", "long", "short", "byte", "char", "boolean", "float", "double"];

fn strip_kotlin_prefix<'a>(name: &'a str, package: &str) -> &'a str {
    name.strip_prefix(package)
        .and_then(|rest| rest.strip_prefix('.'))
        .unwrap_or(name)
}

fn lookup<'t>(table: &'t [(&'t str, &'t str)], name: &str) -> Option<&'t str> {
    table.iter().find(|(k, _)| *k == name).map(|(_, v)| *v)
}

impl TypePattern {
    /// Normalize a Java-spelled type
    pub fn java(raw: &str) -> Self {
        Self::normalize(raw, false)
    }

    /// Normalize a Kotlin-spelled type; Java spellings are accepted as well
    pub fn kotlin(raw: &str) -> Self {
        Self::normalize(raw, true)
    }

    fn normalize(raw: &str, kotlin: bool) -> Self {
        let mut text = raw.trim();
        let mut dims = 0;
        let mut nullable = false;

        if kotlin {
            if let Some(rest) = text.strip_prefix("vararg ") {
                dims += 1;
                text = rest.trim();
            }
        }

        // Peel suffixes from the outside in
        loop {
            if let Some(rest) = text.strip_suffix("...") {
                dims += 1;
                text = rest.trim_end();
            } else if let Some(rest) = text.strip_suffix("[]") {
                dims += 1;
                text = rest.trim_end();
            } else if let Some(rest) = text.strip_suffix('?') {
                nullable = dims == 0;
                text = rest.trim_end();
            } else {
                break;
            }
        }

        if let Some(open) = text.find('<') {
            let base = text[..open].trim();
            let close = text.rfind('>').unwrap_or(text.len());
            if kotlin && strip_kotlin_prefix(base, "kotlin") == "Array" && close > open {
                let arg = text[open + 1..close].trim();
                let arg = arg
                    .strip_prefix("out ")
                    .or_else(|| arg.strip_prefix("in "))
                    .unwrap_or(arg);
                let mut inner = Self::normalize(arg, true);
                inner.dims += dims + 1;
                return inner;
            }
            // Generic arguments are erased
            text = base;
        }

        let mut base = text.replace('$', ".");
        if kotlin {
            let bare = strip_kotlin_prefix(&base, "kotlin");
            let collection = strip_kotlin_prefix(bare, "collections");
            if let Some((_, primitive, boxed)) = KOTLIN_PRIMITIVES.iter().find(|(k, _, _)| *k == bare) {
                base = (if nullable && dims == 0 { boxed } else { primitive }).to_string();
            } else if let Some(element) = lookup(KOTLIN_PRIMITIVE_ARRAYS, bare) {
                dims += 1;
                base = element.to_string();
            } else if let Some(mapped) = lookup(KOTLIN_MAPPED, bare) {
                base = mapped.to_string();
            } else if let Some(mapped) = lookup(KOTLIN_COLLECTIONS, collection) {
                base = mapped.to_string();
            }
        }

        Self { base, dims }
    }

    pub fn is_primitive(&self) -> bool {
        self.dims == 0 && JAVA_PRIMITIVES.contains(&self.base.as_str())
    }

    /// Whether a compiled parameter of type `ty` is spelled by this pattern
    ///
    /// Reference types match on the full name or on any `.`-aligned suffix of
    /// it, so `String`, `lang.String` and `java.lang.String` all match
    /// `Ljava/lang/String;`.
    pub fn matches(&self, ty: &FieldType) -> bool {
        let mut dims = 0;
        let mut element = ty;
        while let FieldType::Array(inner) = element {
            dims += 1;
            element = inner;
        }
        if dims != self.dims {
            return false;
        }
        match element {
            FieldType::Base(b) => b.java_name() == self.base,
            FieldType::Object(internal) => {
                let name = internal.replace('/', ".").replace('$', ".");
                name == self.base
                    || (name.len() > self.base.len()
                        && name.ends_with(self.base.as_str())
                        && name.as_bytes()[name.len() - self.base.len() - 1] == b'.')
            }
            FieldType::Array(_) => false,
        }
    }
}

impl fmt::Display for TypePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.base)?;
        for _ in 0..self.dims {
            write!(f, "[]")?;
        }
        Ok(())
    }
}
