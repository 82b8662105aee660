//! JVM field and method descriptors

use std::fmt;

use crate::{ClassFileError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BaseType {
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    Short,
    Boolean,
}

impl BaseType {
    fn from_char(c: u8) -> Option<Self> {
        Some(match c {
            b'B' => BaseType::Byte,
            b'C' => BaseType::Char,
            b'D' => BaseType::Double,
            b'F' => BaseType::Float,
            b'I' => BaseType::Int,
            b'J' => BaseType::Long,
            b'S' => BaseType::Short,
            b'Z' => BaseType::Boolean,
            _ => return None,
        })
    }

    pub fn descriptor_char(self) -> char {
        match self {
            BaseType::Byte => 'B',
            BaseType::Char => 'C',
            BaseType::Double => 'D',
            BaseType::Float => 'F',
            BaseType::Int => 'I',
            BaseType::Long => 'J',
            BaseType::Short => 'S',
            BaseType::Boolean => 'Z',
        }
    }

    pub fn java_name(self) -> &'static str {
        match self {
            BaseType::Byte => "byte",
            BaseType::Char => "char",
            BaseType::Double => "double",
            BaseType::Float => "float",
            BaseType::Int => "int",
            BaseType::Long => "long",
            BaseType::Short => "short",
            BaseType::Boolean => "boolean",
        }
    }
}

/// The type of a field, parameter or return value
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldType {
    Base(BaseType),
    /// Internal class name, e.g. `java/lang/String`
    Object(String),
    Array(Box<FieldType>),
}

impl FieldType {
    pub fn object(internal_name: impl Into<String>) -> Self {
        FieldType::Object(internal_name.into())
    }

    pub fn parse(s: &str) -> Result<Self> {
        let bytes = s.as_bytes();
        let mut pos = 0;
        let ty = Self::parse_at(s, bytes, &mut pos)?;
        if pos != bytes.len() {
            return Err(ClassFileError::BadDescriptor(s.to_string()));
        }
        Ok(ty)
    }

    fn parse_at(s: &str, bytes: &[u8], pos: &mut usize) -> Result<Self> {
        let bad = || ClassFileError::BadDescriptor(s.to_string());
        let c = *bytes.get(*pos).ok_or_else(bad)?;
        *pos += 1;
        if let Some(base) = BaseType::from_char(c) {
            return Ok(FieldType::Base(base));
        }
        match c {
            b'L' => {
                let start = *pos;
                let len = bytes[start..].iter().position(|b| *b == b';').ok_or_else(bad)?;
                if len == 0 {
                    return Err(bad());
                }
                *pos = start + len + 1;
                Ok(FieldType::Object(s[start..start + len].to_string()))
            }
            b'[' => Ok(FieldType::Array(Box::new(Self::parse_at(s, bytes, pos)?))),
            _ => Err(bad()),
        }
    }

    /// Local variable slots occupied by a value of this type
    pub fn slots(&self) -> u16 {
        match self {
            FieldType::Base(BaseType::Long) | FieldType::Base(BaseType::Double) => 2,
            _ => 1,
        }
    }

    /// Java source spelling: `int`, `java.lang.String`, `int[]`
    pub fn java_name(&self) -> String {
        match self {
            FieldType::Base(b) => b.java_name().to_string(),
            FieldType::Object(name) => name.replace('/', "."),
            FieldType::Array(inner) => format!("{}[]", inner.java_name()),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Base(b) => write!(f, "{}", b.descriptor_char()),
            FieldType::Object(name) => write!(f, "L{};", name),
            FieldType::Array(inner) => write!(f, "[{}", inner),
        }
    }
}

/// A method descriptor: parameter types and return type (`None` for void)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodDescriptor {
    pub params: Vec<FieldType>,
    pub ret: Option<FieldType>,
}

impl MethodDescriptor {
    pub fn parse(s: &str) -> Result<Self> {
        let bad = || ClassFileError::BadDescriptor(s.to_string());
        let bytes = s.as_bytes();
        if bytes.first() != Some(&b'(') {
            return Err(bad());
        }
        let mut pos = 1;
        let mut params = Vec::new();
        loop {
            match bytes.get(pos) {
                Some(b')') => {
                    pos += 1;
                    break;
                }
                Some(_) => params.push(FieldType::parse_at(s, bytes, &mut pos)?),
                None => return Err(bad()),
            }
        }
        let ret = if bytes.get(pos) == Some(&b'V') {
            pos += 1;
            None
        } else {
            Some(FieldType::parse_at(s, bytes, &mut pos)?)
        };
        if pos != bytes.len() {
            return Err(bad());
        }
        Ok(Self { params, ret })
    }

    /// Slots taken by the declared parameters (excluding `this`)
    pub fn param_slots(&self) -> u16 {
        self.params.iter().map(FieldType::slots).sum()
    }

    /// Copy of this descriptor with one more trailing parameter
    pub fn with_appended(&self, param: FieldType) -> Self {
        let mut params = self.params.clone();
        params.push(param);
        Self {
            params,
            ret: self.ret.clone(),
        }
    }

    /// Copy of this descriptor without its last parameter
    pub fn without_last(&self) -> Option<Self> {
        let mut params = self.params.clone();
        params.pop()?;
        Some(Self {
            params,
            ret: self.ret.clone(),
        })
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for p in &self.params {
            write!(f, "{}", p)?;
        }
        write!(f, ")")?;
        match &self.ret {
            Some(t) => write!(f, "{}", t),
            None => write!(f, "V"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_method_descriptor() {
        let d = MethodDescriptor::parse("(IJ[Ljava/lang/String;)V").unwrap();
        assert_eq!(d.params.len(), 3);
        assert_eq!(d.param_slots(), 4);
        assert_eq!(d.ret, None);
        assert_eq!(d.params[2].java_name(), "java.lang.String[]");
        assert_eq!(d.to_string(), "(IJ[Ljava/lang/String;)V");
    }

    #[test]
    fn test_with_appended() {
        let d = MethodDescriptor::parse("(I)Ljava/lang/Object;").unwrap();
        let woven = d.with_appended(FieldType::object("com/lumos/runtime/Lumen"));
        assert_eq!(woven.to_string(), "(ILcom/lumos/runtime/Lumen;)Ljava/lang/Object;");
        assert_eq!(woven.without_last().unwrap(), d);
    }

    #[test]
    fn test_rejects_malformed() {
        for bad in ["", "I", "(", "(L;)V", "(I)", "(I)VV", "(Q)V", "(Ljava/lang/String)V"] {
            assert!(MethodDescriptor::parse(bad).is_err(), "accepted {bad:?}");
        }
    }
}
