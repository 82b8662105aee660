//! Constant pool model
//!
//! Entries keep enough of their original encoding that re-serializing an
//! unmodified pool reproduces the input bytes exactly. UTF-8 entries hold both
//! the raw modified-UTF-8 bytes and their decoded text.

use crate::bytes::{ByteReader, ByteWriter};
use crate::{ClassFileError, Result};

pub const TAG_UTF8: u8 = 1;
pub const TAG_INTEGER: u8 = 3;
pub const TAG_FLOAT: u8 = 4;
pub const TAG_LONG: u8 = 5;
pub const TAG_DOUBLE: u8 = 6;
pub const TAG_CLASS: u8 = 7;
pub const TAG_STRING: u8 = 8;
pub const TAG_FIELDREF: u8 = 9;
pub const TAG_METHODREF: u8 = 10;
pub const TAG_INTERFACE_METHODREF: u8 = 11;
pub const TAG_NAME_AND_TYPE: u8 = 12;
pub const TAG_METHOD_HANDLE: u8 = 15;
pub const TAG_METHOD_TYPE: u8 = 16;
pub const TAG_DYNAMIC: u8 = 17;
pub const TAG_INVOKE_DYNAMIC: u8 = 18;
pub const TAG_MODULE: u8 = 19;
pub const TAG_PACKAGE: u8 = 20;

/// `MethodHandle` reference kinds that name a method
pub const REF_INVOKE_VIRTUAL: u8 = 5;
pub const REF_INVOKE_STATIC: u8 = 6;
pub const REF_INVOKE_SPECIAL: u8 = 7;
pub const REF_NEW_INVOKE_SPECIAL: u8 = 8;
pub const REF_INVOKE_INTERFACE: u8 = 9;

/// Highest number of slots a pool may hold (the count field is a u16)
const MAX_POOL_SLOTS: usize = u16::MAX as usize;

/// A single constant pool entry
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    /// Slot 0 and the slot following a Long or Double
    Unusable,
    Utf8 { text: String, raw: Vec<u8> },
    Integer(i32),
    Float(u32),
    Long(u64),
    Double(u64),
    Class { name_index: u16 },
    String { string_index: u16 },
    Fieldref { class_index: u16, name_and_type_index: u16 },
    Methodref { class_index: u16, name_and_type_index: u16 },
    InterfaceMethodref { class_index: u16, name_and_type_index: u16 },
    NameAndType { name_index: u16, descriptor_index: u16 },
    MethodHandle { reference_kind: u8, reference_index: u16 },
    MethodType { descriptor_index: u16 },
    Dynamic { bootstrap_method_attr_index: u16, name_and_type_index: u16 },
    InvokeDynamic { bootstrap_method_attr_index: u16, name_and_type_index: u16 },
    Module { name_index: u16 },
    Package { name_index: u16 },
}

impl Constant {
    /// Build a UTF-8 entry from text, computing its modified UTF-8 encoding
    pub fn utf8(text: impl Into<String>) -> Self {
        let text = text.into();
        let raw = encode_modified_utf8(&text);
        Constant::Utf8 { text, raw }
    }

    fn is_wide(&self) -> bool {
        matches!(self, Constant::Long(_) | Constant::Double(_))
    }
}

/// Which kind of member a symbolic reference names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberRefKind {
    Field,
    Method,
    InterfaceMethod,
}

/// A resolved field or method reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberRef<'a> {
    pub kind: MemberRefKind,
    pub owner: &'a str,
    pub name: &'a str,
    pub descriptor: &'a str,
}

/// The constant pool of a class file (1-based)
#[derive(Debug, Clone, PartialEq)]
pub struct ConstantPool {
    entries: Vec<Constant>,
}

impl Default for ConstantPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstantPool {
    pub fn new() -> Self {
        Self {
            entries: vec![Constant::Unusable],
        }
    }

    /// The value written to the `constant_pool_count` field
    pub fn count(&self) -> u16 {
        self.entries.len() as u16
    }

    pub fn iter(&self) -> impl Iterator<Item = (u16, &Constant)> {
        self.entries
            .iter()
            .enumerate()
            .skip(1)
            .filter(|(_, c)| !matches!(c, Constant::Unusable))
            .map(|(i, c)| (i as u16, c))
    }

    pub(crate) fn parse(r: &mut ByteReader<'_>) -> Result<Self> {
        let count = r.u16()? as usize;
        let mut entries = Vec::with_capacity(count);
        entries.push(Constant::Unusable);

        while entries.len() < count {
            let index = entries.len() as u16;
            let tag = r.u8()?;
            let constant = match tag {
                TAG_UTF8 => {
                    let len = r.u16()? as usize;
                    let raw = r.bytes(len)?.to_vec();
                    let text = decode_modified_utf8(&raw);
                    Constant::Utf8 { text, raw }
                }
                TAG_INTEGER => Constant::Integer(r.i32()?),
                TAG_FLOAT => Constant::Float(r.u32()?),
                TAG_LONG => Constant::Long(r.u64()?),
                TAG_DOUBLE => Constant::Double(r.u64()?),
                TAG_CLASS => Constant::Class { name_index: r.u16()? },
                TAG_STRING => Constant::String { string_index: r.u16()? },
                TAG_FIELDREF => Constant::Fieldref {
                    class_index: r.u16()?,
                    name_and_type_index: r.u16()?,
                },
                TAG_METHODREF => Constant::Methodref {
                    class_index: r.u16()?,
                    name_and_type_index: r.u16()?,
                },
                TAG_INTERFACE_METHODREF => Constant::InterfaceMethodref {
                    class_index: r.u16()?,
                    name_and_type_index: r.u16()?,
                },
                TAG_NAME_AND_TYPE => Constant::NameAndType {
                    name_index: r.u16()?,
                    descriptor_index: r.u16()?,
                },
                TAG_METHOD_HANDLE => Constant::MethodHandle {
                    reference_kind: r.u8()?,
                    reference_index: r.u16()?,
                },
                TAG_METHOD_TYPE => Constant::MethodType {
                    descriptor_index: r.u16()?,
                },
                TAG_DYNAMIC => Constant::Dynamic {
                    bootstrap_method_attr_index: r.u16()?,
                    name_and_type_index: r.u16()?,
                },
                TAG_INVOKE_DYNAMIC => Constant::InvokeDynamic {
                    bootstrap_method_attr_index: r.u16()?,
                    name_and_type_index: r.u16()?,
                },
                TAG_MODULE => Constant::Module { name_index: r.u16()? },
                TAG_PACKAGE => Constant::Package { name_index: r.u16()? },
                _ => return Err(ClassFileError::BadConstantTag { tag, index }),
            };
            let wide = constant.is_wide();
            entries.push(constant);
            if wide {
                entries.push(Constant::Unusable);
            }
        }

        if entries.len() != count {
            return Err(ClassFileError::Malformed(
                "wide constant overruns the constant pool".into(),
            ));
        }

        Ok(Self { entries })
    }

    pub(crate) fn write(&self, w: &mut ByteWriter) {
        w.u16(self.count());
        for constant in &self.entries {
            match constant {
                Constant::Unusable => {}
                Constant::Utf8 { raw, .. } => {
                    w.u8(TAG_UTF8).u16(raw.len() as u16).bytes(raw);
                }
                Constant::Integer(v) => {
                    w.u8(TAG_INTEGER).i32(*v);
                }
                Constant::Float(bits) => {
                    w.u8(TAG_FLOAT).u32(*bits);
                }
                Constant::Long(bits) => {
                    w.u8(TAG_LONG).u64(*bits);
                }
                Constant::Double(bits) => {
                    w.u8(TAG_DOUBLE).u64(*bits);
                }
                Constant::Class { name_index } => {
                    w.u8(TAG_CLASS).u16(*name_index);
                }
                Constant::String { string_index } => {
                    w.u8(TAG_STRING).u16(*string_index);
                }
                Constant::Fieldref { class_index, name_and_type_index } => {
                    w.u8(TAG_FIELDREF).u16(*class_index).u16(*name_and_type_index);
                }
                Constant::Methodref { class_index, name_and_type_index } => {
                    w.u8(TAG_METHODREF).u16(*class_index).u16(*name_and_type_index);
                }
                Constant::InterfaceMethodref { class_index, name_and_type_index } => {
                    w.u8(TAG_INTERFACE_METHODREF)
                        .u16(*class_index)
                        .u16(*name_and_type_index);
                }
                Constant::NameAndType { name_index, descriptor_index } => {
                    w.u8(TAG_NAME_AND_TYPE).u16(*name_index).u16(*descriptor_index);
                }
                Constant::MethodHandle { reference_kind, reference_index } => {
                    w.u8(TAG_METHOD_HANDLE).u8(*reference_kind).u16(*reference_index);
                }
                Constant::MethodType { descriptor_index } => {
                    w.u8(TAG_METHOD_TYPE).u16(*descriptor_index);
                }
                Constant::Dynamic { bootstrap_method_attr_index, name_and_type_index } => {
                    w.u8(TAG_DYNAMIC)
                        .u16(*bootstrap_method_attr_index)
                        .u16(*name_and_type_index);
                }
                Constant::InvokeDynamic { bootstrap_method_attr_index, name_and_type_index } => {
                    w.u8(TAG_INVOKE_DYNAMIC)
                        .u16(*bootstrap_method_attr_index)
                        .u16(*name_and_type_index);
                }
                Constant::Module { name_index } => {
                    w.u8(TAG_MODULE).u16(*name_index);
                }
                Constant::Package { name_index } => {
                    w.u8(TAG_PACKAGE).u16(*name_index);
                }
            }
        }
    }

    // === Lookups ===

    pub fn get(&self, index: u16) -> Option<&Constant> {
        match self.entries.get(index as usize) {
            Some(Constant::Unusable) | None => None,
            Some(c) => Some(c),
        }
    }

    pub fn utf8(&self, index: u16) -> Result<&str> {
        match self.get(index) {
            Some(Constant::Utf8 { text, .. }) => Ok(text),
            _ => Err(ClassFileError::BadConstantIndex { index, expected: "Utf8" }),
        }
    }

    /// Internal name of a `Class` entry (e.g. `com/example/Foo`)
    pub fn class_name(&self, index: u16) -> Result<&str> {
        match self.get(index) {
            Some(Constant::Class { name_index }) => self.utf8(*name_index),
            _ => Err(ClassFileError::BadConstantIndex { index, expected: "Class" }),
        }
    }

    pub fn string(&self, index: u16) -> Result<&str> {
        match self.get(index) {
            Some(Constant::String { string_index }) => self.utf8(*string_index),
            _ => Err(ClassFileError::BadConstantIndex { index, expected: "String" }),
        }
    }

    pub fn integer(&self, index: u16) -> Result<i32> {
        match self.get(index) {
            Some(Constant::Integer(v)) => Ok(*v),
            _ => Err(ClassFileError::BadConstantIndex { index, expected: "Integer" }),
        }
    }

    pub fn name_and_type(&self, index: u16) -> Result<(&str, &str)> {
        match self.get(index) {
            Some(Constant::NameAndType { name_index, descriptor_index }) => {
                Ok((self.utf8(*name_index)?, self.utf8(*descriptor_index)?))
            }
            _ => Err(ClassFileError::BadConstantIndex {
                index,
                expected: "NameAndType",
            }),
        }
    }

    pub fn member_ref(&self, index: u16) -> Result<MemberRef<'_>> {
        let (kind, class_index, nat_index) = match self.get(index) {
            Some(Constant::Fieldref { class_index, name_and_type_index }) => {
                (MemberRefKind::Field, *class_index, *name_and_type_index)
            }
            Some(Constant::Methodref { class_index, name_and_type_index }) => {
                (MemberRefKind::Method, *class_index, *name_and_type_index)
            }
            Some(Constant::InterfaceMethodref { class_index, name_and_type_index }) => {
                (MemberRefKind::InterfaceMethod, *class_index, *name_and_type_index)
            }
            _ => {
                return Err(ClassFileError::BadConstantIndex {
                    index,
                    expected: "member reference",
                })
            }
        };
        let owner = self.class_name(class_index)?;
        let (name, descriptor) = self.name_and_type(nat_index)?;
        Ok(MemberRef { kind, owner, name, descriptor })
    }

    // === Interning ===
    //
    // Each `*_index` method returns an existing equal entry when there is one,
    // otherwise appends a new entry. Existing indices never move.

    fn push(&mut self, constant: Constant) -> Result<u16> {
        let slots = if constant.is_wide() { 2 } else { 1 };
        if self.entries.len() + slots > MAX_POOL_SLOTS {
            return Err(ClassFileError::ConstantPoolOverflow);
        }
        let index = self.entries.len() as u16;
        let wide = constant.is_wide();
        self.entries.push(constant);
        if wide {
            self.entries.push(Constant::Unusable);
        }
        Ok(index)
    }

    fn find(&self, pred: impl Fn(&Constant) -> bool) -> Option<u16> {
        self.entries
            .iter()
            .position(|c| !matches!(c, Constant::Unusable) && pred(c))
            .map(|i| i as u16)
    }

    pub fn utf8_index(&mut self, text: &str) -> Result<u16> {
        if let Some(i) = self.find(|c| matches!(c, Constant::Utf8 { text: t, .. } if t == text)) {
            return Ok(i);
        }
        let constant = Constant::utf8(text);
        if let Constant::Utf8 { raw, .. } = &constant {
            if raw.len() > u16::MAX as usize {
                return Err(ClassFileError::Utf8TooLong { len: raw.len() });
            }
        }
        self.push(constant)
    }

    pub fn class_index(&mut self, internal_name: &str) -> Result<u16> {
        let name_index = self.utf8_index(internal_name)?;
        if let Some(i) = self.find(|c| matches!(c, Constant::Class { name_index: n } if *n == name_index)) {
            return Ok(i);
        }
        self.push(Constant::Class { name_index })
    }

    pub fn string_index(&mut self, value: &str) -> Result<u16> {
        let string_index = self.utf8_index(value)?;
        if let Some(i) = self.find(|c| matches!(c, Constant::String { string_index: s } if *s == string_index)) {
            return Ok(i);
        }
        self.push(Constant::String { string_index })
    }

    pub fn integer_index(&mut self, value: i32) -> Result<u16> {
        if let Some(i) = self.find(|c| matches!(c, Constant::Integer(v) if *v == value)) {
            return Ok(i);
        }
        self.push(Constant::Integer(value))
    }

    pub fn name_and_type_index(&mut self, name: &str, descriptor: &str) -> Result<u16> {
        let name_index = self.utf8_index(name)?;
        let descriptor_index = self.utf8_index(descriptor)?;
        let existing = self.find(|c| {
            matches!(c, Constant::NameAndType { name_index: n, descriptor_index: d }
                if *n == name_index && *d == descriptor_index)
        });
        if let Some(i) = existing {
            return Ok(i);
        }
        self.push(Constant::NameAndType {
            name_index,
            descriptor_index,
        })
    }

    /// Intern a `Methodref` (or `InterfaceMethodref` when `interface` is set)
    pub fn method_ref_index(
        &mut self,
        owner: &str,
        name: &str,
        descriptor: &str,
        interface: bool,
    ) -> Result<u16> {
        let class_index = self.class_index(owner)?;
        let nat = self.name_and_type_index(name, descriptor)?;
        let existing = self.find(|c| match c {
            Constant::Methodref { class_index: ci, name_and_type_index: n } if !interface => {
                *ci == class_index && *n == nat
            }
            Constant::InterfaceMethodref { class_index: ci, name_and_type_index: n } if interface => {
                *ci == class_index && *n == nat
            }
            _ => false,
        });
        if let Some(i) = existing {
            return Ok(i);
        }
        let constant = if interface {
            Constant::InterfaceMethodref {
                class_index,
                name_and_type_index: nat,
            }
        } else {
            Constant::Methodref {
                class_index,
                name_and_type_index: nat,
            }
        };
        self.push(constant)
    }

    pub fn method_handle_index(&mut self, reference_kind: u8, reference_index: u16) -> Result<u16> {
        let existing = self.find(|c| {
            matches!(c, Constant::MethodHandle { reference_kind: k, reference_index: r }
                if *k == reference_kind && *r == reference_index)
        });
        if let Some(i) = existing {
            return Ok(i);
        }
        self.push(Constant::MethodHandle {
            reference_kind,
            reference_index,
        })
    }

    /// Methods named by `MethodHandle` entries, as `(handle index, reference)`
    pub fn method_handles(&self) -> impl Iterator<Item = (u16, MemberRef<'_>)> {
        self.iter().filter_map(move |(index, c)| match c {
            Constant::MethodHandle {
                reference_kind: REF_INVOKE_VIRTUAL..=REF_INVOKE_INTERFACE,
                reference_index,
            } => self.member_ref(*reference_index).ok().map(|m| (index, m)),
            _ => None,
        })
    }

    pub fn field_ref_index(&mut self, owner: &str, name: &str, descriptor: &str) -> Result<u16> {
        let class_index = self.class_index(owner)?;
        let nat = self.name_and_type_index(name, descriptor)?;
        let existing = self.find(|c| {
            matches!(c, Constant::Fieldref { class_index: ci, name_and_type_index: n }
                if *ci == class_index && *n == nat)
        });
        if let Some(i) = existing {
            return Ok(i);
        }
        self.push(Constant::Fieldref {
            class_index,
            name_and_type_index: nat,
        })
    }
}

/// Decode Java's modified UTF-8 into a Rust string
///
/// Invalid sequences decode to U+FFFD; the raw bytes are kept separately so
/// this never affects re-serialization.
pub fn decode_modified_utf8(raw: &[u8]) -> String {
    let mut units: Vec<u16> = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        let b = raw[i];
        if b & 0x80 == 0 {
            units.push(b as u16);
            i += 1;
        } else if b & 0xE0 == 0xC0 && i + 1 < raw.len() {
            units.push((((b & 0x1F) as u16) << 6) | (raw[i + 1] & 0x3F) as u16);
            i += 2;
        } else if b & 0xF0 == 0xE0 && i + 2 < raw.len() {
            units.push(
                (((b & 0x0F) as u16) << 12)
                    | (((raw[i + 1] & 0x3F) as u16) << 6)
                    | (raw[i + 2] & 0x3F) as u16,
            );
            i += 3;
        } else {
            units.push(0xFFFD);
            i += 1;
        }
    }
    String::from_utf16_lossy(&units)
}

/// Encode a string as Java's modified UTF-8 (NUL as two bytes, surrogate pairs
/// as two three-byte sequences)
pub fn encode_modified_utf8(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    for unit in text.encode_utf16() {
        match unit {
            0x0001..=0x007F => out.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                out.push(0xC0 | ((unit >> 6) & 0x1F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                out.push(0xE0 | ((unit >> 12) & 0x0F) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
    out
}
