//! Attributes: raw storage plus typed views of the ones the weaver edits
//!
//! Attributes are stored as `(name_index, info)` pairs so that anything this
//! crate does not understand survives a round trip untouched.

use crate::bytes::{ByteReader, ByteWriter};
use crate::{ClassFileError, ConstantPool, Result};

pub const CODE: &str = "Code";
pub const LINE_NUMBER_TABLE: &str = "LineNumberTable";
pub const LOCAL_VARIABLE_TABLE: &str = "LocalVariableTable";
pub const LOCAL_VARIABLE_TYPE_TABLE: &str = "LocalVariableTypeTable";
pub const STACK_MAP_TABLE: &str = "StackMapTable";
pub const SOURCE_FILE: &str = "SourceFile";
pub const SIGNATURE: &str = "Signature";
pub const METHOD_PARAMETERS: &str = "MethodParameters";
pub const RUNTIME_VISIBLE_ANNOTATIONS: &str = "RuntimeVisibleAnnotations";
pub const RUNTIME_INVISIBLE_ANNOTATIONS: &str = "RuntimeInvisibleAnnotations";
pub const RUNTIME_VISIBLE_PARAMETER_ANNOTATIONS: &str = "RuntimeVisibleParameterAnnotations";
pub const RUNTIME_INVISIBLE_PARAMETER_ANNOTATIONS: &str = "RuntimeInvisibleParameterAnnotations";

/// An attribute in its encoded form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name_index: u16,
    pub info: Vec<u8>,
}

impl Attribute {
    pub fn new(name_index: u16, info: Vec<u8>) -> Self {
        Self { name_index, info }
    }

    pub fn name<'a>(&self, pool: &'a ConstantPool) -> Result<&'a str> {
        pool.utf8(self.name_index)
    }

    pub fn is_named(&self, pool: &ConstantPool, name: &str) -> bool {
        self.name(pool).map(|n| n == name).unwrap_or(false)
    }

    pub(crate) fn write(&self, w: &mut ByteWriter) {
        w.u16(self.name_index)
            .u32(self.info.len() as u32)
            .bytes(&self.info);
    }
}

pub(crate) fn parse_attributes(r: &mut ByteReader<'_>) -> Result<Vec<Attribute>> {
    let count = r.u16()?;
    let mut attributes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let name_index = r.u16()?;
        let len = r.u32()? as usize;
        let info = r.bytes(len)?.to_vec();
        attributes.push(Attribute { name_index, info });
    }
    Ok(attributes)
}

pub(crate) fn write_attributes(w: &mut ByteWriter, attributes: &[Attribute]) {
    w.u16(attributes.len() as u16);
    for attribute in attributes {
        attribute.write(w);
    }
}

/// First attribute with the given name
pub fn find_attribute<'a>(
    attributes: &'a [Attribute],
    pool: &ConstantPool,
    name: &str,
) -> Option<&'a Attribute> {
    attributes.iter().find(|a| a.is_named(pool, name))
}

/// Position of the first attribute with the given name
pub fn find_attribute_index(attributes: &[Attribute], pool: &ConstantPool, name: &str) -> Option<usize> {
    attributes.iter().position(|a| a.is_named(pool, name))
}

// =============================================================================
// Code
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionEntry {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    pub catch_type: u16,
}

/// The `Code` attribute of a method
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeAttribute {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub exception_table: Vec<ExceptionEntry>,
    pub attributes: Vec<Attribute>,
}

impl CodeAttribute {
    pub fn parse(info: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(info);
        let max_stack = r.u16()?;
        let max_locals = r.u16()?;
        let code_len = r.u32()? as usize;
        let code = r.bytes(code_len)?.to_vec();
        let exception_count = r.u16()?;
        let mut exception_table = Vec::with_capacity(exception_count as usize);
        for _ in 0..exception_count {
            exception_table.push(ExceptionEntry {
                start_pc: r.u16()?,
                end_pc: r.u16()?,
                handler_pc: r.u16()?,
                catch_type: r.u16()?,
            });
        }
        let attributes = parse_attributes(&mut r)?;
        r.finish()?;
        Ok(Self {
            max_stack,
            max_locals,
            code,
            exception_table,
            attributes,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = ByteWriter::with_capacity(self.code.len() + 64);
        w.u16(self.max_stack)
            .u16(self.max_locals)
            .u32(self.code.len() as u32)
            .bytes(&self.code);
        w.u16(self.exception_table.len() as u16);
        for e in &self.exception_table {
            w.u16(e.start_pc).u16(e.end_pc).u16(e.handler_pc).u16(e.catch_type);
        }
        write_attributes(&mut w, &self.attributes);
        w.into_bytes()
    }

    /// Merge every `LineNumberTable` of this method; `None` when there is none
    pub fn line_numbers(&self, pool: &ConstantPool) -> Result<Option<LineNumberTable>> {
        let mut merged: Option<LineNumberTable> = None;
        for attribute in &self.attributes {
            if attribute.is_named(pool, LINE_NUMBER_TABLE) {
                let table = LineNumberTable::parse(&attribute.info)?;
                merged
                    .get_or_insert_with(LineNumberTable::default)
                    .entries
                    .extend(table.entries);
            }
        }
        Ok(merged)
    }
}

// =============================================================================
// LineNumberTable
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineNumberEntry {
    pub start_pc: u16,
    pub line_number: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineNumberTable {
    pub entries: Vec<LineNumberEntry>,
}

impl LineNumberTable {
    pub fn parse(info: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(info);
        let count = r.u16()?;
        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            entries.push(LineNumberEntry {
                start_pc: r.u16()?,
                line_number: r.u16()?,
            });
        }
        r.finish()?;
        Ok(Self { entries })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = ByteWriter::with_capacity(2 + self.entries.len() * 4);
        w.u16(self.entries.len() as u16);
        for e in &self.entries {
            w.u16(e.start_pc).u16(e.line_number);
        }
        w.into_bytes()
    }

    /// Source line of the instruction at `pc`
    ///
    /// Entries need not be sorted; the entry with the greatest `start_pc` not
    /// after `pc` wins, later entries breaking ties.
    pub fn line_for_pc(&self, pc: u32) -> Option<u16> {
        let mut best: Option<LineNumberEntry> = None;
        for e in &self.entries {
            if e.start_pc as u32 <= pc && best.map_or(true, |b| e.start_pc >= b.start_pc) {
                best = Some(*e);
            }
        }
        best.map(|e| e.line_number)
    }
}

// =============================================================================
// LocalVariableTable / LocalVariableTypeTable
// =============================================================================

/// One entry of a `LocalVariableTable` or `LocalVariableTypeTable`
///
/// For the type table `descriptor_index` points at a generic signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalVariableEntry {
    pub start_pc: u16,
    pub length: u16,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub index: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalVariableTable {
    pub entries: Vec<LocalVariableEntry>,
}

impl LocalVariableTable {
    pub fn parse(info: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(info);
        let count = r.u16()?;
        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            entries.push(LocalVariableEntry {
                start_pc: r.u16()?,
                length: r.u16()?,
                name_index: r.u16()?,
                descriptor_index: r.u16()?,
                index: r.u16()?,
            });
        }
        r.finish()?;
        Ok(Self { entries })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = ByteWriter::with_capacity(2 + self.entries.len() * 10);
        w.u16(self.entries.len() as u16);
        for e in &self.entries {
            w.u16(e.start_pc)
                .u16(e.length)
                .u16(e.name_index)
                .u16(e.descriptor_index)
                .u16(e.index);
        }
        w.into_bytes()
    }
}

// =============================================================================
// Small fixed-shape attributes
// =============================================================================

/// Body of a `SourceFile` or `Signature` attribute: one constant pool index
pub fn parse_index_attribute(info: &[u8]) -> Result<u16> {
    let mut r = ByteReader::new(info);
    let index = r.u16()?;
    r.finish()?;
    Ok(index)
}

pub fn index_attribute_bytes(index: u16) -> Vec<u8> {
    index.to_be_bytes().to_vec()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodParameter {
    pub name_index: u16,
    pub access_flags: u16,
}

pub fn parse_method_parameters(info: &[u8]) -> Result<Vec<MethodParameter>> {
    let mut r = ByteReader::new(info);
    let count = r.u8()?;
    let mut params = Vec::with_capacity(count as usize);
    for _ in 0..count {
        params.push(MethodParameter {
            name_index: r.u16()?,
            access_flags: r.u16()?,
        });
    }
    r.finish()?;
    Ok(params)
}

pub fn method_parameters_bytes(params: &[MethodParameter]) -> Result<Vec<u8>> {
    if params.len() > u8::MAX as usize {
        return Err(ClassFileError::Malformed(
            "more than 255 method parameters".into(),
        ));
    }
    let mut w = ByteWriter::with_capacity(1 + params.len() * 4);
    w.u8(params.len() as u8);
    for p in params {
        w.u16(p.name_index).u16(p.access_flags);
    }
    Ok(w.into_bytes())
}
