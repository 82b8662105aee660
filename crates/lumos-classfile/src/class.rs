//! Class file and member structure

use crate::attribute::{
    self, find_attribute, parse_attributes, write_attributes, Attribute, CodeAttribute,
};
use crate::bytes::{ByteReader, ByteWriter};
use crate::{access, ClassFileError, ConstantPool, Result};

pub const MAGIC: u32 = 0xCAFE_BABE;

/// A field or method
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub access_flags: u16,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: Vec<Attribute>,
}

impl Member {
    fn parse(r: &mut ByteReader<'_>) -> Result<Self> {
        Ok(Self {
            access_flags: r.u16()?,
            name_index: r.u16()?,
            descriptor_index: r.u16()?,
            attributes: parse_attributes(r)?,
        })
    }

    fn write(&self, w: &mut ByteWriter) {
        w.u16(self.access_flags)
            .u16(self.name_index)
            .u16(self.descriptor_index);
        write_attributes(w, &self.attributes);
    }

    /// Encoded form of this member on its own
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        self.write(&mut w);
        w.into_bytes()
    }

    pub fn name<'a>(&self, pool: &'a ConstantPool) -> Result<&'a str> {
        pool.utf8(self.name_index)
    }

    pub fn descriptor<'a>(&self, pool: &'a ConstantPool) -> Result<&'a str> {
        pool.utf8(self.descriptor_index)
    }

    pub fn is_static(&self) -> bool {
        access::has(self.access_flags, access::ACC_STATIC)
    }

    pub fn find_attribute<'a>(&'a self, pool: &ConstantPool, name: &str) -> Option<&'a Attribute> {
        find_attribute(&self.attributes, pool, name)
    }

    /// Decoded `Code` attribute, if the method has one
    pub fn code(&self, pool: &ConstantPool) -> Result<Option<CodeAttribute>> {
        match self.find_attribute(pool, attribute::CODE) {
            Some(a) => CodeAttribute::parse(&a.info).map(Some),
            None => Ok(None),
        }
    }

    /// Replace (or add) the `Code` attribute
    pub fn set_code(&mut self, pool: &mut ConstantPool, code: &CodeAttribute) -> Result<()> {
        let info = code.to_bytes();
        match attribute::find_attribute_index(&self.attributes, pool, attribute::CODE) {
            Some(i) => self.attributes[i].info = info,
            None => {
                let name_index = pool.utf8_index(attribute::CODE)?;
                self.attributes.push(Attribute::new(name_index, info));
            }
        }
        Ok(())
    }
}

/// A parsed class file
#[derive(Debug, Clone, PartialEq)]
pub struct ClassFile {
    pub minor_version: u16,
    pub major_version: u16,
    pub constant_pool: ConstantPool,
    pub access_flags: u16,
    pub this_class: u16,
    pub super_class: u16,
    pub interfaces: Vec<u16>,
    pub fields: Vec<Member>,
    pub methods: Vec<Member>,
    pub attributes: Vec<Attribute>,
}

impl ClassFile {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(data);
        let magic = r.u32()?;
        if magic != MAGIC {
            return Err(ClassFileError::BadMagic(magic));
        }
        let minor_version = r.u16()?;
        let major_version = r.u16()?;
        let constant_pool = ConstantPool::parse(&mut r)?;
        let access_flags = r.u16()?;
        let this_class = r.u16()?;
        let super_class = r.u16()?;

        let interface_count = r.u16()?;
        let mut interfaces = Vec::with_capacity(interface_count as usize);
        for _ in 0..interface_count {
            interfaces.push(r.u16()?);
        }

        let field_count = r.u16()?;
        let mut fields = Vec::with_capacity(field_count as usize);
        for _ in 0..field_count {
            fields.push(Member::parse(&mut r)?);
        }

        let method_count = r.u16()?;
        let mut methods = Vec::with_capacity(method_count as usize);
        for _ in 0..method_count {
            methods.push(Member::parse(&mut r)?);
        }

        let attributes = parse_attributes(&mut r)?;
        r.finish()?;

        let class = Self {
            minor_version,
            major_version,
            constant_pool,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        };
        // Reject classes whose own name does not resolve
        class.this_class_name()?;
        Ok(class)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = ByteWriter::with_capacity(4096);
        w.u32(MAGIC).u16(self.minor_version).u16(self.major_version);
        self.constant_pool.write(&mut w);
        w.u16(self.access_flags)
            .u16(self.this_class)
            .u16(self.super_class)
            .u16(self.interfaces.len() as u16);
        for i in &self.interfaces {
            w.u16(*i);
        }
        w.u16(self.fields.len() as u16);
        for f in &self.fields {
            f.write(&mut w);
        }
        w.u16(self.methods.len() as u16);
        for m in &self.methods {
            m.write(&mut w);
        }
        write_attributes(&mut w, &self.attributes);
        w.into_bytes()
    }

    /// Internal name of this class (`com/example/Foo`)
    pub fn this_class_name(&self) -> Result<&str> {
        self.constant_pool.class_name(self.this_class)
    }

    /// Internal name of the superclass; `None` for `java/lang/Object`
    pub fn super_class_name(&self) -> Result<Option<&str>> {
        if self.super_class == 0 {
            return Ok(None);
        }
        self.constant_pool.class_name(self.super_class).map(Some)
    }

    pub fn interface_names(&self) -> Result<Vec<&str>> {
        self.interfaces
            .iter()
            .map(|i| self.constant_pool.class_name(*i))
            .collect()
    }

    pub fn is_interface(&self) -> bool {
        access::has(self.access_flags, access::ACC_INTERFACE)
    }

    /// Value of the `SourceFile` attribute
    pub fn source_file(&self) -> Result<Option<&str>> {
        match self.find_attribute(attribute::SOURCE_FILE) {
            Some(a) => {
                let index = attribute::parse_index_attribute(&a.info)?;
                self.constant_pool.utf8(index).map(Some)
            }
            None => Ok(None),
        }
    }

    pub fn find_attribute(&self, name: &str) -> Option<&Attribute> {
        find_attribute(&self.attributes, &self.constant_pool, name)
    }

    /// Index of the method with this exact name and descriptor
    pub fn find_method(&self, name: &str, descriptor: &str) -> Option<usize> {
        self.methods.iter().position(|m| {
            m.name(&self.constant_pool).map_or(false, |n| n == name)
                && m.descriptor(&self.constant_pool).map_or(false, |d| d == descriptor)
        })
    }
}
