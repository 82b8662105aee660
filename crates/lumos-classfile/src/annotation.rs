//! Just enough of the annotation attributes to find annotation types and to
//! extend parameter annotations

use crate::attribute::{
    Attribute, RUNTIME_INVISIBLE_ANNOTATIONS, RUNTIME_VISIBLE_ANNOTATIONS,
};
use crate::bytes::{ByteReader, ByteWriter};
use crate::{ClassFileError, ConstantPool, Result};

fn skip_element_value(r: &mut ByteReader<'_>) -> Result<()> {
    let tag = r.u8()?;
    match tag {
        b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z' | b's' | b'c' => r.skip(2),
        b'e' => r.skip(4),
        b'@' => skip_annotation(r).map(|_| ()),
        b'[' => {
            let count = r.u16()?;
            for _ in 0..count {
                skip_element_value(r)?;
            }
            Ok(())
        }
        _ => Err(ClassFileError::Malformed(format!(
            "unknown annotation element tag {:?}",
            tag as char
        ))),
    }
}

/// Skip one annotation, returning its type index
fn skip_annotation(r: &mut ByteReader<'_>) -> Result<u16> {
    let type_index = r.u16()?;
    let pairs = r.u16()?;
    for _ in 0..pairs {
        r.u16()?;
        skip_element_value(r)?;
    }
    Ok(type_index)
}

/// Type descriptor indices of the annotations in a `Runtime*Annotations` body
pub fn annotation_types(info: &[u8]) -> Result<Vec<u16>> {
    let mut r = ByteReader::new(info);
    let count = r.u16()?;
    let mut types = Vec::with_capacity(count as usize);
    for _ in 0..count {
        types.push(skip_annotation(&mut r)?);
    }
    r.finish()?;
    Ok(types)
}

/// Whether the attributes carry an annotation of type `descriptor`
/// (e.g. `Lcom/lumos/runtime/LumosMaxima;`), visible or not
pub fn has_annotation(attributes: &[Attribute], pool: &ConstantPool, descriptor: &str) -> Result<bool> {
    for attribute in attributes {
        if attribute.is_named(pool, RUNTIME_VISIBLE_ANNOTATIONS)
            || attribute.is_named(pool, RUNTIME_INVISIBLE_ANNOTATIONS)
        {
            for index in annotation_types(&attribute.info)? {
                if pool.utf8(index)? == descriptor {
                    return Ok(true);
                }
            }
        }
    }
    Ok(false)
}

/// Number of parameters described by a `Runtime*ParameterAnnotations` body
pub fn parameter_count(info: &[u8]) -> Result<u8> {
    let mut r = ByteReader::new(info);
    let count = r.u8()?;
    for _ in 0..count {
        let annotations = r.u16()?;
        for _ in 0..annotations {
            skip_annotation(&mut r)?;
        }
    }
    r.finish()?;
    Ok(count)
}

/// Append an unannotated trailing parameter to a `Runtime*ParameterAnnotations` body
pub fn append_empty_parameter(info: &[u8]) -> Result<Vec<u8>> {
    let count = parameter_count(info)?;
    let count = count
        .checked_add(1)
        .ok_or_else(|| ClassFileError::Malformed("more than 255 annotated parameters".into()))?;
    let mut w = ByteWriter::with_capacity(info.len() + 2);
    w.u8(count).bytes(&info[1..]).u16(0);
    Ok(w.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_annotation_types_skips_elements() {
        // one annotation, type #5, two pairs: int const and nested array of enums
        let info = [
            0, 1, // count
            0, 5, // type
            0, 2, // pairs
            0, 6, b'I', 0, 7, // name #6 = int #7
            0, 8, b'[', 0, 1, b'e', 0, 9, 0, 10, // name #8 = [enum]
        ];
        assert_eq!(annotation_types(&info).unwrap(), vec![5]);
    }

    #[test]
    fn test_append_empty_parameter() {
        // two parameters, first with one marker annotation, second bare
        let info = [2, 0, 1, 0, 5, 0, 0, 0, 0];
        let extended = append_empty_parameter(&info).unwrap();
        assert_eq!(extended, vec![3, 0, 1, 0, 5, 0, 0, 0, 0, 0, 0]);
        assert_eq!(parameter_count(&extended).unwrap(), 3);
    }

    #[test]
    fn test_has_annotation() {
        let mut pool = ConstantPool::new();
        let name = pool.utf8_index(RUNTIME_INVISIBLE_ANNOTATIONS).unwrap();
        let ty = pool.utf8_index("Lcom/lumos/runtime/LumosMaxima;").unwrap();
        let mut info = vec![0, 1];
        info.extend_from_slice(&ty.to_be_bytes());
        info.extend_from_slice(&[0, 0]);
        let attrs = vec![Attribute::new(name, info)];
        assert!(has_annotation(&attrs, &pool, "Lcom/lumos/runtime/LumosMaxima;").unwrap());
        assert!(!has_annotation(&attrs, &pool, "Lcom/example/Other;").unwrap());
    }
}
