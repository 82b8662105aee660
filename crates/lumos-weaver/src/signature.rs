//! Appending the metadata parameter to a method declaration

use lumos_classfile::annotation::append_empty_parameter;
use lumos_classfile::attribute::{
    self, index_attribute_bytes, method_parameters_bytes, parse_method_parameters, Attribute, MethodParameter,
};
use lumos_classfile::{ClassFileError, ConstantPool, FieldType, Member, Result};
use lumos_model::{SignatureEdit, METADATA_LOCAL_NAME, WOVEN_MARKER_ATTRIBUTE};

/// Insert `param` as the last parameter of a generic method signature
///
/// `<T:Ljava/lang/Object;>(TT;I)V` -> `<T:Ljava/lang/Object;>(TT;ILM;)V`
pub fn append_signature_parameter(signature: &str, param: &str) -> Option<String> {
    let close = signature.find(')')?;
    let mut out = String::with_capacity(signature.len() + param.len());
    out.push_str(&signature[..close]);
    out.push_str(param);
    out.push_str(&signature[close..]);
    Some(out)
}

/// Rewrite the declaration of `method` according to `edit`
///
/// Besides the descriptor this keeps every attribute that lists parameters in
/// step with it and records the original descriptor in the weave marker.
pub(crate) fn apply_signature_edit(
    pool: &mut ConstantPool,
    method: &mut Member,
    edit: &SignatureEdit,
    metadata_class: &str,
) -> Result<()> {
    let current = method.descriptor(pool)?;
    if current != edit.original_descriptor {
        return Err(ClassFileError::Malformed(format!(
            "method {} has descriptor {current}, expected {}",
            method.name(pool)?,
            edit.original_descriptor
        )));
    }
    method.descriptor_index = pool.utf8_index(&edit.woven_descriptor)?;
    let metadata_type = FieldType::object(metadata_class).to_string();

    for i in 0..method.attributes.len() {
        let name = method.attributes[i].name(pool)?.to_string();
        let info = &method.attributes[i].info;
        let replacement = match name.as_str() {
            attribute::SIGNATURE => {
                let index = attribute::parse_index_attribute(info)?;
                let signature = pool.utf8(index)?;
                let woven = append_signature_parameter(signature, &metadata_type)
                    .ok_or_else(|| ClassFileError::BadDescriptor(signature.to_string()))?;
                index_attribute_bytes(pool.utf8_index(&woven)?)
            }
            attribute::METHOD_PARAMETERS => {
                let mut params = parse_method_parameters(info)?;
                params.push(MethodParameter {
                    name_index: pool.utf8_index(METADATA_LOCAL_NAME)?,
                    access_flags: 0,
                });
                method_parameters_bytes(&params)?
            }
            attribute::RUNTIME_VISIBLE_PARAMETER_ANNOTATIONS
            | attribute::RUNTIME_INVISIBLE_PARAMETER_ANNOTATIONS => append_empty_parameter(info)?,
            _ => continue,
        };
        method.attributes[i].info = replacement;
    }

    let original = pool.utf8_index(&edit.original_descriptor)?;
    let marker = pool.utf8_index(WOVEN_MARKER_ATTRIBUTE)?;
    method
        .attributes
        .push(Attribute::new(marker, index_attribute_bytes(original)));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_signature_parameter() {
        assert_eq!(
            append_signature_parameter("<T:Ljava/lang/Object;>(TT;I)V", "Lcom/lumos/runtime/Lumen;").as_deref(),
            Some("<T:Ljava/lang/Object;>(TT;ILcom/lumos/runtime/Lumen;)V")
        );
        assert_eq!(
            append_signature_parameter("()Ljava/util/List<Ljava/lang/String;>;", "LM;").as_deref(),
            Some("(LM;)Ljava/util/List<Ljava/lang/String;>;")
        );
        assert_eq!(append_signature_parameter("Ljava/lang/Object;", "LM;"), None);
    }
}
