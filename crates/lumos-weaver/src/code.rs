//! Method body rewriting
//!
//! Calls get a metadata construction block in front of them, and when the
//! method itself gains the metadata parameter every local at or above the new
//! slot moves up by one. The body is then reassembled and every structure that
//! refers to code offsets or local slots follows: exception table, line and
//! local variable tables, stack map frames.

use std::collections::HashMap;

use lumos_classfile::attribute::{self, ExceptionEntry, LineNumberTable, LocalVariableEntry, LocalVariableTable};
use lumos_classfile::opcode::*;
use lumos_classfile::stackmap::initial_locals;
use lumos_classfile::{
    assemble, decode, Attribute, ClassFileError, CodeAttribute, ConstantPool, FieldType, Instruction,
    MemberRefKind, MethodDescriptor, Operand, Relocation, StackMapTable, VerificationType,
};
use lumos_model::{CallSiteMetadata, PlannedCall, SignatureEdit, METADATA_CONSTRUCTOR_DESCRIPTOR, METADATA_LOCAL_NAME};

use crate::WeaveOptions;

/// Values the construction block pushes on top of the call's arguments
pub const CONSTRUCTION_STACK: u16 = 6;

/// Failure inside one method body, before it is tied to a unit
#[derive(Debug)]
pub(crate) enum RewriteError {
    ClassFile(ClassFileError),
    Unsupported(String),
}

impl From<ClassFileError> for RewriteError {
    fn from(e: ClassFileError) -> Self {
        match e {
            ClassFileError::BranchOutOfRange { pc } => {
                RewriteError::Unsupported(format!("branch at offset {pc} no longer fits a 16-bit offset"))
            }
            ClassFileError::CodeTooLarge => RewriteError::Unsupported("woven code exceeds 65535 bytes".into()),
            ClassFileError::ConstantPoolOverflow => RewriteError::Unsupported("constant pool is full".into()),
            other => RewriteError::ClassFile(other),
        }
    }
}

type Result<T> = std::result::Result<T, RewriteError>;

/// Everything about the method being rewritten that does not change
pub(crate) struct MethodContext<'a> {
    pub this_class: u16,
    pub is_static: bool,
    pub is_constructor: bool,
    /// Descriptor before weaving
    pub descriptor: &'a str,
    pub edit: Option<&'a SignatureEdit>,
    pub calls: &'a [&'a PlannedCall],
    pub options: &'a WeaveOptions,
}

impl MethodContext<'_> {
    /// Slot of the appended metadata parameter
    fn metadata_slot(&self) -> Result<Option<u16>> {
        match self.edit {
            Some(edit) => {
                let parsed = MethodDescriptor::parse(&edit.original_descriptor)?;
                let receiver = if edit.is_static { 0 } else { 1 };
                Ok(Some(receiver + parsed.param_slots()))
            }
            None => Ok(None),
        }
    }
}

/// `new M; dup; ldc path; ldc name; <line>; ldc target; invokespecial M.<init>`
pub fn construction_block(
    pool: &mut ConstantPool,
    metadata_class: &str,
    metadata: &CallSiteMetadata,
) -> lumos_classfile::Result<Vec<Instruction>> {
    let line = i32::try_from(metadata.line_number())
        .map_err(|_| ClassFileError::Malformed(format!("line {} does not fit an int", metadata.line_number())))?;
    Ok(vec![
        Instruction::new(NEW, Operand::Constant(pool.class_index(metadata_class)?)),
        Instruction::simple(DUP),
        Instruction::new(LDC, Operand::Constant(pool.string_index(metadata.file_path())?)),
        Instruction::new(LDC, Operand::Constant(pool.string_index(metadata.file_name())?)),
        Instruction::push_int(pool, line)?,
        Instruction::new(LDC, Operand::Constant(pool.string_index(metadata.target_function_name())?)),
        Instruction::new(
            INVOKESPECIAL,
            Operand::Constant(pool.method_ref_index(
                metadata_class,
                "<init>",
                METADATA_CONSTRUCTOR_DESCRIPTOR,
                false,
            )?),
        ),
    ])
}

pub(crate) fn rewrite_code(pool: &mut ConstantPool, code: &CodeAttribute, ctx: &MethodContext<'_>) -> Result<CodeAttribute> {
    let old_len = code.code.len() as u32;
    let mut instructions = decode(&code.code)?;
    let slot = ctx.metadata_slot()?;

    if let Some(slot) = slot {
        shift_locals(&mut instructions, slot)?;
    }
    let instructions = insert_constructions(pool, instructions, ctx)?;
    let assembled = assemble(&instructions, old_len)?;
    let relocation = &assembled.relocation;

    let mut exception_table = Vec::with_capacity(code.exception_table.len());
    for e in &code.exception_table {
        exception_table.push(ExceptionEntry {
            start_pc: relocate_pc(relocation, e.start_pc)?,
            end_pc: relocate_pc(relocation, e.end_pc)?,
            handler_pc: relocate_pc(relocation, e.handler_pc)?,
            catch_type: e.catch_type,
        });
    }

    let new_len = assembled.code.len() as u32;
    let mut attributes = Vec::with_capacity(code.attributes.len());
    let mut added_local = false;
    for attr in &code.attributes {
        let name = attr.name(pool)?.to_string();
        let info = match name.as_str() {
            attribute::LINE_NUMBER_TABLE => {
                let mut table = LineNumberTable::parse(&attr.info)?;
                for e in &mut table.entries {
                    e.start_pc = relocate_pc(relocation, e.start_pc)?;
                }
                table.to_bytes()
            }
            attribute::LOCAL_VARIABLE_TABLE | attribute::LOCAL_VARIABLE_TYPE_TABLE => {
                let mut table = LocalVariableTable::parse(&attr.info)?;
                relocate_locals(&mut table, relocation, slot)?;
                if name == attribute::LOCAL_VARIABLE_TABLE && !added_local {
                    if let Some(slot) = slot {
                        let descriptor = FieldType::object(ctx.options.metadata_class.clone()).to_string();
                        table.entries.push(LocalVariableEntry {
                            start_pc: 0,
                            length: new_len as u16,
                            name_index: pool.utf8_index(METADATA_LOCAL_NAME)?,
                            descriptor_index: pool.utf8_index(&descriptor)?,
                            index: slot,
                        });
                        added_local = true;
                    }
                }
                table.to_bytes()
            }
            attribute::STACK_MAP_TABLE => rewrite_frames(pool, &attr.info, relocation, ctx, slot)?,
            _ => attr.info.clone(),
        };
        attributes.push(Attribute::new(attr.name_index, info));
    }

    let max_stack = if ctx.calls.is_empty() {
        code.max_stack
    } else {
        code.max_stack
            .checked_add(CONSTRUCTION_STACK)
            .ok_or_else(|| RewriteError::Unsupported("max_stack overflows".into()))?
    };
    let max_locals = match slot {
        Some(_) => code
            .max_locals
            .checked_add(1)
            .ok_or_else(|| RewriteError::Unsupported("max_locals overflows".into()))?,
        None => code.max_locals,
    };

    Ok(CodeAttribute {
        max_stack,
        max_locals,
        code: assembled.code,
        exception_table,
        attributes,
    })
}

fn relocate_pc(relocation: &Relocation, pc: u16) -> Result<u16> {
    Ok(relocation.resolve(pc as u32)? as u16)
}

/// Move every local at or above `slot` up by one
fn shift_locals(instructions: &mut [Instruction], slot: u16) -> Result<()> {
    for ins in instructions.iter_mut() {
        let Some(index) = ins.local_index() else {
            continue;
        };
        if slot > 0 && index == slot - 1 && matches!(ins.opcode, LLOAD | DLOAD | LSTORE | DSTORE) {
            return Err(RewriteError::Unsupported(format!(
                "two-slot local at {index} straddles the metadata parameter slot {slot}"
            )));
        }
        if index >= slot {
            let shifted = index
                .checked_add(1)
                .ok_or_else(|| RewriteError::Unsupported("local index overflows".into()))?;
            ins.set_local_index(shifted);
        }
    }
    Ok(())
}

fn insert_constructions(
    pool: &mut ConstantPool,
    instructions: Vec<Instruction>,
    ctx: &MethodContext<'_>,
) -> Result<Vec<Instruction>> {
    let mut pending: HashMap<u32, &PlannedCall> = ctx.calls.iter().map(|c| (c.site.pc, *c)).collect();
    if pending.is_empty() {
        return Ok(instructions);
    }

    let mut out = Vec::with_capacity(instructions.len() + pending.len() * 7);
    for mut ins in instructions {
        let Some(call) = ins.label.and_then(|pc| pending.remove(&pc)) else {
            out.push(ins);
            continue;
        };
        let pc = call.site.pc;
        let index = match (ins.opcode, &ins.operand) {
            (op, Operand::Constant(i)) if is_method_invoke(op) => *i,
            (INVOKEINTERFACE, Operand::InvokeInterface { index, .. }) => *index,
            _ => {
                return Err(RewriteError::ClassFile(ClassFileError::Malformed(format!(
                    "planned call at offset {pc} is not a method invocation"
                ))))
            }
        };

        let member = pool.member_ref(index)?;
        let expected = MethodDescriptor::parse(&call.woven_descriptor)?
            .without_last()
            .map(|d| d.to_string())
            .unwrap_or_default();
        if member.descriptor != expected {
            return Err(RewriteError::ClassFile(ClassFileError::Malformed(format!(
                "call at offset {pc} uses {} instead of {expected}",
                member.descriptor
            ))));
        }
        let interface = member.kind == MemberRefKind::InterfaceMethod;
        let (owner, name) = (member.owner.to_string(), member.name.to_string());
        let woven_index = pool.method_ref_index(&owner, &name, &call.woven_descriptor, interface)?;

        let mut block = construction_block(pool, &ctx.options.metadata_class, &call.metadata)?;
        if let Some(first) = block.first_mut() {
            first.label = ins.label.take();
        }
        out.extend(block);

        ins.operand = match ins.operand {
            Operand::InvokeInterface { count, .. } => Operand::InvokeInterface {
                index: woven_index,
                count: count
                    .checked_add(1)
                    .ok_or_else(|| RewriteError::Unsupported("interface call has too many arguments".into()))?,
            },
            _ => Operand::Constant(woven_index),
        };
        out.push(ins);
    }

    if let Some(pc) = pending.keys().min() {
        return Err(RewriteError::ClassFile(ClassFileError::Malformed(format!(
            "no instruction at planned call offset {pc}"
        ))));
    }
    Ok(out)
}

fn relocate_locals(table: &mut LocalVariableTable, relocation: &Relocation, slot: Option<u16>) -> Result<()> {
    for e in &mut table.entries {
        let end = e.start_pc as u32 + e.length as u32;
        let new_start = relocation.resolve(e.start_pc as u32)?;
        let new_end = relocation.resolve(end)?;
        e.start_pc = new_start as u16;
        e.length = (new_end - new_start) as u16;
        if let Some(slot) = slot {
            if e.index >= slot {
                e.index += 1;
            }
        }
    }
    Ok(())
}

fn rewrite_frames(
    pool: &mut ConstantPool,
    info: &[u8],
    relocation: &Relocation,
    ctx: &MethodContext<'_>,
    slot: Option<u16>,
) -> Result<Vec<u8>> {
    let table = StackMapTable::parse(info)?;
    let original = MethodDescriptor::parse(ctx.descriptor)?;
    let initial = initial_locals(pool, ctx.this_class, ctx.is_static, ctx.is_constructor, &original)?;

    let Some(slot) = slot else {
        let mut table = table;
        table.relocate(relocation)?;
        return Ok(table.to_bytes()?);
    };

    let metadata = VerificationType::Object(pool.class_index(&ctx.options.metadata_class)?);
    let woven = original.with_appended(FieldType::object(ctx.options.metadata_class.clone()));
    let woven_initial = initial_locals(pool, ctx.this_class, ctx.is_static, ctx.is_constructor, &woven)?;

    let mut frames = table.expand(&initial)?;
    for frame in &mut frames {
        insert_metadata_local(&mut frame.locals, slot, metadata).map_err(|reason| {
            RewriteError::Unsupported(format!("stack map frame at offset {}: {reason}", frame.offset))
        })?;
        frame.relocate(relocation)?;
    }
    Ok(StackMapTable::compress(&frames, &woven_initial).to_bytes()?)
}

/// Insert `metadata` at local slot `slot` of a frame's locals
///
/// Frames whose locals end below `slot` are left alone; the new parameter is
/// implicitly `top` there.
fn insert_metadata_local(
    locals: &mut Vec<VerificationType>,
    slot: u16,
    metadata: VerificationType,
) -> std::result::Result<(), String> {
    let mut covered: u16 = 0;
    for (position, vt) in locals.iter().enumerate() {
        if covered == slot {
            locals.insert(position, metadata);
            return Ok(());
        }
        if covered + vt.slots() > slot {
            return Err(format!("two-slot local straddles the metadata parameter slot {slot}"));
        }
        covered += vt.slots();
    }
    if covered == slot {
        locals.push(metadata);
    }
    Ok(())
}
