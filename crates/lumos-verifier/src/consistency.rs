//! Structural comparison of a unit before and after weaving
//!
//! The woven class is walked against the original in lockstep. Every planned
//! call must show up as a construction block followed by the redirected
//! invoke; everything else must be the original modulo relocation and the
//! local slot shift of an edited signature.

use std::collections::{HashMap, HashSet};

use lumos_classfile::attribute::{self, parse_index_attribute};
use lumos_classfile::opcode::*;
use lumos_classfile::{decode, Attribute, ClassFile, CodeAttribute, ConstantPool, Instruction, Member, Operand};
use lumos_model::{
    CallSiteMetadata, CompilationUnit, PlannedCall, RewritePlan, METADATA_CONSTRUCTOR_DESCRIPTOR,
    WOVEN_MARKER_ATTRIBUTE,
};

/// Length of the inserted construction block
const BLOCK_LEN: usize = 7;

type Check<T = ()> = std::result::Result<T, String>;

fn pc(ins: &Instruction) -> u32 {
    ins.label.unwrap_or_default()
}

fn string_operand<'a>(pool: &'a ConstantPool, ins: &Instruction) -> Option<&'a str> {
    match ins.opcode {
        LDC | LDC_W => pool.string(ins.constant_index()?).ok(),
        _ => None,
    }
}

pub(crate) struct Consistency<'a> {
    pub metadata_class: &'a str,
    pub original: &'a CompilationUnit,
    pub plan: &'a RewritePlan,
}

impl Consistency<'_> {
    pub fn check(&self, bytes: &[u8]) -> Check {
        if self.plan.is_empty() {
            return if bytes == self.original.bytes.as_slice() {
                Ok(())
            } else {
                Err("unit changed although nothing was planned".into())
            };
        }

        let woven = ClassFile::parse(bytes).map_err(|e| format!("woven class does not parse: {e}"))?;
        let before = &self.original.class;
        if (before.minor_version, before.major_version, before.access_flags, before.this_class, before.super_class)
            != (woven.minor_version, woven.major_version, woven.access_flags, woven.this_class, woven.super_class)
            || before.interfaces != woven.interfaces
        {
            return Err("class header changed".into());
        }
        if before.fields != woven.fields {
            return Err("fields changed".into());
        }
        if before.attributes != woven.attributes {
            return Err("class attributes changed".into());
        }
        check_pool_prefix(&before.constant_pool, &woven.constant_pool)?;
        if before.methods.len() != woven.methods.len() {
            return Err(format!(
                "method count changed from {} to {}",
                before.methods.len(),
                woven.methods.len()
            ));
        }

        let touched: HashSet<usize> = self.plan.touched_methods().into_iter().collect();
        for (index, (old, new)) in before.methods.iter().zip(&woven.methods).enumerate() {
            let name = self
                .original
                .methods
                .get(index)
                .map(|m| m.display_name())
                .unwrap_or_else(|| format!("#{index}"));
            if !touched.contains(&index) {
                if old != new {
                    return Err(format!("untouched method {name} changed"));
                }
                continue;
            }
            self.check_method(index, old, new, &before.constant_pool, &woven.constant_pool)
                .map_err(|reason| format!("{name}: {reason}"))?;
        }
        Ok(())
    }

    fn check_method(
        &self,
        index: usize,
        old: &Member,
        new: &Member,
        old_pool: &ConstantPool,
        new_pool: &ConstantPool,
    ) -> Check {
        if old.access_flags != new.access_flags || old.name_index != new.name_index {
            return Err("access flags or name changed".into());
        }
        let edit = self.plan.edit_for(index);
        let original = old.descriptor(old_pool).map_err(|e| e.to_string())?;
        let expected = edit.map(|e| e.woven_descriptor.as_str()).unwrap_or(original);
        let actual = new.descriptor(new_pool).map_err(|e| e.to_string())?;
        if actual != expected {
            return Err(format!("descriptor is {actual}, expected {expected}"));
        }

        match edit {
            Some(edit) => {
                let marker = new
                    .find_attribute(new_pool, WOVEN_MARKER_ATTRIBUTE)
                    .ok_or("woven signature has no marker attribute")?;
                let recorded = parse_index_attribute(&marker.info)
                    .and_then(|i| new_pool.utf8(i))
                    .map_err(|e| e.to_string())?;
                if recorded != edit.original_descriptor {
                    return Err(format!("marker records {recorded}, expected {}", edit.original_descriptor));
                }
                if new.attributes.len() != old.attributes.len() + 1 {
                    return Err("method attributes added or dropped".into());
                }
            }
            None => {
                if non_code(old, old_pool) != non_code(new, new_pool) {
                    return Err("method attributes changed".into());
                }
            }
        }

        let old_code = old.code(old_pool).map_err(|e| e.to_string())?;
        let new_code = new.code(new_pool).map_err(|e| e.to_string())?;
        match (old_code, new_code) {
            (None, None) => Ok(()),
            (Some(old_code), Some(new_code)) => {
                let slot = match edit {
                    Some(edit) => {
                        let receiver = if edit.is_static { 0 } else { 1 };
                        let params = lumos_classfile::MethodDescriptor::parse(&edit.original_descriptor)
                            .map_err(|e| e.to_string())?
                            .param_slots();
                        Some(receiver + params)
                    }
                    None => None,
                };
                let calls: Vec<&PlannedCall> = self.plan.calls_in(index).collect();
                CodeCheck {
                    metadata_class: self.metadata_class,
                    old_pool,
                    new_pool,
                    slot,
                }
                .check(&old_code, &new_code, &calls)
            }
            _ => Err("code attribute added or removed".into()),
        }
    }
}

fn non_code<'a>(member: &'a Member, pool: &ConstantPool) -> Vec<&'a Attribute> {
    member
        .attributes
        .iter()
        .filter(|a| !a.is_named(pool, attribute::CODE))
        .collect()
}

fn check_pool_prefix(old: &ConstantPool, new: &ConstantPool) -> Check {
    if new.count() < old.count() {
        return Err("constant pool shrank".into());
    }
    for (index, constant) in old.iter() {
        if new.get(index) != Some(constant) {
            return Err(format!("constant pool entry #{index} changed"));
        }
    }
    Ok(())
}

struct CodeCheck<'a> {
    metadata_class: &'a str,
    old_pool: &'a ConstantPool,
    new_pool: &'a ConstantPool,
    slot: Option<u16>,
}

impl CodeCheck<'_> {
    fn shift(&self, index: u16) -> u16 {
        match self.slot {
            Some(slot) if index >= slot => index + 1,
            _ => index,
        }
    }

    fn check(&self, old: &CodeAttribute, new: &CodeAttribute, calls: &[&PlannedCall]) -> Check {
        let expected_locals = old.max_locals + u16::from(self.slot.is_some());
        if new.max_locals != expected_locals {
            return Err(format!("max_locals is {}, expected {expected_locals}", new.max_locals));
        }
        if new.max_stack < old.max_stack {
            return Err("max_stack shrank".into());
        }

        let old_ins = decode(&old.code).map_err(|e| e.to_string())?;
        let new_ins = decode(&new.code).map_err(|e| e.to_string())?;
        let lines = new.line_numbers(self.new_pool).map_err(|e| e.to_string())?;
        let mut planned: HashMap<u32, &PlannedCall> = calls.iter().map(|c| (c.site.pc, *c)).collect();
        let mut mapping: HashMap<u32, u32> = HashMap::new();
        mapping.insert(old.code.len() as u32, new.code.len() as u32);
        let mut branches: Vec<(u32, u32)> = Vec::new();

        let mut j = 0;
        for o in &old_ins {
            let old_pc = pc(o);
            if let Some(call) = planned.remove(&old_pc) {
                let block = new_ins
                    .get(j..j + BLOCK_LEN)
                    .ok_or_else(|| format!("no metadata construction before call at {old_pc}"))?;
                self.check_block(block, &call.metadata)
                    .map_err(|reason| format!("call at {old_pc}: {reason}"))?;
                let start = pc(&block[0]);
                let line = lines.as_ref().and_then(|l| l.line_for_pc(start)).map(u32::from);
                if line != Some(call.metadata.line_number()) {
                    return Err(format!(
                        "call at {old_pc} is on line {line:?}, metadata says {}",
                        call.metadata.line_number()
                    ));
                }
                mapping.insert(old_pc, start);
                j += BLOCK_LEN;

                let n = new_ins.get(j).ok_or_else(|| format!("call at {old_pc} is missing"))?;
                self.check_invoke(o, n, &call.woven_descriptor)
                    .map_err(|reason| format!("call at {old_pc}: {reason}"))?;
                j += 1;
                continue;
            }

            let n = new_ins.get(j).ok_or("woven code ends early")?;
            mapping.insert(old_pc, pc(n));
            self.compare(o, n, &mut branches)
                .map_err(|reason| format!("instruction at {old_pc}: {reason}"))?;
            j += 1;
        }
        if j != new_ins.len() {
            return Err(format!("{} unexpected trailing instructions", new_ins.len() - j));
        }
        if let Some(pc) = planned.keys().min() {
            return Err(format!("planned call at {pc} was not woven"));
        }

        for (old_target, new_target) in branches {
            if mapping.get(&old_target) != Some(&new_target) {
                return Err(format!("branch to {old_target} now lands on {new_target}"));
            }
        }

        if old.exception_table.len() != new.exception_table.len() {
            return Err("exception table size changed".into());
        }
        let mapped = |old: u16| mapping.get(&u32::from(old)).copied();
        for (a, b) in old.exception_table.iter().zip(&new.exception_table) {
            let consistent = mapped(a.start_pc) == Some(u32::from(b.start_pc))
                && mapped(a.end_pc) == Some(u32::from(b.end_pc))
                && mapped(a.handler_pc) == Some(u32::from(b.handler_pc))
                && a.catch_type == b.catch_type;
            if !consistent {
                return Err(format!(
                    "exception range {}..{} -> {} is not relocated consistently",
                    a.start_pc, a.end_pc, a.handler_pc
                ));
            }
        }
        Ok(())
    }

    fn check_block(&self, block: &[Instruction], metadata: &CallSiteMetadata) -> Check {
        let pool = self.new_pool;
        let class = block[0]
            .constant_index()
            .filter(|_| block[0].opcode == NEW)
            .and_then(|i| pool.class_name(i).ok());
        if class != Some(self.metadata_class) {
            return Err(format!("expected `new {}`", self.metadata_class));
        }
        if block[1].opcode != DUP {
            return Err("expected `dup`".into());
        }
        let literals = [
            (&block[2], metadata.file_path(), "file path"),
            (&block[3], metadata.file_name(), "file name"),
            (&block[5], metadata.target_function_name(), "target name"),
        ];
        for (ins, expected, what) in literals {
            if string_operand(pool, ins) != Some(expected) {
                return Err(format!("{what} literal does not match `{expected}`"));
            }
        }
        if block[4].int_value(pool).map(|v| v as i64) != Some(i64::from(metadata.line_number())) {
            return Err(format!("line literal does not match {}", metadata.line_number()));
        }

        let ctor = block[6]
            .constant_index()
            .filter(|_| block[6].opcode == INVOKESPECIAL)
            .and_then(|i| pool.member_ref(i).ok());
        match ctor {
            Some(m)
                if m.owner == self.metadata_class
                    && m.name == "<init>"
                    && m.descriptor == METADATA_CONSTRUCTOR_DESCRIPTOR => Ok(()),
            _ => Err("expected metadata constructor call".into()),
        }
    }

    fn check_invoke(&self, old: &Instruction, new: &Instruction, woven_descriptor: &str) -> Check {
        if old.opcode != new.opcode {
            return Err("invoke opcode changed".into());
        }
        let (Some(a), Some(b)) = (old.constant_index(), new.constant_index()) else {
            return Err("not an invoke".into());
        };
        let before = self.old_pool.member_ref(a).map_err(|e| e.to_string())?;
        let after = self.new_pool.member_ref(b).map_err(|e| e.to_string())?;
        if before.kind != after.kind || before.owner != after.owner || before.name != after.name {
            return Err(format!("invoke now targets {}.{}", after.owner, after.name));
        }
        if after.descriptor != woven_descriptor {
            return Err(format!("invoke uses {}, expected {woven_descriptor}", after.descriptor));
        }
        if let (Operand::InvokeInterface { count: c0, .. }, Operand::InvokeInterface { count: c1, .. }) =
            (&old.operand, &new.operand)
        {
            if u16::from(*c1) != u16::from(*c0) + 1 {
                return Err("interface argument count not extended".into());
            }
        }
        Ok(())
    }

    fn compare(&self, old: &Instruction, new: &Instruction, branches: &mut Vec<(u32, u32)>) -> Check {
        let same_opcode = old.opcode == new.opcode || (matches!(old.opcode, LDC | LDC_W) && matches!(new.opcode, LDC | LDC_W));
        if !same_opcode {
            return Err(format!("opcode {:#04x} became {:#04x}", old.opcode, new.opcode));
        }

        let consistent = match (&old.operand, &new.operand) {
            (Operand::Local { index: a, .. }, Operand::Local { index: b, .. }) => *b == self.shift(*a),
            (Operand::Iinc { index: a, delta: da, .. }, Operand::Iinc { index: b, delta: db, .. }) => {
                da == db && *b == self.shift(*a)
            }
            (Operand::Branch { target: a }, Operand::Branch { target: b }) => {
                branches.push((*a, *b));
                true
            }
            (
                Operand::TableSwitch { default: da, low: la, high: ha, targets: ta },
                Operand::TableSwitch { default: db, low: lb, high: hb, targets: tb },
            ) => {
                branches.push((*da, *db));
                branches.extend(ta.iter().copied().zip(tb.iter().copied()));
                la == lb && ha == hb && ta.len() == tb.len()
            }
            (
                Operand::LookupSwitch { default: da, pairs: pa },
                Operand::LookupSwitch { default: db, pairs: pb },
            ) => {
                branches.push((*da, *db));
                branches.extend(pa.iter().zip(pb).map(|(a, b)| (a.1, b.1)));
                pa.len() == pb.len() && pa.iter().zip(pb).all(|(a, b)| a.0 == b.0)
            }
            (a, b) => a == b,
        };
        if consistent {
            Ok(())
        } else {
            Err("operand changed".into())
        }
    }
}
