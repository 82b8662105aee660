//! Bytecode decoding and label-based reassembly
//!
//! Decoded instructions carry their original offset as a label, and branch
//! operands hold absolute original offsets. After instructions are inserted
//! or edited, [`assemble`] lays the stream out again and produces a
//! [`Relocation`] mapping every original offset to its new position.

use std::collections::BTreeMap;

use crate::bytes::{ByteReader, ByteWriter};
use crate::opcode::*;
use crate::{ClassFileError, ConstantPool, Result};

/// Largest legal `code_length`
pub const MAX_CODE_LEN: u32 = 65535;

/// How a local variable operand was (or should be) encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalForm {
    /// `iload_0` .. `astore_3`
    Implicit,
    /// One-byte index
    Byte,
    /// `wide` prefix with a two-byte index
    Wide,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    None,
    /// `bipush`
    Byte(i8),
    /// `sipush`
    Short(i16),
    /// `newarray` element type
    ArrayType(u8),
    /// Constant pool index (`ldc`, field/method access, `new`, ...)
    Constant(u16),
    /// Load, store or `ret`; the opcode is always the explicit-index form
    Local { index: u16, form: LocalForm },
    Iinc { index: u16, delta: i16, wide: bool },
    /// Absolute original offset of the branch target
    Branch { target: u32 },
    TableSwitch { default: u32, low: i32, high: i32, targets: Vec<u32> },
    LookupSwitch { default: u32, pairs: Vec<(i32, u32)> },
    InvokeInterface { index: u16, count: u8 },
    InvokeDynamic { index: u16 },
    MultiANewArray { index: u16, dimensions: u8 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    /// Original offset; `None` for inserted instructions
    pub label: Option<u32>,
    pub opcode: u8,
    pub operand: Operand,
}

impl Instruction {
    pub fn new(opcode: u8, operand: Operand) -> Self {
        Self {
            label: None,
            opcode,
            operand,
        }
    }

    pub fn simple(opcode: u8) -> Self {
        Self::new(opcode, Operand::None)
    }

    /// Shortest instruction pushing the int `value`
    pub fn push_int(pool: &mut ConstantPool, value: i32) -> Result<Self> {
        Ok(match value {
            -1..=5 => Self::simple((ICONST_0 as i32 + value) as u8),
            v if i8::try_from(v).is_ok() => Self::new(BIPUSH, Operand::Byte(v as i8)),
            v if i16::try_from(v).is_ok() => Self::new(SIPUSH, Operand::Short(v as i16)),
            v => Self::new(LDC, Operand::Constant(pool.integer_index(v)?)),
        })
    }

    /// Value pushed by an int constant instruction built by [`Instruction::push_int`]
    pub fn int_value(&self, pool: &ConstantPool) -> Option<i32> {
        match (&self.operand, self.opcode) {
            (Operand::None, ICONST_M1..=ICONST_5) => Some(self.opcode as i32 - ICONST_0 as i32),
            (Operand::Byte(v), BIPUSH) => Some(*v as i32),
            (Operand::Short(v), SIPUSH) => Some(*v as i32),
            (Operand::Constant(i), LDC | LDC_W) => pool.integer(*i).ok(),
            _ => None,
        }
    }

    /// Constant pool index referenced by this instruction
    pub fn constant_index(&self) -> Option<u16> {
        match self.operand {
            Operand::Constant(i)
            | Operand::InvokeInterface { index: i, .. }
            | Operand::InvokeDynamic { index: i }
            | Operand::MultiANewArray { index: i, .. } => Some(i),
            _ => None,
        }
    }

    pub fn local_index(&self) -> Option<u16> {
        match self.operand {
            Operand::Local { index, .. } | Operand::Iinc { index, .. } => Some(index),
            _ => None,
        }
    }

    /// Point a load, store, `ret` or `iinc` at another slot
    pub fn set_local_index(&mut self, new_index: u16) {
        match &mut self.operand {
            Operand::Local { index, .. } | Operand::Iinc { index, .. } => *index = new_index,
            _ => {}
        }
    }

    pub fn branch_targets(&self) -> Vec<u32> {
        match &self.operand {
            Operand::Branch { target } => vec![*target],
            Operand::TableSwitch { default, targets, .. } => {
                std::iter::once(*default).chain(targets.iter().copied()).collect()
            }
            Operand::LookupSwitch { default, pairs } => std::iter::once(*default)
                .chain(pairs.iter().map(|(_, t)| *t))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Encoded size when placed at `pc`
    pub fn size_at(&self, pc: u32) -> u32 {
        match &self.operand {
            Operand::None => 1,
            Operand::Byte(_) | Operand::ArrayType(_) => 2,
            Operand::Short(_) => 3,
            Operand::Constant(index) => {
                if self.opcode == LDC && *index <= 0xFF {
                    2
                } else {
                    3
                }
            }
            Operand::Local { index, form } => match local_form(self.opcode, *index, *form) {
                LocalForm::Implicit => 1,
                LocalForm::Byte => 2,
                LocalForm::Wide => 4,
            },
            Operand::Iinc { index, delta, wide } => {
                if iinc_is_narrow(*index, *delta, *wide) {
                    3
                } else {
                    6
                }
            }
            Operand::Branch { .. } => {
                if matches!(self.opcode, GOTO_W | JSR_W) {
                    5
                } else {
                    3
                }
            }
            Operand::TableSwitch { targets, .. } => {
                1 + switch_padding(pc) + 12 + 4 * targets.len() as u32
            }
            Operand::LookupSwitch { pairs, .. } => {
                1 + switch_padding(pc) + 8 + 8 * pairs.len() as u32
            }
            Operand::InvokeInterface { .. } | Operand::InvokeDynamic { .. } => 5,
            Operand::MultiANewArray { .. } => 4,
        }
    }

    fn encode(&self, pc: u32, relocation: &Relocation, w: &mut ByteWriter) -> Result<()> {
        let origin = self.label.unwrap_or(pc);
        let target_of = |old: u32| {
            relocation
                .get(old)
                .ok_or(ClassFileError::BadBranchTarget { pc: origin, target: old })
        };
        let wide_offset = |old: u32| -> Result<i32> {
            let new = target_of(old)?;
            Ok((new as i64 - pc as i64) as i32)
        };

        match &self.operand {
            Operand::None => {
                w.u8(self.opcode);
            }
            Operand::Byte(v) => {
                w.u8(self.opcode).u8(*v as u8);
            }
            Operand::Short(v) => {
                w.u8(self.opcode).u16(*v as u16);
            }
            Operand::ArrayType(t) => {
                w.u8(self.opcode).u8(*t);
            }
            Operand::Constant(index) => {
                if self.opcode == LDC {
                    if *index <= 0xFF {
                        w.u8(LDC).u8(*index as u8);
                    } else {
                        w.u8(LDC_W).u16(*index);
                    }
                } else {
                    w.u8(self.opcode).u16(*index);
                }
            }
            Operand::Local { index, form } => match local_form(self.opcode, *index, *form) {
                LocalForm::Implicit => {
                    // local_form only picks Implicit when a short form exists
                    let base = implicit_base(self.opcode).unwrap_or(self.opcode);
                    w.u8(base + *index as u8);
                }
                LocalForm::Byte => {
                    w.u8(self.opcode).u8(*index as u8);
                }
                LocalForm::Wide => {
                    w.u8(WIDE).u8(self.opcode).u16(*index);
                }
            },
            Operand::Iinc { index, delta, wide } => {
                if iinc_is_narrow(*index, *delta, *wide) {
                    w.u8(IINC).u8(*index as u8).u8(*delta as i8 as u8);
                } else {
                    w.u8(WIDE).u8(IINC).u16(*index).u16(*delta as u16);
                }
            }
            Operand::Branch { target } => {
                let offset = wide_offset(*target)?;
                if matches!(self.opcode, GOTO_W | JSR_W) {
                    w.u8(self.opcode).i32(offset);
                } else {
                    let narrow = i16::try_from(offset)
                        .map_err(|_| ClassFileError::BranchOutOfRange { pc: origin })?;
                    w.u8(self.opcode).u16(narrow as u16);
                }
            }
            Operand::TableSwitch { default, low, high, targets } => {
                w.u8(self.opcode);
                for _ in 0..switch_padding(pc) {
                    w.u8(0);
                }
                w.i32(wide_offset(*default)?).i32(*low).i32(*high);
                for t in targets {
                    w.i32(wide_offset(*t)?);
                }
            }
            Operand::LookupSwitch { default, pairs } => {
                w.u8(self.opcode);
                for _ in 0..switch_padding(pc) {
                    w.u8(0);
                }
                w.i32(wide_offset(*default)?).i32(pairs.len() as i32);
                for (key, t) in pairs {
                    w.i32(*key).i32(wide_offset(*t)?);
                }
            }
            Operand::InvokeInterface { index, count } => {
                w.u8(self.opcode).u16(*index).u8(*count).u8(0);
            }
            Operand::InvokeDynamic { index } => {
                w.u8(self.opcode).u16(*index).u16(0);
            }
            Operand::MultiANewArray { index, dimensions } => {
                w.u8(self.opcode).u16(*index).u8(*dimensions);
            }
        }
        Ok(())
    }
}

fn switch_padding(pc: u32) -> u32 {
    3 - (pc % 4)
}

fn iinc_is_narrow(index: u16, delta: i16, wide: bool) -> bool {
    !wide && index <= 0xFF && i8::try_from(delta).is_ok()
}

/// First short-form opcode (`xload_0` / `xstore_0`) of an explicit load/store
fn implicit_base(opcode: u8) -> Option<u8> {
    match opcode {
        ILOAD..=ALOAD => Some(ILOAD_0 + (opcode - ILOAD) * 4),
        ISTORE..=ASTORE => Some(ISTORE_0 + (opcode - ISTORE) * 4),
        _ => None,
    }
}

/// Keep the original form when it can still hold `index`, else widen
fn local_form(opcode: u8, index: u16, form: LocalForm) -> LocalForm {
    match form {
        LocalForm::Implicit if index <= 3 && implicit_base(opcode).is_some() => LocalForm::Implicit,
        LocalForm::Implicit | LocalForm::Byte if index <= 0xFF => LocalForm::Byte,
        _ => LocalForm::Wide,
    }
}

fn branch_target(pc: u32, offset: i64) -> Result<u32> {
    let target = pc as i64 + offset;
    u32::try_from(target).map_err(|_| {
        ClassFileError::Malformed(format!("branch at pc {pc} jumps before the start of code"))
    })
}

/// Decode a method body into instructions labelled with their offsets
pub fn decode(code: &[u8]) -> Result<Vec<Instruction>> {
    let mut r = ByteReader::new(code);
    let mut out = Vec::new();

    while !r.is_empty() {
        let pc = r.position() as u32;
        let op = r.u8()?;
        let (opcode, operand) = match op {
            0x00..=0x0f | 0x2e..=0x35 | 0x4f..=0x83 | 0x85..=0x98 | 0xac..=0xb1 | 0xbe | 0xbf
            | 0xc2 | 0xc3 => (op, Operand::None),
            BIPUSH => (op, Operand::Byte(r.i8()?)),
            SIPUSH => (op, Operand::Short(r.i16()?)),
            LDC => (op, Operand::Constant(r.u8()? as u16)),
            LDC_W | LDC2_W | GETSTATIC..=INVOKESTATIC | NEW | ANEWARRAY | CHECKCAST
            | INSTANCEOF => (op, Operand::Constant(r.u16()?)),
            ILOAD..=ALOAD | ISTORE..=ASTORE | RET => (
                op,
                Operand::Local {
                    index: r.u8()? as u16,
                    form: LocalForm::Byte,
                },
            ),
            ILOAD_0..=ALOAD_3 => {
                let k = op - ILOAD_0;
                (
                    ILOAD + k / 4,
                    Operand::Local {
                        index: (k % 4) as u16,
                        form: LocalForm::Implicit,
                    },
                )
            }
            ISTORE_0..=ASTORE_3 => {
                let k = op - ISTORE_0;
                (
                    ISTORE + k / 4,
                    Operand::Local {
                        index: (k % 4) as u16,
                        form: LocalForm::Implicit,
                    },
                )
            }
            IINC => (
                op,
                Operand::Iinc {
                    index: r.u8()? as u16,
                    delta: r.i8()? as i16,
                    wide: false,
                },
            ),
            IFEQ..=JSR | IFNULL | IFNONNULL => {
                let offset = r.i16()? as i64;
                (op, Operand::Branch { target: branch_target(pc, offset)? })
            }
            GOTO_W | JSR_W => {
                let offset = r.i32()? as i64;
                (op, Operand::Branch { target: branch_target(pc, offset)? })
            }
            TABLESWITCH => {
                r.skip(switch_padding(pc) as usize)?;
                let default = branch_target(pc, r.i32()? as i64)?;
                let low = r.i32()?;
                let high = r.i32()?;
                if high < low {
                    return Err(ClassFileError::Malformed(format!(
                        "tableswitch at pc {pc} has high < low"
                    )));
                }
                let count = (high as i64 - low as i64 + 1) as usize;
                let mut targets = Vec::with_capacity(count.min(code.len()));
                for _ in 0..count {
                    targets.push(branch_target(pc, r.i32()? as i64)?);
                }
                (op, Operand::TableSwitch { default, low, high, targets })
            }
            LOOKUPSWITCH => {
                r.skip(switch_padding(pc) as usize)?;
                let default = branch_target(pc, r.i32()? as i64)?;
                let count = r.i32()?;
                if count < 0 {
                    return Err(ClassFileError::Malformed(format!(
                        "lookupswitch at pc {pc} has a negative pair count"
                    )));
                }
                let mut pairs = Vec::with_capacity((count as usize).min(code.len()));
                for _ in 0..count {
                    let key = r.i32()?;
                    pairs.push((key, branch_target(pc, r.i32()? as i64)?));
                }
                (op, Operand::LookupSwitch { default, pairs })
            }
            INVOKEINTERFACE => {
                let index = r.u16()?;
                let count = r.u8()?;
                r.u8()?;
                (op, Operand::InvokeInterface { index, count })
            }
            INVOKEDYNAMIC => {
                let index = r.u16()?;
                r.u16()?;
                (op, Operand::InvokeDynamic { index })
            }
            NEWARRAY => (op, Operand::ArrayType(r.u8()?)),
            MULTIANEWARRAY => (
                op,
                Operand::MultiANewArray {
                    index: r.u16()?,
                    dimensions: r.u8()?,
                },
            ),
            WIDE => {
                let inner = r.u8()?;
                match inner {
                    ILOAD..=ALOAD | ISTORE..=ASTORE | RET => (
                        inner,
                        Operand::Local {
                            index: r.u16()?,
                            form: LocalForm::Wide,
                        },
                    ),
                    IINC => (
                        IINC,
                        Operand::Iinc {
                            index: r.u16()?,
                            delta: r.i16()?,
                            wide: true,
                        },
                    ),
                    _ => return Err(ClassFileError::UnknownOpcode { opcode: inner, pc }),
                }
            }
            _ => return Err(ClassFileError::UnknownOpcode { opcode: op, pc }),
        };
        out.push(Instruction {
            label: Some(pc),
            opcode,
            operand,
        });
    }

    Ok(out)
}

/// Mapping from original offsets to offsets in reassembled code
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Relocation {
    map: BTreeMap<u32, u32>,
}

impl Relocation {
    pub fn get(&self, old: u32) -> Option<u32> {
        self.map.get(&old).copied()
    }

    /// New offset for `old`, failing when it was not an instruction boundary
    pub fn resolve(&self, old: u32) -> Result<u32> {
        self.get(old).ok_or_else(|| {
            ClassFileError::Malformed(format!("offset {old} is not an instruction boundary"))
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.map.iter().map(|(k, v)| (*k, *v))
    }
}

/// Output of [`assemble`]
#[derive(Debug, Clone)]
pub struct Assembled {
    pub code: Vec<u8>,
    /// New offset of each input instruction, by position
    pub offsets: Vec<u32>,
    pub relocation: Relocation,
}

/// Lay out and encode an instruction stream
///
/// `old_len` is the length of the original code; it maps to the new length so
/// that ranges ending at the end of the method stay anchored there.
pub fn assemble(instructions: &[Instruction], old_len: u32) -> Result<Assembled> {
    let mut offsets = Vec::with_capacity(instructions.len());
    let mut pc: u32 = 0;
    for ins in instructions {
        offsets.push(pc);
        pc = pc
            .checked_add(ins.size_at(pc))
            .ok_or(ClassFileError::CodeTooLarge)?;
    }
    if pc > MAX_CODE_LEN {
        return Err(ClassFileError::CodeTooLarge);
    }

    let mut relocation = Relocation::default();
    for (ins, offset) in instructions.iter().zip(&offsets) {
        if let Some(label) = ins.label {
            relocation.map.insert(label, *offset);
        }
    }
    relocation.map.insert(old_len, pc);

    let mut w = ByteWriter::with_capacity(pc as usize);
    for (ins, offset) in instructions.iter().zip(&offsets) {
        ins.encode(*offset, &relocation, &mut w)?;
    }

    Ok(Assembled {
        code: w.into_bytes(),
        offsets,
        relocation,
    })
}
