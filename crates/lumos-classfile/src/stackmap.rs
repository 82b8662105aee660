//! `StackMapTable` frames with absolute offsets
//!
//! Frames are decoded into [`Frame`]s carrying absolute code offsets instead of
//! deltas; encoding picks the compact or extended form from the new delta.
//! [`StackMapTable::expand`] turns the table into explicit local/stack lists so
//! callers can edit locals and [`StackMapTable::compress`] back.

use crate::bytes::{ByteReader, ByteWriter};
use crate::descriptor::{BaseType, FieldType, MethodDescriptor};
use crate::instruction::Relocation;
use crate::{ClassFileError, ConstantPool, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationType {
    Top,
    Integer,
    Float,
    Double,
    Long,
    Null,
    UninitializedThis,
    /// Constant pool index of a `Class` entry
    Object(u16),
    /// Offset of the `new` instruction that created the value
    Uninitialized(u32),
}

impl VerificationType {
    fn parse(r: &mut ByteReader<'_>) -> Result<Self> {
        let tag = r.u8()?;
        Ok(match tag {
            0 => VerificationType::Top,
            1 => VerificationType::Integer,
            2 => VerificationType::Float,
            3 => VerificationType::Double,
            4 => VerificationType::Long,
            5 => VerificationType::Null,
            6 => VerificationType::UninitializedThis,
            7 => VerificationType::Object(r.u16()?),
            8 => VerificationType::Uninitialized(r.u16()? as u32),
            _ => {
                return Err(ClassFileError::Malformed(format!(
                    "unknown verification type tag {tag}"
                )))
            }
        })
    }

    fn write(&self, w: &mut ByteWriter) {
        match self {
            VerificationType::Top => {
                w.u8(0);
            }
            VerificationType::Integer => {
                w.u8(1);
            }
            VerificationType::Float => {
                w.u8(2);
            }
            VerificationType::Double => {
                w.u8(3);
            }
            VerificationType::Long => {
                w.u8(4);
            }
            VerificationType::Null => {
                w.u8(5);
            }
            VerificationType::UninitializedThis => {
                w.u8(6);
            }
            VerificationType::Object(index) => {
                w.u8(7).u16(*index);
            }
            VerificationType::Uninitialized(offset) => {
                w.u8(8).u16(*offset as u16);
            }
        }
    }

    /// Local variable slots covered by one entry
    pub fn slots(&self) -> u16 {
        match self {
            VerificationType::Long | VerificationType::Double => 2,
            _ => 1,
        }
    }

    fn relocate(&mut self, relocation: &Relocation) -> Result<()> {
        if let VerificationType::Uninitialized(offset) = self {
            *offset = relocation.resolve(*offset)?;
        }
        Ok(())
    }

    /// Verification type of a value declared with `ty`
    pub fn for_field_type(pool: &mut ConstantPool, ty: &FieldType) -> Result<Self> {
        Ok(match ty {
            FieldType::Base(BaseType::Long) => VerificationType::Long,
            FieldType::Base(BaseType::Double) => VerificationType::Double,
            FieldType::Base(BaseType::Float) => VerificationType::Float,
            FieldType::Base(_) => VerificationType::Integer,
            FieldType::Object(name) => VerificationType::Object(pool.class_index(name)?),
            FieldType::Array(_) => VerificationType::Object(pool.class_index(&ty.to_string())?),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameKind {
    Same,
    SameLocals1StackItem(VerificationType),
    Chop(u8),
    Append(Vec<VerificationType>),
    Full {
        locals: Vec<VerificationType>,
        stack: Vec<VerificationType>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub offset: u32,
    pub kind: FrameKind,
}

/// A frame with its complete locals and stack spelled out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullFrame {
    pub offset: u32,
    pub locals: Vec<VerificationType>,
    pub stack: Vec<VerificationType>,
}

impl FullFrame {
    pub fn relocate(&mut self, relocation: &Relocation) -> Result<()> {
        self.offset = relocation.resolve(self.offset)?;
        for vt in self.locals.iter_mut().chain(self.stack.iter_mut()) {
            vt.relocate(relocation)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackMapTable {
    pub frames: Vec<Frame>,
}

impl StackMapTable {
    pub fn parse(info: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(info);
        let count = r.u16()?;
        let mut frames = Vec::with_capacity(count as usize);
        let mut previous: Option<u32> = None;

        for _ in 0..count {
            let frame_type = r.u8()?;
            let (delta, kind) = match frame_type {
                0..=63 => (frame_type as u32, FrameKind::Same),
                64..=127 => (
                    (frame_type - 64) as u32,
                    FrameKind::SameLocals1StackItem(VerificationType::parse(&mut r)?),
                ),
                247 => {
                    let delta = r.u16()? as u32;
                    (
                        delta,
                        FrameKind::SameLocals1StackItem(VerificationType::parse(&mut r)?),
                    )
                }
                248..=250 => (r.u16()? as u32, FrameKind::Chop(251 - frame_type)),
                251 => (r.u16()? as u32, FrameKind::Same),
                252..=254 => {
                    let delta = r.u16()? as u32;
                    let mut locals = Vec::new();
                    for _ in 0..(frame_type - 251) {
                        locals.push(VerificationType::parse(&mut r)?);
                    }
                    (delta, FrameKind::Append(locals))
                }
                255 => {
                    let delta = r.u16()? as u32;
                    let n_locals = r.u16()?;
                    let mut locals = Vec::with_capacity(n_locals as usize);
                    for _ in 0..n_locals {
                        locals.push(VerificationType::parse(&mut r)?);
                    }
                    let n_stack = r.u16()?;
                    let mut stack = Vec::with_capacity(n_stack as usize);
                    for _ in 0..n_stack {
                        stack.push(VerificationType::parse(&mut r)?);
                    }
                    (delta, FrameKind::Full { locals, stack })
                }
                _ => {
                    return Err(ClassFileError::Malformed(format!(
                        "reserved stack map frame type {frame_type}"
                    )))
                }
            };
            let offset = match previous {
                None => delta,
                Some(p) => p + delta + 1,
            };
            previous = Some(offset);
            frames.push(Frame { offset, kind });
        }
        r.finish()?;
        Ok(Self { frames })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut w = ByteWriter::new();
        w.u16(self.frames.len() as u16);
        let mut previous: Option<u32> = None;

        for frame in &self.frames {
            let delta = match previous {
                None => frame.offset,
                Some(p) if frame.offset > p => frame.offset - p - 1,
                Some(_) => {
                    return Err(ClassFileError::Malformed(format!(
                        "stack map frame at {} is out of order",
                        frame.offset
                    )))
                }
            };
            previous = Some(frame.offset);
            let delta16 = u16::try_from(delta).map_err(|_| ClassFileError::CodeTooLarge)?;

            match &frame.kind {
                FrameKind::Same if delta <= 63 => {
                    w.u8(delta as u8);
                }
                FrameKind::Same => {
                    w.u8(251).u16(delta16);
                }
                FrameKind::SameLocals1StackItem(vt) => {
                    if delta <= 63 {
                        w.u8(64 + delta as u8);
                    } else {
                        w.u8(247).u16(delta16);
                    }
                    vt.write(&mut w);
                }
                FrameKind::Chop(k) => {
                    w.u8(251 - k).u16(delta16);
                }
                FrameKind::Append(locals) => {
                    w.u8(251 + locals.len() as u8).u16(delta16);
                    for vt in locals {
                        vt.write(&mut w);
                    }
                }
                FrameKind::Full { locals, stack } => {
                    w.u8(255).u16(delta16).u16(locals.len() as u16);
                    for vt in locals {
                        vt.write(&mut w);
                    }
                    w.u16(stack.len() as u16);
                    for vt in stack {
                        vt.write(&mut w);
                    }
                }
            }
        }
        Ok(w.into_bytes())
    }

    /// Move frame offsets and `Uninitialized` offsets to reassembled code
    pub fn relocate(&mut self, relocation: &Relocation) -> Result<()> {
        for frame in &mut self.frames {
            frame.offset = relocation.resolve(frame.offset)?;
            match &mut frame.kind {
                FrameKind::Same | FrameKind::Chop(_) => {}
                FrameKind::SameLocals1StackItem(vt) => vt.relocate(relocation)?,
                FrameKind::Append(locals) => {
                    for vt in locals {
                        vt.relocate(relocation)?;
                    }
                }
                FrameKind::Full { locals, stack } => {
                    for vt in locals.iter_mut().chain(stack.iter_mut()) {
                        vt.relocate(relocation)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Spell out every frame, starting from the method's implicit first frame
    pub fn expand(&self, initial: &[VerificationType]) -> Result<Vec<FullFrame>> {
        let mut locals = initial.to_vec();
        let mut out = Vec::with_capacity(self.frames.len());
        for frame in &self.frames {
            let stack = match &frame.kind {
                FrameKind::Same => Vec::new(),
                FrameKind::SameLocals1StackItem(vt) => vec![*vt],
                FrameKind::Chop(k) => {
                    let k = *k as usize;
                    if k > locals.len() {
                        return Err(ClassFileError::Malformed(format!(
                            "chop frame at {} removes more locals than exist",
                            frame.offset
                        )));
                    }
                    locals.truncate(locals.len() - k);
                    Vec::new()
                }
                FrameKind::Append(extra) => {
                    locals.extend_from_slice(extra);
                    Vec::new()
                }
                FrameKind::Full { locals: l, stack } => {
                    locals = l.clone();
                    stack.clone()
                }
            };
            out.push(FullFrame {
                offset: frame.offset,
                locals: locals.clone(),
                stack,
            });
        }
        Ok(out)
    }

    /// Encode explicit frames using the most compact form available
    pub fn compress(frames: &[FullFrame], initial: &[VerificationType]) -> Self {
        let mut previous: &[VerificationType] = initial;
        let mut out = Vec::with_capacity(frames.len());
        for frame in frames {
            let locals = frame.locals.as_slice();
            let kind = if locals == previous && frame.stack.is_empty() {
                FrameKind::Same
            } else if locals == previous && frame.stack.len() == 1 {
                FrameKind::SameLocals1StackItem(frame.stack[0])
            } else if frame.stack.is_empty()
                && locals.len() < previous.len()
                && previous.len() - locals.len() <= 3
                && previous.starts_with(locals)
            {
                FrameKind::Chop((previous.len() - locals.len()) as u8)
            } else if frame.stack.is_empty()
                && locals.len() > previous.len()
                && locals.len() - previous.len() <= 3
                && locals.starts_with(previous)
            {
                FrameKind::Append(locals[previous.len()..].to_vec())
            } else {
                FrameKind::Full {
                    locals: locals.to_vec(),
                    stack: frame.stack.clone(),
                }
            };
            out.push(Frame {
                offset: frame.offset,
                kind,
            });
            previous = locals;
        }
        Self { frames: out }
    }
}

/// Locals of the implicit frame at method entry
pub fn initial_locals(
    pool: &mut ConstantPool,
    this_class: u16,
    is_static: bool,
    is_constructor: bool,
    descriptor: &MethodDescriptor,
) -> Result<Vec<VerificationType>> {
    let mut locals = Vec::with_capacity(descriptor.params.len() + 1);
    if !is_static {
        locals.push(if is_constructor {
            VerificationType::UninitializedThis
        } else {
            VerificationType::Object(this_class)
        });
    }
    for param in &descriptor.params {
        locals.push(VerificationType::for_field_type(pool, param)?);
    }
    Ok(locals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::{assemble, decode, Instruction};
    use crate::opcode::NOP;

    fn sample() -> StackMapTable {
        StackMapTable {
            frames: vec![
                Frame { offset: 5, kind: FrameKind::Append(vec![VerificationType::Integer]) },
                Frame { offset: 9, kind: FrameKind::Same },
                Frame {
                    offset: 100,
                    kind: FrameKind::SameLocals1StackItem(VerificationType::Object(3)),
                },
                Frame { offset: 104, kind: FrameKind::Chop(1) },
            ],
        }
    }

    #[test]
    fn test_encode_parse_round_trip() {
        let table = sample();
        let bytes = table.to_bytes().unwrap();
        assert_eq!(StackMapTable::parse(&bytes).unwrap(), table);
    }

    #[test]
    fn test_extended_forms_for_large_deltas() {
        let table = sample();
        let bytes = table.to_bytes().unwrap();
        // third frame has delta 90 and needs the extended same_locals_1 form
        assert!(bytes.contains(&247));
    }

    #[test]
    fn test_expand_compress_inverse() {
        let initial = vec![VerificationType::Object(2)];
        let table = sample();
        let expanded = table.expand(&initial).unwrap();
        assert_eq!(expanded[0].locals, vec![VerificationType::Object(2), VerificationType::Integer]);
        assert_eq!(expanded[3].locals, vec![VerificationType::Object(2)]);
        assert_eq!(StackMapTable::compress(&expanded, &initial), table);
    }

    #[test]
    fn test_relocate_moves_frames() {
        let code = [NOP, NOP, NOP];
        let mut instructions = decode(&code).unwrap();
        instructions.insert(0, Instruction::simple(NOP));
        let relocation = assemble(&instructions, 3).unwrap().relocation;
        let mut table = StackMapTable {
            frames: vec![Frame { offset: 2, kind: FrameKind::Same }],
        };
        table.relocate(&relocation).unwrap();
        assert_eq!(table.frames[0].offset, 3);
    }
}
