//! Programmatic class construction
//!
//! Used to synthesize the metadata runtime class and to produce class files
//! in tests without a Java compiler. Code is described symbolically and laid
//! out when the class is built.

use std::collections::HashMap;

use crate::access::{ACC_PUBLIC, ACC_SUPER};
use crate::attribute::{
    self, index_attribute_bytes, method_parameters_bytes, Attribute, CodeAttribute,
    ExceptionEntry, LineNumberEntry, LineNumberTable, LocalVariableEntry, LocalVariableTable,
    MethodParameter,
};
use crate::class::{ClassFile, Member};
use crate::instruction::{assemble, Instruction, LocalForm, Operand};
use crate::opcode::*;
use crate::stackmap::{Frame, FrameKind, StackMapTable, VerificationType};
use crate::{ClassFileError, ConstantPool, Result};

/// Default class file version (Java 8)
pub const DEFAULT_MAJOR_VERSION: u16 = 52;

#[derive(Debug, Clone)]
enum Op {
    Simple(u8),
    Local(u8, u16),
    Iinc(u16, i16),
    Int(i32),
    Str(String),
    Member { opcode: u8, owner: String, name: String, descriptor: String },
    Type(u8, String),
    Jump(u8, usize),
    Label(usize),
    Line(u16),
}

#[derive(Debug, Clone)]
enum FrameType {
    Int,
    Object(String),
}

#[derive(Debug, Clone)]
struct FrameSpec {
    label: usize,
    locals: Vec<FrameType>,
    stack: Vec<FrameType>,
}

#[derive(Debug, Clone)]
struct HandlerSpec {
    start: usize,
    end: usize,
    handler: usize,
    catch_type: Option<String>,
}

/// Symbolic method body
#[derive(Debug, Clone)]
pub struct CodeBuilder {
    max_stack: u16,
    max_locals: u16,
    ops: Vec<Op>,
    locals: Vec<(String, String, u16)>,
    handlers: Vec<HandlerSpec>,
    frames: Vec<FrameSpec>,
}

impl CodeBuilder {
    pub fn new(max_stack: u16, max_locals: u16) -> Self {
        Self {
            max_stack,
            max_locals,
            ops: Vec::new(),
            locals: Vec::new(),
            handlers: Vec::new(),
            frames: Vec::new(),
        }
    }

    /// Instruction without operands (`dup`, `return`, `iadd`, ...)
    pub fn op(mut self, opcode: u8) -> Self {
        self.ops.push(Op::Simple(opcode));
        self
    }

    /// Load or store using the explicit-index opcode (`ILOAD`, `ASTORE`, ...);
    /// indices 0..=3 are emitted in their short form
    pub fn local(mut self, opcode: u8, index: u16) -> Self {
        self.ops.push(Op::Local(opcode, index));
        self
    }

    pub fn iinc(mut self, index: u16, delta: i16) -> Self {
        self.ops.push(Op::Iinc(index, delta));
        self
    }

    pub fn push_int(mut self, value: i32) -> Self {
        self.ops.push(Op::Int(value));
        self
    }

    pub fn ldc_string(mut self, value: impl Into<String>) -> Self {
        self.ops.push(Op::Str(value.into()));
        self
    }

    /// Field access or method invocation
    pub fn member(
        mut self,
        opcode: u8,
        owner: impl Into<String>,
        name: impl Into<String>,
        descriptor: impl Into<String>,
    ) -> Self {
        self.ops.push(Op::Member {
            opcode,
            owner: owner.into(),
            name: name.into(),
            descriptor: descriptor.into(),
        });
        self
    }

    /// `new`, `checkcast`, `instanceof` or `anewarray`
    pub fn type_op(mut self, opcode: u8, class: impl Into<String>) -> Self {
        self.ops.push(Op::Type(opcode, class.into()));
        self
    }

    pub fn jump(mut self, opcode: u8, label: usize) -> Self {
        self.ops.push(Op::Jump(opcode, label));
        self
    }

    pub fn label(mut self, label: usize) -> Self {
        self.ops.push(Op::Label(label));
        self
    }

    /// Following instructions belong to source line `line`
    pub fn line(mut self, line: u16) -> Self {
        self.ops.push(Op::Line(line));
        self
    }

    /// Add a `LocalVariableTable` entry spanning the whole method
    pub fn local_variable(mut self, name: impl Into<String>, descriptor: impl Into<String>, index: u16) -> Self {
        self.locals.push((name.into(), descriptor.into(), index));
        self
    }

    pub fn handler(mut self, start: usize, end: usize, handler: usize, catch_type: Option<&str>) -> Self {
        self.handlers.push(HandlerSpec {
            start,
            end,
            handler,
            catch_type: catch_type.map(str::to_string),
        });
        self
    }

    /// Full stack map frame at `label`; `locals` and `stack` list `"I"` for
    /// ints and internal class names otherwise
    pub fn frame(mut self, label: usize, locals: &[&str], stack: &[&str]) -> Self {
        let convert = |s: &&str| match *s {
            "I" => FrameType::Int,
            name => FrameType::Object(name.to_string()),
        };
        self.frames.push(FrameSpec {
            label,
            locals: locals.iter().map(convert).collect(),
            stack: stack.iter().map(convert).collect(),
        });
        self
    }

    fn build(&self, pool: &mut ConstantPool) -> Result<CodeAttribute> {
        let mut instructions: Vec<Instruction> = Vec::new();
        let mut jumps: Vec<(usize, usize)> = Vec::new();
        let mut labels: HashMap<usize, usize> = HashMap::new();
        let mut lines: Vec<(usize, u16)> = Vec::new();

        for op in &self.ops {
            let ins = match op {
                Op::Simple(opcode) => Instruction::simple(*opcode),
                Op::Local(opcode, index) => Instruction::new(
                    *opcode,
                    Operand::Local {
                        index: *index,
                        form: LocalForm::Implicit,
                    },
                ),
                Op::Iinc(index, delta) => Instruction::new(
                    IINC,
                    Operand::Iinc {
                        index: *index,
                        delta: *delta,
                        wide: false,
                    },
                ),
                Op::Int(value) => Instruction::push_int(pool, *value)?,
                Op::Str(value) => Instruction::new(LDC, Operand::Constant(pool.string_index(value)?)),
                Op::Member { opcode, owner, name, descriptor } => {
                    let index = match *opcode {
                        GETSTATIC..=PUTFIELD => pool.field_ref_index(owner, name, descriptor)?,
                        INVOKEINTERFACE => pool.method_ref_index(owner, name, descriptor, true)?,
                        _ => pool.method_ref_index(owner, name, descriptor, false)?,
                    };
                    if *opcode == INVOKEINTERFACE {
                        let parsed = crate::descriptor::MethodDescriptor::parse(descriptor)?;
                        let count = parsed.param_slots() as u8 + 1;
                        Instruction::new(*opcode, Operand::InvokeInterface { index, count })
                    } else {
                        Instruction::new(*opcode, Operand::Constant(index))
                    }
                }
                Op::Type(opcode, class) => {
                    Instruction::new(*opcode, Operand::Constant(pool.class_index(class)?))
                }
                Op::Jump(opcode, label) => {
                    jumps.push((instructions.len(), *label));
                    Instruction::new(*opcode, Operand::Branch { target: 0 })
                }
                Op::Label(label) => {
                    labels.insert(*label, instructions.len());
                    continue;
                }
                Op::Line(line) => {
                    lines.push((instructions.len(), *line));
                    continue;
                }
            };
            instructions.push(ins);
        }

        // Lay out once; branch sizes do not depend on their targets
        let mut offsets = Vec::with_capacity(instructions.len() + 1);
        let mut pc = 0u32;
        for ins in &instructions {
            offsets.push(pc);
            pc += ins.size_at(pc);
        }
        offsets.push(pc);
        let code_len = pc;

        let offset_of = |label: usize| -> Result<u32> {
            labels
                .get(&label)
                .map(|i| offsets[*i])
                .ok_or_else(|| ClassFileError::Malformed(format!("undefined label {label}")))
        };

        for (index, label) in &jumps {
            let target = offset_of(*label)?;
            instructions[*index].operand = Operand::Branch { target };
        }
        for (ins, offset) in instructions.iter_mut().zip(&offsets) {
            ins.label = Some(*offset);
        }
        let code = assemble(&instructions, code_len)?.code;

        let mut exception_table = Vec::with_capacity(self.handlers.len());
        for h in &self.handlers {
            exception_table.push(ExceptionEntry {
                start_pc: offset_of(h.start)? as u16,
                end_pc: offset_of(h.end)? as u16,
                handler_pc: offset_of(h.handler)? as u16,
                catch_type: match &h.catch_type {
                    Some(name) => pool.class_index(name)?,
                    None => 0,
                },
            });
        }

        let mut attributes = Vec::new();
        if !lines.is_empty() {
            let table = LineNumberTable {
                entries: lines
                    .iter()
                    .map(|(i, line)| LineNumberEntry {
                        start_pc: offsets[*i] as u16,
                        line_number: *line,
                    })
                    .collect(),
            };
            attributes.push(Attribute::new(
                pool.utf8_index(attribute::LINE_NUMBER_TABLE)?,
                table.to_bytes(),
            ));
        }
        if !self.locals.is_empty() {
            let mut table = LocalVariableTable::default();
            for (name, descriptor, index) in &self.locals {
                table.entries.push(LocalVariableEntry {
                    start_pc: 0,
                    length: code_len as u16,
                    name_index: pool.utf8_index(name)?,
                    descriptor_index: pool.utf8_index(descriptor)?,
                    index: *index,
                });
            }
            attributes.push(Attribute::new(
                pool.utf8_index(attribute::LOCAL_VARIABLE_TABLE)?,
                table.to_bytes(),
            ));
        }
        if !self.frames.is_empty() {
            let mut convert = |t: &FrameType| -> Result<VerificationType> {
                Ok(match t {
                    FrameType::Int => VerificationType::Integer,
                    FrameType::Object(name) => VerificationType::Object(pool.class_index(name)?),
                })
            };
            let mut table = StackMapTable::default();
            for frame in &self.frames {
                let locals = frame.locals.iter().map(&mut convert).collect::<Result<Vec<_>>>()?;
                let stack = frame.stack.iter().map(&mut convert).collect::<Result<Vec<_>>>()?;
                table.frames.push(Frame {
                    offset: offset_of(frame.label)?,
                    kind: FrameKind::Full { locals, stack },
                });
            }
            let bytes = table.to_bytes()?;
            attributes.push(Attribute::new(
                pool.utf8_index(attribute::STACK_MAP_TABLE)?,
                bytes,
            ));
        }

        Ok(CodeAttribute {
            max_stack: self.max_stack,
            max_locals: self.max_locals,
            code,
            exception_table,
            attributes,
        })
    }
}

/// A method under construction
#[derive(Debug, Clone)]
pub struct MethodBuilder {
    access_flags: u16,
    name: String,
    descriptor: String,
    code: Option<CodeBuilder>,
    invisible_annotations: Vec<String>,
    signature: Option<String>,
    parameter_names: Option<Vec<String>>,
    raw_attributes: Vec<(String, Vec<u8>)>,
}

impl MethodBuilder {
    pub fn new(access_flags: u16, name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        Self {
            access_flags,
            name: name.into(),
            descriptor: descriptor.into(),
            code: None,
            invisible_annotations: Vec::new(),
            signature: None,
            parameter_names: None,
            raw_attributes: Vec::new(),
        }
    }

    pub fn code(mut self, code: CodeBuilder) -> Self {
        self.code = Some(code);
        self
    }

    /// Add a class-retention annotation, given its type descriptor
    pub fn annotation(mut self, descriptor: impl Into<String>) -> Self {
        self.invisible_annotations.push(descriptor.into());
        self
    }

    pub fn signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    pub fn parameter_names(mut self, names: &[&str]) -> Self {
        self.parameter_names = Some(names.iter().map(|n| n.to_string()).collect());
        self
    }

    /// Attach an arbitrary attribute verbatim
    pub fn raw_attribute(mut self, name: impl Into<String>, info: Vec<u8>) -> Self {
        self.raw_attributes.push((name.into(), info));
        self
    }

    fn build(&self, pool: &mut ConstantPool) -> Result<Member> {
        let mut attributes = Vec::new();
        if let Some(code) = &self.code {
            let code = code.build(pool)?;
            attributes.push(Attribute::new(pool.utf8_index(attribute::CODE)?, code.to_bytes()));
        }
        if let Some(signature) = &self.signature {
            let index = pool.utf8_index(signature)?;
            attributes.push(Attribute::new(
                pool.utf8_index(attribute::SIGNATURE)?,
                index_attribute_bytes(index),
            ));
        }
        if let Some(names) = &self.parameter_names {
            let mut params = Vec::with_capacity(names.len());
            for name in names {
                params.push(MethodParameter {
                    name_index: pool.utf8_index(name)?,
                    access_flags: 0,
                });
            }
            attributes.push(Attribute::new(
                pool.utf8_index(attribute::METHOD_PARAMETERS)?,
                method_parameters_bytes(&params)?,
            ));
        }
        if !self.invisible_annotations.is_empty() {
            let mut info = Vec::new();
            info.extend_from_slice(&(self.invisible_annotations.len() as u16).to_be_bytes());
            for descriptor in &self.invisible_annotations {
                info.extend_from_slice(&pool.utf8_index(descriptor)?.to_be_bytes());
                info.extend_from_slice(&[0, 0]);
            }
            attributes.push(Attribute::new(
                pool.utf8_index(attribute::RUNTIME_INVISIBLE_ANNOTATIONS)?,
                info,
            ));
        }
        for (name, info) in &self.raw_attributes {
            attributes.push(Attribute::new(pool.utf8_index(name)?, info.clone()));
        }
        Ok(Member {
            access_flags: self.access_flags,
            name_index: pool.utf8_index(&self.name)?,
            descriptor_index: pool.utf8_index(&self.descriptor)?,
            attributes,
        })
    }
}

/// A class under construction
#[derive(Debug, Clone)]
pub struct ClassBuilder {
    name: String,
    super_name: Option<String>,
    interfaces: Vec<String>,
    access_flags: u16,
    major_version: u16,
    source_file: Option<String>,
    fields: Vec<(u16, String, String)>,
    methods: Vec<MethodBuilder>,
}

impl ClassBuilder {
    /// Start a public class with internal name `name`, extending `java/lang/Object`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            super_name: Some("java/lang/Object".to_string()),
            interfaces: Vec::new(),
            access_flags: ACC_PUBLIC | ACC_SUPER,
            major_version: DEFAULT_MAJOR_VERSION,
            source_file: None,
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    pub fn access(mut self, flags: u16) -> Self {
        self.access_flags = flags;
        self
    }

    pub fn super_class(mut self, name: impl Into<String>) -> Self {
        self.super_name = Some(name.into());
        self
    }

    pub fn interface(mut self, name: impl Into<String>) -> Self {
        self.interfaces.push(name.into());
        self
    }

    pub fn major_version(mut self, version: u16) -> Self {
        self.major_version = version;
        self
    }

    pub fn source_file(mut self, name: impl Into<String>) -> Self {
        self.source_file = Some(name.into());
        self
    }

    pub fn field(mut self, access_flags: u16, name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        self.fields.push((access_flags, name.into(), descriptor.into()));
        self
    }

    pub fn method(mut self, method: MethodBuilder) -> Self {
        self.methods.push(method);
        self
    }

    pub fn build_class(&self) -> Result<ClassFile> {
        let mut pool = ConstantPool::new();
        let this_class = pool.class_index(&self.name)?;
        let super_class = match &self.super_name {
            Some(name) => pool.class_index(name)?,
            None => 0,
        };
        let mut interfaces = Vec::with_capacity(self.interfaces.len());
        for name in &self.interfaces {
            interfaces.push(pool.class_index(name)?);
        }

        let mut fields = Vec::with_capacity(self.fields.len());
        for (access_flags, name, descriptor) in &self.fields {
            fields.push(Member {
                access_flags: *access_flags,
                name_index: pool.utf8_index(name)?,
                descriptor_index: pool.utf8_index(descriptor)?,
                attributes: Vec::new(),
            });
        }

        let mut methods = Vec::with_capacity(self.methods.len());
        for method in &self.methods {
            methods.push(method.build(&mut pool)?);
        }

        let mut attributes = Vec::new();
        if let Some(source) = &self.source_file {
            let index = pool.utf8_index(source)?;
            attributes.push(Attribute::new(
                pool.utf8_index(attribute::SOURCE_FILE)?,
                index_attribute_bytes(index),
            ));
        }

        Ok(ClassFile {
            minor_version: 0,
            major_version: self.major_version,
            constant_pool: pool,
            access_flags: self.access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        })
    }

    pub fn build(&self) -> Result<Vec<u8>> {
        Ok(self.build_class()?.to_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::decode;

    #[test]
    fn test_build_method_with_lines_and_branch() {
        let code = CodeBuilder::new(2, 2)
            .line(10)
            .local(ILOAD, 1)
            .jump(IFEQ, 1)
            .line(11)
            .local(ALOAD, 0)
            .member(INVOKEVIRTUAL, "com/example/Foo", "run", "()V")
            .label(1)
            .line(12)
            .op(RETURN);
        let bytes = ClassBuilder::new("com/example/Foo")
            .source_file("Foo.java")
            .method(MethodBuilder::new(ACC_PUBLIC, "go", "(I)V").code(code))
            .build()
            .unwrap();

        let class = ClassFile::parse(&bytes).unwrap();
        let pool = &class.constant_pool;
        let code = class.methods[0].code(pool).unwrap().unwrap();
        let instructions = decode(&code.code).unwrap();
        assert_eq!(instructions.len(), 5);
        // iload_1(1) ifeq(3) aload_0(1) invokevirtual(3) return
        assert_eq!(instructions[1].branch_targets(), vec![8]);

        let lines = code.line_numbers(pool).unwrap().unwrap();
        assert_eq!(lines.line_for_pc(5), Some(11));
        assert_eq!(lines.line_for_pc(8), Some(12));
    }

    #[test]
    fn test_undefined_label() {
        let code = CodeBuilder::new(1, 1).jump(GOTO, 9).op(RETURN);
        let err = ClassBuilder::new("Foo")
            .method(MethodBuilder::new(ACC_PUBLIC, "f", "()V").code(code))
            .build()
            .unwrap_err();
        assert!(matches!(err, ClassFileError::Malformed(_)));
    }
}
