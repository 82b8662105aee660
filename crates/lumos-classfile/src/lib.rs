//! Lossless JVM class file model for the Lumos weaver
//!
//! Parsing keeps the constant pool, member and attribute encodings intact, so
//! `ClassFile::parse(bytes)?.to_bytes() == bytes` for any well-formed input.
//! Only the pieces the weaver rewrites get typed views: method code and its
//! debug tables, stack maps, signatures, parameters and annotations.

pub mod access;
pub mod annotation;
pub mod attribute;
pub mod builder;
pub mod bytes;
pub mod class;
pub mod constant_pool;
pub mod descriptor;
pub mod error;
pub mod instruction;
pub mod opcode;
pub mod stackmap;

pub use attribute::{Attribute, CodeAttribute, ExceptionEntry, LineNumberTable, LocalVariableTable};
pub use builder::{ClassBuilder, CodeBuilder, MethodBuilder};
pub use class::{ClassFile, Member};
pub use constant_pool::{Constant, ConstantPool, MemberRef, MemberRefKind};
pub use descriptor::{BaseType, FieldType, MethodDescriptor};
pub use error::{ClassFileError, Result};
pub use instruction::{assemble, decode, Assembled, Instruction, LocalForm, Operand, Relocation};
pub use stackmap::{Frame, FrameKind, FullFrame, StackMapTable, VerificationType};
