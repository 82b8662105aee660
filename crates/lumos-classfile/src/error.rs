//! Error types for class file decoding and encoding

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClassFileError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassFileError {
    #[error("unexpected end of data at offset {offset} (wanted {wanted} more bytes)")]
    UnexpectedEof { offset: usize, wanted: usize },

    #[error("bad magic number {0:#010x}")]
    BadMagic(u32),

    #[error("unknown constant pool tag {tag} at index {index}")]
    BadConstantTag { tag: u8, index: u16 },

    #[error("constant pool index {index} is not a {expected}")]
    BadConstantIndex { index: u16, expected: &'static str },

    #[error("constant pool is full")]
    ConstantPoolOverflow,

    #[error("unknown opcode {opcode:#04x} at pc {pc}")]
    UnknownOpcode { opcode: u8, pc: u32 },

    #[error("branch at pc {pc} targets offset {target}, which is not an instruction boundary")]
    BadBranchTarget { pc: u32, target: u32 },

    #[error("branch at pc {pc} does not fit a 16-bit offset after rewriting")]
    BranchOutOfRange { pc: u32 },

    #[error("method code exceeds 65535 bytes")]
    CodeTooLarge,

    #[error("invalid descriptor: {0}")]
    BadDescriptor(String),

    #[error("trailing {0} bytes after attribute body")]
    TrailingBytes(usize),

    #[error("malformed class file: {0}")]
    Malformed(String),

    #[error("UTF-8 constant of {len} bytes exceeds 65535")]
    Utf8TooLong { len: usize },
}

impl ClassFileError {
    /// Error code for machine-readable output
    pub fn code(&self) -> &'static str {
        match self {
            ClassFileError::UnexpectedEof { .. } => "E-CLASS-001",
            ClassFileError::BadMagic(_) => "E-CLASS-002",
            ClassFileError::BadConstantTag { .. } => "E-CLASS-003",
            ClassFileError::BadConstantIndex { .. } => "E-CLASS-004",
            ClassFileError::ConstantPoolOverflow => "E-CLASS-005",
            ClassFileError::UnknownOpcode { .. } => "E-CLASS-006",
            ClassFileError::BadBranchTarget { .. } => "E-CLASS-007",
            ClassFileError::BranchOutOfRange { .. } => "E-CLASS-008",
            ClassFileError::CodeTooLarge => "E-CLASS-009",
            ClassFileError::BadDescriptor(_) => "E-CLASS-010",
            ClassFileError::TrailingBytes(_) => "E-CLASS-011",
            ClassFileError::Malformed(_) => "E-CLASS-012",
            ClassFileError::Utf8TooLong { .. } => "E-CLASS-013",
        }
    }
}
