//! Minimal p-code model shared by instruction translators and the
//! disassembly engine.
//!
//! Only the parts of p-code the classifier inspects are modelled: the
//! opcode of every emitted operation and the (space, offset, size) of its
//! operands. No semantics are evaluated.

use std::fmt;

use crate::Address;

/// Address space an operand lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpaceKind {
    /// Constant space: the offset *is* the value.
    Const,
    /// The default code/data address space.
    Ram,
    /// Processor registers.
    Register,
    /// Temporaries local to one instruction.
    Unique,
}

/// One p-code operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Varnode {
    pub space: SpaceKind,
    pub offset: u64,
    pub size: u32,
}

impl Varnode {
    pub fn constant(value: u64, size: u32) -> Self {
        Self { space: SpaceKind::Const, offset: value, size }
    }

    pub fn ram(offset: Address, size: u32) -> Self {
        Self { space: SpaceKind::Ram, offset, size }
    }

    pub fn register(offset: u64, size: u32) -> Self {
        Self { space: SpaceKind::Register, offset, size }
    }

    pub fn unique(offset: u64, size: u32) -> Self {
        Self { space: SpaceKind::Unique, offset, size }
    }
}

impl fmt::Display for Varnode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let space = match self.space {
            SpaceKind::Const => "const",
            SpaceKind::Ram => "ram",
            SpaceKind::Register => "register",
            SpaceKind::Unique => "unique",
        };
        write!(f, "({}, 0x{:x}, {})", space, self.offset, self.size)
    }
}

/// The closed set of p-code opcodes the classifier distinguishes.
///
/// Everything that is neither control flow nor a potential reference to a
/// registered target collapses into [`OpCode::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    Copy,
    Load,
    Store,
    Branch,
    CBranch,
    BranchInd,
    Call,
    CallInd,
    Return,
    Other,
}

impl OpCode {
    /// True for operations that end an instruction's flow without falling
    /// through to the next address.
    pub fn is_unconditional_transfer(self) -> bool {
        matches!(self, OpCode::Branch | OpCode::BranchInd | OpCode::Return)
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OpCode::Copy => "COPY",
            OpCode::Load => "LOAD",
            OpCode::Store => "STORE",
            OpCode::Branch => "BRANCH",
            OpCode::CBranch => "CBRANCH",
            OpCode::BranchInd => "BRANCHIND",
            OpCode::Call => "CALL",
            OpCode::CallInd => "CALLIND",
            OpCode::Return => "RETURN",
            OpCode::Other => "OTHER",
        };
        f.write_str(name)
    }
}

/// Receiver for the p-code stream of one instruction.
pub trait PcodeEmit {
    /// Called once per emitted operation, in program order.
    fn dump(&mut self, addr: Address, opcode: OpCode, output: Option<&Varnode>, inputs: &[Varnode]);
}

/// Reasons a translator could not produce an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The bytes at the address are not mapped by the load image.
    #[error("data unavailable at 0x{0:x}")]
    DataUnavailable(Address),

    /// The bytes do not form a valid instruction.
    #[error("bad data at 0x{0:x}")]
    BadData(Address),

    /// The instruction decoded, but its semantics are not modelled. The
    /// length is still known.
    #[error("unimplemented instruction at 0x{addr:x} ({length} bytes)")]
    Unimplemented { addr: Address, length: usize },
}

/// Instruction translator: the black box that turns bytes at an address
/// into one instruction's p-code.
pub trait Translate {
    /// Emit p-code for the single instruction at `addr` into `emit` and
    /// return its length in bytes.
    fn one_instruction(&self, emit: &mut dyn PcodeEmit, addr: Address) -> Result<usize, DecodeError>;
}
