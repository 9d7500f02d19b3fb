//! Scripted translator for exercising the classifier without a real ISA.

use std::collections::HashMap;

use crate::pcode::{DecodeError, OpCode, PcodeEmit, Translate, Varnode};
use crate::Address;

/// One scripted p-code operation.
#[derive(Debug, Clone)]
pub struct Op {
    pub opcode: OpCode,
    pub output: Option<Varnode>,
    pub inputs: Vec<Varnode>,
}

impl Op {
    fn new(opcode: OpCode, output: Option<Varnode>, inputs: Vec<Varnode>) -> Self {
        Self { opcode, output, inputs }
    }

    pub fn other() -> Self {
        Self::new(OpCode::Other, Some(Varnode::register(0, 4)), vec![Varnode::register(8, 4)])
    }

    pub fn copy_const(value: u64) -> Self {
        Self::new(OpCode::Copy, Some(Varnode::register(0, 4)), vec![Varnode::constant(value, 4)])
    }

    pub fn load(ptr: Address) -> Self {
        Self::new(
            OpCode::Load,
            Some(Varnode::unique(0x100, 4)),
            vec![Varnode::constant(1, 8), Varnode::constant(ptr, 4)],
        )
    }

    pub fn call(dest: Address) -> Self {
        Self::new(OpCode::Call, None, vec![Varnode::ram(dest, 1)])
    }

    pub fn branch(dest: Address) -> Self {
        Self::new(OpCode::Branch, None, vec![Varnode::ram(dest, 1)])
    }

    pub fn cbranch(dest: Address) -> Self {
        Self::new(OpCode::CBranch, None, vec![Varnode::ram(dest, 1), Varnode::register(0x200, 1)])
    }

    pub fn callind() -> Self {
        Self::new(OpCode::CallInd, None, vec![Varnode::unique(0x100, 4)])
    }

    pub fn branchind() -> Self {
        Self::new(OpCode::BranchInd, None, vec![Varnode::unique(0x100, 4)])
    }

    pub fn ret() -> Self {
        Self::new(OpCode::Return, None, vec![Varnode::register(0x20, 4)])
    }
}

#[derive(Debug, Clone)]
enum Script {
    Insn { length: usize, ops: Vec<Op> },
    Bad,
    Unimplemented { length: usize },
}

/// Maps addresses to canned decode results. Unscripted addresses report
/// [`DecodeError::DataUnavailable`].
#[derive(Debug, Clone, Default)]
pub struct ScriptedTranslator {
    scripts: HashMap<Address, Script>,
}

impl ScriptedTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insn(mut self, addr: Address, length: usize, ops: Vec<Op>) -> Self {
        self.scripts.insert(addr, Script::Insn { length, ops });
        self
    }

    /// An instruction with no control flow.
    pub fn plain(self, addr: Address, length: usize) -> Self {
        self.insn(addr, length, vec![Op::other()])
    }

    /// A run of plain instructions of equal length covering `[start, end)`.
    pub fn plain_run(mut self, start: Address, end: Address, length: usize) -> Self {
        let mut addr = start;
        while addr < end {
            self = self.plain(addr, length);
            addr += length as Address;
        }
        self
    }

    pub fn bad(mut self, addr: Address) -> Self {
        self.scripts.insert(addr, Script::Bad);
        self
    }

    pub fn unimplemented(mut self, addr: Address, length: usize) -> Self {
        self.scripts.insert(addr, Script::Unimplemented { length });
        self
    }
}

impl Translate for ScriptedTranslator {
    fn one_instruction(&self, emit: &mut dyn PcodeEmit, addr: Address) -> Result<usize, DecodeError> {
        match self.scripts.get(&addr) {
            Some(Script::Insn { length, ops }) => {
                for op in ops {
                    emit.dump(addr, op.opcode, op.output.as_ref(), &op.inputs);
                }
                Ok(*length)
            }
            Some(Script::Bad) => Err(DecodeError::BadData(addr)),
            Some(Script::Unimplemented { length }) => Err(DecodeError::Unimplemented { addr, length: *length }),
            None => Err(DecodeError::DataUnavailable(addr)),
        }
    }
}
