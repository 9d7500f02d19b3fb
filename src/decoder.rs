//! Capstone-backed instruction translator for multiple architectures.
//!
//! Capstone does not lift to p-code, so each instruction is reduced to the
//! handful of operations the classifier inspects: control transfers with
//! their destinations, constant copies, and loads through constant pointers.

use std::fmt;

use capstone::arch::arm::ArchMode as ArmMode;
use capstone::arch::arm::ArmOperandType;
use capstone::arch::arm64::ArchMode as Arm64Mode;
use capstone::arch::arm64::Arm64OperandType;
use capstone::arch::mips::ArchMode as MipsMode;
use capstone::arch::mips::MipsOperand;
use capstone::arch::ppc::ArchMode as PpcMode;
use capstone::arch::ppc::PpcOperand;
use capstone::arch::riscv::ArchMode as RiscVMode;
use capstone::arch::riscv::RiscVOperand;
use capstone::arch::x86::ArchMode as X86Mode;
use capstone::arch::x86::{X86OpMem, X86OperandType, X86Reg};
use capstone::arch::ArchOperand;
use capstone::prelude::BuildsCapstone;
use capstone::{Capstone, InsnDetail, InsnGroupId, InsnGroupType, RegId};

use crate::image::LoadImage;
use crate::pcode::{DecodeError, OpCode, PcodeEmit, Translate, Varnode};
use crate::{Address, Architecture, MAX_INSTRUCTION_SIZE};

/// Space id carried by the first input of emitted LOADs.
const RAM_SPACE_ID: u64 = 1;
/// Register offsets used for synthetic operands.
const REG_RESULT: u64 = 0x0;
const REG_RETURN: u64 = 0x20;
const REG_CONDITION: u64 = 0x200;
/// Temporary holding an indirect destination.
const UNIQUE_TARGET: u64 = 0x100;

/// Errors that can occur while building a translator
#[derive(Debug, thiserror::Error)]
pub enum DecoderError {
    /// Capstone error
    #[error("Capstone error: {0}")]
    CapstoneError(#[from] capstone::Error),

    /// Unsupported architecture
    #[error("Unsupported architecture: {0}")]
    UnsupportedArchitecture(Architecture),
}

impl From<DecoderError> for crate::AnalysisError {
    fn from(err: DecoderError) -> Self {
        match err {
            DecoderError::UnsupportedArchitecture(arch) => crate::AnalysisError::UnsupportedArchitecture(arch),
            other => crate::AnalysisError::DecoderError(other.to_string()),
        }
    }
}

/// Operand reduced to what matters for control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operand {
    Imm(u64),
    /// Memory at a fixed address (absolute or pc-relative).
    Ptr(Address),
    Reg,
    Mem,
}

/// How an instruction moves control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transfer {
    None,
    Return,
    Call,
    Jump,
    CondJump,
}

/// A Capstone-based translator reading instruction bytes from a load image.
pub struct CapstoneTranslator<'a> {
    arch: Architecture,
    cs: Capstone,
    loader: &'a dyn LoadImage,
}

impl<'a> CapstoneTranslator<'a> {
    /// Create a translator for a specific architecture
    pub fn for_architecture(arch: Architecture, loader: &'a dyn LoadImage) -> Result<Self, DecoderError> {
        let cs = match arch {
            Architecture::X86_32 => Self::build_x86_32()?,
            Architecture::X86_64 => Self::build_x86_64()?,
            Architecture::Arm => Self::build_arm()?,
            Architecture::Thumb => Self::build_thumb()?,
            Architecture::AArch64 => Self::build_aarch64()?,
            Architecture::Mips32 => Self::build_mips32()?,
            Architecture::RiscV32 => Self::build_riscv32()?,
            Architecture::RiscV64 => Self::build_riscv64()?,
            Architecture::Ppc32 => Self::build_ppc32()?,
            Architecture::Unknown => return Err(DecoderError::UnsupportedArchitecture(arch)),
        };
        Ok(Self { arch, cs, loader })
    }

    /// Build an x86 32-bit decoder
    pub fn build_x86_32() -> Result<Capstone, DecoderError> {
        Ok(Capstone::new().x86().mode(X86Mode::Mode32).detail(true).build()?)
    }

    /// Build an x86 64-bit decoder
    pub fn build_x86_64() -> Result<Capstone, DecoderError> {
        Ok(Capstone::new().x86().mode(X86Mode::Mode64).detail(true).build()?)
    }

    /// Build an ARM (ARM mode) decoder
    pub fn build_arm() -> Result<Capstone, DecoderError> {
        Ok(Capstone::new().arm().mode(ArmMode::Arm).detail(true).build()?)
    }

    /// Build an ARM (Thumb mode) decoder
    pub fn build_thumb() -> Result<Capstone, DecoderError> {
        Ok(Capstone::new().arm().mode(ArmMode::Thumb).detail(true).build()?)
    }

    /// Build an AArch64 decoder
    pub fn build_aarch64() -> Result<Capstone, DecoderError> {
        Ok(Capstone::new().arm64().mode(Arm64Mode::Arm).detail(true).build()?)
    }

    /// Build a MIPS32 little-endian decoder
    pub fn build_mips32() -> Result<Capstone, DecoderError> {
        Ok(Capstone::new().mips().mode(MipsMode::Mips32).detail(true).build()?)
    }

    /// Build a RISC-V 32-bit decoder
    pub fn build_riscv32() -> Result<Capstone, DecoderError> {
        Ok(Capstone::new().riscv().mode(RiscVMode::RiscV32).detail(true).build()?)
    }

    /// Build a RISC-V 64-bit decoder
    pub fn build_riscv64() -> Result<Capstone, DecoderError> {
        Ok(Capstone::new().riscv().mode(RiscVMode::RiscV64).detail(true).build()?)
    }

    /// Build a PPC32 decoder
    pub fn build_ppc32() -> Result<Capstone, DecoderError> {
        Ok(Capstone::new().ppc().mode(PpcMode::Mode32).detail(true).build()?)
    }

    /// Get the architecture of this translator
    pub fn architecture(&self) -> Architecture {
        self.arch
    }

    fn pointer_size(&self) -> u32 {
        match self.arch {
            Architecture::X86_64 | Architecture::AArch64 | Architecture::RiscV64 => 8,
            _ => 4,
        }
    }

    fn truncate(&self, value: u64) -> u64 {
        if self.pointer_size() == 8 {
            value
        } else {
            value & 0xffff_ffff
        }
    }

    fn x86_mem(&self, next: Address, mem: &X86OpMem) -> Operand {
        if mem.segment() != RegId::INVALID_REG {
            return Operand::Mem;
        }
        if mem.base().0 == X86Reg::X86_REG_RIP as u16 {
            return Operand::Ptr(next.wrapping_add(mem.disp() as u64));
        }
        if mem.base() == RegId::INVALID_REG && mem.index() == RegId::INVALID_REG {
            return Operand::Ptr(self.truncate(mem.disp() as u64));
        }
        Operand::Mem
    }

    fn operands(&self, next: Address, detail: &InsnDetail<'_>) -> Vec<Operand> {
        detail
            .arch_detail()
            .operands()
            .into_iter()
            .filter_map(|op| match op {
                ArchOperand::X86Operand(op) => match op.op_type {
                    X86OperandType::Imm(imm) => Some(Operand::Imm(self.truncate(imm as u64))),
                    X86OperandType::Reg(_) => Some(Operand::Reg),
                    X86OperandType::Mem(mem) => Some(self.x86_mem(next, &mem)),
                    _ => None,
                },
                ArchOperand::ArmOperand(op) => match op.op_type {
                    ArmOperandType::Imm(imm) => Some(Operand::Imm(imm as u32 as u64)),
                    ArmOperandType::Reg(_) => Some(Operand::Reg),
                    ArmOperandType::Mem(_) => Some(Operand::Mem),
                    _ => None,
                },
                ArchOperand::Arm64Operand(op) => match op.op_type {
                    Arm64OperandType::Imm(imm) => Some(Operand::Imm(imm as u64)),
                    Arm64OperandType::Reg(_) => Some(Operand::Reg),
                    Arm64OperandType::Mem(_) => Some(Operand::Mem),
                    _ => None,
                },
                ArchOperand::MipsOperand(op) => match op {
                    MipsOperand::Imm(imm) => Some(Operand::Imm(self.truncate(imm as u64))),
                    MipsOperand::Reg(_) => Some(Operand::Reg),
                    MipsOperand::Mem(_) => Some(Operand::Mem),
                    _ => None,
                },
                ArchOperand::RiscVOperand(op) => match op {
                    RiscVOperand::Imm(imm) => Some(Operand::Imm(self.truncate(imm as u64))),
                    RiscVOperand::Reg(_) => Some(Operand::Reg),
                    RiscVOperand::Mem(_) => Some(Operand::Mem),
                    _ => None,
                },
                ArchOperand::PpcOperand(op) => match op {
                    PpcOperand::Imm(imm) => Some(Operand::Imm(self.truncate(imm as u64))),
                    PpcOperand::Reg(_) => Some(Operand::Reg),
                    PpcOperand::Mem(_) => Some(Operand::Mem),
                    _ => None,
                },
                _ => None,
            })
            .collect()
    }

    /// Destination of a transfer: the last immediate (branch encodings put
    /// the label after any bit/register operands), else a fixed pointer.
    /// RISC-V branch immediates are relative to the instruction.
    fn transfer_target(&self, addr: Address, ops: &[Operand]) -> Option<Operand> {
        let target = ops
            .iter()
            .rev()
            .find(|op| matches!(op, Operand::Imm(_)))
            .or_else(|| ops.iter().find(|op| matches!(op, Operand::Ptr(_))))
            .copied();
        match (self.arch, target) {
            (Architecture::RiscV32 | Architecture::RiscV64, Some(Operand::Imm(offset))) => {
                Some(Operand::Imm(self.truncate(addr.wrapping_add(offset))))
            }
            _ => target,
        }
    }

    fn transfer_kind(&self, mnemonic: &str, op_str: &str, groups: &[InsnGroupId]) -> Transfer {
        let in_group = |group: u8| groups.contains(&InsnGroupId(group));
        match self.arch {
            // capstone leaves calls such as `jal` out of every group here
            Architecture::Mips32 => mips_transfer(mnemonic, op_str),
            Architecture::RiscV32 | Architecture::RiscV64 => riscv_transfer(mnemonic, op_str),
            Architecture::Ppc32 if in_group(InsnGroupType::CS_GRP_JUMP as u8) => ppc_transfer(mnemonic),
            Architecture::Ppc32 => Transfer::None,
            _ if in_group(InsnGroupType::CS_GRP_RET as u8) => Transfer::Return,
            _ if in_group(InsnGroupType::CS_GRP_CALL as u8) => Transfer::Call,
            _ if in_group(InsnGroupType::CS_GRP_JUMP as u8) => {
                if matches!(mnemonic, "jmp" | "ljmp" | "b" | "b.al" | "br" | "bx") {
                    Transfer::Jump
                } else {
                    Transfer::CondJump
                }
            }
            _ => Transfer::None,
        }
    }

    /// Emit LOAD of `ptr` followed by `opcode` through the loaded value.
    fn emit_indirect(&self, emit: &mut dyn PcodeEmit, addr: Address, opcode: OpCode, ptr: Option<Address>) {
        let size = self.pointer_size();
        let target = Varnode::unique(UNIQUE_TARGET, size);
        if let Some(ptr) = ptr {
            emit.dump(
                addr,
                OpCode::Load,
                Some(&target),
                &[Varnode::constant(RAM_SPACE_ID, 8), Varnode::constant(ptr, size)],
            );
        }
        emit.dump(addr, opcode, None, &[target]);
    }

    fn emit_pcode(&self, emit: &mut dyn PcodeEmit, addr: Address, kind: Transfer, ops: &[Operand]) {
        let size = self.pointer_size();
        let target = self.transfer_target(addr, ops);

        match kind {
            Transfer::Return => {
                emit.dump(addr, OpCode::Return, None, &[Varnode::register(REG_RETURN, size)]);
                return;
            }
            Transfer::Call => {
                match target {
                    Some(Operand::Imm(dest)) => emit.dump(addr, OpCode::Call, None, &[Varnode::ram(dest, 1)]),
                    Some(Operand::Ptr(ptr)) => self.emit_indirect(emit, addr, OpCode::CallInd, Some(ptr)),
                    _ => self.emit_indirect(emit, addr, OpCode::CallInd, None),
                }
                return;
            }
            Transfer::Jump => {
                match target {
                    Some(Operand::Imm(dest)) => emit.dump(addr, OpCode::Branch, None, &[Varnode::ram(dest, 1)]),
                    Some(Operand::Ptr(ptr)) => self.emit_indirect(emit, addr, OpCode::BranchInd, Some(ptr)),
                    _ => self.emit_indirect(emit, addr, OpCode::BranchInd, None),
                }
                return;
            }
            Transfer::CondJump => {
                if let Some(Operand::Imm(dest)) = target {
                    emit.dump(
                        addr,
                        OpCode::CBranch,
                        None,
                        &[Varnode::ram(dest, 1), Varnode::register(REG_CONDITION, 1)],
                    );
                } else {
                    emit.dump(addr, OpCode::Other, None, &[Varnode::register(REG_CONDITION, 1)]);
                }
                return;
            }
            Transfer::None => {}
        }

        let result = Varnode::register(REG_RESULT, size);
        let mut emitted = false;
        for op in ops {
            match *op {
                Operand::Imm(value) => {
                    emit.dump(addr, OpCode::Copy, Some(&result), &[Varnode::constant(value, size)]);
                    emitted = true;
                }
                Operand::Ptr(ptr) => {
                    emit.dump(
                        addr,
                        OpCode::Load,
                        Some(&result),
                        &[Varnode::constant(RAM_SPACE_ID, 8), Varnode::constant(ptr, size)],
                    );
                    emitted = true;
                }
                Operand::Reg | Operand::Mem => {}
            }
        }
        if !emitted {
            emit.dump(addr, OpCode::Other, Some(&result), &[]);
        }
    }
}

fn mips_transfer(mnemonic: &str, op_str: &str) -> Transfer {
    match mnemonic {
        "jr" | "jrc" if op_str == "$ra" => Transfer::Return,
        "jal" | "jalx" | "jalr" | "jalrc" | "jialc" | "bal" | "balc" | "bgezal" | "bltzal" | "bgezall"
        | "bltzall" => Transfer::Call,
        "j" | "jr" | "jrc" | "jic" | "b" | "bc" => Transfer::Jump,
        "break" | "bitswap" | "balign" => Transfer::None,
        m if m.starts_with('b') => Transfer::CondJump,
        _ => Transfer::None,
    }
}

fn riscv_transfer(mnemonic: &str, op_str: &str) -> Transfer {
    match mnemonic {
        "ret" => Transfer::Return,
        "jr" | "c.jr" if op_str == "ra" => Transfer::Return,
        "jal" | "c.jal" | "jalr" | "c.jalr" | "call" => Transfer::Call,
        "j" | "c.j" | "jr" | "c.jr" | "tail" => Transfer::Jump,
        "beq" | "bne" | "blt" | "bge" | "bltu" | "bgeu" | "beqz" | "bnez" | "blez" | "bgez" | "bltz"
        | "bgtz" | "bgt" | "ble" | "bgtu" | "bleu" | "c.beqz" | "c.bnez" => Transfer::CondJump,
        _ => Transfer::None,
    }
}

/// Only called for instructions capstone already put in the jump group.
fn ppc_transfer(mnemonic: &str) -> Transfer {
    match mnemonic.trim_end_matches(['+', '-']) {
        "blr" => Transfer::Return,
        "bl" | "bla" | "bctrl" => Transfer::Call,
        "b" | "ba" | "bctr" => Transfer::Jump,
        _ => Transfer::CondJump,
    }
}

impl fmt::Display for CapstoneTranslator<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CapstoneTranslator::{}", self.arch)
    }
}

impl Translate for CapstoneTranslator<'_> {
    fn one_instruction(&self, emit: &mut dyn PcodeEmit, addr: Address) -> Result<usize, DecodeError> {
        let mut buf = [0u8; MAX_INSTRUCTION_SIZE];
        let filled = self.loader.load_fill(&mut buf, addr);
        if filled == 0 {
            return Err(DecodeError::DataUnavailable(addr));
        }

        let insns = self
            .cs
            .disasm_count(&buf[..filled], addr, 1)
            .map_err(|_| DecodeError::BadData(addr))?;
        let insn = insns.iter().next().ok_or(DecodeError::BadData(addr))?;
        let length = insn.bytes().len();
        if insn.address() != addr || length == 0 {
            return Err(DecodeError::BadData(addr));
        }

        let detail = self
            .cs
            .insn_detail(&insn)
            .map_err(|_| DecodeError::Unimplemented { addr, length })?;
        let next = addr + length as Address;
        let ops = self.operands(next, &detail);
        let kind = self.transfer_kind(insn.mnemonic().unwrap_or(""), insn.op_str().unwrap_or(""), detail.groups());
        self.emit_pcode(emit, addr, kind, &ops);
        Ok(length)
    }
}
