//! Single-instruction classification on top of a [`Translate`] backend.

use std::collections::BTreeSet;

use super::unit::CodeFlags;
use crate::pcode::{DecodeError, OpCode, PcodeEmit, SpaceKind, Translate, Varnode};
use crate::Address;

/// Outcome of classifying one instruction.
///
/// When `success` is false the remaining fields carry no information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DisassemblyResult {
    pub success: bool,
    pub length: u64,
    pub flags: CodeFlags,
    /// Destination of the jump/call edge when `flags` has `JUMP`.
    pub jumpaddress: Option<Address>,
    /// Registered target referenced when `flags` has `TARGETHIT`.
    pub targethit: Option<Address>,
}

impl DisassemblyResult {
    fn failure() -> Self {
        Self::default()
    }
}

/// Per-instruction state collected while the translator emits p-code.
#[derive(Debug, Default)]
struct EmitState<'t> {
    targets: Option<&'t BTreeSet<Address>>,
    jumpaddr: Vec<Address>,
    lastop: Option<OpCode>,
    hascall: bool,
    targetoffset: Option<Address>,
}

impl EmitState<'_> {
    fn check_target(&mut self, vn: Option<&Varnode>) {
        let Some(vn) = vn else { return };
        if self.targets.is_some_and(|t| t.contains(&vn.offset)) {
            self.targetoffset = Some(vn.offset);
        }
    }
}

impl PcodeEmit for EmitState<'_> {
    fn dump(&mut self, _addr: Address, opcode: OpCode, _output: Option<&Varnode>, inputs: &[Varnode]) {
        self.lastop = Some(opcode);
        match opcode {
            OpCode::Call | OpCode::Branch | OpCode::CBranch => {
                if opcode == OpCode::Call {
                    self.hascall = true;
                }
                // branches into constant space are p-code relative, not addresses
                if let Some(dest) = inputs.first().filter(|vn| vn.space != SpaceKind::Const) {
                    self.jumpaddr.push(dest.offset);
                }
            }
            OpCode::Copy | OpCode::BranchInd | OpCode::CallInd => self.check_target(inputs.first()),
            OpCode::Load => self.check_target(inputs.get(1)),
            _ => {}
        }
    }
}

/// Decodes one instruction at a time and derives its [`CodeFlags`].
pub struct DisassemblyEngine<'a> {
    trans: &'a dyn Translate,
    targets: BTreeSet<Address>,
}

impl<'a> DisassemblyEngine<'a> {
    pub fn new(trans: &'a dyn Translate) -> Self {
        Self {
            trans,
            targets: BTreeSet::new(),
        }
    }

    /// Rebind to a new translator and forget all registered targets.
    pub fn init(&mut self, trans: &'a dyn Translate) {
        self.trans = trans;
        self.targets.clear();
    }

    /// Register an address whose use should be reported as a target hit.
    pub fn add_target(&mut self, addr: Address) {
        self.targets.insert(addr);
    }

    pub fn has_target(&self, addr: Address) -> bool {
        self.targets.contains(&addr)
    }

    pub fn disassemble(&self, addr: Address) -> DisassemblyResult {
        let mut state = EmitState {
            targets: Some(&self.targets),
            ..EmitState::default()
        };

        let length = match self.trans.one_instruction(&mut state, addr) {
            Ok(length) => length,
            Err(DecodeError::Unimplemented { length, .. }) => length,
            Err(DecodeError::BadData(_)) | Err(DecodeError::DataUnavailable(_)) => {
                return DisassemblyResult::failure();
            }
        } as u64;

        let mut res = DisassemblyResult {
            success: true,
            length,
            ..DisassemblyResult::default()
        };
        if state.hascall {
            res.flags |= CodeFlags::CALL;
        }
        if let Some(target) = state.targetoffset {
            res.flags |= CodeFlags::TARGETHIT;
            res.targethit = Some(target);
        }

        // no op emitted behaves like a plain data move
        let lastop = state.lastop.unwrap_or(OpCode::Copy);
        if !lastop.is_unconditional_transfer() {
            res.flags |= CodeFlags::FALLTHRU;
        } else if lastop != OpCode::Return && state.targetoffset.is_some() {
            res.flags |= CodeFlags::THUNKHIT;
        }

        let fallthruaddr = addr + length;
        for &dest in &state.jumpaddr {
            if dest == fallthruaddr {
                res.flags |= CodeFlags::FALLTHRU;
            } else if dest != addr {
                res.flags |= CodeFlags::JUMP;
                res.jumpaddress = Some(dest);
            }
        }
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Op, ScriptedTranslator};

    #[test]
    fn test_plain_instruction_falls_through() {
        let trans = ScriptedTranslator::new().insn(0x100, 5, vec![Op::copy_const(1)]);
        let engine = DisassemblyEngine::new(&trans);
        let res = engine.disassemble(0x100);
        assert!(res.success);
        assert_eq!(res.length, 5);
        assert_eq!(res.flags, CodeFlags::FALLTHRU);
        assert_eq!(res.jumpaddress, None);
    }

    #[test]
    fn test_instruction_without_pcode_falls_through() {
        let trans = ScriptedTranslator::new().insn(0x100, 1, vec![]);
        let engine = DisassemblyEngine::new(&trans);
        assert_eq!(engine.disassemble(0x100).flags, CodeFlags::FALLTHRU);
    }

    #[test]
    fn test_return_has_no_fallthru() {
        let trans = ScriptedTranslator::new().insn(0x100, 1, vec![Op::ret()]);
        let engine = DisassemblyEngine::new(&trans);
        let res = engine.disassemble(0x100);
        assert!(res.success);
        assert_eq!(res.flags, CodeFlags::empty());
    }

    #[test]
    fn test_call_records_jump_and_falls_through() {
        let trans = ScriptedTranslator::new().insn(0x100, 5, vec![Op::call(0x200)]);
        let engine = DisassemblyEngine::new(&trans);
        let res = engine.disassemble(0x100);
        assert_eq!(res.flags, CodeFlags::CALL | CodeFlags::JUMP | CodeFlags::FALLTHRU);
        assert_eq!(res.jumpaddress, Some(0x200));
    }

    #[test]
    fn test_unconditional_branch() {
        let trans = ScriptedTranslator::new().insn(0x100, 2, vec![Op::branch(0x180)]);
        let engine = DisassemblyEngine::new(&trans);
        let res = engine.disassemble(0x100);
        assert_eq!(res.flags, CodeFlags::JUMP);
        assert_eq!(res.jumpaddress, Some(0x180));
    }

    #[test]
    fn test_conditional_branch_falls_through() {
        let trans = ScriptedTranslator::new().insn(0x100, 2, vec![Op::cbranch(0x80)]);
        let engine = DisassemblyEngine::new(&trans);
        let res = engine.disassemble(0x100);
        assert_eq!(res.flags, CodeFlags::JUMP | CodeFlags::FALLTHRU);
        assert_eq!(res.jumpaddress, Some(0x80));
    }

    #[test]
    fn test_branch_to_next_is_fallthru_only() {
        let trans = ScriptedTranslator::new().insn(0x100, 2, vec![Op::branch(0x102)]);
        let engine = DisassemblyEngine::new(&trans);
        let res = engine.disassemble(0x100);
        assert_eq!(res.flags, CodeFlags::FALLTHRU);
        assert_eq!(res.jumpaddress, None);
    }

    #[test]
    fn test_self_branch_is_not_an_edge() {
        let trans = ScriptedTranslator::new().insn(0x100, 2, vec![Op::branch(0x100)]);
        let engine = DisassemblyEngine::new(&trans);
        let res = engine.disassemble(0x100);
        assert!(res.success);
        assert_eq!(res.flags, CodeFlags::empty());
    }

    #[test]
    fn test_decode_failures() {
        let trans = ScriptedTranslator::new().bad(0x100);
        let engine = DisassemblyEngine::new(&trans);
        assert!(!engine.disassemble(0x100).success);
        // unmapped address
        assert!(!engine.disassemble(0x500).success);
    }

    #[test]
    fn test_unimplemented_keeps_length() {
        let trans = ScriptedTranslator::new().unimplemented(0x100, 3);
        let engine = DisassemblyEngine::new(&trans);
        let res = engine.disassemble(0x100);
        assert!(res.success);
        assert_eq!(res.length, 3);
        assert_eq!(res.flags, CodeFlags::FALLTHRU);
    }

    #[test]
    fn test_indirect_call_through_target() {
        let trans = ScriptedTranslator::new().insn(0x100, 6, vec![Op::load(0x9000), Op::callind()]);
        let mut engine = DisassemblyEngine::new(&trans);
        let res = engine.disassemble(0x100);
        assert!(!res.flags.contains(CodeFlags::TARGETHIT));

        engine.add_target(0x9000);
        let res = engine.disassemble(0x100);
        assert_eq!(res.flags, CodeFlags::TARGETHIT | CodeFlags::FALLTHRU);
        assert_eq!(res.targethit, Some(0x9000));
    }

    #[test]
    fn test_indirect_jump_through_target_is_thunk() {
        let trans = ScriptedTranslator::new().insn(0x100, 6, vec![Op::load(0x9000), Op::branchind()]);
        let mut engine = DisassemblyEngine::new(&trans);
        engine.add_target(0x9000);
        let res = engine.disassemble(0x100);
        assert_eq!(res.flags, CodeFlags::TARGETHIT | CodeFlags::THUNKHIT);
    }

    #[test]
    fn test_copy_of_target_constant() {
        let trans = ScriptedTranslator::new().insn(0x100, 5, vec![Op::copy_const(0x9000)]);
        let mut engine = DisassemblyEngine::new(&trans);
        engine.add_target(0x9000);
        let res = engine.disassemble(0x100);
        assert!(res.flags.contains(CodeFlags::TARGETHIT));
        assert!(!res.flags.contains(CodeFlags::THUNKHIT));
    }
}
