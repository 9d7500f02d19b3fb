use super::unit::{CodeFlags, TargetHit};
use super::CodeDataAnalysis;
use crate::{Address, AnalysisError};

impl CodeDataAnalysis<'_> {
    /// Collect code units nothing references and resolve every unit that
    /// touched a registered target into [`TargetHit`]s.
    pub fn find_unlinked(&mut self) -> Result<(), AnalysisError> {
        let mut pending: Vec<(Address, bool)> = Vec::new();
        for (&addr, unit) in &self.codeunit {
            if !unit
                .flags
                .intersects(CodeFlags::HIT_BY_ANY | CodeFlags::NOTCODE | CodeFlags::ERRANTSTART)
            {
                self.unlinkedstarts.push(addr);
            }
            if unit.flags.contains(CodeFlags::TARGETHIT) && !unit.is_not_code() {
                pending.push((addr, unit.flags.contains(CodeFlags::THUNKHIT)));
            }
        }

        for (addr, thunk) in pending {
            let Some(target) = self.disengine.disassemble(addr).targethit else {
                log::warn!("target reference at 0x{:x} vanished on re-decode", addr);
                continue;
            };
            if thunk {
                self.resolve_thunk_hit(addr, target)?;
            } else {
                self.add_target_hit(addr, target)?;
            }
        }
        Ok(())
    }

    /// Record that the code at `codeaddr` reaches the target `thunkaddr`.
    pub fn add_target_hit(&mut self, codeaddr: Address, thunkaddr: Address) -> Result<(), AnalysisError> {
        let funcstart = self.find_function_start(codeaddr);
        let feature = self
            .targets
            .get(&thunkaddr)
            .ok_or(AnalysisError::MissingTargetFeature(thunkaddr))?;
        log::debug!(
            "target {} hit at 0x{:x} (function {})",
            feature.name,
            codeaddr,
            funcstart.map_or_else(|| "unknown".to_string(), |f| format!("0x{:x}", f))
        );
        self.targethits
            .push(TargetHit::new(funcstart, codeaddr, thunkaddr, feature.featuremask));
        Ok(())
    }

    /// `codeaddr` is a thunk jumping to a target: every caller of the thunk
    /// is a hit.
    pub fn resolve_thunk_hit(&mut self, codeaddr: Address, thunkaddr: Address) -> Result<(), AnalysisError> {
        let callers: Vec<Address> = self
            .xrefs
            .to_addr(codeaddr)
            .filter(|(_, flags)| flags.contains(CodeFlags::CALL))
            .map(|(link, _)| link.b)
            .collect();
        for caller in callers {
            self.add_target_hit(caller, thunkaddr)?;
        }
        Ok(())
    }

    /// Nearest call destination strictly below `addr`, taken as the entry
    /// of the function containing it.
    pub fn find_function_start(&self, addr: Address) -> Option<Address> {
        self.xrefs
            .tofrom_before(addr)
            .find(|(_, flags)| flags.contains(CodeFlags::CALL))
            .map(|(link, _)| link.a)
    }
}
