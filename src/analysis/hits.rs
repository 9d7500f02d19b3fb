use super::unit::CodeFlags;
use super::CodeDataAnalysis;
use crate::Address;

impl CodeDataAnalysis<'_> {
    /// Drop all `HIT_BY_*` bits so the marking passes can run again.
    pub fn clear_hit_by(&mut self) {
        for unit in self.codeunit.values_mut() {
            unit.flags.remove(CodeFlags::HIT_BY_ANY);
        }
    }

    /// Mark each code unit that a preceding code unit falls into.
    pub fn mark_fallthru_hits(&mut self) {
        let mut fallthruaddr: Option<Address> = None;
        for (&addr, unit) in self.codeunit.iter_mut() {
            if unit.is_not_code() {
                continue;
            }
            if fallthruaddr == Some(addr) {
                unit.flags |= CodeFlags::HIT_BY_FALLTHRU;
            }
            if unit.falls_through() {
                fallthruaddr = Some(unit.end(addr));
            }
        }
    }

    /// Mark every edge destination that starts a unit with the kind of the
    /// edge. Calls take precedence over jumps.
    pub fn mark_cross_hits(&mut self) {
        for (link, fromflags) in self.xrefs.tofrom() {
            let Some(unit) = self.codeunit.get_mut(&link.a) else {
                continue;
            };
            if fromflags.contains(CodeFlags::CALL) {
                unit.flags |= CodeFlags::HIT_BY_CALL;
            } else if fromflags.contains(CodeFlags::JUMP) {
                unit.flags |= CodeFlags::HIT_BY_JUMP;
            }
        }
    }
}
