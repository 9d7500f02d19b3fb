use super::unit::CodeFlags;
use super::CodeDataAnalysis;
use crate::Address;

impl CodeDataAnalysis<'_> {
    /// Propagate "not code" from every not-code unit until nothing changes.
    pub fn find_not_code_units(&mut self) {
        self.taintlist = self
            .codeunit
            .iter()
            .filter(|(_, cu)| cu.is_not_code())
            .map(|(&addr, _)| addr)
            .collect();
        while !self.taintlist.is_empty() {
            self.process_taint();
        }
    }

    /// Queue the unit containing `addr` for tainting unless it is already
    /// marked not code.
    pub fn push_taint_address(&mut self, addr: Address) {
        let Some((start, unit)) = self.containing_unit(addr) else {
            return;
        };
        if unit.is_not_code() {
            return;
        }
        self.taintlist.push(start);
    }

    /// Taint the most recently queued unit: mark it, queue the code that
    /// falls into it and every instruction that branches into it, and drop
    /// the edges touching it.
    pub fn process_taint(&mut self) {
        let Some(start) = self.taintlist.pop() else {
            return;
        };
        let Some(unit) = self.codeunit.get_mut(&start) else {
            return;
        };
        unit.flags |= CodeFlags::NOTCODE;
        let end = unit.end(start);

        if let Some((&prev, prevunit)) = self.codeunit.range(..start).next_back() {
            if prevunit.falls_through() && !prevunit.is_not_code() && prevunit.end(prev) == start {
                self.taintlist.push(prev);
            }
        }

        self.xrefs.remove_from_range(start, end);
        for link in self.xrefs.remove_to_range(start, end) {
            self.push_taint_address(link.b);
        }
    }
}
