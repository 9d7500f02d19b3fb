use std::collections::BTreeMap;

use super::unit::{AddrLink, CodeFlags, CodeUnit};
use super::CodeDataAnalysis;
use crate::Address;

impl CodeDataAnalysis<'_> {
    /// Walk every edge destination and repair jumps that land inside an
    /// instruction instead of at its start.
    pub fn find_off_cut(&mut self) {
        let mut cursor: Option<AddrLink> = None;
        while let Some((link, _)) = self.xrefs.next_tofrom_after(cursor) {
            cursor = Some(link);
            let addr = link.a;

            if let Some(unit) = self.codeunit.get(&addr) {
                // a call target that is also fallen into usually means the
                // code before it is misaligned
                if unit.flags.contains(CodeFlags::HIT_BY_FALLTHRU | CodeFlags::HIT_BY_CALL) {
                    if let Some((&prev, _)) = self.codeunit.range(..addr).next_back() {
                        self.check_errant_start(prev);
                    }
                }
                continue;
            }

            let Some((&start, unit)) = self.codeunit.range(..addr).next_back() else {
                continue;
            };
            if unit.end(start) <= addr {
                continue;
            }
            if !self.check_errant_start(start) {
                continue;
            }
            if self.repair_jump(addr, self.config.repair_limit) {
                log::debug!("repaired off-cut jump target 0x{:x} (from 0x{:x})", addr, link.b);
            } else {
                log::trace!("could not repair off-cut target 0x{:x}", addr);
            }
        }
    }

    /// Walk backwards from the unit at `addr` looking for the start of the
    /// fallthrough run containing it. That unit is marked `ERRANTSTART`.
    ///
    /// Fails if a unit reached by a jump or call is met first, or if no
    /// start is found within the scan limit.
    pub fn check_errant_start(&mut self, addr: Address) -> bool {
        let mut found: Option<Address> = None;
        for (&start, unit) in self.codeunit.range(..=addr).rev().take(self.config.errant_scan_limit) {
            if unit.flags.intersects(CodeFlags::HIT_BY_JUMP | CodeFlags::HIT_BY_CALL) {
                return false;
            }
            if !unit.flags.contains(CodeFlags::HIT_BY_FALLTHRU) {
                found = Some(start);
                break;
            }
        }
        match found.and_then(|start| self.codeunit.get_mut(&start)) {
            Some(unit) => {
                unit.flags |= CodeFlags::ERRANTSTART;
                true
            }
            None => false,
        }
    }

    /// Re-disassemble from the off-cut address `addr` until the decode
    /// lands back on an existing unit boundary, decoding at most `max`
    /// instructions. On success the overlapped units are replaced by the
    /// new run and the unit straddling `addr` is cut short and marked not
    /// code. On failure nothing changes.
    pub fn repair_jump(&mut self, addr: Address, max: usize) -> bool {
        let mut codevec: Vec<CodeUnit> = Vec::new();
        let mut fromto_vec: BTreeMap<AddrLink, CodeFlags> = BTreeMap::new();
        let mut curaddr = addr;

        loop {
            let Some((&next, _)) = self.codeunit.range(curaddr..).next() else {
                return false;
            };
            if next == curaddr {
                break;
            }
            if codevec.len() >= max {
                return false;
            }
            let res = self.disengine.disassemble(curaddr);
            if !res.success || res.length == 0 {
                return false;
            }
            if res.flags.contains(CodeFlags::JUMP) {
                if let Some(dest) = res.jumpaddress {
                    fromto_vec.insert(AddrLink::new(curaddr, dest), res.flags);
                }
            }
            codevec.push(CodeUnit::new(res.length, res.flags));
            curaddr = curaddr.saturating_add(res.length);
        }
        if codevec.is_empty() {
            return false;
        }

        self.truncate_straddling(addr);
        self.clear_code_units(addr, curaddr);
        self.commit_code_vec(addr, &codevec, &fromto_vec);
        true
    }

    /// Cut the unit covering `addr` (if it starts earlier) so it ends at
    /// `addr`, demoting it to not code.
    fn truncate_straddling(&mut self, addr: Address) {
        let Some((&start, unit)) = self.codeunit.range_mut(..addr).next_back() else {
            return;
        };
        if unit.end(start) <= addr {
            return;
        }
        unit.size = addr - start;
        unit.flags = CodeFlags::NOTCODE | (unit.flags & CodeFlags::ERRANTSTART);
        self.clear_cross_refs(start, addr);
    }
}
