use std::collections::BTreeMap;

use super::unit::{AddrLink, CodeFlags, CodeUnit};
use super::CodeDataAnalysis;
use crate::range::{AddrRange, RangeList};
use crate::Address;

impl CodeDataAnalysis<'_> {
    /// Start of the next unit at or after `addr`, or `end` when no unit
    /// starts inside the range. The flag reports whether `end` was used.
    fn next_boundary(&self, addr: Address, end: Address) -> (Address, bool) {
        match self.codeunit.range(addr..).next() {
            Some((&start, _)) if start <= end => (start, false),
            _ => (end, true),
        }
    }

    /// Linearly disassemble from `addr` until the run terminates, lands on
    /// an existing unit, or runs into the end of the range at `end`.
    ///
    /// A run that terminates cleanly is committed with its edges. A run that
    /// fails becomes a single not-code unit: one byte when it was short and
    /// did not flow into known non-code, the whole span otherwise. Returns
    /// the address where disassembly should resume.
    pub fn disassemble_block(&mut self, addr: Address, end: Address) -> Address {
        if addr >= end {
            return addr;
        }
        if let Some((start, unit)) = self.containing_unit(addr) {
            if start != addr || !unit.is_not_code() || unit.size != 1 {
                return unit.end(start);
            }
            // stale one-byte guess, decode over it
            self.codeunit.remove(&addr);
        }

        let (mut lastaddr, mut hardend) = self.next_boundary(addr, end);
        let mut codevec: Vec<CodeUnit> = Vec::new();
        let mut fromto_vec: BTreeMap<AddrLink, CodeFlags> = BTreeMap::new();
        let mut curaddr = addr;
        let mut flowin = false;

        loop {
            let res = self.disengine.disassemble(curaddr);
            if !res.success || res.length == 0 {
                curaddr = curaddr.saturating_add(1);
                break;
            }
            if res.flags.contains(CodeFlags::JUMP) {
                if let Some(dest) = res.jumpaddress {
                    fromto_vec.insert(AddrLink::new(curaddr, dest), res.flags);
                }
            }
            codevec.push(CodeUnit::new(res.length, res.flags));
            curaddr = curaddr.saturating_add(res.length);

            let mut collided = false;
            while lastaddr < curaddr {
                if hardend {
                    collided = true;
                    break;
                }
                let next = self.codeunit.get(&lastaddr).copied().unwrap_or_default();
                if next.is_not_code() && next.size == 1 {
                    self.codeunit.remove(&lastaddr);
                    (lastaddr, hardend) = self.next_boundary(lastaddr, end);
                } else {
                    flowin = next.is_not_code();
                    collided = true;
                    break;
                }
            }
            if collided {
                break;
            }

            if curaddr == lastaddr && !hardend && res.flags.contains(CodeFlags::FALLTHRU) {
                if let Some(next) = self.codeunit.get(&lastaddr).copied().filter(|cu| cu.is_not_code()) {
                    if next.size != 1 {
                        flowin = true;
                        break;
                    }
                    self.codeunit.remove(&lastaddr);
                    (lastaddr, hardend) = self.next_boundary(lastaddr, end);
                }
            }
            if !res.flags.contains(CodeFlags::FALLTHRU) || curaddr == lastaddr {
                return self.commit_code_vec(addr, &codevec, &fromto_vec);
            }
        }

        if lastaddr < curaddr {
            curaddr = lastaddr;
        }
        let mut wholesize = curaddr.saturating_sub(addr).max(1);
        if !flowin && wholesize < self.config.small_run_threshold {
            wholesize = 1;
        }
        log::trace!(
            "run at 0x{:x} failed after {} bytes (flowin: {}), marking {} byte(s) not code",
            addr,
            curaddr - addr,
            flowin,
            wholesize
        );
        self.codeunit.insert(addr, CodeUnit::not_code(wholesize));
        addr.saturating_add(wholesize)
    }

    /// Store a decoded run contiguously from `addr` along with its pending
    /// edges. Returns the address one past the last unit.
    pub fn commit_code_vec(
        &mut self,
        addr: Address,
        codevec: &[CodeUnit],
        fromto_vec: &BTreeMap<AddrLink, CodeFlags>,
    ) -> Address {
        let mut curaddr = addr;
        for unit in codevec {
            self.codeunit.insert(curaddr, *unit);
            curaddr = curaddr.saturating_add(unit.size);
        }
        for (link, flags) in fromto_vec {
            self.xrefs.insert(link.a, link.b, *flags);
        }
        curaddr
    }

    /// Remove every unit starting in `[addr, endaddr)` and its outgoing edges.
    pub fn clear_code_units(&mut self, addr: Address, endaddr: Address) {
        if addr >= endaddr {
            return;
        }
        let starts: Vec<Address> = self.codeunit.range(addr..endaddr).map(|(&start, _)| start).collect();
        for start in starts {
            self.codeunit.remove(&start);
        }
        self.clear_cross_refs(addr, endaddr);
    }

    /// Remove every edge whose source lies in `[addr, endaddr)`.
    pub fn clear_cross_refs(&mut self, addr: Address, endaddr: Address) {
        if addr >= endaddr {
            return;
        }
        self.xrefs.remove_from_range(addr, endaddr);
    }

    pub fn disassemble_range(&mut self, range: AddrRange) {
        let mut addr = range.start;
        while addr < range.end {
            addr = self.disassemble_block(addr, range.end);
        }
    }

    pub fn disassemble_range_list(&mut self, rangelist: &RangeList) {
        for range in rangelist.iter() {
            log::debug!("disassembling {}", range);
            self.disassemble_range(range);
        }
    }
}
