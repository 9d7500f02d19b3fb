//! Code/data classification over a partially disassembled address space.
//!
//! [`CodeDataAnalysis`] linearly disassembles every loaded section, then
//! spreads a "not code" taint backwards along fallthrough and branch edges,
//! repairs jumps that land inside another instruction, and finally reports
//! code that nothing references along with call sites that reach
//! registered target thunks.
//!
//! The pipeline is split across submodules, each adding methods to
//! [`CodeDataAnalysis`]:
//!
//! * `block` - linear block disassembly and committing units/edges
//! * `taint` - the "not code" fixed point
//! * `hits` - fallthrough/jump/call hit marking
//! * `offcut` - detection and repair of misaligned jump targets
//! * `targets` - unlinked starts and target-thunk discovery

use std::collections::BTreeMap;
use std::time::Instant;

mod block;
pub mod engine;
mod hits;
mod offcut;
mod taint;
mod targets;
pub mod unit;
pub mod xref;

pub use engine::{DisassemblyEngine, DisassemblyResult};
pub use unit::{AddrLink, CodeFlags, CodeUnit, TargetFeature, TargetHit};
pub use xref::CrossRefs;

use crate::config::AnalysisConfig;
use crate::image::LoadImage;
use crate::pcode::Translate;
use crate::range::RangeList;
use crate::{Address, AnalysisError};

/// Orchestrator and owner of all classification state.
pub struct CodeDataAnalysis<'a> {
    loader: &'a dyn LoadImage,
    disengine: DisassemblyEngine<'a>,
    config: AnalysisConfig,
    modelhits: RangeList,
    codeunit: BTreeMap<Address, CodeUnit>,
    xrefs: CrossRefs,
    taintlist: Vec<Address>,
    unlinkedstarts: Vec<Address>,
    targets: BTreeMap<Address, TargetFeature>,
    targethits: Vec<TargetHit>,
}

impl<'a> CodeDataAnalysis<'a> {
    pub fn new(trans: &'a dyn Translate, loader: &'a dyn LoadImage) -> Self {
        Self::with_config(trans, loader, AnalysisConfig::default())
    }

    pub fn with_config(trans: &'a dyn Translate, loader: &'a dyn LoadImage, config: AnalysisConfig) -> Self {
        Self {
            loader,
            disengine: DisassemblyEngine::new(trans),
            config,
            modelhits: RangeList::new(),
            codeunit: BTreeMap::new(),
            xrefs: CrossRefs::new(),
            taintlist: Vec::new(),
            unlinkedstarts: Vec::new(),
            targets: BTreeMap::new(),
            targethits: Vec::new(),
        }
    }

    /// Reset every piece of state and bind to a new program.
    pub fn init(&mut self, trans: &'a dyn Translate, loader: &'a dyn LoadImage) {
        self.loader = loader;
        self.disengine.init(trans);
        self.modelhits.clear();
        self.codeunit.clear();
        self.xrefs.clear();
        self.taintlist.clear();
        self.unlinkedstarts.clear();
        self.targets.clear();
        self.targethits.clear();
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: AnalysisConfig) {
        self.config = config;
    }

    /// Register a thunk of interest. Must happen before [`run_model`](Self::run_model).
    pub fn add_target(&mut self, name: impl Into<String>, addr: Address, mask: u32) {
        let name = name.into();
        log::debug!("registering target {} at 0x{:x} (mask 0x{:x})", name, addr, mask);
        self.targets.insert(addr, TargetFeature { name, featuremask: mask });
        self.disengine.add_target(addr);
    }

    /// Run the full classification pipeline over the loaded sections.
    pub fn run_model(&mut self) -> Result<(), AnalysisError> {
        let started = Instant::now();

        let mut lastaddr: Option<Address> = None;
        for section in self.loader.sections() {
            if section.size == 0 {
                continue;
            }
            let endaddr = section.end_address();
            lastaddr = Some(lastaddr.map_or(endaddr, |last| last.max(endaddr)));
            if section.is_scanned() {
                self.modelhits.insert_range(section.address, endaddr);
            }
        }
        log::info!(
            "scanning {} bytes in {} range(s): {}",
            self.modelhits.total_size(),
            self.modelhits.len(),
            self.modelhits
        );

        if let Some(lastaddr) = lastaddr {
            self.codeunit.insert(lastaddr, CodeUnit::not_code(self.config.sentinel_size));
        }

        let ranges = self.modelhits.clone();
        self.disassemble_range_list(&ranges);
        log::debug!(
            "linear pass: {} units, {} cross references",
            self.codeunit.len(),
            self.xrefs.len()
        );

        self.find_not_code_units();
        log::debug!(
            "taint pass: {} units marked not code",
            self.codeunit.values().filter(|cu| cu.is_not_code()).count()
        );

        self.mark_fallthru_hits();
        self.mark_cross_hits();
        self.find_off_cut();

        self.clear_hit_by();
        self.mark_fallthru_hits();
        self.mark_cross_hits();

        self.find_unlinked()?;
        self.targethits.sort_by_key(|hit| hit.funcstart);

        log::info!(
            "analysis complete in {:?}: {} units, {} cross references, {} unlinked starts, {} target hits",
            started.elapsed(),
            self.codeunit.len(),
            self.xrefs.len(),
            self.unlinkedstarts.len(),
            self.targethits.len()
        );
        Ok(())
    }

    /// Ranges of the sections that were scanned.
    pub fn model_hits(&self) -> &RangeList {
        &self.modelhits
    }

    pub fn cross_refs(&self) -> &CrossRefs {
        &self.xrefs
    }

    /// Outgoing edges of the instruction at `addr` as (destination, flags).
    pub fn cross_refs_from(&self, addr: Address) -> Vec<(Address, CodeFlags)> {
        self.xrefs
            .from_range(addr, addr.saturating_add(1))
            .map(|(link, flags)| (link.b, flags))
            .collect()
    }

    /// Incoming edges to `addr` as (source, flags).
    pub fn cross_refs_to(&self, addr: Address) -> Vec<(Address, CodeFlags)> {
        self.xrefs.to_addr(addr).map(|(link, flags)| (link.b, flags)).collect()
    }

    pub fn unlinked_starts(&self) -> &[Address] {
        &self.unlinkedstarts
    }

    pub fn target_hits(&self) -> &[TargetHit] {
        &self.targethits
    }

    pub fn targets(&self) -> &BTreeMap<Address, TargetFeature> {
        &self.targets
    }

    pub fn code_unit(&self, addr: Address) -> Option<&CodeUnit> {
        self.codeunit.get(&addr)
    }

    pub fn code_units(&self) -> impl Iterator<Item = (Address, &CodeUnit)> + '_ {
        self.codeunit.iter().map(|(&addr, cu)| (addr, cu))
    }

    /// The unit whose span covers `addr`, with its start address.
    pub fn containing_unit(&self, addr: Address) -> Option<(Address, CodeUnit)> {
        self.codeunit
            .range(..=addr)
            .next_back()
            .filter(|(&start, cu)| addr < cu.end(start))
            .map(|(&start, &cu)| (start, cu))
    }

    /// Structural self-check: the two cross-reference indices mirror each other.
    pub fn check_mirror(&self) -> bool {
        self.xrefs.is_mirrored()
    }

    pub(crate) fn engine(&self) -> &DisassemblyEngine<'a> {
        &self.disengine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{ProgramImage, Section, SectionFlags};
    use crate::testing::{Op, ScriptedTranslator};
    use crate::Architecture;

    fn image(sections: Vec<Section>) -> ProgramImage {
        ProgramImage::new(Architecture::Unknown, None, sections)
    }

    fn code(address: Address, size: u64) -> Section {
        Section::new(".text", address, size, SectionFlags::CODE, vec![0; size as usize])
    }

    /// Every byte of every scanned range lies in exactly one unit.
    fn assert_coverage(analysis: &CodeDataAnalysis<'_>) {
        for range in analysis.model_hits().iter() {
            let mut addr = range.start;
            while addr < range.end {
                let unit = analysis
                    .code_unit(addr)
                    .unwrap_or_else(|| panic!("no unit starts at 0x{:x}", addr));
                assert!(unit.size > 0);
                addr += unit.size;
            }
            assert_eq!(addr, range.end, "unit overruns range end");
        }
    }

    #[test]
    fn test_fallthru_then_return() {
        let trans = ScriptedTranslator::new()
            .plain(0x1000, 5)
            .insn(0x1005, 1, vec![Op::ret()]);
        let img = image(vec![code(0x1000, 6)]);
        let mut analysis = CodeDataAnalysis::new(&trans, &img);
        analysis.run_model().unwrap();

        let first = analysis.code_unit(0x1000).unwrap();
        assert_eq!(first.size, 5);
        assert!(first.falls_through());
        assert!(!first.flags.contains(CodeFlags::HIT_BY_FALLTHRU));
        let second = analysis.code_unit(0x1005).unwrap();
        assert_eq!(second.size, 1);
        assert!(second.flags.contains(CodeFlags::HIT_BY_FALLTHRU));
        assert!(!second.flags.intersects(CodeFlags::JUMP | CodeFlags::CALL));
        assert!(analysis.cross_refs().is_empty());
        assert_eq!(analysis.unlinked_starts(), &[0x1000]);
        assert_coverage(&analysis);
    }

    #[test]
    fn test_call_to_later_code() {
        let trans = ScriptedTranslator::new()
            .insn(0x1000, 5, vec![Op::call(0x1014)])
            .insn(0x1005, 1, vec![Op::ret()])
            .plain_run(0x1006, 0x1014, 2)
            .insn(0x1014, 1, vec![Op::ret()]);
        let img = image(vec![code(0x1000, 0x15)]);
        let mut analysis = CodeDataAnalysis::new(&trans, &img);
        analysis.run_model().unwrap();

        let flags = analysis.cross_refs().get(0x1000, 0x1014).unwrap();
        assert!(flags.contains(CodeFlags::CALL));
        assert_eq!(analysis.cross_refs_to(0x1014), vec![(0x1000, flags)]);
        assert!(analysis.check_mirror());
        assert!(analysis
            .code_unit(0x1014)
            .unwrap()
            .flags
            .contains(CodeFlags::HIT_BY_CALL));
        assert_coverage(&analysis);
    }

    #[test]
    fn test_image_at_top_of_address_space() {
        let base = u64::MAX - 3;
        let trans = ScriptedTranslator::new().plain(base, 2).plain(base + 2, 1);
        let img = ProgramImage::raw(Architecture::Unknown, &[0; 4], base);
        let mut analysis = CodeDataAnalysis::new(&trans, &img);
        analysis.run_model().unwrap();

        // the run falls into the sentinel at the saturated end
        assert_eq!(analysis.code_unit(base), Some(&CodeUnit::not_code(3)));
        assert!(analysis.code_unit(u64::MAX).unwrap().is_not_code());
        assert_eq!(analysis.containing_unit(base + 2).map(|(start, _)| start), Some(base));
        assert!(analysis.cross_refs_from(u64::MAX).is_empty());
        assert!(analysis.check_mirror());
    }

    #[test]
    fn test_failed_short_run_collapses() {
        let trans = ScriptedTranslator::new()
            .plain_run(0x1000, 0x1008, 2)
            .bad(0x1008);
        let img = image(vec![code(0x1000, 0x10)]);
        let mut analysis = CodeDataAnalysis::new(&trans, &img);
        let next = analysis.disassemble_block(0x1000, 0x1010);

        assert_eq!(next, 0x1001);
        let unit = analysis.code_unit(0x1000).unwrap();
        assert_eq!(*unit, CodeUnit::not_code(1));
        assert_eq!(analysis.code_units().count(), 1);
    }

    #[test]
    fn test_taint_spreads_over_fallthru_and_edges() {
        // 0x1000 plain, 0x1002 jumps into a long failed run at 0x1004..0x1011
        let trans = ScriptedTranslator::new()
            .plain(0x1000, 2)
            .insn(0x1002, 2, vec![Op::branch(0x1008)])
            .plain_run(0x1004, 0x1010, 2)
            .bad(0x1010)
            .insn(0x1011, 1, vec![Op::ret()]);
        let img = image(vec![code(0x1000, 0x12)]);
        let mut analysis = CodeDataAnalysis::new(&trans, &img);
        analysis.run_model().unwrap();

        assert_eq!(*analysis.code_unit(0x1004).unwrap(), CodeUnit::not_code(13));
        // the jump lands in non-code, which taints it and what falls into it
        assert!(analysis.code_unit(0x1002).unwrap().is_not_code());
        assert!(analysis.code_unit(0x1000).unwrap().is_not_code());
        assert!(!analysis.code_unit(0x1011).unwrap().is_not_code());
        assert!(analysis.cross_refs().is_empty());
        assert!(analysis.check_mirror());
        assert_eq!(analysis.unlinked_starts(), &[0x1011]);
        assert_coverage(&analysis);
    }

    #[test]
    fn test_unscanned_sections_are_skipped() {
        let trans = ScriptedTranslator::new().insn(0x1000, 1, vec![Op::ret()]);
        let img = image(vec![
            code(0x1000, 1),
            Section::new(".bss", 0x3000, 0x100, SectionFlags::NOLOAD, Vec::new()),
            Section::new(".debug", 0, 0x40, SectionFlags::UNALLOC, vec![0; 0x40]),
        ]);
        let mut analysis = CodeDataAnalysis::new(&trans, &img);
        analysis.run_model().unwrap();

        assert_eq!(analysis.model_hits().len(), 1);
        // sentinel past the highest section end
        let sentinel = analysis.code_unit(0x3100).unwrap();
        assert_eq!(*sentinel, CodeUnit::not_code(100));
        assert!(analysis.code_unit(0x1000).is_some());
    }

    #[test]
    fn test_init_resets_everything() {
        let trans = ScriptedTranslator::new().insn(0x1000, 1, vec![Op::ret()]);
        let img = image(vec![code(0x1000, 1)]);
        let mut analysis = CodeDataAnalysis::new(&trans, &img);
        analysis.add_target("exit", 0x9000, 1);
        analysis.run_model().unwrap();
        assert!(analysis.code_units().count() > 0);

        analysis.init(&trans, &img);
        assert_eq!(analysis.code_units().count(), 0);
        assert!(analysis.model_hits().is_empty());
        assert!(analysis.targets().is_empty());
        assert!(!analysis.engine().has_target(0x9000));
        assert!(analysis.unlinked_starts().is_empty());
    }
}
