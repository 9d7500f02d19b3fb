//! Load images: the section list and the bytes behind it.

use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::{Address, Architecture};

bitflags! {
    /// Properties of a section as reported by the container format.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct SectionFlags: u32 {
        /// Not allocated in the address space at run time.
        const UNALLOC  = 1 << 0;
        /// Allocated but carries no file bytes (.bss and friends).
        const NOLOAD   = 1 << 1;
        const READONLY = 1 << 2;
        const CODE     = 1 << 3;
        const DATA     = 1 << 4;
    }
}

/// A section in the binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// Section name
    pub name: String,
    /// Starting address of the section
    pub address: Address,
    /// Size of the section in the address space
    pub size: u64,
    pub flags: SectionFlags,
    /// File bytes backing the section; may be shorter than `size`
    pub data: Vec<u8>,
}

impl Section {
    /// Create a new section
    pub fn new(name: impl Into<String>, address: Address, size: u64, flags: SectionFlags, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            address,
            size,
            flags,
            data,
        }
    }

    /// Get the end address of this section
    pub fn end_address(&self) -> Address {
        self.address.saturating_add(self.size)
    }

    pub fn contains(&self, addr: Address) -> bool {
        addr >= self.address && addr < self.end_address()
    }

    /// Whether the section takes part in a code/data scan.
    pub fn is_scanned(&self) -> bool {
        self.size != 0 && !self.flags.intersects(SectionFlags::UNALLOC | SectionFlags::NOLOAD)
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} 0x{:x}-0x{:x} [{:?}]",
            self.name,
            self.address,
            self.end_address(),
            self.flags
        )
    }
}

/// Read-only view of a loaded program.
pub trait LoadImage {
    /// All sections, in the order the container lists them.
    fn sections(&self) -> &[Section];

    /// Copy bytes starting at `addr` into `buf`. Returns the number of
    /// bytes copied, which is short (possibly zero) when the range runs off
    /// mapped data.
    fn load_fill(&self, buf: &mut [u8], addr: Address) -> usize;
}

/// A parsed program: architecture, entry point, and mapped sections.
#[derive(Debug, Clone)]
pub struct ProgramImage {
    /// Detected architecture
    pub architecture: Architecture,
    /// Entry point address, if available
    pub entry_point: Option<Address>,
    sections: Vec<Section>,
}

impl ProgramImage {
    pub fn new(architecture: Architecture, entry_point: Option<Address>, sections: Vec<Section>) -> Self {
        Self {
            architecture,
            entry_point,
            sections,
        }
    }

    /// Treat a headerless blob as one code section mapped at `base`.
    pub fn raw(architecture: Architecture, bytes: &[u8], base: Address) -> Self {
        let section = Section::new(
            "raw",
            base,
            bytes.len() as u64,
            SectionFlags::CODE,
            bytes.to_vec(),
        );
        Self::new(architecture, None, vec![section])
    }

    /// Find a section by name
    pub fn find_section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    /// Section containing `addr`, if any.
    pub fn section_at(&self, addr: Address) -> Option<&Section> {
        self.sections.iter().find(|s| s.contains(addr))
    }

    /// Get all code sections
    pub fn code_sections(&self) -> Vec<&Section> {
        self.sections.iter().filter(|s| s.flags.contains(SectionFlags::CODE)).collect()
    }
}

impl LoadImage for ProgramImage {
    fn sections(&self) -> &[Section] {
        &self.sections
    }

    fn load_fill(&self, buf: &mut [u8], addr: Address) -> usize {
        let Some(section) = self
            .sections
            .iter()
            .find(|s| !s.flags.intersects(SectionFlags::NOLOAD | SectionFlags::UNALLOC) && s.contains(addr))
        else {
            return 0;
        };
        let start = (addr - section.address) as usize;
        if start >= section.data.len() {
            return 0;
        }
        let count = buf.len().min(section.data.len() - start);
        buf[..count].copy_from_slice(&section.data[start..start + count]);
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_image() -> ProgramImage {
        ProgramImage::new(
            Architecture::X86_64,
            Some(0x1000),
            vec![
                Section::new(".text", 0x1000, 4, SectionFlags::CODE | SectionFlags::READONLY, vec![0x90, 0x90, 0x90, 0xc3]),
                Section::new(".bss", 0x2000, 0x100, SectionFlags::NOLOAD | SectionFlags::DATA, Vec::new()),
                Section::new(".comment", 0, 8, SectionFlags::UNALLOC, b"GCC: 13\0".to_vec()),
            ],
        )
    }

    #[test]
    fn test_load_fill_within_section() {
        let image = sample_image();
        let mut buf = [0u8; 16];
        assert_eq!(image.load_fill(&mut buf, 0x1002), 2);
        assert_eq!(&buf[..2], &[0x90, 0xc3]);
    }

    #[test]
    fn test_load_fill_unmapped() {
        let image = sample_image();
        let mut buf = [0u8; 4];
        assert_eq!(image.load_fill(&mut buf, 0x1004), 0);
        assert_eq!(image.load_fill(&mut buf, 0x2000), 0);
    }

    #[test]
    fn test_load_fill_skips_unallocated_sections() {
        // .comment sits at address 0 and is listed ahead of the code it overlaps
        let image = ProgramImage::new(
            Architecture::X86_64,
            None,
            vec![
                Section::new(".comment", 0, 8, SectionFlags::UNALLOC, b"GCC: 13\0".to_vec()),
                Section::new(".text", 0, 4, SectionFlags::CODE, vec![0x90, 0x90, 0x90, 0xc3]),
            ],
        );
        let mut buf = [0u8; 8];
        assert_eq!(image.load_fill(&mut buf, 0), 4);
        assert_eq!(&buf[..4], &[0x90, 0x90, 0x90, 0xc3]);
        assert_eq!(image.load_fill(&mut buf, 4), 0);
    }

    #[test]
    fn test_scanned_sections() {
        let image = sample_image();
        let scanned: Vec<_> = image.sections().iter().filter(|s| s.is_scanned()).map(|s| s.name.as_str()).collect();
        assert_eq!(scanned, vec![".text"]);
        assert_eq!(image.code_sections().len(), 1);
        assert_eq!(image.section_at(0x2010).map(|s| s.name.as_str()), Some(".bss"));
    }

    #[test]
    fn test_raw_image() {
        let image = ProgramImage::raw(Architecture::X86_32, &[0xc3], 0x400000);
        let text = image.find_section("raw").unwrap();
        assert_eq!(text.address, 0x400000);
        assert_eq!(text.end_address(), 0x400001);
        assert!(text.is_scanned());
    }
}
