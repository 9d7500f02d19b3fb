//! Goblin-based multi-format binary parser.

use std::fmt;
use std::fs;
use std::path::Path;

use goblin::elf::section_header::{SHF_ALLOC, SHF_EXECINSTR, SHF_WRITE, SHT_NOBITS};
use goblin::mach::constants::{
    cputype, SECTION_TYPE, S_ATTR_PURE_INSTRUCTIONS, S_ATTR_SOME_INSTRUCTIONS, S_ZEROFILL,
};
use goblin::mach::{Mach, MachO};
use goblin::pe::section_table::{
    IMAGE_SCN_CNT_CODE, IMAGE_SCN_CNT_UNINITIALIZED_DATA, IMAGE_SCN_MEM_EXECUTE, IMAGE_SCN_MEM_WRITE,
};
use goblin::{elf, pe, Object};

use crate::image::{LoadImage, ProgramImage, Section, SectionFlags};
use crate::{Address, AnalysisError, Architecture, BinaryParser};

/// A parser that handles ELF, PE, and Mach-O via Goblin.
#[derive(Debug, Default)]
pub struct GoblinParser;

/// Bytes of `img` at `[offset, offset + len)`, clipped to the file.
fn file_bytes(img: &[u8], offset: u64, len: u64) -> Vec<u8> {
    let start = (offset as usize).min(img.len());
    let end = (offset.saturating_add(len) as usize).min(img.len());
    img[start..end].to_vec()
}

impl GoblinParser {
    /// Construct a new GoblinParser.
    pub fn new() -> Self {
        GoblinParser
    }

    /// Read and parse a file from disk.
    pub fn parse_file(&self, path: &Path) -> Result<ProgramImage, AnalysisError> {
        let data = fs::read(path)?;
        log::debug!("read {} bytes from {}", data.len(), path.display());
        self.parse(&data)
    }

    /// Parse an ELF image.
    fn parse_elf(&self, elf: elf::Elf, img: &[u8]) -> Result<ProgramImage, AnalysisError> {
        let arch = match elf.header.e_machine {
            elf::header::EM_386 => Architecture::X86_32,
            elf::header::EM_X86_64 => Architecture::X86_64,
            elf::header::EM_ARM => Architecture::Arm,
            elf::header::EM_AARCH64 => Architecture::AArch64,
            elf::header::EM_MIPS => Architecture::Mips32,
            elf::header::EM_PPC => Architecture::Ppc32,
            elf::header::EM_RISCV => {
                // Determine RISC-V bitness from ELF class
                match elf.header.e_ident[elf::header::EI_CLASS] {
                    elf::header::ELFCLASS32 => Architecture::RiscV32,
                    elf::header::ELFCLASS64 => Architecture::RiscV64,
                    _ => Architecture::Unknown,
                }
            }
            _ => Architecture::Unknown,
        };

        let mut sections = Vec::new();
        for sh in &elf.section_headers {
            if sh.sh_size == 0 {
                continue;
            }
            let name = elf.shdr_strtab.get_at(sh.sh_name).unwrap_or("");
            let mut flags = SectionFlags::empty();
            if sh.sh_flags & SHF_ALLOC as u64 == 0 {
                flags |= SectionFlags::UNALLOC;
            }
            if sh.sh_type == SHT_NOBITS {
                flags |= SectionFlags::NOLOAD;
            }
            if sh.sh_flags & SHF_EXECINSTR as u64 != 0 {
                flags |= SectionFlags::CODE;
            } else {
                flags |= SectionFlags::DATA;
            }
            if sh.sh_flags & SHF_WRITE as u64 == 0 {
                flags |= SectionFlags::READONLY;
            }
            let data = if sh.sh_type == SHT_NOBITS {
                Vec::new()
            } else {
                file_bytes(img, sh.sh_offset, sh.sh_size)
            };
            sections.push(Section::new(name, sh.sh_addr, sh.sh_size, flags, data));
        }

        Ok(ProgramImage::new(arch, Some(elf.entry), sections))
    }

    /// Parse a PE image. Section addresses are rebased onto the image base.
    fn parse_pe(&self, pe: pe::PE<'_>, img: &[u8]) -> Result<ProgramImage, AnalysisError> {
        let arch = match pe.header.coff_header.machine {
            pe::header::COFF_MACHINE_X86 => Architecture::X86_32,
            pe::header::COFF_MACHINE_X86_64 => Architecture::X86_64,
            pe::header::COFF_MACHINE_ARM => Architecture::Arm,
            pe::header::COFF_MACHINE_ARM64 => Architecture::AArch64,
            _ => Architecture::Unknown,
        };
        let image_base = pe.image_base as Address;

        let mut sections = Vec::new();
        for sect in &pe.sections {
            let name = sect.name().unwrap_or("").to_string();
            let size = if sect.virtual_size != 0 {
                sect.virtual_size
            } else {
                sect.size_of_raw_data
            } as u64;
            if size == 0 {
                continue;
            }
            let chars = sect.characteristics;
            let mut flags = SectionFlags::empty();
            if chars & (IMAGE_SCN_MEM_EXECUTE | IMAGE_SCN_CNT_CODE) != 0 {
                flags |= SectionFlags::CODE;
            } else {
                flags |= SectionFlags::DATA;
            }
            if chars & IMAGE_SCN_CNT_UNINITIALIZED_DATA != 0 && sect.size_of_raw_data == 0 {
                flags |= SectionFlags::NOLOAD;
            }
            if chars & IMAGE_SCN_MEM_WRITE == 0 {
                flags |= SectionFlags::READONLY;
            }
            let rawlen = size.min(sect.size_of_raw_data as u64);
            let data = file_bytes(img, sect.pointer_to_raw_data as u64, rawlen);
            sections.push(Section::new(
                name,
                image_base + sect.virtual_address as Address,
                size,
                flags,
                data,
            ));
        }

        let entry = image_base + pe.entry as Address;
        Ok(ProgramImage::new(arch, Some(entry), sections))
    }

    /// Parse a Mach-O binary
    fn parse_macho(&self, macho: &MachO) -> Result<ProgramImage, AnalysisError> {
        let arch = match macho.header.cputype {
            cputype::CPU_TYPE_I386 => Architecture::X86_32,
            cputype::CPU_TYPE_X86_64 => Architecture::X86_64,
            cputype::CPU_TYPE_ARM => Architecture::Arm,
            cputype::CPU_TYPE_ARM64 => Architecture::AArch64,
            _ => Architecture::Unknown,
        };

        let mut sections = Vec::new();
        for segment in &macho.segments {
            let segsections = segment
                .sections()
                .map_err(|e| AnalysisError::ParsingError(e.to_string()))?;
            for (sect, data) in segsections {
                if sect.size == 0 {
                    continue;
                }
                let name = format!(
                    "{},{}",
                    sect.segname().unwrap_or(""),
                    sect.name().unwrap_or("")
                );
                let mut flags = SectionFlags::empty();
                if sect.flags & (S_ATTR_PURE_INSTRUCTIONS | S_ATTR_SOME_INSTRUCTIONS) != 0 {
                    flags |= SectionFlags::CODE;
                } else {
                    flags |= SectionFlags::DATA;
                }
                if sect.flags & SECTION_TYPE == S_ZEROFILL {
                    flags |= SectionFlags::NOLOAD;
                }
                // VM_PROT_WRITE
                if segment.initprot & 0x2 == 0 {
                    flags |= SectionFlags::READONLY;
                }
                sections.push(Section::new(name, sect.addr, sect.size, flags, data.to_vec()));
            }
        }

        Ok(ProgramImage::new(arch, Some(macho.entry), sections))
    }

    /// Parse a Mach-O image.
    fn parse_mach(&self, m: Mach<'_>) -> Result<ProgramImage, AnalysisError> {
        match m {
            Mach::Binary(binary) => self.parse_macho(&binary),
            Mach::Fat(_) => Err(AnalysisError::ParsingError(
                "fat Mach-O binaries are not supported; extract one slice first".into(),
            )),
        }
    }
}

impl fmt::Display for GoblinParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GoblinParser")
    }
}

impl BinaryParser for GoblinParser {
    fn parse(&self, data: &[u8]) -> Result<ProgramImage, AnalysisError> {
        let image = match Object::parse(data) {
            Ok(Object::Elf(elf)) => self.parse_elf(elf, data)?,
            Ok(Object::PE(pe)) => self.parse_pe(pe, data)?,
            Ok(Object::Mach(m)) => self.parse_mach(m)?,
            Ok(_) => return Err(AnalysisError::ParsingError("Unsupported file format".into())),
            Err(e) => return Err(AnalysisError::ParsingError(e.to_string())),
        };
        if image.architecture == Architecture::Unknown {
            log::warn!("could not determine the architecture of the image");
        }
        for section in image.sections() {
            log::debug!("section {}", section);
        }
        Ok(image)
    }
}
