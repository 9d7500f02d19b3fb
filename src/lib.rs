//! Code/data boundary recovery for raw executable images.
//!
//! This library linearly disassembles every loaded section of a binary,
//! decides which byte ranges are really code, repairs jumps that land inside
//! other instructions, and reports code that nothing references as well as
//! the call sites that reach registered "target" thunks (for example an
//! imported `exit`).
//!
//! Instruction semantics come from a [`pcode::Translate`] backend; the
//! bundled one is [`decoder::CapstoneTranslator`].
//!
//! # Basic Usage
//!
//! ```rust,no_run
//! use std::fs;
//! use nuclide_codedata::{
//!     analysis::CodeDataAnalysis,
//!     decoder::CapstoneTranslator,
//!     parser::GoblinParser,
//!     BinaryParser, // Import the trait to bring parse() method into scope
//! };
//!
//! // Read binary file
//! let binary_data = fs::read("path/to/binary").unwrap();
//!
//! // Parse the binary format into a load image
//! let image = GoblinParser::new().parse(&binary_data).unwrap();
//!
//! // Create a translator for the detected architecture
//! let trans = CapstoneTranslator::for_architecture(image.architecture, &image).unwrap();
//!
//! let mut analysis = CodeDataAnalysis::new(&trans, &image);
//! analysis.add_target("exit", 0x404018, 1);
//! analysis.run_model().unwrap();
//!
//! for hit in analysis.target_hits() {
//!     println!("0x{:x} reaches 0x{:x}", hit.codeaddr, hit.thunkaddr);
//! }
//! ```

pub mod analysis;
pub mod config;
pub mod decoder;
pub mod format;
pub mod image;
pub mod parser;
pub mod pcode;
pub mod range;
mod large_tests;
#[cfg(test)]
mod testing;
#[cfg(feature = "extension-module")]
pub mod python;

/// Represents an address in memory
pub type Address = u64;

use std::fmt;
use std::str::FromStr;

pub use analysis::{CodeDataAnalysis, CodeFlags, CodeUnit, TargetHit};
pub use config::{AnalysisConfig, ConfigFile, TargetSpec};
pub use image::{LoadImage, ProgramImage, Section, SectionFlags};

/// Maximum instruction size in bytes
pub const MAX_INSTRUCTION_SIZE: usize = 16;

/// Supported architectures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Architecture {
    /// 32-bit x86
    X86_32,
    /// 64-bit x86
    X86_64,
    /// ARM (32-bit)
    Arm,
    /// ARM Thumb mode
    Thumb,
    /// AArch64 (ARM 64-bit)
    AArch64,
    /// MIPS 32-bit
    Mips32,
    /// RISC-V 32-bit
    RiscV32,
    /// RISC-V 64-bit
    RiscV64,
    /// PowerPC 32-bit
    Ppc32,
    /// Unknown architecture
    Unknown,
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Architecture::X86_32 => write!(f, "x86-32"),
            Architecture::X86_64 => write!(f, "x86-64"),
            Architecture::Arm => write!(f, "ARM"),
            Architecture::Thumb => write!(f, "Thumb"),
            Architecture::AArch64 => write!(f, "AArch64"),
            Architecture::Mips32 => write!(f, "MIPS32"),
            Architecture::RiscV32 => write!(f, "RISC-V 32"),
            Architecture::RiscV64 => write!(f, "RISC-V 64"),
            Architecture::Ppc32 => write!(f, "PowerPC 32"),
            Architecture::Unknown => write!(f, "Unknown"),
        }
    }
}

impl FromStr for Architecture {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let arch = match s.to_ascii_lowercase().replace(['-', '_', ' '], "").as_str() {
            "x86" | "x8632" | "i386" => Architecture::X86_32,
            "x64" | "x8664" | "amd64" => Architecture::X86_64,
            "arm" => Architecture::Arm,
            "thumb" => Architecture::Thumb,
            "aarch64" | "arm64" => Architecture::AArch64,
            "mips" | "mips32" => Architecture::Mips32,
            "riscv32" => Architecture::RiscV32,
            "riscv64" => Architecture::RiscV64,
            "ppc" | "ppc32" | "powerpc32" => Architecture::Ppc32,
            _ => return Err(AnalysisError::Config(format!("unknown architecture '{}'", s))),
        };
        Ok(arch)
    }
}

/// Parser trait: turn raw bytes into a [`ProgramImage`].
pub trait BinaryParser: Send + Sync {
    /// Parse binary data into a load image
    ///
    /// # Arguments
    /// * `data` - The binary data to parse
    ///
    /// # Returns
    /// Result containing the ProgramImage if parsing was successful
    fn parse(&self, data: &[u8]) -> Result<ProgramImage, AnalysisError>;
}

/// Error type for analysis operations
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    /// A target hit referenced an address with no registered feature
    #[error("No target feature registered at 0x{0:x}")]
    MissingTargetFeature(Address),

    /// Failed to parse binary format
    #[error("Failed to parse binary format: {0}")]
    ParsingError(String),

    /// Decoder error
    #[error("Decoder error: {0}")]
    DecoderError(String),

    /// Unsupported architecture
    #[error("Unsupported architecture: {0}")]
    UnsupportedArchitecture(Architecture),

    /// Bad configuration value or file
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Generic(String),
}
