//! Records owned by the classifier: code units, cross-reference keys and
//! target hits.

use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::Address;

bitflags! {
    /// Status bits of a [`CodeUnit`]. Flags combine freely.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct CodeFlags: u32 {
        /// The unit is not (or no longer believed to be) code.
        const NOTCODE         = 1 << 0;
        /// The instruction performs a call.
        const CALL            = 1 << 1;
        /// The instruction has a jump or call edge to another address.
        const JUMP            = 1 << 2;
        /// Execution can continue at the next address.
        const FALLTHRU        = 1 << 3;
        const HIT_BY_FALLTHRU = 1 << 4;
        const HIT_BY_JUMP     = 1 << 5;
        const HIT_BY_CALL     = 1 << 6;
        /// First unit of a run whose alignment looked wrong.
        const ERRANTSTART     = 1 << 7;
        /// The instruction references a registered target.
        const TARGETHIT       = 1 << 8;
        /// The instruction is itself an indirect jump to a registered target.
        const THUNKHIT        = 1 << 9;

        const HIT_BY_ANY = Self::HIT_BY_FALLTHRU.bits() | Self::HIT_BY_JUMP.bits() | Self::HIT_BY_CALL.bits();
    }
}

impl fmt::Display for CodeFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("-");
        }
        let names: Vec<String> = self.iter_names().map(|(name, _)| name.to_lowercase()).collect();
        f.write_str(&names.join("|"))
    }
}

/// One classified span of bytes: an instruction, or a blob of non-code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CodeUnit {
    pub size: u64,
    pub flags: CodeFlags,
}

impl CodeUnit {
    pub fn new(size: u64, flags: CodeFlags) -> Self {
        Self { size, flags }
    }

    pub fn not_code(size: u64) -> Self {
        Self::new(size, CodeFlags::NOTCODE)
    }

    pub fn is_not_code(&self) -> bool {
        self.flags.contains(CodeFlags::NOTCODE)
    }

    pub fn falls_through(&self) -> bool {
        self.flags.contains(CodeFlags::FALLTHRU)
    }

    /// Address one past the unit when it starts at `start`.
    pub fn end(&self, start: Address) -> Address {
        start.saturating_add(self.size)
    }
}

/// Ordered address pair used as a cross-reference key.
///
/// Ordering is lexicographic, so all links sharing a first component are
/// contiguous and `AddrLink::new(a, 0)` is the smallest of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AddrLink {
    pub a: Address,
    pub b: Address,
}

impl AddrLink {
    pub fn new(a: Address, b: Address) -> Self {
        Self { a, b }
    }

    /// Lower bound of all links whose first component is `a`.
    pub fn lower(a: Address) -> Self {
        Self { a, b: 0 }
    }

    pub fn reversed(&self) -> Self {
        Self { a: self.b, b: self.a }
    }
}

impl fmt::Display for AddrLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x} -> 0x{:x}", self.a, self.b)
    }
}

/// A registered thunk of interest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetFeature {
    pub name: String,
    pub featuremask: u32,
}

/// A call site that reaches a registered thunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetHit {
    /// Entry of the function containing the call site, when one is known.
    pub funcstart: Option<Address>,
    pub codeaddr: Address,
    pub thunkaddr: Address,
    pub mask: u32,
}

impl TargetHit {
    pub fn new(funcstart: Option<Address>, codeaddr: Address, thunkaddr: Address, mask: u32) -> Self {
        Self {
            funcstart,
            codeaddr,
            thunkaddr,
            mask,
        }
    }
}
