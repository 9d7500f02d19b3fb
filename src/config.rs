//! Analysis tunables and target-thunk configuration.

use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::{Address, AnalysisError};

/// Heuristic limits used by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// A failed run shorter than this many bytes that did not flow into an
    /// existing block collapses to a single `notcode` byte.
    pub small_run_threshold: u64,
    /// Maximum number of units `check_errant_start` walks backwards.
    pub errant_scan_limit: usize,
    /// Instruction budget for re-synchronising an off-cut jump.
    pub repair_limit: usize,
    /// Size of the `notcode` unit placed past the highest section.
    pub sentinel_size: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            small_run_threshold: 10,
            errant_scan_limit: 1000,
            repair_limit: 10,
            sentinel_size: 100,
        }
    }
}

/// A thunk address of interest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSpec {
    pub name: String,
    #[serde(deserialize_with = "deserialize_address")]
    pub address: Address,
    #[serde(default = "default_mask")]
    pub mask: u32,
}

fn default_mask() -> u32 {
    1
}

impl FromStr for TargetSpec {
    type Err = AnalysisError;

    /// Parse `NAME=ADDR` or `NAME=ADDR:MASK`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, rest) = s
            .split_once('=')
            .ok_or_else(|| AnalysisError::Config(format!("expected NAME=ADDR[:MASK], got '{}'", s)))?;
        if name.is_empty() {
            return Err(AnalysisError::Config(format!("empty target name in '{}'", s)));
        }
        let (addr, mask) = match rest.split_once(':') {
            Some((addr, mask)) => {
                let value = parse_number(mask)?;
                let mask = u32::try_from(value)
                    .map_err(|_| AnalysisError::Config(format!("mask 0x{:x} does not fit in 32 bits", value)))?;
                (addr, mask)
            }
            None => (rest, default_mask()),
        };
        Ok(TargetSpec {
            name: name.to_string(),
            address: parse_number(addr)?,
            mask,
        })
    }
}

/// Parse a decimal or `0x`-prefixed hexadecimal number.
pub fn parse_number(text: &str) -> Result<u64, AnalysisError> {
    let text = text.trim();
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => text.parse::<u64>(),
    };
    parsed.map_err(|e| AnalysisError::Config(format!("invalid number '{}': {}", text, e)))
}

fn deserialize_address<'de, D>(deserializer: D) -> Result<Address, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(u64),
        Text(String),
    }

    match Repr::deserialize(deserializer)? {
        Repr::Number(n) => Ok(n),
        Repr::Text(s) => parse_number(&s).map_err(serde::de::Error::custom),
    }
}

/// Contents of a JSON configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub analysis: AnalysisConfig,
    pub targets: Vec<TargetSpec>,
}

impl ConfigFile {
    pub fn from_json(text: &str) -> Result<Self, AnalysisError> {
        serde_json::from_str(text).map_err(|e| AnalysisError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, AnalysisError> {
        let text = std::fs::read_to_string(path)?;
        log::debug!("loaded configuration from {}", path.display());
        Self::from_json(&text)
    }
}
