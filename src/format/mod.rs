//! Output format module implementation

mod csv;
mod json;

pub use self::csv::*;
pub use self::json::*;

use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::analysis::CodeDataAnalysis;
use crate::{Address, AnalysisError};

/// Supported output formats for analysis reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Plain text output (default)
    Text,
    /// JSON format (hierarchical)
    Json,
    /// JSON Lines format (one JSON object per line)
    JsonLines,
    /// CSV format (comma-separated values)
    Csv,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::JsonLines => write!(f, "jsonl"),
            OutputFormat::Csv => write!(f, "csv"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "jsonl" | "jsonlines" | "json-lines" => Ok(OutputFormat::JsonLines),
            "csv" => Ok(OutputFormat::Csv),
            _ => Err(format!("Unknown output format: {}", s)),
        }
    }
}

impl OutputFormat {
    /// Get all available output formats
    pub fn available_formats() -> &'static [Self] {
        &[
            OutputFormat::Text,
            OutputFormat::Json,
            OutputFormat::JsonLines,
            OutputFormat::Csv,
        ]
    }

    /// Get a formatter for this output format
    pub fn get_formatter(&self) -> Box<dyn ReportFormatter> {
        match self {
            OutputFormat::Text => Box::new(TextFormatter),
            OutputFormat::Json => Box::new(JsonFormatter),
            OutputFormat::JsonLines => Box::new(JsonLinesFormatter),
            OutputFormat::Csv => Box::new(CsvFormatter),
        }
    }
}

/// Sections a report can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum ReportPart {
    /// Address ranges that were scanned
    ModelHits,
    /// Jump and call edges
    Xrefs,
    /// Code nothing references
    Unlinked,
    /// Call sites reaching registered targets
    TargetHits,
}

impl ReportPart {
    pub fn all() -> &'static [Self] {
        &[
            ReportPart::ModelHits,
            ReportPart::Xrefs,
            ReportPart::Unlinked,
            ReportPart::TargetHits,
        ]
    }
}

pub(crate) fn hex(addr: Address) -> String {
    format!("0x{:x}", addr)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeRow {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XrefRow {
    pub from: String,
    pub to: String,
    pub flags: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetHitRow {
    /// Empty when the containing function is unknown
    pub funcstart: Option<String>,
    pub codeaddr: String,
    pub thunk: String,
    pub thunkaddr: String,
    pub mask: u32,
}

/// Snapshot of an analysis, rendered by a [`ReportFormatter`].
///
/// Parts that were not selected are `None` and left out of the output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modelhits: Option<Vec<RangeRow>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xrefs: Option<Vec<XrefRow>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unlinked: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub targethits: Option<Vec<TargetHitRow>>,
}

impl AnalysisReport {
    /// Collect the selected parts from a finished analysis.
    pub fn from_analysis(analysis: &CodeDataAnalysis<'_>, parts: &[ReportPart]) -> Self {
        let mut report = AnalysisReport::default();
        if parts.contains(&ReportPart::ModelHits) {
            report.modelhits = Some(
                analysis
                    .model_hits()
                    .iter()
                    .map(|r| RangeRow {
                        start: hex(r.start),
                        end: hex(r.end),
                    })
                    .collect(),
            );
        }
        if parts.contains(&ReportPart::Xrefs) {
            report.xrefs = Some(
                analysis
                    .cross_refs()
                    .fromto()
                    .map(|(link, flags)| XrefRow {
                        from: hex(link.a),
                        to: hex(link.b),
                        flags: flags.to_string(),
                    })
                    .collect(),
            );
        }
        if parts.contains(&ReportPart::Unlinked) {
            report.unlinked = Some(analysis.unlinked_starts().iter().map(|&a| hex(a)).collect());
        }
        if parts.contains(&ReportPart::TargetHits) {
            report.targethits = Some(
                analysis
                    .target_hits()
                    .iter()
                    .map(|hit| TargetHitRow {
                        funcstart: hit.funcstart.map(hex),
                        codeaddr: hex(hit.codeaddr),
                        thunk: analysis
                            .targets()
                            .get(&hit.thunkaddr)
                            .map(|t| t.name.clone())
                            .unwrap_or_default(),
                        thunkaddr: hex(hit.thunkaddr),
                        mask: hit.mask,
                    })
                    .collect(),
            );
        }
        report
    }
}

/// Formatter trait for analysis reports
pub trait ReportFormatter {
    /// Render a report
    fn format(&self, report: &AnalysisReport) -> Result<String, AnalysisError>;
}

/// Format reports in plain text
pub struct TextFormatter;

/// Format reports in JSON
pub struct JsonFormatter;

/// Format reports in JSON Lines
pub struct JsonLinesFormatter;

/// Format reports in CSV
pub struct CsvFormatter;

impl ReportFormatter for TextFormatter {
    fn format(&self, report: &AnalysisReport) -> Result<String, AnalysisError> {
        let mut output = String::new();

        if let Some(ranges) = &report.modelhits {
            output.push_str(&format!("Scanned ranges ({}):\n", ranges.len()));
            for r in ranges {
                output.push_str(&format!("  {} - {}\n", r.start, r.end));
            }
            output.push('\n');
        }

        if let Some(xrefs) = &report.xrefs {
            output.push_str(&format!("Cross references ({}):\n", xrefs.len()));
            for x in xrefs {
                output.push_str(&format!("  {:>18} -> {:<18} {}\n", x.from, x.to, x.flags));
            }
            output.push('\n');
        }

        if let Some(unlinked) = &report.unlinked {
            output.push_str(&format!("Unlinked starts ({}):\n", unlinked.len()));
            for addr in unlinked {
                output.push_str(&format!("  {}\n", addr));
            }
            output.push('\n');
        }

        if let Some(hits) = &report.targethits {
            output.push_str(&format!("Target hits ({}):\n", hits.len()));
            for h in hits {
                output.push_str(&format!(
                    "  {} in {}: {} @ {} (mask 0x{:x})\n",
                    h.codeaddr,
                    h.funcstart.as_deref().unwrap_or("?"),
                    h.thunk,
                    h.thunkaddr,
                    h.mask
                ));
            }
            output.push('\n');
        }

        Ok(output)
    }
}
