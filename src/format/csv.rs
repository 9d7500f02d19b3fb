//! CSV output formatter

use serde::Serialize;

use super::{AnalysisReport, ReportFormatter};
use crate::AnalysisError;

/// One flat CSV record; columns a kind does not use stay empty.
#[derive(Debug, Default, Serialize)]
struct CsvRecord<'a> {
    kind: &'static str,
    address: &'a str,
    target: &'a str,
    function: &'a str,
    flags: &'a str,
    name: &'a str,
    mask: Option<u32>,
}

impl ReportFormatter for super::CsvFormatter {
    fn format(&self, report: &AnalysisReport) -> Result<String, AnalysisError> {
        let mut writer = ::csv::Writer::from_writer(Vec::new());
        let csv_error = |e: ::csv::Error| AnalysisError::Generic(format!("CSV serialization error: {}", e));

        for r in report.modelhits.iter().flatten() {
            writer
                .serialize(CsvRecord {
                    kind: "range",
                    address: &r.start,
                    target: &r.end,
                    ..CsvRecord::default()
                })
                .map_err(csv_error)?;
        }
        for x in report.xrefs.iter().flatten() {
            writer
                .serialize(CsvRecord {
                    kind: "xref",
                    address: &x.from,
                    target: &x.to,
                    flags: &x.flags,
                    ..CsvRecord::default()
                })
                .map_err(csv_error)?;
        }
        for addr in report.unlinked.iter().flatten() {
            writer
                .serialize(CsvRecord {
                    kind: "unlinked",
                    address: addr,
                    ..CsvRecord::default()
                })
                .map_err(csv_error)?;
        }
        for h in report.targethits.iter().flatten() {
            writer
                .serialize(CsvRecord {
                    kind: "targethit",
                    address: &h.codeaddr,
                    target: &h.thunkaddr,
                    function: h.funcstart.as_deref().unwrap_or(""),
                    name: &h.thunk,
                    mask: Some(h.mask),
                    ..CsvRecord::default()
                })
                .map_err(csv_error)?;
        }

        let bytes = writer
            .into_inner()
            .map_err(|e| AnalysisError::Generic(format!("CSV flush error: {}", e)))?;
        String::from_utf8(bytes).map_err(|e| AnalysisError::Generic(e.to_string()))
    }
}
