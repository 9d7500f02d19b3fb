//! JSON and JSON Lines output formatters

use serde_json::{json, Value};

use super::{AnalysisReport, ReportFormatter};
use crate::AnalysisError;

fn json_error(e: serde_json::Error) -> AnalysisError {
    AnalysisError::Generic(format!("JSON serialization error: {}", e))
}

impl ReportFormatter for super::JsonFormatter {
    fn format(&self, report: &AnalysisReport) -> Result<String, AnalysisError> {
        serde_json::to_string_pretty(report).map_err(json_error)
    }
}

impl ReportFormatter for super::JsonLinesFormatter {
    fn format(&self, report: &AnalysisReport) -> Result<String, AnalysisError> {
        let mut records: Vec<Value> = Vec::new();

        for r in report.modelhits.iter().flatten() {
            records.push(json!({
                "type": "range",
                "start": r.start,
                "end": r.end,
            }));
        }
        for x in report.xrefs.iter().flatten() {
            records.push(json!({
                "type": "xref",
                "from": x.from,
                "to": x.to,
                "flags": x.flags,
            }));
        }
        for addr in report.unlinked.iter().flatten() {
            records.push(json!({
                "type": "unlinked",
                "address": addr,
            }));
        }
        for h in report.targethits.iter().flatten() {
            records.push(json!({
                "type": "targethit",
                "funcstart": h.funcstart,
                "codeaddr": h.codeaddr,
                "thunk": h.thunk,
                "thunkaddr": h.thunkaddr,
                "mask": h.mask,
            }));
        }

        let mut output = String::new();
        for record in &records {
            output.push_str(&serde_json::to_string(record).map_err(json_error)?);
            output.push('\n');
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::tests::sample_report;
    use crate::format::{JsonFormatter, JsonLinesFormatter};

    #[test]
    fn test_json_formatter() {
        let result = JsonFormatter.format(&sample_report()).unwrap();
        let parsed: AnalysisReport = serde_json::from_str(&result).unwrap();
        assert_eq!(parsed, sample_report());

        let value: Value = serde_json::from_str(&result).unwrap();
        assert_eq!(value["targethits"][0]["thunk"], "exit");
        assert_eq!(value["xrefs"][0]["flags"], "call|jump|fallthru");
    }

    #[test]
    fn test_json_omits_unselected_parts() {
        let report = AnalysisReport {
            unlinked: Some(vec!["0x10".into()]),
            ..AnalysisReport::default()
        };
        let value: Value = serde_json::from_str(&JsonFormatter.format(&report).unwrap()).unwrap();
        assert!(value.get("xrefs").is_none());
        assert_eq!(value["unlinked"][0], "0x10");
    }

    #[test]
    fn test_json_lines_formatter() {
        let result = JsonLinesFormatter.format(&sample_report()).unwrap();
        let lines: Vec<Value> = result
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();

        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0]["type"], "range");
        assert_eq!(lines[1]["type"], "xref");
        assert_eq!(lines[2]["address"], "0x1000");
        assert_eq!(lines[3]["funcstart"], "0x1010");
        assert_eq!(lines[3]["mask"], 4);
    }
}
