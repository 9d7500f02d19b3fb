//! Python bindings for nuclide_codedata

use pyo3::exceptions::{PyIOError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyDict;

use crate::analysis::CodeDataAnalysis;
use crate::config::TargetSpec;
use crate::decoder::CapstoneTranslator;
use crate::format::{AnalysisReport, OutputFormat, ReportPart};
use crate::parser::GoblinParser;
use crate::BinaryParser;

/// Analyze binary data and return a report of every part in the given format
///
/// `targets` is a list of `NAME=ADDR[:MASK]` strings.
#[pyfunction]
#[pyo3(signature = (binary_data, targets=None, output_format="text"))]
fn analyze(binary_data: Vec<u8>, targets: Option<Vec<String>>, output_format: &str) -> PyResult<String> {
    let output_format: OutputFormat = output_format.parse().map_err(PyValueError::new_err)?;

    let specs = targets
        .unwrap_or_default()
        .iter()
        .map(|t| t.parse::<TargetSpec>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| PyValueError::new_err(e.to_string()))?;

    let image = GoblinParser::new()
        .parse(&binary_data)
        .map_err(|e| PyValueError::new_err(format!("Failed to parse binary: {}", e)))?;

    let trans = CapstoneTranslator::for_architecture(image.architecture, &image)
        .map_err(|e| PyValueError::new_err(format!("Failed to create decoder: {}", e)))?;

    let mut analysis = CodeDataAnalysis::new(&trans, &image);
    for spec in specs {
        analysis.add_target(spec.name, spec.address, spec.mask);
    }
    analysis
        .run_model()
        .map_err(|e| PyValueError::new_err(format!("Analysis failed: {}", e)))?;

    let report = AnalysisReport::from_analysis(&analysis, ReportPart::all());
    output_format
        .get_formatter()
        .format(&report)
        .map_err(|e| PyValueError::new_err(format!("Failed to format output: {}", e)))
}

/// Analyze a file on disk
#[pyfunction]
#[pyo3(signature = (file_path, targets=None, output_format="text"))]
fn analyze_file(file_path: &str, targets: Option<Vec<String>>, output_format: &str) -> PyResult<String> {
    let bytes = std::fs::read(file_path)
        .map_err(|e| PyIOError::new_err(format!("Failed to read file {}: {}", file_path, e)))?;
    analyze(bytes, targets, output_format)
}

/// Python module initialization
#[pymodule]
fn nuclide_codedata(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(analyze, m)?)?;
    m.add_function(wrap_pyfunction!(analyze_file, m)?)?;

    let py = m.py();
    let output_format = PyDict::new(py);
    for format in OutputFormat::available_formats() {
        output_format.set_item(format!("{:?}", format).to_uppercase(), format.to_string())?;
    }
    m.setattr("OutputFormat", output_format)?;

    Ok(())
}
