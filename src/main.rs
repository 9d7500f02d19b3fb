use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;

use nuclide_codedata::analysis::CodeDataAnalysis;
use nuclide_codedata::config::parse_number;
use nuclide_codedata::decoder::CapstoneTranslator;
use nuclide_codedata::format::{AnalysisReport, OutputFormat, ReportPart};
use nuclide_codedata::parser::GoblinParser;
use nuclide_codedata::{Address, Architecture, BinaryParser, ConfigFile, LoadImage, ProgramImage, TargetSpec};

/// Recover code/data boundaries in an executable and report references to
/// target thunks.
#[derive(Parser, Debug)]
#[command(name = "codedata", version, about, long_about = None)]
struct Cli {
    /// Executable image (ELF, PE, Mach-O, or raw bytes with --arch)
    input: PathBuf,

    /// JSON configuration file with analysis limits and targets
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Target thunk as NAME=ADDR[:MASK]; may be repeated
    #[arg(short, long = "target", value_name = "NAME=ADDR[:MASK]")]
    targets: Vec<TargetSpec>,

    /// Architecture override; also enables loading unrecognised files as raw bytes
    #[arg(short, long)]
    arch: Option<Architecture>,

    /// Load address used for raw images
    #[arg(long, value_parser = parse_number, default_value = "0")]
    base: Address,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Report part to print; may be repeated (default: all)
    #[arg(short, long = "report", value_enum)]
    reports: Vec<ReportPart>,

    /// Enable verbose (debug-level) logging output
    #[arg(short, long)]
    verbose: bool,
}

fn load_image(cli: &Cli) -> Result<ProgramImage> {
    let data = fs::read(&cli.input).with_context(|| format!("failed to read {}", cli.input.display()))?;

    let mut image = match GoblinParser::new().parse(&data) {
        Ok(image) => image,
        Err(e) => match cli.arch {
            Some(arch) => {
                log::warn!("{}; loading as raw {} bytes at 0x{:x}", e, arch, cli.base);
                ProgramImage::raw(arch, &data, cli.base)
            }
            None => {
                return Err(e).with_context(|| format!("failed to parse {} (use --arch for raw images)", cli.input.display()))
            }
        },
    };
    if let Some(arch) = cli.arch {
        image.architecture = arch;
    }
    if image.architecture == Architecture::Unknown {
        bail!("unknown architecture for {}; pass --arch", cli.input.display());
    }
    Ok(image)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG overrides the level picked here
    let level = if cli.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_module("nuclide_codedata", level)
        .filter_module("codedata", level)
        .parse_default_env()
        .target(env_logger::Target::Stderr)
        .format_timestamp(None)
        .init();

    let config = match &cli.config {
        Some(path) => ConfigFile::load(path).with_context(|| format!("failed to load {}", path.display()))?,
        None => ConfigFile::default(),
    };

    let image = load_image(&cli)?;
    log::info!(
        "loaded {} ({}, {} sections)",
        cli.input.display(),
        image.architecture,
        image.sections().len()
    );

    let trans = CapstoneTranslator::for_architecture(image.architecture, &image)
        .context("failed to create instruction translator")?;

    let mut analysis = CodeDataAnalysis::with_config(&trans, &image, config.analysis);
    for target in config.targets.iter().chain(cli.targets.iter()) {
        analysis.add_target(target.name.clone(), target.address, target.mask);
    }
    analysis.run_model().context("analysis failed")?;

    let parts = if cli.reports.is_empty() {
        ReportPart::all()
    } else {
        cli.reports.as_slice()
    };
    let report = AnalysisReport::from_analysis(&analysis, parts);
    let output = cli
        .format
        .get_formatter()
        .format(&report)
        .context("failed to format report")?;
    print!("{}", output);

    Ok(())
}
