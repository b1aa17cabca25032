#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::env::VarError;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use vfsck_check::{CheckReport, check_strict};
use vfsck_error::VfsckError;
use vfsck_ondisk::Image;
use vfsck_repair::{RepairOutcome, repair};
use vfsck_types::Geometry;

const NO_REPAIR_NEEDED: &str = "file system image is valid, no repair required";

// ── CLI definition ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Human,
    Json,
}

impl LogFormat {
    const ENV_KEY: &'static str = "VFSCK_LOG_FORMAT";

    fn parse(raw: &str) -> Result<Self> {
        <Self as ValueEnum>::from_str(raw.trim(), true).map_err(|_| {
            anyhow::anyhow!(
                "invalid {key}={raw:?}; expected one of: human, json",
                key = Self::ENV_KEY
            )
        })
    }

    fn from_env() -> Result<Option<Self>> {
        match std::env::var(Self::ENV_KEY) {
            Ok(value) => Ok(Some(Self::parse(&value)?)),
            Err(VarError::NotPresent) => Ok(None),
            Err(VarError::NotUnicode(_)) => {
                bail!("{key} contains non-UTF-8 bytes", key = Self::ENV_KEY)
            }
        }
    }
}

fn default_env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("error"))
}

fn init_logging(log_format_override: Option<LogFormat>) -> Result<LogFormat> {
    let format = log_format_override
        .or(LogFormat::from_env()?)
        .unwrap_or(LogFormat::Human);

    match format {
        LogFormat::Human => tracing_subscriber::fmt()
            .with_env_filter(default_env_filter())
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_level(true)
            .compact()
            .try_init()
            .map_err(|err| anyhow::anyhow!("failed to initialize human logger: {err}"))?,
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .flatten_event(true)
            .with_env_filter(default_env_filter())
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_level(true)
            .try_init()
            .map_err(|err| anyhow::anyhow!("failed to initialize JSON logger: {err}"))?,
    }

    Ok(format)
}

/// Check a filesystem image for consistency, optionally relocating orphaned
/// inodes into `lost_found`.
#[derive(Debug, Parser)]
#[command(name = "check", version)]
struct Cli {
    /// Collect every finding and relocate orphans into `lost_found`.
    /// Opens the image for writing.
    #[arg(short, long)]
    repair: bool,
    /// Print the check report (and repair outcome) as JSON on stdout.
    #[arg(long)]
    json: bool,
    /// Log output format (`human` or `json`).
    ///
    /// Precedence: `--log-format` > `VFSCK_LOG_FORMAT` > `human`.
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,
    /// Path to the filesystem image.
    image: PathBuf,
}

#[derive(Debug, Serialize)]
struct CheckOutput<'a> {
    image: &'a Path,
    report: &'a CheckReport,
}

// ── Commands ────────────────────────────────────────────────────────────────

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(err) = init_logging(cli.log_format) {
        eprintln!("ERROR: {err:#}");
        return ExitCode::FAILURE;
    }

    let result = if cli.repair {
        repair_cmd(&cli.image, cli.json)
    } else {
        check_cmd(&cli.image, cli.json)
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("ERROR: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn load_image(path: &Path) -> Result<Image<Vec<u8>>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => bail!("image not found"),
        Err(err) => {
            return Err(VfsckError::Io(err))
                .with_context(|| format!("failed to read image {}", path.display()));
        }
    };
    debug!(path = %path.display(), len = bytes.len(), "image loaded");
    Image::new(bytes, Geometry::STANDARD)
        .map_err(|err| VfsckError::InvalidGeometry(err.to_string()).into())
}

/// Fail-fast mode: the first finding is the error.
fn check_cmd(path: &Path, json: bool) -> Result<()> {
    let image = load_image(path)?;
    let report = check_strict(&image)?;
    if json {
        let output = CheckOutput {
            image: path,
            report: &report,
        };
        println!(
            "{}",
            serde_json::to_string_pretty(&output).context("serialize check report")?
        );
    }
    Ok(())
}

/// Repair mode: print every finding, then relocate orphans. The image is
/// written back whenever a slot was filled, even if `lost_found` ran out of
/// room before every orphan was placed.
fn repair_cmd(path: &Path, json: bool) -> Result<()> {
    let mut image = load_image(path)?;
    let run = repair(&mut image)?;
    for finding in &run.report.findings {
        eprintln!("ERROR: {finding}");
    }

    if run.outcome.mutated() {
        fs::write(path, image.as_bytes())
            .with_context(|| format!("failed to write repaired image {}", path.display()))?;
        info!(
            relocated = run.outcome.placements().len(),
            path = %path.display(),
            "image written back"
        );
    }

    if json {
        println!("{}", run.to_json().context("serialize repair run")?);
    } else if run.outcome == RepairOutcome::NotNeeded {
        println!("{NO_REPAIR_NEEDED}");
    }

    match run.outcome.failure() {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}
