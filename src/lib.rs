//! This library triages apple crash reports.
//!
//! Both on-device formats are understood: the JSON based `.ips` reports and
//! the older line oriented `.crash` text. Parsed reports can be symbolicated
//! against a `.dSYM` archive, matched against a catalog of known crash
//! signatures and rendered into a short markdown brief.
//!
//! ```no_run
//! use std::path::Path;
//! use apple_crash_triage::{analyze, Config};
//!
//! let text = std::fs::read_to_string("Demo-2023-05-01.ips").unwrap();
//! let analysis = analyze(&text, Some(Path::new("build/")), &Config::default()).unwrap();
//! println!("{}", analysis.summary.brief);
//! ```
use std::path::Path;

use serde::Serialize;
use tracing::info;

mod config;
mod error;
mod ips;
mod legacy;
mod parser;
mod patterns;
mod summary;
mod symbolicate;
mod types;

pub use crate::config::*;
pub use crate::error::*;
pub use crate::parser::*;
pub use crate::patterns::*;
pub use crate::summary::*;
pub use crate::symbolicate::*;
pub use crate::types::*;

/// Result of running the whole pipeline on one report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Analysis {
    /// The report with `patterns` filled in.
    pub report: CrashReport,
    pub summary: CrashSummary,
}

/// Parses `text`, symbolicates it if `dsym_path` is given, detects
/// patterns and renders the summary.
///
/// Only an unrecognizable input is an error; symbolication problems merely
/// leave the report unsymbolicated.
pub fn analyze(
    text: &str,
    dsym_path: Option<&Path>,
    config: &Config,
) -> Result<Analysis, ParseError> {
    let report: CrashReport = text.parse()?;
    let report = match dsym_path {
        Some(dsym_path) => Symbolicator::from_config(&config.resolver).symbolicate(report, dsym_path),
        None => report,
    };
    Ok(triage(report, &config.detection))
}

/// Detects patterns on an already parsed (and possibly symbolicated)
/// report and renders its summary.
pub fn triage(mut report: CrashReport, config: &DetectionConfig) -> Analysis {
    let patterns = detect_patterns(&report, config);
    info!(
        process = %report.process_name,
        symbolicated = report.is_symbolicated,
        patterns = patterns.len(),
        "triaged crash report"
    );
    let summary = summarize(&report, &patterns);
    report.patterns = patterns;
    Analysis { report, summary }
}
