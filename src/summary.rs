//! Renders a short markdown brief and remediation hints for a report.
use std::collections::HashSet;
use std::fmt::Write;

use serde::Serialize;

use crate::types::{Category, CrashPattern, CrashReport, Severity, StackFrame};

const KEY_FRAME_COUNT: usize = 5;

const SYMBOLICATE_FIRST: &str =
    "Symbolicate the report with the matching dSYM first; unresolved frames hide the real crash site.";
const ESCALATE_CRITICAL: &str =
    "A critical pattern was detected: treat this crash as a release blocker and escalate it.";

/// Text output of a triage run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrashSummary {
    pub category: Category,
    pub brief: String,
    pub suggestions: Vec<String>,
}

fn category_hints(category: Category) -> &'static [&'static str] {
    match category {
        Category::Memory => &[
            "Reproduce with Address Sanitizer and Zombie Objects enabled.",
            "Audit force unwraps, unowned references and unsafe pointer use on the crashing path.",
        ],
        Category::Threading => &[
            "Run the scenario under Thread Sanitizer.",
            "Check which queue each object is accessed from and avoid dispatch_sync onto the current queue.",
        ],
        Category::Resource => &[
            "Profile allocations with Instruments and look for leaks and retain cycles.",
            "Respond to memory warnings by purging caches.",
        ],
        Category::Watchdog => &[
            "Keep launch and scene transitions free of synchronous I/O and network calls.",
            "Profile the main thread with the Time Profiler during launch.",
        ],
        Category::Assertion => &[
            "Read the assertion or fatal error message in the application specific information.",
            "Verify the invariant the failing check protects and how it got violated.",
        ],
        Category::Exception => &[
            "Look up the exception name and reason in the application specific information.",
            "Add an exception breakpoint to stop where the exception is raised.",
        ],
        Category::Unknown => &[
            "Inspect the application frames of the crashed thread to locate the failure.",
        ],
    }
}

/// Coarse category of the report, taken from the top ranked pattern.
pub fn dominant_category(patterns: &[CrashPattern]) -> Category {
    patterns
        .first()
        .map(|pattern| pattern.category)
        .unwrap_or(Category::Unknown)
}

/// The frames worth looking at first.
///
/// Up to five application frames of the crashed thread; if the thread has no
/// application frames, its five innermost frames.
pub fn key_frames(report: &CrashReport) -> Vec<&StackFrame> {
    let frames = report.crashed_frames();
    let app_frames: Vec<&StackFrame> = frames
        .iter()
        .filter(|frame| frame.is_app_code)
        .take(KEY_FRAME_COUNT)
        .collect();
    if app_frames.is_empty() {
        frames.iter().take(KEY_FRAME_COUNT).collect()
    } else {
        app_frames
    }
}

/// Flat list of remediation suggestions without duplicates.
pub fn suggestions(report: &CrashReport, patterns: &[CrashPattern]) -> Vec<String> {
    let mut rv = vec![];
    if !report.is_symbolicated {
        rv.push(SYMBOLICATE_FIRST.to_string());
    }
    rv.extend(patterns.iter().map(|pattern| pattern.suggestion.clone()));
    rv.extend(
        category_hints(dominant_category(patterns))
            .iter()
            .map(|hint| hint.to_string()),
    );
    if patterns
        .iter()
        .any(|pattern| pattern.severity == Severity::Critical)
    {
        rv.push(ESCALATE_CRITICAL.to_string());
    }

    let mut seen = HashSet::new();
    rv.retain(|suggestion| seen.insert(suggestion.clone()));
    rv
}

fn render_frame(out: &mut String, position: usize, frame: &StackFrame) {
    let _ = write!(out, "{}. `{}` in {}", position, frame.symbol, frame.binary);
    if let Some(offset) = frame.offset {
        let _ = write!(out, " + {}", offset);
    }
    match (&frame.file, frame.line) {
        (Some(file), Some(line)) => {
            let _ = write!(out, " ({}:{})", file, line);
        }
        (Some(file), None) => {
            let _ = write!(out, " ({})", file);
        }
        _ => {}
    }
    out.push('\n');
}

/// Markdown brief with identity, crashed thread and pattern sections.
pub fn render_brief(report: &CrashReport, patterns: &[CrashPattern]) -> String {
    let mut out = String::new();

    let process = if report.process_name.is_empty() {
        "Unknown process"
    } else {
        report.process_name.as_str()
    };
    let _ = write!(out, "## {}", process);
    if let Some(version) = &report.app_version {
        let _ = write!(out, " {}", version);
    }
    out.push('\n');
    if let Some(bundle_id) = &report.bundle_id {
        let _ = writeln!(out, "- Bundle: {}", bundle_id);
    }
    let _ = write!(out, "- Exception: {}", report.exception.exception_type);
    if let Some(signal) = &report.exception.signal {
        if *signal != report.exception.exception_type {
            let _ = write!(out, " ({})", signal);
        }
    }
    out.push('\n');
    if let Some(subtype) = &report.exception.subtype {
        let _ = writeln!(out, "- Subtype: {}", subtype);
    }
    if let Some(addr) = report.exception.fault_address {
        let _ = writeln!(out, "- Fault address: {}", addr);
    }
    if let Some(reason) = &report.exception.termination_reason {
        let _ = writeln!(out, "- Termination: {}", reason);
    }
    let device: Vec<&str> = [report.device_model.as_deref(), report.os_version.as_deref()]
        .into_iter()
        .flatten()
        .collect();
    if !device.is_empty() {
        let _ = writeln!(out, "- Device: {}", device.join(", "));
    }
    let _ = writeln!(
        out,
        "- Symbolicated: {}",
        if report.is_symbolicated { "yes" } else { "no" }
    );

    out.push('\n');
    match report.crashed_thread() {
        Some(thread) => {
            let _ = write!(out, "## Crashed thread {}", thread.index);
            if let Some(name) = &thread.name {
                let _ = write!(out, ": {}", name);
            }
            out.push('\n');
            let frames = key_frames(report);
            if frames.is_empty() {
                out.push_str("_No frames available._\n");
            }
            for (idx, frame) in frames.into_iter().enumerate() {
                render_frame(&mut out, idx + 1, frame);
            }
        }
        None => out.push_str("## Crashed thread\n_No crashed thread found._\n"),
    }

    out.push('\n');
    out.push_str("## Detected patterns\n");
    if patterns.is_empty() {
        out.push_str("_No known pattern matched._\n");
    }
    for pattern in patterns {
        let _ = writeln!(
            out,
            "- **{}** ({}, {:.0}%): {} Likely cause: {}",
            pattern.name,
            pattern.severity,
            pattern.confidence * 100.0,
            pattern.description,
            pattern.likely_cause
        );
    }
    out
}

/// Renders the brief and the suggestions for `report`.
pub fn summarize(report: &CrashReport, patterns: &[CrashPattern]) -> CrashSummary {
    CrashSummary {
        category: dominant_category(patterns),
        brief: render_brief(report, patterns),
        suggestions: suggestions(report, patterns),
    }
}

#[cfg(test)]
fn pattern(id: &str, severity: Severity, category: Category, suggestion: &str) -> CrashPattern {
    CrashPattern {
        id: id.into(),
        name: id.into(),
        severity,
        category,
        description: String::new(),
        likely_cause: String::new(),
        suggestion: suggestion.into(),
        confidence: 0.7,
        matched_frames: vec![],
    }
}

#[test]
fn test_suggestions_order_and_dedup() {
    let report = CrashReport::default();
    let patterns = vec![
        pattern("a", Severity::Critical, Category::Memory, "Fix it."),
        pattern("b", Severity::High, Category::Threading, "Fix it."),
    ];
    let rv = suggestions(&report, &patterns);
    assert_eq!(rv[0], SYMBOLICATE_FIRST);
    assert_eq!(rv[1], "Fix it.");
    assert_eq!(rv[2], category_hints(Category::Memory)[0]);
    assert_eq!(rv.last().map(String::as_str), Some(ESCALATE_CRITICAL));
    let unique: HashSet<&String> = rv.iter().collect();
    assert_eq!(unique.len(), rv.len());
}

#[test]
fn test_suggestions_without_patterns() {
    let report = CrashReport {
        is_symbolicated: true,
        ..Default::default()
    };
    assert_eq!(
        suggestions(&report, &[]),
        vec![category_hints(Category::Unknown)[0].to_string()]
    );
    assert_eq!(dominant_category(&[]), Category::Unknown);
}

#[test]
fn test_key_frames_prefer_app_code() {
    use crate::types::{Addr, ThreadInfo};

    let frame = |symbol: &str, is_app_code: bool| StackFrame {
        binary: if is_app_code { "Demo" } else { "UIKitCore" }.into(),
        address: Addr(0),
        symbol: symbol.into(),
        offset: None,
        file: None,
        line: None,
        is_app_code,
    };
    let mut report = CrashReport {
        threads: vec![ThreadInfo {
            index: 0,
            name: None,
            crashed: true,
            frames: (0..8).map(|i| frame(&format!("sys{}", i), false)).collect(),
        }],
        ..Default::default()
    };
    report.settle_crashed_thread(None);
    let symbols: Vec<&str> = key_frames(&report).iter().map(|f| f.symbol.as_str()).collect();
    assert_eq!(symbols, vec!["sys0", "sys1", "sys2", "sys3", "sys4"]);

    report.threads[0].frames[6] = frame("app6", true);
    report.threads[0].frames[2] = frame("app2", true);
    let symbols: Vec<&str> = key_frames(&report).iter().map(|f| f.symbol.as_str()).collect();
    assert_eq!(symbols, vec!["app2", "app6"]);
}
