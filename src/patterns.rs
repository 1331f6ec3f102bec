//! Classification of crash reports against known failure signatures.
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, warn};

use crate::config::DetectionConfig;
use crate::types::{Category, CrashPattern, CrashReport, Severity, StackFrame};

/// A known failure signature.
///
/// `matches` is evaluated against the whole report. Frames of the crashed
/// thread whose symbol contains one of `frame_markers` are attached to the
/// resulting [`CrashPattern`] as evidence.
#[derive(Clone, Copy)]
pub struct Signature {
    pub id: &'static str,
    pub name: &'static str,
    pub severity: Severity,
    pub category: Category,
    pub matches: fn(&CrashReport, &DetectionConfig) -> bool,
    pub frame_markers: &'static [&'static str],
    pub description: &'static str,
    pub likely_cause: &'static str,
    pub suggestion: &'static str,
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signature")
            .field("id", &self.id)
            .field("severity", &self.severity)
            .field("category", &self.category)
            .finish()
    }
}

const BAD_ACCESS: &[&str] = &["EXC_BAD_ACCESS", "SIGSEGV", "SIGBUS"];
const ABORT: &[&str] = &["EXC_CRASH", "SIGABRT"];
const TRAP: &[&str] = &["EXC_BREAKPOINT", "EXC_BAD_INSTRUCTION", "SIGTRAP", "SIGILL"];

const ZOMBIE_MARKERS: &[&str] = &[
    "objc_msgSend",
    "objc_retain",
    "objc_release",
    "swift_retain",
    "swift_release",
];
const ASSERTION_MARKERS: &[&str] = &[
    "assertionFailure",
    "preconditionFailure",
    "__assert_rtn",
    "NSAssertionHandler",
];
const EXCEPTION_MARKERS: &[&str] = &[
    "objc_exception_throw",
    "__cxa_throw",
    "__exceptionPreprocess",
    "_objc_terminate",
    "std::__terminate",
];
const RUNTIME_MARKERS: &[&str] = &[
    "swift_dynamicCastFailure",
    "swift_unexpectedError",
    "swift_deletedMethodError",
    "swift::fatalError",
    "_objc_fatal",
];
const RUNTIME_LOG_MARKERS: &[&str] = &["Fatal error:", "Unexpectedly found nil"];
const WATCHDOG_LOG_MARKERS: &[&str] = &["8badf00d", "watchdog", "scene-update", "failed to scene-"];
const MEMORY_LOG_MARKERS: &[&str] = &[
    "jetsam",
    "per-process-limit",
    "vm-pageshortage",
    "highwater",
    "memory limit",
];
const DISPATCH_MARKERS: &[&str] = &[
    "_dispatch_",
    "dispatch_",
    "pthread_mutex",
    "os_unfair_lock",
    "_os_unfair_lock",
];

/// How many innermost frames of the crashed thread are inspected for
/// dispatch primitives.
const DISPATCH_DEPTH: usize = 5;

fn crashed_symbols_contain(report: &CrashReport, markers: &[&str]) -> bool {
    report
        .crashed_frames()
        .iter()
        .any(|frame| markers.iter().any(|marker| frame.symbol.contains(marker)))
}

/// Case insensitive search in the raw text and the termination reason.
fn log_contains(report: &CrashReport, markers: &[&str]) -> bool {
    let raw = report.raw_text.to_ascii_lowercase();
    let reason = report
        .exception
        .termination_reason
        .as_deref()
        .unwrap_or("")
        .to_ascii_lowercase();
    markers.iter().any(|marker| {
        let marker = marker.to_ascii_lowercase();
        raw.contains(&marker) || reason.contains(&marker)
    })
}

fn is_null_dereference(report: &CrashReport, _: &DetectionConfig) -> bool {
    report.exception.is_any_of(BAD_ACCESS)
        && report
            .exception
            .fault_address
            .map_or(false, |addr| addr.is_null_page())
}

fn is_zombie(report: &CrashReport, _: &DetectionConfig) -> bool {
    report.exception.is_any_of(BAD_ACCESS)
        && report
            .crashed_frames()
            .iter()
            .take(3)
            .any(|frame| ZOMBIE_MARKERS.iter().any(|marker| frame.symbol.contains(marker)))
}

fn is_invalid_address(report: &CrashReport, _: &DetectionConfig) -> bool {
    report.exception.is_any_of(BAD_ACCESS)
        && report
            .exception
            .fault_address
            .map_or(false, |addr| !addr.is_null_page())
}

fn is_bus_error(report: &CrashReport, _: &DetectionConfig) -> bool {
    let subtype = report
        .exception
        .subtype
        .as_deref()
        .unwrap_or("")
        .to_ascii_lowercase();
    report.exception.is_any_of(&["SIGBUS"])
        || subtype.contains("exc_arm_da_align")
        || subtype.contains("alignment")
}

fn is_stack_overflow(report: &CrashReport, config: &DetectionConfig) -> bool {
    let frames = report.crashed_frames();
    if frames.len() < config.stack_overflow_min_frames {
        return false;
    }
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for frame in frames {
        *counts.entry(frame.symbol.as_str()).or_default() += 1;
    }
    counts
        .values()
        .any(|count| *count > config.stack_overflow_min_repeats)
}

fn is_assertion(report: &CrashReport, _: &DetectionConfig) -> bool {
    crashed_symbols_contain(report, ASSERTION_MARKERS)
}

fn is_uncaught_exception(report: &CrashReport, _: &DetectionConfig) -> bool {
    report.exception.is_any_of(ABORT) && crashed_symbols_contain(report, EXCEPTION_MARKERS)
}

fn is_runtime_failure(report: &CrashReport, _: &DetectionConfig) -> bool {
    report.exception.is_any_of(TRAP)
        && (crashed_symbols_contain(report, RUNTIME_MARKERS)
            || log_contains(report, RUNTIME_LOG_MARKERS))
}

fn is_watchdog(report: &CrashReport, _: &DetectionConfig) -> bool {
    report.exception.is_any_of(&["EXC_CRASH", "SIGKILL"])
        && log_contains(report, WATCHDOG_LOG_MARKERS)
}

/// Case insensitive search in the termination reason and the application
/// specific information.
fn termination_mentions(report: &CrashReport, markers: &[&str]) -> bool {
    [
        report.exception.termination_reason.as_deref(),
        report.application_specific_information.as_deref(),
    ]
    .into_iter()
    .flatten()
    .map(str::to_ascii_lowercase)
    .any(|text| {
        markers
            .iter()
            .any(|marker| text.contains(&marker.to_ascii_lowercase()))
    })
}

fn is_out_of_memory(report: &CrashReport, _: &DetectionConfig) -> bool {
    report.exception.is_any_of(&["EXC_RESOURCE"])
        || (report.exception.is_any_of(&["EXC_CRASH", "SIGKILL"])
            && termination_mentions(report, MEMORY_LOG_MARKERS))
}

fn is_dispatch_crash(report: &CrashReport, _: &DetectionConfig) -> bool {
    report
        .crashed_frames()
        .iter()
        .take(DISPATCH_DEPTH)
        .any(|frame| {
            frame.binary == "libdispatch.dylib"
                || DISPATCH_MARKERS
                    .iter()
                    .any(|marker| frame.symbol.contains(marker))
        })
}

/// The built-in signatures, in evaluation order.
pub static CATALOG: &[Signature] = &[
    Signature {
        id: "null_pointer_dereference",
        name: "Null pointer dereference",
        severity: Severity::Critical,
        category: Category::Memory,
        matches: is_null_dereference,
        frame_markers: &[],
        description: "The process accessed memory in the unmapped zero page.",
        likely_cause: "A nil or NULL pointer, a force-unwrapped optional or an unowned reference was dereferenced.",
        suggestion: "Check the crashing frame for optional handling and pointers that can be nil.",
    },
    Signature {
        id: "zombie_object",
        name: "Message to deallocated object",
        severity: Severity::High,
        category: Category::Memory,
        matches: is_zombie,
        frame_markers: ZOMBIE_MARKERS,
        description: "A bad access happened while sending a message to or retaining an object.",
        likely_cause: "An object was released while still referenced (over-release or dangling unowned/assign reference).",
        suggestion: "Reproduce with Zombie Objects enabled and review ownership of the receiving object.",
    },
    Signature {
        id: "bad_memory_access",
        name: "Invalid memory access",
        severity: Severity::High,
        category: Category::Memory,
        matches: is_invalid_address,
        frame_markers: &[],
        description: "The process accessed an address that is not mapped or not accessible.",
        likely_cause: "Use after free, buffer overrun or a corrupted pointer.",
        suggestion: "Run the scenario with Address Sanitizer to find the invalid access.",
    },
    Signature {
        id: "bus_error",
        name: "Bus error",
        severity: Severity::High,
        category: Category::Memory,
        matches: is_bus_error,
        frame_markers: &[],
        description: "The CPU rejected a memory access (misaligned or unbacked page).",
        likely_cause: "Misaligned pointer arithmetic, unsafe pointer casts or a truncated memory mapped file.",
        suggestion: "Review unsafe pointer casts and memory mapped file access around the crashing frame.",
    },
    Signature {
        id: "stack_overflow",
        name: "Stack overflow",
        severity: Severity::Critical,
        category: Category::Memory,
        matches: is_stack_overflow,
        frame_markers: &[],
        description: "The crashed thread is very deep and dominated by a repeating frame.",
        likely_cause: "Unbounded recursion, for example mutually recursive property observers or layout callbacks.",
        suggestion: "Find the repeating frame and add a termination condition or convert the recursion into iteration.",
    },
    Signature {
        id: "assertion_failure",
        name: "Assertion failure",
        severity: Severity::High,
        category: Category::Assertion,
        matches: is_assertion,
        frame_markers: ASSERTION_MARKERS,
        description: "An assertion or precondition in the crashed thread failed.",
        likely_cause: "A programmer-stated invariant did not hold at runtime.",
        suggestion: "Read the assertion message and check the state that violated the invariant.",
    },
    Signature {
        id: "uncaught_exception",
        name: "Uncaught exception",
        severity: Severity::High,
        category: Category::Exception,
        matches: is_uncaught_exception,
        frame_markers: EXCEPTION_MARKERS,
        description: "An Objective-C or C++ exception was thrown and never caught.",
        likely_cause: "An API was misused (out of bounds index, invalid argument, unrecognized selector).",
        suggestion: "Find the exception reason in the application specific information and guard the call that raised it.",
    },
    Signature {
        id: "runtime_fatal_error",
        name: "Runtime fatal error",
        severity: Severity::High,
        category: Category::Assertion,
        matches: is_runtime_failure,
        frame_markers: RUNTIME_MARKERS,
        description: "The language runtime trapped on a fatal error.",
        likely_cause: "Force unwrap of nil, failed forced cast, arithmetic overflow or an out of range index.",
        suggestion: "Replace forced unwraps and casts on the crashing path with checked alternatives.",
    },
    Signature {
        id: "watchdog_termination",
        name: "Watchdog termination",
        severity: Severity::High,
        category: Category::Watchdog,
        matches: is_watchdog,
        frame_markers: &[],
        description: "The system killed the app because it did not respond in time.",
        likely_cause: "The main thread was blocked by synchronous I/O, networking or a lock during launch or a scene update.",
        suggestion: "Move blocking work off the main thread and measure launch time.",
    },
    Signature {
        id: "out_of_memory",
        name: "Out of memory",
        severity: Severity::High,
        category: Category::Resource,
        matches: is_out_of_memory,
        frame_markers: &[],
        description: "The process exceeded a resource limit and was terminated.",
        likely_cause: "Memory growth from leaks, retain cycles or large image and data buffers.",
        suggestion: "Profile memory with Instruments and look for retain cycles and unbounded caches.",
    },
    Signature {
        id: "dispatch_crash",
        name: "Dispatch or lock misuse",
        severity: Severity::Medium,
        category: Category::Threading,
        matches: is_dispatch_crash,
        frame_markers: DISPATCH_MARKERS,
        description: "The crash happened inside a dispatch or locking primitive.",
        likely_cause: "Over-released dispatch objects, dispatch_sync onto the current queue or unbalanced lock calls.",
        suggestion: "Check queue usage for re-entrant dispatch_sync and balance every lock with an unlock.",
    },
];

/// Heuristic confidence of a match.
///
/// Starts at 0.7, symbolicated reports and critical signatures add 0.1 each.
pub fn confidence(report: &CrashReport, severity: Severity) -> f64 {
    let tenths = 7 + u8::from(report.is_symbolicated) + u8::from(severity == Severity::Critical);
    (f64::from(tenths) / 10.0).min(1.0)
}

fn evidence(report: &CrashReport, markers: &[&str]) -> Vec<StackFrame> {
    if markers.is_empty() {
        return vec![];
    }
    report
        .crashed_frames()
        .iter()
        .filter(|frame| markers.iter().any(|marker| frame.symbol.contains(marker)))
        .cloned()
        .collect()
}

/// Evaluates the built-in [`CATALOG`].
pub fn detect_patterns(report: &CrashReport, config: &DetectionConfig) -> Vec<CrashPattern> {
    detect_with_catalog(report, CATALOG, config)
}

/// Evaluates `catalog` against `report`.
///
/// A predicate that panics counts as not matching. The result is ordered by
/// severity (critical first), then by descending confidence, keeping catalog
/// order for ties.
pub fn detect_with_catalog(
    report: &CrashReport,
    catalog: &[Signature],
    config: &DetectionConfig,
) -> Vec<CrashPattern> {
    let mut rv = vec![];
    for signature in catalog {
        let matched = panic::catch_unwind(AssertUnwindSafe(|| (signature.matches)(report, config)))
            .unwrap_or_else(|_| {
                warn!("signature {} panicked, treating as no match", signature.id);
                false
            });
        if !matched {
            continue;
        }
        debug!("signature {} matched", signature.id);
        rv.push(CrashPattern {
            id: signature.id.to_string(),
            name: signature.name.to_string(),
            severity: signature.severity,
            category: signature.category,
            description: signature.description.to_string(),
            likely_cause: signature.likely_cause.to_string(),
            suggestion: signature.suggestion.to_string(),
            confidence: confidence(report, signature.severity),
            matched_frames: evidence(report, signature.frame_markers),
        });
    }
    rv.sort_by(|a, b| {
        a.severity
            .cmp(&b.severity)
            .then_with(|| b.confidence.total_cmp(&a.confidence))
    });
    rv
}

#[cfg(test)]
fn frame(binary: &str, symbol: &str) -> StackFrame {
    StackFrame {
        binary: binary.into(),
        address: crate::types::Addr(0x1000),
        symbol: symbol.into(),
        offset: None,
        file: None,
        line: None,
        is_app_code: false,
    }
}

#[cfg(test)]
fn report_with(exception_type: &str, signal: Option<&str>, frames: Vec<StackFrame>) -> CrashReport {
    let mut report = CrashReport {
        exception: crate::types::CrashException {
            exception_type: exception_type.into(),
            signal: signal.map(str::to_string),
            ..Default::default()
        },
        threads: vec![crate::types::ThreadInfo {
            index: 0,
            name: None,
            crashed: true,
            frames,
        }],
        ..Default::default()
    };
    report.settle_crashed_thread(None);
    report
}

#[cfg(test)]
fn ids(patterns: &[CrashPattern]) -> Vec<&str> {
    patterns.iter().map(|p| p.id.as_str()).collect()
}

#[test]
fn test_confidence() {
    let mut report = CrashReport::default();
    assert_eq!(confidence(&report, Severity::High), 0.7);
    assert_eq!(confidence(&report, Severity::Critical), 0.8);
    report.is_symbolicated = true;
    assert_eq!(confidence(&report, Severity::Low), 0.8);
    assert_eq!(confidence(&report, Severity::Critical), 0.9);
}

#[test]
fn test_null_pointer() {
    let mut report = report_with("EXC_BAD_ACCESS", Some("SIGSEGV"), vec![frame("Demo", "foo")]);
    report.exception.fault_address = Some(crate::types::Addr(0));
    let patterns = detect_patterns(&report, &DetectionConfig::default());
    assert_eq!(ids(&patterns), vec!["null_pointer_dereference"]);
    assert_eq!(patterns[0].severity, Severity::Critical);
    assert!(patterns[0].confidence >= 0.7);

    report.exception.fault_address = Some(crate::types::Addr(0xdead_beef));
    let patterns = detect_patterns(&report, &DetectionConfig::default());
    assert_eq!(ids(&patterns), vec!["bad_memory_access"]);
}

#[test]
fn test_stack_overflow_thresholds() {
    let mut frames = vec![];
    for i in 0..80 {
        if i % 5 == 0 {
            frames.push(frame("Demo", "recurse"));
        } else {
            frames.push(frame("Demo", &format!("f{}", i)));
        }
    }
    // 16 repeats of `recurse`
    let report = report_with("EXC_BAD_ACCESS", None, frames);
    let patterns = detect_patterns(&report, &DetectionConfig::default());
    assert!(ids(&patterns).contains(&"stack_overflow"));

    let strict = DetectionConfig {
        stack_overflow_min_frames: 100,
        ..Default::default()
    };
    assert!(!ids(&detect_patterns(&report, &strict)).contains(&"stack_overflow"));

    let shallow = (0..80).map(|i| frame("Demo", &format!("f{}", i % 27))).collect();
    let report = report_with("EXC_BAD_ACCESS", None, shallow);
    assert!(!ids(&detect_patterns(&report, &DetectionConfig::default())).contains(&"stack_overflow"));
}

#[test]
fn test_uncaught_exception_needs_marker() {
    let thrown = vec![
        frame("libsystem_kernel.dylib", "__pthread_kill"),
        frame("libobjc.A.dylib", "objc_exception_throw"),
        frame("Demo", "-[ViewController crash]"),
    ];
    let report = report_with("EXC_CRASH", Some("SIGABRT"), thrown);
    let patterns = detect_patterns(&report, &DetectionConfig::default());
    assert_eq!(ids(&patterns), vec!["uncaught_exception"]);
    assert_eq!(patterns[0].severity, Severity::High);
    assert_eq!(patterns[0].matched_frames.len(), 1);
    assert_eq!(patterns[0].matched_frames[0].symbol, "objc_exception_throw");

    let quiet = vec![
        frame("libsystem_kernel.dylib", "__pthread_kill"),
        frame("Demo", "-[ViewController crash]"),
    ];
    let report = report_with("EXC_CRASH", Some("SIGABRT"), quiet);
    assert!(detect_patterns(&report, &DetectionConfig::default()).is_empty());
}

#[test]
fn test_watchdog_and_oom() {
    let mut report = report_with("EXC_CRASH", Some("SIGKILL"), vec![]);
    report.exception.termination_reason = Some("Namespace FRONTBOARD, Code 0x8badf00d".into());
    assert_eq!(
        ids(&detect_patterns(&report, &DetectionConfig::default())),
        vec!["watchdog_termination"]
    );

    let mut report = report_with("EXC_CRASH", Some("SIGKILL"), vec![]);
    report.exception.termination_reason = Some("JETSAM per-process-limit".into());
    assert_eq!(
        ids(&detect_patterns(&report, &DetectionConfig::default())),
        vec!["out_of_memory"]
    );

    let report = report_with("EXC_RESOURCE", None, vec![frame("Demo", "-[Cache grow]")]);
    assert_eq!(
        ids(&detect_patterns(&report, &DetectionConfig::default())),
        vec!["out_of_memory"]
    );
}

#[test]
fn test_memory_words_outside_termination_do_not_count() {
    let mut report = report_with("EXC_CRASH", Some("SIGABRT"), vec![frame("Demo", "main")]);
    report.raw_text = "/private/var/HighwaterKit.framework/HighwaterKit\nThread 3 name: memory limit monitor".into();
    report.exception.termination_reason = Some("Namespace SIGNAL, Code 0x6".into());
    assert!(detect_patterns(&report, &DetectionConfig::default()).is_empty());

    let mut report = report_with("EXC_BAD_ACCESS", Some("SIGSEGV"), vec![frame("Demo", "main")]);
    report.application_specific_information = Some("memory limit exceeded".into());
    assert!(!ids(&detect_patterns(&report, &DetectionConfig::default())).contains(&"out_of_memory"));

    let mut report = report_with("EXC_CRASH", Some("SIGKILL"), vec![]);
    report.application_specific_information = Some("Jetsam event: highwater".into());
    assert_eq!(
        ids(&detect_patterns(&report, &DetectionConfig::default())),
        vec!["out_of_memory"]
    );
}

#[test]
fn test_zombie_object() {
    let frames = vec![
        frame("libobjc.A.dylib", "objc_msgSend"),
        frame("Demo", "-[ViewController reload]"),
    ];
    let mut report = report_with("EXC_BAD_ACCESS", Some("SIGSEGV"), frames);
    report.exception.fault_address = Some(crate::types::Addr(0x0000_0001_2345_6780));
    let patterns = detect_patterns(&report, &DetectionConfig::default());
    assert_eq!(ids(&patterns), vec!["zombie_object", "bad_memory_access"]);
    assert_eq!(patterns[0].category, Category::Memory);
    assert_eq!(patterns[0].matched_frames[0].symbol, "objc_msgSend");

    // too deep to count
    let frames = vec![
        frame("Demo", "a"),
        frame("Demo", "b"),
        frame("Demo", "c"),
        frame("libobjc.A.dylib", "objc_release"),
    ];
    let report = report_with("EXC_BAD_ACCESS", Some("SIGSEGV"), frames);
    assert!(detect_patterns(&report, &DetectionConfig::default()).is_empty());

    // not a bad access
    let frames = vec![frame("libobjc.A.dylib", "objc_msgSend")];
    let report = report_with("EXC_CRASH", Some("SIGABRT"), frames);
    assert!(detect_patterns(&report, &DetectionConfig::default()).is_empty());
}

#[test]
fn test_bus_error() {
    let report = report_with("EXC_BAD_ACCESS", Some("SIGBUS"), vec![frame("Demo", "main")]);
    assert_eq!(
        ids(&detect_patterns(&report, &DetectionConfig::default())),
        vec!["bus_error"]
    );

    let mut report = report_with("EXC_BAD_ACCESS", Some("SIGSEGV"), vec![frame("Demo", "main")]);
    report.exception.subtype = Some("EXC_ARM_DA_ALIGN at 0x0000000104a3c001".into());
    assert_eq!(
        ids(&detect_patterns(&report, &DetectionConfig::default())),
        vec!["bus_error"]
    );

    let mut report = report_with("EXC_BAD_ACCESS", Some("SIGSEGV"), vec![frame("Demo", "main")]);
    report.exception.subtype = Some("KERN_PROTECTION_FAILURE".into());
    assert!(detect_patterns(&report, &DetectionConfig::default()).is_empty());
}

#[test]
fn test_runtime_failure_and_dispatch() {
    let frames = vec![
        frame("libswiftCore.dylib", "Swift._assertionFailure(_:_:file:line:flags:)"),
        frame("Demo", "Demo.run() -> ()"),
    ];
    let mut report = report_with("EXC_BREAKPOINT", Some("SIGTRAP"), frames);
    report.raw_text = "Fatal error: Unexpectedly found nil while unwrapping".into();
    assert_eq!(
        ids(&detect_patterns(&report, &DetectionConfig::default())),
        vec!["assertion_failure", "runtime_fatal_error"]
    );

    let frames = vec![
        frame("libdispatch.dylib", "_dispatch_sync_f_slow"),
        frame("Demo", "Demo.run() -> ()"),
    ];
    let report = report_with("EXC_BREAKPOINT", Some("SIGTRAP"), frames);
    let patterns = detect_patterns(&report, &DetectionConfig::default());
    assert_eq!(ids(&patterns), vec!["dispatch_crash"]);
    assert_eq!(patterns[0].category, Category::Threading);
}

#[test]
fn test_ordering_and_panics() {
    fn always(_: &CrashReport, _: &DetectionConfig) -> bool {
        true
    }
    fn explode(_: &CrashReport, _: &DetectionConfig) -> bool {
        panic!("broken signature")
    }
    let base = Signature {
        id: "low",
        name: "low",
        severity: Severity::Low,
        category: Category::Unknown,
        matches: always,
        frame_markers: &[],
        description: "",
        likely_cause: "",
        suggestion: "",
    };
    let catalog = [
        base,
        Signature { id: "broken", severity: Severity::Critical, matches: explode, ..base },
        Signature { id: "high_a", severity: Severity::High, ..base },
        Signature { id: "critical", severity: Severity::Critical, ..base },
        Signature { id: "high_b", severity: Severity::High, ..base },
    ];
    let report = CrashReport::default();
    let patterns = detect_with_catalog(&report, &catalog, &DetectionConfig::default());
    assert_eq!(ids(&patterns), vec!["critical", "high_a", "high_b", "low"]);
    assert_eq!(patterns[0].confidence, 0.8);
    for pair in patterns.windows(2) {
        assert!(pair[0].severity <= pair[1].severity);
    }
}
