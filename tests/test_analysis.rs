use std::collections::HashSet;
use std::fmt::Write;
use std::fs;

use apple_crash_triage::{
    analyze, detect_patterns, triage, Category, Config, CrashReport, DetectionConfig, ParseError,
    Severity,
};

fn load_fixture(name: &str) -> String {
    fs::read_to_string(format!("tests/fixtures/{}", name)).unwrap()
}

fn pattern_ids(report: &CrashReport) -> Vec<String> {
    detect_patterns(report, &DetectionConfig::default())
        .into_iter()
        .map(|pattern| pattern.id)
        .collect()
}

/// Legacy report whose crashed thread holds the given symbols.
fn legacy_report(exception_type: &str, symbols: &[String]) -> String {
    let mut text = String::new();
    writeln!(text, "Process:         Demo [99]").unwrap();
    writeln!(text, "Identifier:      com.example.Demo").unwrap();
    writeln!(text, "OS Version:      iPhone OS 16.4 (20E247)").unwrap();
    writeln!(text, "Exception Type:  {}", exception_type).unwrap();
    writeln!(text).unwrap();
    writeln!(text, "Thread 0 Crashed:").unwrap();
    for (idx, symbol) in symbols.iter().enumerate() {
        writeln!(
            text,
            "{:<4}Demo                0x{:016x} {} + 12",
            idx,
            0x1000_0000u64 + idx as u64 * 4,
            symbol
        )
        .unwrap();
    }
    writeln!(text).unwrap();
    writeln!(text, "Binary Images:").unwrap();
    writeln!(
        text,
        "0x100000000 - 0x10fffffff Demo arm64  <2d903291397d3d14bfca52c7fb8c5e00> /var/Demo.app/Demo"
    )
    .unwrap();
    text
}

#[test]
fn test_null_pointer_scenario() {
    let analysis = analyze(&load_fixture("null_deref.crash"), None, &Config::default()).unwrap();
    let report = &analysis.report;

    assert_eq!(report.patterns.len(), 1);
    let pattern = &report.patterns[0];
    assert_eq!(pattern.id, "null_pointer_dereference");
    assert_eq!(pattern.severity, Severity::Critical);
    assert!(pattern.confidence >= 0.7);
    assert_eq!(analysis.summary.category, Category::Memory);
    assert!(analysis.summary.suggestions[0].starts_with("Symbolicate"));
    assert!(analysis
        .summary
        .suggestions
        .last()
        .unwrap()
        .contains("critical"));
}

#[test]
fn test_fixture_reports_are_consistent() {
    for name in ["null_deref.crash", "uncaught_exception.ips", "watchdog.ips"] {
        let report: CrashReport = load_fixture(name).parse().unwrap();
        let crashed = report.crashed_thread_index().expect(name);
        assert!(report.threads[crashed].crashed);
        assert_eq!(report.threads.iter().filter(|t| t.crashed).count(), 1);

        let analysis = triage(report, &DetectionConfig::default());
        let unique: HashSet<&String> = analysis.summary.suggestions.iter().collect();
        assert_eq!(unique.len(), analysis.summary.suggestions.len());
        for pattern in &analysis.report.patterns {
            assert!((0.0..=1.0).contains(&pattern.confidence));
        }
        for pair in analysis.report.patterns.windows(2) {
            assert!(
                pair[0].severity < pair[1].severity
                    || (pair[0].severity == pair[1].severity
                        && pair[0].confidence >= pair[1].confidence)
            );
        }
    }
}

#[test]
fn test_watchdog_fixture() {
    let report: CrashReport = load_fixture("watchdog.ips").parse().unwrap();
    assert_eq!(pattern_ids(&report), vec!["watchdog_termination"]);
    let analysis = triage(report, &DetectionConfig::default());
    assert_eq!(analysis.summary.category, Category::Watchdog);
}

#[test]
fn test_uncaught_exception_fixture() {
    let report: CrashReport = load_fixture("uncaught_exception.ips").parse().unwrap();
    assert_eq!(report.process_name, "Demo");
    assert_eq!(report.crashed_thread().unwrap().frames.len(), 8);
    assert_eq!(
        report.application_specific_information.as_deref(),
        Some("*** Terminating app due to uncaught exception 'NSRangeException', reason: 'index 3 beyond bounds [0 .. 1]'\nabort() called")
    );

    let patterns = detect_patterns(&report, &DetectionConfig::default());
    assert_eq!(patterns.len(), 1);
    assert_eq!(patterns[0].id, "uncaught_exception");
    assert_eq!(patterns[0].severity, Severity::High);
    assert_eq!(patterns[0].matched_frames[0].symbol, "objc_exception_throw");
}

#[test]
fn test_stack_overflow_scenario() {
    let recursive: Vec<String> = (0..80)
        .map(|i| {
            if i % 5 == 1 {
                "-[Node layoutIfNeeded]".to_string()
            } else {
                format!("frame_{}", i)
            }
        })
        .collect();
    let report: CrashReport = legacy_report("EXC_BAD_ACCESS (SIGSEGV)", &recursive)
        .parse()
        .unwrap();
    assert_eq!(report.crashed_thread().unwrap().frames.len(), 80);
    assert!(pattern_ids(&report).contains(&"stack_overflow".to_string()));

    let deep: Vec<String> = (0..80).map(|i| format!("frame_{}", i % 30)).collect();
    let report: CrashReport = legacy_report("EXC_BAD_ACCESS (SIGSEGV)", &deep)
        .parse()
        .unwrap();
    assert_eq!(report.crashed_thread().unwrap().frames.len(), 80);
    assert!(!pattern_ids(&report).contains(&"stack_overflow".to_string()));
}

#[test]
fn test_uncaught_exception_scenario() {
    let thrown = vec![
        "__pthread_kill".to_string(),
        "objc_exception_throw".to_string(),
        "-[AppDelegate load]".to_string(),
    ];
    let report: CrashReport = legacy_report("EXC_CRASH (SIGABRT)", &thrown).parse().unwrap();
    assert_eq!(pattern_ids(&report), vec!["uncaught_exception"]);

    let quiet = vec!["__pthread_kill".to_string(), "-[AppDelegate load]".to_string()];
    let report: CrashReport = legacy_report("EXC_CRASH (SIGABRT)", &quiet).parse().unwrap();
    assert!(pattern_ids(&report).is_empty());
}

#[test]
fn test_unrecognized_input() {
    for text in [
        "just some log output\nnothing to see",
        r#"{"threads": [], "usedImages": []}"#,
        "Thread 0:\n0   Demo   0x0000000100000000 main + 1\n",
    ] {
        let err = analyze(text, None, &Config::default()).unwrap_err();
        assert!(matches!(err, ParseError::UnrecognizedFormat));
    }
}

#[test]
fn test_truncated_report_degrades() {
    let text = "Process: Demo [1]\nException Type: EXC_CRASH (SIGABRT)\n\nThread 0 Crashed:\n0   Demo";
    let analysis = analyze(text, None, &Config::default()).unwrap();
    let crashed = analysis.report.crashed_thread().unwrap();
    assert!(crashed.frames.is_empty());
    assert!(analysis.report.binary_images.is_empty());
    assert!(analysis.summary.brief.contains("## Crashed thread 0"));
    assert!(analysis.summary.brief.contains("## Detected patterns"));
}
