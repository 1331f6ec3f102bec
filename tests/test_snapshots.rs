use std::fs;

use apple_crash_triage::{triage, CrashReport, DetectionConfig};
use insta::assert_snapshot;

fn load_fixture(name: &str) -> String {
    fs::read_to_string(format!("tests/fixtures/{}", name)).unwrap()
}

#[test]
fn test_null_deref_brief() {
    let fixture = load_fixture("null_deref.crash");
    let report: CrashReport = fixture.parse().unwrap();
    let analysis = triage(report, &DetectionConfig::default());
    assert_snapshot!("null_deref_brief", analysis.summary.brief);
}

#[test]
fn test_uncaught_exception_brief() {
    let fixture = load_fixture("uncaught_exception.ips");
    let report: CrashReport = fixture.parse().unwrap();
    let analysis = triage(report, &DetectionConfig::default());
    assert_snapshot!("uncaught_exception_brief", analysis.summary.brief);
}
