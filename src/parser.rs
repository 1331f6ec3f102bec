use std::io::Read;

use chrono::{DateTime, FixedOffset, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::ParseError;
use crate::types::{Addr, CrashException, CrashReport};
use crate::{ips, legacy};

lazy_static! {
    static ref CRASHED_THREAD_MARKER_RE: Regex = Regex::new(
        r#"(?mx)
        ^Thread\ [0-9]+\ Crashed:
    "#
    )
    .unwrap();
    static ref FAULT_AT_RE: Regex = Regex::new(
        r#"(?x)
        \bat\ (0x[0-9a-fA-F]+)
    "#
    )
    .unwrap();
    static ref PID_SUFFIX_RE: Regex = Regex::new(
        r#"(?x)
        ^(.*?)\s*\[[0-9]+\]\s*$
    "#
    )
    .unwrap();
}

/// The grammar a crash artifact is written in.
///
/// Resolved once by [`CrashFormat::detect`]; everything after parsing works
/// on [`CrashReport`] only.
#[derive(Debug, Clone, PartialEq)]
pub enum CrashFormat {
    /// JSON `.ips` report, already decoded. One-line `.ips` headers are
    /// folded into the body object.
    Ips(Map<String, Value>),
    /// Line oriented `.crash` text.
    Legacy,
}

impl CrashFormat {
    /// Sniffs the structure of `text` to decide which grammar it uses.
    pub fn detect(text: &str) -> Option<CrashFormat> {
        if let Some(document) = json_document(text) {
            if document.contains_key("exception") {
                return Some(CrashFormat::Ips(document));
            }
        }
        if CRASHED_THREAD_MARKER_RE.is_match(text) {
            return Some(CrashFormat::Legacy);
        }
        None
    }
}

fn json_document(text: &str) -> Option<Map<String, Value>> {
    let text = text.trim_start();
    if !text.starts_with('{') {
        return None;
    }
    if let Ok(Value::Object(document)) = serde_json::from_str::<Value>(text) {
        return Some(document);
    }

    // header line followed by the report body
    let (header, body) = text.split_once('\n')?;
    let Ok(Value::Object(mut document)) = serde_json::from_str::<Value>(body) else {
        return None;
    };
    if let Ok(Value::Object(header)) = serde_json::from_str::<Value>(header) {
        for (key, value) in header {
            document.entry(key).or_insert(value);
        }
    }
    Some(document)
}

impl std::str::FromStr for CrashReport {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<CrashReport, ParseError> {
        let report = match CrashFormat::detect(s).ok_or(ParseError::UnrecognizedFormat)? {
            CrashFormat::Ips(document) => ips::parse(document, s),
            CrashFormat::Legacy => legacy::parse(s),
        };
        debug!(
            process = %report.process_name,
            threads = report.threads.len(),
            images = report.binary_images.len(),
            "parsed crash report"
        );
        Ok(report)
    }
}

impl CrashReport {
    /// Consumes a reader and parses it.
    pub fn from_reader<R: Read>(mut r: R) -> Result<CrashReport, ParseError> {
        let mut text = String::new();
        r.read_to_string(&mut text).map_err(ParseError::Io)?;
        text.parse()
    }

    /// Flags every frame owned by the main executable as application code.
    pub(crate) fn mark_app_frames(&mut self) {
        let app_binary = self
            .primary_image()
            .map(|image| image.name.clone())
            .unwrap_or_else(|| self.process_name.clone());
        for thread in &mut self.threads {
            for frame in &mut thread.frames {
                frame.is_app_code = !app_binary.is_empty() && frame.binary == app_binary;
            }
        }
    }
}

/// Parses `2019-01-09 17:42:22 +0000`, with or without fractional seconds.
pub(crate) fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::<FixedOffset>::parse_from_str(s.trim(), "%Y-%m-%d %H:%M:%S%.f %z")
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|err| debug!("unparsable timestamp {:?}: {}", s, err))
        .ok()
}

/// `MyApp [4711]` -> `MyApp`
pub(crate) fn strip_pid(process: &str) -> String {
    match PID_SUFFIX_RE.captures(process) {
        Some(caps) => caps[1].to_string(),
        None => process.trim().to_string(),
    }
}

/// Works out the faulting address from the exception details.
///
/// Subtypes and codes of the form `KERN_INVALID_ADDRESS at 0x0` name it
/// directly; for bad accesses the second exception code carries it.
pub(crate) fn fault_address(exception: &CrashException) -> Option<Addr> {
    let explicit = [exception.subtype.as_deref(), exception.codes.as_deref()]
        .into_iter()
        .flatten()
        .find_map(|text| FAULT_AT_RE.captures(text).and_then(|caps| Addr::parse(&caps[1])));
    if explicit.is_some() {
        return explicit;
    }
    if exception.is_any_of(&["EXC_BAD_ACCESS", "SIGSEGV", "SIGBUS"]) {
        let codes = exception.codes.as_deref()?;
        return codes.split(',').nth(1).and_then(Addr::parse);
    }
    None
}

#[test]
fn test_detect_formats() {
    assert!(matches!(
        CrashFormat::detect(r#"{"exception": {"type": "EXC_CRASH"}, "threads": []}"#),
        Some(CrashFormat::Ips(_))
    ));
    assert!(matches!(
        CrashFormat::detect("{\"app_name\":\"MyApp\"}\n{\"exception\":{}}"),
        Some(CrashFormat::Ips(_))
    ));
    assert_eq!(
        CrashFormat::detect("Process: MyApp [1]\n\nThread 0 Crashed:\n"),
        Some(CrashFormat::Legacy)
    );
    assert_eq!(CrashFormat::detect(r#"{"threads": []}"#), None);
    assert_eq!(CrashFormat::detect("Thread 0:\n0 foo 0x1 bar"), None);
}

#[test]
fn test_unrecognized_input_is_an_error() {
    let err = "hello world".parse::<CrashReport>().unwrap_err();
    assert!(matches!(err, ParseError::UnrecognizedFormat));
    let err = "".parse::<CrashReport>().unwrap_err();
    assert!(matches!(err, ParseError::UnrecognizedFormat));
}

#[test]
fn test_fault_address() {
    let exception = CrashException {
        exception_type: "EXC_BAD_ACCESS".into(),
        subtype: Some("KERN_INVALID_ADDRESS at 0x0000000000000010".into()),
        ..Default::default()
    };
    assert_eq!(fault_address(&exception), Some(Addr(0x10)));

    let exception = CrashException {
        exception_type: "EXC_BAD_ACCESS".into(),
        codes: Some("0x0000000000000001, 0x00000000deadbeef".into()),
        ..Default::default()
    };
    assert_eq!(fault_address(&exception), Some(Addr(0xdeadbeef)));

    let exception = CrashException {
        exception_type: "EXC_CRASH".into(),
        codes: Some("0x0000000000000000, 0x0000000000000000".into()),
        ..Default::default()
    };
    assert_eq!(fault_address(&exception), None);
}

#[test]
fn test_strip_pid() {
    assert_eq!(strip_pid("YetAnotherMac [49028]"), "YetAnotherMac");
    assert_eq!(strip_pid("MyApp"), "MyApp");
}

#[test]
fn test_from_reader() {
    let text = "Process: Demo [7]\nException Type: EXC_CRASH (SIGABRT)\n\nThread 0 Crashed:\n\
                0   Demo   0x0000000100004000 main + 16\n";
    let report = CrashReport::from_reader(text.as_bytes()).unwrap();
    assert_eq!(report.process_name, "Demo");
    assert_eq!(report.crashed_frames()[0].symbol, "main");

    let err = CrashReport::from_reader(&b"Thread 0 Crashed:\n\xff\xfe"[..]).unwrap_err();
    assert!(matches!(err, ParseError::Io(_)));

    let err = CrashReport::from_reader(&b"nothing here"[..]).unwrap_err();
    assert!(matches!(err, ParseError::UnrecognizedFormat));
}
