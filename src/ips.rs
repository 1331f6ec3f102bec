//! Parser for the JSON based `.ips` crash report format.
use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::parser::{fault_address, parse_timestamp};
use crate::types::{
    Addr, BinaryImage, CrashException, CrashReport, Platform, StackFrame, ThreadInfo,
};

/// Accepts any JSON value and keeps it only if it has the expected shape.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct IpsReport {
    #[serde(deserialize_with = "lenient")]
    app_name: Option<String>,
    #[serde(deserialize_with = "lenient")]
    app_version: Option<String>,
    #[serde(rename = "bundleID", deserialize_with = "lenient")]
    bundle_id: Option<String>,
    #[serde(deserialize_with = "lenient")]
    os_version: Option<String>,
    #[serde(deserialize_with = "lenient")]
    timestamp: Option<String>,
    #[serde(deserialize_with = "lenient")]
    incident_id: Option<String>,
    #[serde(rename = "incident", deserialize_with = "lenient")]
    body_incident: Option<String>,
    #[serde(rename = "procName", deserialize_with = "lenient")]
    proc_name: Option<String>,
    #[serde(rename = "modelCode", deserialize_with = "lenient")]
    model_code: Option<String>,
    #[serde(rename = "osVersion", deserialize_with = "lenient")]
    body_os_version: Option<IpsOsVersion>,
    #[serde(rename = "captureTime", deserialize_with = "lenient")]
    capture_time: Option<String>,
    #[serde(rename = "cpuType", deserialize_with = "lenient")]
    cpu_type: Option<String>,
    #[serde(deserialize_with = "lenient")]
    exception: Option<IpsException>,
    #[serde(deserialize_with = "lenient")]
    termination: Option<IpsTermination>,
    #[serde(rename = "faultingThread", deserialize_with = "lenient")]
    faulting_thread: Option<u64>,
    #[serde(deserialize_with = "lenient")]
    threads: Option<Vec<Value>>,
    #[serde(rename = "usedImages", deserialize_with = "lenient")]
    used_images: Option<Vec<Value>>,
    #[serde(deserialize_with = "lenient")]
    asi: Option<BTreeMap<String, Vec<String>>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct IpsOsVersion {
    train: Option<String>,
    build: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct IpsException {
    #[serde(rename = "type")]
    ty: Option<String>,
    signal: Option<String>,
    subtype: Option<String>,
    codes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct IpsTermination {
    namespace: Option<String>,
    code: Option<u64>,
    indicator: Option<String>,
    reasons: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct IpsThread {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    queue: Option<String>,
    #[serde(default)]
    triggered: bool,
    #[serde(default)]
    frames: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IpsFrame {
    image_offset: u64,
    #[serde(default)]
    image_index: Option<usize>,
    #[serde(default)]
    symbol: Option<String>,
    #[serde(default)]
    symbol_location: Option<u64>,
    #[serde(default)]
    source_file: Option<String>,
    #[serde(default)]
    source_line: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct IpsImage {
    base: u64,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    uuid: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    arch: Option<String>,
}

impl IpsTermination {
    fn describe(&self) -> Option<String> {
        let mut parts = vec![];
        if let Some(namespace) = &self.namespace {
            parts.push(format!("Namespace {}", namespace));
        }
        if let Some(code) = self.code {
            parts.push(format!("Code 0x{:x}", code));
        }
        if let Some(indicator) = &self.indicator {
            parts.push(indicator.clone());
        }
        parts.extend(self.reasons.iter().cloned());
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(", "))
        }
    }
}

/// Decodes the elements of a JSON array one by one, dropping the ones
/// that do not have the expected shape.
fn decode_each<T: DeserializeOwned>(what: &str, values: Vec<Value>) -> Vec<Option<T>> {
    values
        .into_iter()
        .map(|value| {
            serde_json::from_value(value)
                .map_err(|err| debug!("skipping malformed {}: {}", what, err))
                .ok()
        })
        .collect()
}

fn convert_image(image: IpsImage) -> BinaryImage {
    let name = image
        .name
        .clone()
        .or_else(|| {
            image
                .path
                .as_deref()
                .and_then(|path| path.rsplit('/').next())
                .map(str::to_string)
        })
        .unwrap_or_else(|| "???".to_string());
    BinaryImage {
        name,
        arch: image.arch.unwrap_or_default(),
        uuid: image.uuid.and_then(|uuid| uuid.parse().ok()),
        load_address: Addr(image.base),
        end_address: image
            .size
            .filter(|size| *size > 0)
            .and_then(|size| image.base.checked_add(size - 1))
            .map(Addr),
        path: image.path.unwrap_or_default(),
    }
}

fn convert_frame(frame: IpsFrame, images: &[Option<BinaryImage>]) -> StackFrame {
    let image = frame
        .image_index
        .and_then(|idx| images.get(idx))
        .and_then(Option::as_ref);
    let address = Addr(match image {
        Some(image) => image.load_address.0.wrapping_add(frame.image_offset),
        None => frame.image_offset,
    });
    let (symbol, offset) = match frame.symbol {
        Some(symbol) if !symbol.is_empty() => (symbol, frame.symbol_location),
        _ => (address.to_string(), None),
    };
    StackFrame {
        binary: image
            .map(|image| image.name.clone())
            .unwrap_or_else(|| "???".to_string()),
        address,
        symbol,
        offset,
        file: frame.source_file,
        line: frame.source_line,
        is_app_code: false,
    }
}

/// Builds a report from a decoded `.ips` document.
pub(crate) fn parse(document: Map<String, Value>, text: &str) -> CrashReport {
    let ips: IpsReport = serde_json::from_value(Value::Object(document))
        .map_err(|err| warn!("unreadable ips document: {}", err))
        .unwrap_or_default();

    let images: Vec<Option<BinaryImage>> =
        decode_each::<IpsImage>("image", ips.used_images.unwrap_or_default())
            .into_iter()
            .map(|image| image.map(convert_image))
            .collect();

    let threads = decode_each::<IpsThread>("thread", ips.threads.unwrap_or_default())
        .into_iter()
        .enumerate()
        .filter_map(|(index, thread)| {
            let thread = thread?;
            let frames = decode_each::<IpsFrame>("frame", thread.frames)
                .into_iter()
                .flatten()
                .map(|frame| convert_frame(frame, &images))
                .collect();
            Some(ThreadInfo {
                index: index as u64,
                name: thread.name.or(thread.queue),
                crashed: thread.triggered,
                frames,
            })
        })
        .collect();

    let os_version = ips.os_version.or_else(|| {
        let os = ips.body_os_version?;
        let train = os.train?;
        Some(match os.build {
            Some(build) => format!("{} ({})", train, build),
            None => train,
        })
    });

    let exception = ips.exception.unwrap_or_default();
    let mut exception = CrashException {
        exception_type: exception.ty.unwrap_or_default(),
        codes: exception.codes,
        signal: exception.signal,
        subtype: exception.subtype,
        fault_address: None,
        termination_reason: ips.termination.as_ref().and_then(IpsTermination::describe),
    };
    exception.fault_address = fault_address(&exception);

    let application_specific_information = ips.asi.map(|asi| {
        asi.into_values()
            .flatten()
            .collect::<Vec<_>>()
            .join("\n")
    });

    let mut rv = CrashReport {
        incident_identifier: ips
            .incident_id
            .or(ips.body_incident)
            .and_then(|id| id.parse().ok()),
        timestamp: ips
            .capture_time
            .or(ips.timestamp)
            .as_deref()
            .and_then(parse_timestamp),
        platform: os_version
            .as_deref()
            .map(Platform::from_os_version)
            .unwrap_or_default(),
        process_name: ips.proc_name.or(ips.app_name).unwrap_or_default(),
        bundle_id: ips.bundle_id,
        app_version: ips.app_version,
        device_model: ips.model_code,
        os_version,
        code_type: ips.cpu_type,
        exception,
        threads,
        binary_images: images.into_iter().flatten().collect(),
        application_specific_information,
        raw_text: text.to_string(),
        ..Default::default()
    };
    rv.settle_crashed_thread(ips.faulting_thread);
    rv.mark_app_frames();
    rv
}

#[test]
fn test_header_and_body() {
    let text = r#"{"app_name":"Demo","app_version":"1.2","bundleID":"com.example.Demo","os_version":"iPhone OS 16.4 (20E247)","timestamp":"2023-05-01 10:11:12.00 +0200","incident_id":"5C32DF84-31A0-43E7-87D0-239F7F594940"}
{
  "procName": "Demo",
  "modelCode": "iPhone14,2",
  "cpuType": "ARM-64",
  "exception": {"type": "EXC_BAD_ACCESS", "signal": "SIGSEGV", "subtype": "KERN_INVALID_ADDRESS at 0x0000000000000000", "codes": "0x0000000000000001, 0x0000000000000000"},
  "faultingThread": 1,
  "threads": [
    {"id": 100, "queue": "com.apple.main-thread", "frames": [{"imageOffset": 4096, "imageIndex": 1}]},
    {"id": 101, "triggered": true, "frames": [
      {"imageOffset": 16, "imageIndex": 0, "symbol": "-[ViewController crash]", "symbolLocation": 16, "sourceFile": "ViewController.m", "sourceLine": 30},
      "garbage",
      {"imageOffset": 32, "imageIndex": 7},
      {"imageOffset": 48, "imageIndex": 0}
    ]},
    42
  ],
  "usedImages": [
    {"base": 4294967296, "size": 65536, "uuid": "2d903291-397d-3d14-bfca-52c7fb8c5e00", "name": "Demo", "path": "/private/var/containers/Bundle/Application/X/Demo.app/Demo", "arch": "arm64"},
    {"base": 6442450944, "uuid": "6deccee4-a052-3ea4-bb67-957b06f53ad1", "path": "/usr/lib/system/libsystem_kernel.dylib", "arch": "arm64e"}
  ]
}"#;
    let report: CrashReport = text.parse().unwrap();

    assert_eq!(report.process_name, "Demo");
    assert_eq!(report.bundle_id.as_deref(), Some("com.example.Demo"));
    assert_eq!(report.app_version.as_deref(), Some("1.2"));
    assert_eq!(report.device_model.as_deref(), Some("iPhone14,2"));
    assert_eq!(report.platform, Platform::Ios);
    assert_eq!(
        report.timestamp.map(|t| t.to_rfc3339()).as_deref(),
        Some("2023-05-01T08:11:12+00:00")
    );
    assert!(report.incident_identifier.is_some());
    assert_eq!(report.exception.exception_type, "EXC_BAD_ACCESS");
    assert_eq!(report.exception.fault_address, Some(Addr(0)));

    assert_eq!(report.threads.len(), 2);
    assert_eq!(report.threads[0].name.as_deref(), Some("com.apple.main-thread"));
    assert_eq!(report.threads[0].frames[0].binary, "libsystem_kernel.dylib");

    let crashed = report.crashed_thread().unwrap();
    assert_eq!(crashed.index, 1);
    assert_eq!(crashed.frames.len(), 3);
    assert_eq!(crashed.frames[0].symbol, "-[ViewController crash]");
    assert_eq!(crashed.frames[0].address, Addr(0x1_0000_0010));
    assert_eq!(crashed.frames[0].line, Some(30));
    assert!(crashed.frames[0].is_app_code);
    assert_eq!(crashed.frames[1].binary, "???");
    assert!(!crashed.frames[1].is_app_code);
    assert_eq!(crashed.frames[2].symbol, "0x0000000100000030");
    assert!(crashed.frames[2].is_unresolved());

    assert_eq!(report.binary_images.len(), 2);
    assert_eq!(report.binary_images[0].end_address, Some(Addr(0x1_0000_ffff)));
}

#[test]
fn test_single_object_with_termination() {
    let text = r#"{
      "app_name": "Demo",
      "exception": {"type": "EXC_CRASH", "signal": "SIGKILL"},
      "termination": {"namespace": "FRONTBOARD", "code": 2343432205, "indicator": "scene-update watchdog"},
      "asi": {"libsystem_c.dylib": ["abort() called"]},
      "threads": "not a list"
    }"#;
    let report: CrashReport = text.parse().unwrap();
    assert_eq!(report.process_name, "Demo");
    assert!(report.threads.is_empty());
    assert!(report.crashed_thread().is_none());
    assert_eq!(
        report.exception.termination_reason.as_deref(),
        Some("Namespace FRONTBOARD, Code 0x8badf00d, scene-update watchdog")
    );
    assert_eq!(
        report.application_specific_information.as_deref(),
        Some("abort() called")
    );
}

#[test]
fn test_unmarked_threads_fall_back_to_first() {
    let text = r#"{
      "procName": "Demo",
      "exception": {"type": "EXC_CRASH", "signal": "SIGABRT"},
      "threads": [
        {"frames": [{"imageOffset": 1, "symbol": "objc_exception_throw"}]},
        {"frames": []}
      ]
    }"#;
    let report: CrashReport = text.parse().unwrap();
    assert_eq!(report.threads.len(), 2);
    assert_eq!(report.crashed_thread_index(), Some(0));
    let flags: Vec<bool> = report.threads.iter().map(|t| t.crashed).collect();
    assert_eq!(flags, vec![true, false]);

    let patterns = crate::patterns::detect_patterns(&report, &Default::default());
    assert_eq!(patterns[0].id, "uncaught_exception");
}
