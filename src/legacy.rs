//! Parser for the line oriented `.crash` text format.
use std::collections::BTreeMap;

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, trace};

use crate::parser::{fault_address, parse_timestamp, strip_pid};
use crate::types::{Addr, BinaryImage, CrashReport, Platform, StackFrame, ThreadInfo};

lazy_static! {
    static ref KEY_VALUE_RE: Regex = Regex::new(
        r#"(?x)
        ^\s*(.*?)\s*:\s*(.*?)\s*$
    "#
    )
    .unwrap();
    static ref THREAD_RE: Regex = Regex::new(
        r#"(?x)
        ^Thread\ ([0-9]+)(\ Crashed)?::?\s*(.+?)?\s*$
    "#
    )
    .unwrap();
    static ref THREAD_NAME_RE: Regex = Regex::new(
        r#"(?x)
        ^Thread\ ([0-9]+)\ name:\s*(.*?)\s*$
    "#
    )
    .unwrap();
    static ref THREAD_STATE_RE: Regex = Regex::new(
        r#"(?x)
        ^Thread\ ([0-9]+)\ crashed\ with\ .*?\ Thread\ State.*:\s*$
    "#
    )
    .unwrap();
    static ref FRAME_RE: Regex = Regex::new(
        r#"(?x)
        ^
            [0-9]+ \s+
            (\S+) \s+
            (0x[0-9a-fA-F]+)
            (?:\s+ (.*?))?
            (?:\s+ \+ \s+ ([0-9]+))?
            (?:\s+ \( ([^()]*?) : ([0-9]+) \))?
            \s*
        $
    "#
    )
    .unwrap();
    static ref BINARY_IMAGE_RE: Regex = Regex::new(
        r#"(?x)
        ^
            \s*
            (0x[0-9a-fA-F]+) \s*
            -
            \s*
            (0x[0-9a-fA-F]+|\?\?\?) \s+
            \+?(.+?) \s+
            (\S+) \s+
            (?:\([^)]*\)\s+)?
            <?([0-9a-fA-F]{8}-?[0-9a-fA-F]{4}-?[0-9a-fA-F]{4}-?[0-9a-fA-F]{4}-?[0-9a-fA-F]{12})>?
            \s+
            (.*?)
        $
    "#
    )
    .unwrap();
    static ref EXCEPTION_TYPE_RE: Regex = Regex::new(
        r#"(?x)
        ^(\S+)(?:\s+\((\S+)\))?
    "#
    )
    .unwrap();
}

enum ParsingState {
    Header,
    Thread,
    BinaryImages,
    ThreadState,
    ApplicationSpecificInformation,
}

/// Parses a legacy report. Lines that do not fit their section are skipped.
pub(crate) fn parse(text: &str) -> CrashReport {
    let mut state = ParsingState::Header;
    let mut thread: Option<ThreadInfo> = None;
    let mut thread_names = BTreeMap::new();
    let mut crashed_hint = None;

    let mut rv = CrashReport {
        raw_text: text.to_string(),
        ..Default::default()
    };

    for line in text.lines() {
        let line = line.trim_end();

        state = match state {
            ParsingState::Header => {
                if line.is_empty() {
                    continue;
                } else if line.starts_with("Binary Images:") {
                    ParsingState::BinaryImages
                } else if line.starts_with("Application Specific Information:") {
                    ParsingState::ApplicationSpecificInformation
                } else if THREAD_STATE_RE.is_match(line) {
                    ParsingState::ThreadState
                } else if let Some(caps) = THREAD_NAME_RE.captures(line) {
                    if let Ok(index) = caps[1].parse::<u64>() {
                        thread_names.insert(index, caps[2].to_string());
                    }
                    ParsingState::Header
                } else if let Some(started) = start_thread(line, &thread_names) {
                    thread = Some(started);
                    ParsingState::Thread
                } else if let Some(caps) = KEY_VALUE_RE.captures(line) {
                    apply_header(&mut rv, &mut crashed_hint, &caps[1], &caps[2]);
                    ParsingState::Header
                } else {
                    ParsingState::Header
                }
            }
            ParsingState::Thread => {
                if line.is_empty() {
                    rv.threads.extend(thread.take());
                    ParsingState::Header
                } else if line.starts_with("Binary Images:") {
                    rv.threads.extend(thread.take());
                    ParsingState::BinaryImages
                } else if let Some(caps) = THREAD_NAME_RE.captures(line) {
                    rv.threads.extend(thread.take());
                    if let Ok(index) = caps[1].parse::<u64>() {
                        thread_names.insert(index, caps[2].to_string());
                    }
                    ParsingState::Header
                } else if let Some(started) = start_thread(line, &thread_names) {
                    rv.threads.extend(thread.replace(started));
                    ParsingState::Thread
                } else if let Some(frame) = parse_frame(line) {
                    if let Some(thread) = thread.as_mut() {
                        thread.frames.push(frame);
                    }
                    ParsingState::Thread
                } else {
                    debug!("skipping malformed frame line: {:?}", line);
                    ParsingState::Thread
                }
            }
            ParsingState::BinaryImages => {
                if line.is_empty() {
                    ParsingState::Header
                } else if let Some(image) = parse_binary_image(line) {
                    rv.binary_images.push(image);
                    ParsingState::BinaryImages
                } else {
                    debug!("skipping malformed binary image line: {:?}", line);
                    ParsingState::BinaryImages
                }
            }
            ParsingState::ThreadState => {
                if line.is_empty() {
                    ParsingState::Header
                } else {
                    trace!("ignoring register line: {:?}", line);
                    ParsingState::ThreadState
                }
            }
            ParsingState::ApplicationSpecificInformation => {
                if line.is_empty() {
                    ParsingState::Header
                } else {
                    let mut info = rv.application_specific_information.unwrap_or_default();
                    if !info.is_empty() {
                        info.push('\n');
                    }
                    info.push_str(line.trim());
                    rv.application_specific_information = Some(info);
                    ParsingState::ApplicationSpecificInformation
                }
            }
        }
    }

    rv.threads.extend(thread.take());

    rv.exception.fault_address = fault_address(&rv.exception);
    rv.settle_crashed_thread(crashed_hint);
    rv.mark_app_frames();
    rv
}

fn start_thread(line: &str, names: &BTreeMap<u64, String>) -> Option<ThreadInfo> {
    let caps = THREAD_RE.captures(line)?;
    let index = caps[1].parse().ok()?;
    let name = caps
        .get(3)
        .map(|m| m.as_str().to_string())
        .or_else(|| names.get(&index).cloned());
    Some(ThreadInfo {
        index,
        name,
        crashed: caps.get(2).is_some(),
        frames: vec![],
    })
}

fn apply_header(rv: &mut CrashReport, crashed_hint: &mut Option<u64>, key: &str, value: &str) {
    let value = value.trim();
    if value.is_empty() {
        return;
    }
    match key {
        "Incident Identifier" => rv.incident_identifier = value.parse().ok(),
        "Process" => rv.process_name = strip_pid(value),
        "Identifier" => rv.bundle_id = Some(value.to_string()),
        "Version" => rv.app_version = Some(value.to_string()),
        "Hardware Model" => rv.device_model = Some(value.to_string()),
        "Code Type" => rv.code_type = Some(value.to_string()),
        "Date/Time" => rv.timestamp = parse_timestamp(value),
        "OS Version" => {
            rv.platform = Platform::from_os_version(value);
            rv.os_version = Some(value.to_string());
        }
        "Exception Type" => {
            if let Some(caps) = EXCEPTION_TYPE_RE.captures(value) {
                rv.exception.exception_type = caps[1].to_string();
                rv.exception.signal = caps.get(2).map(|m| m.as_str().to_string());
                if rv.exception.signal.is_none() && caps[1].starts_with("SIG") {
                    rv.exception.signal = Some(caps[1].to_string());
                }
            }
        }
        "Exception Subtype" => rv.exception.subtype = Some(value.to_string()),
        "Exception Codes" => rv.exception.codes = Some(value.to_string()),
        "Termination Reason" => rv.exception.termination_reason = Some(value.to_string()),
        "Crashed Thread" | "Triggered by Thread" => {
            let digits: String = value.chars().take_while(char::is_ascii_digit).collect();
            *crashed_hint = digits.parse().ok();
        }
        _ => {}
    }
}

fn parse_frame(line: &str) -> Option<StackFrame> {
    let caps = FRAME_RE.captures(line)?;
    let address = Addr::parse(&caps[2])?;
    let symbol = caps.get(3).map(|m| m.as_str()).unwrap_or("");

    // `0x104a30000 + 5384491` is an image base plus offset, not a symbol
    let (symbol, offset) = if symbol.is_empty() || Addr::parse(symbol).is_some() {
        (address.to_string(), None)
    } else {
        (
            symbol.to_string(),
            caps.get(4).and_then(|m| m.as_str().parse().ok()),
        )
    };

    Some(StackFrame {
        binary: caps[1].to_string(),
        address,
        symbol,
        offset,
        file: caps.get(5).map(|m| m.as_str().to_string()),
        line: caps.get(6).and_then(|m| m.as_str().parse().ok()),
        is_app_code: false,
    })
}

fn parse_binary_image(line: &str) -> Option<BinaryImage> {
    let caps = BINARY_IMAGE_RE.captures(line)?;
    Some(BinaryImage {
        load_address: Addr::parse(&caps[1])?,
        end_address: Addr::parse(&caps[2]),
        name: caps[3].trim().to_string(),
        arch: caps[4].to_string(),
        uuid: caps[5].parse().ok(),
        path: caps[6].to_string(),
    })
}

#[test]
fn test_basic_parsing() {
    let report = parse(
        r#"
Incident Identifier: 5C32DF84-31A0-43E7-87D0-239F7F594940
Hardware Model:      MacBookPro14,3
Process:         YetAnotherMac [49028]
Path:            /Users/bruno/YetAnotherMac.app/Contents/MacOS/YetAnotherMac
Identifier:      com.YourCompany.YetAnotherMac
Version:         4.21.1
Code Type:       X86-64
Parent Process:  launchd [1]

Date/Time:       2019-01-09 17:42:22 +0000
OS Version:      Mac OS X 10.14.0 (18A391)
Report Version:  104

Exception Type:  SIGSEGV
Exception Codes: SEGV_MAPERR at 0x88
Crashed Thread:  1

Application Specific Information:
objc_msgSend() selector name: respondsToSelector:
  more information here

Thread 0:
0   libsystem_kernel.dylib              0x00007fff61bc6c2a 0x7fff61bc6000 + 3114
1   YetAnotherMac                       0x0000000108b7092b 0x10864e000 + 5384491
2   YetAnotherMac                       0x0000000108b702a6 a_function_here + 64
3   libdyld.dylib                       0x00007fff61a8e085 start + 0
4   YetAnotherMac                       0x00000000000ea004 main (main.m:16)

Thread 1 Crashed: Test Thread Name
0   libsystem_kernel.dylib              0x00007fff61bc85be 0x7fff61bc6000 + 9662
this line is garbage
1   libsystem_pthread.dylib             0x00007fff61c7f415 0x7fff61c7d000 + 9237
2   ???                                 0x0000000054485244 0x0 + 0

Thread 1 crashed with X86-64 Thread State:
   rip: 0x00000001090a0132    rbp: 0x0000700015a616d0    rsp: 0x0000700015a613f0

Binary Images:
       0x10864e000 -        0x10ee0ffff +YetAnotherMac x86_64 (400.9.4 - 1.0.0) <2d903291397d3d14bfca52c7fb8c5e00> /Users/bruno/YetAnotherMac.app/Contents/MacOS/YetAnotherMac
       0x112bb2000 -        0x112dc3fff  libPhysX3PROFILE.dylib x86_64 (0.0.0 - 0.0.0) <6deccee4a0523ea4bb67957b06f53ad1> /Users/bruno/libPhysX3PROFILE.dylib
       not an image line
"#,
    );

    assert_eq!(report.process_name, "YetAnotherMac");
    assert_eq!(report.bundle_id.as_deref(), Some("com.YourCompany.YetAnotherMac"));
    assert_eq!(report.platform, Platform::Macos);
    assert_eq!(
        report.timestamp.map(|t| t.to_rfc3339()).as_deref(),
        Some("2019-01-09T17:42:22+00:00")
    );
    assert_eq!(report.exception.exception_type, "SIGSEGV");
    assert_eq!(report.exception.signal.as_deref(), Some("SIGSEGV"));
    assert_eq!(report.exception.fault_address, Some(Addr(0x88)));
    assert_eq!(
        report.application_specific_information.as_deref(),
        Some("objc_msgSend() selector name: respondsToSelector:\nmore information here")
    );

    assert_eq!(report.threads.len(), 2);
    let crashed = report.crashed_thread().unwrap();
    assert_eq!(crashed.index, 1);
    assert_eq!(crashed.name.as_deref(), Some("Test Thread Name"));
    assert_eq!(crashed.frames.len(), 3);

    let frames = &report.threads[0].frames;
    assert_eq!(frames[1].symbol, "0x0000000108b7092b");
    assert!(frames[1].is_app_code);
    assert!(frames[1].is_unresolved());
    assert_eq!(frames[2].symbol, "a_function_here");
    assert_eq!(frames[2].offset, Some(64));
    assert_eq!(frames[4].symbol, "main");
    assert_eq!(frames[4].file.as_deref(), Some("main.m"));
    assert_eq!(frames[4].line, Some(16));
    assert!(!frames[3].is_app_code);

    assert_eq!(report.binary_images.len(), 2);
    let image = &report.binary_images[0];
    assert_eq!(image.name, "YetAnotherMac");
    assert_eq!(image.arch, "x86_64");
    assert_eq!(image.load_address, Addr(0x10864e000));
    assert_eq!(image.end_address, Some(Addr(0x10ee0ffff)));
    assert_eq!(
        image.uuid.map(|u| u.to_string()).as_deref(),
        Some("2d903291-397d-3d14-bfca-52c7fb8c5e00")
    );
}

#[test]
fn test_ios_image_line_and_named_threads() {
    let report = parse(
        "Process: Demo [12]\n\
         Exception Type:  EXC_BAD_ACCESS (SIGSEGV)\n\
         Exception Subtype: KERN_INVALID_ADDRESS at 0x0000000000000000\n\
         \n\
         Thread 0 name:  Dispatch queue: com.apple.main-thread\n\
         Thread 0 Crashed:\n\
         0   Demo    0x0000000100f1c2a4 -[ViewController crash:] + 44 (ViewController.m:30)\n\
         \n\
         Binary Images:\n\
         0x100f14000 - 0x100f1ffff Demo arm64  <2d903291397d3d14bfca52c7fb8c5e00> /var/containers/Bundle/Application/X/Demo.app/Demo\n",
    );
    assert_eq!(report.exception.exception_type, "EXC_BAD_ACCESS");
    assert_eq!(report.exception.signal.as_deref(), Some("SIGSEGV"));
    assert_eq!(report.exception.fault_address, Some(Addr(0)));

    let crashed = report.crashed_thread().unwrap();
    assert_eq!(crashed.name.as_deref(), Some("Dispatch queue: com.apple.main-thread"));
    let frame = &crashed.frames[0];
    assert_eq!(frame.symbol, "-[ViewController crash:]");
    assert_eq!(frame.offset, Some(44));
    assert_eq!(frame.file.as_deref(), Some("ViewController.m"));
    assert_eq!(frame.line, Some(30));
    assert!(frame.is_app_code);

    assert_eq!(report.binary_images.len(), 1);
    assert_eq!(report.binary_images[0].name, "Demo");
    assert_eq!(report.binary_images[0].arch, "arm64");
}

#[test]
fn test_thread_name_directly_after_frames() {
    let report = parse(
        "Process: Demo [12]\n\
         Exception Type:  EXC_CRASH (SIGABRT)\n\
         \n\
         Thread 0 Crashed:\n\
         0   libsystem_kernel.dylib  0x00000001f0a1b2c4 __pthread_kill + 8\n\
         Thread 1 name:  com.example.worker\n\
         Thread 1:\n\
         0   libsystem_pthread.dylib 0x00000001f0a1c000 start_wqthread + 0\n",
    );
    assert_eq!(report.threads.len(), 2);
    assert_eq!(report.threads[0].frames.len(), 1);
    assert_eq!(report.threads[1].name.as_deref(), Some("com.example.worker"));
    assert_eq!(report.threads[1].frames.len(), 1);
    assert_eq!(report.crashed_thread_index(), Some(0));
}
