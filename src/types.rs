use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use tracing::debug;
use uuid::Uuid;

/// A memory address inside the crashed process.
///
/// Addresses render as fixed-width, zero padded hexadecimal strings
/// (`0x0000000100f1c2a4`) both in `Display` and when serialized.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Addr(pub u64);

impl Addr {
    /// Parses `0x`-prefixed (or bare) hexadecimal text.
    pub fn parse(s: &str) -> Option<Addr> {
        let s = s.trim();
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        if digits.is_empty() {
            return None;
        }
        u64::from_str_radix(digits, 16).ok().map(Addr)
    }

    /// Whether the address falls into the unmapped zero page.
    pub fn is_null_page(self) -> bool {
        self.0 < 0x1000
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016x}", self.0)
    }
}

impl Serialize for Addr {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_string().serialize(serializer)
    }
}

/// Operating system family the report was captured on.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Ios,
    Ipados,
    Macos,
    Watchos,
    Tvos,
    #[default]
    Unknown,
}

impl Platform {
    /// Derives the platform from an OS version string such as
    /// `iPhone OS 16.4 (20E247)` or `macOS 13.2 (22D49)`.
    pub fn from_os_version(os_version: &str) -> Platform {
        let os = os_version.to_ascii_lowercase();
        if os.contains("ipados") {
            Platform::Ipados
        } else if os.contains("iphone os") || os.contains("ios") {
            Platform::Ios
        } else if os.contains("mac os") || os.contains("macos") {
            Platform::Macos
        } else if os.contains("watch") {
            Platform::Watchos
        } else if os.contains("tvos") || os.contains("apple tv") {
            Platform::Tvos
        } else {
            Platform::Unknown
        }
    }
}

/// Triage tier of a detected pattern. Orders `Critical` first.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        })
    }
}

/// Coarse failure family used to pick remediation hints.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Memory,
    Threading,
    Resource,
    Watchdog,
    Assertion,
    Exception,
    Unknown,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Category::Memory => "memory",
            Category::Threading => "threading",
            Category::Resource => "resource",
            Category::Watchdog => "watchdog",
            Category::Assertion => "assertion",
            Category::Exception => "exception",
            Category::Unknown => "unknown",
        })
    }
}

/// Fault classification of the crash.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CrashException {
    /// Mach exception or signal family, e.g. `EXC_BAD_ACCESS`.
    pub exception_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fault_address: Option<Addr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub termination_reason: Option<String>,
}

impl CrashException {
    /// True if the exception type or the signal equals one of `names`.
    pub fn is_any_of(&self, names: &[&str]) -> bool {
        names.iter().any(|name| {
            self.exception_type.eq_ignore_ascii_case(name)
                || self
                    .signal
                    .as_deref()
                    .map_or(false, |signal| signal.eq_ignore_ascii_case(name))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StackFrame {
    /// Name of the binary image owning the frame (`???` when unknown).
    pub binary: String,
    pub address: Addr,
    /// Resolved function name, or the raw address while unresolved.
    pub symbol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    pub is_app_code: bool,
}

impl StackFrame {
    /// Whether the symbol still needs to go through symbolication.
    pub fn is_unresolved(&self) -> bool {
        is_address_like(&self.symbol)
    }
}

/// Text that stands in for a symbol the crash reporter could not name.
pub(crate) fn is_address_like(symbol: &str) -> bool {
    let symbol = symbol.trim();
    symbol.is_empty()
        || symbol.starts_with("0x")
        || symbol == "???"
        || symbol.eq_ignore_ascii_case("<unknown>")
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ThreadInfo {
    pub index: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub crashed: bool,
    /// Innermost frame first.
    pub frames: Vec<StackFrame>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BinaryImage {
    pub name: String,
    pub arch: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<Uuid>,
    pub load_address: Addr,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_address: Option<Addr>,
    pub path: String,
}

/// A catalog signature that matched a report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrashPattern {
    pub id: String,
    pub name: String,
    pub severity: Severity,
    pub category: Category,
    pub description: String,
    pub likely_cause: String,
    pub suggestion: String,
    /// Heuristic score in `[0, 1]`.
    pub confidence: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub matched_frames: Vec<StackFrame>,
}

/// Platform neutral crash report shared by both input grammars.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CrashReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub incident_identifier: Option<Uuid>,
    pub timestamp: Option<DateTime<Utc>>,
    pub platform: Platform,
    pub process_name: String,
    pub bundle_id: Option<String>,
    pub app_version: Option<String>,
    pub device_model: Option<String>,
    pub os_version: Option<String>,
    pub code_type: Option<String>,
    pub exception: CrashException,
    pub threads: Vec<ThreadInfo>,
    pub(crate) crashed_thread: Option<usize>,
    pub binary_images: Vec<BinaryImage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_specific_information: Option<String>,
    pub is_symbolicated: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub patterns: Vec<CrashPattern>,
    #[serde(skip)]
    pub raw_text: String,
}

impl CrashReport {
    /// The thread that was executing when the process died.
    pub fn crashed_thread(&self) -> Option<&ThreadInfo> {
        self.crashed_thread.and_then(|idx| self.threads.get(idx))
    }

    /// Position of the crashed thread inside `threads`.
    pub fn crashed_thread_index(&self) -> Option<usize> {
        self.crashed_thread
    }

    /// Frames of the crashed thread, or nothing if no thread crashed.
    pub fn crashed_frames(&self) -> &[StackFrame] {
        self.crashed_thread()
            .map(|thread| thread.frames.as_slice())
            .unwrap_or(&[])
    }

    /// All frames of all threads.
    pub fn frames(&self) -> impl Iterator<Item = &StackFrame> {
        self.threads.iter().flat_map(|thread| thread.frames.iter())
    }

    /// Fixes up the crashed flags so exactly one thread carries them.
    ///
    /// An explicitly marked thread wins; only the first one keeps the flag.
    /// Without any marked thread, `hint` (the reporter's "crashed thread"
    /// number) selects the thread with that index, and failing that the
    /// first thread is taken.
    pub(crate) fn settle_crashed_thread(&mut self, hint: Option<u64>) {
        let mut found = None;
        for (idx, thread) in self.threads.iter_mut().enumerate() {
            if thread.crashed {
                if found.is_some() {
                    thread.crashed = false;
                } else {
                    found = Some(idx);
                }
            }
        }
        if found.is_none() {
            if let Some(hint) = hint {
                found = self.threads.iter().position(|thread| thread.index == hint);
            }
        }
        if found.is_none() && !self.threads.is_empty() {
            debug!("no crashed thread marked, falling back to the first thread");
            found = Some(0);
        }
        if let Some(idx) = found {
            self.threads[idx].crashed = true;
        }
        self.crashed_thread = found;
    }

    /// The main executable image, matched by process name or bundle id.
    pub fn primary_image(&self) -> Option<&BinaryImage> {
        let by_process = self
            .binary_images
            .iter()
            .find(|image| !self.process_name.is_empty() && image.name == self.process_name);
        by_process.or_else(|| {
            let bundle_tail = self.bundle_id.as_deref()?.rsplit('.').next()?;
            self.binary_images
                .iter()
                .find(|image| image.name.eq_ignore_ascii_case(bundle_tail))
        })
    }
}

#[test]
fn test_addr_parse_and_display() {
    assert_eq!(Addr::parse("0x10"), Some(Addr(16)));
    assert_eq!(Addr::parse("ff"), Some(Addr(255)));
    assert_eq!(Addr::parse("0x"), None);
    assert_eq!(Addr::parse("zz"), None);
    assert_eq!(Addr(0x1a).to_string(), "0x000000000000001a");
    assert!(Addr(0).is_null_page());
    assert!(Addr(0x10).is_null_page());
    assert!(!Addr(0x4000).is_null_page());
}

#[test]
fn test_severity_orders_critical_first() {
    let mut tiers = vec![Severity::Low, Severity::Critical, Severity::Medium, Severity::High];
    tiers.sort();
    assert_eq!(
        tiers,
        vec![Severity::Critical, Severity::High, Severity::Medium, Severity::Low]
    );
}

#[test]
fn test_platform_from_os_version() {
    assert_eq!(Platform::from_os_version("iPhone OS 16.4 (20E247)"), Platform::Ios);
    assert_eq!(Platform::from_os_version("iPadOS 17.0"), Platform::Ipados);
    assert_eq!(Platform::from_os_version("Mac OS X 10.14.0 (18A391)"), Platform::Macos);
    assert_eq!(Platform::from_os_version("Haiku"), Platform::Unknown);
}

#[test]
fn test_settle_crashed_thread() {
    let mut report = CrashReport {
        threads: vec![
            ThreadInfo { index: 0, ..Default::default() },
            ThreadInfo { index: 1, crashed: true, ..Default::default() },
            ThreadInfo { index: 2, crashed: true, ..Default::default() },
        ],
        ..Default::default()
    };
    report.settle_crashed_thread(Some(0));
    assert_eq!(report.crashed_thread_index(), Some(1));
    assert_eq!(report.threads.iter().filter(|t| t.crashed).count(), 1);

    let mut report = CrashReport {
        threads: vec![
            ThreadInfo { index: 0, ..Default::default() },
            ThreadInfo { index: 3, ..Default::default() },
        ],
        ..Default::default()
    };
    report.settle_crashed_thread(Some(3));
    assert_eq!(report.crashed_thread().map(|t| t.index), Some(3));
    assert!(report.threads[1].crashed);
}

#[test]
fn test_settle_crashed_thread_falls_back_to_first() {
    let mut report = CrashReport {
        threads: vec![
            ThreadInfo { index: 4, ..Default::default() },
            ThreadInfo { index: 5, ..Default::default() },
        ],
        ..Default::default()
    };
    report.settle_crashed_thread(None);
    assert_eq!(report.crashed_thread_index(), Some(0));
    assert!(report.threads[0].crashed);
    assert!(!report.threads[1].crashed);

    // a hint naming a missing thread behaves like no hint
    report.threads[0].crashed = false;
    report.settle_crashed_thread(Some(9));
    assert_eq!(report.crashed_thread().map(|t| t.index), Some(4));

    let mut report = CrashReport::default();
    report.settle_crashed_thread(Some(0));
    assert!(report.crashed_thread().is_none());
}
