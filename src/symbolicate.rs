//! Resolves application frames against a dSYM archive.
//!
//! Address lookup is delegated to an [`AddressResolver`]. The default
//! [`XcrunResolver`] drives the Xcode command line tools (`atos` for
//! lookups, `dwarfdump --uuid` to identify the archive) as child processes
//! with a hard timeout. Every failure on this path leaves the affected
//! frames unresolved; nothing here returns an error to the caller.
use std::ffi::OsString;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::config::ResolverConfig;
use crate::error::ResolveError;
use crate::types::{is_address_like, Addr, CrashReport};

lazy_static! {
    static ref ATOS_LINE_RE: Regex = Regex::new(
        r#"(?x)
        ^
            (.+?)
            \s+ \(in\ [^)]+\)
            (?:\s+ \+ \s+ ([0-9]+))?
            (?:\s+ \( ([^()]*?) : ([0-9]+) \))?
            \s*
        $
    "#
    )
    .unwrap();
    static ref DWARFDUMP_UUID_RE: Regex = Regex::new(
        r#"(?x)
        UUID:\s+([0-9A-Fa-f-]{32,36})
    "#
    )
    .unwrap();
}

/// Relative location of the DWARF payloads inside a `.dSYM` bundle.
const DWARF_SUBPATH: &str = "Contents/Resources/DWARF";

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// One batched lookup: every address of one image.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolveRequest<'a> {
    pub debug_file: &'a Path,
    pub arch: &'a str,
    pub load_address: Addr,
    pub addresses: &'a [Addr],
}

/// Offline address to symbol lookup.
pub trait AddressResolver {
    /// UUIDs of the debug information stored in `debug_file`.
    fn debug_uuids(&self, debug_file: &Path) -> Result<Vec<Uuid>, ResolveError>;

    /// Resolves `request.addresses` and returns one line per address in the
    /// same order. Lines that merely echo the address back mean "unknown".
    fn resolve(&self, request: &ResolveRequest<'_>) -> Result<Vec<String>, ResolveError>;
}

/// [`AddressResolver`] backed by `atos` and `dwarfdump`.
#[derive(Debug, Clone, Default)]
pub struct XcrunResolver {
    config: ResolverConfig,
}

impl XcrunResolver {
    pub fn new(config: ResolverConfig) -> XcrunResolver {
        XcrunResolver { config }
    }
}

impl AddressResolver for XcrunResolver {
    fn debug_uuids(&self, debug_file: &Path) -> Result<Vec<Uuid>, ResolveError> {
        let args = vec![OsString::from("--uuid"), debug_file.as_os_str().to_owned()];
        let output = run_with_timeout(&self.config.dwarfdump_path, &args, self.config.timeout())?;
        Ok(parse_dwarfdump_uuids(&output))
    }

    fn resolve(&self, request: &ResolveRequest<'_>) -> Result<Vec<String>, ResolveError> {
        let mut args = vec![
            OsString::from("-o"),
            request.debug_file.as_os_str().to_owned(),
            OsString::from("-arch"),
            OsString::from(request.arch),
            OsString::from("-l"),
            OsString::from(format!("0x{:x}", request.load_address.0)),
        ];
        args.extend(
            request
                .addresses
                .iter()
                .map(|addr| OsString::from(format!("0x{:x}", addr.0))),
        );
        let output = run_with_timeout(&self.config.atos_path, &args, self.config.timeout())?;
        Ok(output.lines().map(str::to_string).collect())
    }
}

fn read_pipe<R: Read>(pipe: Option<R>) -> std::io::Result<String> {
    let mut buf = String::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_string(&mut buf)?;
    }
    Ok(buf)
}

/// Runs `program` to completion and returns its standard output.
///
/// The child is killed once `timeout` elapses.
pub(crate) fn run_with_timeout(
    program: &Path,
    args: &[OsString],
    timeout: Duration,
) -> Result<String, ResolveError> {
    let name = program.display().to_string();
    trace!("running {} {:?}", name, args);
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| ResolveError::Spawn {
            program: name.clone(),
            source,
        })?;

    // drain both pipes concurrently so a chatty child cannot block on a full pipe
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let stdout_reader = thread::spawn(move || read_pipe(stdout));
    let stderr_reader = thread::spawn(move || read_pipe(stderr));

    let deadline = Instant::now() + timeout;
    let waited = loop {
        match child.try_wait() {
            Ok(Some(status)) => break Ok(status),
            Ok(None) if Instant::now() < deadline => thread::sleep(POLL_INTERVAL),
            Ok(None) => {
                break Err(ResolveError::Timeout {
                    program: name.clone(),
                    timeout,
                })
            }
            Err(err) => break Err(ResolveError::Io(err)),
        }
    };
    if waited.is_err() {
        if let Err(err) = child.kill() {
            debug!("failed to kill {}: {}", name, err);
        }
        if let Err(err) = child.wait() {
            debug!("failed to reap {}: {}", name, err);
        }
    }

    let stdout = stdout_reader
        .join()
        .map_err(|_| ResolveError::Output("stdout reader panicked".to_string()))?;
    let stderr = stderr_reader
        .join()
        .map_err(|_| ResolveError::Output("stderr reader panicked".to_string()))?;
    let status = waited?;
    let stdout = stdout?;
    let stderr = stderr?;

    if !status.success() {
        return Err(ResolveError::Exit {
            program: name,
            status,
            stderr: stderr.trim().to_string(),
        });
    }
    Ok(stdout)
}

fn parse_dwarfdump_uuids(output: &str) -> Vec<Uuid> {
    output
        .lines()
        .filter_map(|line| DWARFDUMP_UUID_RE.captures(line))
        .filter_map(|caps| caps[1].parse().ok())
        .collect()
}

/// A single successful lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSymbol {
    pub symbol: String,
    pub offset: Option<u64>,
    pub file: Option<String>,
    pub line: Option<u32>,
}

/// Interprets one `atos` output line.
///
/// `atos` prints the address itself when it cannot resolve it, which
/// yields `None` here.
pub fn parse_resolved_line(line: &str) -> Option<ResolvedSymbol> {
    let line = line.trim();
    if is_address_like(line) {
        return None;
    }
    Some(match ATOS_LINE_RE.captures(line) {
        Some(caps) => ResolvedSymbol {
            symbol: caps[1].to_string(),
            offset: caps.get(2).and_then(|m| m.as_str().parse().ok()),
            file: caps.get(3).map(|m| m.as_str().to_string()),
            line: caps.get(4).and_then(|m| m.as_str().parse().ok()),
        },
        None => ResolvedSymbol {
            symbol: line.to_string(),
            offset: None,
            file: None,
            line: None,
        },
    })
}

fn is_dsym(path: &Path) -> bool {
    path.extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("dsym"))
}

/// Finds the `.dSYM` bundle for `app_name`.
///
/// `path` may be the bundle itself or a directory holding bundles. Inside
/// a directory an exact name match wins over a substring match, which wins
/// over the only bundle present. Names are compared case-insensitively.
pub fn locate_dsym(path: &Path, app_name: &str) -> Option<PathBuf> {
    if is_dsym(path) && path.is_dir() {
        return Some(path.to_path_buf());
    }
    let mut archives: Vec<PathBuf> = fs::read_dir(path)
        .map_err(|err| debug!("cannot search {} for dSYMs: {}", path.display(), err))
        .ok()?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|candidate| is_dsym(candidate) && candidate.is_dir())
        .collect();
    archives.sort();

    let file_name = |candidate: &PathBuf| {
        candidate
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    };
    let exact = [format!("{}.app.dSYM", app_name), format!("{}.dSYM", app_name)];
    if let Some(found) = archives
        .iter()
        .find(|candidate| exact.iter().any(|name| file_name(candidate).eq_ignore_ascii_case(name)))
    {
        return Some(found.clone());
    }
    if let Some(found) = archives
        .iter()
        .find(|candidate| {
            !app_name.is_empty()
                && file_name(candidate)
                    .to_ascii_lowercase()
                    .contains(&app_name.to_ascii_lowercase())
        })
    {
        return Some(found.clone());
    }
    if archives.len() == 1 {
        return archives.pop();
    }
    None
}

/// Path of the DWARF file for `binary_name` inside a `.dSYM` bundle.
pub fn debug_file(archive: &Path, binary_name: &str) -> Option<PathBuf> {
    let dwarf_dir = archive.join(DWARF_SUBPATH);
    let named = dwarf_dir.join(binary_name);
    if named.is_file() {
        return Some(named);
    }
    let mut files: Vec<PathBuf> = fs::read_dir(&dwarf_dir)
        .ok()?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|candidate| candidate.is_file())
        .collect();
    files.sort();
    files.into_iter().next()
}

/// Fills in symbol names, files and lines for application frames.
#[derive(Debug, Clone, Default)]
pub struct Symbolicator<R = XcrunResolver> {
    resolver: R,
}

impl Symbolicator<XcrunResolver> {
    pub fn from_config(config: &ResolverConfig) -> Self {
        Symbolicator::new(XcrunResolver::new(config.clone()))
    }
}

impl<R: AddressResolver> Symbolicator<R> {
    pub fn new(resolver: R) -> Self {
        Symbolicator { resolver }
    }

    /// Symbolicates `report` with the dSYM found at `dsym_path`.
    ///
    /// Missing archives, UUID mismatches and resolver failures all leave the
    /// report as it was. `is_symbolicated` becomes true as soon as a single
    /// frame was resolved.
    pub fn symbolicate(&self, mut report: CrashReport, dsym_path: &Path) -> CrashReport {
        let image = match report.primary_image() {
            Some(image) => image.clone(),
            None => {
                debug!("no binary image matches process {:?}", report.process_name);
                return report;
            }
        };
        let archive = match locate_dsym(dsym_path, &image.name) {
            Some(archive) => archive,
            None => {
                debug!("no dSYM for {} under {}", image.name, dsym_path.display());
                return report;
            }
        };
        let debug_file = match debug_file(&archive, &image.name) {
            Some(debug_file) => debug_file,
            None => {
                debug!("{} contains no DWARF file", archive.display());
                return report;
            }
        };

        if let Some(image_uuid) = image.uuid {
            match self.resolver.debug_uuids(&debug_file) {
                Ok(uuids) if !uuids.is_empty() && !uuids.contains(&image_uuid) => {
                    warn!(
                        "dSYM {} does not match {} ({})",
                        archive.display(),
                        image.name,
                        image_uuid
                    );
                    return report;
                }
                Ok(_) => {}
                Err(err) => debug!("could not read dSYM uuids, continuing unverified: {}", err),
            }
        }

        let mut positions = vec![];
        let mut addresses = vec![];
        for (thread_idx, thread) in report.threads.iter().enumerate() {
            for (frame_idx, frame) in thread.frames.iter().enumerate() {
                if frame.is_app_code && frame.is_unresolved() {
                    positions.push((thread_idx, frame_idx));
                    addresses.push(frame.address);
                }
            }
        }
        if addresses.is_empty() {
            debug!("nothing to symbolicate");
            return report;
        }

        let arch = if image.arch.is_empty() {
            "arm64"
        } else {
            image.arch.as_str()
        };
        let request = ResolveRequest {
            debug_file: &debug_file,
            arch,
            load_address: image.load_address,
            addresses: &addresses,
        };
        let lines = match self.resolver.resolve(&request) {
            Ok(lines) => lines,
            Err(err) => {
                warn!("symbolication of {} failed: {}", image.name, err);
                return report;
            }
        };

        let mut resolved = 0;
        for ((thread_idx, frame_idx), line) in positions.into_iter().zip(lines.iter()) {
            let Some(symbol) = parse_resolved_line(line) else {
                continue;
            };
            let frame = &mut report.threads[thread_idx].frames[frame_idx];
            frame.symbol = symbol.symbol;
            frame.offset = symbol.offset;
            frame.file = symbol.file;
            frame.line = symbol.line;
            resolved += 1;
        }
        debug!("resolved {} of {} frames", resolved, addresses.len());
        if resolved > 0 {
            report.is_symbolicated = true;
        }
        report
    }
}

#[test]
fn test_parse_resolved_line() {
    assert_eq!(
        parse_resolved_line("-[ViewController crash] (in Demo) (ViewController.m:30)"),
        Some(ResolvedSymbol {
            symbol: "-[ViewController crash]".into(),
            offset: None,
            file: Some("ViewController.m".into()),
            line: Some(30),
        })
    );
    assert_eq!(
        parse_resolved_line("main (in Demo) + 28"),
        Some(ResolvedSymbol {
            symbol: "main".into(),
            offset: Some(28),
            file: None,
            line: None,
        })
    );
    assert_eq!(
        parse_resolved_line("closure #1 in Demo.run() (in Demo) (Demo.swift:12)")
            .map(|s| s.symbol),
        Some("closure #1 in Demo.run()".to_string())
    );
    assert_eq!(parse_resolved_line("0x0000000100004000"), None);
    assert_eq!(parse_resolved_line(""), None);
}

#[test]
fn test_parse_dwarfdump_uuids() {
    let output = "UUID: 2D903291-397D-3D14-BFCA-52C7FB8C5E00 (arm64) /tmp/Demo.app.dSYM/Contents/Resources/DWARF/Demo\n\
                  UUID: 6DECCEE4-A052-3EA4-BB67-957B06F53AD1 (x86_64) /tmp/Demo.app.dSYM/Contents/Resources/DWARF/Demo\n";
    let uuids = parse_dwarfdump_uuids(output);
    assert_eq!(uuids.len(), 2);
    assert_eq!(
        uuids[0],
        "2d903291397d3d14bfca52c7fb8c5e00".parse::<Uuid>().unwrap()
    );
}

#[test]
fn test_locate_dsym_priority() {
    let dir = tempfile::tempdir().unwrap();
    assert_eq!(locate_dsym(dir.path(), "Demo"), None);

    fs::create_dir(dir.path().join("Other.app.dSYM")).unwrap();
    assert_eq!(
        locate_dsym(dir.path(), "Demo"),
        Some(dir.path().join("Other.app.dSYM"))
    );

    fs::create_dir(dir.path().join("DemoKit.framework.dSYM")).unwrap();
    assert_eq!(
        locate_dsym(dir.path(), "Demo"),
        Some(dir.path().join("DemoKit.framework.dSYM"))
    );

    fs::create_dir(dir.path().join("Demo.app.dSYM")).unwrap();
    assert_eq!(
        locate_dsym(dir.path(), "demo"),
        Some(dir.path().join("Demo.app.dSYM"))
    );
    assert_eq!(
        locate_dsym(dir.path(), "Demo"),
        Some(dir.path().join("Demo.app.dSYM"))
    );

    let direct = dir.path().join("Other.app.dSYM");
    assert_eq!(locate_dsym(&direct, "Demo"), Some(direct.clone()));

    fs::remove_dir(dir.path().join("Demo.app.dSYM")).unwrap();
    assert_eq!(
        locate_dsym(dir.path(), "DEMO"),
        Some(dir.path().join("DemoKit.framework.dSYM"))
    );
    fs::remove_dir(dir.path().join("DemoKit.framework.dSYM")).unwrap();
    fs::create_dir(dir.path().join("Third.app.dSYM")).unwrap();
    assert_eq!(locate_dsym(dir.path(), "Demo"), None);
}

#[test]
fn test_debug_file_lookup() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("Demo.app.dSYM");
    let dwarf = archive.join(DWARF_SUBPATH);
    fs::create_dir_all(&dwarf).unwrap();
    assert_eq!(debug_file(&archive, "Demo"), None);

    fs::write(dwarf.join("Renamed"), b"").unwrap();
    assert_eq!(debug_file(&archive, "Demo"), Some(dwarf.join("Renamed")));

    fs::write(dwarf.join("Demo"), b"").unwrap();
    assert_eq!(debug_file(&archive, "Demo"), Some(dwarf.join("Demo")));
}

#[cfg(unix)]
#[test]
fn test_run_with_timeout() {
    let sh = Path::new("sh");
    let args = |script: &str| vec![OsString::from("-c"), OsString::from(script)];

    let output = run_with_timeout(sh, &args("echo resolved"), Duration::from_secs(10)).unwrap();
    assert_eq!(output, "resolved\n");

    let err = run_with_timeout(sh, &args("echo nope >&2; exit 3"), Duration::from_secs(10))
        .unwrap_err();
    match err {
        ResolveError::Exit { stderr, .. } => assert_eq!(stderr, "nope"),
        other => panic!("unexpected error: {}", other),
    }

    let started = Instant::now();
    let err = run_with_timeout(sh, &args("exec sleep 5"), Duration::from_millis(100)).unwrap_err();
    assert!(matches!(err, ResolveError::Timeout { .. }));
    assert!(started.elapsed() < Duration::from_secs(4));

    let err = run_with_timeout(
        Path::new("/nonexistent/definitely-not-atos"),
        &[],
        Duration::from_secs(1),
    )
    .unwrap_err();
    assert!(matches!(err, ResolveError::Spawn { .. }));
}
