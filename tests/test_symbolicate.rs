use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};

use apple_crash_triage::{
    Addr, AddressResolver, CrashReport, ResolveError, ResolveRequest, Symbolicator,
};
use tempfile::TempDir;
use uuid::Uuid;

/// Answers lookups from a fixed script and records what it was asked.
struct ScriptedResolver {
    uuids: Vec<Uuid>,
    lines: Option<Vec<String>>,
    requests: RefCell<Vec<(PathBuf, String, Addr, Vec<Addr>)>>,
}

impl ScriptedResolver {
    fn new(uuids: &[&str], lines: Option<&[&str]>) -> ScriptedResolver {
        ScriptedResolver {
            uuids: uuids.iter().map(|uuid| uuid.parse().unwrap()).collect(),
            lines: lines.map(|lines| lines.iter().map(|line| line.to_string()).collect()),
            requests: RefCell::new(vec![]),
        }
    }

    fn calls(&self) -> usize {
        self.requests.borrow().len()
    }
}

impl AddressResolver for &ScriptedResolver {
    fn debug_uuids(&self, _debug_file: &Path) -> Result<Vec<Uuid>, ResolveError> {
        Ok(self.uuids.clone())
    }

    fn resolve(&self, request: &ResolveRequest<'_>) -> Result<Vec<String>, ResolveError> {
        self.requests.borrow_mut().push((
            request.debug_file.to_path_buf(),
            request.arch.to_string(),
            request.load_address,
            request.addresses.to_vec(),
        ));
        self.lines
            .clone()
            .ok_or_else(|| ResolveError::Output("atos: no such file".to_string()))
    }
}

const DEMO_UUID: &str = "2D903291-397D-3D14-BFCA-52C7FB8C5E00";

fn load_report() -> CrashReport {
    fs::read_to_string("tests/fixtures/null_deref.crash")
        .unwrap()
        .parse()
        .unwrap()
}

fn dsym_dir() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let dwarf = dir.path().join("Demo.app.dSYM/Contents/Resources/DWARF");
    fs::create_dir_all(&dwarf).unwrap();
    fs::write(dwarf.join("Demo"), b"").unwrap();
    dir
}

#[test]
fn test_resolves_app_frames_in_one_batch() {
    let dir = dsym_dir();
    let resolver = ScriptedResolver::new(
        &[DEMO_UUID],
        Some(&[
            "-[ViewController crash] (in Demo) (ViewController.m:30)",
            "0x0000000102f1b8e0",
            "main (in Demo) + 28",
        ]),
    );
    let report = Symbolicator::new(&resolver).symbolicate(load_report(), dir.path());

    assert_eq!(resolver.calls(), 1);
    let requests = resolver.requests.borrow();
    let (debug_file, arch, load_address, addresses) = &requests[0];
    assert_eq!(
        debug_file,
        &dir.path().join("Demo.app.dSYM/Contents/Resources/DWARF/Demo")
    );
    assert_eq!(arch, "arm64");
    assert_eq!(*load_address, Addr(0x102f14000));
    assert_eq!(
        addresses,
        &vec![Addr(0x102f1c2a4), Addr(0x102f1b8e0), Addr(0x102f18010)]
    );

    assert!(report.is_symbolicated);
    let frames = &report.crashed_thread().unwrap().frames;
    assert_eq!(frames[0].symbol, "-[ViewController crash]");
    assert_eq!(frames[0].file.as_deref(), Some("ViewController.m"));
    assert_eq!(frames[0].line, Some(30));
    // echoed address means the lookup failed
    assert_eq!(frames[1].symbol, "0x0000000102f1b8e0");
    assert!(frames[1].is_unresolved());
    assert_eq!(frames[2].symbol, "-[UIViewController loadViewIfRequired]");
    assert_eq!(frames[4].symbol, "main");
    assert_eq!(frames[4].offset, Some(28));
}

#[test]
fn test_symbolication_is_idempotent() {
    let dir = dsym_dir();
    let resolver = ScriptedResolver::new(
        &[DEMO_UUID],
        Some(&[
            "-[ViewController crash] (in Demo) (ViewController.m:30)",
            "-[ViewController viewDidLoad] (in Demo) (ViewController.m:12)",
            "main (in Demo) (main.m:16)",
        ]),
    );
    let symbolicator = Symbolicator::new(&resolver);
    let once = symbolicator.symbolicate(load_report(), dir.path());
    let twice = symbolicator.symbolicate(once.clone(), dir.path());

    assert_eq!(resolver.calls(), 1);
    assert!(twice.is_symbolicated);
    assert_eq!(once, twice);
}

#[test]
fn test_uuid_mismatch_skips_symbolication() {
    let dir = dsym_dir();
    let resolver = ScriptedResolver::new(
        &["6deccee4-a052-3ea4-bb67-957b06f53ad1"],
        Some(&["main (in Demo) (main.m:16)"]),
    );
    let original = load_report();
    let report = Symbolicator::new(&resolver).symbolicate(original.clone(), dir.path());

    assert_eq!(resolver.calls(), 0);
    assert!(!report.is_symbolicated);
    assert_eq!(report, original);
}

#[test]
fn test_resolver_failure_leaves_frames_unresolved() {
    let dir = dsym_dir();
    let resolver = ScriptedResolver::new(&[DEMO_UUID], None);
    let original = load_report();
    let report = Symbolicator::new(&resolver).symbolicate(original.clone(), dir.path());

    assert_eq!(resolver.calls(), 1);
    assert_eq!(report, original);
}

#[test]
fn test_missing_archive_is_not_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let resolver = ScriptedResolver::new(&[DEMO_UUID], Some(&[]));
    let original = load_report();

    let report = Symbolicator::new(&resolver).symbolicate(original.clone(), dir.path());
    assert_eq!(report, original);

    let report =
        Symbolicator::new(&resolver).symbolicate(original.clone(), &dir.path().join("missing"));
    assert_eq!(report, original);
    assert_eq!(resolver.calls(), 0);
}

#[test]
fn test_direct_archive_path_and_ips_input() {
    let dir = dsym_dir();
    let report: CrashReport = fs::read_to_string("tests/fixtures/uncaught_exception.ips")
        .unwrap()
        .parse()
        .unwrap();
    let resolver = ScriptedResolver::new(
        &["2d903291397d3d14bfca52c7fb8c5e00"],
        Some(&[
            "-[ViewController tableView:cellForRowAtIndexPath:] (in Demo) (ViewController.m:88)",
            "-[ViewController reload] (in Demo) (ViewController.m:40)",
        ]),
    );
    let report =
        Symbolicator::new(&resolver).symbolicate(report, &dir.path().join("Demo.app.dSYM"));

    let requests = resolver.requests.borrow();
    assert_eq!(requests[0].3, vec![Addr(0x104228764), Addr(0x104228510)]);
    assert!(report.is_symbolicated);
    let frames = &report.crashed_thread().unwrap().frames;
    assert_eq!(frames[5].symbol, "-[ViewController tableView:cellForRowAtIndexPath:]");
    assert_eq!(frames[6].line, Some(40));
    assert!(report.frames().all(|frame| !frame.is_app_code || !frame.is_unresolved()));
}
