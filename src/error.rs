use std::io;
use std::process::ExitStatus;
use std::time::Duration;

/// Errors that stop a crash artifact from being parsed at all.
///
/// Malformed pieces inside a recognized report never end up here; they are
/// skipped and the report is returned with whatever could be read.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("io error during parsing")]
    Io(#[source] io::Error),
    #[error("unrecognized crash report format")]
    UnrecognizedFormat,
}

/// Failures of the external address resolver.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("failed to launch {program}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{program} did not finish within {timeout:?}")]
    Timeout { program: String, timeout: Duration },
    #[error("{program} exited with {status}: {stderr}")]
    Exit {
        program: String,
        status: ExitStatus,
        stderr: String,
    },
    #[error("io error while talking to the resolver")]
    Io(#[from] io::Error),
    #[error("unexpected resolver output: {0}")]
    Output(String),
}
