//! Work descriptions
//!
//! - [`Worker`]: in-process work, used by the serial and thread backends
//! - [`ProcessWorker`]: work run as a child process, used by the process backend
//! - [`JsonProcessWorker`] + [`serve_json`]: both halves of a line-delimited
//!   JSON protocol over stdin/stdout

use crate::error::WorkError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::io::{self, BufRead, Write};
use std::marker::PhantomData;
use std::path::PathBuf;
use std::process::{Command, ExitStatus};

/// Work applied to one item inside the current process
pub trait Worker<T>: Send + Sync + 'static {
    /// Result of one item
    type Output: Send + 'static;

    /// Process one item
    ///
    /// # Errors
    /// Any error becomes the item's error in its completion
    fn run(&self, item: &T) -> Result<Self::Output, WorkError>;
}

impl<T, R, F> Worker<T> for F
where
    F: Fn(&T) -> Result<R, WorkError> + Send + Sync + 'static,
    R: Send + 'static,
{
    type Output = R;

    fn run(&self, item: &T) -> Result<R, WorkError> {
        self(item)
    }
}

/// Everything a finished child process left behind
#[derive(Debug)]
pub struct ProcessOutput {
    /// Exit status
    pub status: ExitStatus,
    /// Captured stdout
    pub stdout: Vec<u8>,
    /// Captured stderr
    pub stderr: Vec<u8>,
}

impl ProcessOutput {
    /// Last `max` bytes of stderr, lossily decoded and trimmed
    #[must_use]
    pub fn stderr_tail(&self, max: usize) -> String {
        let start = self.stderr.len().saturating_sub(max);
        String::from_utf8_lossy(&self.stderr[start..]).trim().to_owned()
    }
}

/// Work applied to one item in a freshly spawned process
pub trait ProcessWorker<T>: Send + Sync + 'static {
    /// Result of one item
    type Output: Send + 'static;

    /// Command to spawn; stdio is overridden by the backend
    fn command(&self, item: &T) -> Command;

    /// Bytes written to the child's stdin
    ///
    /// # Errors
    /// Returns an error if the item cannot be encoded
    fn encode(&self, item: &T) -> Result<Vec<u8>, WorkError>;

    /// Interpret the finished child's output
    ///
    /// # Errors
    /// Returns an error for failed exits or unreadable output
    fn decode(&self, output: ProcessOutput) -> Result<Self::Output, WorkError>;
}

/// Reply written by a JSON worker process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerReply<R> {
    /// The item produced a result
    Ok(R),
    /// The item failed
    Error {
        /// Error category
        kind: String,
        /// Detail
        message: String,
    },
}

impl<R> From<Result<R, WorkError>> for WorkerReply<R> {
    fn from(result: Result<R, WorkError>) -> Self {
        match result {
            Ok(value) => Self::Ok(value),
            Err(err) => Self::Error {
                kind: err.kind().to_owned(),
                message: match err {
                    WorkError::Failed { message, .. } => message,
                    other => other.to_string(),
                },
            },
        }
    }
}

/// Runs a program per item, piping the item as one JSON line on stdin and
/// reading a [`WorkerReply`] from the last non-empty line of stdout
#[derive(Debug, Clone)]
pub struct JsonProcessWorker<T, R> {
    program: OsString,
    args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
    current_dir: Option<PathBuf>,
    _types: PhantomData<fn(&T) -> R>,
}

impl<T, R> JsonProcessWorker<T, R> {
    /// Worker running `program`
    #[must_use]
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            current_dir: None,
            _types: PhantomData,
        }
    }

    /// Append an argument
    #[inline]
    #[must_use]
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append arguments
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable for the child
    #[inline]
    #[must_use]
    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Working directory for the child
    #[inline]
    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }
}

impl<T, R> ProcessWorker<T> for JsonProcessWorker<T, R>
where
    T: Serialize + 'static,
    R: DeserializeOwned + Send + 'static,
{
    type Output = R;

    fn command(&self, _item: &T) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command.envs(self.envs.iter().map(|(k, v)| (k, v)));
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }
        command
    }

    fn encode(&self, item: &T) -> Result<Vec<u8>, WorkError> {
        let mut line = serde_json::to_vec(item).map_err(|e| WorkError::Protocol(e.to_string()))?;
        line.push(b'\n');
        Ok(line)
    }

    fn decode(&self, output: ProcessOutput) -> Result<R, WorkError> {
        if !output.status.success() {
            return Err(WorkError::ProcessExit {
                code: output.status.code(),
                stderr: output.stderr_tail(2048),
            });
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let line = stdout
            .lines()
            .rev()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .ok_or_else(|| WorkError::Protocol("worker wrote no reply".to_owned()))?;

        match serde_json::from_str::<WorkerReply<R>>(line) {
            Ok(WorkerReply::Ok(value)) => Ok(value),
            Ok(WorkerReply::Error { kind, message }) => Err(WorkError::Failed { kind, message }),
            Err(e) => Err(WorkError::Protocol(format!("unreadable reply: {e}"))),
        }
    }
}

/// Child-side half of the JSON protocol over explicit streams
///
/// Reads one request line, applies `handler`, writes one reply line.
///
/// # Errors
/// Only I/O failures on the streams are returned; request and handler
/// failures are reported to the parent as error replies.
pub fn serve_json_with<T, R, F, In, Out>(input: In, mut output: Out, handler: F) -> io::Result<()>
where
    T: DeserializeOwned,
    R: Serialize,
    F: FnOnce(T) -> Result<R, WorkError>,
    In: BufRead,
    Out: Write,
{
    let mut input = input;
    let mut line = String::new();
    input.read_line(&mut line)?;

    let reply: WorkerReply<R> = match serde_json::from_str::<T>(line.trim()) {
        Ok(request) => handler(request).into(),
        Err(e) => WorkerReply::Error {
            kind: "ProtocolError".to_owned(),
            message: format!("unreadable request: {e}"),
        },
    };

    serde_json::to_writer(&mut output, &reply).map_err(io::Error::from)?;
    output.write_all(b"\n")?;
    output.flush()
}

/// Child-side half of the JSON protocol on the process's own stdin/stdout
///
/// # Errors
/// See [`serve_json_with`]
pub fn serve_json<T, R, F>(handler: F) -> io::Result<()>
where
    T: DeserializeOwned,
    R: Serialize,
    F: FnOnce(T) -> Result<R, WorkError>,
{
    let stdin = io::stdin();
    let stdout = io::stdout();
    serve_json_with(stdin.lock(), stdout.lock(), handler)
}
