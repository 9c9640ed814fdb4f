//! One OS process per item, with hard cancellation
//!
//! Each child is started in its own process group so that termination also
//! reaches anything it spawned. Termination is always the same sequence:
//! SIGTERM to the group, a short grace period, SIGKILL to the group, reap.
//! Once the child is reaped its PID may be reused, so the group is never
//! signalled again.

use super::{Backend, BackendKind, Finished, Ticket};
use crate::error::{TerminationError, WorkError};
use crate::worker::{ProcessOutput, ProcessWorker};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::marker::PhantomData;
use std::process::{Child, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Grace period between SIGTERM and SIGKILL
pub const DEFAULT_TERMINATION_GRACE: Duration = Duration::from_millis(500);

/// How long to wait for output pipes to close after the child exited
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_secs(2);

const REAP_POLL: Duration = Duration::from_millis(10);

/// How a terminated process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// It had already exited
    AlreadyExited(ExitStatus),
    /// It exited within the grace period after SIGTERM
    Graceful(ExitStatus),
    /// It had to be killed
    Killed(ExitStatus),
}

/// A spawned child process, tracked by PID
#[derive(Debug)]
pub struct ProcessHandle {
    child: Child,
    pid: u32,
    reaped: Option<ExitStatus>,
    signals_sent: u32,
}

impl ProcessHandle {
    /// Wrap a spawned child
    #[must_use]
    pub fn new(child: Child) -> Self {
        let pid = child.id();
        Self {
            child,
            pid,
            reaped: None,
            signals_sent: 0,
        }
    }

    /// OS process id
    #[inline]
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Non-blocking exit check
    ///
    /// # Errors
    /// Propagates OS errors from `waitpid`
    pub fn try_wait(&mut self) -> std::io::Result<Option<ExitStatus>> {
        if self.reaped.is_none() {
            self.reaped = self.child.try_wait()?;
        }
        Ok(self.reaped)
    }

    /// Signals sent to the process group so far
    #[inline]
    #[must_use]
    pub fn signals_sent(&self) -> u32 {
        self.signals_sent
    }

    /// Whether the child has been waited for
    #[inline]
    #[must_use]
    pub fn is_reaped(&self) -> bool {
        self.reaped.is_some()
    }

    /// Stop the process: SIGTERM, wait up to `grace`, SIGKILL, reap
    ///
    /// The signals go to the whole process group and stop as soon as the
    /// child is reaped. A child that already exited is left alone.
    ///
    /// # Errors
    /// Returns [`TerminationError`] if the process could not be killed or
    /// reaped; callers log it and move on.
    pub fn terminate(&mut self, grace: Duration) -> Result<Termination, TerminationError> {
        let pid = self.pid;
        let wrap = |source| TerminationError { pid, source };

        if let Some(status) = self.try_wait().map_err(wrap)? {
            return Ok(Termination::AlreadyExited(status));
        }

        self.signal_group(Signal::Term);
        let deadline = Instant::now() + grace;
        loop {
            if let Some(status) = self.try_wait().map_err(wrap)? {
                debug!(pid, "process exited after SIGTERM");
                return Ok(Termination::Graceful(status));
            }
            if Instant::now() >= deadline {
                break;
            }
            thread::sleep(REAP_POLL);
        }

        // unreaped, so the PID and its group id are still ours
        self.signal_group(Signal::Kill);
        if let Err(e) = self.child.kill() {
            // already gone between the last poll and now
            debug!(pid, error = %e, "direct kill failed");
        }
        let status = self.child.wait().map_err(wrap)?;
        self.reaped = Some(status);
        warn!(pid, "process ignored SIGTERM and was killed");
        Ok(Termination::Killed(status))
    }

    #[cfg(unix)]
    fn signal_group(&mut self, signal: Signal) {
        use nix::sys::signal::{killpg, Signal as NixSignal};
        use nix::unistd::Pid;

        if self.reaped.is_some() {
            return;
        }
        let Ok(raw) = i32::try_from(self.pid) else {
            return;
        };
        self.signals_sent += 1;
        let sig = match signal {
            Signal::Term => NixSignal::SIGTERM,
            Signal::Kill => NixSignal::SIGKILL,
        };
        if let Err(errno) = killpg(Pid::from_raw(raw), sig) {
            // ESRCH: the group is already empty
            if errno != nix::errno::Errno::ESRCH {
                debug!(pid = self.pid, ?sig, %errno, "signal to process group failed");
            }
        }
    }

    #[cfg(not(unix))]
    fn signal_group(&mut self, signal: Signal) {
        if self.reaped.is_some() {
            return;
        }
        self.signals_sent += 1;
        if signal == Signal::Kill {
            let _ = self.child.kill();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signal {
    Term,
    Kill,
}

/// Whether a process with this id exists
#[cfg(unix)]
#[must_use]
pub fn pid_is_running(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    matches!(kill(Pid::from_raw(raw), None), Ok(()) | Err(Errno::EPERM))
}

enum Stream {
    Stdout,
    Stderr,
}

struct Running {
    handle: ProcessHandle,
    output: Receiver<(Stream, Vec<u8>)>,
    stdout: Option<Vec<u8>>,
    stderr: Option<Vec<u8>>,
    exited: Option<(ExitStatus, Instant)>,
}

impl Running {
    fn drain_output(&mut self) {
        while let Ok((stream, bytes)) = self.output.try_recv() {
            match stream {
                Stream::Stdout => self.stdout = Some(bytes),
                Stream::Stderr => self.stderr = Some(bytes),
            }
        }
    }

    fn check_exit(&mut self) -> std::io::Result<bool> {
        if self.exited.is_none() {
            if let Some(status) = self.handle.try_wait()? {
                self.exited = Some((status, Instant::now()));
            }
        }
        Ok(self.exited.is_some())
    }

    /// Block until both pipes closed or the drain grace since exit ran out
    fn await_output(&mut self) {
        let Some((_, exited_at)) = self.exited else {
            return;
        };
        let deadline = exited_at + OUTPUT_DRAIN_GRACE;
        while self.stdout.is_none() || self.stderr.is_none() {
            let Some(left) = deadline.checked_duration_since(Instant::now()) else {
                break;
            };
            match self.output.recv_timeout(left) {
                Ok((Stream::Stdout, bytes)) => self.stdout = Some(bytes),
                Ok((Stream::Stderr, bytes)) => self.stderr = Some(bytes),
                Err(_) => break,
            }
        }
    }

    /// Finished output, once the child exited and both pipes closed
    fn take_finished(&mut self) -> std::io::Result<Option<ProcessOutput>> {
        self.check_exit()?;
        let Some((status, exited_at)) = self.exited else {
            return Ok(None);
        };
        self.drain_output();

        let pipes_closed = self.stdout.is_some() && self.stderr.is_some();
        if !pipes_closed && exited_at.elapsed() < OUTPUT_DRAIN_GRACE {
            return Ok(None);
        }
        Ok(Some(ProcessOutput {
            status,
            stdout: self.stdout.take().unwrap_or_default(),
            stderr: self.stderr.take().unwrap_or_default(),
        }))
    }
}

/// Shared record of every PID a [`ProcessBackend`] spawned
#[derive(Debug, Clone, Default)]
pub struct PidLog(Arc<Mutex<Vec<u32>>>);

impl PidLog {
    fn record(&self, pid: u32) {
        self.0.lock().push(pid);
    }

    /// PIDs in spawn order
    #[must_use]
    pub fn snapshot(&self) -> Vec<u32> {
        self.0.lock().clone()
    }
}

/// Runs each item in a freshly spawned process
pub struct ProcessBackend<T, W: ProcessWorker<T>> {
    worker: W,
    grace: Duration,
    children: HashMap<Ticket, Running>,
    pids: PidLog,
    _item: PhantomData<fn(&T)>,
}

impl<T, W: ProcessWorker<T>> ProcessBackend<T, W> {
    /// Backend spawning one process per item via `worker`
    #[must_use]
    pub fn new(worker: W) -> Self {
        Self {
            worker,
            grace: DEFAULT_TERMINATION_GRACE,
            children: HashMap::new(),
            pids: PidLog::default(),
            _item: PhantomData,
        }
    }

    /// Grace period between SIGTERM and SIGKILL
    #[inline]
    #[must_use]
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Handle on the PIDs spawned so far; stays valid after the backend is dropped
    #[must_use]
    pub fn pid_log(&self) -> PidLog {
        self.pids.clone()
    }

    fn stop(&self, ticket: Ticket, mut running: Running) {
        match running.handle.terminate(self.grace) {
            Ok(outcome) => info!(%ticket, pid = running.handle.pid(), ?outcome, "worker process terminated"),
            Err(e) => error!(%ticket, error = %e, "worker process termination failed"),
        }
    }

    fn collect_finished(&mut self) -> Vec<Finished<W::Output>> {
        let mut finished = Vec::new();
        let mut done = Vec::new();
        for (ticket, running) in &mut self.children {
            match running.take_finished() {
                Ok(Some(output)) => done.push((*ticket, Ok(output))),
                Ok(None) => {}
                Err(e) => done.push((*ticket, Err(WorkError::Protocol(format!("wait failed: {e}"))))),
            }
        }
        for (ticket, output) in done {
            if let Some(running) = self.children.remove(&ticket) {
                debug!(%ticket, pid = running.handle.pid(), "worker process finished");
                let result = output.and_then(|o| self.worker.decode(o));
                finished.push((ticket, result));
            }
        }
        finished
    }
}

fn spawn_reader<R: Read + Send + 'static>(
    mut pipe: R,
    stream: Stream,
    tx: Sender<(Stream, Vec<u8>)>,
    name: String,
) -> std::io::Result<()> {
    thread::Builder::new().name(name).spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        let _ = tx.send((stream, buf));
    })?;
    Ok(())
}

impl<T, W: ProcessWorker<T>> Backend<T, W::Output> for ProcessBackend<T, W> {
    fn kind(&self) -> BackendKind {
        BackendKind::Process
    }

    fn submit(&mut self, ticket: Ticket, item: &T, _timeout: Option<Duration>) -> Result<(), WorkError> {
        let payload = self.worker.encode(item)?;

        let mut command = self.worker.command(item);
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let child = command.spawn().map_err(|e| WorkError::Spawn(e.to_string()))?;
        let mut handle = ProcessHandle::new(child);
        let pid = handle.pid();
        self.pids.record(pid);
        debug!(%ticket, pid, "worker process spawned");

        let (tx, rx) = mpsc::channel();
        let wired = (|| -> std::io::Result<()> {
            if let Some(stdout) = handle.child.stdout.take() {
                spawn_reader(stdout, Stream::Stdout, tx.clone(), format!("worker-{pid}-stdout"))?;
            }
            if let Some(stderr) = handle.child.stderr.take() {
                spawn_reader(stderr, Stream::Stderr, tx, format!("worker-{pid}-stderr"))?;
            }
            if let Some(mut stdin) = handle.child.stdin.take() {
                thread::Builder::new()
                    .name(format!("worker-{pid}-stdin"))
                    .spawn(move || {
                        // child may exit without reading; a broken pipe is fine
                        let _ = stdin.write_all(&payload);
                    })?;
            }
            Ok(())
        })();

        if let Err(e) = wired {
            if let Err(term) = handle.terminate(self.grace) {
                error!(%ticket, error = %term, "could not stop half-started worker");
            }
            return Err(WorkError::Spawn(format!("could not attach to worker pipes: {e}")));
        }

        self.children.insert(
            ticket,
            Running {
                handle,
                output: rx,
                stdout: None,
                stderr: None,
                exited: None,
            },
        );
        Ok(())
    }

    fn poll(&mut self, wait: Duration) -> Vec<Finished<W::Output>> {
        let finished = self.collect_finished();
        if !finished.is_empty() || self.children.is_empty() {
            return finished;
        }
        thread::sleep(wait);
        self.collect_finished()
    }

    fn flush(&mut self) -> Vec<Finished<W::Output>> {
        let mut draining = 0;
        for (ticket, running) in &mut self.children {
            match running.check_exit() {
                Ok(true) => {
                    draining += 1;
                    running.await_output();
                }
                Ok(false) => {}
                Err(e) => debug!(%ticket, error = %e, "exit check failed"),
            }
        }
        if draining > 0 {
            debug!(processes = draining, "collected output of exited workers");
        }
        self.collect_finished()
    }

    fn cancel(&mut self, ticket: Ticket) {
        if let Some(running) = self.children.remove(&ticket) {
            self.stop(ticket, running);
        }
    }

    fn shutdown(&mut self) {
        if !self.children.is_empty() {
            warn!(processes = self.children.len(), "terminating running worker processes");
        }
        let children: Vec<(Ticket, Running)> = self.children.drain().collect();
        for (ticket, running) in children {
            self.stop(ticket, running);
        }
    }

    fn in_flight(&self) -> usize {
        self.children.len()
    }
}

impl<T, W: ProcessWorker<T>> Drop for ProcessBackend<T, W> {
    fn drop(&mut self) {
        Backend::<T, W::Output>::shutdown(self);
    }
}
