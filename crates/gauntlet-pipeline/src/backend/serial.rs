//! Inline execution with a soft timeout

use super::{Backend, BackendKind, Finished, Ticket};
use crate::error::WorkError;
use crate::panic_message;
use crate::worker::Worker;
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::warn;

/// Runs each item on the caller's thread
///
/// Nothing can interrupt an inline call, so the timeout is soft: a watchdog
/// is armed before the call and disarmed when it returns. If it fired in
/// between, the item is reported as timed out; its result is dropped.
pub struct SerialBackend<T, W: Worker<T>> {
    worker: W,
    finished: VecDeque<Finished<W::Output>>,
    _item: PhantomData<fn(&T)>,
}

impl<T, W: Worker<T>> SerialBackend<T, W> {
    /// Backend running `worker` inline
    #[must_use]
    pub fn new(worker: W) -> Self {
        Self {
            worker,
            finished: VecDeque::new(),
            _item: PhantomData,
        }
    }
}

impl<T, W: Worker<T>> Backend<T, W::Output> for SerialBackend<T, W> {
    fn kind(&self) -> BackendKind {
        BackendKind::Serial
    }

    fn is_inline(&self) -> bool {
        true
    }

    fn submit(&mut self, ticket: Ticket, item: &T, timeout: Option<Duration>) -> Result<(), WorkError> {
        let watchdog = timeout.map(|limit| Watchdog::arm(ticket, limit));
        let started = Instant::now();

        let result = panic::catch_unwind(AssertUnwindSafe(|| self.worker.run(item)))
            .unwrap_or_else(|payload| Err(WorkError::Panicked(panic_message(payload.as_ref()))));

        let overran = watchdog.is_some_and(Watchdog::disarm);
        let result = if overran {
            Err(WorkError::TimedOut(started.elapsed()))
        } else {
            result
        };
        self.finished.push_back((ticket, result));
        Ok(())
    }

    fn poll(&mut self, _wait: Duration) -> Vec<Finished<W::Output>> {
        self.finished.drain(..).collect()
    }

    fn cancel(&mut self, ticket: Ticket) {
        self.finished.retain(|(t, _)| *t != ticket);
    }

    fn shutdown(&mut self) {
        self.finished.clear();
    }

    fn in_flight(&self) -> usize {
        0
    }
}

/// Fires once if not disarmed within its limit
struct Watchdog {
    disarm: Sender<()>,
    fired: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Watchdog {
    fn arm(ticket: Ticket, limit: Duration) -> Self {
        let (disarm, rx) = mpsc::channel::<()>();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);

        let thread = thread::Builder::new()
            .name(format!("soft-timeout-{}", ticket.get()))
            .spawn(move || {
                if let Err(RecvTimeoutError::Timeout) = rx.recv_timeout(limit) {
                    flag.store(true, Ordering::SeqCst);
                    warn!(%ticket, limit_secs = limit.as_secs_f64(), "soft timeout expired, inline item still running");
                }
            })
            .map_err(|e| warn!(%ticket, error = %e, "could not start soft-timeout watchdog"))
            .ok();

        Self {
            disarm,
            fired,
            thread,
        }
    }

    /// Returns whether the watchdog fired
    fn disarm(mut self) -> bool {
        let _ = self.disarm.send(());
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
        self.fired.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_inline_and_reports_on_poll() {
        let mut backend = SerialBackend::new(|x: &i32| Ok::<_, WorkError>(x + 1));
        backend.submit(Ticket(1), &1, None).unwrap();
        let done = backend.poll(Duration::ZERO);
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].1, Ok(2));
        assert!(backend.poll(Duration::ZERO).is_empty());
    }

    #[test]
    fn soft_timeout_reports_overrun() {
        let mut backend = SerialBackend::new(|_: &()| {
            thread::sleep(Duration::from_millis(150));
            Ok::<_, WorkError>("late")
        });
        backend
            .submit(Ticket(1), &(), Some(Duration::from_millis(20)))
            .unwrap();
        let done = backend.poll(Duration::ZERO);
        assert!(matches!(done[0].1, Err(WorkError::TimedOut(_))));
    }

    #[test]
    fn fast_item_beats_soft_timeout() {
        let mut backend = SerialBackend::new(|_: &()| Ok::<_, WorkError>(1));
        backend
            .submit(Ticket(1), &(), Some(Duration::from_secs(5)))
            .unwrap();
        assert_eq!(backend.poll(Duration::ZERO)[0].1, Ok(1));
    }

    #[test]
    fn panic_becomes_error() {
        let mut backend = SerialBackend::new(|_: &()| -> Result<(), WorkError> { panic!("kaboom") });
        backend.submit(Ticket(1), &(), None).unwrap();
        let done = backend.poll(Duration::ZERO);
        assert_eq!(done[0].1, Err(WorkError::Panicked("kaboom".into())));
    }
}
