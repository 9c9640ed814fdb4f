//! One OS thread per item

use super::{Backend, BackendKind, Finished, Ticket};
use crate::error::WorkError;
use crate::panic_message;
use crate::worker::Worker;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Runs each item on its own thread
///
/// Threads cannot be interrupted. A cancelled item's thread is abandoned: it
/// keeps running until the worker returns, and whatever it sends is dropped.
/// Abandoned threads are forgotten once they finish or the backend shuts down.
pub struct ThreadBackend<T, W: Worker<T>> {
    worker: Arc<W>,
    tx: Sender<Finished<W::Output>>,
    rx: Receiver<Finished<W::Output>>,
    running: HashMap<Ticket, JoinHandle<()>>,
    abandoned: HashMap<Ticket, JoinHandle<()>>,
    _item: PhantomData<fn(&T)>,
}

impl<T, W: Worker<T>> ThreadBackend<T, W> {
    /// Backend running `worker` on fresh threads
    #[must_use]
    pub fn new(worker: W) -> Self {
        Self::from_arc(Arc::new(worker))
    }

    /// Backend sharing an existing worker
    #[must_use]
    pub fn from_arc(worker: Arc<W>) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            worker,
            tx,
            rx,
            running: HashMap::new(),
            abandoned: HashMap::new(),
            _item: PhantomData,
        }
    }

    /// Threads given up on that have not reported back yet
    #[must_use]
    pub fn abandoned(&self) -> usize {
        self.abandoned.len()
    }

    fn accept(&mut self, (ticket, result): Finished<W::Output>, out: &mut Vec<Finished<W::Output>>) {
        if self.abandoned.remove(&ticket).is_some() {
            debug!(%ticket, "discarding result of abandoned thread");
            return;
        }
        if self.running.remove(&ticket).is_some() {
            out.push((ticket, result));
        }
    }
}

impl<T, W> Backend<T, W::Output> for ThreadBackend<T, W>
where
    T: Clone + Send + 'static,
    W: Worker<T>,
{
    fn kind(&self) -> BackendKind {
        BackendKind::Thread
    }

    fn submit(&mut self, ticket: Ticket, item: &T, _timeout: Option<Duration>) -> Result<(), WorkError> {
        let worker = Arc::clone(&self.worker);
        let tx = self.tx.clone();
        let item = item.clone();

        let handle = thread::Builder::new()
            .name(format!("pipeline-worker-{}", ticket.get()))
            .spawn(move || {
                let result = panic::catch_unwind(AssertUnwindSafe(|| worker.run(&item)))
                    .unwrap_or_else(|payload| Err(WorkError::Panicked(panic_message(payload.as_ref()))));
                // receiver gone means the pipeline shut down
                let _ = tx.send((ticket, result));
            })
            .map_err(|e| WorkError::Spawn(e.to_string()))?;

        self.running.insert(ticket, handle);
        Ok(())
    }

    fn poll(&mut self, wait: Duration) -> Vec<Finished<W::Output>> {
        let mut out = Vec::new();
        match self.rx.recv_timeout(wait) {
            Ok(finished) => self.accept(finished, &mut out),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => return out,
        }
        while let Ok(finished) = self.rx.try_recv() {
            self.accept(finished, &mut out);
        }
        self.abandoned.retain(|_, handle| !handle.is_finished());
        out
    }

    fn cancel(&mut self, ticket: Ticket) {
        if let Some(handle) = self.running.remove(&ticket) {
            warn!(%ticket, "abandoning worker thread");
            self.abandoned.insert(ticket, handle);
        }
    }

    fn shutdown(&mut self) {
        if !self.running.is_empty() {
            warn!(threads = self.running.len(), "abandoning running worker threads");
        }
        // nothing is accepted after shutdown; detach every thread and drop late results
        self.running.clear();
        let still_running = self.abandoned.drain().filter(|(_, handle)| !handle.is_finished()).count();
        if still_running > 0 {
            debug!(threads = still_running, "detaching abandoned worker threads");
        }
        while self.rx.try_recv().is_ok() {}
    }

    fn in_flight(&self) -> usize {
        self.running.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn drain<T, W>(backend: &mut ThreadBackend<T, W>, expected: usize) -> Vec<Finished<W::Output>>
    where
        T: Clone + Send + 'static,
        W: Worker<T>,
    {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut out = Vec::new();
        while out.len() < expected && Instant::now() < deadline {
            out.extend(backend.poll(Duration::from_millis(20)));
        }
        out
    }

    #[test]
    fn runs_items_concurrently() {
        let mut backend = ThreadBackend::new(|ms: &u64| {
            thread::sleep(Duration::from_millis(*ms));
            Ok::<_, WorkError>(*ms)
        });
        let started = Instant::now();
        for (i, ms) in [200u64, 200, 200].iter().enumerate() {
            backend.submit(Ticket(i as u64), ms, None).unwrap();
        }
        assert_eq!(backend.in_flight(), 3);
        let done = drain(&mut backend, 3);
        assert_eq!(done.len(), 3);
        assert!(started.elapsed() < Duration::from_millis(550));
        assert_eq!(backend.in_flight(), 0);
    }

    #[test]
    fn cancelled_result_is_discarded() {
        let mut backend = ThreadBackend::new(|ms: &u64| {
            thread::sleep(Duration::from_millis(*ms));
            Ok::<_, WorkError>(*ms)
        });
        backend.submit(Ticket(1), &100, None).unwrap();
        backend.cancel(Ticket(1));
        assert_eq!(backend.abandoned(), 1);

        thread::sleep(Duration::from_millis(200));
        assert!(backend.poll(Duration::from_millis(10)).is_empty());
        assert_eq!(backend.abandoned(), 0);
    }

    #[test]
    fn shutdown_forgets_abandoned_threads() {
        let mut backend = ThreadBackend::new(|ms: &u64| {
            thread::sleep(Duration::from_millis(*ms));
            Ok::<_, WorkError>(*ms)
        });
        for i in 0..4 {
            backend.submit(Ticket(i), &300, None).unwrap();
        }
        backend.cancel(Ticket(0));
        backend.cancel(Ticket(1));
        assert_eq!(backend.abandoned(), 2);

        backend.shutdown();
        assert_eq!(backend.abandoned(), 0);
        assert_eq!(backend.in_flight(), 0);

        thread::sleep(Duration::from_millis(400));
        assert!(backend.poll(Duration::from_millis(10)).is_empty());
        assert_eq!(backend.abandoned(), 0);
    }

    #[test]
    fn finished_abandoned_threads_are_pruned() {
        let mut backend = ThreadBackend::new(|ms: &u64| {
            thread::sleep(Duration::from_millis(*ms));
            Ok::<_, WorkError>(*ms)
        });
        for i in 0..5 {
            backend.submit(Ticket(i), &50, None).unwrap();
            backend.cancel(Ticket(i));
        }
        assert_eq!(backend.abandoned(), 5);

        let deadline = Instant::now() + Duration::from_secs(5);
        while backend.abandoned() > 0 && Instant::now() < deadline {
            assert!(backend.poll(Duration::from_millis(20)).is_empty());
        }
        assert_eq!(backend.abandoned(), 0);
    }

    #[test]
    fn panic_is_reported() {
        let mut backend = ThreadBackend::new(|_: &u8| -> Result<u8, WorkError> { panic!("worker blew up") });
        backend.submit(Ticket(9), &0, None).unwrap();
        let done = drain(&mut backend, 1);
        assert_eq!(done[0].0, Ticket(9));
        assert_eq!(done[0].1, Err(WorkError::Panicked("worker blew up".into())));
    }
}
