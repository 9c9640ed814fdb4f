//! The bounded-concurrency driver
//!
//! [`Pipeline::run`] pulls items from a source lazily, keeps at most
//! `max_in_flight` of them running on a [`Backend`], and yields a
//! [`Completion`] for every item in the order they finish.
//!
//! The returned [`Completions`] iterator owns the backend. Exhausting it,
//! triggering its [`StopFlag`], or dropping it shuts the backend down, so no
//! in-flight item outlives the iteration.

use crate::backend::{Backend, Finished, Ticket};
use crate::error::{PipelineError, WorkError};
use std::collections::{HashMap, VecDeque};
use std::iter::Fuse;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Default wait between poll cycles
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Pipeline settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Maximum items running at once
    pub max_in_flight: usize,
    /// Per-item time budget; `None` means unlimited
    pub timeout: Option<Duration>,
    /// Longest a single poll cycle waits for a completion
    pub poll_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_in_flight: default_concurrency(),
            timeout: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl PipelineConfig {
    /// Set the concurrency limit
    #[inline]
    #[must_use]
    pub fn with_max_in_flight(mut self, max: usize) -> Self {
        self.max_in_flight = max;
        self
    }

    /// Set the per-item timeout
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the poll interval
    #[inline]
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Hardware concurrency, falling back to 1
#[must_use]
pub fn default_concurrency() -> usize {
    std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
}

/// Cooperative stop request shared between the caller and a running pipeline
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    /// A flag that is not yet triggered
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop; the pipeline notices at its next poll cycle
    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether a stop was requested
    #[inline]
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome of one item
#[derive(Debug)]
pub struct Completion<T, R> {
    /// The item, handed back
    pub item: T,
    /// Its result or why there is none
    pub result: Result<R, WorkError>,
    /// Time from submission to completion
    pub elapsed: Duration,
}

impl<T, R> Completion<T, R> {
    /// The `(item, result, error)` triple; exactly one of result/error is present
    pub fn into_parts(self) -> (T, Option<R>, Option<WorkError>) {
        match self.result {
            Ok(r) => (self.item, Some(r), None),
            Err(e) => (self.item, None, Some(e)),
        }
    }

    /// Whether the item ran out of time
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(&self.result, Err(e) if e.is_timeout())
    }
}

/// Counters kept while a pipeline runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Items pulled from the source
    pub submitted: usize,
    /// Completions yielded with a result
    pub succeeded: usize,
    /// Completions yielded with an error (timeouts included)
    pub failed: usize,
    /// Completions that were timeouts
    pub timed_out: usize,
    /// In-flight items dropped by a stop or early drop
    pub cancelled: usize,
    /// Highest number of items in flight at once
    pub peak_in_flight: usize,
}

/// Applies a backend to every item of a source
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    /// Validate the configuration and build a pipeline
    ///
    /// # Errors
    /// Returns [`PipelineError`] for a zero concurrency limit or poll interval
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        if config.max_in_flight == 0 {
            return Err(PipelineError::ZeroConcurrency);
        }
        if config.poll_interval.is_zero() {
            return Err(PipelineError::ZeroPollInterval);
        }
        Ok(Self { config })
    }

    /// Pipeline settings
    #[inline]
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Start processing `source` on `backend`
    pub fn run<T, R, I, B>(&self, source: I, backend: B) -> Completions<T, R, I::IntoIter, B>
    where
        I: IntoIterator<Item = T>,
        B: Backend<T, R>,
    {
        self.run_until(source, backend, StopFlag::new())
    }

    /// Start processing, stopping early once `stop` is triggered
    pub fn run_until<T, R, I, B>(
        &self,
        source: I,
        backend: B,
        stop: StopFlag,
    ) -> Completions<T, R, I::IntoIter, B>
    where
        I: IntoIterator<Item = T>,
        B: Backend<T, R>,
    {
        let limit = if backend.is_inline() {
            1
        } else {
            self.config.max_in_flight
        };
        debug!(
            backend = %backend.kind(),
            max_in_flight = limit,
            timeout_secs = ?self.config.timeout.map(|t| t.as_secs_f64()),
            "pipeline started"
        );
        Completions {
            source: source.into_iter().fuse(),
            exhausted: false,
            backend,
            in_flight: HashMap::new(),
            ready: VecDeque::new(),
            next_ticket: 0,
            limit,
            timeout: self.config.timeout,
            poll_interval: self.config.poll_interval,
            stop,
            closed: false,
            stats: PipelineStats::default(),
        }
    }
}

struct InFlight<T> {
    item: T,
    started: Instant,
}

/// Iterator over completions, in completion order
pub struct Completions<T, R, S, B>
where
    S: Iterator<Item = T>,
    B: Backend<T, R>,
{
    source: Fuse<S>,
    exhausted: bool,
    backend: B,
    in_flight: HashMap<Ticket, InFlight<T>>,
    ready: VecDeque<Completion<T, R>>,
    next_ticket: u64,
    limit: usize,
    timeout: Option<Duration>,
    poll_interval: Duration,
    stop: StopFlag,
    closed: bool,
    stats: PipelineStats,
}

impl<T, R, S, B> Completions<T, R, S, B>
where
    S: Iterator<Item = T>,
    B: Backend<T, R>,
{
    /// Counters so far
    #[inline]
    #[must_use]
    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    /// Items currently running
    #[inline]
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// The stop flag this iteration watches
    #[must_use]
    pub fn stop_flag(&self) -> StopFlag {
        self.stop.clone()
    }

    fn fill(&mut self) {
        while !self.exhausted && self.in_flight.len() < self.limit {
            match self.source.next() {
                Some(item) => self.submit(item),
                None => self.exhausted = true,
            }
        }
    }

    fn submit(&mut self, item: T) {
        let ticket = Ticket(self.next_ticket);
        self.next_ticket += 1;
        self.stats.submitted += 1;

        let started = Instant::now();
        match self.backend.submit(ticket, &item, self.timeout) {
            Ok(()) => {
                self.in_flight.insert(ticket, InFlight { item, started });
                self.stats.peak_in_flight = self.stats.peak_in_flight.max(self.in_flight.len());
            }
            Err(e) => {
                warn!(%ticket, error = %e, "item could not be started");
                self.push(item, Err(e), started.elapsed());
            }
        }
    }

    fn collect(&mut self, wait: Duration) {
        let finished = self.backend.poll(wait);
        self.accept(finished);
    }

    fn accept(&mut self, finished: Vec<Finished<R>>) {
        for (ticket, result) in finished {
            if let Some(entry) = self.in_flight.remove(&ticket) {
                self.push(entry.item, result, entry.started.elapsed());
            }
        }
    }

    fn expire(&mut self) {
        let Some(timeout) = self.timeout else {
            return;
        };
        let expired: Vec<Ticket> = self
            .in_flight
            .iter()
            .filter(|(_, f)| f.started.elapsed() > timeout)
            .map(|(t, _)| *t)
            .collect();

        for ticket in expired {
            self.backend.cancel(ticket);
            if let Some(entry) = self.in_flight.remove(&ticket) {
                let elapsed = entry.started.elapsed();
                warn!(%ticket, elapsed_secs = elapsed.as_secs_f64(), "item timed out");
                self.push(entry.item, Err(WorkError::TimedOut(elapsed)), elapsed);
            }
        }
    }

    fn push(&mut self, item: T, result: Result<R, WorkError>, elapsed: Duration) {
        match &result {
            Ok(_) => self.stats.succeeded += 1,
            Err(e) => {
                self.stats.failed += 1;
                if e.is_timeout() {
                    self.stats.timed_out += 1;
                }
            }
        }
        self.ready.push_back(Completion {
            item,
            result,
            elapsed,
        });
    }

    /// Stop pulling, keep what already finished, shut the backend down
    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.exhausted = true;

        if !self.in_flight.is_empty() {
            self.collect(Duration::ZERO);
        }
        if !self.in_flight.is_empty() {
            let finished = self.backend.flush();
            self.accept(finished);
        }
        self.backend.shutdown();
        if !self.in_flight.is_empty() {
            self.stats.cancelled += self.in_flight.len();
            warn!(cancelled = self.in_flight.len(), "pipeline closed with items in flight");
            self.in_flight.clear();
        }
        info!(
            submitted = self.stats.submitted,
            succeeded = self.stats.succeeded,
            failed = self.stats.failed,
            timed_out = self.stats.timed_out,
            "pipeline finished"
        );
    }
}

impl<T, R, S, B> Iterator for Completions<T, R, S, B>
where
    S: Iterator<Item = T>,
    B: Backend<T, R>,
{
    type Item = Completion<T, R>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(done) = self.ready.pop_front() {
                return Some(done);
            }
            if self.closed {
                return None;
            }
            if self.stop.is_triggered() {
                debug!("stop requested");
                self.close();
                continue;
            }

            self.fill();
            if !self.ready.is_empty() {
                continue;
            }
            if self.in_flight.is_empty() {
                // fill() only leaves nothing running once the source is dry
                self.close();
                continue;
            }

            self.collect(self.poll_interval);
            self.expire();
            self.fill();
        }
    }
}

impl<T, R, S, B> Drop for Completions<T, R, S, B>
where
    S: Iterator<Item = T>,
    B: Backend<T, R>,
{
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{SerialBackend, ThreadBackend};
    use std::thread;

    fn pipeline(k: usize, timeout: Option<Duration>) -> Pipeline {
        Pipeline::new(
            PipelineConfig::default()
                .with_max_in_flight(k)
                .with_timeout(timeout)
                .with_poll_interval(Duration::from_millis(5)),
        )
        .unwrap()
    }

    #[test]
    fn rejects_zero_concurrency() {
        let err = Pipeline::new(PipelineConfig::default().with_max_in_flight(0)).unwrap_err();
        assert_eq!(err, PipelineError::ZeroConcurrency);
    }

    #[test]
    fn completion_order_not_input_order() {
        let backend = ThreadBackend::new(|ms: &u64| {
            thread::sleep(Duration::from_millis(*ms));
            Ok::<_, WorkError>(*ms)
        });
        let order: Vec<u64> = pipeline(3, None)
            .run(vec![300u64, 10, 150], backend)
            .filter_map(|c| c.result.ok())
            .collect();
        assert_eq!(order, vec![10, 150, 300]);
    }

    #[test]
    fn never_exceeds_limit() {
        let backend = ThreadBackend::new(|_: &u32| {
            thread::sleep(Duration::from_millis(20));
            Ok::<_, WorkError>(())
        });
        let mut completions = pipeline(2, None).run(0..10u32, backend);
        let mut count = 0;
        for _ in completions.by_ref() {
            count += 1;
        }
        assert_eq!(count, 10);
        assert_eq!(completions.stats().peak_in_flight, 2);
    }

    #[test]
    fn source_is_pulled_lazily() {
        use std::sync::atomic::AtomicUsize;
        let pulled = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&pulled);
        let source = (0..100u32).inspect(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let backend = ThreadBackend::new(|x: &u32| Ok::<_, WorkError>(*x));
        let mut completions = pipeline(4, None).run(source, backend);
        assert!(completions.next().is_some());
        assert!(pulled.load(Ordering::SeqCst) <= 8);
    }

    #[test]
    fn thread_timeout_yields_error_and_backfills() {
        let backend = ThreadBackend::new(|ms: &u64| {
            thread::sleep(Duration::from_millis(*ms));
            Ok::<_, WorkError>(*ms)
        });
        let started = Instant::now();
        let results: Vec<_> = pipeline(1, Some(Duration::from_millis(100)))
            .run(vec![5_000u64, 10, 10], backend)
            .map(Completion::into_parts)
            .collect();

        assert_eq!(results.len(), 3);
        assert!(matches!(results[0], (5_000, None, Some(WorkError::TimedOut(_)))));
        assert_eq!(results[1].1, Some(10));
        assert_eq!(results[2].1, Some(10));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn serial_runs_one_at_a_time_in_order() {
        let backend = SerialBackend::new(|x: &u32| Ok::<_, WorkError>(x * 10));
        let out: Vec<u32> = pipeline(8, None)
            .run(1..=4u32, backend)
            .filter_map(|c| c.result.ok())
            .collect();
        assert_eq!(out, vec![10, 20, 30, 40]);
    }

    #[test]
    fn stop_flag_ends_iteration_and_keeps_finished() {
        let backend = ThreadBackend::new(|ms: &u64| {
            thread::sleep(Duration::from_millis(*ms));
            Ok::<_, WorkError>(*ms)
        });
        let stop = StopFlag::new();
        let mut completions = pipeline(2, None).run_until(vec![10u64, 10_000, 10_000, 10_000], backend, stop.clone());

        let first = completions.next().unwrap();
        assert_eq!(first.result, Ok(10));
        stop.trigger();

        let started = Instant::now();
        assert!(completions.next().is_none());
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(completions.stats().cancelled >= 1);
    }

    #[test]
    fn empty_source_yields_nothing() {
        let backend = ThreadBackend::new(|x: &u8| Ok::<_, WorkError>(*x));
        assert_eq!(pipeline(2, None).run(Vec::<u8>::new(), backend).count(), 0);
    }
}
