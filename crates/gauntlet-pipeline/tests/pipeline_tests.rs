//! End-to-end pipeline behavior across all three backends

use gauntlet_pipeline::prelude::*;
use gauntlet_pipeline::{Completions, WorkError};
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn config(k: usize, timeout: Option<Duration>) -> PipelineConfig {
    PipelineConfig::default()
        .with_max_in_flight(k)
        .with_timeout(timeout)
        .with_poll_interval(Duration::from_millis(5))
}

/// Counts how many calls overlap
#[derive(Default)]
struct Gauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl Gauge {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

fn gauged_worker(gauge: Arc<Gauge>) -> impl Fn(&u32) -> Result<u32, WorkError> + Send + Sync + 'static {
    move |x: &u32| {
        gauge.enter();
        thread::sleep(Duration::from_millis(u64::from(x % 4) * 3));
        gauge.leave();
        if x % 7 == 3 {
            Err(WorkError::failed("ValueError", format!("item {x} rejected")))
        } else {
            Ok(x * 2)
        }
    }
}

fn check_every_item_once<S, B>(completions: Completions<u32, u32, S, B>, n: u32)
where
    S: Iterator<Item = u32>,
    B: Backend<u32, u32>,
{
    let mut seen = BTreeSet::new();
    for done in completions {
        let (item, result, error) = done.into_parts();
        assert!(result.is_some() ^ error.is_some());
        if let Some(value) = result {
            assert_eq!(value, item * 2);
        }
        assert!(seen.insert(item), "item {item} reported twice");
    }
    assert_eq!(seen, (0..n).collect::<BTreeSet<_>>());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn every_item_completes_once_on_threads(n in 0u32..40, k in 1usize..6) {
        let gauge = Arc::new(Gauge::default());
        let pipeline = Pipeline::new(config(k, None)).unwrap();
        let completions = pipeline.run(0..n, ThreadBackend::new(gauged_worker(Arc::clone(&gauge))));
        check_every_item_once(completions, n);
        prop_assert!(gauge.peak.load(Ordering::SeqCst) <= k);
    }

    #[test]
    fn every_item_completes_once_serially(n in 0u32..40, k in 1usize..6) {
        let gauge = Arc::new(Gauge::default());
        let pipeline = Pipeline::new(config(k, None)).unwrap();
        let completions = pipeline.run(0..n, SerialBackend::new(gauged_worker(Arc::clone(&gauge))));
        check_every_item_once(completions, n);
        prop_assert!(gauge.peak.load(Ordering::SeqCst) <= 1);
    }
}

#[test]
fn worker_errors_are_reported_per_item() {
    let pipeline = Pipeline::new(config(3, None)).unwrap();
    let backend = ThreadBackend::new(gauged_worker(Arc::default()));
    let failures: Vec<u32> = pipeline
        .run(0..14u32, backend)
        .filter_map(|c| match c.result {
            Err(WorkError::Failed { kind, .. }) if kind == "ValueError" => Some(c.item),
            _ => None,
        })
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    assert_eq!(failures, vec![3, 10]);
}

#[test]
fn thread_panic_does_not_stop_the_run() {
    let pipeline = Pipeline::new(config(2, None)).unwrap();
    let backend = ThreadBackend::new(|x: &u32| {
        assert!(*x != 2, "cannot handle two");
        Ok::<_, WorkError>(*x)
    });
    let results: Vec<_> = pipeline.run(0..5u32, backend).collect();
    assert_eq!(results.len(), 5);
    let panicked: Vec<_> = results
        .iter()
        .filter(|c| matches!(c.result, Err(WorkError::Panicked(_))))
        .map(|c| c.item)
        .collect();
    assert_eq!(panicked, vec![2]);
}

#[cfg(unix)]
mod process {
    use super::*;
    use gauntlet_pipeline::pid_is_running;

    /// Reads a number of seconds, sleeps that long, replies with the number
    fn sleeper() -> JsonProcessWorker<u64, u64> {
        JsonProcessWorker::new("sh").args([
            "-c",
            r#"read n; sleep "$n"; printf '{"ok":%s}\n' "$n""#,
        ])
    }

    #[test]
    fn results_come_back_from_child_processes() {
        let pipeline = Pipeline::new(config(3, None)).unwrap();
        let mut values: Vec<u64> = pipeline
            .run(vec![0u64, 0, 0, 0], ProcessBackend::new(sleeper()))
            .map(|c| c.result.unwrap())
            .collect();
        values.sort_unstable();
        assert_eq!(values, vec![0, 0, 0, 0]);
    }

    #[test]
    fn slow_process_is_killed_at_timeout() {
        let backend = ProcessBackend::new(sleeper()).with_grace(Duration::from_millis(200));
        let pids = backend.pid_log();
        let pipeline = Pipeline::new(config(2, Some(Duration::from_secs(1)))).unwrap();

        let started = Instant::now();
        let completions: Vec<_> = pipeline.run(vec![30u64, 0, 0, 0], backend).collect();
        let wall = started.elapsed();

        assert_eq!(completions.len(), 4);
        let timed_out: Vec<_> = completions.iter().filter(|c| c.is_timeout()).collect();
        assert_eq!(timed_out.len(), 1);
        assert_eq!(timed_out[0].item, 30);
        assert!(completions.iter().filter(|c| c.item == 0).all(|c| c.result == Ok(0)));
        assert!(wall < Duration::from_secs(5), "took {wall:?}");

        // the timed-out item is reported last; the quick ones backfilled its slot
        assert_eq!(completions.last().map(|c| c.item), Some(30));

        let spawned = pids.snapshot();
        assert_eq!(spawned.len(), 4);
        for pid in spawned {
            assert!(!pid_is_running(pid), "pid {pid} survived");
        }
    }

    #[test]
    fn dropping_the_iterator_reaps_children() {
        let backend = ProcessBackend::new(sleeper()).with_grace(Duration::from_millis(100));
        let pids = backend.pid_log();
        let pipeline = Pipeline::new(config(2, None)).unwrap();

        let stop = StopFlag::new();
        let mut completions = pipeline.run_until(vec![0u64, 30, 30], backend, stop.clone());
        let first = completions.next().unwrap();
        assert_eq!(first.result, Ok(0));

        stop.trigger();
        assert!(completions.next().is_none());
        drop(completions);

        for pid in pids.snapshot() {
            assert!(!pid_is_running(pid), "pid {pid} survived");
        }
    }

    #[test]
    fn stop_keeps_result_of_child_still_flushing_output() {
        // the backgrounded sleep holds stdout open for a second after the shell exits
        let worker: JsonProcessWorker<u64, u64> = JsonProcessWorker::new("sh").args([
            "-c",
            r#"read n; printf '{"ok":%s}\n' "$n"; sleep 1 & exit 0"#,
        ]);
        let pipeline = Pipeline::new(config(1, None)).unwrap();
        let stop = StopFlag::new();
        let trigger = {
            let stop = stop.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(300));
                stop.trigger();
            })
        };

        let done: Vec<_> = pipeline
            .run_until(vec![7u64], ProcessBackend::new(worker), stop)
            .collect();
        trigger.join().unwrap();

        assert_eq!(done.len(), 1);
        assert_eq!(done[0].result, Ok(7));
    }

    #[test]
    fn crashing_child_is_an_item_error() {
        let worker: JsonProcessWorker<u64, u64> =
            JsonProcessWorker::new("sh").args(["-c", "echo boom >&2; exit 3"]);
        let pipeline = Pipeline::new(config(1, None)).unwrap();
        let done: Vec<_> = pipeline.run(vec![1u64], ProcessBackend::new(worker)).collect();
        match &done[0].result {
            Err(WorkError::ProcessExit { code, stderr }) => {
                assert_eq!(*code, Some(3));
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let worker: JsonProcessWorker<u64, u64> = JsonProcessWorker::new("/nonexistent/worker-binary");
        let pipeline = Pipeline::new(config(2, None)).unwrap();
        let done: Vec<_> = pipeline.run(vec![1u64, 2], ProcessBackend::new(worker)).collect();
        assert_eq!(done.len(), 2);
        assert!(done.iter().all(|c| matches!(c.result, Err(WorkError::Spawn(_)))));
    }
}
