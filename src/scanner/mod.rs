//! Core functionality for actual scanning behaviour.
//!
//! A [`Scanner`] owns one [`Probe`] and the targets queued for it. Running it
//! spawns a fixed number of workers that pull targets from a bounded queue,
//! so at most `concurrency` probes are in flight at any time.
use std::path::PathBuf;
use std::sync::Arc;

use log::debug;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::probe::Probe;

pub mod context;
pub use context::ScanContext;

/// Largest number of targets buffered between the producer and the workers.
const MAX_QUEUE_CAPACITY: usize = 1 << 16;

/// Counters of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanSummary {
    pub total: u64,
    pub completed: u64,
    pub success: u64,
    pub cancelled: bool,
}

pub struct Scanner<P: Probe> {
    concurrency: usize,
    probe: Arc<P>,
    targets: Vec<P::Target>,
    output: Option<PathBuf>,
    quiet: bool,
    cancel: CancellationToken,
}

impl<P: Probe> Scanner<P> {
    /// A concurrency of 0 is treated as 1.
    pub fn new(concurrency: usize, probe: P) -> Self {
        Self {
            concurrency: concurrency.max(1),
            probe: Arc::new(probe),
            targets: Vec::new(),
            output: None,
            quiet: false,
            cancel: CancellationToken::new(),
        }
    }

    pub fn add(&mut self, targets: impl IntoIterator<Item = P::Target>) {
        self.targets.extend(targets);
    }

    /// Hits are appended to `path`, one line each.
    pub fn set_output_file(&mut self, path: impl Into<PathBuf>) {
        self.output = Some(path.into());
    }

    pub fn set_quiet(&mut self, quiet: bool) {
        self.quiet = quiet;
    }

    /// Stops the run early once `token` is cancelled. Probes in flight are
    /// dropped, closing their connections.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Probes every queued target and waits for all workers to finish.
    pub async fn run(self) -> ScanSummary {
        let total = self.targets.len() as u64;
        let ctx = Arc::new(ScanContext::new(
            total,
            self.output,
            self.quiet,
            self.cancel.clone(),
        ));

        let (tx, rx) = mpsc::channel::<P::Target>(queue_capacity(self.concurrency));
        let queue = Arc::new(Mutex::new(rx));

        let mut workers = JoinSet::new();
        for _ in 0..self.concurrency {
            workers.spawn(worker(
                Arc::clone(&self.probe),
                Arc::clone(&ctx),
                Arc::clone(&queue),
            ));
        }
        debug!("Started {} workers for {total} targets", self.concurrency);

        for target in self.targets {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                sent = tx.send(target) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
        }
        drop(tx);

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                debug!("Worker ended abnormally: {e}");
            }
        }
        ctx.finish();

        ScanSummary {
            total,
            completed: ctx.completed(),
            success: ctx.success(),
            cancelled: ctx.is_cancelled(),
        }
    }
}

async fn worker<P: Probe>(
    probe: Arc<P>,
    ctx: Arc<ScanContext>,
    queue: Arc<Mutex<mpsc::Receiver<P::Target>>>,
) {
    loop {
        let next = queue.lock().await.recv().await;
        let Some(target) = next else {
            break;
        };
        if ctx.is_cancelled() {
            break;
        }

        let label = probe.label(&target);
        let outcome = tokio::select! {
            biased;
            () = ctx.cancelled() => break,
            line = probe.probe(&ctx, target) => line,
        };
        if let Some(line) = outcome {
            ctx.scan_success(&line).await;
        }
        ctx.mark_completed();
        ctx.log_replace(&label);
    }
}

/// Two queued targets per worker, bounded for very large worker counts.
fn queue_capacity(concurrency: usize) -> usize {
    concurrency.saturating_mul(2).clamp(1, MAX_QUEUE_CAPACITY)
}

#[cfg(test)]
mod tests {
    use super::{queue_capacity, ScanContext, Scanner, MAX_QUEUE_CAPACITY};
    use crate::probe::Probe;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    /// Even numbers are hits.
    struct EvenProbe;

    impl Probe for EvenProbe {
        type Target = u32;

        fn label(&self, target: &u32) -> String {
            target.to_string()
        }

        async fn probe(&self, _ctx: &ScanContext, target: u32) -> Option<String> {
            tokio::task::yield_now().await;
            (target % 2 == 0).then(|| format!("hit {target}"))
        }
    }

    /// Records the highest number of probes running at once.
    #[derive(Default)]
    struct GaugeProbe {
        running: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl Probe for GaugeProbe {
        type Target = u32;

        fn label(&self, target: &u32) -> String {
            target.to_string()
        }

        async fn probe(&self, _ctx: &ScanContext, _target: u32) -> Option<String> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            None
        }
    }

    struct StuckProbe;

    impl Probe for StuckProbe {
        type Target = u32;

        fn label(&self, target: &u32) -> String {
            target.to_string()
        }

        async fn probe(&self, _ctx: &ScanContext, _target: u32) -> Option<String> {
            std::future::pending::<()>().await;
            None
        }
    }

    fn quiet<P: Probe>(concurrency: usize, probe: P) -> Scanner<P> {
        let mut scanner = Scanner::new(concurrency, probe);
        scanner.set_quiet(true);
        scanner
    }

    #[tokio::test]
    async fn every_target_is_completed_once() {
        let mut scanner = quiet(4, EvenProbe);
        scanner.add(0..10);

        let summary = scanner.run().await;

        assert_eq!(summary.total, 10);
        assert_eq!(summary.completed, 10);
        assert_eq!(summary.success, 5);
        assert!(!summary.cancelled);
    }

    #[tokio::test]
    async fn single_worker_processes_everything() {
        let mut scanner = quiet(1, EvenProbe);
        scanner.add(0..25);

        let summary = scanner.run().await;
        assert_eq!(summary.completed, 25);
        assert_eq!(summary.success, 13);
    }

    #[tokio::test]
    async fn empty_run_returns_immediately() {
        let scanner = quiet(8, EvenProbe);
        assert!(scanner.is_empty());

        let summary = scanner.run().await;
        assert_eq!((summary.total, summary.completed, summary.success), (0, 0, 0));
    }

    #[test]
    fn queue_holds_two_targets_per_worker() {
        assert_eq!(queue_capacity(1), 2);
        assert_eq!(queue_capacity(64), 128);
    }

    #[test]
    fn huge_worker_count_keeps_queue_bounded() {
        assert_eq!(queue_capacity(usize::MAX), MAX_QUEUE_CAPACITY);
        assert_eq!(queue_capacity(usize::MAX / 2 + 1), MAX_QUEUE_CAPACITY);
    }

    #[tokio::test]
    async fn zero_concurrency_still_scans() {
        let mut scanner = quiet(0, EvenProbe);
        scanner.add([2, 3]);

        assert_eq!(scanner.run().await.completed, 2);
    }

    #[tokio::test]
    async fn in_flight_probes_never_exceed_concurrency() {
        let probe = GaugeProbe::default();
        let peak = Arc::clone(&probe.peak);
        let mut scanner = quiet(3, probe);
        scanner.add(0..12);

        let summary = scanner.run().await;

        assert_eq!(summary.completed, 12);
        let peak = peak.load(Ordering::SeqCst);
        assert!((1..=3).contains(&peak), "peak was {peak}");
    }

    #[tokio::test]
    async fn hits_are_appended_to_output_file() {
        let path = std::env::temp_dir().join(format!("bugscan-engine-{}.txt", std::process::id()));
        let _ = std::fs::remove_file(&path);

        let mut scanner = quiet(4, EvenProbe);
        scanner.add(1..=6);
        scanner.set_output_file(&path);
        let summary = scanner.run().await;

        let written = std::fs::read_to_string(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        let mut lines = written.lines().collect::<Vec<_>>();
        lines.sort_unstable();
        assert_eq!(lines, vec!["hit 2", "hit 4", "hit 6"]);
        assert_eq!(summary.success, 3);
    }

    #[tokio::test]
    async fn cancellation_ends_a_stuck_run() {
        let token = CancellationToken::new();
        let mut scanner = quiet(2, StuckProbe).with_cancellation(token.clone());
        scanner.add(0..100);

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        });

        let summary = tokio::time::timeout(Duration::from_secs(5), scanner.run())
            .await
            .unwrap();
        canceller.await.unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.completed, 0);
        assert_eq!(summary.total, 100);
    }
}
