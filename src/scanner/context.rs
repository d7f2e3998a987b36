//! Shared state handed to every probe during one engine run.
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use indicatif::{HumanDuration, ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::debug;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Progress counters, the optional output file and the status line of a run.
///
/// Probes use [`log`](ScanContext::log) for anything they want the user to
/// see; it clears the status line first so the two never interleave on one
/// line. Hits are recorded by the engine through
/// [`scan_success`](ScanContext::scan_success).
pub struct ScanContext {
    total: u64,
    completed: AtomicU64,
    success: AtomicU64,
    output: Option<PathBuf>,
    file_lock: Mutex<()>,
    status: StatusLine,
    started: Instant,
    cancel: CancellationToken,
}

impl ScanContext {
    pub(crate) fn new(
        total: u64,
        output: Option<PathBuf>,
        quiet: bool,
        cancel: CancellationToken,
    ) -> Self {
        let status = StatusLine::new(total, quiet, std::io::stdout().is_terminal());

        Self {
            total,
            completed: AtomicU64::new(0),
            success: AtomicU64::new(0),
            output,
            file_lock: Mutex::new(()),
            status,
            started: Instant::now(),
            cancel,
        }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn success(&self) -> u64 {
        self.success.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the run has been cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// Prints `message` on its own line above the status line.
    pub fn log(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        match &self.status {
            StatusLine::Bar(bar) => bar.suspend(|| println!("{message}")),
            StatusLine::Plain | StatusLine::Hidden => println!("{message}"),
        }
    }

    /// Replaces the status line with the current progress and `current`.
    pub fn log_replace(&self, current: &str) {
        if matches!(self.status, StatusLine::Hidden) {
            return;
        }
        let line = status_line(
            self.completed(),
            self.total,
            self.success(),
            eta(self.started.elapsed(), self.completed(), self.total),
            current,
        );
        match &self.status {
            StatusLine::Bar(bar) => {
                bar.set_position(self.completed());
                bar.set_message(line);
            }
            StatusLine::Plain => eprintln!("{line}"),
            StatusLine::Hidden => {}
        }
    }

    /// Counts a hit, appends it to the output file and shows it.
    ///
    /// File errors are only logged at debug level: a failed append must not
    /// stop the rest of the scan.
    pub async fn scan_success(&self, line: &str) {
        self.success.fetch_add(1, Ordering::SeqCst);

        if let Some(path) = &self.output {
            let _guard = self.file_lock.lock().await;
            if let Err(e) = append_line(path, line).await {
                debug!("Could not append to {}: {}", path.display(), e);
            }
        }

        self.log(line);
    }

    pub(crate) fn mark_completed(&self) -> u64 {
        self.completed.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn finish(&self) {
        if let StatusLine::Bar(bar) = &self.status {
            bar.finish_and_clear();
        }
    }
}

/// Where progress goes.
enum StatusLine {
    /// Redrawn in place and cut to the terminal width.
    Bar(ProgressBar),
    /// Stdout is not a terminal: every update is a full line on stderr, so
    /// piped results stay clean.
    Plain,
    Hidden,
}

impl StatusLine {
    fn new(total: u64, quiet: bool, terminal: bool) -> Self {
        if quiet {
            return Self::Hidden;
        }
        if !terminal {
            return Self::Plain;
        }
        let bar = ProgressBar::with_draw_target(Some(total), ProgressDrawTarget::stdout());
        bar.set_style(
            ProgressStyle::with_template("{wide_msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        Self::Bar(bar)
    }
}

async fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(format!("{line}\n").as_bytes()).await?;
    file.flush().await
}

/// Estimated time left, from the average time spent per completed target.
#[allow(clippy::cast_precision_loss)]
pub fn eta(elapsed: Duration, completed: u64, total: u64) -> Option<Duration> {
    if completed == 0 || completed >= total {
        return None;
    }
    let remaining = total - completed;
    Some(elapsed.mul_f64(remaining as f64 / completed as f64))
}

/// Text of the single-line progress display.
#[allow(clippy::cast_precision_loss)]
pub fn status_line(
    completed: u64,
    total: u64,
    success: u64,
    eta: Option<Duration>,
    current: &str,
) -> String {
    let percentage = if total == 0 {
        100.0
    } else {
        completed as f64 / total as f64 * 100.0
    };

    match eta {
        Some(eta) => format!(
            "{percentage:.2}% - C: {completed} / {total} - S: {success} - ETA {} - {current}",
            HumanDuration(eta)
        ),
        None => format!("{percentage:.2}% - C: {completed} / {total} - S: {success} - {current}"),
    }
}
