use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;

/// Minimum spacing between published snapshots (at most ~10 per second).
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// A point-in-time view of a running copy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CopyProgress {
    pub bytes_transferred: u64,
    pub total_bytes: u64,
    pub bytes_per_second: f64,
    /// `None` until a throughput can be measured.
    pub seconds_remaining: Option<f64>,
    pub percentage: f64,
}

impl CopyProgress {
    /// Derive throughput, ETA and percentage from raw counters.
    pub fn measure(bytes_transferred: u64, total_bytes: u64, elapsed: Duration) -> Self {
        let secs = elapsed.as_secs_f64();
        let bytes_per_second = if secs > 0.0 {
            bytes_transferred as f64 / secs
        } else {
            0.0
        };

        let remaining = total_bytes.saturating_sub(bytes_transferred);
        let seconds_remaining = if remaining == 0 {
            Some(0.0)
        } else if bytes_per_second > 0.0 {
            Some(remaining as f64 / bytes_per_second)
        } else {
            None
        };

        let percentage = if total_bytes == 0 {
            100.0
        } else {
            (bytes_transferred as f64 / total_bytes as f64 * 100.0).min(100.0)
        };

        Self {
            bytes_transferred,
            total_bytes,
            bytes_per_second,
            seconds_remaining,
            percentage,
        }
    }

    /// The final snapshot of a copy: everything transferred.
    pub fn complete(total_bytes: u64, elapsed: Duration) -> Self {
        Self::measure(total_bytes, total_bytes, elapsed)
    }

    pub fn is_complete(&self) -> bool {
        self.bytes_transferred >= self.total_bytes
    }
}

impl fmt::Display for CopyProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.1}% ({}/s",
            self.percentage,
            human_bytes(self.bytes_per_second as u64)
        )?;
        match self.seconds_remaining {
            Some(secs) => write!(f, ", {}s remaining)", secs.ceil() as u64),
            None => f.write_str(")"),
        }
    }
}

/// Format a byte count with binary units, e.g. `3.1 MiB`.
pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

/// Publishes [`CopyProgress`] snapshots to subscribers, rate-limited to
/// [`PROGRESS_INTERVAL`].
///
/// Sending with no live subscribers is fine; snapshots are simply dropped.
#[derive(Debug)]
pub struct ProgressReporter {
    tx: broadcast::Sender<CopyProgress>,
    last_sent: Mutex<Option<Instant>>,
}

impl ProgressReporter {
    pub fn new(tx: broadcast::Sender<CopyProgress>) -> Self {
        Self {
            tx,
            last_sent: Mutex::new(None),
        }
    }

    /// A reporter with its own channel, handy for standalone copier use.
    pub fn channel(capacity: usize) -> (Self, broadcast::Receiver<CopyProgress>) {
        let (tx, rx) = broadcast::channel(capacity);
        (Self::new(tx), rx)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CopyProgress> {
        self.tx.subscribe()
    }

    /// Publish a snapshot unless one went out less than [`PROGRESS_INTERVAL`] ago.
    /// Returns whether the snapshot was published.
    pub fn report(&self, progress: CopyProgress) -> bool {
        let now = Instant::now();
        {
            let mut last = self.last_sent.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(prev) = *last
                && now.duration_since(prev) < PROGRESS_INTERVAL
            {
                return false;
            }
            *last = Some(now);
        }
        let _ = self.tx.send(progress);
        true
    }

    /// Publish the final 100% snapshot, bypassing the rate limit.
    pub fn finish(&self, total_bytes: u64, elapsed: Duration) {
        *self.last_sent.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
        let _ = self.tx.send(CopyProgress::complete(total_bytes, elapsed));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn measure_derives_rate_eta_and_percentage() {
        let p = CopyProgress::measure(50, 200, Duration::from_secs(5));
        assert_eq!(p.bytes_per_second, 10.0);
        assert_eq!(p.seconds_remaining, Some(15.0));
        assert_eq!(p.percentage, 25.0);
        assert!(!p.is_complete());
    }

    #[test]
    fn empty_source_is_complete() {
        let p = CopyProgress::measure(0, 0, Duration::ZERO);
        assert_eq!(p.percentage, 100.0);
        assert_eq!(p.seconds_remaining, Some(0.0));
        assert!(p.is_complete());
    }

    #[test]
    fn eta_unknown_before_any_bytes_move() {
        let p = CopyProgress::measure(0, 1024, Duration::from_millis(300));
        assert_eq!(p.bytes_per_second, 0.0);
        assert_eq!(p.seconds_remaining, None);
    }

    #[test]
    fn display_renders_percentage_rate_and_eta() {
        let p = CopyProgress::measure(1024 * 1024, 4 * 1024 * 1024, Duration::from_secs(1));
        assert_eq!(p.to_string(), "25.0% (1.0 MiB/s, 3s remaining)");
    }

    #[test]
    fn human_bytes_picks_unit() {
        assert_eq!(human_bytes(512), "512 B");
        assert_eq!(human_bytes(1536), "1.5 KiB");
        assert_eq!(human_bytes(10 * 1024 * 1024), "10.0 MiB");
    }

    #[tokio::test]
    async fn report_is_rate_limited_but_finish_always_sends() {
        let (reporter, mut rx) = ProgressReporter::channel(16);

        assert!(reporter.report(CopyProgress::measure(1, 10, Duration::from_millis(1))));
        assert!(!reporter.report(CopyProgress::measure(2, 10, Duration::from_millis(2))));
        reporter.finish(10, Duration::from_millis(3));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.bytes_transferred, 1);
        let last = rx.recv().await.unwrap();
        assert!(last.is_complete());
        assert_eq!(last.percentage, 100.0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn report_without_subscribers_is_harmless() {
        let (tx, rx) = broadcast::channel(4);
        drop(rx);
        let reporter = ProgressReporter::new(tx);
        assert!(reporter.report(CopyProgress::measure(1, 2, Duration::from_secs(1))));
        reporter.finish(2, Duration::from_secs(1));
    }
}
