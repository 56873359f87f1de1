use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Default sampling window for speed calculation.
const DEFAULT_WINDOW: Duration = Duration::from_secs(5);

/// Default cap on retained samples.
const DEFAULT_MAX_SAMPLES: usize = 100;

#[derive(Debug, Clone, Copy)]
struct Sample {
    at: Instant,
    bytes: u64,
}

/// Derived progress metrics at one point in time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSnapshot {
    /// Percent complete, always within `[0, 100]`.
    pub percent: f64,
    /// Bytes per second; `None` until two distinct samples exist.
    pub speed: Option<f64>,
    /// Estimated time remaining; `None` when speed is unknown or zero.
    pub eta: Option<Duration>,
}

/// Rolling window of `(timestamp, bytes_transferred)` samples.
///
/// Speed is the byte delta between the oldest and newest sample in the
/// window divided by their time delta. ETA follows from the current speed
/// and fluctuates with it.
#[derive(Debug, Clone)]
pub struct ProgressModel {
    total_bytes: u64,
    current_bytes: u64,
    samples: VecDeque<Sample>,
    window: Duration,
    max_samples: usize,
}

impl ProgressModel {
    /// Creates a model for a transfer of `total_bytes`.
    ///
    /// - `window`: time span of retained samples (default 5 s).
    /// - `max_samples`: maximum retained samples (default 100, at least 2).
    pub fn new(total_bytes: u64, window: Option<Duration>, max_samples: Option<usize>) -> Self {
        Self {
            total_bytes,
            current_bytes: 0,
            samples: VecDeque::new(),
            window: window.unwrap_or(DEFAULT_WINDOW),
            max_samples: max_samples.unwrap_or(DEFAULT_MAX_SAMPLES).max(2),
        }
    }

    /// Records the cumulative byte count at the current instant.
    pub fn record(&mut self, bytes_transferred: u64) {
        self.record_at(Instant::now(), bytes_transferred);
    }

    /// Records the cumulative byte count at `at`.
    ///
    /// Timestamps earlier than the newest sample are clamped to it so the
    /// window stays ordered.
    pub fn record_at(&mut self, at: Instant, bytes_transferred: u64) {
        let at = match self.samples.back() {
            Some(last) if at < last.at => last.at,
            _ => at,
        };
        self.current_bytes = bytes_transferred;
        self.samples.push_back(Sample {
            at,
            bytes: bytes_transferred,
        });

        // Prune samples outside the window, keeping the newest.
        if let Some(cutoff) = at.checked_sub(self.window) {
            while self.samples.len() > 1 && self.samples.front().is_some_and(|s| s.at < cutoff) {
                self.samples.pop_front();
            }
        }

        while self.samples.len() > self.max_samples {
            self.samples.pop_front();
        }
    }

    /// Percent complete, clamped to `[0, 100]`.
    pub fn percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        let pct = 100.0 * self.current_bytes as f64 / self.total_bytes as f64;
        pct.clamp(0.0, 100.0)
    }

    /// Bytes per second across the window, or `None` with fewer than two
    /// samples or no elapsed time.
    pub fn speed(&self) -> Option<f64> {
        if self.samples.len() < 2 {
            return None;
        }
        let first = self.samples.front()?;
        let last = self.samples.back()?;
        let elapsed = last.at.duration_since(first.at);
        if elapsed.is_zero() {
            return None;
        }
        // Acknowledgments are monotonic, but a reset window may restart lower.
        let delta = last.bytes.saturating_sub(first.bytes);
        Some(delta as f64 / elapsed.as_secs_f64())
    }

    /// Estimated time until `total_bytes`, if speed is known and non-zero.
    pub fn eta(&self) -> Option<Duration> {
        if self.percent() >= 100.0 {
            return None;
        }
        let speed = self.speed().filter(|s| *s > 0.0)?;
        let remaining = self.total_bytes.saturating_sub(self.current_bytes);
        Duration::try_from_secs_f64(remaining as f64 / speed).ok()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            percent: self.percent(),
            speed: self.speed(),
            eta: self.eta(),
        }
    }

    /// Drops all samples; the byte count is kept.
    pub fn reset(&mut self) {
        self.samples.clear();
    }

    pub fn current_bytes(&self) -> u64 {
        self.current_bytes
    }
}
