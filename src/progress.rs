//! Progress tracking for fileforge operations
//!
//! Every operation runs in up to two sequential phases. The aggregator maps
//! each phase onto its own sub-range of a single 0-100 scale and guarantees
//! that observers only ever see a non-decreasing integer percentage.

use std::sync::Arc;

use serde::Serialize;

/// Default boundary between the packing and encoding phases.
pub const DEFAULT_SPLIT: u8 = 50;

/// The phase an operation is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Gathering input: reading entries, decoding an image.
    Packing,
    /// Producing output: writing the archive stream, searching encoder quality.
    Encoding,
}

/// Snapshot handed to the progress callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressState {
    pub phase: Phase,
    pub processed_units: u64,
    pub total_units: u64,
    /// Overall completion, `0..=100`.
    pub percent: u8,
}

/// Progress callback function type
pub type ProgressCallback = dyn Fn(ProgressState) + Send + Sync;

/// Maps multi-phase work onto one monotonic percentage.
pub struct ProgressAggregator {
    /// Whether progress tracking is enabled
    enabled: bool,
    split: u8,
    last_percent: u8,
    callback: Option<Arc<ProgressCallback>>,
}

impl ProgressAggregator {
    /// Create a disabled aggregator with the given phase split (clamped to `1..=99`).
    pub fn new(split: u8) -> Self {
        Self {
            enabled: false,
            split: split.clamp(1, 99),
            last_percent: 0,
            callback: None,
        }
    }

    /// An aggregator that never emits.
    pub fn disabled() -> Self {
        Self::new(DEFAULT_SPLIT)
    }

    /// Enable progress tracking with a callback
    pub fn enable_with_callback<F>(&mut self, callback: F)
    where
        F: Fn(ProgressState) + Send + Sync + 'static,
    {
        self.enabled = true;
        self.callback = Some(Arc::new(callback));
        self.last_percent = 0;
    }

    /// Convenience constructor for an enabled aggregator.
    pub fn with_callback<F>(split: u8, callback: F) -> Self
    where
        F: Fn(ProgressState) + Send + Sync + 'static,
    {
        let mut aggregator = Self::new(split);
        aggregator.enable_with_callback(callback);
        aggregator
    }

    pub fn split(&self) -> u8 {
        self.split
    }

    /// Last percentage emitted (or that would have been emitted when disabled).
    pub fn percent(&self) -> u8 {
        self.last_percent
    }

    /// Start a new operation; the monotonic floor resets to zero.
    pub fn reset(&mut self) {
        self.last_percent = 0;
    }

    /// Report a fraction (`0.0..=1.0`) of the given phase.
    pub fn report(&mut self, phase: Phase, fraction: f64) {
        let fraction = if fraction.is_finite() { fraction.clamp(0.0, 1.0) } else { 0.0 };
        // Reported as per-mille units so the callback always has integer counters.
        let processed = (fraction * 1000.0).round() as u64;
        self.emit(phase, processed, 1000, fraction);
    }

    /// Report `processed` out of `total` units of the given phase.
    pub fn report_units(&mut self, phase: Phase, processed: u64, total: u64) {
        let fraction = if total == 0 { 1.0 } else { (processed.min(total)) as f64 / total as f64 };
        self.emit(phase, processed.min(total), total, fraction);
    }

    /// Force completion and emit final 100% progress
    pub fn finish(&mut self) {
        self.last_percent = 100;
        if let (true, Some(callback)) = (self.enabled, self.callback.as_ref()) {
            callback(ProgressState {
                phase: Phase::Encoding,
                processed_units: 1,
                total_units: 1,
                percent: 100,
            });
        }
    }

    fn map(&self, phase: Phase, fraction: f64) -> f64 {
        let split = f64::from(self.split);
        match phase {
            // The packing phase never reaches the split itself.
            Phase::Packing => (fraction * split).min(split - 1.0),
            Phase::Encoding => split + fraction * (100.0 - split),
        }
    }

    fn emit(&mut self, phase: Phase, processed: u64, total: u64, fraction: f64) {
        let mapped = self.map(phase, fraction).round().clamp(0.0, 100.0) as u8;
        let percent = mapped.max(self.last_percent);
        self.last_percent = percent;

        if !self.enabled {
            return;
        }
        if let Some(ref callback) = self.callback {
            callback(ProgressState {
                phase,
                processed_units: processed,
                total_units: total,
                percent,
            });
        }
    }
}

impl Default for ProgressAggregator {
    fn default() -> Self {
        Self::disabled()
    }
}

impl std::fmt::Debug for ProgressAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressAggregator")
            .field("enabled", &self.enabled)
            .field("split", &self.split)
            .field("last_percent", &self.last_percent)
            .finish()
    }
}
