//! Frame differencing and the bounded motion history built on top of it.

mod bitmap;
mod estimator;
mod history;

pub use bitmap::Bitmap;
pub use estimator::{FrameDiffEstimator, Hotspot, MotionClass, MotionSample, MotionVector};
pub use history::{intensity_to_tempo, Direction, MotionHistory, MotionPattern, MotionSummary};

use crate::{config::MotionConfig, Result};

/// Detector session: owns the previous frame and the history fed by it.
#[derive(Debug, Clone, Default)]
pub struct MotionTracker {
    estimator: FrameDiffEstimator,
    history: MotionHistory,
    previous: Option<Bitmap>,
}

impl MotionTracker {
    pub fn new(config: &MotionConfig) -> Self {
        Self {
            estimator: FrameDiffEstimator::new(config),
            history: MotionHistory::new(config),
            previous: None,
        }
    }

    /// Measures `frame` against the previously observed one and records the
    /// result. The first frame after a reset only primes the tracker.
    pub fn observe(&mut self, timestamp: f64, frame: Bitmap) -> Result<Option<MotionSample>> {
        let sample = self
            .estimator
            .measure(self.previous.as_ref(), &frame, timestamp)?;

        if let Some(sample) = &sample {
            self.history.push(sample.clone())?;
        }
        self.previous = Some(frame);
        Ok(sample)
    }

    pub fn history(&self) -> &MotionHistory {
        &self.history
    }

    pub fn latest(&self) -> Option<&MotionSample> {
        self.history.latest()
    }

    pub fn summary(&self) -> Option<MotionSummary> {
        self.history.summary()
    }

    pub fn reset(&mut self) {
        self.history.reset();
        self.previous = None;
    }
}
