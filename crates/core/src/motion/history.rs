use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::{config::MotionConfig, MotionAudioError, MotionSample, Result};

const MIN_TEMPO_BPM: f32 = 60.0;
const MAX_TEMPO_BPM: f32 = 180.0;

/// Temporal shape of the recent motion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionPattern {
    Rhythmic,
    Continuous,
    Static,
    Variable,
    Steady,
    Unknown,
}

impl MotionPattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rhythmic => "rhythmic",
            Self::Continuous => "continuous",
            Self::Static => "static",
            Self::Variable => "variable",
            Self::Steady => "steady",
            Self::Unknown => "unknown",
        }
    }
}

/// Mean motion direction across the history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Direction {
    pub x: f32,
    pub y: f32,
}

/// Rolling summary derived from the current history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionSummary {
    pub average_intensity: f32,
    pub max_intensity: f32,
    pub pattern: MotionPattern,
    pub dominant_direction: Direction,
    pub history_len: usize,
    pub suggested_tempo: f32,
    pub suggested_volume: f32,
}

/// Maps an average intensity in `[0, 1]` onto `[60, 180]` BPM, rounded to
/// whole beats.
pub fn intensity_to_tempo(intensity: f32) -> f32 {
    let intensity = if intensity.is_finite() {
        intensity.clamp(0.0, 1.0)
    } else {
        0.0
    };
    (MIN_TEMPO_BPM + intensity * (MAX_TEMPO_BPM - MIN_TEMPO_BPM)).round()
}

/// Bounded FIFO of motion samples.
#[derive(Debug, Clone)]
pub struct MotionHistory {
    samples: VecDeque<MotionSample>,
    capacity: usize,
    pattern_window: usize,
}

impl Default for MotionHistory {
    fn default() -> Self {
        Self::new(&MotionConfig::default())
    }
}

impl MotionHistory {
    pub fn new(config: &MotionConfig) -> Self {
        let capacity = config.history_capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            pattern_window: config.pattern_window.max(3),
        }
    }

    /// Returns the maximum number of samples kept.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of samples currently held.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns `true` if no sample has been pushed since the last reset.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Returns the newest sample.
    pub fn latest(&self) -> Option<&MotionSample> {
        self.samples.back()
    }

    /// Iterates samples from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &MotionSample> {
        self.samples.iter()
    }

    /// Appends a sample, evicting the oldest once the history is full.
    /// Timestamps must not go backwards.
    pub fn push(&mut self, sample: MotionSample) -> Result<()> {
        if let Some(last) = self.samples.back() {
            if sample.timestamp < last.timestamp {
                return Err(MotionAudioError::invalid_input(format!(
                    "motion sample at {}s arrived after {}s",
                    sample.timestamp, last.timestamp
                )));
            }
        }

        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
        Ok(())
    }

    /// Classifies the most recent samples.
    pub fn pattern(&self) -> MotionPattern {
        if self.samples.len() < 3 {
            return MotionPattern::Unknown;
        }

        let skip = self.samples.len().saturating_sub(self.pattern_window);
        let recent: Vec<f32> = self.samples.iter().skip(skip).map(|s| s.intensity).collect();

        let peaks = recent
            .windows(3)
            .filter(|w| w[1] > w[0] && w[1] > w[2])
            .count();
        if peaks >= 2 {
            return MotionPattern::Rhythmic;
        }

        let mean = mean(&recent);
        if mean > 0.2 {
            MotionPattern::Continuous
        } else if mean < 0.05 {
            MotionPattern::Static
        } else if std_dev(&recent, mean) > 0.1 {
            MotionPattern::Variable
        } else {
            MotionPattern::Steady
        }
    }

    /// Summary over every retained sample, `None` while empty.
    pub fn summary(&self) -> Option<MotionSummary> {
        if self.samples.is_empty() {
            return None;
        }

        let count = self.samples.len() as f32;
        let intensities: Vec<f32> = self.samples.iter().map(|s| s.intensity).collect();
        let average_intensity = mean(&intensities);
        let max_intensity = intensities.iter().copied().fold(0.0, f32::max);
        let dominant_direction = Direction {
            x: self.samples.iter().map(|s| s.vector.x).sum::<f32>() / count,
            y: self.samples.iter().map(|s| s.vector.y).sum::<f32>() / count,
        };

        Some(MotionSummary {
            average_intensity,
            max_intensity,
            pattern: self.pattern(),
            dominant_direction,
            history_len: self.samples.len(),
            suggested_tempo: intensity_to_tempo(average_intensity),
            suggested_volume: (average_intensity * 2.0).min(1.0),
        })
    }

    pub fn reset(&mut self) {
        self.samples.clear();
    }
}

fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f32>() / values.len() as f32
}

fn std_dev(values: &[f32], mean: f32) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / values.len() as f32;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MotionVector;

    fn history_of(intensities: &[f32]) -> MotionHistory {
        let mut history = MotionHistory::default();
        for (i, intensity) in intensities.iter().enumerate() {
            history
                .push(MotionSample::from_intensity(
                    i as f64 * 0.2,
                    *intensity,
                    MotionVector::ZERO,
                ))
                .unwrap();
        }
        history
    }

    #[test]
    fn short_histories_are_unknown() {
        assert_eq!(history_of(&[]).pattern(), MotionPattern::Unknown);
        assert_eq!(history_of(&[0.5, 0.0]).pattern(), MotionPattern::Unknown);
        assert!(history_of(&[]).summary().is_none());
    }

    #[test]
    fn two_peaks_are_rhythmic_at_any_level() {
        let quiet = history_of(&[0.0, 0.01, 0.0, 0.01, 0.0]);
        let loud = history_of(&[0.6, 0.9, 0.6, 0.9, 0.6]);
        assert_eq!(quiet.pattern(), MotionPattern::Rhythmic);
        assert_eq!(loud.pattern(), MotionPattern::Rhythmic);
    }

    #[test]
    fn classifies_by_mean_and_spread() {
        assert_eq!(
            history_of(&[0.3, 0.3, 0.3]).pattern(),
            MotionPattern::Continuous
        );
        assert_eq!(history_of(&[0.0, 0.0, 0.0]).pattern(), MotionPattern::Static);
        assert_eq!(
            history_of(&[0.0, 0.0, 0.3, 0.3, 0.0]).pattern(),
            MotionPattern::Variable
        );
        assert_eq!(
            history_of(&[0.1, 0.1, 0.1, 0.1]).pattern(),
            MotionPattern::Steady
        );
    }

    #[test]
    fn pattern_only_looks_at_the_last_five() {
        // Two peaks in the first half, flat afterwards.
        let history = history_of(&[0.0, 0.5, 0.0, 0.5, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(history.pattern(), MotionPattern::Static);
    }

    #[test]
    fn evicts_oldest_when_full() {
        let mut intensities = vec![1.0];
        intensities.extend(std::iter::repeat(0.0).take(10));
        let history = history_of(&intensities);

        assert_eq!(history.len(), 10);
        let summary = history.summary().unwrap();
        assert_eq!(summary.max_intensity, 0.0);
        assert_eq!(summary.average_intensity, 0.0);
        assert_eq!(history.iter().next().unwrap().timestamp, 0.2);
    }

    #[test]
    fn rejects_out_of_order_samples() {
        let mut history = history_of(&[0.1, 0.1]);
        let err = history
            .push(MotionSample::from_intensity(0.0, 0.1, MotionVector::ZERO))
            .unwrap_err();
        assert!(matches!(err, MotionAudioError::InvalidInput(_)));
    }

    #[test]
    fn summary_suggests_tempo_and_volume() {
        let summary = history_of(&[0.25, 0.25, 0.25, 0.25]).summary().unwrap();
        assert_eq!(summary.suggested_tempo, 90.0);
        assert_eq!(summary.suggested_volume, 0.5);
        assert_eq!(summary.history_len, 4);

        let saturated = history_of(&[0.8, 0.8]).summary().unwrap();
        assert_eq!(saturated.suggested_volume, 1.0);
    }

    #[test]
    fn tempo_mapping_is_bounded_and_monotonic() {
        assert_eq!(intensity_to_tempo(0.0), 60.0);
        assert_eq!(intensity_to_tempo(1.0), 180.0);
        assert_eq!(intensity_to_tempo(-1.0), 60.0);
        assert_eq!(intensity_to_tempo(3.0), 180.0);

        let mut previous = intensity_to_tempo(0.0);
        for step in 1..=100 {
            let tempo = intensity_to_tempo(step as f32 / 100.0);
            assert!(tempo >= previous);
            assert!((60.0..=180.0).contains(&tempo));
            previous = tempo;
        }
    }

    #[test]
    fn reset_clears_samples() {
        let mut history = history_of(&[0.2, 0.3]);
        history.reset();
        assert!(history.is_empty());
        assert!(history.latest().is_none());
    }
}
