use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::Result;

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub motion: MotionConfig,
    pub mapping: MappingConfig,
    pub audio: AudioConfig,
    pub tracking: TrackingConfig,
}

impl AppConfig {
    /// Parses a JSON document. Missing sections and fields keep their
    /// defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Loads a JSON configuration file from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}

/// Frame differencing and history parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// Mean absolute channel difference (0-255) above which a pixel counts as
    /// moved.
    pub pixel_threshold: u8,
    /// Edge length of a grid cell in pixels.
    pub cell_size: u32,
    /// A cell becomes a hotspot once more than this many pixels moved in it.
    pub hotspot_min_pixels: u32,
    pub max_hotspots: usize,
    pub history_capacity: usize,
    /// Number of most recent samples inspected by pattern detection.
    pub pattern_window: usize,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            pixel_threshold: 25,
            cell_size: 20,
            hotspot_min_pixels: 10,
            max_hotspots: 5,
            history_capacity: 10,
            pattern_window: 5,
        }
    }
}

/// Rules used when turning motion and scene hints into audio directives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingConfig {
    /// Scene hints below this confidence are ignored for the tick.
    pub confidence_floor: f32,
    /// Minimum BPM distance before a periodic evaluation retunes the tempo.
    pub tempo_hysteresis_bpm: f32,
    pub volume_ramp_secs: f64,
    /// `|vector.x|` must exceed this before the pan stage is touched.
    pub pan_dead_zone: f32,
    /// Tempo before the first retune, also the tempo at which footstep
    /// cadences are used unscaled.
    pub initial_tempo: f32,
    pub footstep_jitter_ms: f64,
    /// Intensity above which an `intense` sample fires an impact by itself.
    pub motion_impact_threshold: f32,
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            confidence_floor: 0.5,
            tempo_hysteresis_bpm: 10.0,
            volume_ramp_secs: 0.1,
            pan_dead_zone: 0.1,
            initial_tempo: 100.0,
            footstep_jitter_ms: 50.0,
            motion_impact_threshold: 0.4,
        }
    }
}

/// Configuration specific to the audio subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    /// Frames rendered per mixer block.
    pub block_size: usize,
    /// How far ahead of the output clock continuous effects are scheduled.
    pub lookahead_secs: f64,
    pub analysis_fft_size: usize,
    /// Fixes the random source used for jitter and noise. Entropy when unset.
    pub seed: Option<u64>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            block_size: 1024,
            lookahead_secs: 0.25,
            analysis_fft_size: 256,
            seed: None,
        }
    }
}

/// Timer settings for the tracking loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    pub tick_interval_ms: u64,
    /// A scene hint is requested every this many ticks (0 disables hints).
    pub hint_every_ticks: u32,
    pub hint_timeout_ms: u64,
    /// Wait for the wall clock between ticks instead of running as fast as
    /// frames can be produced.
    pub realtime: bool,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 200,
            hint_every_ticks: 5,
            hint_timeout_ms: 10_000,
            realtime: false,
        }
    }
}

impl TrackingConfig {
    /// Returns the tick interval in seconds.
    pub fn tick_secs(&self) -> f64 {
        self.tick_interval_ms as f64 / 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_documents_keep_defaults() {
        let config =
            AppConfig::from_json_str(r#"{ "motion": { "pixel_threshold": 40 } }"#).unwrap();

        assert_eq!(config.motion.pixel_threshold, 40);
        assert_eq!(config.motion.cell_size, 20);
        assert_eq!(config.motion.history_capacity, 10);
        assert_eq!(config.tracking.tick_interval_ms, 200);
        assert!(config.audio.seed.is_none());
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(AppConfig::from_json_str("{ motion: ").is_err());
    }
}
