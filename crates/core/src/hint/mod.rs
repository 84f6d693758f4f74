//! Scene hints supplied by an external vision model.
//!
//! The core never talks to a model itself. It consumes [`SceneHint`] values
//! through the [`SceneHintSource`] trait and falls back to
//! [`SceneHint::fallback`] whenever the collaborator is unavailable.

use std::{collections::HashMap, path::Path};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Bitmap, MotionAudioError, Result};

/// Confidence reported by the fallback hint.
pub const FALLBACK_CONFIDENCE: f32 = 0.3;

/// Motion-related part of a scene hint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionAnalysis {
    pub primary_action: Option<String>,
    pub movement_intensity: f32,
    pub movement_type: Option<String>,
    /// Bool, free text or a list, depending on the model's mood.
    pub gesture_detected: Value,
    pub collision_events: Value,
}

impl MotionAnalysis {
    pub fn primary_action_mentions(&self, words: &[&str]) -> bool {
        self.primary_action
            .as_deref()
            .map(|action| mentions_any(&action.to_lowercase(), words))
            .unwrap_or(false)
    }

    pub fn gesture_mentions(&self, words: &[&str]) -> bool {
        mentions_any(&flatten_text(&self.gesture_detected), words)
    }

    /// Whether the payload reports at least one collision or impact.
    pub fn has_collision(&self) -> bool {
        is_affirmative(&self.collision_events)
    }
}

/// Structured description of a sampled frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneHint {
    #[serde(default)]
    pub mood: String,
    #[serde(default)]
    pub scene_type: String,
    #[serde(default)]
    pub key_objects: Vec<String>,
    #[serde(default)]
    pub motion_analysis: Option<MotionAnalysis>,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
    #[serde(default)]
    pub is_fallback: bool,
}

fn default_confidence() -> f32 {
    0.5
}

impl SceneHint {
    /// Low-confidence hint used when the collaborator fails.
    pub fn fallback() -> Self {
        Self {
            mood: "calm".to_string(),
            scene_type: "indoor".to_string(),
            key_objects: Vec::new(),
            motion_analysis: None,
            confidence: FALLBACK_CONFIDENCE,
            is_fallback: true,
        }
    }

    /// Extracts the outermost JSON object from a free-form model response.
    pub fn from_response_text(text: &str) -> Result<Self> {
        let start = text.find('{');
        let end = text.rfind('}');
        match (start, end) {
            (Some(start), Some(end)) if end > start => {
                let mut hint: SceneHint = serde_json::from_str(&text[start..=end])?;
                hint.confidence = sanitize_confidence(hint.confidence);
                Ok(hint)
            }
            _ => Err(MotionAudioError::invalid_input(
                "scene hint response contains no JSON object",
            )),
        }
    }

    /// Returns `true` if `name` is among the key objects, ignoring case.
    pub fn has_key_object(&self, name: &str) -> bool {
        self.key_objects
            .iter()
            .any(|object| object.trim().eq_ignore_ascii_case(name))
    }

    /// Returns `true` if the confidence reaches `floor`.
    pub fn is_confident(&self, floor: f32) -> bool {
        self.confidence >= floor
    }
}

fn sanitize_confidence(value: f32) -> f32 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn mentions_any(haystack: &str, words: &[&str]) -> bool {
    words.iter().any(|word| haystack.contains(word))
}

fn flatten_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.to_lowercase(),
        Value::Array(items) => items
            .iter()
            .map(flatten_text)
            .collect::<Vec<_>>()
            .join(" "),
        Value::Object(map) => map.values().map(flatten_text).collect::<Vec<_>>().join(" "),
        _ => String::new(),
    }
}

fn is_affirmative(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().map(|n| n != 0.0).unwrap_or(false),
        Value::String(text) => {
            let text = text.trim().to_lowercase();
            !(text.is_empty() || matches!(text.as_str(), "none" | "no" | "false" | "n/a"))
        }
        Value::Array(items) => items.iter().any(is_affirmative),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Asynchronous provider of scene hints for sampled frames.
#[async_trait]
pub trait SceneHintSource: Send + Sync {
    /// Describes `frame`, captured at `timestamp` seconds. Failures should be
    /// reported as [`MotionAudioError::CollaboratorUnavailable`].
    async fn describe(&self, frame: &Bitmap, timestamp: f64) -> Result<SceneHint>;
}

/// Hint recorded at a point on the video timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimedHint {
    pub timestamp: f64,
    pub hint: SceneHint,
}

/// Answers from a pre-recorded list of hints, picking the latest one at or
/// before the requested timestamp.
#[derive(Debug, Clone, Default)]
pub struct ReplayHints {
    hints: Vec<TimedHint>,
}

impl ReplayHints {
    pub fn new(mut hints: Vec<TimedHint>) -> Self {
        hints.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        Self { hints }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let hints: Vec<TimedHint> = serde_json::from_str(json)?;
        Ok(Self::new(hints))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn len(&self) -> usize {
        self.hints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hints.is_empty()
    }

    pub fn hint_at(&self, timestamp: f64) -> Option<&SceneHint> {
        let index = self.hints.partition_point(|h| h.timestamp <= timestamp);
        index.checked_sub(1).map(|i| &self.hints[i].hint)
    }
}

#[async_trait]
impl SceneHintSource for ReplayHints {
    async fn describe(&self, _frame: &Bitmap, timestamp: f64) -> Result<SceneHint> {
        self.hint_at(timestamp).cloned().ok_or_else(|| {
            MotionAudioError::collaborator_unavailable(format!(
                "no recorded scene hint at or before {timestamp:.2}s"
            ))
        })
    }
}

/// Aggregate of every hint observed during a session.
#[derive(Debug, Clone, Default)]
pub struct SceneDigest {
    moods: HashMap<String, usize>,
    scenes: HashMap<String, usize>,
    confidence_sum: f32,
    count: usize,
    fallbacks: usize,
}

impl SceneDigest {
    pub fn record(&mut self, hint: &SceneHint) {
        if !hint.mood.is_empty() {
            *self.moods.entry(hint.mood.clone()).or_default() += 1;
        }
        if !hint.scene_type.is_empty() {
            *self.scenes.entry(hint.scene_type.clone()).or_default() += 1;
        }
        self.confidence_sum += hint.confidence;
        self.count += 1;
        if hint.is_fallback {
            self.fallbacks += 1;
        }
    }

    /// Returns how many hints were recorded.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Returns how many recorded hints were fallbacks.
    pub fn fallbacks(&self) -> usize {
        self.fallbacks
    }

    /// Returns the most frequent mood.
    pub fn dominant_mood(&self) -> Option<&str> {
        dominant(&self.moods)
    }

    /// Returns the most frequent scene type.
    pub fn dominant_scene(&self) -> Option<&str> {
        dominant(&self.scenes)
    }

    /// Returns the average confidence, or `None` before the first hint.
    pub fn mean_confidence(&self) -> Option<f32> {
        (self.count > 0).then(|| self.confidence_sum / self.count as f32)
    }

    /// Forgets every recorded hint.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

// Ties resolve alphabetically so the result does not depend on hash order.
fn dominant(counts: &HashMap<String, usize>) -> Option<&str> {
    counts
        .iter()
        .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(label, _)| label.as_str())
}
