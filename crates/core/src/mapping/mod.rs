mod directive;

pub use directive::{
    AudioDirective, FootstepCadence, MasterLevel, RainDensity, TempoChange, Trigger, TriggerKind,
};

use serde::{Deserialize, Serialize};

use crate::{config::MappingConfig, MotionClass, MotionSample, MotionSummary, Result, SceneHint};

const LOCOMOTION_WORDS: &[&str] = &["walking", "running", "stepping"];
const GESTURE_WORDS: &[&str] = &["waving", "pointing", "gesturing"];
const CLAP_WORDS: &[&str] = &["clapping"];

const MIN_STEP_INTERVAL_MS: f64 = 150.0;
const MAX_STEP_INTERVAL_MS: f64 = 1400.0;

/// Volume and energy assigned to a motion class.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassLevels {
    pub volume: f32,
    pub energy: f32,
}

impl ClassLevels {
    pub fn for_class(class: MotionClass) -> Self {
        let (volume, energy) = match class {
            MotionClass::Static => (0.0, 0.0),
            MotionClass::Minimal => (0.3, 0.2),
            MotionClass::Moderate => (0.5, 0.5),
            MotionClass::Active => (0.7, 0.7),
            MotionClass::Intense => (0.9, 0.9),
        };
        Self { volume, energy }
    }
}

/// Why the mapper is being consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Evaluation {
    /// First evaluation when generation starts.
    Initial,
    /// Re-evaluation on a tracking tick.
    Periodic,
}

/// Everything the mapper reads on one evaluation.
#[derive(Debug, Clone, Copy)]
pub struct MappingInput<'a> {
    pub sample: &'a MotionSample,
    pub summary: &'a MotionSummary,
    pub hint: Option<&'a SceneHint>,
    /// The hint has not been seen by a previous evaluation. One-shot triggers
    /// derived from it only fire when this is set.
    pub fresh_hint: bool,
    pub evaluation: Evaluation,
}

/// Turns motion summaries and scene hints into [`AudioDirective`]s.
#[derive(Debug, Clone)]
pub struct AudioParameterMapper {
    config: MappingConfig,
    current_tempo: f32,
}

impl Default for AudioParameterMapper {
    fn default() -> Self {
        Self::new(MappingConfig::default())
    }
}

impl AudioParameterMapper {
    pub fn new(config: MappingConfig) -> Self {
        let current_tempo = config.initial_tempo;
        Self {
            config,
            current_tempo,
        }
    }

    pub fn current_tempo(&self) -> f32 {
        self.current_tempo
    }

    pub fn reset(&mut self) {
        self.current_tempo = self.config.initial_tempo;
    }

    pub fn evaluate(&mut self, input: MappingInput<'_>) -> Result<AudioDirective> {
        let levels = ClassLevels::for_class(input.sample.classification);
        let mut master = MasterLevel::Set {
            value: levels.volume,
        };
        let mut tempo_change = None;

        if input.evaluation == Evaluation::Periodic {
            let suggested = input.summary.suggested_tempo;
            if (self.current_tempo - suggested).abs() > self.config.tempo_hysteresis_bpm {
                tempo_change = Some(TempoChange {
                    from: self.current_tempo,
                    to: suggested,
                });
                tracing::debug!(from = self.current_tempo, to = suggested, "tempo retuned");
                self.current_tempo = suggested;
            }

            master = MasterLevel::Ramp {
                target: (input.summary.suggested_volume * 0.5).clamp(0.0, 1.0),
                duration_secs: self.config.volume_ramp_secs,
            };
        }

        let mut triggers = Vec::new();
        let hint = input
            .hint
            .filter(|hint| hint.is_confident(self.config.confidence_floor));

        if input.hint.is_some() && hint.is_none() {
            tracing::debug!("scene hint below confidence floor, motion-only directive");
        }

        if let Some(hint) = hint {
            self.scene_triggers(hint, input.fresh_hint, &mut triggers);
        }

        if input.sample.classification == MotionClass::Intense
            && input.sample.intensity > self.config.motion_impact_threshold
            && !triggers.iter().any(|t| t.kind() == TriggerKind::Impact)
        {
            triggers.push(Trigger::Impact {
                strength: levels.energy,
            });
        }

        let pan = input.sample.vector.x;
        if pan.abs() > self.config.pan_dead_zone {
            triggers.push(Trigger::SpatialPan {
                pan: pan.clamp(-1.0, 1.0),
            });
        }

        AudioDirective::new(
            master,
            self.current_tempo,
            levels.energy,
            triggers,
            tempo_change,
        )
    }

    /// Triggers in priority order: footsteps, gesture, clap, rain, impact.
    fn scene_triggers(&self, hint: &SceneHint, fresh: bool, triggers: &mut Vec<Trigger>) {
        let motion = hint.motion_analysis.as_ref();

        if let Some(motion) = motion {
            if motion.primary_action_mentions(LOCOMOTION_WORDS) {
                triggers.push(Trigger::Footsteps(
                    self.footstep_cadence(motion.movement_intensity),
                ));
            }
            if fresh && motion.gesture_mentions(GESTURE_WORDS) {
                triggers.push(Trigger::GestureSwoosh);
            }
            if fresh && motion.gesture_mentions(CLAP_WORDS) {
                triggers.push(Trigger::Clap);
            }
        }

        if hint.scene_type.eq_ignore_ascii_case("nature") || hint.has_key_object("rain") {
            triggers.push(Trigger::Rain(RainDensity::default()));
        }

        if let Some(motion) = motion {
            if fresh && motion.has_collision() {
                triggers.push(Trigger::Impact { strength: 1.0 });
            }
        }
    }

    /// Base cadence from movement intensity, scaled by how far the tempo has
    /// moved from the initial one.
    fn footstep_cadence(&self, movement_intensity: f32) -> FootstepCadence {
        let intensity = if movement_intensity.is_finite() {
            movement_intensity.clamp(0.0, 1.0)
        } else {
            0.5
        };
        let base_ms = if intensity > 0.7 {
            300.0
        } else if intensity < 0.3 {
            700.0
        } else {
            500.0
        };

        let interval_ms = (base_ms * f64::from(self.config.initial_tempo)
            / f64::from(self.current_tempo.max(1.0)))
        .clamp(MIN_STEP_INTERVAL_MS, MAX_STEP_INTERVAL_MS);

        FootstepCadence {
            interval_ms,
            jitter_ms: self.config.footstep_jitter_ms.min(interval_ms * 0.5),
            intensity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{hint::MotionAnalysis, Direction, MotionPattern, MotionVector};

    fn sample(intensity: f32, x: f32) -> MotionSample {
        MotionSample::from_intensity(
            1.0,
            intensity,
            MotionVector {
                x,
                y: 0.0,
                magnitude: x.abs(),
            },
        )
    }

    fn summary(average: f32) -> MotionSummary {
        MotionSummary {
            average_intensity: average,
            max_intensity: average,
            pattern: MotionPattern::Steady,
            dominant_direction: Direction::default(),
            history_len: 5,
            suggested_tempo: crate::motion::intensity_to_tempo(average),
            suggested_volume: (average * 2.0).min(1.0),
        }
    }

    fn hint(action: &str, intensity: f32, confidence: f32) -> SceneHint {
        SceneHint {
            mood: "energetic".to_string(),
            scene_type: "nature".to_string(),
            key_objects: vec![],
            motion_analysis: Some(MotionAnalysis {
                primary_action: Some(action.to_string()),
                movement_intensity: intensity,
                gesture_detected: serde_json::json!("waving and clapping"),
                collision_events: serde_json::json!(true),
                ..Default::default()
            }),
            confidence,
            is_fallback: false,
        }
    }

    fn evaluate(
        mapper: &mut AudioParameterMapper,
        sample: &MotionSample,
        summary: &MotionSummary,
        hint: Option<&SceneHint>,
        evaluation: Evaluation,
    ) -> AudioDirective {
        mapper
            .evaluate(MappingInput {
                sample,
                summary,
                hint,
                fresh_hint: true,
                evaluation,
            })
            .unwrap()
    }

    #[test]
    fn class_table_sets_initial_volume() {
        let mut mapper = AudioParameterMapper::default();
        let directive = evaluate(
            &mut mapper,
            &sample(0.1, 0.0),
            &summary(0.1),
            None,
            Evaluation::Initial,
        );

        assert_eq!(directive.master(), MasterLevel::Set { value: 0.5 });
        assert_eq!(directive.energy(), 0.5);
        assert_eq!(directive.tempo(), 100.0);
        assert!(directive.triggers().is_empty());
    }

    #[test]
    fn confident_hint_fires_rules_in_priority_order() {
        let mut mapper = AudioParameterMapper::default();
        let scene = hint("walking to the car", 0.5, 0.9);
        let directive = evaluate(
            &mut mapper,
            &sample(0.1, 0.5),
            &summary(0.1),
            Some(&scene),
            Evaluation::Initial,
        );

        let kinds: Vec<TriggerKind> = directive.triggers().iter().map(Trigger::kind).collect();
        assert_eq!(
            kinds,
            vec![
                TriggerKind::Footsteps,
                TriggerKind::GestureSwoosh,
                TriggerKind::Clap,
                TriggerKind::Rain,
                TriggerKind::Impact,
                TriggerKind::SpatialPan,
            ]
        );
        assert_eq!(directive.footsteps().unwrap().interval_ms, 500.0);
        assert_eq!(directive.pan(), Some(0.5));
    }

    #[test]
    fn low_confidence_hint_is_ignored() {
        let mut mapper = AudioParameterMapper::default();
        let scene = hint("running", 0.9, 0.3);
        let directive = evaluate(
            &mut mapper,
            &sample(0.1, 0.0),
            &summary(0.1),
            Some(&scene),
            Evaluation::Initial,
        );

        assert!(directive.triggers().is_empty());
        assert_eq!(directive.volume(), 0.5);
    }

    #[test]
    fn stale_hint_keeps_loops_but_not_one_shots() {
        let mut mapper = AudioParameterMapper::default();
        let scene = hint("running", 0.9, 0.9);
        let directive = mapper
            .evaluate(MappingInput {
                sample: &sample(0.1, 0.0),
                summary: &summary(0.1),
                hint: Some(&scene),
                fresh_hint: false,
                evaluation: Evaluation::Periodic,
            })
            .unwrap();

        let kinds: Vec<TriggerKind> = directive.triggers().iter().map(Trigger::kind).collect();
        assert_eq!(kinds, vec![TriggerKind::Footsteps, TriggerKind::Rain]);
    }

    #[test]
    fn footstep_cadence_follows_movement_intensity() {
        let mut mapper = AudioParameterMapper::default();
        let cadence = |mapper: &mut AudioParameterMapper, intensity: f32| {
            evaluate(
                mapper,
                &sample(0.1, 0.0),
                &summary(0.1),
                Some(&hint("running", intensity, 0.8)),
                Evaluation::Initial,
            )
            .footsteps()
            .unwrap()
        };

        let running = cadence(&mut mapper, 0.9);
        assert_eq!(running.interval_ms, 300.0);
        assert_eq!(running.jitter_ms, 50.0);
        assert_eq!(cadence(&mut mapper, 0.2).interval_ms, 700.0);
        assert_eq!(cadence(&mut mapper, 0.7).interval_ms, 500.0);
        assert_eq!(cadence(&mut mapper, 0.3).interval_ms, 500.0);
    }

    #[test]
    fn periodic_evaluation_retunes_past_hysteresis() {
        let mut mapper = AudioParameterMapper::default();

        // Suggested 108 BPM is within 10 of 100: no change.
        let directive = evaluate(
            &mut mapper,
            &sample(0.4, 0.0),
            &summary(0.4),
            None,
            Evaluation::Periodic,
        );
        assert!(directive.tempo_change().is_none());
        assert_eq!(directive.tempo(), 100.0);
        assert_eq!(
            directive.master(),
            MasterLevel::Ramp {
                target: 0.4,
                duration_secs: 0.1
            }
        );

        // Suggested 150 BPM.
        let directive = evaluate(
            &mut mapper,
            &sample(0.75, 0.0),
            &summary(0.75),
            Some(&hint("running", 0.9, 0.9)),
            Evaluation::Periodic,
        );
        assert_eq!(
            directive.tempo_change(),
            Some(TempoChange {
                from: 100.0,
                to: 150.0
            })
        );
        assert_eq!(mapper.current_tempo(), 150.0);
        assert_eq!(directive.footsteps().unwrap().interval_ms, 200.0);
    }

    #[test]
    fn initial_evaluation_never_retunes() {
        let mut mapper = AudioParameterMapper::default();
        let directive = evaluate(
            &mut mapper,
            &sample(1.0, 0.0),
            &summary(1.0),
            None,
            Evaluation::Initial,
        );
        assert_eq!(directive.tempo(), 100.0);
        assert!(directive.tempo_change().is_none());
    }

    #[test]
    fn intense_motion_fires_impact_without_hint() {
        let mut mapper = AudioParameterMapper::default();
        let directive = evaluate(
            &mut mapper,
            &sample(0.5, 0.0),
            &summary(0.5),
            None,
            Evaluation::Periodic,
        );
        assert_eq!(
            directive.trigger(TriggerKind::Impact),
            Some(&Trigger::Impact { strength: 0.9 })
        );
    }

    #[test]
    fn pan_dead_zone_and_clamp() {
        let mut mapper = AudioParameterMapper::default();
        let centred = evaluate(
            &mut mapper,
            &sample(0.1, 0.1),
            &summary(0.1),
            None,
            Evaluation::Initial,
        );
        assert!(centred.pan().is_none());

        let left = evaluate(
            &mut mapper,
            &sample(0.1, -0.8),
            &summary(0.1),
            None,
            Evaluation::Initial,
        );
        assert_eq!(left.pan(), Some(-0.8));
    }
}
