use serde::{Deserialize, Serialize};

use crate::{MotionAudioError, Result};

/// Identity of a trigger, used for de-duplication and ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Footsteps,
    GestureSwoosh,
    Clap,
    Rain,
    Impact,
    SpatialPan,
}

impl TriggerKind {
    pub fn is_continuous(&self) -> bool {
        matches!(self, Self::Footsteps | Self::Rain)
    }

    pub fn is_one_shot(&self) -> bool {
        matches!(self, Self::GestureSwoosh | Self::Clap | Self::Impact)
    }
}

/// Step cadence for the footstep loop.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FootstepCadence {
    pub interval_ms: f64,
    /// Each occurrence lands within `±jitter_ms` of the nominal interval.
    pub jitter_ms: f64,
    /// Movement intensity in `[0, 1]`, drives step loudness.
    pub intensity: f32,
}

/// Density of the rain loop.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RainDensity {
    pub burst_interval_ms: f64,
    pub drops_per_burst: u32,
}

impl Default for RainDensity {
    fn default() -> Self {
        Self {
            burst_interval_ms: 100.0,
            drops_per_burst: 5,
        }
    }
}

/// One requested sound behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Trigger {
    Footsteps(FootstepCadence),
    GestureSwoosh,
    Clap,
    Rain(RainDensity),
    Impact { strength: f32 },
    SpatialPan { pan: f32 },
}

impl Trigger {
    pub fn kind(&self) -> TriggerKind {
        match self {
            Self::Footsteps(_) => TriggerKind::Footsteps,
            Self::GestureSwoosh => TriggerKind::GestureSwoosh,
            Self::Clap => TriggerKind::Clap,
            Self::Rain(_) => TriggerKind::Rain,
            Self::Impact { .. } => TriggerKind::Impact,
            Self::SpatialPan { .. } => TriggerKind::SpatialPan,
        }
    }

    fn validate(&self) -> Result<()> {
        match *self {
            Self::Footsteps(cadence) => {
                ensure_finite("footstep interval", cadence.interval_ms)?;
                ensure_finite("footstep jitter", cadence.jitter_ms)?;
                if cadence.interval_ms <= 0.0 {
                    return Err(invalid("footstep interval must be positive"));
                }
                if cadence.jitter_ms < 0.0 || cadence.jitter_ms >= cadence.interval_ms {
                    return Err(invalid("footstep jitter must be in [0, interval)"));
                }
                ensure_unit("footstep intensity", cadence.intensity)
            }
            Self::Rain(density) => {
                ensure_finite("rain burst interval", density.burst_interval_ms)?;
                if density.burst_interval_ms <= 0.0 || density.drops_per_burst == 0 {
                    return Err(invalid("rain density must be positive"));
                }
                Ok(())
            }
            Self::Impact { strength } => ensure_unit("impact strength", strength),
            Self::SpatialPan { pan } => {
                if !pan.is_finite() || !(-1.0..=1.0).contains(&pan) {
                    return Err(invalid(format!("pan {pan} outside [-1, 1]")));
                }
                Ok(())
            }
            Self::GestureSwoosh | Self::Clap => Ok(()),
        }
    }
}

/// How the master gain should reach its new value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum MasterLevel {
    Set { value: f32 },
    Ramp { target: f32, duration_secs: f64 },
}

impl MasterLevel {
    pub fn target(&self) -> f32 {
        match *self {
            Self::Set { value } => value,
            Self::Ramp { target, .. } => target,
        }
    }
}

/// Tempo retune reported to listeners.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TempoChange {
    pub from: f32,
    pub to: f32,
}

/// The mapper's decision for what the audio output should currently do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioDirective {
    master: MasterLevel,
    tempo: f32,
    energy: f32,
    triggers: Vec<Trigger>,
    tempo_change: Option<TempoChange>,
}

impl AudioDirective {
    /// Validates and builds a directive. Each trigger kind may appear once.
    pub fn new(
        master: MasterLevel,
        tempo: f32,
        energy: f32,
        triggers: Vec<Trigger>,
        tempo_change: Option<TempoChange>,
    ) -> Result<Self> {
        match master {
            MasterLevel::Set { value } => ensure_unit("master volume", value)?,
            MasterLevel::Ramp {
                target,
                duration_secs,
            } => {
                ensure_unit("master volume", target)?;
                ensure_finite("volume ramp", duration_secs)?;
                if duration_secs <= 0.0 {
                    return Err(invalid("volume ramp duration must be positive"));
                }
            }
        }

        if !tempo.is_finite() || tempo <= 0.0 {
            return Err(invalid(format!("tempo {tempo} must be positive")));
        }
        ensure_unit("energy", energy)?;

        let mut seen = Vec::with_capacity(triggers.len());
        for trigger in &triggers {
            trigger.validate()?;
            let kind = trigger.kind();
            if seen.contains(&kind) {
                return Err(invalid(format!("trigger {kind:?} requested twice")));
            }
            seen.push(kind);
        }

        Ok(Self {
            master,
            tempo,
            energy,
            triggers,
            tempo_change,
        })
    }

    /// Directive that fades everything to silence and requests nothing.
    pub fn silence(tempo: f32) -> Result<Self> {
        Self::new(MasterLevel::Set { value: 0.0 }, tempo, 0.0, Vec::new(), None)
    }

    /// Returns how the master gain should move.
    pub fn master(&self) -> MasterLevel {
        self.master
    }

    /// Returns the master gain this directive ends at.
    pub fn volume(&self) -> f32 {
        self.master.target()
    }

    /// Returns the tempo in BPM.
    pub fn tempo(&self) -> f32 {
        self.tempo
    }

    /// Returns the motion energy in `[0, 1]`.
    pub fn energy(&self) -> f32 {
        self.energy
    }

    /// Returns the requested triggers in evaluation order.
    pub fn triggers(&self) -> &[Trigger] {
        &self.triggers
    }

    /// Returns the tempo change this directive announces, if any.
    pub fn tempo_change(&self) -> Option<TempoChange> {
        self.tempo_change
    }

    /// Returns the first trigger of `kind`.
    pub fn trigger(&self, kind: TriggerKind) -> Option<&Trigger> {
        self.triggers.iter().find(|t| t.kind() == kind)
    }

    /// Returns the requested footstep cadence.
    pub fn footsteps(&self) -> Option<FootstepCadence> {
        self.triggers.iter().find_map(|t| match t {
            Trigger::Footsteps(cadence) => Some(*cadence),
            _ => None,
        })
    }

    /// Returns the requested rain density.
    pub fn rain(&self) -> Option<RainDensity> {
        self.triggers.iter().find_map(|t| match t {
            Trigger::Rain(density) => Some(*density),
            _ => None,
        })
    }

    /// Returns the requested stereo position.
    pub fn pan(&self) -> Option<f32> {
        self.triggers.iter().find_map(|t| match t {
            Trigger::SpatialPan { pan } => Some(*pan),
            _ => None,
        })
    }

    /// Returns `true` if a trigger of `kind` was requested.
    pub fn has_trigger(&self, kind: TriggerKind) -> bool {
        self.trigger(kind).is_some()
    }
}

fn invalid(msg: impl Into<String>) -> MotionAudioError {
    MotionAudioError::invalid_input(msg)
}

fn ensure_finite(label: &str, value: f64) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(invalid(format!("{label} must be finite")))
    }
}

fn ensure_unit(label: &str, value: f32) -> Result<()> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(invalid(format!("{label} {value} outside [0, 1]")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn steps(interval_ms: f64) -> Trigger {
        Trigger::Footsteps(FootstepCadence {
            interval_ms,
            jitter_ms: 50.0,
            intensity: 0.5,
        })
    }

    #[test]
    fn accepts_well_formed_directives() {
        let directive = AudioDirective::new(
            MasterLevel::Ramp {
                target: 0.4,
                duration_secs: 0.1,
            },
            120.0,
            0.5,
            vec![steps(500.0), Trigger::Clap, Trigger::SpatialPan { pan: -0.3 }],
            None,
        )
        .unwrap();

        assert_eq!(directive.volume(), 0.4);
        assert_eq!(directive.footsteps().unwrap().interval_ms, 500.0);
        assert_eq!(directive.pan(), Some(-0.3));
        assert!(directive.has_trigger(TriggerKind::Clap));
        assert!(directive.rain().is_none());
    }

    #[test]
    fn rejects_duplicate_triggers() {
        let err = AudioDirective::new(
            MasterLevel::Set { value: 0.5 },
            100.0,
            0.5,
            vec![steps(500.0), steps(300.0)],
            None,
        )
        .unwrap_err();
        assert!(matches!(err, MotionAudioError::InvalidInput(_)));
    }

    #[test]
    fn rejects_out_of_range_values() {
        let level = MasterLevel::Set { value: 0.5 };
        let loud = MasterLevel::Set { value: 1.5 };
        assert!(AudioDirective::new(loud, 100.0, 0.5, vec![], None).is_err());
        assert!(AudioDirective::new(level, f32::NAN, 0.5, vec![], None).is_err());
        assert!(AudioDirective::new(level, 100.0, 0.5, vec![steps(40.0)], None).is_err());
        assert!(
            AudioDirective::new(level, 100.0, 0.5, vec![Trigger::SpatialPan { pan: 1.2 }], None)
                .is_err()
        );
        assert!(AudioDirective::new(
            MasterLevel::Ramp {
                target: 0.5,
                duration_secs: 0.0
            },
            100.0,
            0.5,
            vec![],
            None
        )
        .is_err());
    }

    #[test]
    fn serializes_with_kind_tags() {
        let json = serde_json::to_value(Trigger::Impact { strength: 0.5 }).unwrap();
        assert_eq!(json["kind"], "impact");
        assert_eq!(json["strength"], 0.5);
    }
}
