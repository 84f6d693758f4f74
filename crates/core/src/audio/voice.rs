use std::f32::consts::TAU;

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::{
    dsp::{exp_sweep, Biquad, FilterMode},
    envelope::Envelope,
};
use crate::Result;

/// What a scheduled voice represents, for logging and inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SoundKind {
    Footstep,
    GestureSwoosh,
    Clap,
    RainDrop,
    Impact,
}

/// Raw signal generator of a layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Oscillator {
    /// Uniform white noise.
    Noise,
    /// Sine, optionally gliding exponentially to `end_hz` over the layer.
    Sine { start_hz: f32, end_hz: Option<f32> },
}

/// Filter applied to a layer, optionally sweeping its cutoff.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterSpec {
    pub mode: FilterMode,
    pub cutoff_hz: f32,
    pub end_cutoff_hz: Option<f32>,
    pub q: f32,
}

impl FilterSpec {
    pub fn fixed(mode: FilterMode, cutoff_hz: f32, q: f32) -> Self {
        Self {
            mode,
            cutoff_hz,
            end_cutoff_hz: None,
            q,
        }
    }
}

/// One enveloped generator inside a voice.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Layer {
    pub oscillator: Oscillator,
    pub filter: Option<FilterSpec>,
    pub envelope: Envelope,
}

/// A discrete, independently enveloped sound placed on the output timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Voice {
    pub kind: SoundKind,
    /// Output clock time in seconds.
    pub start: f64,
    pub layers: Vec<Layer>,
    pub seed: u64,
}

impl Voice {
    pub fn duration(&self) -> f64 {
        self.layers
            .iter()
            .map(|layer| layer.envelope.duration())
            .fold(0.0, f64::max)
    }

    pub fn end(&self) -> f64 {
        self.start + self.duration()
    }

    /// Low-passed noise thump. `intensity` is the movement intensity.
    pub fn footstep(start: f64, intensity: f32, rng: &mut StdRng) -> Result<Self> {
        let peak = (intensity.clamp(0.0, 1.0) * 0.3).max(0.02);
        Ok(Self {
            kind: SoundKind::Footstep,
            start,
            layers: vec![Layer {
                oscillator: Oscillator::Noise,
                filter: Some(FilterSpec::fixed(
                    FilterMode::Lowpass,
                    200.0 + rng.gen_range(0.0..100.0),
                    2.0,
                )),
                envelope: Envelope::percussive(peak, 0.01, 0.04)?,
            }],
            seed: rng.gen(),
        })
    }

    /// Band-passed noise sweeping upwards.
    pub fn gesture_swoosh(start: f64, velocity: f32, rng: &mut StdRng) -> Result<Self> {
        Ok(Self {
            kind: SoundKind::GestureSwoosh,
            start,
            layers: vec![Layer {
                oscillator: Oscillator::Noise,
                filter: Some(FilterSpec {
                    mode: FilterMode::Bandpass,
                    cutoff_hz: 600.0,
                    end_cutoff_hz: Some(1200.0),
                    q: 5.0,
                }),
                envelope: Envelope::percussive(0.2, 0.02, 0.18)?.scaled(velocity)?,
            }],
            seed: rng.gen(),
        })
    }

    /// Short high-passed noise burst.
    pub fn clap(start: f64, velocity: f32, rng: &mut StdRng) -> Result<Self> {
        Ok(Self {
            kind: SoundKind::Clap,
            start,
            layers: vec![Layer {
                oscillator: Oscillator::Noise,
                filter: Some(FilterSpec::fixed(FilterMode::Highpass, 2000.0, 1.0)),
                envelope: Envelope::percussive(0.4, 0.001, 0.029)?.scaled(velocity)?,
            }],
            seed: rng.gen(),
        })
    }

    /// Single high sine blip, one of several per rain burst.
    pub fn rain_drop(start: f64, rng: &mut StdRng) -> Result<Self> {
        Ok(Self {
            kind: SoundKind::RainDrop,
            start,
            layers: vec![Layer {
                oscillator: Oscillator::Sine {
                    start_hz: 4000.0 + rng.gen_range(0.0..2000.0),
                    end_hz: None,
                },
                filter: Some(FilterSpec::fixed(FilterMode::Highpass, 3000.0, 0.707)),
                envelope: Envelope::percussive(0.02, 0.001, 0.009)?,
            }],
            seed: rng.gen(),
        })
    }

    /// Low sine thud with a layer of low-passed noise.
    pub fn impact(start: f64, strength: f32, rng: &mut StdRng) -> Result<Self> {
        let velocity = strength.clamp(0.1, 1.0);
        Ok(Self {
            kind: SoundKind::Impact,
            start,
            layers: vec![
                Layer {
                    oscillator: Oscillator::Sine {
                        start_hz: 80.0,
                        end_hz: Some(50.0),
                    },
                    filter: None,
                    envelope: Envelope::percussive(0.5, 0.002, 0.098)?.scaled(velocity)?,
                },
                Layer {
                    oscillator: Oscillator::Noise,
                    filter: Some(FilterSpec::fixed(FilterMode::Lowpass, 200.0, 0.707)),
                    envelope: Envelope::percussive(0.2, 0.002, 0.048)?.scaled(velocity)?,
                },
            ],
            seed: rng.gen(),
        })
    }
}

/// Per-voice synthesis state used by the mixer.
pub(crate) struct VoiceRenderer {
    layers: Vec<LayerState>,
    start: f64,
    end: f64,
    sample_rate: u32,
}

struct LayerState {
    layer: Layer,
    filter: Option<Biquad>,
    rng: StdRng,
    phase: f32,
}

impl VoiceRenderer {
    pub(crate) fn new(voice: &Voice, sample_rate: u32) -> Self {
        let layers = voice
            .layers
            .iter()
            .enumerate()
            .map(|(index, layer)| LayerState {
                layer: *layer,
                filter: layer
                    .filter
                    .map(|spec| Biquad::new(spec.mode, spec.cutoff_hz, spec.q, sample_rate)),
                rng: StdRng::seed_from_u64(voice.seed.wrapping_add(index as u64)),
                phase: 0.0,
            })
            .collect();

        Self {
            layers,
            start: voice.start,
            end: voice.end(),
            sample_rate,
        }
    }

    pub(crate) fn start(&self) -> f64 {
        self.start
    }

    pub(crate) fn end(&self) -> f64 {
        self.end
    }

    /// Mono sample at absolute output time `time`.
    pub(crate) fn next_sample(&mut self, time: f64) -> f32 {
        let t = time - self.start;
        if t < 0.0 {
            return 0.0;
        }

        let sample_rate = self.sample_rate;
        let mut mix = 0.0;
        for state in &mut self.layers {
            let envelope = state.layer.envelope;
            let amplitude = envelope.amplitude_at(t);
            if amplitude == 0.0 {
                continue;
            }
            let progress = (t / envelope.duration()) as f32;

            let raw = match state.layer.oscillator {
                Oscillator::Noise => state.rng.gen_range(-1.0..1.0),
                Oscillator::Sine { start_hz, end_hz } => {
                    let freq = end_hz
                        .map(|end| exp_sweep(start_hz, end, progress))
                        .unwrap_or(start_hz);
                    let value = state.phase.sin();
                    state.phase = (state.phase + TAU * freq / sample_rate as f32) % TAU;
                    value
                }
            };

            let filtered = match (state.filter.as_mut(), state.layer.filter) {
                (Some(filter), Some(spec)) => {
                    if let Some(end_cutoff) = spec.end_cutoff_hz {
                        let cutoff = exp_sweep(spec.cutoff_hz, end_cutoff, progress);
                        filter.set(spec.mode, cutoff, spec.q, sample_rate);
                    }
                    filter.process(raw)
                }
                _ => raw,
            };

            mix += filtered * amplitude;
        }
        mix
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    #[test]
    fn recipes_have_expected_lengths() {
        let mut rng = rng();
        assert!((Voice::footstep(0.0, 0.5, &mut rng).unwrap().duration() - 0.05).abs() < 1e-9);
        assert!((Voice::gesture_swoosh(0.0, 1.0, &mut rng).unwrap().duration() - 0.2).abs() < 1e-9);
        assert!((Voice::clap(0.0, 1.0, &mut rng).unwrap().duration() - 0.03).abs() < 1e-9);
        assert!((Voice::rain_drop(0.0, &mut rng).unwrap().duration() - 0.01).abs() < 1e-9);
        assert!((Voice::impact(1.0, 1.0, &mut rng).unwrap().end() - 1.1).abs() < 1e-9);
    }

    #[test]
    fn footstep_loudness_tracks_intensity() {
        let mut rng = rng();
        let soft = Voice::footstep(0.0, 0.2, &mut rng).unwrap();
        let hard = Voice::footstep(0.0, 0.9, &mut rng).unwrap();
        assert!(soft.layers[0].envelope.peak() < hard.layers[0].envelope.peak());
        assert!((hard.layers[0].envelope.peak() - 0.27).abs() < 1e-6);
    }

    #[test]
    fn renderer_is_silent_outside_the_voice() {
        let mut rng = rng();
        let voice = Voice::impact(0.5, 1.0, &mut rng).unwrap();
        let mut renderer = VoiceRenderer::new(&voice, 48_000);

        assert_eq!(renderer.next_sample(0.25), 0.0);
        assert_eq!(renderer.next_sample(voice.end() + 0.001), 0.0);

        let mut energy = 0.0;
        let mut time = voice.start;
        while time < voice.end() {
            energy += renderer.next_sample(time).abs();
            time += 1.0 / 48_000.0;
        }
        assert!(energy > 0.0);
    }
}
