use serde::{Deserialize, Serialize};

use super::{
    dsp::{equal_power_pan, Compressor},
    reverb::{Reverb, REVERB_SEND},
    voice::{SoundKind, Voice, VoiceRenderer},
};
use crate::Result;

/// Pan moves are smoothed over this long to avoid zipper noise.
const PAN_SMOOTHING_SECS: f64 = 0.01;

/// Identifier of a voice handed to the mixer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VoiceId(pub u64);

/// Read-only view of a voice still known to the mixer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScheduledVoice {
    pub id: VoiceId,
    pub kind: SoundKind,
    pub start: f64,
    pub end: f64,
}

/// Automatable parameter with set and linear-ramp events.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Param {
    value: f32,
    ramp: Option<Ramp>,
}

#[derive(Debug, Clone, Copy)]
struct Ramp {
    start_time: f64,
    start_value: f32,
    end_time: f64,
    target: f32,
}

impl Param {
    fn new(value: f32) -> Self {
        Self { value, ramp: None }
    }

    pub(crate) fn value_at(&self, time: f64) -> f32 {
        match self.ramp {
            Some(ramp) if time < ramp.end_time => {
                if time <= ramp.start_time {
                    return ramp.start_value;
                }
                let progress = (time - ramp.start_time) / (ramp.end_time - ramp.start_time);
                ramp.start_value + (ramp.target - ramp.start_value) * progress as f32
            }
            Some(ramp) => ramp.target,
            None => self.value,
        }
    }

    fn set(&mut self, value: f32) {
        self.value = value;
        self.ramp = None;
    }

    /// Linear ramp from wherever the parameter is at `now` to `target`.
    fn ramp_to(&mut self, target: f32, now: f64, end_time: f64) {
        if end_time <= now {
            self.set(target);
            return;
        }
        let start_value = self.value_at(now);
        self.value = target;
        self.ramp = Some(Ramp {
            start_time: now,
            start_value,
            end_time,
            target,
        });
    }

    fn target(&self) -> f32 {
        self.ramp.map(|ramp| ramp.target).unwrap_or(self.value)
    }
}

struct MixerVoice {
    id: VoiceId,
    kind: SoundKind,
    renderer: VoiceRenderer,
}

/// Software mix bus: voices, master gain, then a compressed dry path and a
/// reverb send summed ahead of the pan.
pub(crate) struct Mixer {
    sample_rate: u32,
    rendered_frames: u64,
    voices: Vec<MixerVoice>,
    next_id: u64,
    master: Param,
    pan: Param,
    compressor: Compressor,
    reverb: Reverb,
}

/// One rendered block. `mono` is the dry compressed signal the analyser sees.
pub(crate) struct Block {
    pub interleaved: Vec<f32>,
    pub mono: Vec<f32>,
}

impl Mixer {
    pub(crate) fn new(sample_rate: u32, initial_gain: f32, seed: u64) -> Result<Self> {
        Ok(Self {
            sample_rate,
            rendered_frames: 0,
            voices: Vec::new(),
            next_id: 0,
            master: Param::new(initial_gain),
            pan: Param::new(0.0),
            compressor: Compressor::master_bus(sample_rate),
            reverb: Reverb::room(sample_rate, seed)?,
        })
    }

    pub(crate) fn now(&self) -> f64 {
        self.rendered_frames as f64 / self.sample_rate as f64
    }

    pub(crate) fn add(&mut self, voice: &Voice) -> VoiceId {
        let id = VoiceId(self.next_id);
        self.next_id += 1;
        self.voices.push(MixerVoice {
            id,
            kind: voice.kind,
            renderer: VoiceRenderer::new(voice, self.sample_rate),
        });
        id
    }

    /// Removes a voice that has not started yet. Started voices always play
    /// out their envelope.
    pub(crate) fn cancel_pending(&mut self, id: VoiceId) -> bool {
        let now = self.now();
        let before = self.voices.len();
        self.voices
            .retain(|voice| !(voice.id == id && voice.renderer.start() > now));
        self.voices.len() != before
    }

    pub(crate) fn voices(&self) -> Vec<ScheduledVoice> {
        self.voices
            .iter()
            .map(|voice| ScheduledVoice {
                id: voice.id,
                kind: voice.kind,
                start: voice.renderer.start(),
                end: voice.renderer.end(),
            })
            .collect()
    }

    pub(crate) fn set_master(&mut self, value: f32) {
        self.master.set(value);
    }

    pub(crate) fn ramp_master(&mut self, target: f32, duration: f64) {
        let now = self.now();
        self.master.ramp_to(target, now, now + duration);
    }

    pub(crate) fn master_at(&self, time: f64) -> f32 {
        self.master.value_at(time)
    }

    pub(crate) fn master_target(&self) -> f32 {
        self.master.target()
    }

    pub(crate) fn set_pan(&mut self, pan: f32) {
        let now = self.now();
        self.pan.ramp_to(pan.clamp(-1.0, 1.0), now, now + PAN_SMOOTHING_SECS);
    }

    pub(crate) fn pan_target(&self) -> f32 {
        self.pan.target()
    }

    pub(crate) fn render(&mut self, frames: usize) -> Result<Block> {
        let mut interleaved = Vec::with_capacity(frames * 2);
        let mut mono = Vec::with_capacity(frames);
        let sample_rate = self.sample_rate as f64;

        for offset in 0..frames {
            let time = (self.rendered_frames + offset as u64) as f64 / sample_rate;
            let mut sample = 0.0;
            for voice in &mut self.voices {
                sample += voice.renderer.next_sample(time);
            }

            sample *= self.master.value_at(time);
            let wet = self.reverb.process(sample * REVERB_SEND)?;
            sample *= self.compressor.gain_for(sample);

            let mixed = sample + wet;
            let (left, right) = equal_power_pan(self.pan.value_at(time));
            interleaved.push(mixed * left);
            interleaved.push(mixed * right);
            mono.push(sample);
        }

        self.rendered_frames += frames as u64;
        let now = self.now();
        self.voices.retain(|voice| voice.renderer.end() > now);

        Ok(Block { interleaved, mono })
    }
}
