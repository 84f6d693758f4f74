use crate::{MotionAudioError, Result};

/// Fraction of the peak an envelope has decayed to at its end time.
pub const SILENCE_RATIO: f32 = 0.001;

/// Shortest attack accepted, anything faster is an audible click.
pub const MIN_ATTACK_SECS: f64 = 0.001;

/// Attack / hold / exponential release amplitude envelope.
///
/// The attack rises linearly from zero, the hold stays at `peak` and the
/// release decays exponentially to `peak * SILENCE_RATIO`, reached exactly at
/// [`Envelope::duration`]. Past that point the envelope is silent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Envelope {
    peak: f32,
    attack: f64,
    hold: f64,
    release: f64,
}

impl Envelope {
    pub fn new(peak: f32, attack: f64, hold: f64, release: f64) -> Result<Self> {
        if !peak.is_finite() || peak <= 0.0 || peak > 1.0 {
            return Err(MotionAudioError::invalid_input(format!(
                "envelope peak {peak} outside (0, 1]"
            )));
        }
        if !(attack.is_finite() && hold.is_finite() && release.is_finite()) {
            return Err(MotionAudioError::invalid_input("envelope times must be finite"));
        }
        if attack < MIN_ATTACK_SECS || hold < 0.0 || release <= 0.0 {
            return Err(MotionAudioError::invalid_input(format!(
                "envelope needs attack >= {MIN_ATTACK_SECS}s, hold >= 0 and release > 0"
            )));
        }

        Ok(Self {
            peak,
            attack,
            hold,
            release,
        })
    }

    /// Percussive shape without hold.
    pub fn percussive(peak: f32, attack: f64, release: f64) -> Result<Self> {
        Self::new(peak, attack, 0.0, release)
    }

    pub fn peak(&self) -> f32 {
        self.peak
    }

    pub fn duration(&self) -> f64 {
        self.attack + self.hold + self.release
    }

    /// Amplitude `t` seconds after the voice started.
    pub fn amplitude_at(&self, t: f64) -> f32 {
        if t < 0.0 || t >= self.duration() {
            return 0.0;
        }
        if t < self.attack {
            return self.peak * (t / self.attack) as f32;
        }
        let released = t - self.attack - self.hold;
        if released <= 0.0 {
            return self.peak;
        }
        self.peak * SILENCE_RATIO.powf((released / self.release) as f32)
    }

    pub fn scaled(&self, factor: f32) -> Result<Self> {
        Self::new(
            (self.peak * factor).clamp(f32::MIN_POSITIVE, 1.0),
            self.attack,
            self.hold,
            self.release,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reaches_silence_by_end() {
        let envelope = Envelope::percussive(0.4, 0.001, 0.029).unwrap();
        let end = envelope.duration();

        assert_eq!(envelope.amplitude_at(0.0), 0.0);
        assert!((envelope.amplitude_at(0.001) - 0.4).abs() < 1e-6);
        assert!(envelope.amplitude_at(end - 1e-9) <= 0.4 * SILENCE_RATIO * 1.01);
        assert_eq!(envelope.amplitude_at(end), 0.0);
    }

    #[test]
    fn never_jumps_between_samples() {
        let envelope = Envelope::new(0.3, 0.01, 0.02, 0.04).unwrap();
        let step = 1.0 / 48_000.0;
        let mut previous = 0.0_f32;
        let mut t = 0.0;
        while t < envelope.duration() + 0.01 {
            let value = envelope.amplitude_at(t);
            // Steepest part is the start of the release, ~0.001 per sample.
            assert!((value - previous).abs() < 0.002);
            previous = value;
            t += step;
        }
    }

    #[test]
    fn rejects_instant_attack() {
        assert!(Envelope::percussive(0.4, 0.0, 0.03).is_err());
        assert!(Envelope::percussive(0.0, 0.01, 0.03).is_err());
        assert!(Envelope::percussive(0.5, 0.01, 0.0).is_err());
    }
}
