use std::f32::consts::PI;

/// Response shape of a [`Biquad`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    Lowpass,
    Highpass,
    Bandpass,
}

/// Second order IIR section using the RBJ cookbook coefficients.
#[derive(Debug, Clone, Copy)]
pub struct Biquad {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

impl Biquad {
    pub fn new(mode: FilterMode, cutoff_hz: f32, q: f32, sample_rate: u32) -> Self {
        let mut filter = Self {
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
        };
        filter.set(mode, cutoff_hz, q, sample_rate);
        filter
    }

    /// Recomputes coefficients while keeping the delay line, so sweeps do not
    /// reset the filter state.
    pub fn set(&mut self, mode: FilterMode, cutoff_hz: f32, q: f32, sample_rate: u32) {
        let nyquist = sample_rate.max(2) as f32 * 0.5;
        let cutoff = cutoff_hz.clamp(10.0, nyquist * 0.99);
        let q = q.max(0.05);

        let omega = 2.0 * PI * cutoff / sample_rate.max(2) as f32;
        let (sin, cos) = omega.sin_cos();
        let alpha = sin / (2.0 * q);

        let (b0, b1, b2) = match mode {
            FilterMode::Lowpass => ((1.0 - cos) / 2.0, 1.0 - cos, (1.0 - cos) / 2.0),
            FilterMode::Highpass => ((1.0 + cos) / 2.0, -(1.0 + cos), (1.0 + cos) / 2.0),
            FilterMode::Bandpass => (alpha, 0.0, -alpha),
        };
        let a0 = 1.0 + alpha;

        self.b0 = b0 / a0;
        self.b1 = b1 / a0;
        self.b2 = b2 / a0;
        self.a1 = -2.0 * cos / a0;
        self.a2 = (1.0 - alpha) / a0;
    }

    pub fn process(&mut self, input: f32) -> f32 {
        let output = self.b0 * input + self.b1 * self.x1 + self.b2 * self.x2
            - self.a1 * self.y1
            - self.a2 * self.y2;

        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = output;

        output
    }
}

/// Exponential interpolation between two positive values, `progress` in
/// `[0, 1]`.
pub fn exp_sweep(from: f32, to: f32, progress: f32) -> f32 {
    let progress = progress.clamp(0.0, 1.0);
    if from <= 0.0 || to <= 0.0 {
        return from + (to - from) * progress;
    }
    from * (to / from).powf(progress)
}

/// Equal-power stereo gains for a pan position in `[-1, 1]`.
pub fn equal_power_pan(pan: f32) -> (f32, f32) {
    let angle = (pan.clamp(-1.0, 1.0) + 1.0) * PI / 4.0;
    (angle.cos(), angle.sin())
}

pub fn db_to_gain(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

pub fn gain_to_db(gain: f32) -> f32 {
    20.0 * gain.max(1e-9).log10()
}

/// Feed-forward compressor on the master bus with a soft knee.
#[derive(Debug, Clone)]
pub struct Compressor {
    threshold_db: f32,
    knee_db: f32,
    ratio: f32,
    attack_coeff: f32,
    release_coeff: f32,
    envelope_db: f32,
}

impl Compressor {
    pub fn new(
        threshold_db: f32,
        knee_db: f32,
        ratio: f32,
        attack_secs: f32,
        release_secs: f32,
        sample_rate: u32,
    ) -> Self {
        let sr = sample_rate.max(1) as f32;
        Self {
            threshold_db,
            knee_db: knee_db.max(0.0),
            ratio: ratio.max(1.0),
            attack_coeff: (-1.0 / (attack_secs.max(1e-4) * sr)).exp(),
            release_coeff: (-1.0 / (release_secs.max(1e-4) * sr)).exp(),
            envelope_db: -120.0,
        }
    }

    /// Settings of the master bus compressor.
    pub fn master_bus(sample_rate: u32) -> Self {
        Self::new(-24.0, 30.0, 12.0, 0.003, 0.25, sample_rate)
    }

    fn static_gain_db(&self, level_db: f32) -> f32 {
        let over = level_db - self.threshold_db;
        let half_knee = self.knee_db / 2.0;
        let slope = 1.0 / self.ratio - 1.0;

        if over <= -half_knee {
            0.0
        } else if over >= half_knee || self.knee_db == 0.0 {
            slope * over
        } else {
            slope * (over + half_knee).powi(2) / (2.0 * self.knee_db)
        }
    }

    /// Returns the gain to apply to a stereo frame whose peak is `level`.
    pub fn gain_for(&mut self, level: f32) -> f32 {
        let level_db = gain_to_db(level.abs());
        let coeff = if level_db > self.envelope_db {
            self.attack_coeff
        } else {
            self.release_coeff
        };
        self.envelope_db = coeff * self.envelope_db + (1.0 - coeff) * level_db;
        db_to_gain(self.static_gain_db(self.envelope_db))
    }
}
