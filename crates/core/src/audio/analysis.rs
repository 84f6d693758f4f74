use std::{
    collections::VecDeque,
    f32::consts::PI,
    fmt,
    sync::{Arc, Mutex, MutexGuard},
};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};
use serde::{Deserialize, Serialize};

use crate::{MotionAudioError, Result};

/// Spectrum snapshot of the most recent master output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisFrame {
    /// Output clock time of the newest analysed sample.
    pub time: f64,
    pub rms: f32,
    /// Normalised `[0, 1]` magnitude per FFT bin, DC first.
    pub magnitudes: Vec<f32>,
    /// Normalised `[0, 1]` spectral centroid, 1.0 is Nyquist.
    pub spectral_centroid: f32,
}

/// Keeps a window of the master mix and computes its spectrum on demand.
pub struct SpectrumAnalyser {
    sample_rate: u32,
    fft_size: usize,
    window: VecDeque<f32>,
    time: f64,
    fft_planner: RealFftPlanner<f32>,
    fft: Option<FftResources>,
}

impl SpectrumAnalyser {
    pub fn new(sample_rate: u32, fft_size: usize) -> Self {
        let fft_size = fft_size.max(2);
        Self {
            sample_rate,
            fft_size,
            window: VecDeque::from(vec![0.0; fft_size]),
            time: 0.0,
            fft_planner: RealFftPlanner::new(),
            fft: None,
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Appends mono samples that ended at output time `time`.
    pub fn push(&mut self, samples: &[f32], time: f64) {
        for sample in samples {
            if self.window.len() == self.fft_size {
                self.window.pop_front();
            }
            self.window.push_back(*sample);
        }
        self.time = time;
    }

    pub fn time_domain(&self) -> Vec<f32> {
        self.window.iter().copied().collect()
    }

    pub fn rms(&self) -> f32 {
        compute_rms(&self.time_domain())
    }

    pub fn analyse(&mut self) -> Result<AnalysisFrame> {
        let len = self.fft_size;
        let samples = self.time_domain();
        let fft = self.prepare_fft(len)?;

        for (index, value) in samples.iter().enumerate() {
            fft.input[index] = *value * hann_value(index, len);
        }

        fft.plan
            .process_with_scratch(&mut fft.input, &mut fft.spectrum, &mut fft.scratch)?;

        // A full-scale sine through a Hann window peaks at len / 4.
        let scale = 4.0 / len as f32;
        let magnitudes: Vec<f32> = fft
            .spectrum
            .iter()
            .map(|bin| (bin.norm() * scale).min(1.0))
            .collect();

        let mut magnitude_sum = 0.0;
        let mut weighted_sum = 0.0;
        let bins = magnitudes.len().max(2) - 1;
        for (i, magnitude) in magnitudes.iter().enumerate() {
            magnitude_sum += magnitude;
            weighted_sum += magnitude * (i as f32 / bins as f32);
        }

        let spectral_centroid = if magnitude_sum <= f32::EPSILON {
            0.0
        } else {
            (weighted_sum / magnitude_sum).clamp(0.0, 1.0)
        };

        Ok(AnalysisFrame {
            time: self.time,
            rms: compute_rms(&samples),
            magnitudes,
            spectral_centroid,
        })
    }

    /// Hz covered by one FFT bin.
    pub fn bin_hz(&self) -> f32 {
        self.sample_rate as f32 / self.fft_size as f32
    }

    fn prepare_fft(&mut self, size: usize) -> Result<&mut FftResources> {
        let rebuild = self
            .fft
            .as_ref()
            .map(|fft| fft.size != size)
            .unwrap_or(true);

        if rebuild {
            let plan = self.fft_planner.plan_fft_forward(size);
            let scratch = plan.make_scratch_vec();
            let spectrum = plan.make_output_vec();
            let input = plan.make_input_vec();
            self.fft = Some(FftResources {
                size,
                plan,
                scratch,
                spectrum,
                input,
            });
        }

        self.fft
            .as_mut()
            .ok_or_else(|| MotionAudioError::msg("fft resources missing after planning"))
    }
}

struct FftResources {
    size: usize,
    plan: Arc<dyn RealToComplex<f32>>,
    scratch: Vec<Complex32>,
    spectrum: Vec<Complex32>,
    input: Vec<f32>,
}

impl fmt::Debug for SpectrumAnalyser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectrumAnalyser")
            .field("sample_rate", &self.sample_rate)
            .field("fft_size", &self.fft_size)
            .field("time", &self.time)
            .finish()
    }
}

impl fmt::Debug for FftResources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FftResources")
            .field("size", &self.size)
            .finish()
    }
}

/// Shared, read-only view over the analyser owned by the output graph.
#[derive(Clone)]
pub struct AnalysisTap {
    shared: Arc<Mutex<SpectrumAnalyser>>,
}

impl AnalysisTap {
    pub(crate) fn new(analyser: SpectrumAnalyser) -> Self {
        Self {
            shared: Arc::new(Mutex::new(analyser)),
        }
    }

    pub(crate) fn push(&self, samples: &[f32], time: f64) -> Result<()> {
        self.lock()?.push(samples, time);
        Ok(())
    }

    /// Computes the spectrum of the most recent output window.
    pub fn snapshot(&self) -> Result<AnalysisFrame> {
        self.lock()?.analyse()
    }

    pub fn time_domain(&self) -> Result<Vec<f32>> {
        Ok(self.lock()?.time_domain())
    }

    pub fn rms(&self) -> Result<f32> {
        Ok(self.lock()?.rms())
    }

    fn lock(&self) -> Result<MutexGuard<'_, SpectrumAnalyser>> {
        self.shared
            .lock()
            .map_err(|_| MotionAudioError::msg("analysis tap has been poisoned"))
    }
}

impl fmt::Debug for AnalysisTap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisTap").finish()
    }
}

fn compute_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|sample| sample * sample).sum();
    (sum / samples.len() as f32).sqrt()
}

fn hann_value(index: usize, len: usize) -> f32 {
    if len <= 1 {
        return 1.0;
    }

    0.5 - 0.5 * ((2.0 * PI * index as f32) / (len as f32 - 1.0)).cos()
}
