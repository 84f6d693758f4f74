use std::{collections::VecDeque, fmt, sync::Arc};

use rand::{rngs::StdRng, Rng, SeedableRng};
use realfft::{num_complex::Complex32, ComplexToReal, RealFftPlanner, RealToComplex};

use crate::Result;

/// Level of the master signal sent into the reverb.
pub const REVERB_SEND: f32 = 0.2;

/// Length of the generated room impulse.
pub const ROOM_SECONDS: f64 = 2.0;

/// Partition length of the convolution. Also the reverb's latency in samples.
const PARTITION: usize = 256;

/// Decaying-noise impulse: white noise shaped by `(1 - t / len)^2`,
/// normalised to unit energy.
pub fn room_impulse(sample_rate: u32, seed: u64) -> Vec<f32> {
    let length = ((sample_rate as f64 * ROOM_SECONDS) as usize).max(1);
    let mut rng = StdRng::seed_from_u64(seed);
    let mut impulse: Vec<f32> = (0..length)
        .map(|i| {
            let decay = 1.0 - i as f32 / length as f32;
            rng.gen_range(-1.0..1.0) * decay * decay
        })
        .collect();

    let energy: f32 = impulse.iter().map(|s| s * s).sum();
    if energy > f32::EPSILON {
        let scale = energy.sqrt().recip();
        impulse.iter_mut().for_each(|s| *s *= scale);
    }
    impulse
}

/// Uniformly partitioned overlap-save convolution reverb.
///
/// Samples go in and come out one at a time; the output lags the input by
/// one partition.
pub struct Reverb {
    partition: usize,
    impulse_spectra: Vec<Vec<Complex32>>,
    /// Input spectra, newest first, one per impulse partition.
    history: VecDeque<Vec<Complex32>>,
    /// Previous partition followed by the one being filled.
    window: Vec<f32>,
    output: Vec<f32>,
    position: usize,
    forward: Arc<dyn RealToComplex<f32>>,
    inverse: Arc<dyn ComplexToReal<f32>>,
    fft_input: Vec<f32>,
    spectrum: Vec<Complex32>,
    accumulator: Vec<Complex32>,
    time: Vec<f32>,
    forward_scratch: Vec<Complex32>,
    inverse_scratch: Vec<Complex32>,
}

impl Reverb {
    pub fn new(impulse: &[f32]) -> Result<Self> {
        let partition = PARTITION;
        let size = partition * 2;
        let mut planner = RealFftPlanner::<f32>::new();
        let forward = planner.plan_fft_forward(size);
        let inverse = planner.plan_fft_inverse(size);

        let mut fft_input = forward.make_input_vec();
        let mut forward_scratch = forward.make_scratch_vec();
        let mut impulse_spectra = Vec::new();
        for chunk in impulse.chunks(partition) {
            fft_input.iter_mut().for_each(|s| *s = 0.0);
            fft_input[..chunk.len()].copy_from_slice(chunk);
            let mut spectrum = forward.make_output_vec();
            forward.process_with_scratch(&mut fft_input, &mut spectrum, &mut forward_scratch)?;
            impulse_spectra.push(spectrum);
        }

        let history = impulse_spectra
            .iter()
            .map(|_| forward.make_output_vec())
            .collect();

        Ok(Self {
            partition,
            history,
            impulse_spectra,
            window: vec![0.0; size],
            output: vec![0.0; partition],
            position: 0,
            spectrum: forward.make_output_vec(),
            accumulator: forward.make_output_vec(),
            time: inverse.make_output_vec(),
            inverse_scratch: inverse.make_scratch_vec(),
            forward_scratch,
            fft_input,
            forward,
            inverse,
        })
    }

    /// Reverb over [`room_impulse`].
    pub fn room(sample_rate: u32, seed: u64) -> Result<Self> {
        Self::new(&room_impulse(sample_rate, seed))
    }

    /// Feeds one sample and returns the wet sample one partition behind.
    pub fn process(&mut self, input: f32) -> Result<f32> {
        let out = self.output[self.position];
        self.window[self.partition + self.position] = input;
        self.position += 1;
        if self.position == self.partition {
            self.convolve_partition()?;
            self.position = 0;
        }
        Ok(out)
    }

    fn convolve_partition(&mut self) -> Result<()> {
        let partition = self.partition;
        self.fft_input.copy_from_slice(&self.window);
        self.forward.process_with_scratch(
            &mut self.fft_input,
            &mut self.spectrum,
            &mut self.forward_scratch,
        )?;

        let mut newest = self
            .history
            .pop_back()
            .unwrap_or_else(|| vec![Complex32::default(); self.spectrum.len()]);
        newest.copy_from_slice(&self.spectrum);
        self.history.push_front(newest);

        self.accumulator
            .iter_mut()
            .for_each(|bin| *bin = Complex32::default());
        for (input, impulse) in self.history.iter().zip(&self.impulse_spectra) {
            for ((acc, x), h) in self.accumulator.iter_mut().zip(input).zip(impulse) {
                *acc += x * h;
            }
        }
        // DC and Nyquist of a real signal carry no imaginary part.
        let last = self.accumulator.len() - 1;
        self.accumulator[0].im = 0.0;
        self.accumulator[last].im = 0.0;

        self.inverse.process_with_scratch(
            &mut self.accumulator,
            &mut self.time,
            &mut self.inverse_scratch,
        )?;

        let scale = (2 * partition) as f32;
        for (out, value) in self.output.iter_mut().zip(&self.time[partition..]) {
            *out = value / scale;
        }
        self.window.copy_within(partition.., 0);
        Ok(())
    }
}

impl fmt::Debug for Reverb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reverb")
            .field("partition", &self.partition)
            .field("partitions", &self.impulse_spectra.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn impulse_response(reverb: &mut Reverb, len: usize) -> Vec<f32> {
        (0..len)
            .map(|n| reverb.process(if n == 0 { 1.0 } else { 0.0 }).unwrap())
            .collect()
    }

    #[test]
    fn reproduces_a_short_impulse_one_partition_late() {
        let mut reverb = Reverb::new(&[0.5, 0.25]).unwrap();
        let out = impulse_response(&mut reverb, PARTITION * 2);

        assert!(out[..PARTITION].iter().all(|s| s.abs() < 1e-6));
        assert!((out[PARTITION] - 0.5).abs() < 1e-4);
        assert!((out[PARTITION + 1] - 0.25).abs() < 1e-4);
        assert!(out[PARTITION + 2].abs() < 1e-4);
    }

    #[test]
    fn later_partitions_land_at_their_offset() {
        let mut impulse = vec![0.0; PARTITION + 3];
        impulse[PARTITION + 1] = 1.0;
        let mut reverb = Reverb::new(&impulse).unwrap();
        let out = impulse_response(&mut reverb, PARTITION * 3);

        assert!((out[2 * PARTITION + 1] - 1.0).abs() < 1e-4);
        assert!(out[2 * PARTITION].abs() < 1e-4);
        assert!(out[2 * PARTITION + 2].abs() < 1e-4);
    }

    #[test]
    fn room_impulse_decays_and_has_unit_energy() {
        let impulse = room_impulse(8_000, 3);
        assert_eq!(impulse.len(), 16_000);

        let energy: f32 = impulse.iter().map(|s| s * s).sum();
        assert!((energy - 1.0).abs() < 1e-3);

        let head: f32 = impulse[..1_000].iter().map(|s| s.abs()).sum();
        let tail: f32 = impulse[15_000..].iter().map(|s| s.abs()).sum();
        assert!(head > 10.0 * tail);
    }
}
