pub mod analysis;
pub mod dsp;
pub mod envelope;
mod mixer;
pub mod reverb;
pub mod scheduler;
pub mod sink;
pub mod voice;

use std::sync::{Arc, Mutex, MutexGuard};

pub use analysis::{AnalysisFrame, AnalysisTap, SpectrumAnalyser};
pub use mixer::{ScheduledVoice, VoiceId};
pub use scheduler::{ApplyReport, AudioScheduler, ContinuousKind, ProcessHandle, SchedulerState};
pub use sink::{AudioSink, MemorySink, NullSink};
pub use voice::{SoundKind, Voice};

use crate::{config::AudioConfig, MotionAudioError, Result};
use mixer::Mixer;

const CHANNELS: u16 = 2;
const INITIAL_MASTER_GAIN: f32 = 0.5;

/// Lifecycle of the output graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputState {
    /// Created but the sink has not been opened yet.
    Uninitialized,
    Running,
    /// Torn down explicitly. A closed output cannot be restarted.
    Closed,
}

struct OutputGraph {
    state: OutputState,
    sample_rate: u32,
    block_size: usize,
    sink: Box<dyn AudioSink>,
    mixer: Mixer,
}

/// Shared handle to the single audio output graph of the process.
///
/// Cloning is cheap and every clone talks to the same graph. The graph is
/// opened lazily by [`AudioOutput::ensure_started`] and must be closed
/// explicitly with [`AudioOutput::close`]. Only the scheduler changes gain,
/// pan and voices; everything else can read the analysis tap and clock.
#[derive(Clone)]
pub struct AudioOutput {
    shared: Arc<Mutex<OutputGraph>>,
    analysis: AnalysisTap,
}

impl AudioOutput {
    pub fn new(config: &AudioConfig, sink: impl AudioSink + 'static) -> Result<Self> {
        let sample_rate = config.sample_rate.max(1);
        let room_seed = config.seed.unwrap_or_else(rand::random);
        let graph = OutputGraph {
            state: OutputState::Uninitialized,
            sample_rate,
            block_size: config.block_size.max(1),
            sink: Box::new(sink),
            mixer: Mixer::new(sample_rate, INITIAL_MASTER_GAIN, room_seed)?,
        };

        Ok(Self {
            shared: Arc::new(Mutex::new(graph)),
            analysis: AnalysisTap::new(SpectrumAnalyser::new(
                sample_rate,
                config.analysis_fft_size,
            )),
        })
    }

    /// Opens the sink on first use. Later calls are no-ops.
    pub fn ensure_started(&self) -> Result<()> {
        let mut graph = self.lock()?;
        match graph.state {
            OutputState::Running => Ok(()),
            OutputState::Closed => Err(MotionAudioError::output_unavailable(
                "audio output has been closed",
            )),
            OutputState::Uninitialized => {
                let sample_rate = graph.sample_rate;
                graph.sink.open(sample_rate, CHANNELS).map_err(|err| {
                    MotionAudioError::output_unavailable(format!("failed to open sink: {err}"))
                })?;
                graph.state = OutputState::Running;
                tracing::info!(sample_rate, "audio output started");
                Ok(())
            }
        }
    }

    /// Tears the graph down. Pending voices are discarded.
    pub fn close(&self) -> Result<()> {
        let mut graph = self.lock()?;
        if graph.state == OutputState::Running {
            graph.sink.close()?;
            tracing::info!("audio output closed");
        }
        graph.state = OutputState::Closed;
        Ok(())
    }

    /// Returns the lifecycle state of the graph.
    pub fn state(&self) -> Result<OutputState> {
        Ok(self.lock()?.state)
    }

    /// Returns the output sample rate in Hz.
    pub fn sample_rate(&self) -> Result<u32> {
        Ok(self.lock()?.sample_rate)
    }

    /// Output clock in seconds, i.e. how much audio has been rendered.
    pub fn current_time(&self) -> Result<f64> {
        Ok(self.lock()?.mixer.now())
    }

    /// Visualisation tap on the master bus.
    pub fn analysis(&self) -> AnalysisTap {
        self.analysis.clone()
    }

    /// Voices that are scheduled or still sounding.
    pub fn scheduled_voices(&self) -> Result<Vec<ScheduledVoice>> {
        Ok(self.lock()?.mixer.voices())
    }

    /// Returns the master gain at output time `time`, ramps included.
    pub fn master_gain_at(&self, time: f64) -> Result<f32> {
        Ok(self.lock()?.mixer.master_at(time))
    }

    /// Returns the value the master gain is set or ramping to.
    pub fn master_gain_target(&self) -> Result<f32> {
        Ok(self.lock()?.mixer.master_target())
    }

    /// Returns the pan position the master bus is moving to.
    pub fn pan_target(&self) -> Result<f32> {
        Ok(self.lock()?.mixer.pan_target())
    }

    /// Renders audio until the output clock reaches `time`.
    pub fn advance_to(&self, time: f64) -> Result<()> {
        let (now, sample_rate) = {
            let graph = self.lock()?;
            (graph.mixer.now(), graph.sample_rate)
        };
        if time <= now {
            return Ok(());
        }
        let frames = ((time - now) * sample_rate as f64).round() as usize;
        self.render(frames)
    }

    /// Renders `frames` frames into the sink, block by block.
    pub fn render(&self, frames: usize) -> Result<()> {
        let mut remaining = frames;
        while remaining > 0 {
            let mut graph = self.running()?;
            let count = remaining.min(graph.block_size);
            let block = graph.mixer.render(count)?;
            graph.sink.write(&block.interleaved)?;
            let now = graph.mixer.now();
            drop(graph);

            self.analysis.push(&block.mono, now)?;
            remaining -= count;
        }
        Ok(())
    }

    pub(crate) fn schedule(&self, voice: &Voice) -> Result<VoiceId> {
        let mut graph = self.running()?;
        let id = graph.mixer.add(voice);
        tracing::trace!(?id, kind = ?voice.kind, start = voice.start, "voice scheduled");
        Ok(id)
    }

    pub(crate) fn cancel_pending(&self, id: VoiceId) -> Result<bool> {
        Ok(self.lock()?.mixer.cancel_pending(id))
    }

    pub(crate) fn set_master_gain(&self, value: f32) -> Result<()> {
        self.running()?.mixer.set_master(value);
        Ok(())
    }

    pub(crate) fn ramp_master_gain(&self, target: f32, duration: f64) -> Result<()> {
        self.running()?.mixer.ramp_master(target, duration);
        Ok(())
    }

    pub(crate) fn set_pan(&self, pan: f32) -> Result<()> {
        self.running()?.mixer.set_pan(pan);
        Ok(())
    }

    fn running(&self) -> Result<MutexGuard<'_, OutputGraph>> {
        let graph = self.lock()?;
        if graph.state != OutputState::Running {
            return Err(MotionAudioError::output_unavailable(format!(
                "audio output is {:?}",
                graph.state
            )));
        }
        Ok(graph)
    }

    fn lock(&self) -> Result<MutexGuard<'_, OutputGraph>> {
        self.shared
            .lock()
            .map_err(|_| MotionAudioError::msg("audio output has been poisoned"))
    }
}

impl std::fmt::Debug for AudioOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioOutput").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenSink;

    impl AudioSink for BrokenSink {
        fn open(&mut self, _sample_rate: u32, _channels: u16) -> Result<()> {
            Err(MotionAudioError::msg("no device"))
        }

        fn write(&mut self, _interleaved: &[f32]) -> Result<()> {
            Ok(())
        }

        fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn config() -> AudioConfig {
        AudioConfig {
            sample_rate: 8_000,
            block_size: 256,
            ..Default::default()
        }
    }

    #[test]
    fn starts_once_and_renders_into_sink() {
        let sink = MemorySink::new();
        let output = AudioOutput::new(&config(), sink.clone()).unwrap();

        output.ensure_started().unwrap();
        output.ensure_started().unwrap();
        output.advance_to(0.5).unwrap();

        assert_eq!(output.current_time().unwrap(), 0.5);
        assert_eq!(sink.samples().unwrap().len(), 8_000);
    }

    #[test]
    fn broken_sink_is_output_unavailable() {
        let output = AudioOutput::new(&config(), BrokenSink).unwrap();
        let err = output.ensure_started().unwrap_err();
        assert!(matches!(err, MotionAudioError::OutputUnavailable(_)));
        assert!(matches!(
            output.render(10).unwrap_err(),
            MotionAudioError::OutputUnavailable(_)
        ));
    }

    #[test]
    fn closed_output_cannot_restart() {
        let output = AudioOutput::new(&config(), NullSink).unwrap();
        output.ensure_started().unwrap();
        output.close().unwrap();

        assert_eq!(output.state().unwrap(), OutputState::Closed);
        assert!(output.ensure_started().is_err());
    }

    #[test]
    fn clones_share_the_graph() {
        let output = AudioOutput::new(&config(), NullSink).unwrap();
        let other = output.clone();
        output.ensure_started().unwrap();
        other.advance_to(0.25).unwrap();
        assert_eq!(output.current_time().unwrap(), 0.25);
    }
}
