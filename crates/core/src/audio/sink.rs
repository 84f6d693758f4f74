use std::sync::{Arc, Mutex};

use crate::{MotionAudioError, Result};

/// Destination for the final stereo mixdown.
///
/// Device backends implement this to hand rendered blocks to the platform.
/// [`MemorySink`] keeps everything in memory, which is what offline rendering
/// and the tests use.
pub trait AudioSink: Send {
    /// Prepares the destination. Errors here make the whole output
    /// unavailable.
    fn open(&mut self, sample_rate: u32, channels: u16) -> Result<()>;

    /// Receives interleaved frames.
    fn write(&mut self, interleaved: &[f32]) -> Result<()>;

    fn close(&mut self) -> Result<()>;
}

/// Sink that drops every block.
#[derive(Debug, Default)]
pub struct NullSink;

impl AudioSink for NullSink {
    fn open(&mut self, _sample_rate: u32, _channels: u16) -> Result<()> {
        Ok(())
    }

    fn write(&mut self, _interleaved: &[f32]) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Sink collecting the mixdown into a shared buffer. Clones share the
/// buffer, so keep one around to read what the output graph wrote.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    buffer: Arc<Mutex<Vec<f32>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interleaved samples written so far.
    pub fn samples(&self) -> Result<Vec<f32>> {
        self.buffer
            .lock()
            .map(|buffer| buffer.clone())
            .map_err(|_| MotionAudioError::msg("memory sink has been poisoned"))
    }

    /// Interleaved samples encoded as little-endian `f32` bytes.
    pub fn to_le_bytes(&self) -> Result<Vec<u8>> {
        Ok(self
            .samples()?
            .iter()
            .flat_map(|sample| sample.to_le_bytes())
            .collect())
    }
}

impl AudioSink for MemorySink {
    fn open(&mut self, _sample_rate: u32, _channels: u16) -> Result<()> {
        Ok(())
    }

    fn write(&mut self, interleaved: &[f32]) -> Result<()> {
        self.buffer
            .lock()
            .map_err(|_| MotionAudioError::msg("memory sink has been poisoned"))?
            .extend_from_slice(interleaved);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
