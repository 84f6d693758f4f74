use std::path::{Path, PathBuf};

use async_trait::async_trait;
use image::imageops::FilterType;
use motion_audio_core::{Bitmap, BitmapSource, MotionAudioError, Result};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp"];

/// Frames extracted to a directory (`frame_0001.png`, ...), sampled at a
/// fixed frame rate and scaled to a common analysis size.
pub struct DirectoryFrames {
    paths: Vec<PathBuf>,
    fps: f64,
    width: u32,
    height: u32,
}

impl DirectoryFrames {
    pub fn open(dir: &Path, fps: f64, width: u32, height: u32) -> Result<Self> {
        if !(fps.is_finite() && fps > 0.0) {
            return Err(MotionAudioError::invalid_input(format!("fps {fps} must be positive")));
        }

        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();

        if paths.is_empty() {
            return Err(MotionAudioError::invalid_input(format!(
                "no frames found in {}",
                dir.display()
            )));
        }
        tracing::info!(frames = paths.len(), fps, "frame directory opened");

        Ok(Self {
            paths,
            fps,
            width,
            height,
        })
    }

    pub fn duration_secs(&self) -> f64 {
        self.paths.len() as f64 / self.fps
    }
}

#[async_trait]
impl BitmapSource for DirectoryFrames {
    async fn frame_at(&mut self, timestamp: f64) -> Result<Option<Bitmap>> {
        let index = (timestamp * self.fps + 1e-6).floor() as usize;
        let Some(path) = self.paths.get(index) else {
            return Ok(None);
        };

        let image = image::open(path).map_err(|err| {
            MotionAudioError::invalid_input(format!("failed to decode {}: {err}", path.display()))
        })?;
        let rgba = image
            .resize_exact(self.width, self.height, FilterType::Triangle)
            .into_rgba8();
        Bitmap::new(self.width, self.height, rgba.into_raw()).map(Some)
    }
}

/// Synthetic clip: a bright square that walks back and forth, speeding up
/// halfway through.
pub struct BouncingSquare {
    duration_secs: f64,
    width: u32,
    height: u32,
}

impl BouncingSquare {
    pub fn new(duration_secs: f64) -> Self {
        Self {
            duration_secs,
            width: 160,
            height: 120,
        }
    }
}

#[async_trait]
impl BitmapSource for BouncingSquare {
    async fn frame_at(&mut self, timestamp: f64) -> Result<Option<Bitmap>> {
        if timestamp >= self.duration_secs {
            return Ok(None);
        }

        let speed = if timestamp < self.duration_secs / 2.0 { 40.0 } else { 160.0 };
        let side = 30;
        let travel = f64::from(self.width - side);
        let phase = (timestamp * speed) % (2.0 * travel);
        let x = if phase < travel { phase } else { 2.0 * travel - phase };

        let mut frame = Bitmap::filled(self.width, self.height, [20, 24, 32, 255])?;
        frame.fill_rect(x as u32, 45, side, side, [250, 240, 220, 255]);
        Ok(Some(frame))
    }
}
