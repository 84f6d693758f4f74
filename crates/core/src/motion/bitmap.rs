use crate::{MotionAudioError, Result};

const CHANNELS: usize = 4;

/// Fixed-size RGBA snapshot of a video frame.
#[derive(Clone, PartialEq, Eq)]
pub struct Bitmap {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Bitmap {
    /// Wraps tightly packed RGBA bytes. The buffer length must equal
    /// `width * height * 4`.
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(MotionAudioError::invalid_input(format!(
                "bitmap dimensions must be non-zero, got {width}x{height}"
            )));
        }

        let expected = width as usize * height as usize * CHANNELS;
        if data.len() != expected {
            return Err(MotionAudioError::invalid_input(format!(
                "bitmap {width}x{height} needs {expected} RGBA bytes, got {}",
                data.len()
            )));
        }

        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Creates a bitmap where every pixel has the same colour.
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Result<Self> {
        let pixels = width as usize * height as usize;
        let data = rgba.iter().copied().cycle().take(pixels * CHANNELS).collect();
        Self::new(width, height, data)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Iterates pixels in row-major order as `[r, g, b, a]` slices.
    pub fn pixels(&self) -> impl Iterator<Item = &[u8]> {
        self.data.chunks_exact(CHANNELS)
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * CHANNELS;
        let px = &self.data[offset..offset + CHANNELS];
        Some([px[0], px[1], px[2], px[3]])
    }

    /// Paints an axis-aligned rectangle, clipped to the bitmap.
    pub fn fill_rect(&mut self, x: u32, y: u32, width: u32, height: u32, rgba: [u8; 4]) {
        let x_end = x.saturating_add(width).min(self.width);
        let y_end = y.saturating_add(height).min(self.height);
        for row in y.min(self.height)..y_end {
            for col in x.min(self.width)..x_end {
                let offset = (row as usize * self.width as usize + col as usize) * CHANNELS;
                self.data[offset..offset + CHANNELS].copy_from_slice(&rgba);
            }
        }
    }

    pub fn same_dimensions(&self, other: &Bitmap) -> bool {
        self.width == other.width && self.height == other.height
    }
}

impl std::fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bitmap")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_short_buffers() {
        let err = Bitmap::new(2, 2, vec![0; 15]).unwrap_err();
        assert!(matches!(err, MotionAudioError::InvalidInput(_)));
    }

    #[test]
    fn fill_rect_is_clipped() {
        let mut bitmap = Bitmap::filled(4, 4, [0, 0, 0, 255]).unwrap();
        bitmap.fill_rect(3, 3, 10, 10, [255, 255, 255, 255]);

        assert_eq!(bitmap.pixel(3, 3), Some([255, 255, 255, 255]));
        assert_eq!(bitmap.pixel(2, 3), Some([0, 0, 0, 255]));
        assert_eq!(bitmap.pixel(4, 4), None);
    }
}
