use serde::{Deserialize, Serialize};

use crate::{config::MotionConfig, Bitmap, MotionAudioError, Result};

/// Coarse label for how much of the frame changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionClass {
    Static,
    Minimal,
    Moderate,
    Active,
    Intense,
}

impl MotionClass {
    /// Step function over intensity. Each breakpoint belongs to the lower
    /// class, so `0.01` is still static and `0.3` is still active.
    pub fn from_intensity(intensity: f32) -> Self {
        if intensity > 0.3 {
            Self::Intense
        } else if intensity > 0.15 {
            Self::Active
        } else if intensity > 0.05 {
            Self::Moderate
        } else if intensity > 0.01 {
            Self::Minimal
        } else {
            Self::Static
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::Minimal => "minimal",
            Self::Moderate => "moderate",
            Self::Active => "active",
            Self::Intense => "intense",
        }
    }
}

/// Offset of the motion-weighted centroid from the frame centre.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MotionVector {
    /// Horizontal offset in `[-1, 1]`, negative is left of centre.
    pub x: f32,
    /// Vertical offset in `[-1, 1]`, negative is above centre.
    pub y: f32,
    /// Euclidean length of the offset relative to the centre-to-corner
    /// distance, in `[0, 1]`.
    pub magnitude: f32,
}

impl MotionVector {
    pub const ZERO: MotionVector = MotionVector {
        x: 0.0,
        y: 0.0,
        magnitude: 0.0,
    };
}

/// Grid cell where local motion exceeded the hotspot threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hotspot {
    pub grid_x: u32,
    pub grid_y: u32,
    /// Pixel coordinates of the cell centre.
    pub x: u32,
    pub y: u32,
    pub moved_pixels: u32,
}

/// One measurement between two consecutive frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionSample {
    pub timestamp: f64,
    pub intensity: f32,
    pub classification: MotionClass,
    pub vector: MotionVector,
    /// Highest count first.
    pub hotspots: Vec<Hotspot>,
    pub moved_pixels: u64,
}

impl MotionSample {
    /// Builds a sample from a raw intensity. The estimator uses this too, so
    /// the classification is always derived the same way.
    pub fn from_intensity(timestamp: f64, intensity: f32, vector: MotionVector) -> Self {
        let intensity = if intensity.is_finite() {
            intensity.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            timestamp,
            intensity,
            classification: MotionClass::from_intensity(intensity),
            vector,
            hotspots: Vec::new(),
            moved_pixels: 0,
        }
    }
}

/// Grid-based frame differencing.
#[derive(Debug, Clone)]
pub struct FrameDiffEstimator {
    pixel_threshold: u16,
    cell_size: u32,
    hotspot_min_pixels: u32,
    max_hotspots: usize,
}

impl Default for FrameDiffEstimator {
    fn default() -> Self {
        Self::new(&MotionConfig::default())
    }
}

impl FrameDiffEstimator {
    pub fn new(config: &MotionConfig) -> Self {
        Self {
            pixel_threshold: config.pixel_threshold as u16,
            cell_size: config.cell_size.max(1),
            hotspot_min_pixels: config.hotspot_min_pixels,
            max_hotspots: config.max_hotspots,
        }
    }

    /// Measures motion between `previous` and `current`. Returns `Ok(None)`
    /// when there is no previous frame yet.
    pub fn measure(
        &self,
        previous: Option<&Bitmap>,
        current: &Bitmap,
        timestamp: f64,
    ) -> Result<Option<MotionSample>> {
        let Some(previous) = previous else {
            return Ok(None);
        };

        if !previous.same_dimensions(current) {
            return Err(MotionAudioError::invalid_input(format!(
                "cannot diff a {}x{} frame against a {}x{} frame",
                current.width(),
                current.height(),
                previous.width(),
                previous.height()
            )));
        }

        let width = current.width();
        let grid = self.diff_grid(previous, current);
        let total_pixels = current.pixel_count().max(1);
        let moved: u64 = grid.cells.iter().map(|&count| count as u64).sum();
        let intensity = (moved as f64 / total_pixels as f64).min(1.0) as f32;

        let mut sample = MotionSample::from_intensity(timestamp, intensity, grid.centroid_offset());
        sample.hotspots = self.hotspots(&grid, width, current.height());
        sample.moved_pixels = moved;
        Ok(Some(sample))
    }

    fn diff_grid(&self, previous: &Bitmap, current: &Bitmap) -> MotionGrid {
        let width = current.width();
        let cols = width.div_ceil(self.cell_size);
        let rows = current.height().div_ceil(self.cell_size);
        let mut grid = MotionGrid::new(cols, rows);
        // Mean of three channel differences compared without division.
        let threshold = self.pixel_threshold * 3;

        for (index, (a, b)) in previous.pixels().zip(current.pixels()).enumerate() {
            let sum = (a[0].abs_diff(b[0]) as u16)
                + (a[1].abs_diff(b[1]) as u16)
                + (a[2].abs_diff(b[2]) as u16);
            if sum > threshold {
                let x = index as u32 % width;
                let y = index as u32 / width;
                grid.mark(x / self.cell_size, y / self.cell_size);
            }
        }

        grid
    }

    fn hotspots(&self, grid: &MotionGrid, width: u32, height: u32) -> Vec<Hotspot> {
        let half = self.cell_size / 2;
        let mut hotspots: Vec<Hotspot> = grid
            .iter()
            .filter(|&(_, _, count)| count > self.hotspot_min_pixels)
            .map(|(grid_x, grid_y, count)| Hotspot {
                grid_x,
                grid_y,
                x: (grid_x * self.cell_size + half).min(width - 1),
                y: (grid_y * self.cell_size + half).min(height - 1),
                moved_pixels: count,
            })
            .collect();

        hotspots.sort_by(|a, b| b.moved_pixels.cmp(&a.moved_pixels));
        hotspots.truncate(self.max_hotspots);
        hotspots
    }
}

struct MotionGrid {
    cols: u32,
    rows: u32,
    cells: Vec<u32>,
}

impl MotionGrid {
    fn new(cols: u32, rows: u32) -> Self {
        Self {
            cols,
            rows,
            cells: vec![0; cols as usize * rows as usize],
        }
    }

    fn mark(&mut self, col: u32, row: u32) {
        if col < self.cols && row < self.rows {
            self.cells[(row * self.cols + col) as usize] += 1;
        }
    }

    fn iter(&self) -> impl Iterator<Item = (u32, u32, u32)> + '_ {
        self.cells.iter().enumerate().map(move |(index, &count)| {
            let index = index as u32;
            (index % self.cols, index / self.cols, count)
        })
    }

    /// Weighted centroid of cell centres, relative to the grid centre and
    /// normalised by the half extent of each axis.
    fn centroid_offset(&self) -> MotionVector {
        let mut total = 0.0_f64;
        let mut weighted_x = 0.0_f64;
        let mut weighted_y = 0.0_f64;

        for (col, row, count) in self.iter() {
            if count == 0 {
                continue;
            }
            let weight = count as f64;
            weighted_x += (col as f64 + 0.5) * weight;
            weighted_y += (row as f64 + 0.5) * weight;
            total += weight;
        }

        if total == 0.0 {
            return MotionVector::ZERO;
        }

        let half_x = self.cols as f64 / 2.0;
        let half_y = self.rows as f64 / 2.0;
        let offset_x = weighted_x / total - half_x;
        let offset_y = weighted_y / total - half_y;
        let magnitude = (offset_x * offset_x + offset_y * offset_y).sqrt()
            / (half_x * half_x + half_y * half_y).sqrt();

        MotionVector {
            x: (offset_x / half_x).clamp(-1.0, 1.0) as f32,
            y: (offset_y / half_y).clamp(-1.0, 1.0) as f32,
            magnitude: magnitude.clamp(0.0, 1.0) as f32,
        }
    }
}
