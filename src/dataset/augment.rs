//! Geometric and photometric augmentation
//!
//! Augmentations operate on CHW f32 pixel buffers before tensor assembly.
//! Every random draw comes from the caller's seeded RNG so a run is
//! reproducible given its configuration seed.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Boundary handling for samples that fall outside the source image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillMode {
    /// Mirror across the edge
    Reflect,
    /// Clamp to the nearest edge pixel
    Nearest,
    /// Wrap around to the opposite edge
    Wrap,
    /// Fill with zero
    Constant,
}

impl FillMode {
    /// Map an out-of-range coordinate into [0, len)
    fn resolve(&self, coord: i64, len: usize) -> Option<usize> {
        let len = len as i64;
        if (0..len).contains(&coord) {
            return Some(coord as usize);
        }
        match self {
            FillMode::Reflect => {
                let period = 2 * len;
                let mut c = coord.rem_euclid(period);
                if c >= len {
                    c = period - 1 - c;
                }
                Some(c as usize)
            }
            FillMode::Nearest => Some(coord.clamp(0, len - 1) as usize),
            FillMode::Wrap => Some(coord.rem_euclid(len) as usize),
            FillMode::Constant => None,
        }
    }
}

/// A CHW f32 pixel buffer with its geometry
#[derive(Debug, Clone)]
pub struct PixelBuffer {
    pub data: Vec<f32>,
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl PixelBuffer {
    pub fn new(data: Vec<f32>, channels: usize, height: usize, width: usize) -> Self {
        debug_assert_eq!(data.len(), channels * height * width);
        Self {
            data,
            channels,
            height,
            width,
        }
    }

    #[inline]
    fn at(&self, c: usize, y: usize, x: usize) -> f32 {
        self.data[c * self.height * self.width + y * self.width + x]
    }

    /// Fetch with boundary handling; Constant fill yields 0.0 outside
    fn fetch(&self, c: usize, y: i64, x: i64, fill: FillMode) -> f32 {
        match (fill.resolve(y, self.height), fill.resolve(x, self.width)) {
            (Some(ry), Some(rx)) => self.at(c, ry, rx),
            _ => 0.0,
        }
    }

    /// Bilinear sample at fractional coordinates
    fn sample(&self, c: usize, y: f32, x: f32, fill: FillMode) -> f32 {
        let y0 = y.floor() as i64;
        let x0 = x.floor() as i64;
        let fy = y - y0 as f32;
        let fx = x - x0 as f32;

        let v00 = self.fetch(c, y0, x0, fill);
        let v01 = self.fetch(c, y0, x0 + 1, fill);
        let v10 = self.fetch(c, y0 + 1, x0, fill);
        let v11 = self.fetch(c, y0 + 1, x0 + 1, fill);

        let top = v00 * (1.0 - fx) + v01 * fx;
        let bottom = v10 * (1.0 - fx) + v11 * fx;
        top * (1.0 - fy) + bottom * fy
    }
}

/// Per-batch augmentation parameters drawn from the run configuration
#[derive(Debug, Clone)]
pub struct Augmenter {
    pub horizontal_flip: bool,
    pub vertical_flip: bool,
    /// Rotation range in degrees; a draw is uniform in [-r, r]
    pub rotation_range: f32,
    /// Zoom bounds [lo, hi]; 1.0 is identity
    pub zoom_range: [f32; 2],
    /// Horizontal shift as a fraction of width
    pub width_shift_range: f32,
    /// Vertical shift as a fraction of height
    pub height_shift_range: f32,
    /// Random contrast half-range; None disables contrast jitter
    pub contrast: Option<f32>,
    pub fill_mode: FillMode,
}

impl Augmenter {
    /// Apply one random augmentation draw to a pixel buffer
    pub fn apply<R: Rng>(&self, image: &PixelBuffer, rng: &mut R) -> PixelBuffer {
        let flip_h = self.horizontal_flip && rng.gen_bool(0.5);
        let flip_v = self.vertical_flip && rng.gen_bool(0.5);

        let angle = if self.rotation_range > 0.0 {
            rng.gen_range(-self.rotation_range..=self.rotation_range)
                .to_radians()
        } else {
            0.0
        };

        let zoom = if self.zoom_range[0] < self.zoom_range[1] {
            rng.gen_range(self.zoom_range[0]..=self.zoom_range[1])
        } else {
            self.zoom_range[0]
        };

        let shift_x = if self.width_shift_range > 0.0 {
            rng.gen_range(-self.width_shift_range..=self.width_shift_range) * image.width as f32
        } else {
            0.0
        };
        let shift_y = if self.height_shift_range > 0.0 {
            rng.gen_range(-self.height_shift_range..=self.height_shift_range) * image.height as f32
        } else {
            0.0
        };

        let mut out = self.warp(image, angle, zoom, shift_x, shift_y, flip_h, flip_v);

        if let Some(half_range) = self.contrast {
            if half_range > 0.0 {
                let factor = rng.gen_range((1.0 - half_range)..=(1.0 + half_range));
                adjust_contrast(&mut out, factor);
            }
        }

        out
    }

    /// Inverse-map each destination pixel through the combined
    /// rotate/zoom/shift/flip transform around the image center.
    fn warp(
        &self,
        image: &PixelBuffer,
        angle: f32,
        zoom: f32,
        shift_x: f32,
        shift_y: f32,
        flip_h: bool,
        flip_v: bool,
    ) -> PixelBuffer {
        let identity = angle == 0.0
            && (zoom - 1.0).abs() < f32::EPSILON
            && shift_x == 0.0
            && shift_y == 0.0
            && !flip_h
            && !flip_v;
        if identity {
            return image.clone();
        }

        let (h, w) = (image.height, image.width);
        let cy = (h as f32 - 1.0) / 2.0;
        let cx = (w as f32 - 1.0) / 2.0;
        let (sin, cos) = angle.sin_cos();
        let inv_zoom = 1.0 / zoom;

        let mut data = vec![0.0f32; image.data.len()];
        for c in 0..image.channels {
            for y in 0..h {
                for x in 0..w {
                    let mut dx = x as f32;
                    let mut dy = y as f32;
                    if flip_h {
                        dx = w as f32 - 1.0 - dx;
                    }
                    if flip_v {
                        dy = h as f32 - 1.0 - dy;
                    }
                    dx -= cx + shift_x;
                    dy -= cy + shift_y;

                    // inverse rotation then inverse zoom, back to source space
                    let sx = (dx * cos + dy * sin) * inv_zoom + cx;
                    let sy = (-dx * sin + dy * cos) * inv_zoom + cy;

                    data[c * h * w + y * w + x] = image.sample(c, sy, sx, self.fill_mode);
                }
            }
        }
        PixelBuffer::new(data, image.channels, h, w)
    }
}

/// Scale pixel values around the image mean
fn adjust_contrast(image: &mut PixelBuffer, factor: f32) {
    let mean = image.data.iter().sum::<f32>() / image.data.len() as f32;
    for v in &mut image.data {
        *v = mean + (*v - mean) * factor;
    }
}
