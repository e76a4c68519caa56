//! Dense pyramidal Lucas-Kanade optical flow, reduced to one intensity value
//! per frame pair.

use image::GrayImage;

use crate::config::FlowConfig;
use crate::error::{Result, TrimError};
use crate::sampler::AnalysisFrame;

/// Structure tensors whose smaller eigenvalue, averaged over the window, is
/// below this carry no usable flow.
const MIN_EIGEN: f32 = 1e-2;
/// Refinement stops once an update moves less than this many pixels.
const EPSILON: f32 = 1e-2;

/// Motion between one sampled frame and its predecessor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionSample {
    /// Original index of the later frame of the pair.
    pub frame_index: u64,
    pub intensity: f64,
}

/// Single-channel float image with clamped border access.
#[derive(Debug, Clone)]
struct Plane {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl Plane {
    fn from_gray(img: &GrayImage) -> Self {
        Self {
            width: img.width() as usize,
            height: img.height() as usize,
            data: img.as_raw().iter().map(|&v| v as f32).collect(),
        }
    }

    fn zeros(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0.0; width * height],
        }
    }

    #[inline]
    fn at(&self, x: isize, y: isize) -> f32 {
        let x = x.clamp(0, self.width as isize - 1) as usize;
        let y = y.clamp(0, self.height as isize - 1) as usize;
        self.data[y * self.width + x]
    }

    #[inline]
    fn bilinear(&self, x: f32, y: f32) -> f32 {
        let x0 = x.floor();
        let y0 = y.floor();
        let ax = x - x0;
        let ay = y - y0;
        let (xi, yi) = (x0 as isize, y0 as isize);
        let top = self.at(xi, yi) * (1.0 - ax) + self.at(xi + 1, yi) * ax;
        let bottom = self.at(xi, yi + 1) * (1.0 - ax) + self.at(xi + 1, yi + 1) * ax;
        top * (1.0 - ay) + bottom * ay
    }

    /// Half resolution by 2x2 box averaging.
    fn downsample(&self) -> Self {
        let width = (self.width / 2).max(1);
        let height = (self.height / 2).max(1);
        let mut out = Plane::zeros(width, height);
        for y in 0..height {
            for x in 0..width {
                let (sx, sy) = (2 * x as isize, 2 * y as isize);
                out.data[y * width + x] = (self.at(sx, sy)
                    + self.at(sx + 1, sy)
                    + self.at(sx, sy + 1)
                    + self.at(sx + 1, sy + 1))
                    * 0.25;
            }
        }
        out
    }

    /// Central difference gradients.
    fn gradients(&self) -> (Plane, Plane) {
        let mut gx = Plane::zeros(self.width, self.height);
        let mut gy = Plane::zeros(self.width, self.height);
        for y in 0..self.height as isize {
            for x in 0..self.width as isize {
                let i = y as usize * self.width + x as usize;
                gx.data[i] = (self.at(x + 1, y) - self.at(x - 1, y)) * 0.5;
                gy.data[i] = (self.at(x, y + 1) - self.at(x, y - 1)) * 0.5;
            }
        }
        (gx, gy)
    }
}

#[derive(Debug, Clone)]
struct Level {
    image: Plane,
    gx: Plane,
    gy: Plane,
}

/// Gaussian-free image pyramid, finest level first.
#[derive(Debug, Clone)]
struct Pyramid {
    levels: Vec<Level>,
}

impl Pyramid {
    fn build(img: &GrayImage, max_levels: u32, window_radius: u32) -> Self {
        let min_side = 2 * window_radius as usize + 1;
        let mut levels = Vec::with_capacity(max_levels as usize);
        let mut plane = Plane::from_gray(img);
        loop {
            let (gx, gy) = plane.gradients();
            let next = if levels.len() + 1 < max_levels as usize
                && plane.width / 2 >= min_side
                && plane.height / 2 >= min_side
            {
                Some(plane.downsample())
            } else {
                None
            };
            levels.push(Level {
                image: plane,
                gx,
                gy,
            });
            match next {
                Some(p) => plane = p,
                None => break,
            }
        }
        Self { levels }
    }
}

/// Tracks the point `(x, y)` (finest level coordinates) from `prev` to
/// `next`. Returns `None` when the point is untextured at the finest level.
fn track_point(
    prev: &Pyramid,
    next: &Pyramid,
    x: usize,
    y: usize,
    config: &FlowConfig,
) -> Option<(f32, f32)> {
    let r = config.window_radius as isize;
    let area = ((2 * r + 1) * (2 * r + 1)) as f32;
    let mut guess = (0.0f32, 0.0f32);

    for (depth, (pl, nl)) in prev.levels.iter().zip(&next.levels).enumerate().rev() {
        let cx = (x >> depth) as isize;
        let cy = (y >> depth) as isize;

        let (mut gxx, mut gxy, mut gyy) = (0.0f32, 0.0f32, 0.0f32);
        for dy in -r..=r {
            for dx in -r..=r {
                let ix = pl.gx.at(cx + dx, cy + dy);
                let iy = pl.gy.at(cx + dx, cy + dy);
                gxx += ix * ix;
                gxy += ix * iy;
                gyy += iy * iy;
            }
        }

        let det = gxx * gyy - gxy * gxy;
        let min_eigen = (gxx + gyy - ((gxx - gyy).powi(2) + 4.0 * gxy * gxy).sqrt()) * 0.5;
        if min_eigen / area < MIN_EIGEN || det.abs() <= f32::EPSILON {
            if depth == 0 {
                return None;
            }
            guess = (guess.0 * 2.0, guess.1 * 2.0);
            continue;
        }

        let mut v = (0.0f32, 0.0f32);
        for _ in 0..config.iterations {
            let (mut bx, mut by) = (0.0f32, 0.0f32);
            for dy in -r..=r {
                for dx in -r..=r {
                    let (px, py) = (cx + dx, cy + dy);
                    let moved = nl.image.bilinear(
                        px as f32 + guess.0 + v.0,
                        py as f32 + guess.1 + v.1,
                    );
                    let diff = pl.image.at(px, py) - moved;
                    bx += diff * pl.gx.at(px, py);
                    by += diff * pl.gy.at(px, py);
                }
            }
            let step = (
                (gyy * bx - gxy * by) / det,
                (gxx * by - gxy * bx) / det,
            );
            v = (v.0 + step.0, v.1 + step.1);
            if step.0.abs() < EPSILON && step.1.abs() < EPSILON {
                break;
            }
        }

        guess = (guess.0 + v.0, guess.1 + v.1);
        if depth > 0 {
            guess = (guess.0 * 2.0, guess.1 * 2.0);
        }
    }

    Some(guess)
}

fn mean_flow_magnitude(prev: &Pyramid, next: &Pyramid, config: &FlowConfig) -> f64 {
    let finest = &prev.levels[0].image;
    let (x0, y0, x1, y1) = config
        .region
        .bounds(finest.width as u32, finest.height as u32);
    let step = config.grid_step.max(1) as usize;

    let mut total = 0.0f64;
    let mut tracked = 0usize;
    for y in (y0 as usize..y1 as usize).step_by(step) {
        for x in (x0 as usize..x1 as usize).step_by(step) {
            if let Some((u, v)) = track_point(prev, next, x, y, config) {
                total += ((u * u + v * v) as f64).sqrt();
                tracked += 1;
            }
        }
    }

    if tracked == 0 {
        0.0
    } else {
        total / tracked as f64
    }
}

/// Mean flow magnitude between two equally sized grayscale frames, in pixels.
pub fn flow_intensity(prev: &GrayImage, next: &GrayImage, config: &FlowConfig) -> f64 {
    let a = Pyramid::build(prev, config.pyramid_levels, config.window_radius);
    let b = Pyramid::build(next, config.pyramid_levels, config.window_radius);
    mean_flow_magnitude(&a, &b, config)
}

/// Two-slot rolling estimator: holds the pyramid of the previous sampled
/// frame and emits one [`MotionSample`] for each frame pushed after it.
pub struct MotionEstimator {
    config: FlowConfig,
    scale: f64,
    previous: Option<Pyramid>,
}

impl MotionEstimator {
    /// `scale` multiplies every raw intensity (see `Normalization::factor`).
    pub fn new(config: FlowConfig, scale: f64) -> Self {
        Self {
            config,
            scale,
            previous: None,
        }
    }

    /// Fails when `frame` differs in size from its predecessor, since flow
    /// between the two is undefined.
    pub fn push(&mut self, frame: &AnalysisFrame) -> Result<Option<MotionSample>> {
        let current = Pyramid::build(&frame.gray, self.config.pyramid_levels, self.config.window_radius);
        let sample = match self.previous.take() {
            Some(prev) => {
                let (before, after) = (&prev.levels[0].image, &current.levels[0].image);
                if (before.width, before.height) != (after.width, after.height) {
                    return Err(TrimError::decode(format!(
                        "frame {} is {}x{}, previous sampled frame was {}x{}",
                        frame.info.index, after.width, after.height, before.width, before.height
                    )));
                }
                let raw = mean_flow_magnitude(&prev, &current, &self.config);
                Some(MotionSample {
                    frame_index: frame.info.index,
                    intensity: (raw * self.scale).max(0.0),
                })
            }
            None => None,
        };
        self.previous = Some(current);
        Ok(sample)
    }
}
