//! Optional processing capabilities and their fallbacks.
//!
//! Denoising and local thresholding each come in an advanced and a basic
//! flavour. A [`Capabilities`] value is chosen once at startup and injected
//! into the pipeline; when the advanced implementation fails on a page, the
//! basic one is applied to that page instead.

use std::fmt;
use std::sync::Arc;

use image::{GrayImage, RgbImage};
use log::info;
use rayon::prelude::*;

use super::ops::{bilateral, gaussian_adaptive_threshold};
use super::preset::BinarizeParams;
use crate::error::{Error, Result};

/// Multi-channel noise removal.
pub trait Denoiser: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Returns a denoised copy of `image`. `strength` is the filter strength
    /// for implementations that take one.
    fn denoise(&self, image: &RgbImage, strength: f32) -> Result<RgbImage>;
}

/// Local adaptive binarization.
pub trait LocalThresholder: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Returns a two-level image: 0 for ink, 255 for paper.
    fn binarize(&self, gray: &GrayImage, params: &BinarizeParams) -> Result<GrayImage>;
}

/// Non-local means denoising over a square search window.
///
/// Each pixel becomes the weighted mean of the pixels in its search window,
/// weighted by how similar their surrounding patches are.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NonLocalMeans {
    pub patch_radius: usize,
    pub search_radius: i64,
}

impl Default for NonLocalMeans {
    /// 7x7 patches compared across a 21x21 search window.
    fn default() -> Self {
        Self {
            patch_radius: 3,
            search_radius: 10,
        }
    }
}

/// Rows of output handled by one parallel task.
const NLM_BAND_ROWS: usize = 64;

fn clamp_index(v: i64, len: usize) -> usize {
    v.clamp(0, len as i64 - 1) as usize
}

fn squared_distance(a: &[u8], b: &[u8]) -> u32 {
    a.iter()
        .zip(b)
        .map(|(&p, &q)| {
            let d = p.abs_diff(q) as u32;
            d * d
        })
        .sum()
}

/// Sliding sum of `line` over `[x - radius, x + radius]`, clipped to the line.
fn box_sum_row(line: &[u32], out: &mut [u32], radius: usize) {
    let w = line.len();
    let mut acc: u32 = line[..=radius.min(w - 1)].iter().sum();
    for x in 0..w {
        out[x] = acc;
        if x + radius + 1 < w {
            acc += line[x + radius + 1];
        }
        if x >= radius {
            acc -= line[x - radius];
        }
    }
}

impl NonLocalMeans {
    /// Denoises output rows `y_start..y_start + rows` into `out`.
    ///
    /// Offsets are visited in a fixed order, so every pixel accumulates its
    /// weights in the same sequence no matter how bands are scheduled.
    fn denoise_band(&self, image: &RgbImage, inv_h2: f32, y_start: usize, out: &mut [u8]) {
        let (w, h) = (image.width() as usize, image.height() as usize);
        let src = image.as_raw();
        let pr = self.patch_radius;
        let rows = out.len() / (w * 3);

        // Patch rows feeding this band
        let top = y_start.saturating_sub(pr);
        let bottom = (y_start + rows - 1 + pr).min(h - 1);

        let mut diff = vec![0u32; w];
        let mut row_sums = vec![0u32; (bottom - top + 1) * w];
        let mut column = vec![0u64; w];
        let mut weights = vec![0f32; rows * w];
        let mut sums = vec![0f32; rows * w * 3];

        for dy in -self.search_radius..=self.search_radius {
            for dx in -self.search_radius..=self.search_radius {
                for (i, sums_row) in row_sums.chunks_mut(w).enumerate() {
                    let y = top + i;
                    let ny = clamp_index(y as i64 + dy, h);
                    for (x, d) in diff.iter_mut().enumerate() {
                        let nx = clamp_index(x as i64 + dx, w);
                        *d = squared_distance(
                            &src[(y * w + x) * 3..][..3],
                            &src[(ny * w + nx) * 3..][..3],
                        );
                    }
                    box_sum_row(&diff, sums_row, pr);
                }

                // Vertical window over the horizontal sums, slid one row at a time
                column.fill(0);
                for y in top..=(y_start + pr).min(h - 1) {
                    let line = &row_sums[(y - top) * w..][..w];
                    for (c, &v) in column.iter_mut().zip(line) {
                        *c += v as u64;
                    }
                }

                for r in 0..rows {
                    let y = y_start + r;
                    let patch_rows = (y + pr).min(h - 1) - y.saturating_sub(pr) + 1;
                    let ny = clamp_index(y as i64 + dy, h);
                    for x in 0..w {
                        let patch_cols = (x + pr).min(w - 1) - x.saturating_sub(pr) + 1;
                        let samples = (patch_cols * patch_rows * 3) as f32;
                        let weight = (-(column[x] as f32 / samples) * inv_h2).exp();
                        let nx = clamp_index(x as i64 + dx, w);
                        let p = &src[(ny * w + nx) * 3..][..3];
                        let i = r * w + x;
                        weights[i] += weight;
                        for c in 0..3 {
                            sums[i * 3 + c] += weight * p[c] as f32;
                        }
                    }

                    if r + 1 < rows {
                        if y + 1 + pr < h {
                            let line = &row_sums[(y + 1 + pr - top) * w..][..w];
                            for (c, &v) in column.iter_mut().zip(line) {
                        *c += v as u64;
                    }
                        }
                        if y >= pr {
                            let line = &row_sums[(y - pr - top) * w..][..w];
                            for (c, &v) in column.iter_mut().zip(line) {
                                *c -= v as u64;
                            }
                        }
                    }
                }
            }
        }

        for (i, value) in out.iter_mut().enumerate() {
            *value = (sums[i] / weights[i / 3]).round().clamp(0.0, 255.0) as u8;
        }
    }
}

impl Denoiser for NonLocalMeans {
    fn name(&self) -> &'static str {
        "non-local-means"
    }

    fn denoise(&self, image: &RgbImage, strength: f32) -> Result<RgbImage> {
        let (w, h) = image.dimensions();
        if w == 0 || h == 0 {
            return Err(Error::Capability(self.name(), "empty image".to_string()));
        }
        if strength.is_nan() || strength <= 0.0 {
            return Err(Error::Capability(self.name(), format!("invalid strength {}", strength)));
        }

        let inv_h2 = 1.0 / (strength * strength);
        let band_len = NLM_BAND_ROWS * w as usize * 3;
        let mut out = vec![0u8; (w * h * 3) as usize];
        out.par_chunks_mut(band_len)
            .enumerate()
            .for_each(|(band, chunk)| {
                self.denoise_band(image, inv_h2, band * NLM_BAND_ROWS, chunk)
            });

        RgbImage::from_raw(w, h, out).ok_or_else(|| {
            Error::Capability(self.name(), "output buffer size mismatch".to_string())
        })
    }
}

/// Bilateral smoothing with fixed parameters; `strength` is ignored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BilateralDenoiser {
    pub diameter: u32,
    pub sigma_color: f32,
    pub sigma_space: f32,
}

impl Default for BilateralDenoiser {
    fn default() -> Self {
        Self {
            diameter: 9,
            sigma_color: 75.0,
            sigma_space: 75.0,
        }
    }
}

impl Denoiser for BilateralDenoiser {
    fn name(&self) -> &'static str {
        "bilateral"
    }

    fn denoise(&self, image: &RgbImage, _strength: f32) -> Result<RgbImage> {
        Ok(bilateral(image, self.diameter, self.sigma_color, self.sigma_space))
    }
}

/// Sauvola thresholding: `T = mean * (1 + k * (stddev / 128 - 1))`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Sauvola;

/// Dynamic range of the standard deviation for 8-bit images.
const SAUVOLA_RANGE: f64 = 128.0;

impl LocalThresholder for Sauvola {
    fn name(&self) -> &'static str {
        "sauvola"
    }

    fn binarize(&self, gray: &GrayImage, params: &BinarizeParams) -> Result<GrayImage> {
        let (w, h) = (gray.width() as usize, gray.height() as usize);
        if w == 0 || h == 0 {
            return Err(Error::Capability(self.name(), "empty image".to_string()));
        }
        if params.window < 3 {
            return Err(Error::Capability(
                self.name(),
                format!("window {} too small", params.window),
            ));
        }

        // Integral images of values and squared values, one row and column of padding
        let stride = w + 1;
        let mut sum = vec![0u64; stride * (h + 1)];
        let mut sq = vec![0u64; stride * (h + 1)];
        for y in 0..h {
            let (mut row, mut row_sq) = (0u64, 0u64);
            for x in 0..w {
                let v = gray.get_pixel(x as u32, y as u32)[0] as u64;
                row += v;
                row_sq += v * v;
                sum[(y + 1) * stride + x + 1] = sum[y * stride + x + 1] + row;
                sq[(y + 1) * stride + x + 1] = sq[y * stride + x + 1] + row_sq;
            }
        }

        let radius = (params.window / 2) as usize;
        let k = params.k as f64;
        let src = gray.as_raw();
        let mut out = vec![0u8; w * h];

        out.par_chunks_mut(w).enumerate().for_each(|(y, row)| {
            let y0 = y.saturating_sub(radius);
            let y1 = (y + radius).min(h - 1) + 1;
            for (x, value) in row.iter_mut().enumerate() {
                let x0 = x.saturating_sub(radius);
                let x1 = (x + radius).min(w - 1) + 1;
                let area = ((x1 - x0) * (y1 - y0)) as f64;
                let rect = |t: &[u64]| {
                    t[y1 * stride + x1] + t[y0 * stride + x0]
                        - t[y0 * stride + x1]
                        - t[y1 * stride + x0]
                };
                let mean = rect(&sum) as f64 / area;
                let variance = (rect(&sq) as f64 / area - mean * mean).max(0.0);
                let threshold = mean * (1.0 + k * (variance.sqrt() / SAUVOLA_RANGE - 1.0));
                *value = if src[y * w + x] as f64 > threshold { 255 } else { 0 };
            }
        });

        GrayImage::from_raw(w as u32, h as u32, out).ok_or_else(|| {
            Error::Capability(self.name(), "output buffer size mismatch".to_string())
        })
    }
}

/// Gaussian-weighted mean thresholding: `T = gaussian_mean - offset`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GaussianAdaptive;

impl LocalThresholder for GaussianAdaptive {
    fn name(&self) -> &'static str {
        "gaussian-adaptive"
    }

    fn binarize(&self, gray: &GrayImage, params: &BinarizeParams) -> Result<GrayImage> {
        Ok(gaussian_adaptive_threshold(gray, params.window, params.offset))
    }
}

/// The denoiser and thresholder injected into the pipeline, each with the
/// basic implementation it falls back to.
#[derive(Debug, Clone)]
pub struct Capabilities {
    denoiser: Arc<dyn Denoiser>,
    thresholder: Arc<dyn LocalThresholder>,
    fallback_denoiser: Arc<dyn Denoiser>,
    fallback_thresholder: Arc<dyn LocalThresholder>,
}

impl Capabilities {
    /// Custom primary implementations backed by the basic fallbacks.
    pub fn new(denoiser: Arc<dyn Denoiser>, thresholder: Arc<dyn LocalThresholder>) -> Self {
        Self {
            denoiser,
            thresholder,
            fallback_denoiser: Arc::new(BilateralDenoiser::default()),
            fallback_thresholder: Arc::new(GaussianAdaptive),
        }
    }

    /// Non-local means denoising and Sauvola thresholding.
    pub fn advanced() -> Self {
        Self::new(Arc::new(NonLocalMeans::default()), Arc::new(Sauvola))
    }

    /// Bilateral smoothing and Gaussian adaptive thresholding.
    pub fn basic() -> Self {
        Self::new(
            Arc::new(BilateralDenoiser::default()),
            Arc::new(GaussianAdaptive),
        )
    }

    /// The advanced set when the `advanced` feature is enabled, else the basic set.
    pub fn detect() -> Self {
        if cfg!(feature = "advanced") {
            Self::advanced()
        } else {
            Self::basic()
        }
    }

    pub fn denoiser_name(&self) -> &'static str {
        self.denoiser.name()
    }

    pub fn thresholder_name(&self) -> &'static str {
        self.thresholder.name()
    }

    /// Denoises with the primary implementation, falling back on error.
    pub fn denoise(&self, image: &RgbImage, strength: f32) -> Result<RgbImage> {
        self.denoiser.denoise(image, strength).or_else(|e| {
            info!(
                "Denoiser '{}' unavailable ({}), using '{}'",
                self.denoiser.name(),
                e,
                self.fallback_denoiser.name()
            );
            self.fallback_denoiser.denoise(image, strength)
        })
    }

    /// Binarizes with the primary implementation, falling back on error.
    pub fn binarize(&self, gray: &GrayImage, params: &BinarizeParams) -> Result<GrayImage> {
        self.thresholder.binarize(gray, params).or_else(|e| {
            info!(
                "Thresholder '{}' unavailable ({}), using '{}'",
                self.thresholder.name(),
                e,
                self.fallback_thresholder.name()
            );
            self.fallback_thresholder.binarize(gray, params)
        })
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::detect()
    }
}
