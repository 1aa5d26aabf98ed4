//! Pixel operations used by the enhancement pipeline.
//!
//! Every function here is pure and deterministic: the same input always
//! yields byte-identical output. Row-parallel loops only ever write the row
//! they own, so the thread count never changes a result.

use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::filter::gaussian_blur_f32;
use rayon::prelude::*;

/// Converts to single-channel luminance.
pub fn luma(image: &RgbImage) -> GrayImage {
    image::imageops::grayscale(image)
}

/// Expands a single-channel image back into three identical channels.
pub fn expand_gray(gray: &GrayImage) -> RgbImage {
    RgbImage::from_fn(gray.width(), gray.height(), |x, y| {
        let v = gray.get_pixel(x, y)[0];
        Rgb([v, v, v])
    })
}

/// Per-channel histogram stretch so each channel spans 0..=255.
///
/// A channel holding a single value is left unchanged.
pub fn autocontrast(image: &mut RgbImage) {
    let mut lo = [u8::MAX; 3];
    let mut hi = [u8::MIN; 3];
    for p in image.pixels() {
        for c in 0..3 {
            lo[c] = lo[c].min(p[c]);
            hi[c] = hi[c].max(p[c]);
        }
    }

    let luts: [[u8; 256]; 3] = std::array::from_fn(|c| stretch_lut(lo[c], hi[c]));
    for p in image.pixels_mut() {
        for c in 0..3 {
            p[c] = luts[c][p[c] as usize];
        }
    }
}

fn stretch_lut(lo: u8, hi: u8) -> [u8; 256] {
    let mut lut: [u8; 256] = std::array::from_fn(|v| v as u8);
    if hi <= lo {
        return lut;
    }
    let scale = 255.0 / (hi - lo) as f32;
    for (v, out) in lut.iter_mut().enumerate() {
        let stretched = (v as f32 - lo as f32) * scale;
        *out = stretched.round().clamp(0.0, 255.0) as u8;
    }
    lut
}

/// Edge-preserving bilateral smoothing.
///
/// Neighbours within a disc of `diameter / 2` pixels are weighted by spatial
/// distance and by the L1 colour distance to the centre pixel. Out-of-bounds
/// neighbours are clamped to the border.
pub fn bilateral(image: &RgbImage, diameter: u32, sigma_color: f32, sigma_space: f32) -> RgbImage {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return image.clone();
    }
    let radius = (diameter / 2).max(1) as i64;

    let mut spatial: Vec<(i64, i64, f32)> = Vec::new();
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            let d2 = (dx * dx + dy * dy) as f32;
            if d2 > (radius * radius) as f32 {
                continue;
            }
            spatial.push((dx, dy, (-d2 / (2.0 * sigma_space * sigma_space)).exp()));
        }
    }
    let color_weight: Vec<f32> = (0..=255 * 3)
        .map(|d| {
            let d = d as f32;
            (-(d * d) / (2.0 * sigma_color * sigma_color)).exp()
        })
        .collect();

    let src = image.as_raw();
    let stride = w as usize * 3;
    let mut out = vec![0u8; src.len()];

    out.par_chunks_mut(stride).enumerate().for_each(|(y, row)| {
        for x in 0..w as usize {
            let centre = &src[y * stride + x * 3..][..3];
            let mut acc = [0f32; 3];
            let mut norm = 0f32;
            for &(dx, dy, ws) in &spatial {
                let sx = (x as i64 + dx).clamp(0, w as i64 - 1) as usize;
                let sy = (y as i64 + dy).clamp(0, h as i64 - 1) as usize;
                let p = &src[sy * stride + sx * 3..][..3];
                let dist: usize = (0..3).map(|c| p[c].abs_diff(centre[c]) as usize).sum();
                let weight = ws * color_weight[dist];
                for c in 0..3 {
                    acc[c] += p[c] as f32 * weight;
                }
                norm += weight;
            }
            for c in 0..3 {
                row[x * 3 + c] = (acc[c] / norm).round().clamp(0.0, 255.0) as u8;
            }
        }
    });

    RgbImage::from_raw(w, h, out).unwrap_or_else(|| image.clone())
}

/// Gaussian-weighted local mean threshold.
///
/// A pixel becomes white when it is brighter than the Gaussian mean of its
/// `block_size` neighbourhood minus `offset`, black otherwise.
pub fn gaussian_adaptive_threshold(gray: &GrayImage, block_size: u32, offset: f32) -> GrayImage {
    if gray.width() == 0 || gray.height() == 0 {
        return gray.clone();
    }
    let sigma = (0.3 * ((block_size as f32 - 1.0) * 0.5 - 1.0) + 0.8).max(0.5);
    let mean = gaussian_blur_f32(gray, sigma);
    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        let v = gray.get_pixel(x, y)[0] as f32;
        let t = mean.get_pixel(x, y)[0] as f32 - offset;
        if v > t { Luma([255]) } else { Luma([0]) }
    })
}

/// Contrast-limited adaptive histogram equalization.
///
/// The image is divided into at most `tiles` x `tiles` tiles. Each tile gets
/// a clipped, redistributed histogram mapping; pixels are mapped through a
/// bilinear blend of the four nearest tile mappings.
pub fn clahe(gray: &GrayImage, clip_limit: f32, tiles: u32) -> GrayImage {
    let (w, h) = gray.dimensions();
    if w == 0 || h == 0 {
        return gray.clone();
    }
    let tile_w = w.div_ceil(tiles.clamp(1, w));
    let tile_h = h.div_ceil(tiles.clamp(1, h));
    let tiles_x = w.div_ceil(tile_w);
    let tiles_y = h.div_ceil(tile_h);

    let luts: Vec<[u8; 256]> = (0..tiles_x * tiles_y)
        .into_par_iter()
        .map(|i| {
            let x0 = (i % tiles_x) * tile_w;
            let y0 = (i / tiles_x) * tile_h;
            let (tw, th) = (tile_w.min(w - x0), tile_h.min(h - y0));
            tile_lut(gray, x0, y0, tw, th, clip_limit)
        })
        .collect();

    // (first tile, second tile, weight of the second)
    let axis = |pos: u32, size: u32, count: u32| -> (usize, usize, f32) {
        let f = (pos as f32 + 0.5) / size as f32 - 0.5;
        let first = f.floor();
        let weight = f - first;
        let last = count as i64 - 1;
        let a = (first as i64).clamp(0, last) as usize;
        let b = (first as i64 + 1).clamp(0, last) as usize;
        (a, b, weight)
    };
    let columns: Vec<(usize, usize, f32)> = (0..w).map(|x| axis(x, tile_w, tiles_x)).collect();

    let src = gray.as_raw();
    let mut out = vec![0u8; src.len()];
    let stride = tiles_x as usize;
    out.par_chunks_mut(w as usize)
        .enumerate()
        .for_each(|(y, row)| {
            let (ty1, ty2, ay) = axis(y as u32, tile_h, tiles_y);
            for (x, value) in row.iter_mut().enumerate() {
                let (tx1, tx2, ax) = columns[x];
                let v = src[y * w as usize + x] as usize;
                let top = luts[ty1 * stride + tx1][v] as f32 * (1.0 - ax)
                    + luts[ty1 * stride + tx2][v] as f32 * ax;
                let bottom = luts[ty2 * stride + tx1][v] as f32 * (1.0 - ax)
                    + luts[ty2 * stride + tx2][v] as f32 * ax;
                *value = (top * (1.0 - ay) + bottom * ay).round().clamp(0.0, 255.0) as u8;
            }
        });

    GrayImage::from_raw(w, h, out).unwrap_or_else(|| gray.clone())
}

fn tile_lut(gray: &GrayImage, x0: u32, y0: u32, tw: u32, th: u32, clip_limit: f32) -> [u8; 256] {
    let mut hist = [0u32; 256];
    for y in y0..y0 + th {
        for x in x0..x0 + tw {
            hist[gray.get_pixel(x, y)[0] as usize] += 1;
        }
    }
    let area = tw * th;

    if clip_limit > 0.0 {
        let limit = ((clip_limit * area as f32 / 256.0) as u32).max(1);
        let mut excess = 0u32;
        for bin in hist.iter_mut() {
            if *bin > limit {
                excess += *bin - limit;
                *bin = limit;
            }
        }
        let batch = excess / 256;
        let residual = excess % 256;
        for bin in hist.iter_mut() {
            *bin += batch;
        }
        if residual > 0 {
            let step = (256 / residual).max(1) as usize;
            for bin in hist.iter_mut().step_by(step).take(residual as usize) {
                *bin += 1;
            }
        }
    }

    let scale = 255.0 / area as f32;
    let mut lut = [0u8; 256];
    let mut cumulative = 0u32;
    for (v, bin) in hist.iter().enumerate() {
        cumulative += bin;
        lut[v] = (cumulative as f32 * scale).round().min(255.0) as u8;
    }
    lut
}

/// Unsharp mask: `src * (1 + amount) - gaussian(src, radius) * amount`.
pub fn unsharp_mask(image: &RgbImage, radius: f32, amount: f32) -> RgbImage {
    if image.width() == 0 || image.height() == 0 {
        return image.clone();
    }
    let blurred = gaussian_blur_f32(image, radius.max(0.1));
    let mut out = image.clone();
    for (o, b) in out.iter_mut().zip(blurred.iter()) {
        let v = *o as f32 * (1.0 + amount) - *b as f32 * amount;
        *o = v.round().clamp(0.0, 255.0) as u8;
    }
    out
}

/// Scales contrast around the mean luminance.
///
/// `factor` 1.0 returns the image unchanged, 0.0 a flat grey page.
pub fn adjust_contrast(image: &RgbImage, factor: f32) -> RgbImage {
    let gray = luma(image);
    let count = gray.len();
    if count == 0 {
        return image.clone();
    }
    let total: u64 = gray.iter().map(|&v| v as u64).sum();
    let mean = (total as f64 / count as f64 + 0.5).floor() as f32;
    blend(image, |_| mean, factor)
}

/// Scales sharpness relative to a 3x3 smoothed copy.
///
/// `factor` 1.0 returns the image unchanged, below 1.0 softens, above 1.0
/// sharpens.
pub fn adjust_sharpness(image: &RgbImage, factor: f32) -> RgbImage {
    let smooth = smooth3x3(image);
    let smooth = smooth.as_raw();
    blend(image, |i| smooth[i] as f32, factor)
}

/// `degenerate + factor * (src - degenerate)` per subpixel.
fn blend<F>(image: &RgbImage, degenerate: F, factor: f32) -> RgbImage
where
    F: Fn(usize) -> f32,
{
    let mut out = image.clone();
    for (i, v) in out.iter_mut().enumerate() {
        let base = degenerate(i);
        let blended = base + factor * (*v as f32 - base);
        *v = blended.round().clamp(0.0, 255.0) as u8;
    }
    out
}

/// Smoothing kernel `[1 1 1; 1 5 1; 1 1 1] / 13`; border pixels are copied.
fn smooth3x3(image: &RgbImage) -> RgbImage {
    let (w, h) = (image.width() as usize, image.height() as usize);
    let mut out = image.clone();
    if w < 3 || h < 3 {
        return out;
    }
    let src = image.as_raw();
    let stride = w * 3;

    out.par_chunks_mut(stride)
        .enumerate()
        .filter(|(y, _)| *y > 0 && *y < h - 1)
        .for_each(|(y, row)| {
            for x in 1..w - 1 {
                for c in 0..3 {
                    let mut sum = 0u32;
                    for dy in 0..3 {
                        for dx in 0..3 {
                            let p = src[(y + dy - 1) * stride + (x + dx - 1) * 3 + c] as u32;
                            sum += if dx == 1 && dy == 1 { p * 5 } else { p };
                        }
                    }
                    row[x * 3 + c] = ((sum as f32) / 13.0).round() as u8;
                }
            }
        });
    out
}
