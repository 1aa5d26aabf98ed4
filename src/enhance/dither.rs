//! Adaptive palette quantization with Floyd-Steinberg error diffusion.

use std::collections::HashMap;

use image::imageops::ColorMap;
use image::{Rgb, RgbImage};

/// A palette derived from the colours of one image by median cut.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdaptivePalette {
    colors: Vec<Rgb<u8>>,
}

type Bucket = Vec<([u8; 3], u32)>;

impl AdaptivePalette {
    /// Builds a palette of at most `max_colors` entries.
    ///
    /// The colour histogram is split repeatedly along the channel with the
    /// widest range of the widest bucket, at the pixel-weighted median. Each
    /// bucket contributes its weighted mean colour.
    pub fn median_cut(image: &RgbImage, max_colors: usize) -> Self {
        let mut histogram: HashMap<[u8; 3], u32> = HashMap::new();
        for p in image.pixels() {
            *histogram.entry(p.0).or_insert(0) += 1;
        }
        let mut initial: Bucket = histogram.into_iter().collect();
        initial.sort_unstable();

        let mut buckets: Vec<Bucket> = vec![initial];
        while buckets.len() < max_colors.max(1) {
            let Some((index, channel)) = widest_bucket(&buckets) else {
                break;
            };
            let mut bucket = buckets.remove(index);
            bucket.sort_unstable_by_key(|(color, _)| (color[channel], *color));

            let total: u64 = bucket.iter().map(|(_, n)| *n as u64).sum();
            let mut running = 0u64;
            let mut split = bucket.len() - 1;
            for (i, (_, n)) in bucket.iter().enumerate() {
                running += *n as u64;
                if running * 2 >= total {
                    split = i + 1;
                    break;
                }
            }
            let split = split.clamp(1, bucket.len() - 1);
            let upper = bucket.split_off(split);
            buckets.insert(index, upper);
            buckets.insert(index, bucket);
        }

        let colors = buckets
            .iter()
            .filter(|b| !b.is_empty())
            .map(|b| mean_color(b))
            .collect();
        Self { colors }
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    pub fn colors(&self) -> &[Rgb<u8>] {
        &self.colors
    }
}

/// Bucket index and channel with the largest spread among splittable buckets.
fn widest_bucket(buckets: &[Bucket]) -> Option<(usize, usize)> {
    let mut best: Option<(usize, usize, u8)> = None;
    for (i, bucket) in buckets.iter().enumerate() {
        if bucket.len() < 2 {
            continue;
        }
        for channel in 0..3 {
            let (lo, hi) = bucket
                .iter()
                .fold((u8::MAX, u8::MIN), |(lo, hi), (c, _)| {
                    (lo.min(c[channel]), hi.max(c[channel]))
                });
            let range = hi - lo;
            if best.is_none_or(|(_, _, r)| range > r) {
                best = Some((i, channel, range));
            }
        }
    }
    best.map(|(i, channel, _)| (i, channel))
}

fn mean_color(bucket: &[([u8; 3], u32)]) -> Rgb<u8> {
    let mut sums = [0u64; 3];
    let mut count = 0u64;
    for (color, n) in bucket {
        for c in 0..3 {
            sums[c] += color[c] as u64 * *n as u64;
        }
        count += *n as u64;
    }
    let count = count.max(1);
    Rgb(std::array::from_fn(|c| ((sums[c] + count / 2) / count) as u8))
}

impl ColorMap for AdaptivePalette {
    type Color = Rgb<u8>;

    fn index_of(&self, color: &Rgb<u8>) -> usize {
        let mut best = 0usize;
        let mut best_dist = u32::MAX;
        for (i, candidate) in self.colors.iter().enumerate() {
            let dist: u32 = (0..3)
                .map(|c| {
                    let d = color[c] as i32 - candidate[c] as i32;
                    (d * d) as u32
                })
                .sum();
            if dist < best_dist {
                best = i;
                best_dist = dist;
            }
        }
        best
    }

    fn map_color(&self, color: &mut Rgb<u8>) {
        if let Some(mapped) = self.colors.get(self.index_of(color)) {
            *color = *mapped;
        }
    }
}

/// Quantizes `image` in place to an adaptive palette of `max_colors`,
/// diffusing the error Floyd-Steinberg style.
pub fn dither_adaptive(image: &mut RgbImage, max_colors: usize) {
    let palette = AdaptivePalette::median_cut(image, max_colors);
    if palette.is_empty() {
        return;
    }
    image::imageops::dither(image, &palette);
}
