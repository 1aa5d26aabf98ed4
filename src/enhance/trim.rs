//! Content-bound trimming.
//!
//! Finds the printed area of a page and re-pads it with a fixed white margin,
//! so pages scanned with uneven borders come out framed the same way.

use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::contours::{BorderType, find_contours};
use imageproc::contrast::otsu_level;
use log::debug;

use super::ops::luma;

/// Margin, in pixels, added around the content on every side.
pub const TRIM_PADDING: u32 = 16;

/// Axis-aligned rectangle enclosing every external content contour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentBounds {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Locates the page content.
///
/// The page is binarized with a global Otsu level, pixels at or below the
/// level counting as content. The union of the bounding boxes of the outer
/// contours is returned. A page of a single intensity has no content and
/// yields `None`.
pub fn content_bounds(image: &RgbImage) -> Option<ContentBounds> {
    let gray = luma(image);
    let (min, max) = gray
        .iter()
        .fold((u8::MAX, u8::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if min >= max {
        return None;
    }

    let level = otsu_level(&gray);
    let mask = GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        if gray.get_pixel(x, y)[0] <= level {
            Luma([255])
        } else {
            Luma([0])
        }
    });

    let (mut x0, mut y0, mut x1, mut y1) = (u32::MAX, u32::MAX, 0u32, 0u32);
    let mut found = false;
    for contour in find_contours::<u32>(&mask)
        .iter()
        .filter(|c| c.parent.is_none() && matches!(c.border_type, BorderType::Outer))
    {
        for point in &contour.points {
            found = true;
            x0 = x0.min(point.x);
            y0 = y0.min(point.y);
            x1 = x1.max(point.x);
            y1 = y1.max(point.y);
        }
    }

    found.then(|| ContentBounds {
        x: x0,
        y: y0,
        width: x1 - x0 + 1,
        height: y1 - y0 + 1,
    })
}

/// Crops to the content bounds and pads with `padding` white pixels per side.
///
/// Returns the input unchanged when no content is found.
pub fn trim_to_content(image: RgbImage, padding: u32) -> RgbImage {
    let Some(bounds) = content_bounds(&image) else {
        debug!("No content contour found, skipping trim");
        return image;
    };

    let cropped =
        image::imageops::crop_imm(&image, bounds.x, bounds.y, bounds.width, bounds.height)
            .to_image();
    let mut canvas = RgbImage::from_pixel(
        bounds.width + 2 * padding,
        bounds.height + 2 * padding,
        Rgb([255, 255, 255]),
    );
    image::imageops::replace(&mut canvas, &cropped, padding as i64, padding as i64);
    canvas
}
