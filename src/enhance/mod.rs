//! Page enhancement.
//!
//! [`EnhancementPipeline`] turns one decoded page into its cleaned form.
//! Stages always run in the same order:
//!
//! 1. pre-pass toggles (grayscale, autocontrast, bilateral smoothing,
//!    legacy binarization)
//! 2. the preset's stage table
//! 3. content-bound trim with a fixed white margin
//! 4. global contrast and sharpness multipliers
//! 5. optional adaptive-palette dithering
//!
//! The pipeline is a pure function of its inputs: the same page, preset,
//! configuration and capabilities give byte-identical output.

pub mod capability;
pub mod dither;
pub mod ops;
pub mod preset;
pub mod trim;

use derive_builder::Builder;
use image::RgbImage;
use log::debug;

pub use capability::{Capabilities, Denoiser, LocalThresholder};
pub use preset::{BinarizeParams, Preset, Stage};

use crate::error::{Error, Result};
use ops::{
    adjust_contrast, adjust_sharpness, autocontrast, bilateral, clahe, expand_gray,
    gaussian_adaptive_threshold, luma, unsharp_mask,
};
use trim::{TRIM_PADDING, trim_to_content};

/// Per-run enhancement settings.
///
/// Build with [`EnhancementConfigBuilder`]; unset fields take the
/// [`Default`] values and out-of-range multipliers are rejected.
#[derive(Debug, Clone, PartialEq, Builder)]
#[builder(default, setter(into), build_fn(validate = "Self::validate"))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "specta", derive(specta::Type))]
pub struct EnhancementConfig {
    pub preset: Preset,
    /// Convert to luminance and back to three channels before anything else
    pub grayscale_first: bool,
    pub autocontrast: bool,
    /// Bilateral smoothing pre-pass
    pub basic_denoise: bool,
    /// Gaussian adaptive binarization pre-pass
    pub legacy_binarize: bool,
    pub contrast: f32,
    pub sharpness: f32,
    pub dither: bool,
    pub dither_colors: u16,
    /// Pages wider than this are downscaled before processing
    pub target_width: u32,
    pub jpeg_quality: u8,
}

impl Default for EnhancementConfig {
    fn default() -> Self {
        Self {
            preset: Preset::Clean,
            grayscale_first: false,
            autocontrast: true,
            basic_denoise: true,
            legacy_binarize: false,
            contrast: 1.15,
            sharpness: 1.2,
            dither: false,
            dither_colors: 256,
            target_width: 1200,
            jpeg_quality: 84,
        }
    }
}

impl EnhancementConfig {
    pub fn builder() -> EnhancementConfigBuilder {
        EnhancementConfigBuilder::default()
    }
}

impl EnhancementConfigBuilder {
    fn validate(&self) -> std::result::Result<(), String> {
        if let Some(contrast) = self.contrast {
            if !(0.5..=2.0).contains(&contrast) {
                return Err(format!("Contrast {} is outside 0.5..=2.0", contrast));
            }
        }
        if let Some(sharpness) = self.sharpness {
            if !(0.5..=3.0).contains(&sharpness) {
                return Err(format!("Sharpness {} is outside 0.5..=3.0", sharpness));
            }
        }
        if let Some(quality) = self.jpeg_quality {
            if !(50..=100).contains(&quality) {
                return Err(format!("JPEG quality {} is outside 50..=100", quality));
            }
        }
        if let Some(width) = self.target_width {
            if !(800..=2000).contains(&width) {
                return Err(format!("Target width {} is outside 800..=2000", width));
            }
        }
        if let Some(colors) = self.dither_colors {
            if !(2..=256).contains(&colors) {
                return Err(format!("Dither palette size {} is outside 2..=256", colors));
            }
        }
        Ok(())
    }
}

/// Fixed window and offset of the legacy binarization pre-pass.
const LEGACY_BINARIZE_WINDOW: u32 = 35;
const LEGACY_BINARIZE_OFFSET: f32 = 10.0;

/// Runs the enhancement stages on a page with injected capabilities.
#[derive(Debug, Clone, Default)]
pub struct EnhancementPipeline {
    capabilities: Capabilities,
}

impl EnhancementPipeline {
    pub fn new(capabilities: Capabilities) -> Self {
        Self { capabilities }
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Enhances a page with the preset named in `config`.
    pub fn enhance(&self, image: RgbImage, config: &EnhancementConfig) -> Result<RgbImage> {
        self.enhance_with_preset(image, config.preset, config)
    }

    /// Enhances a page with an explicit preset.
    ///
    /// # Errors
    ///
    /// Fails for an empty image, or when a capability and its fallback both
    /// fail. A failing advanced capability alone never fails the page.
    pub fn enhance_with_preset(
        &self,
        image: RgbImage,
        preset: Preset,
        config: &EnhancementConfig,
    ) -> Result<RgbImage> {
        if image.width() == 0 || image.height() == 0 {
            return Err(Error::Unsupported("cannot enhance an empty image".to_string()));
        }
        let mut img = image;

        if config.grayscale_first {
            img = expand_gray(&luma(&img));
        }
        if config.autocontrast {
            autocontrast(&mut img);
        }
        if config.basic_denoise {
            img = bilateral(&img, 9, 75.0, 75.0);
        }
        if config.legacy_binarize {
            img = expand_gray(&gaussian_adaptive_threshold(
                &luma(&img),
                LEGACY_BINARIZE_WINDOW,
                LEGACY_BINARIZE_OFFSET,
            ));
        }

        for stage in preset.stages() {
            debug!("Applying {:?} for preset {}", stage, preset);
            img = self.apply_stage(img, stage)?;
        }

        img = trim_to_content(img, TRIM_PADDING);
        img = adjust_contrast(&img, config.contrast);
        img = adjust_sharpness(&img, config.sharpness);

        if config.dither {
            dither::dither_adaptive(&mut img, config.dither_colors as usize);
        }
        Ok(img)
    }

    fn apply_stage(&self, img: RgbImage, stage: &Stage) -> Result<RgbImage> {
        Ok(match *stage {
            // Equalization works on luminance only; the page leaves as gray
            Stage::Equalize { clip_limit, tiles } => {
                expand_gray(&clahe(&luma(&img), clip_limit, tiles))
            }
            Stage::Sharpen { radius, amount } => unsharp_mask(&img, radius, amount),
            Stage::Denoise { strength } => self.capabilities.denoise(&img, strength)?,
            Stage::Binarize(params) => {
                expand_gray(&self.capabilities.binarize(&luma(&img), &params)?)
            }
        })
    }
}
