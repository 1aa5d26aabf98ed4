//! Enhancement presets and their stage tables.

use std::fmt;
use std::str::FromStr;

use log::warn;

use crate::error::Error;

/// A named configuration of enhancement stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "specta", derive(specta::Type))]
pub enum Preset {
    /// Clean modern scans: local contrast equalization and mild sharpening.
    #[default]
    Clean,
    /// Old or washed-out scans: stronger equalization.
    OldLowContrast,
    /// Scans with visible JPEG blocking: denoise first, then sharpen.
    JpegArtifacts,
    /// Small black-and-white lettering: local binarization.
    SmallText,
    /// No preset transform; only trimming and the global fine-tune apply.
    CropOnly,
}

/// One preset-specific processing step with its parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Stage {
    /// Tile-based local contrast equalization on luminance.
    Equalize { clip_limit: f32, tiles: u32 },
    /// Unsharp masking: `src * (1 + amount) - blur(src, radius) * amount`.
    Sharpen { radius: f32, amount: f32 },
    /// Multi-channel denoising through the injected denoiser.
    Denoise { strength: f32 },
    /// Local adaptive binarization through the injected thresholder.
    Binarize(BinarizeParams),
}

/// Parameters for local binarization.
///
/// `k` drives the Sauvola-style thresholder, `offset` the Gaussian-mean
/// fallback (threshold = local mean - offset).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BinarizeParams {
    pub window: u32,
    pub k: f32,
    pub offset: f32,
}

const CLEAN_STAGES: [Stage; 2] = [
    Stage::Equalize {
        clip_limit: 2.0,
        tiles: 8,
    },
    Stage::Sharpen {
        radius: 1.0,
        amount: 0.6,
    },
];

const OLD_LOW_CONTRAST_STAGES: [Stage; 2] = [
    Stage::Equalize {
        clip_limit: 2.6,
        tiles: 8,
    },
    Stage::Sharpen {
        radius: 1.0,
        amount: 0.5,
    },
];

const JPEG_ARTIFACT_STAGES: [Stage; 2] = [
    Stage::Denoise { strength: 6.0 },
    Stage::Sharpen {
        radius: 1.2,
        amount: 0.6,
    },
];

const SMALL_TEXT_STAGES: [Stage; 1] = [Stage::Binarize(BinarizeParams {
    window: 35,
    k: 0.2,
    offset: 10.0,
})];

impl Preset {
    /// Every preset, in display order.
    pub const ALL: [Preset; 5] = [
        Preset::Clean,
        Preset::OldLowContrast,
        Preset::JpegArtifacts,
        Preset::SmallText,
        Preset::CropOnly,
    ];

    /// The ordered stage list this preset runs before trimming.
    pub fn stages(&self) -> &'static [Stage] {
        match self {
            Preset::Clean => &CLEAN_STAGES,
            Preset::OldLowContrast => &OLD_LOW_CONTRAST_STAGES,
            Preset::JpegArtifacts => &JPEG_ARTIFACT_STAGES,
            Preset::SmallText => &SMALL_TEXT_STAGES,
            Preset::CropOnly => &[],
        }
    }

    /// Stable identifier, accepted back by [`FromStr`].
    pub fn identifier(&self) -> &'static str {
        match self {
            Preset::Clean => "clean",
            Preset::OldLowContrast => "old-low-contrast",
            Preset::JpegArtifacts => "jpeg-artifacts",
            Preset::SmallText => "small-text",
            Preset::CropOnly => "crop-only",
        }
    }

    /// Human readable label.
    pub fn label(&self) -> &'static str {
        match self {
            Preset::Clean => "Clean manga (fast)",
            Preset::OldLowContrast => "Old manga / low contrast",
            Preset::JpegArtifacts => "Scan with JPEG artifacts",
            Preset::SmallText => "Small B/W text (crisp lettering)",
            Preset::CropOnly => "Crop and margins only",
        }
    }

    /// Resolves an identifier or label, falling back to [`Preset::CropOnly`]
    /// (no preset transform) when nothing matches.
    pub fn from_identifier(name: &str) -> Preset {
        name.parse().unwrap_or_else(|_| {
            warn!("Unknown preset '{}', applying no preset transform", name);
            Preset::CropOnly
        })
    }
}

impl FromStr for Preset {
    type Err = Error;

    /// Case-insensitive prefix match against identifiers and labels.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_lowercase();
        const PREFIXES: [(&str, Preset); 9] = [
            ("clean", Preset::Clean),
            ("old", Preset::OldLowContrast),
            ("low-contrast", Preset::OldLowContrast),
            ("low contrast", Preset::OldLowContrast),
            ("jpeg", Preset::JpegArtifacts),
            ("scan with jpeg", Preset::JpegArtifacts),
            ("small", Preset::SmallText),
            ("text", Preset::SmallText),
            ("crop", Preset::CropOnly),
        ];
        PREFIXES
            .iter()
            .find(|(prefix, _)| name.starts_with(prefix))
            .map(|(_, preset)| *preset)
            .ok_or_else(|| Error::NotFound(format!("Unknown preset '{}'", s)))
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.identifier())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifiers_round_trip() {
        for preset in Preset::ALL {
            assert_eq!(preset.identifier().parse::<Preset>().unwrap(), preset);
        }
    }

    #[test]
    fn test_labels_resolve_by_prefix() {
        for preset in Preset::ALL {
            assert_eq!(Preset::from_identifier(preset.label()), preset);
        }
        assert_eq!(Preset::from_identifier("CLEAN manga"), Preset::Clean);
    }

    #[test]
    fn test_unknown_preset_is_no_op() {
        assert!("vintage".parse::<Preset>().is_err());
        assert_eq!(Preset::from_identifier("vintage"), Preset::CropOnly);
        assert!(Preset::CropOnly.stages().is_empty());
    }

    #[test]
    fn test_stage_parameters() {
        assert_eq!(
            Preset::OldLowContrast.stages()[0],
            Stage::Equalize {
                clip_limit: 2.6,
                tiles: 8
            }
        );
        assert_eq!(
            Preset::JpegArtifacts.stages()[1],
            Stage::Sharpen {
                radius: 1.2,
                amount: 0.6
            }
        );
    }
}
