//! Source layout profiles and natural ordering.
//!
//! A [`Profile`] knows how a particular scan source names its chapter folders
//! and page files. It turns names into [`SortKey`]s so that `Chapter 2`
//! sorts before `Chapter 10`, while names that carry no number still get a
//! stable lexicographic position after every numbered entry.

use std::cmp::Ordering;
use std::path::Path;

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{Error, Result};
use crate::path_utils::get_file_name_lossy;

lazy_static! {
    /// Mixed-layout sources: "Capítulo 12", "chapter-3", "Ch.7" folders and "...12.jpg" pages.
    pub static ref PROFILE_TMO: Profile = Profile {
        key: "TMO".to_string(),
        label: "TMO (mixed)".to_string(),
        chapter_pattern: Some(Regex::new(r"(?i)(?:cap[ií]tulo|chapter|ch)[^\d]*(\d+)").unwrap()),
        image_pattern: Some(Regex::new(r"(?i)(\d+)\.(?:jpg|jpeg|png|webp)$").unwrap()),
        expects_subfolders: true,
    };
    /// "Chapter XX" folders holding zero-padded "001.jpg" pages.
    pub static ref PROFILE_INMANGA: Profile = Profile {
        key: "INMANGA".to_string(),
        label: "INMANGA (Chapter XX / 001.jpg)".to_string(),
        chapter_pattern: Some(Regex::new(r"(?i)chapter\s*0*?(\d+)$").unwrap()),
        image_pattern: Some(Regex::new(r"(?i)0*?(\d+)\.(?:jpg|jpeg|png|webp)$").unwrap()),
        expects_subfolders: true,
    };
}

/// Identifier of the profile used when none is configured.
pub const DEFAULT_PROFILE_KEY: &str = "INMANGA";

/// Natural-order key extracted from a chapter or image name.
///
/// The derived ordering places every `Numeric` key before every `Text` key,
/// numeric keys ascending by value and text keys lexicographically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SortKey {
    Numeric(u64),
    Text(String),
}

/// A named parsing and ordering strategy for one source layout convention.
#[derive(Debug, Clone)]
pub struct Profile {
    pub key: String,
    pub label: String,
    pub chapter_pattern: Option<Regex>,
    pub image_pattern: Option<Regex>,
    pub expects_subfolders: bool,
}

impl Profile {
    /// Builds a custom profile from user-supplied patterns.
    ///
    /// The first capture group of each pattern (or the whole match when the
    /// pattern has no group) must hold the decimal number used for ordering.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Regex`] when either pattern fails to compile.
    pub fn custom(
        key: impl Into<String>,
        label: impl Into<String>,
        chapter_pattern: Option<&str>,
        image_pattern: Option<&str>,
        expects_subfolders: bool,
    ) -> Result<Self> {
        Ok(Self {
            key: key.into(),
            label: label.into(),
            chapter_pattern: chapter_pattern.map(Regex::new).transpose()?,
            image_pattern: image_pattern.map(Regex::new).transpose()?,
            expects_subfolders,
        })
    }

    /// Looks up a built-in profile by identifier, ignoring case.
    pub fn builtin(key: &str) -> Result<&'static Profile> {
        builtin_profiles()
            .into_iter()
            .find(|p| p.key.eq_ignore_ascii_case(key))
            .ok_or_else(|| Error::NotFound(format!("Unknown source profile '{}'", key)))
    }

    /// Sort key for a chapter directory name.
    pub fn sort_chapter_key(&self, name: &str) -> SortKey {
        Self::sort_key(self.chapter_pattern.as_ref(), name)
    }

    /// Sort key for an image file name.
    pub fn sort_image_key(&self, name: &str) -> SortKey {
        Self::sort_key(self.image_pattern.as_ref(), name)
    }

    /// Compares two chapter directories by their natural-order keys.
    pub fn compare_chapters(&self, a: &Path, b: &Path) -> Ordering {
        self.sort_chapter_key(&get_file_name_lossy(a))
            .cmp(&self.sort_chapter_key(&get_file_name_lossy(b)))
    }

    /// Compares two image files by their natural-order keys.
    pub fn compare_images(&self, a: &Path, b: &Path) -> Ordering {
        self.sort_image_key(&get_file_name_lossy(a))
            .cmp(&self.sort_image_key(&get_file_name_lossy(b)))
    }

    fn sort_key(pattern: Option<&Regex>, name: &str) -> SortKey {
        pattern
            .and_then(|re| re.captures(name))
            .and_then(|cap| cap.get(1).or_else(|| cap.get(0)))
            .and_then(|m| m.as_str().parse::<u64>().ok())
            .map(SortKey::Numeric)
            .unwrap_or_else(|| SortKey::Text(name.to_lowercase()))
    }
}

/// Every built-in profile, in display order.
pub fn builtin_profiles() -> Vec<&'static Profile> {
    vec![&*PROFILE_TMO, &*PROFILE_INMANGA]
}
