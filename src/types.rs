//! Core data types, enums, and reports for the Seisho library.
//!
//! This module defines the fundamental data structures used throughout Seisho:
//! - Discovered content (`Chapter`, `ChapterList`)
//! - Planning structures (`Volume`, `Plan`, `PlanReport`)
//! - Run reporting (`RunEvent`, `RunSummary`, `VolumeOutcome`)
//! - Enumerations for various settings (`CollectionDepth`, `OutputFormat`)

use std::path::{Path, PathBuf};

/// How deeply to scan the source directory for chapters and pages.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "specta", derive(specta::Type))]
pub enum CollectionDepth {
    #[default]
    Deep, // Expects structure: `source_path/chapter_folder/page.jpg`
    Shallow, // Expects structure: `source_path/page.jpg` (the root is one chapter)
}

/// Ebook container produced by a packager.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "specta", derive(specta::Type))]
pub enum OutputFormat {
    #[default]
    Mobi,
    Azw3,
    Epub,
    Cbz,
}

impl OutputFormat {
    /// File extension of the produced artifact, without the leading dot.
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Mobi => "mobi",
            OutputFormat::Azw3 => "azw3",
            OutputFormat::Epub => "epub",
            OutputFormat::Cbz => "cbz",
        }
    }

    /// Value passed to the external packager's `--format` flag.
    pub fn packager_flag(&self) -> &'static str {
        match self {
            OutputFormat::Mobi => "MOBI",
            OutputFormat::Azw3 => "AZW3",
            OutputFormat::Epub => "EPUB",
            OutputFormat::Cbz => "CBZ",
        }
    }
}

/// Ordered set of page images discovered under one logical unit.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Chapter {
    pub name: String,
    pub dir: PathBuf,
    pub images: Vec<PathBuf>,
    pub enabled: bool,
}

impl Chapter {
    pub fn new(name: impl Into<String>, dir: PathBuf, images: Vec<PathBuf>) -> Self {
        Self {
            name: name.into(),
            dir,
            images,
            enabled: true,
        }
    }

    /// Number of page images in this chapter.
    pub fn pages(&self) -> usize {
        self.images.len()
    }
}

/// The discovered chapters of a source, in production order.
///
/// Reordering and enable toggles are the only mutations; chapters are never
/// removed, so a disabled chapter keeps its place and can be re-enabled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChapterList {
    chapters: Vec<Chapter>,
}

impl ChapterList {
    pub fn new(chapters: Vec<Chapter>) -> Self {
        Self { chapters }
    }

    pub fn len(&self) -> usize {
        self.chapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chapters.is_empty()
    }

    pub fn as_slice(&self) -> &[Chapter] {
        &self.chapters
    }

    pub fn get(&self, index: usize) -> Option<&Chapter> {
        self.chapters.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Chapter> {
        self.chapters.iter()
    }

    /// Number of chapters currently enabled for planning.
    pub fn enabled_count(&self) -> usize {
        self.chapters.iter().filter(|c| c.enabled).count()
    }

    /// Swaps the chapter at `index` with its neighbour `delta` positions away.
    ///
    /// Returns the new index of the moved chapter, or `None` when either
    /// position falls outside the list (the list is left untouched).
    pub fn move_chapter(&mut self, index: usize, delta: isize) -> Option<usize> {
        let target = index.checked_add_signed(delta)?;
        if index >= self.chapters.len() || target >= self.chapters.len() {
            return None;
        }
        self.chapters.swap(index, target);
        Some(target)
    }

    /// Flips the enabled flag of the chapter at `index` and returns the new state.
    pub fn toggle_chapter(&mut self, index: usize) -> Option<bool> {
        let chapter = self.chapters.get_mut(index)?;
        chapter.enabled = !chapter.enabled;
        Some(chapter.enabled)
    }
}

impl From<Vec<Chapter>> for ChapterList {
    fn from(chapters: Vec<Chapter>) -> Self {
        Self::new(chapters)
    }
}

impl<'a> IntoIterator for &'a ChapterList {
    type Item = &'a Chapter;
    type IntoIter = std::slice::Iter<'a, Chapter>;

    fn into_iter(self) -> Self::IntoIter {
        self.chapters.iter()
    }
}

/// A numbered group of consecutive enabled chapters, borrowed from the chapter list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume<'a> {
    pub number: u32,
    pub chapters: Vec<&'a Chapter>,
}

impl Volume<'_> {
    /// Sum of the page counts of every chapter in the volume.
    pub fn pages(&self) -> usize {
        self.chapters.iter().map(|c| c.pages()).sum()
    }

    /// Zero-padded volume label, e.g. `v07`.
    pub fn label(&self) -> String {
        format!("v{:02}", self.number)
    }
}

/// The complete ordered list of volumes for a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan<'a> {
    pub volumes: Vec<Volume<'a>>,
}

impl Plan<'_> {
    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }

    pub fn total_pages(&self) -> usize {
        self.volumes.iter().map(|v| v.pages()).sum()
    }

    /// Owned summary of the plan, suitable for display or serialization.
    pub fn report(&self) -> PlanReport {
        let volumes: Vec<PlannedVolume> = self
            .volumes
            .iter()
            .map(|v| PlannedVolume {
                number: v.number,
                pages: v.pages(),
                chapters: v
                    .chapters
                    .iter()
                    .map(|c| (c.name.clone(), c.pages()))
                    .collect(),
            })
            .collect();

        PlanReport {
            total_volumes: volumes.len(),
            total_pages: self.total_pages(),
            volumes,
        }
    }
}

/// Report line for a single planned volume.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "specta", derive(specta::Type))]
pub struct PlannedVolume {
    pub number: u32,
    pub pages: usize,
    pub chapters: Vec<(String, usize)>, // (chapter name, page count)
}

/// Per-volume and total page counts of a plan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "specta", derive(specta::Type))]
pub struct PlanReport {
    pub total_volumes: usize,
    pub total_pages: usize,
    pub volumes: Vec<PlannedVolume>,
}

/// A page that could not be enhanced or written.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "specta", derive(specta::Type))]
pub struct PageFailure {
    pub sequence: u32,
    pub source: PathBuf,
    pub reason: String,
}

/// Final state of one volume after a run.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "specta", derive(specta::Type))]
pub enum VolumeStatus {
    /// The packager produced this artifact.
    Packaged(PathBuf),
    /// Pages were exported but packaging failed.
    Failed(String),
    /// The run was cancelled while this volume was being exported.
    Cancelled,
}

/// What happened to one volume during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "specta", derive(specta::Type))]
pub struct VolumeOutcome {
    pub number: u32,
    pub image_dir: PathBuf,
    pub pages_attempted: usize,
    pub pages_written: usize,
    pub failures: Vec<PageFailure>,
    pub status: VolumeStatus,
}

/// Summary of a production run: volumes produced versus volumes planned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "specta", derive(specta::Type))]
pub struct RunSummary {
    pub volumes_planned: usize,
    pub volumes_produced: usize,
    pub outcomes: Vec<VolumeOutcome>,
    pub cancelled: bool,
}

impl RunSummary {
    pub fn failed_volumes(&self) -> impl Iterator<Item = &VolumeOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, VolumeStatus::Failed(_)))
    }
}

/// Progress notifications emitted while a run is active.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RunEvent {
    Started { volumes: usize },
    VolumeStarted { number: u32, pages: usize },
    PageWritten {
        volume: u32,
        sequence: u32,
        path: PathBuf,
    },
    PageFailed {
        volume: u32,
        sequence: u32,
        source: PathBuf,
        reason: String,
    },
    VolumePackaged { number: u32, artifact: PathBuf },
    VolumeFailed { number: u32, reason: String },
    Finished {
        produced: usize,
        planned: usize,
        cancelled: bool,
    },
}

/// Extensions accepted as page images (compared case-insensitively).
pub const SUPPORTED_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "webp"];

/// Returns true when the path carries one of the supported image extensions.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// assert!(seisho::types::is_supported_image(Path::new("001.JPG")));
/// assert!(!seisho::types::is_supported_image(Path::new("notes.txt")));
/// ```
pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            SUPPORTED_EXTENSIONS
                .iter()
                .any(|s| s.eq_ignore_ascii_case(e))
        })
        .unwrap_or(false)
}
