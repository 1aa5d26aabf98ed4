//! Packagers turn a directory of exported pages into one ebook file.
//!
//! The default packager drives an external converter binary; the CBZ and
//! EPUB packagers build the container in-process. Every packager names its
//! artifact `"<series> - vNN.<ext>"` and never overwrites an existing file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::path_utils::volume_title;
use crate::scanner::SourceScanner;
use crate::types::OutputFormat;

pub mod cbz;
pub mod epub;
pub mod kcc;

pub use cbz::CbzPackager;
pub use epub::EpubPackager;
pub use kcc::KccPackager;

/// Everything a packager needs to know about one volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRequest {
    /// Directory holding the volume's `00001.jpg`, `00002.jpg`, ... pages
    pub image_dir: PathBuf,
    /// Shared directory receiving the finished artifacts
    pub output_dir: PathBuf,
    pub series: String,
    pub volume: u32,
    pub author: Option<String>,
}

impl PackageRequest {
    /// `"<series> - vNN"`, used as the ebook title and artifact stem.
    pub fn title(&self) -> String {
        volume_title(&self.series, self.volume)
    }
}

/// Common interface of all packagers.
#[async_trait]
pub trait Packager: Send + Sync + std::fmt::Debug {
    /// Container produced by this packager.
    fn format(&self) -> OutputFormat;

    /// Packages one volume and returns the path of the artifact.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Packager`](crate::error::Error::Packager) when no
    /// artifact could be produced; the caller records this as a volume
    /// failure and carries on with the next volume.
    async fn package(&self, request: &PackageRequest) -> Result<PathBuf>;
}

/// Which packager a production run uses.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "specta", derive(specta::Type))]
pub enum PackagingProfile {
    /// External converter binary with a device profile (e.g. `KPW`)
    Kcc {
        program: PathBuf,
        device: String,
        format: OutputFormat,
    },
    Cbz,
    Epub,
}

impl Default for PackagingProfile {
    fn default() -> Self {
        PackagingProfile::Kcc {
            program: PathBuf::from(kcc::DEFAULT_PROGRAM),
            device: kcc::DEFAULT_DEVICE.to_string(),
            format: OutputFormat::Mobi,
        }
    }
}

impl PackagingProfile {
    /// Instantiates the packager for this profile.
    pub fn packager(&self) -> Arc<dyn Packager> {
        match self {
            PackagingProfile::Kcc {
                program,
                device,
                format,
            } => Arc::new(KccPackager::new(program.clone(), device.clone(), *format)),
            PackagingProfile::Cbz => Arc::new(CbzPackager),
            PackagingProfile::Epub => Arc::new(EpubPackager),
        }
    }
}

/// The exported JPEG pages of a volume directory, in file name order.
pub(crate) async fn exported_pages(image_dir: &Path) -> Result<Vec<PathBuf>> {
    let (files, _) = SourceScanner::collect_entries(image_dir, false).await?;
    let mut pages: Vec<PathBuf> = files
        .into_iter()
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("jpg"))
        })
        .collect();
    pages.sort();
    Ok(pages)
}
