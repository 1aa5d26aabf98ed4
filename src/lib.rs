//! Seisho - Manga Scan to E-Reader Volume Library
//!
//! This crate turns a directory of scanned manga chapters into e-reader
//! volumes. It discovers chapters and pages in natural order, groups enabled
//! chapters into numbered volumes, cleans every page through a configurable
//! enhancement pipeline, writes the pages as sequentially named JPEGs and
//! hands each volume to a packager (an external converter, CBZ or EPUB).
//!
//! # Getting Started
//!
//! Configure a run with [`ProductionConfig::builder`], scan the source to get
//! a [`ChapterList`], adjust it if needed, then start the run.
//!
//! ```rust,no_run
//! use seisho::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> seisho::error::Result<()> {
//!     let config = ProductionConfig::builder()
//!         .series_title("Vagabond")
//!         .author("Takehiko Inoue")
//!         .source_path("./scans/vagabond")
//!         .work_dir("./work")
//!         .group_size(8u32)
//!         .packaging(PackagingProfile::Cbz)
//!         .enhancement(
//!             EnhancementConfig::builder()
//!                 .preset(Preset::OldLowContrast)
//!                 .jpeg_quality(90u8)
//!                 .build()?,
//!         )
//!         .build()?;
//!     config.preflight_check()?;
//!
//!     // 1. Discover chapters and pages
//!     let mut chapters = config.scan().await?.chapters;
//!
//!     // 2. Leave the extras out of the volumes
//!     if let Some(index) = chapters.iter().position(|c| c.name == "Extras") {
//!         chapters.toggle_chapter(index);
//!     }
//!     let report = config.plan_report(&chapters);
//!     println!("{} volume(s), {} page(s)", report.total_volumes, report.total_pages);
//!
//!     // 3. Produce the volumes
//!     let summary = Production::new(config).run(&chapters).await?;
//!     println!("{}/{} volume(s) produced", summary.volumes_produced, summary.volumes_planned);
//!     Ok(())
//! }
//! ```
//!
//! Long runs can be started in the background through a
//! [`ProductionSession`], which allows one active run at a time and exposes
//! cooperative cancellation.

pub mod enhance;
pub mod error;
pub mod exporter;
pub mod packager;
pub mod path_utils;
pub mod planner;
pub mod production;
pub mod profile;
pub mod scanner;
pub mod types;

pub use production::{
    Production, ProductionConfig, ProductionConfigBuilder, ProductionSession, RunHandle,
};

// Re-export error and core types for direct access
pub use types::{
    Chapter, ChapterList, CollectionDepth, OutputFormat, PageFailure, Plan, PlanReport,
    PlannedVolume, RunEvent, RunSummary, Volume, VolumeOutcome, VolumeStatus,
};

/// Prelude module for convenient imports.
///
/// Re-exports the types needed to configure, plan and run a production with a
/// single `use seisho::prelude::*;` statement.
pub mod prelude {
    pub use super::{
        Chapter, ChapterList, CollectionDepth, OutputFormat, PageFailure, Plan, PlanReport,
        PlannedVolume, Production, ProductionConfig, ProductionConfigBuilder, ProductionSession,
        RunEvent, RunHandle, RunSummary, Volume, VolumeOutcome, VolumeStatus, error, types,
    };
    pub use crate::enhance::{
        Capabilities, EnhancementConfig, EnhancementConfigBuilder, EnhancementPipeline, Preset,
    };
    pub use crate::exporter::{CancellationToken, SequentialExporter};
    pub use crate::packager::{
        CbzPackager, EpubPackager, KccPackager, PackageRequest, Packager, PackagingProfile,
    };
    pub use crate::planner::VolumePlanner;
    pub use crate::profile::Profile;
    pub use crate::scanner::{ScanOutcome, SourceScanner};
    pub use std::path::{Path, PathBuf};
    pub use std::sync::Arc;
}
