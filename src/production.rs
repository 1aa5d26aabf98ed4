//! Production runs: configuration, orchestration and the single-flight session.
//!
//! A run takes an immutable snapshot of the chapter list and configuration,
//! plans volumes, exports each volume's pages into `<work>/temp/vol_NN/` and
//! hands the directory to a [`Packager`] that writes into `<work>/ebooks/`.
//! Only a failed precondition aborts a run; page and volume failures are
//! recorded in the [`RunSummary`] and the run continues.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{error, info, warn};
use regex::Regex;
use tokio::fs;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use crate::enhance::{Capabilities, EnhancementConfig, EnhancementPipeline};
use crate::error::{Error, Result};
use crate::exporter::{CancellationToken, SequentialExporter, reset_dir};
use crate::packager::{PackageRequest, Packager, PackagingProfile};
use crate::path_utils::volume_dir_name;
use crate::planner::VolumePlanner;
use crate::profile::{DEFAULT_PROFILE_KEY, Profile};
use crate::scanner::{ScanOutcome, SourceScanner};
use crate::types::{
    ChapterList, CollectionDepth, PlanReport, RunEvent, RunSummary, VolumeOutcome, VolumeStatus,
};

/// Settings of a production run, built with [`ProductionConfig::builder`].
///
/// ```rust,no_run
/// # use seisho::prelude::*;
/// # fn main() -> seisho::error::Result<()> {
/// let config = ProductionConfig::builder()
///     .series_title("Berserk")
///     .source_path("./scans/berserk")
///     .work_dir("./work")
///     .group_size(8u32)
///     .build()?;
/// config.preflight_check()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, derive_builder::Builder)]
#[builder(setter(into, strip_option), build_fn(validate = "Self::validate"))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "specta", derive(specta::Type))]
pub struct ProductionConfig {
    /// Series name used in volume titles; the source directory name when blank.
    #[builder(default)]
    pub series_title: String,

    #[builder(default)]
    pub author: Option<String>,

    /// Directory holding chapter folders, or the pages themselves in flat mode.
    #[builder(default)]
    pub source_path: PathBuf,

    /// Holds the `temp/` staging area and the `ebooks/` output directory.
    #[builder(default)]
    pub work_dir: PathBuf,

    /// Built-in profile identifier (`TMO`, `INMANGA`).
    #[builder(default = "DEFAULT_PROFILE_KEY.to_string()")]
    pub profile: String,

    /// Custom chapter ordering pattern; replaces the built-in profile's when set.
    #[builder(default)]
    pub chapter_pattern: Option<String>,

    /// Custom image ordering pattern; replaces the built-in profile's when set.
    #[builder(default)]
    pub image_pattern: Option<String>,

    /// `Deep` scans chapter subfolders, `Shallow` treats the source as one chapter.
    #[builder(default = "CollectionDepth::Deep")]
    pub collection_depth: CollectionDepth,

    /// Chapters per volume.
    #[builder(default = "10")]
    pub group_size: u32,

    /// Number of the first volume.
    #[builder(default = "1")]
    pub start_volume: u32,

    /// Wipe `<work>/temp` at run start.
    #[builder(default = "true")]
    pub clean_temp: bool,

    /// Wipe `<work>/ebooks` at run start.
    #[builder(default = "true")]
    pub clean_output: bool,

    #[builder(default)]
    pub packaging: PackagingProfile,

    #[builder(default)]
    pub enhancement: EnhancementConfig,
}

impl ProductionConfigBuilder {
    fn validate(&self) -> std::result::Result<(), String> {
        if let Some(Some(pattern)) = &self.chapter_pattern {
            if Regex::new(pattern).is_err() {
                return Err(format!("Invalid chapter pattern: {}", pattern));
            }
        }
        if let Some(Some(pattern)) = &self.image_pattern {
            if Regex::new(pattern).is_err() {
                return Err(format!("Invalid image pattern: {}", pattern));
            }
        }
        if let Some(key) = &self.profile {
            if Profile::builtin(key).is_err() {
                return Err(format!("Unknown source profile '{}'", key));
            }
        }
        if self.group_size == Some(0) {
            return Err("Group size must be at least 1".to_string());
        }
        if self.start_volume == Some(0) {
            return Err("Start volume must be at least 1".to_string());
        }
        Ok(())
    }
}

impl ProductionConfig {
    pub fn builder() -> ProductionConfigBuilder {
        ProductionConfigBuilder::default()
    }

    /// Checks everything that must hold before a run touches the filesystem.
    ///
    /// # Errors
    ///
    /// [`Error::Precondition`] when the source directory is unset, missing or
    /// not a directory, when no work directory is set, or when no series
    /// title can be derived.
    pub fn preflight_check(&self) -> Result<&Self> {
        if self.source_path.as_os_str().is_empty() {
            return Err(Error::Precondition("No source directory selected".to_string()));
        }
        if !self.source_path.is_dir() {
            return Err(Error::Precondition(format!(
                "Source directory {:?} does not exist or is not a directory",
                self.source_path
            )));
        }
        if self.work_dir.as_os_str().is_empty() {
            return Err(Error::Precondition("No work directory selected".to_string()));
        }
        if self.resolved_series_title().is_empty() {
            return Err(Error::Precondition("Series title is empty".to_string()));
        }
        Ok(self)
    }

    /// The configured series title, or the source directory name when blank.
    pub fn resolved_series_title(&self) -> String {
        let title = self.series_title.trim();
        if !title.is_empty() {
            return title.to_string();
        }
        if self.source_path.as_os_str().is_empty() {
            return String::new();
        }
        // `.` and `..` have no file name until resolved
        let name = match self.source_path.file_name() {
            Some(name) => Some(name.to_os_string()),
            None => std::fs::canonicalize(&self.source_path)
                .ok()
                .and_then(|path| path.file_name().map(|name| name.to_os_string())),
        };
        name.map(|name| name.to_string_lossy().trim().to_string())
            .unwrap_or_default()
    }

    /// The ordering profile: the built-in one, with any custom patterns applied.
    pub fn resolve_profile(&self) -> Result<Arc<Profile>> {
        let builtin = Profile::builtin(&self.profile)?;
        if self.chapter_pattern.is_none() && self.image_pattern.is_none() {
            return Ok(Arc::new(builtin.clone()));
        }
        let mut profile = builtin.clone();
        if let Some(pattern) = &self.chapter_pattern {
            profile.chapter_pattern = Some(Regex::new(pattern)?);
        }
        if let Some(pattern) = &self.image_pattern {
            profile.image_pattern = Some(Regex::new(pattern)?);
        }
        profile.key = "CUSTOM".to_string();
        profile.label = format!("Custom ({})", builtin.key);
        Ok(Arc::new(profile))
    }

    pub fn planner(&self) -> VolumePlanner {
        VolumePlanner::new(self.group_size, self.start_volume)
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.work_dir.join("temp")
    }

    pub fn ebooks_dir(&self) -> PathBuf {
        self.work_dir.join("ebooks")
    }

    /// Staging directory of one volume, e.g. `<work>/temp/vol_03`.
    pub fn volume_dir(&self, volume: u32) -> PathBuf {
        self.temp_dir().join(volume_dir_name(volume))
    }

    /// Scans the source directory with the configured profile and depth.
    pub async fn scan(&self) -> Result<ScanOutcome> {
        if self.source_path.as_os_str().is_empty() {
            return Err(Error::Precondition("No source directory selected".to_string()));
        }
        let profile = self.resolve_profile()?;
        SourceScanner::new(&self.source_path, profile, self.collection_depth)
            .scan()
            .await
    }

    /// Page counts of the plan the current chapter list would produce.
    pub fn plan_report(&self, chapters: &ChapterList) -> PlanReport {
        self.planner().plan(chapters).report()
    }
}

/// One production run with its collaborators.
#[derive(Debug, Clone)]
pub struct Production {
    config: Arc<ProductionConfig>,
    pipeline: EnhancementPipeline,
    packager: Arc<dyn Packager>,
    events: Option<UnboundedSender<RunEvent>>,
    cancellation: CancellationToken,
}

impl Production {
    /// A run with detected capabilities and the configured packager.
    pub fn new(config: ProductionConfig) -> Self {
        let packager = config.packaging.packager();
        Self {
            config: Arc::new(config),
            pipeline: EnhancementPipeline::new(Capabilities::detect()),
            packager,
            events: None,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.pipeline = EnhancementPipeline::new(capabilities);
        self
    }

    pub fn with_packager(mut self, packager: Arc<dyn Packager>) -> Self {
        self.packager = packager;
        self
    }

    pub fn with_events(mut self, events: UnboundedSender<RunEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn config(&self) -> &ProductionConfig {
        &self.config
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    fn emit(&self, event: RunEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    /// Produces every planned volume from `chapters`.
    ///
    /// # Errors
    ///
    /// Only [`Error::Precondition`] (bad configuration, no enabled chapter)
    /// and failures to prepare the work directories are returned; both
    /// happen before any page is exported.
    pub async fn run(&self, chapters: &ChapterList) -> Result<RunSummary> {
        let config = &self.config;
        config.preflight_check()?;

        if chapters.enabled_count() == 0 {
            return Err(Error::Precondition("No enabled chapters to produce".to_string()));
        }
        let plan = config.planner().plan(chapters);

        let temp_dir = config.temp_dir();
        let ebooks_dir = config.ebooks_dir();
        for (dir, clean) in [(&temp_dir, config.clean_temp), (&ebooks_dir, config.clean_output)] {
            if clean {
                reset_dir(dir).await?;
            } else {
                fs::create_dir_all(dir).await?;
            }
        }

        let series = config.resolved_series_title();
        let mut exporter =
            SequentialExporter::new(self.pipeline.clone(), config.enhancement.clone())
                .with_cancellation(self.cancellation.clone());
        if let Some(events) = &self.events {
            exporter = exporter.with_events(events.clone());
        }

        let capabilities = self.pipeline.capabilities();
        info!(
            "Producing '{}': {} volume(s), {} page(s), packager {:?}, denoiser {}, thresholder {}",
            series,
            plan.volumes.len(),
            plan.total_pages(),
            self.packager.format(),
            capabilities.denoiser_name(),
            capabilities.thresholder_name()
        );
        self.emit(RunEvent::Started {
            volumes: plan.volumes.len(),
        });

        let mut summary = RunSummary {
            volumes_planned: plan.volumes.len(),
            ..Default::default()
        };

        for volume in &plan.volumes {
            if self.cancellation.is_cancelled() {
                info!("Cancellation requested before {}", volume.label());
                summary.cancelled = true;
                break;
            }

            self.emit(RunEvent::VolumeStarted {
                number: volume.number,
                pages: volume.pages(),
            });
            let image_dir = config.volume_dir(volume.number);

            let exported = match exporter.export_volume(volume, &image_dir).await {
                Ok(exported) => exported,
                Err(e) => {
                    let reason = format!("Could not prepare {:?}: {}", image_dir, e);
                    error!("{}: {}", volume.label(), reason);
                    self.emit(RunEvent::VolumeFailed {
                        number: volume.number,
                        reason: reason.clone(),
                    });
                    summary.outcomes.push(VolumeOutcome {
                        number: volume.number,
                        image_dir,
                        pages_attempted: 0,
                        pages_written: 0,
                        failures: Vec::new(),
                        status: VolumeStatus::Failed(reason),
                    });
                    continue;
                }
            };

            let mut outcome = VolumeOutcome {
                number: exported.number,
                image_dir: exported.image_dir.clone(),
                pages_attempted: exported.pages_attempted,
                pages_written: exported.pages_written,
                failures: exported.failures,
                status: VolumeStatus::Cancelled,
            };

            // A partially exported volume is left on disk but never packaged
            if exported.cancelled {
                summary.cancelled = true;
                summary.outcomes.push(outcome);
                break;
            }

            outcome.status = if outcome.pages_written == 0 {
                let reason = "No page could be exported".to_string();
                warn!("{}: {}", volume.label(), reason);
                self.emit(RunEvent::VolumeFailed {
                    number: volume.number,
                    reason: reason.clone(),
                });
                VolumeStatus::Failed(reason)
            } else {
                let request = PackageRequest {
                    image_dir: exported.image_dir,
                    output_dir: ebooks_dir.clone(),
                    series: series.clone(),
                    volume: volume.number,
                    author: config.author.clone(),
                };
                match self.packager.package(&request).await {
                    Ok(artifact) => {
                        summary.volumes_produced += 1;
                        self.emit(RunEvent::VolumePackaged {
                            number: volume.number,
                            artifact: artifact.clone(),
                        });
                        VolumeStatus::Packaged(artifact)
                    }
                    Err(e) => {
                        warn!("{}: packaging failed: {}", volume.label(), e);
                        self.emit(RunEvent::VolumeFailed {
                            number: volume.number,
                            reason: e.to_string(),
                        });
                        VolumeStatus::Failed(e.to_string())
                    }
                }
            };
            summary.outcomes.push(outcome);
        }

        info!(
            "Run finished: {}/{} volume(s) produced{}",
            summary.volumes_produced,
            summary.volumes_planned,
            if summary.cancelled { " (cancelled)" } else { "" }
        );
        self.emit(RunEvent::Finished {
            produced: summary.volumes_produced,
            planned: summary.volumes_planned,
            cancelled: summary.cancelled,
        });
        Ok(summary)
    }
}

/// Clears the session's active flag when the run task ends, even by panic.
struct ActiveGuard(Arc<AtomicBool>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Handle to a run executing in the background.
#[derive(Debug)]
pub struct RunHandle {
    task: JoinHandle<Result<RunSummary>>,
    cancellation: CancellationToken,
}

impl RunHandle {
    /// Requests cooperative cancellation; the run stops at the next page or
    /// volume boundary.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the run and returns its summary.
    pub async fn wait(self) -> Result<RunSummary> {
        self.task.await?
    }
}

/// Allows at most one active production run at a time.
#[derive(Debug, Clone, Default)]
pub struct ProductionSession {
    active: Arc<AtomicBool>,
}

impl ProductionSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Starts `production` on a background task over a snapshot of `chapters`.
    ///
    /// Returns `None`, without side effects, while another run is active.
    /// Must be called from within a tokio runtime.
    pub fn start(&self, production: Production, chapters: ChapterList) -> Option<RunHandle> {
        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            info!("A production run is already active; ignoring start request");
            return None;
        }

        let guard = ActiveGuard(Arc::clone(&self.active));
        let cancellation = production.cancellation().clone();
        let task = tokio::spawn(async move {
            let _guard = guard;
            production.run(&chapters).await
        });

        Some(RunHandle { task, cancellation })
    }
}
