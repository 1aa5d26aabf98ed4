//! Chapter discovery for a source directory.
//!
//! This module walks a root directory with a [`Profile`], collecting chapter
//! folders and their page images in natural order. Directory reads run on
//! tokio with a bounded number of concurrent chapter scans; an entry that
//! cannot be read is counted and skipped rather than failing the scan.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::try_join_all;
use log::{debug, info, warn};
use rayon::prelude::*;
use tokio::fs::{metadata, read_dir};
use tokio::spawn;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::path_utils::{get_file_name_lossy, is_hidden_file};
use crate::profile::Profile;
use crate::types::{Chapter, ChapterList, CollectionDepth, is_supported_image};

/// Upper bound on concurrent chapter folder reads
const MAX_CONCURRENT_DIRS: usize = 64;

/// Consecutive entry read errors after which a directory listing is abandoned
const MAX_ENTRY_FAILURES_IN_A_ROW: usize = 8;

/// Result of scanning a source directory.
#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    pub chapters: ChapterList,
    /// Directory entries that could not be read and were ignored.
    pub skipped_entries: usize,
}

/// Walks a root directory and produces an ordered chapter list.
#[derive(Debug, Clone)]
pub struct SourceScanner {
    root: PathBuf,
    profile: Arc<Profile>,
    collection_depth: CollectionDepth,
}

impl SourceScanner {
    /// Creates a new scanner.
    ///
    /// # Arguments
    ///
    /// * `root` - Directory holding chapter folders or page images
    /// * `profile` - Naming convention used to order chapters and pages
    /// * `collection_depth` - `Deep` reads subfolders as chapters; `Shallow` reads the root as one
    pub fn new(
        root: impl Into<PathBuf>,
        profile: Arc<Profile>,
        collection_depth: CollectionDepth,
    ) -> Self {
        Self {
            root: root.into(),
            profile,
            collection_depth,
        }
    }

    /// Whether subfolders are scanned as chapters, which needs both the
    /// profile and the configured depth to agree.
    pub fn uses_subfolders(&self) -> bool {
        self.profile.expects_subfolders && self.collection_depth == CollectionDepth::Deep
    }

    /// Scans the root directory.
    ///
    /// Every chapter starts enabled. Subfolders without any supported image
    /// are dropped instead of being recorded as empty chapters.
    ///
    /// # Errors
    ///
    /// Fails only when the root directory itself cannot be read.
    pub async fn scan(&self) -> Result<ScanOutcome> {
        let outcome = if self.uses_subfolders() {
            self.scan_subfolders().await?
        } else {
            self.scan_flat().await?
        };

        info!(
            "Scan complete: {} chapter(s) under {:?} (profile={}, skipped={})",
            outcome.chapters.len(),
            self.root,
            self.profile.key,
            outcome.skipped_entries
        );
        Ok(outcome)
    }

    async fn scan_flat(&self) -> Result<ScanOutcome> {
        let (images, skipped) = Self::collect_images(&self.root, Arc::clone(&self.profile)).await?;
        let mut chapters = Vec::new();
        if !images.is_empty() {
            let name = get_file_name_lossy(&self.root);
            chapters.push(Chapter::new(name, self.root.clone(), images));
        }
        Ok(ScanOutcome {
            chapters: ChapterList::new(chapters),
            skipped_entries: skipped,
        })
    }

    async fn scan_subfolders(&self) -> Result<ScanOutcome> {
        let (mut chapter_dirs, mut skipped) = Self::collect_entries(&self.root, true).await?;
        let profile = Arc::clone(&self.profile);
        chapter_dirs.par_sort_by(|a, b| profile.compare_chapters(a, b).then_with(|| by_name(a, b)));

        let semaphore =
            Arc::new(Semaphore::new((num_cpus::get() * 4).clamp(4, MAX_CONCURRENT_DIRS)));
        let mut handles: Vec<JoinHandle<Result<Option<(Vec<PathBuf>, usize)>>>> = Vec::new();

        for chapter_dir in chapter_dirs.iter().cloned() {
            let semaphore = Arc::clone(&semaphore);
            let profile = Arc::clone(&self.profile);

            handles.push(spawn(async move {
                let _permit = semaphore.acquire().await?;
                match Self::collect_images(&chapter_dir, profile).await {
                    Ok(found) => Ok(Some(found)),
                    Err(e) => {
                        warn!("Skipping unreadable chapter {:?}: {}", chapter_dir, e);
                        Ok(None)
                    }
                }
            }));
        }

        let results = try_join_all(handles).await.map_err(|e| {
            Error::AsyncTaskError(format!("Failed to join page collection tasks: {}", e))
        })?;

        let mut chapters = Vec::new();
        for (dir, res) in chapter_dirs.into_iter().zip(results) {
            match res? {
                Some((images, dir_skipped)) => {
                    skipped += dir_skipped;
                    if images.is_empty() {
                        debug!("Dropping {:?}: no supported images", dir);
                        continue;
                    }
                    chapters.push(Chapter::new(get_file_name_lossy(&dir), dir, images));
                }
                None => skipped += 1,
            }
        }

        Ok(ScanOutcome {
            chapters: ChapterList::new(chapters),
            skipped_entries: skipped,
        })
    }

    /// Collects the supported images directly inside `directory`, in natural order.
    ///
    /// # Returns
    ///
    /// * `Result<(Vec<PathBuf>, usize)>` - Sorted image paths and the number of skipped entries
    pub async fn collect_images(
        directory: &Path,
        profile: Arc<Profile>,
    ) -> Result<(Vec<PathBuf>, usize)> {
        let (files, skipped) = Self::collect_entries(directory, false).await?;
        let mut images: Vec<PathBuf> = files
            .into_iter()
            .filter(|p| is_supported_image(p))
            .collect();
        images.par_sort_by(|a, b| profile.compare_images(a, b).then_with(|| by_name(a, b)));
        Ok((images, skipped))
    }

    /// Lists the visible entries of a directory, keeping only directories or only files.
    ///
    /// Entries that cannot be read are counted and skipped. Reading stops
    /// early only when the directory keeps failing on consecutive entries.
    ///
    /// # Arguments
    ///
    /// * `directory` - Directory to scan
    /// * `only_dirs` - When true, only directories are collected; when false, only files
    pub async fn collect_entries(
        directory: &Path,
        only_dirs: bool,
    ) -> Result<(Vec<PathBuf>, usize)> {
        let mut entries: Vec<PathBuf> = Vec::new();
        let mut skipped = 0usize;

        let mut paths = read_dir(directory).await?;
        let mut failures_in_a_row = 0usize;

        loop {
            let entry = match paths.next_entry().await {
                Ok(Some(entry)) => {
                    failures_in_a_row = 0;
                    entry
                }
                Ok(None) => break,
                Err(e) => {
                    skipped += 1;
                    failures_in_a_row += 1;
                    if failures_in_a_row >= MAX_ENTRY_FAILURES_IN_A_ROW {
                        warn!("Giving up on {:?} after repeated errors: {}", directory, e);
                        break;
                    }
                    warn!("Skipping unreadable entry in {:?}: {}", directory, e);
                    continue;
                }
            };
            let path = entry.path();

            if is_hidden_file(&path) {
                continue;
            }

            // Follows symlinks, so linked chapter folders are picked up too
            let is_dir = match metadata(&path).await {
                Ok(meta) => meta.is_dir(),
                Err(e) => {
                    debug!("Skipping unreadable entry {:?}: {}", path, e);
                    skipped += 1;
                    continue;
                }
            };
            if only_dirs != is_dir {
                continue;
            }

            entries.push(path);
        }

        Ok((entries, skipped))
    }
}

/// Tie-breaker keeping equal sort keys in a filesystem-independent order.
fn by_name(a: &Path, b: &Path) -> Ordering {
    a.file_name().cmp(&b.file_name())
}
