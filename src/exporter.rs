//! Sequential page export.
//!
//! The exporter walks one [`Volume`] page by page, runs each page through the
//! [`EnhancementPipeline`] and writes it as `00001.jpg`, `00002.jpg`, ... into
//! the volume's staging directory. The sequence counter advances for every
//! page attempted, so a page that fails leaves a gap instead of shifting the
//! names of the pages after it.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use image::imageops::FilterType;
use image::{ImageReader, RgbImage};
use jpeg_encoder::{ColorType, Encoder, SamplingFactor};
use log::{debug, info, warn};
use tokio::fs;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::spawn_blocking;

use crate::enhance::{EnhancementConfig, EnhancementPipeline};
use crate::error::{Error, Result};
use crate::path_utils::sequence_file_name;
use crate::types::{PageFailure, RunEvent, Volume};

/// Shared cancellation flag, checked between pages and between volumes.
///
/// A page that is already being transformed always runs to completion.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Result of exporting the pages of one volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedVolume {
    pub number: u32,
    pub image_dir: PathBuf,
    pub pages_attempted: usize,
    pub pages_written: usize,
    pub failures: Vec<PageFailure>,
    pub cancelled: bool,
}

/// Writes enhanced pages of a volume in plan order.
#[derive(Debug, Clone)]
pub struct SequentialExporter {
    pipeline: EnhancementPipeline,
    config: Arc<EnhancementConfig>,
    events: Option<UnboundedSender<RunEvent>>,
    cancellation: CancellationToken,
}

impl SequentialExporter {
    pub fn new(pipeline: EnhancementPipeline, config: EnhancementConfig) -> Self {
        Self {
            pipeline,
            config: Arc::new(config),
            events: None,
            cancellation: CancellationToken::new(),
        }
    }

    /// Streams page events to `events`.
    pub fn with_events(mut self, events: UnboundedSender<RunEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn config(&self) -> &EnhancementConfig {
        &self.config
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub(crate) fn emit(&self, event: RunEvent) {
        if let Some(events) = &self.events {
            // A dropped receiver only means nobody is listening any more
            let _ = events.send(event);
        }
    }

    /// Exports every page of `volume` into `image_dir`.
    ///
    /// The directory is cleared and recreated first, so re-exporting a volume
    /// never leaves stale pages from an earlier run. Page failures are logged
    /// and recorded in the returned [`ExportedVolume`]; only failing to
    /// prepare the directory is an error.
    pub async fn export_volume(
        &self,
        volume: &Volume<'_>,
        image_dir: &Path,
    ) -> Result<ExportedVolume> {
        reset_dir(image_dir).await?;

        let mut exported = ExportedVolume {
            number: volume.number,
            image_dir: image_dir.to_path_buf(),
            pages_attempted: 0,
            pages_written: 0,
            failures: Vec::new(),
            cancelled: false,
        };
        let mut sequence: u32 = 0;

        'pages: for chapter in &volume.chapters {
            debug!(
                "Exporting chapter '{}' ({} pages) into {}",
                chapter.name,
                chapter.pages(),
                volume.label()
            );
            for source in &chapter.images {
                if self.cancellation.is_cancelled() {
                    info!(
                        "Cancellation requested, stopping {} after {} page(s)",
                        volume.label(),
                        sequence
                    );
                    exported.cancelled = true;
                    break 'pages;
                }

                sequence += 1;
                exported.pages_attempted += 1;
                let target = image_dir.join(sequence_file_name(sequence));

                match self.export_page(source, &target).await {
                    Ok(()) => {
                        exported.pages_written += 1;
                        self.emit(RunEvent::PageWritten {
                            volume: volume.number,
                            sequence,
                            path: target,
                        });
                    }
                    Err(e) => {
                        warn!(
                            "Skipping page {:?} ({} #{}): {}",
                            source,
                            volume.label(),
                            sequence,
                            e
                        );
                        self.emit(RunEvent::PageFailed {
                            volume: volume.number,
                            sequence,
                            source: source.clone(),
                            reason: e.to_string(),
                        });
                        exported.failures.push(PageFailure {
                            sequence,
                            source: source.clone(),
                            reason: e.to_string(),
                        });
                    }
                }
            }
        }

        info!(
            "{}: {}/{} page(s) written to {:?}",
            volume.label(),
            exported.pages_written,
            exported.pages_attempted,
            image_dir
        );
        Ok(exported)
    }

    /// Decodes, enhances and writes one page on the blocking pool.
    pub async fn export_page(&self, source: &Path, target: &Path) -> Result<()> {
        let pipeline = self.pipeline.clone();
        let config = Arc::clone(&self.config);
        let source = source.to_path_buf();
        let target = target.to_path_buf();

        spawn_blocking(move || {
            let page = prepare_page(&source, config.target_width)?;
            let enhanced = pipeline.enhance(page, &config)?;
            write_jpeg(&enhanced, &target, config.jpeg_quality)
        })
        .await
        .map_err(|e| Error::AsyncTaskError(e.to_string()))?
    }
}

/// Decodes a page as RGB and downscales it to `target_width` when wider.
///
/// The aspect ratio is kept and pages are never upscaled.
pub fn prepare_page(path: &Path, target_width: u32) -> Result<RgbImage> {
    let decoded = ImageReader::open(path)?.with_guessed_format()?.decode()?;
    let page = decoded.to_rgb8();
    let (w, h) = page.dimensions();
    if target_width == 0 || w <= target_width {
        return Ok(page);
    }

    let new_h = ((h as f64 * target_width as f64 / w as f64).round() as u32).max(1);
    Ok(image::imageops::resize(&page, target_width, new_h, FilterType::Lanczos3))
}

/// Encodes `image` as a progressive 4:4:4 JPEG with optimized Huffman tables.
pub fn write_jpeg(image: &RgbImage, path: &Path, quality: u8) -> Result<()> {
    let (w, h) = image.dimensions();
    let (Ok(width), Ok(height)) = (u16::try_from(w), u16::try_from(h)) else {
        return Err(Error::Unsupported(format!("{}x{} exceeds the JPEG size limit", w, h)));
    };

    let writer = BufWriter::new(File::create(path)?);
    let mut encoder = Encoder::new(writer, quality);
    encoder.set_progressive(true);
    encoder.set_optimized_huffman_tables(true);
    // 4:4:4, no chroma subsampling
    encoder.set_sampling_factor(SamplingFactor::F_1_1);
    encoder.encode(image.as_raw(), width, height, ColorType::Rgb)?;
    Ok(())
}

/// Removes `dir` if present and creates it empty.
pub(crate) async fn reset_dir(dir: &Path) -> Result<()> {
    match fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    fs::create_dir_all(dir).await?;
    Ok(())
}
