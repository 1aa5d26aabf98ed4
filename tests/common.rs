//! Common test utilities for the Seisho crate.
//!
//! Provides unique test directories, synthetic page images and a recording
//! packager that stands in for the external converter.

use async_trait::async_trait;
use image::{Rgb, RgbImage};
use rand::{Rng, distributions::Alphanumeric};
use seisho::error::{Error, Result};
use seisho::packager::{PackageRequest, Packager};
use seisho::types::OutputFormat;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tokio::fs;

#[allow(dead_code)]
pub const TEST_TMP_DIR: &str = "tests/tmp";
#[allow(dead_code)]
pub const LONG_TEST_TIMEOUT: Duration = Duration::from_secs(120);

/// A unique directory tree for one test, removed again on drop.
#[allow(dead_code)]
pub struct TestDirs {
    pub root: PathBuf,
    pub source_dir: PathBuf,
    pub work_dir: PathBuf,
}

impl Drop for TestDirs {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.root);
    }
}

/// Creates `tests/tmp/<name>-<random>/source` and returns the paths.
///
/// The work directory is only named, not created, so tests can check that a
/// run creates it.
#[allow(dead_code)]
pub async fn setup_test_dirs(name: &str) -> TestDirs {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    let root = PathBuf::from(TEST_TMP_DIR).join(format!("{}-{}", name, suffix));
    let source_dir = root.join("source");
    let work_dir = root.join("work");
    fs::create_dir_all(&source_dir).await.unwrap();

    TestDirs {
        root,
        source_dir,
        work_dir,
    }
}

/// Writes a small scanned-page look-alike: white paper, a dark panel and a
/// gray caption line, framed by an empty margin.
#[allow(dead_code)]
pub async fn create_page(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let page = RgbImage::from_fn(120, 160, |x, y| {
        if (20..100).contains(&x) && (24..90).contains(&y) {
            Rgb([20, 20, 20])
        } else if (30..90).contains(&x) && (110..118).contains(&y) {
            Rgb([110, 110, 110])
        } else {
            Rgb([250, 250, 250])
        }
    });
    let target = path.to_path_buf();
    tokio::task::spawn_blocking(move || page.save_with_format(target, image::ImageFormat::Jpeg))
        .await
        .map_err(|e| Error::AsyncTaskError(e.to_string()))?
        .map_err(Error::Image)?;
    Ok(())
}

/// Creates `count` pages named `001.jpg`, `002.jpg`, ... in `dir`.
#[allow(dead_code)]
pub async fn create_chapter(dir: &Path, count: usize) -> Result<()> {
    for i in 1..=count {
        create_page(&dir.join(format!("{:03}.jpg", i))).await?;
    }
    Ok(())
}

/// Writes a file with an image extension that cannot be decoded.
#[allow(dead_code)]
pub async fn create_corrupt_page(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::write(path, b"this is not a jpeg").await?;
    Ok(())
}

/// Sorted file names inside `dir`.
#[allow(dead_code)]
pub async fn file_names(dir: &Path) -> Vec<String> {
    let mut names = Vec::new();
    let mut entries = fs::read_dir(dir).await.unwrap();
    while let Some(entry) = entries.next_entry().await.unwrap() {
        names.push(entry.file_name().to_string_lossy().to_string());
    }
    names.sort();
    names
}

/// Reads one entry of a ZIP container (CBZ or EPUB) as text.
#[allow(dead_code)]
pub fn read_zip_entry(archive: &Path, name: &str) -> String {
    let file = std::fs::File::open(archive).unwrap();
    let mut zip = zip::ZipArchive::new(file).unwrap();
    let mut entry = zip.by_name(name).unwrap();
    let mut content = String::new();
    std::io::Read::read_to_string(&mut entry, &mut content).unwrap();
    content
}

/// Entry names of a ZIP container.
#[allow(dead_code)]
pub fn zip_entry_names(archive: &Path) -> Vec<String> {
    let file = std::fs::File::open(archive).unwrap();
    let zip = zip::ZipArchive::new(file).unwrap();
    zip.file_names().map(|n| n.to_string()).collect()
}

/// Packager double: records every request and writes a placeholder artifact.
#[allow(dead_code)]
#[derive(Debug, Default)]
pub struct RecordingPackager {
    pub requests: Mutex<Vec<PackageRequest>>,
    /// Volumes for which packaging fails
    pub fail_volumes: Vec<u32>,
    /// Cancelled right after the first volume is packaged
    pub cancel_after_first: Option<seisho::exporter::CancellationToken>,
}

#[allow(dead_code)]
impl RecordingPackager {
    pub fn failing(volumes: &[u32]) -> Self {
        Self {
            fail_volumes: volumes.to_vec(),
            ..Default::default()
        }
    }

    pub fn requests(&self) -> Vec<PackageRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Packager for RecordingPackager {
    fn format(&self) -> OutputFormat {
        OutputFormat::Cbz
    }

    async fn package(&self, request: &PackageRequest) -> Result<PathBuf> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(token) = &self.cancel_after_first {
            token.cancel();
        }
        if self.fail_volumes.contains(&request.volume) {
            return Err(Error::Packager(format!("refused {}", request.title())));
        }
        let artifact = request.output_dir.join(format!("{}.cbz", request.title()));
        fs::write(&artifact, b"placeholder").await?;
        Ok(artifact)
    }
}
