//! Packaging through an external comic converter binary.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use chrono::Local;
use log::{debug, info};
use tokio::fs;
use tokio::process::Command;

use super::{PackageRequest, Packager};
use crate::error::{Error, Result};
use crate::path_utils::{collision_free_path, sanitize_filename};
use crate::types::OutputFormat;

/// Converter executable looked up on `PATH` by default.
pub const DEFAULT_PROGRAM: &str = "kcc-c2e";
/// Kindle Paperwhite device profile.
pub const DEFAULT_DEVICE: &str = "KPW";

/// Runs the converter once per volume and renames its newest artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KccPackager {
    program: PathBuf,
    device: String,
    format: OutputFormat,
}

impl Default for KccPackager {
    fn default() -> Self {
        Self::new(
            PathBuf::from(DEFAULT_PROGRAM),
            DEFAULT_DEVICE.to_string(),
            OutputFormat::Mobi,
        )
    }
}

impl KccPackager {
    pub fn new(
        program: impl Into<PathBuf>,
        device: impl Into<String>,
        format: OutputFormat,
    ) -> Self {
        Self {
            program: program.into(),
            device: device.into(),
            format,
        }
    }

    /// Command-line arguments for one volume.
    pub fn arguments(&self, request: &PackageRequest) -> Vec<String> {
        let mut args = vec![
            "--manga-style".to_string(),
            "--profile".to_string(),
            self.device.clone(),
            "--stretch".to_string(),
            "--upscale".to_string(),
            "--format".to_string(),
            self.format.packager_flag().to_string(),
            "--title".to_string(),
            request.title(),
        ];
        if let Some(author) = request.author.as_deref().filter(|a| !a.trim().is_empty()) {
            args.push("--author".to_string());
            args.push(author.to_string());
        }
        args.push("--output".to_string());
        args.push(request.output_dir.to_string_lossy().to_string());
        args.push(request.image_dir.to_string_lossy().to_string());
        args
    }

    /// Files in `dir` carrying this packager's extension, with their modification times.
    async fn artifacts(&self, dir: &Path) -> Result<Vec<(PathBuf, SystemTime)>> {
        let mut found = Vec::new();
        let mut entries = fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let matches = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case(self.format.extension()));
            if !matches {
                continue;
            }
            if let Ok(meta) = entry.metadata().await {
                if meta.is_file() {
                    found.push((path, meta.modified().unwrap_or(SystemTime::UNIX_EPOCH)));
                }
            }
        }
        Ok(found)
    }
}

#[async_trait]
impl Packager for KccPackager {
    fn format(&self) -> OutputFormat {
        self.format
    }

    async fn package(&self, request: &PackageRequest) -> Result<PathBuf> {
        fs::create_dir_all(&request.output_dir).await?;
        let before: HashSet<(PathBuf, SystemTime)> = self
            .artifacts(&request.output_dir)
            .await?
            .into_iter()
            .collect();

        let args = self.arguments(request);
        debug!("Running {:?} {:?}", self.program, args);
        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .await
            .map_err(|e| Error::Packager(format!("Failed to launch {:?}: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Packager(format!(
                "{:?} exited with {} for '{}': {}",
                self.program,
                output.status,
                request.title(),
                stderr.trim()
            )));
        }

        // Newest artifact that did not exist, or was rewritten, during this call
        let newest = self
            .artifacts(&request.output_dir)
            .await?
            .into_iter()
            .filter(|a| !before.contains(a))
            .max_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)))
            .map(|(path, _)| path)
            .ok_or_else(|| {
                Error::Packager(format!(
                    "No .{} artifact produced for '{}'",
                    self.format.extension(),
                    request.title()
                ))
            })?;

        let stem = sanitize_filename(&request.title());
        let file_name = format!("{}.{}", stem, self.format.extension());
        let wanted = request.output_dir.join(file_name);
        if newest == wanted {
            info!("Packaged {:?}", newest);
            return Ok(newest);
        }

        let target = collision_free_path(
            &request.output_dir,
            &stem,
            self.format.extension(),
            Local::now(),
        );
        fs::rename(&newest, &target).await?;
        info!("Packaged {:?}", target);
        Ok(target)
    }
}
