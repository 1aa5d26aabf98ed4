use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Local;
use log::info;
use memmap2::MmapOptions;
use tokio::fs;
use tokio::task::spawn_blocking;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::{PackageRequest, Packager, exported_pages};
use crate::error::{Error, Result};
use crate::path_utils::{collision_free_path, get_file_name_lossy, sanitize_filename};
use crate::types::OutputFormat;

/// Packages a volume as a Comic Book ZIP with a `ComicInfo.xml` entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct CbzPackager;

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Builds the `ComicInfo.xml` document for a volume.
pub fn comic_info(request: &PackageRequest, page_count: usize) -> String {
    let writer = request
        .author
        .as_deref()
        .map(|a| format!("  <Writer>{}</Writer>\n", escape_xml(a)))
        .unwrap_or_default();
    format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\
         <ComicInfo xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\" xmlns:xsd=\"http://www.w3.org/2001/XMLSchema\">\n\
         \x20 <Title>{}</Title>\n\
         \x20 <Series>{}</Series>\n\
         \x20 <Volume>{}</Volume>\n\
         {}\
         \x20 <PageCount>{}</PageCount>\n\
         \x20 <Manga>YesAndRightToLeft</Manga>\n\
         </ComicInfo>\n",
        escape_xml(&request.title()),
        escape_xml(&request.series),
        request.volume,
        writer,
        page_count
    )
}

fn write_archive(target: &Path, pages: &[PathBuf], comic_info: &str) -> Result<()> {
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o644);
    let mut zip = ZipWriter::new(File::create(target)?);

    for page in pages {
        let file = File::open(page)?;
        // SAFETY: the staging directory is owned by the running export
        let mmap = unsafe { MmapOptions::new().map(&file)? };
        zip.start_file(get_file_name_lossy(page), options)?;
        zip.write_all(&mmap[..])?;
    }

    zip.start_file("ComicInfo.xml", options)?;
    zip.write_all(comic_info.as_bytes())?;
    zip.finish()?;
    Ok(())
}

#[async_trait]
impl Packager for CbzPackager {
    fn format(&self) -> OutputFormat {
        OutputFormat::Cbz
    }

    async fn package(&self, request: &PackageRequest) -> Result<PathBuf> {
        let pages = exported_pages(&request.image_dir).await?;
        if pages.is_empty() {
            return Err(Error::Packager(format!("No pages to package for '{}'", request.title())));
        }
        fs::create_dir_all(&request.output_dir).await?;

        let target = collision_free_path(
            &request.output_dir,
            &sanitize_filename(&request.title()),
            OutputFormat::Cbz.extension(),
            Local::now(),
        );
        let xml = comic_info(request, pages.len());
        let archive = target.clone();

        spawn_blocking(move || write_archive(&archive, &pages, &xml))
            .await
            .map_err(|e| Error::AsyncTaskError(e.to_string()))?
            .map_err(|e| Error::Packager(format!("Failed to write {:?}: {}", target, e)))?;

        info!("Packaged {:?}", target);
        Ok(target)
    }
}
