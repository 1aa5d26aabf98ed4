use std::fs::File;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Local;
use epub_builder::{EpubBuilder, EpubContent, EpubVersion, MetadataOpfV3, ZipLibrary};
use log::info;
use memmap2::MmapOptions;
use tokio::fs;
use tokio::task::spawn_blocking;

use super::{PackageRequest, Packager, exported_pages};
use crate::error::{Error, Result};
use crate::path_utils::{collision_free_path, sanitize_filename};
use crate::types::OutputFormat;

const STYLESHEET: &str = "body { margin: 0; padding: 0; text-align: center; }\n\
img { max-width: 100%; max-height: 100%; }\n";

/// Packages a volume as a fixed-layout, right-to-left image EPUB.
#[derive(Debug, Clone, Copy, Default)]
pub struct EpubPackager;

/// XHTML wrapper page for a single image, sized to the image.
fn page_xhtml(image_src: &str, title: &str, width: u32, height: u32) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <!DOCTYPE html>\n\
         <html xmlns=\"http://www.w3.org/1999/xhtml\" xmlns:epub=\"http://www.idpf.org/2007/ops\">\n\
         <head><title>{title}</title>\
         <meta name=\"viewport\" content=\"width={width}, height={height}\"/>\
         <link rel=\"stylesheet\" type=\"text/css\" href=\"stylesheet.css\"/></head>\n\
         <body><div><img src=\"{src}\" alt=\"{title}\"/></div></body>\n\
         </html>\n",
        title = title,
        src = image_src,
        width = width,
        height = height
    )
}

/// `rendition:*` properties marking the book as fixed-layout.
const FIXED_LAYOUT_PROPERTIES: [(&str, &str); 2] = [
    ("rendition:layout", "pre-paginated"),
    ("rendition:spread", "none"),
];

fn fixed_layout_metadata() -> Vec<MetadataOpfV3> {
    FIXED_LAYOUT_PROPERTIES
        .iter()
        .map(|(property, value)| MetadataOpfV3::new(property.to_string(), value.to_string()))
        .collect()
}

fn build_epub(target: &Path, request: &PackageRequest, pages: &[PathBuf]) -> Result<()> {
    let mut epub = EpubBuilder::new(ZipLibrary::new()?)?;
    epub.epub_version(EpubVersion::V30);
    epub.stylesheet(STYLESHEET.as_bytes())?;
    epub.metadata("title", request.title())?;
    if let Some(author) = request.author.as_deref() {
        epub.metadata("author", author)?;
    }
    epub.metadata("direction", "rtl")?;
    for meta in fixed_layout_metadata() {
        epub.add_metadata_opf(Box::new(meta));
    }

    for (i, page) in pages.iter().enumerate() {
        let (width, height) = image::image_dimensions(page)?;
        let file = File::open(page)?;
        // SAFETY: the staging directory is owned by the running export
        let mmap = unsafe { MmapOptions::new().map(&file)? };
        let number = i + 1;
        let image_name = format!("images/page_{:05}.jpg", number);

        if i == 0 {
            epub.add_cover_image(&image_name, Cursor::new(&mmap[..]), "image/jpeg")?;
        } else {
            epub.add_resource(&image_name, Cursor::new(&mmap[..]), "image/jpeg")?;
        }

        let title = format!("Page {}", number);
        let xhtml = page_xhtml(&image_name, &title, width, height);
        let content = EpubContent::new(format!("page_{:05}.xhtml", number), xhtml.as_bytes());
        epub.add_content(content.title(title))?;
    }

    epub.generate(File::create(target)?)?;
    Ok(())
}

#[async_trait]
impl Packager for EpubPackager {
    fn format(&self) -> OutputFormat {
        OutputFormat::Epub
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
            OutputFormat::Epub.extension(),
            Local::now(),
        );
        let req = request.clone();
        let output = target.clone();

        spawn_blocking(move || build_epub(&output, &req, &pages))
            .await
            .map_err(|e| Error::AsyncTaskError(e.to_string()))?
            .map_err(|e| Error::Packager(format!("Failed to write {:?}: {}", target, e)))?;

        info!("Packaged {:?}", target);
        Ok(target)
    }
}
