//! Document loading: a path becomes an ordered list of page images.
//!
//! Image files load as a single page, a directory loads every supported
//! image in it sorted by file name, and PDFs go through a [`PageRenderer`].

use crate::oracle::PageImage;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

/// 2x upscale of the 72 dpi PDF base resolution.
pub const PDF_RENDER_DPI: u32 = 144;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Document not found: {0}")]
    NotFound(PathBuf),
    #[error("Unsupported document format: {0}")]
    Unsupported(String),
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to render {path}: {message}")]
    Render { path: PathBuf, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Image,
    ImageDirectory,
    Pdf,
}

impl DocumentFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentFormat::Image => "image",
            DocumentFormat::ImageDirectory => "image_directory",
            DocumentFormat::Pdf => "pdf",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadedDocument {
    pub pages: Vec<PageImage>,
    pub format: DocumentFormat,
    /// Hex digest over the page bytes in order.
    pub sha256: String,
}

fn media_type_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

fn is_pdf(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false)
}

fn digest(pages: &[PageImage]) -> String {
    let mut hasher = Sha256::new();
    for page in pages {
        hasher.update(&page.data);
    }
    format!("{:x}", hasher.finalize())
}

async fn read_page(path: &Path, media_type: &str) -> Result<PageImage, LoadError> {
    let data = tokio::fs::read(path).await.map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(PageImage::new(media_type, data))
}

/// Supported images directly inside `dir`, sorted by file name.
fn page_files(dir: &Path) -> Vec<(PathBuf, &'static str)> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| media_type_for(e.path()).map(|m| (e.into_path(), m)))
        .collect()
}

// ============================================================================
// PDF rendering
// ============================================================================

#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, pdf: &Path) -> Result<Vec<PageImage>, LoadError>;
}

/// Renders through the poppler `pdftoppm` binary.
#[derive(Debug, Clone)]
pub struct PdfToPpm {
    program: PathBuf,
    dpi: u32,
}

impl Default for PdfToPpm {
    fn default() -> Self {
        Self {
            program: PathBuf::from("pdftoppm"),
            dpi: PDF_RENDER_DPI,
        }
    }
}

impl PdfToPpm {
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }
}

#[async_trait]
impl PageRenderer for PdfToPpm {
    async fn render(&self, pdf: &Path) -> Result<Vec<PageImage>, LoadError> {
        let render_error = |message: String| LoadError::Render {
            path: pdf.to_path_buf(),
            message,
        };
        let out_dir = tempfile::tempdir().map_err(|source| LoadError::Io {
            path: pdf.to_path_buf(),
            source,
        })?;
        let prefix = out_dir.path().join("page");

        let output = tokio::process::Command::new(&self.program)
            .arg("-r")
            .arg(self.dpi.to_string())
            .arg("-png")
            .arg(pdf)
            .arg(&prefix)
            .output()
            .await
            .map_err(|e| render_error(format!("failed to run {}: {e}", self.program.display())))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(render_error(stderr.trim().to_string()));
        }

        let mut pages = Vec::new();
        for (path, media_type) in page_files(out_dir.path()) {
            pages.push(read_page(&path, media_type).await?);
        }
        if pages.is_empty() {
            return Err(render_error("renderer produced no pages".to_string()));
        }
        tracing::debug!(pdf = %pdf.display(), pages = pages.len(), dpi = self.dpi, "rendered pdf");
        Ok(pages)
    }
}

// ============================================================================
// Loader
// ============================================================================

#[async_trait]
pub trait DocumentLoader: Send + Sync {
    async fn load(&self, path: &Path) -> Result<LoadedDocument, LoadError>;
}

#[derive(Clone, Default)]
pub struct FileLoader {
    renderer: Option<Arc<dyn PageRenderer>>,
}

impl FileLoader {
    /// Images only; PDFs fail with [`LoadError::Unsupported`].
    pub fn images_only() -> Self {
        Self::default()
    }

    pub fn with_renderer(renderer: Arc<dyn PageRenderer>) -> Self {
        Self {
            renderer: Some(renderer),
        }
    }
}

#[async_trait]
impl DocumentLoader for FileLoader {
    async fn load(&self, path: &Path) -> Result<LoadedDocument, LoadError> {
        if !path.exists() {
            return Err(LoadError::NotFound(path.to_path_buf()));
        }

        let (pages, format) = if path.is_dir() {
            let mut pages = Vec::new();
            for (page, media_type) in page_files(path) {
                pages.push(read_page(&page, media_type).await?);
            }
            if pages.is_empty() {
                return Err(LoadError::Unsupported(format!(
                    "{} contains no page images",
                    path.display()
                )));
            }
            (pages, DocumentFormat::ImageDirectory)
        } else if is_pdf(path) {
            let renderer = self
                .renderer
                .as_ref()
                .ok_or_else(|| LoadError::Unsupported(format!("{} (no PDF renderer available)", path.display())))?;
            (renderer.render(path).await?, DocumentFormat::Pdf)
        } else {
            let media_type = media_type_for(path)
                .ok_or_else(|| LoadError::Unsupported(path.display().to_string()))?;
            (vec![read_page(path, media_type).await?], DocumentFormat::Image)
        };

        let sha256 = digest(&pages);
        tracing::debug!(path = %path.display(), pages = pages.len(), format = format.as_str(), "document loaded");
        Ok(LoadedDocument { pages, format, sha256 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_directory_pages_sorted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("page-2.png"), b"two").unwrap();
        std::fs::write(dir.path().join("page-1.png"), b"one").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"skip").unwrap();

        let doc = FileLoader::images_only().load(dir.path()).await.unwrap();
        assert_eq!(doc.format, DocumentFormat::ImageDirectory);
        let bytes: Vec<&[u8]> = doc.pages.iter().map(|p| p.data.as_slice()).collect();
        assert_eq!(bytes, vec![b"one".as_slice(), b"two".as_slice()]);
        assert_eq!(doc.sha256.len(), 64);
    }

    #[tokio::test]
    async fn test_rejects_unsupported_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let doc = dir.path().join("scan.tiff");
        std::fs::write(&doc, b"x").unwrap();
        let loader = FileLoader::images_only();
        assert!(matches!(loader.load(&doc).await, Err(LoadError::Unsupported(_))));

        let pdf = dir.path().join("scan.pdf");
        std::fs::write(&pdf, b"%PDF").unwrap();
        assert!(matches!(loader.load(&pdf).await, Err(LoadError::Unsupported(_))));

        assert!(matches!(
            loader.load(&dir.path().join("missing.png")).await,
            Err(LoadError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_single_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ID.JPG");
        std::fs::write(&path, b"jpeg").unwrap();
        let doc = FileLoader::images_only().load(&path).await.unwrap();
        assert_eq!(doc.pages[0].media_type, "image/jpeg");
        assert_eq!(doc.format, DocumentFormat::Image);
    }
}
