//! Contact-Sheet PDF Gallery Library
//!
//! Core logic for assembling a directory tree of images into a paginated
//! PDF gallery. Shared between the CLI and embedding callers.
//!
//! Each image is decoded, corrected for its EXIF orientation, resampled to
//! the target print resolution, and flowed into fixed-size pages with a
//! row-based layout: left to right until the row's width budget is
//! exhausted, then a new row, then a new page.

pub mod gallery;
pub mod layout;
pub mod normalize;
pub mod sink;

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

pub use gallery::{collect_image_groups, GalleryBuilder, ImageGroup};
pub use layout::{LayoutEngine, PageGeometry, PageOrientation, PaperSize, Placement};
pub use normalize::{ImageNormalizer, NormalizedImage, Orientation};
pub use sink::{DocumentSink, PdfSink};

/// Centimeters per inch, for resolution math.
pub const CM_PER_INCH: f32 = 2.54;

/// Options for gallery generation.
#[derive(Debug, Clone)]
pub struct GalleryOptions {
    /// Output PDF path. Derived from the root directory's name when unset.
    pub output: Option<PathBuf>,
    /// Row height in centimeters. Defaults to half the page height.
    pub row_height: Option<f32>,
    /// Spacing between adjacent pictures and rows, in centimeters.
    pub gutter: f32,
    /// Resampling resolution in dots per inch.
    pub dpi: f32,
    /// Draw a filename label under each picture.
    pub labels: bool,
    /// Start a new page at each directory boundary.
    pub dir_break: bool,
    pub orientation: PageOrientation,
    /// Paper size name, e.g. "A4" or "Letter".
    pub paper_size: String,
}

impl Default for GalleryOptions {
    fn default() -> Self {
        Self {
            output: None,
            row_height: None,
            gutter: 0.5,
            dpi: 300.0,
            labels: false,
            dir_break: false,
            orientation: PageOrientation::Portrait,
            paper_size: "A4".to_string(),
        }
    }
}

impl GalleryOptions {
    fn validate(&self) -> Result<(), GalleryError> {
        if self.gutter < 0.0 {
            return Err(GalleryError::InvalidConfig(format!(
                "gutter must not be negative, got {}",
                self.gutter
            )));
        }
        if self.dpi <= 0.0 {
            return Err(GalleryError::InvalidConfig(format!(
                "resolution must be positive, got {} dpi",
                self.dpi
            )));
        }
        if let Some(h) = self.row_height {
            if h <= 0.0 {
                return Err(GalleryError::InvalidConfig(format!(
                    "row height must be positive, got {} cm",
                    h
                )));
            }
        }
        Ok(())
    }
}

/// Result of one gallery run.
#[derive(Debug, Clone)]
pub struct GalleryReport {
    pub output: PathBuf,
    pub pages: usize,
    pub placed: usize,
    pub skipped: usize,
}

/// Error type for gallery generation.
///
/// `Decode`, `Resample`, and `Oversize` concern a single item and are
/// recovered at the builder boundary (the item is skipped); the remaining
/// variants are fatal to the run.
#[derive(Debug, Error)]
pub enum GalleryError {
    #[error("failed to decode {}: {}", .path.display(), .reason)]
    Decode { path: PathBuf, reason: String },
    #[error("failed to produce a normalized copy of {}: {}", .path.display(), .reason)]
    Resample { path: PathBuf, reason: String },
    #[error(
        "{} does not fit the usable page area at {:.1} x {:.1} cm",
        .path.display(), .width, .height
    )]
    Oversize { path: PathBuf, width: f32, height: f32 },
    #[error("failed to write document: {0}")]
    Sink(String),
    #[error("invalid paper size: {0}")]
    InvalidPaperSize(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("failed to read directory tree at {}: {}", .path.display(), .reason)]
    Traversal { path: PathBuf, reason: String },
    #[error("failed to create scratch directory: {0}")]
    Scratch(String),
}

/// Build one gallery PDF from the images beneath `root`.
pub fn generate_gallery(
    root: &Path,
    options: &GalleryOptions,
) -> Result<GalleryReport, GalleryError> {
    let paper: PaperSize = options.paper_size.parse()?;
    options.validate()?;

    let geometry = PageGeometry::new(paper, options.orientation, options.gutter, options.labels);
    let row_height = options.row_height.unwrap_or(geometry.height / 2.0);
    info!(
        "paper {:.1} x {:.1} cm, row height {:.1} cm",
        geometry.width, geometry.height, row_height
    );

    let groups = collect_image_groups(root)?;
    let sink = PdfSink::new(geometry.width, geometry.height);
    let mut builder = GalleryBuilder::new(geometry, row_height, options, sink)?;
    builder.run(&groups);

    let output = match &options.output {
        Some(path) => path.clone(),
        None => derive_output_name(root),
    };
    builder.finish(&output)
}

/// Build one gallery PDF per immediate child directory of `root`, each
/// named after its directory.
pub fn generate_subfolder_galleries(
    root: &Path,
    options: &GalleryOptions,
) -> Result<Vec<GalleryReport>, GalleryError> {
    let mut reports = Vec::new();
    for dir in gallery::immediate_subdirectories(root)? {
        let per_dir = GalleryOptions {
            output: Some(derive_output_name(&dir)),
            ..options.clone()
        };
        reports.push(generate_gallery(&dir, &per_dir)?);
    }
    Ok(reports)
}

/// Name the output after the root directory's base name.
fn derive_output_name(root: &Path) -> PathBuf {
    let resolved = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
    let stem = resolved
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "gallery".to_string());
    PathBuf::from(format!("{}.pdf", stem))
}
