//! Image normalization: EXIF orientation correction, resampling to the
//! target print resolution, and persistence of the normalized copy into a
//! scratch directory for the document sink to embed later.

use std::fs;
use std::path::{Path, PathBuf};

use image::{imageops::FilterType, DynamicImage, GenericImageView};
use tempfile::TempDir;
use tracing::debug;

use crate::{GalleryError, CM_PER_INCH};

/// JPEG quality for normalized scratch copies.
const SCRATCH_JPEG_QUALITY: u8 = 90;

/// Stored orientation of an image, read from EXIF metadata.
///
/// The rotation names the transform that makes the stored pixels upright:
/// EXIF tag 6 needs a 90° clockwise turn, tag 8 a 90° counter-clockwise
/// turn, tag 3 a half turn. Absent or unreadable metadata means `Normal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Orientation {
    #[default]
    Normal,
    /// 90° clockwise (EXIF tag 6).
    Rotate90,
    /// 180° (EXIF tag 3).
    Rotate180,
    /// 90° counter-clockwise (EXIF tag 8).
    Rotate270,
}

impl Orientation {
    /// Map a raw EXIF orientation value. Mirrored variants (2, 4, 5, 7)
    /// are not produced by cameras we care about and map to `Normal`.
    pub fn from_exif_value(value: u32) -> Self {
        match value {
            3 => Orientation::Rotate180,
            6 => Orientation::Rotate90,
            8 => Orientation::Rotate270,
            _ => Orientation::Normal,
        }
    }

    /// Rotate the pixel buffer so the stored orientation becomes upright.
    pub fn apply(self, image: DynamicImage) -> DynamicImage {
        match self {
            Orientation::Normal => image,
            Orientation::Rotate90 => image.rotate90(),
            Orientation::Rotate180 => image.rotate180(),
            Orientation::Rotate270 => image.rotate270(),
        }
    }
}

/// Read the EXIF orientation tag from raw image bytes.
pub fn read_orientation(bytes: &[u8]) -> Orientation {
    let mut cursor = std::io::Cursor::new(bytes);
    let reader = match exif::Reader::new().read_from_container(&mut cursor) {
        Ok(reader) => reader,
        Err(_) => return Orientation::Normal,
    };
    reader
        .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|field| field.value.get_uint(0))
        .map(Orientation::from_exif_value)
        .unwrap_or_default()
}

/// Whether an image carries meaningful alpha.
pub(crate) fn has_alpha(image: &DynamicImage) -> bool {
    match image {
        DynamicImage::ImageRgba8(rgba) => {
            let sample_rate = std::cmp::max(1, rgba.pixels().len() / 10000);
            rgba.pixels().step_by(sample_rate).any(|p| p.0[3] < 255)
        }
        DynamicImage::ImageLumaA8(la) => {
            let sample_rate = std::cmp::max(1, la.pixels().len() / 10000);
            la.pixels().step_by(sample_rate).any(|p| p.0[1] < 255)
        }
        _ => false,
    }
}

/// A normalized copy persisted to scratch storage, ready to embed.
#[derive(Debug, Clone)]
pub struct NormalizedImage {
    /// Location of the normalized copy inside the scratch directory.
    pub path: PathBuf,
    /// Width over height after orientation correction.
    pub aspect_ratio: f32,
    pub pixel_width: u32,
    pub pixel_height: u32,
}

/// Decodes, orients, resamples, and persists images.
///
/// Owns the scratch directory; dropping the normalizer reclaims every
/// scratch artifact, including copies of items that later failed.
pub struct ImageNormalizer {
    scratch: TempDir,
    seq: u32,
}

impl ImageNormalizer {
    pub fn new() -> Result<Self, GalleryError> {
        let scratch = tempfile::tempdir()
            .map_err(|e| GalleryError::Scratch(e.to_string()))?;
        debug!("scratch directory at {}", scratch.path().display());
        Ok(ImageNormalizer { scratch, seq: 0 })
    }

    /// Decode an image file and correct its stored orientation.
    pub fn normalize(&self, path: &Path) -> Result<DynamicImage, GalleryError> {
        let bytes = fs::read(path).map_err(|e| GalleryError::Decode {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let orientation = read_orientation(&bytes);
        let image = image::load_from_memory(&bytes).map_err(|e| GalleryError::Decode {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        if orientation != Orientation::Normal {
            debug!("correcting orientation {:?} for {}", orientation, path.display());
        }
        Ok(orientation.apply(image))
    }

    /// Resample to the pixel height matching `target_height_cm` at `dpi`,
    /// preserving the aspect ratio.
    pub fn resample(&self, image: DynamicImage, target_height_cm: f32, dpi: f32) -> DynamicImage {
        let (width, height) = image.dimensions();
        let target_h = (target_height_cm / CM_PER_INCH * dpi).round().max(1.0) as u32;
        let target_w = ((width as f32 / height as f32) * target_h as f32)
            .round()
            .max(1.0) as u32;
        image.resize_exact(target_w, target_h, FilterType::Lanczos3)
    }

    /// Persist a normalized copy to scratch storage.
    ///
    /// Opaque images become JPEG; images with alpha keep it by going
    /// through PNG. Scratch names carry a sequence number so equal stems
    /// from different directories cannot collide.
    pub fn persist(
        &mut self,
        image: &DynamicImage,
        source: &Path,
    ) -> Result<NormalizedImage, GalleryError> {
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        let resample_err = |e: String| GalleryError::Resample {
            path: source.to_path_buf(),
            reason: e,
        };

        self.seq += 1;
        let (path, pixel_width, pixel_height) = if has_alpha(image) {
            let path = self.scratch.path().join(format!("{:04}-{}.png", self.seq, stem));
            image
                .save_with_format(&path, image::ImageFormat::Png)
                .map_err(|e| resample_err(e.to_string()))?;
            let (w, h) = image.dimensions();
            (path, w, h)
        } else {
            let path = self.scratch.path().join(format!("{:04}-{}.jpg", self.seq, stem));
            let rgb = image.to_rgb8();
            let (w, h) = rgb.dimensions();
            let mut jpeg_bytes = Vec::new();
            let mut encoder = jpeg_encoder::Encoder::new(&mut jpeg_bytes, SCRATCH_JPEG_QUALITY);
            encoder.set_sampling_factor(jpeg_encoder::SamplingFactor::R_4_2_0);
            encoder
                .encode(rgb.as_raw(), w as u16, h as u16, jpeg_encoder::ColorType::Rgb)
                .map_err(|e| resample_err(e.to_string()))?;
            fs::write(&path, &jpeg_bytes).map_err(|e| resample_err(e.to_string()))?;
            (path, w, h)
        };

        debug!("normalized copy saved to {}", path.display());
        Ok(NormalizedImage {
            path,
            aspect_ratio: pixel_width as f32 / pixel_height as f32,
            pixel_width,
            pixel_height,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage, Rgba, RgbaImage};

    fn solid_rgb(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([120, 40, 200])))
    }

    #[test]
    fn exif_value_mapping() {
        assert_eq!(Orientation::from_exif_value(1), Orientation::Normal);
        assert_eq!(Orientation::from_exif_value(3), Orientation::Rotate180);
        assert_eq!(Orientation::from_exif_value(6), Orientation::Rotate90);
        assert_eq!(Orientation::from_exif_value(8), Orientation::Rotate270);
        // Mirrored and out-of-range values degrade to Normal.
        assert_eq!(Orientation::from_exif_value(5), Orientation::Normal);
        assert_eq!(Orientation::from_exif_value(0), Orientation::Normal);
    }

    #[test]
    fn quarter_turns_swap_dimensions() {
        let img = solid_rgb(4, 2);
        assert_eq!(Orientation::Rotate90.apply(img.clone()).dimensions(), (2, 4));
        assert_eq!(Orientation::Rotate270.apply(img.clone()).dimensions(), (2, 4));
        assert_eq!(Orientation::Rotate180.apply(img).dimensions(), (4, 2));
    }

    #[test]
    fn untagged_bytes_read_as_normal() {
        let mut png_bytes = Vec::new();
        solid_rgb(2, 2)
            .write_to(&mut std::io::Cursor::new(&mut png_bytes), image::ImageFormat::Png)
            .unwrap();
        assert_eq!(read_orientation(&png_bytes), Orientation::Normal);
    }

    #[test]
    fn orientation_correction_without_tag_is_a_noop() {
        let img = solid_rgb(3, 5);
        let corrected = Orientation::Normal.apply(img.clone());
        assert_eq!(corrected.dimensions(), img.dimensions());
        assert_eq!(corrected.to_rgb8().as_raw(), img.to_rgb8().as_raw());
    }

    #[test]
    fn resample_preserves_aspect_ratio() {
        let normalizer = ImageNormalizer::new().unwrap();
        let img = solid_rgb(300, 200);
        let resampled = normalizer.resample(img, 5.0, 150.0);
        let (w, h) = resampled.dimensions();
        // 5 cm / 2.54 * 150 dpi = 295 px tall.
        assert_eq!(h, 295);
        let ratio = w as f32 / h as f32;
        assert!((ratio - 1.5).abs() < 0.01, "ratio was {}", ratio);
    }

    #[test]
    fn resample_never_collapses_to_zero() {
        let normalizer = ImageNormalizer::new().unwrap();
        let img = solid_rgb(10, 10);
        let resampled = normalizer.resample(img, 0.001, 1.0);
        assert_eq!(resampled.dimensions(), (1, 1));
    }

    #[test]
    fn persist_writes_jpeg_for_opaque_images() {
        let mut normalizer = ImageNormalizer::new().unwrap();
        let img = solid_rgb(30, 20);
        let normalized = normalizer.persist(&img, Path::new("photos/cat.png")).unwrap();
        assert!(normalized.path.exists());
        assert_eq!(normalized.path.extension().unwrap(), "jpg");
        assert!((normalized.aspect_ratio - 1.5).abs() < 1e-6);
        assert_eq!((normalized.pixel_width, normalized.pixel_height), (30, 20));
    }

    #[test]
    fn persist_keeps_alpha_via_png() {
        let mut normalizer = ImageNormalizer::new().unwrap();
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(8, 8, Rgba([10, 20, 30, 128])));
        let normalized = normalizer.persist(&img, Path::new("logo.png")).unwrap();
        assert_eq!(normalized.path.extension().unwrap(), "png");
    }

    #[test]
    fn persist_sequence_avoids_stem_collisions() {
        let mut normalizer = ImageNormalizer::new().unwrap();
        let img = solid_rgb(4, 4);
        let first = normalizer.persist(&img, Path::new("a/photo.jpg")).unwrap();
        let second = normalizer.persist(&img, Path::new("b/photo.jpg")).unwrap();
        assert_ne!(first.path, second.path);
    }

    #[test]
    fn alpha_detection() {
        assert!(!has_alpha(&solid_rgb(4, 4)));
        let opaque = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([1, 2, 3, 255])));
        assert!(!has_alpha(&opaque));
        let translucent =
            DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([1, 2, 3, 200])));
        assert!(has_alpha(&translucent));
    }

    #[test]
    fn scratch_is_reclaimed_on_drop() {
        let mut normalizer = ImageNormalizer::new().unwrap();
        let normalized = normalizer.persist(&solid_rgb(4, 4), Path::new("x.jpg")).unwrap();
        let scratch_path = normalized.path.clone();
        drop(normalizer);
        assert!(!scratch_path.exists());
    }
}
