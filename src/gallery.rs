//! Gallery orchestration: walks the directory tree, drives each image
//! through the normalizer and the layout engine, and issues draw
//! instructions to the document sink.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::layout::{LayoutEngine, PageGeometry, LABEL_STRIP_HEIGHT};
use crate::normalize::ImageNormalizer;
use crate::sink::DocumentSink;
use crate::{GalleryError, GalleryOptions, GalleryReport};

/// File extensions accepted as images, lowercase.
const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "webp"];

/// The image files of one directory, in traversal order.
#[derive(Debug, Clone)]
pub struct ImageGroup {
    pub dir: PathBuf,
    pub files: Vec<PathBuf>,
}

/// Walk a directory tree and collect one group per directory.
///
/// Depth-first, entries sorted by name at every level, a directory's own
/// files before its subdirectories, so the order is deterministic across
/// platforms. Groups with no image files are kept so group breaks line up
/// with actual directory boundaries.
pub fn collect_image_groups(root: &Path) -> Result<Vec<ImageGroup>, GalleryError> {
    if !root.is_dir() {
        return Err(GalleryError::Traversal {
            path: root.to_path_buf(),
            reason: "not a directory".to_string(),
        });
    }
    let mut groups = Vec::new();
    visit(root, &mut groups)?;
    Ok(groups)
}

fn visit(dir: &Path, groups: &mut Vec<ImageGroup>) -> Result<(), GalleryError> {
    let traversal_err = |e: std::io::Error| GalleryError::Traversal {
        path: dir.to_path_buf(),
        reason: e.to_string(),
    };

    let mut entries: Vec<_> = fs::read_dir(dir)
        .map_err(traversal_err)?
        .collect::<Result<_, _>>()
        .map_err(traversal_err)?;
    entries.sort_by_key(|e| e.file_name());

    let mut files = Vec::new();
    let mut subdirs = Vec::new();
    for entry in entries {
        let path = entry.path();
        if path.is_dir() {
            subdirs.push(path);
        } else if has_image_extension(&path) {
            files.push(path);
        } else {
            debug!("skipping non-image {}", path.display());
        }
    }

    groups.push(ImageGroup {
        dir: dir.to_path_buf(),
        files,
    });
    for subdir in subdirs {
        visit(&subdir, groups)?;
    }
    Ok(())
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Immediate child directories of a root, sorted by name.
pub fn immediate_subdirectories(root: &Path) -> Result<Vec<PathBuf>, GalleryError> {
    let traversal_err = |e: std::io::Error| GalleryError::Traversal {
        path: root.to_path_buf(),
        reason: e.to_string(),
    };
    let mut dirs: Vec<PathBuf> = fs::read_dir(root)
        .map_err(traversal_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(traversal_err)?
        .into_iter()
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    Ok(dirs)
}

/// Drives image sequences through normalization, layout, and the sink.
///
/// Per-item failures (undecodable file, scratch write failure, oversize
/// rectangle) are logged and skipped; the run itself never aborts on them.
pub struct GalleryBuilder<S: DocumentSink> {
    layout: LayoutEngine,
    normalizer: ImageNormalizer,
    sink: S,
    row_height: f32,
    dpi: f32,
    labels: bool,
    dir_break: bool,
    pages: usize,
    placed: usize,
    skipped: usize,
}

impl<S: DocumentSink> GalleryBuilder<S> {
    pub fn new(
        geometry: PageGeometry,
        row_height: f32,
        options: &GalleryOptions,
        sink: S,
    ) -> Result<Self, GalleryError> {
        Ok(GalleryBuilder {
            layout: LayoutEngine::new(geometry),
            normalizer: ImageNormalizer::new()?,
            sink,
            row_height,
            dpi: options.dpi,
            labels: options.labels,
            dir_break: options.dir_break,
            pages: 0,
            placed: 0,
            skipped: 0,
        })
    }

    /// Process every group in order, breaking the page between groups when
    /// group-break mode is on.
    pub fn run(&mut self, groups: &[ImageGroup]) {
        self.sink.add_page();
        self.pages = 1;

        for group in groups {
            for path in &group.files {
                match self.add_image(path) {
                    Ok(()) => self.placed += 1,
                    Err(err) => {
                        warn!("skipping {}: {}", path.display(), err);
                        self.skipped += 1;
                    }
                }
            }
            if self.dir_break {
                self.layout.force_page_break();
            }
        }
    }

    fn add_image(&mut self, path: &Path) -> Result<(), GalleryError> {
        let image = self.normalizer.normalize(path)?;
        let image = self.normalizer.resample(image, self.row_height, self.dpi);
        let normalized = self.normalizer.persist(&image, path)?;

        let width = self.row_height * normalized.aspect_ratio;
        if !self.layout.fits(width, self.row_height) {
            return Err(GalleryError::Oversize {
                path: path.to_path_buf(),
                width,
                height: self.row_height,
            });
        }

        let placement = self.layout.place(width, self.row_height);
        if placement.page_break {
            self.sink.add_page();
            self.pages += 1;
        }
        self.sink
            .draw_image(&normalized, placement.x, placement.y, width, self.row_height)?;
        if self.labels {
            let name = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            self.sink.draw_label(
                &name,
                placement.x,
                placement.y + self.row_height + LABEL_STRIP_HEIGHT,
            );
        }
        debug!(
            "placed {} at ({:.2}, {:.2}) on page {}",
            path.display(),
            placement.x,
            placement.y,
            self.pages
        );
        Ok(())
    }

    /// Finalize the document. Scratch storage is reclaimed when the builder
    /// drops, whether or not finalization succeeds.
    pub fn finish(mut self, output: &Path) -> Result<GalleryReport, GalleryError> {
        self.sink.finalize(output)?;
        Ok(GalleryReport {
            output: output.to_path_buf(),
            pages: self.pages,
            placed: self.placed,
            skipped: self.skipped,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{PageOrientation, PaperSize};
    use crate::normalize::NormalizedImage;
    use image::{Rgb, RgbImage};
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct SinkLog {
        pages: usize,
        draws: Vec<(f32, f32, f32, f32)>,
        labels: Vec<String>,
        finalized: bool,
    }

    /// Records the instruction stream instead of writing a document. The
    /// log is shared so tests can inspect it after `finish` consumed the
    /// builder.
    #[derive(Default, Clone)]
    struct MockSink {
        log: Rc<RefCell<SinkLog>>,
    }

    impl DocumentSink for MockSink {
        fn add_page(&mut self) {
            self.log.borrow_mut().pages += 1;
        }

        fn draw_image(
            &mut self,
            _image: &NormalizedImage,
            x: f32,
            y: f32,
            width: f32,
            height: f32,
        ) -> Result<(), GalleryError> {
            self.log.borrow_mut().draws.push((x, y, width, height));
            Ok(())
        }

        fn draw_label(&mut self, text: &str, _x: f32, _y: f32) {
            self.log.borrow_mut().labels.push(text.to_string());
        }

        fn finalize(&mut self, _output: &Path) -> Result<(), GalleryError> {
            self.log.borrow_mut().finalized = true;
            Ok(())
        }
    }

    fn write_png(path: &Path, width: u32, height: u32) {
        RgbImage::from_pixel(width, height, Rgb([10, 200, 90]))
            .save(path)
            .unwrap();
    }

    fn options() -> GalleryOptions {
        GalleryOptions {
            dpi: 30.0,
            ..GalleryOptions::default()
        }
    }

    fn geometry() -> PageGeometry {
        PageGeometry::new(PaperSize::A4, PageOrientation::Portrait, 0.5, false)
    }

    fn run_tree(
        root: &Path,
        opts: &GalleryOptions,
        geometry: PageGeometry,
    ) -> (GalleryReport, Rc<RefCell<SinkLog>>) {
        let groups = collect_image_groups(root).unwrap();
        let sink = MockSink::default();
        let log = Rc::clone(&sink.log);
        let mut builder = GalleryBuilder::new(geometry, 5.0, opts, sink).unwrap();
        builder.run(&groups);
        let report = builder.finish(Path::new("unused.pdf")).unwrap();
        (report, log)
    }

    #[test]
    fn collects_groups_depth_first_in_name_order() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("b")).unwrap();
        fs::create_dir(root.path().join("a")).unwrap();
        write_png(&root.path().join("top.png"), 4, 4);
        write_png(&root.path().join("a").join("one.jpg"), 4, 4);
        write_png(&root.path().join("b").join("two.jpeg"), 4, 4);
        fs::write(root.path().join("notes.txt"), "not an image").unwrap();

        let groups = collect_image_groups(root.path()).unwrap();
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].files.len(), 1);
        assert!(groups[1].dir.ends_with("a"));
        assert!(groups[2].dir.ends_with("b"));
    }

    #[test]
    fn bad_root_is_a_traversal_error() {
        let err = collect_image_groups(Path::new("/no/such/tree")).unwrap_err();
        assert!(matches!(err, GalleryError::Traversal { .. }));
    }

    #[test]
    fn one_corrupt_file_among_valid_ones_is_skipped() {
        let root = tempfile::tempdir().unwrap();
        write_png(&root.path().join("a.png"), 60, 40);
        write_png(&root.path().join("b.png"), 60, 40);
        fs::write(root.path().join("broken.jpg"), b"definitely not a jpeg").unwrap();

        let (report, log) = run_tree(root.path(), &options(), geometry());
        assert_eq!(report.placed, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.pages, 1);
        assert_eq!(log.borrow().draws.len(), 2);
        assert!(log.borrow().finalized);
    }

    #[test]
    fn draw_instructions_follow_the_row_flow() {
        let root = tempfile::tempdir().unwrap();
        write_png(&root.path().join("a.png"), 90, 60);
        write_png(&root.path().join("b.png"), 90, 60);

        let (report, log) = run_tree(root.path(), &options(), geometry());
        assert_eq!(report.placed, 2);

        let log = log.borrow();
        let (x0, y0, w0, h0) = log.draws[0];
        let (x1, y1, w1, _) = log.draws[1];
        assert_eq!((x0, y0), (1.0, 1.0));
        assert_eq!(h0, 5.0);
        // Aspect 1.5 at row height 5, within pixel-rounding tolerance.
        assert!((w0 - 7.5).abs() < 0.1);
        assert_eq!(y1, y0);
        // Second item sits one gutter to the right of the first.
        assert!((x1 - (x0 + w0 + 0.5)).abs() < 1e-4);
        assert_eq!(w1, w0);
    }

    #[test]
    fn dir_break_forces_each_group_onto_its_own_page() {
        let root = tempfile::tempdir().unwrap();
        write_png(&root.path().join("first.png"), 60, 40);
        fs::create_dir(root.path().join("sub")).unwrap();
        write_png(&root.path().join("sub").join("second.png"), 60, 40);

        let opts = GalleryOptions {
            dir_break: true,
            ..options()
        };
        let (report, log) = run_tree(root.path(), &opts, geometry());
        assert_eq!(report.placed, 2);
        assert_eq!(report.pages, 2);
        assert_eq!(log.borrow().pages, 2);
    }

    #[test]
    fn without_dir_break_groups_share_a_page() {
        let root = tempfile::tempdir().unwrap();
        write_png(&root.path().join("first.png"), 60, 40);
        fs::create_dir(root.path().join("sub")).unwrap();
        write_png(&root.path().join("sub").join("second.png"), 60, 40);

        let (report, _) = run_tree(root.path(), &options(), geometry());
        assert_eq!(report.pages, 1);
    }

    #[test]
    fn oversize_images_are_skipped() {
        let root = tempfile::tempdir().unwrap();
        // Aspect ratio 10: at row height 5 the width would be 50 cm.
        write_png(&root.path().join("panorama.png"), 500, 50);

        let (report, log) = run_tree(root.path(), &options(), geometry());
        assert_eq!(report.placed, 0);
        assert_eq!(report.skipped, 1);
        assert!(log.borrow().draws.is_empty());
    }

    #[test]
    fn labels_carry_the_file_stem() {
        let root = tempfile::tempdir().unwrap();
        write_png(&root.path().join("cat.png"), 60, 40);

        let opts = GalleryOptions {
            labels: true,
            ..options()
        };
        let geometry = PageGeometry::new(PaperSize::A4, PageOrientation::Portrait, 0.5, true);
        let (report, log) = run_tree(root.path(), &opts, geometry);
        assert_eq!(report.placed, 1);
        assert_eq!(log.borrow().labels, vec!["cat".to_string()]);
    }

    #[test]
    fn immediate_subdirectories_are_sorted() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("zoo")).unwrap();
        fs::create_dir(root.path().join("alps")).unwrap();
        fs::write(root.path().join("file.png"), b"").unwrap();

        let dirs = immediate_subdirectories(root.path()).unwrap();
        assert_eq!(dirs.len(), 2);
        assert!(dirs[0].ends_with("alps"));
        assert!(dirs[1].ends_with("zoo"));
    }
}
