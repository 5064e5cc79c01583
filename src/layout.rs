//! Row-flow page layout.
//!
//! Places a stream of rectangles left-to-right until the row's width budget
//! is exhausted, wraps to a new row below, and breaks to a new page when the
//! row no longer fits above the bottom margin. All units are centimeters with
//! the origin at the page's top-left corner.

use crate::GalleryError;

/// Default left/top/right page margin in centimeters.
pub const PAGE_MARGIN: f32 = 1.0;

/// Bottom margin reserved for the page-break test, in centimeters.
pub const PAGE_BREAK_MARGIN: f32 = 2.0;

/// Height of the text strip reserved under each image when labels are on.
pub const LABEL_STRIP_HEIGHT: f32 = 0.3;

/// Named paper presets, dimensions in centimeters (portrait).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaperSize {
    A3,
    A4,
    A5,
    Letter,
    Legal,
}

impl PaperSize {
    /// Portrait width and height in centimeters.
    pub fn dimensions(self) -> (f32, f32) {
        match self {
            PaperSize::A3 => (29.7, 42.0),
            PaperSize::A4 => (21.0, 29.7),
            PaperSize::A5 => (14.85, 21.0),
            PaperSize::Letter => (21.59, 27.94),
            PaperSize::Legal => (21.59, 35.56),
        }
    }
}

impl std::str::FromStr for PaperSize {
    type Err = GalleryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "a3" => Ok(PaperSize::A3),
            "a4" => Ok(PaperSize::A4),
            "a5" => Ok(PaperSize::A5),
            "letter" => Ok(PaperSize::Letter),
            "legal" => Ok(PaperSize::Legal),
            other => Err(GalleryError::InvalidPaperSize(other.to_string())),
        }
    }
}

/// Page orientation for the whole document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PageOrientation {
    #[default]
    Portrait,
    Landscape,
}

/// Immutable per-document page configuration.
#[derive(Debug, Clone, Copy)]
pub struct PageGeometry {
    /// Page width in centimeters.
    pub width: f32,
    /// Page height in centimeters.
    pub height: f32,
    pub left_margin: f32,
    pub top_margin: f32,
    pub right_margin: f32,
    pub bottom_margin: f32,
    /// Spacing between adjacent items and rows. Includes the label strip
    /// when labels are enabled.
    pub gutter: f32,
}

impl PageGeometry {
    /// Build the geometry for a paper preset with the default margins.
    pub fn new(
        paper: PaperSize,
        orientation: PageOrientation,
        gutter: f32,
        with_labels: bool,
    ) -> Self {
        let (w, h) = paper.dimensions();
        let (width, height) = match orientation {
            PageOrientation::Portrait => (w, h),
            PageOrientation::Landscape => (h, w),
        };
        let gutter = if with_labels {
            gutter + LABEL_STRIP_HEIGHT
        } else {
            gutter
        };
        PageGeometry {
            width,
            height,
            left_margin: PAGE_MARGIN,
            top_margin: PAGE_MARGIN,
            right_margin: PAGE_MARGIN,
            bottom_margin: PAGE_BREAK_MARGIN,
            gutter,
        }
    }

    /// Rightmost x coordinate content may reach.
    pub fn right_bound(&self) -> f32 {
        self.width - self.right_margin
    }

    /// Lowest y coordinate content may reach.
    pub fn bottom_bound(&self) -> f32 {
        self.height - self.bottom_margin
    }

    pub fn usable_width(&self) -> f32 {
        self.right_bound() - self.left_margin
    }

    pub fn usable_height(&self) -> f32 {
        self.bottom_bound() - self.top_margin
    }
}

/// Where an item landed, plus whether placing it broke to a new page.
///
/// `page_break` is the page-break event: the caller must open a new page in
/// the sink before drawing this item.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub x: f32,
    pub y: f32,
    pub page_break: bool,
}

/// The next insertion point. Exactly one cursor exists per document.
#[derive(Debug, Clone, Copy)]
struct Cursor {
    x: f32,
    y: f32,
}

/// Row-flow packing engine.
///
/// Purely geometric: `place` always returns a placement and never fails.
/// Rejecting degenerate or oversize rectangles is the caller's job, via
/// [`LayoutEngine::fits`].
pub struct LayoutEngine {
    geometry: PageGeometry,
    cursor: Cursor,
    items_on_page: usize,
}

impl LayoutEngine {
    pub fn new(geometry: PageGeometry) -> Self {
        LayoutEngine {
            cursor: Cursor {
                x: geometry.left_margin,
                y: geometry.top_margin,
            },
            items_on_page: 0,
            geometry,
        }
    }

    /// Whether a rectangle can fit inside the usable area at all.
    pub fn fits(&self, width: f32, height: f32) -> bool {
        width <= self.geometry.usable_width() && height <= self.geometry.usable_height()
    }

    /// Place one rectangle.
    ///
    /// Row wrap advances by the incoming item's height, not a tracked row
    /// maximum; rows are assumed homogeneous in height.
    pub fn place(&mut self, width: f32, height: f32) -> Placement {
        let mut x = self.cursor.x;
        let mut y = self.cursor.y;
        let mut page_break = false;

        if x + width > self.geometry.right_bound() {
            x = self.geometry.left_margin;
            y = self.cursor.y + height + self.geometry.gutter;
        }
        if y + height > self.geometry.bottom_bound() {
            y = self.geometry.top_margin;
            self.items_on_page = 0;
            page_break = true;
        }

        self.cursor = Cursor {
            x: x + width + self.geometry.gutter,
            y,
        };
        self.items_on_page += 1;

        Placement { x, y, page_break }
    }

    /// Force the next `place` onto a fresh page.
    ///
    /// Parks the cursor at the page's far corner so the next placement
    /// trips both the row-wrap and the page-break tests. No-op when the
    /// current page is empty, so no blank pages are emitted.
    pub fn force_page_break(&mut self) {
        if self.items_on_page > 0 {
            self.cursor = Cursor {
                x: self.geometry.right_bound(),
                y: self.geometry.bottom_bound(),
            };
        }
    }
}
