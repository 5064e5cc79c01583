//! Document sink: receives placement and page-break instructions from the
//! gallery builder and serializes the result.
//!
//! [`PdfSink`] writes a PDF with lopdf. Placement coordinates arrive in
//! centimeters with the origin at the page's top-left; the sink converts to
//! PDF points with the origin at the bottom-left.

use std::fs;
use std::path::Path;

use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use tracing::debug;

use crate::normalize::{has_alpha, NormalizedImage};
use crate::{GalleryError, CM_PER_INCH};

/// PDF user-space points per centimeter.
pub const PT_PER_CM: f32 = 72.0 / CM_PER_INCH;

const LABEL_FONT_SIZE: u32 = 8;

/// JPEG quality when an embedded image has to be re-encoded.
const EMBED_JPEG_QUALITY: u8 = 90;

/// Where draw and page-break instructions go.
///
/// Units are centimeters, origin top-left. Callers must open a page with
/// `add_page` before drawing. A `draw_image` failure concerns only that
/// item; only `finalize` errors are fatal to the run.
pub trait DocumentSink {
    fn add_page(&mut self);
    fn draw_image(
        &mut self,
        image: &NormalizedImage,
        x: f32,
        y: f32,
        width: f32,
        height: f32,
    ) -> Result<(), GalleryError>;
    /// Draw a label with its baseline at `(x, y)`.
    fn draw_label(&mut self, text: &str, x: f32, y: f32);
    fn finalize(&mut self, output: &Path) -> Result<(), GalleryError>;
}

/// lopdf-backed PDF writer.
///
/// Buffers the open page's content stream and image XObjects; `add_page`
/// flushes them into a page object, `finalize` builds the page tree and
/// saves the document.
pub struct PdfSink {
    doc: Document,
    pages_id: ObjectId,
    kids: Vec<ObjectId>,
    content: String,
    xobjects: Vec<(String, ObjectId)>,
    font_id: Option<ObjectId>,
    page_open: bool,
    image_count: usize,
    page_width_pt: f32,
    page_height_pt: f32,
}

impl PdfSink {
    /// Create a sink for pages of the given size in centimeters.
    pub fn new(page_width_cm: f32, page_height_cm: f32) -> Self {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        PdfSink {
            doc,
            pages_id,
            kids: Vec::new(),
            content: String::new(),
            xobjects: Vec::new(),
            font_id: None,
            page_open: false,
            image_count: 0,
            page_width_pt: page_width_cm * PT_PER_CM,
            page_height_pt: page_height_cm * PT_PER_CM,
        }
    }

    fn ensure_font(&mut self) -> ObjectId {
        if let Some(id) = self.font_id {
            return id;
        }
        let mut font = Dictionary::new();
        font.set("Type", Object::Name(b"Font".to_vec()));
        font.set("Subtype", Object::Name(b"Type1".to_vec()));
        font.set("BaseFont", Object::Name(b"Helvetica".to_vec()));
        let id = self.doc.add_object(Object::Dictionary(font));
        self.font_id = Some(id);
        id
    }

    fn flush_page(&mut self) {
        let ops = std::mem::take(&mut self.content);
        let content_id = self
            .doc
            .add_object(Object::Stream(Stream::new(Dictionary::new(), ops.into_bytes())));

        let mut xobject_dict = Dictionary::new();
        for (name, id) in self.xobjects.drain(..) {
            xobject_dict.set(name, Object::Reference(id));
        }
        let mut resources = Dictionary::new();
        resources.set("XObject", Object::Dictionary(xobject_dict));
        if let Some(font_id) = self.font_id {
            let mut fonts = Dictionary::new();
            fonts.set("F1", Object::Reference(font_id));
            resources.set("Font", Object::Dictionary(fonts));
        }

        let mut page = Dictionary::new();
        page.set("Type", Object::Name(b"Page".to_vec()));
        page.set("Parent", Object::Reference(self.pages_id));
        page.set(
            "MediaBox",
            Object::Array(vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Real(self.page_width_pt),
                Object::Real(self.page_height_pt),
            ]),
        );
        page.set("Contents", Object::Reference(content_id));
        page.set("Resources", Object::Dictionary(resources));

        let page_id = self.doc.add_object(Object::Dictionary(page));
        self.kids.push(page_id);
    }
}

impl DocumentSink for PdfSink {
    fn add_page(&mut self) {
        if self.page_open {
            self.flush_page();
        }
        self.page_open = true;
        debug!("page {} opened", self.kids.len() + 1);
    }

    fn draw_image(
        &mut self,
        image: &NormalizedImage,
        x: f32,
        y: f32,
        width: f32,
        height: f32,
    ) -> Result<(), GalleryError> {
        let (mut stream, smask) = embed_image(image).map_err(|reason| GalleryError::Resample {
            path: image.path.clone(),
            reason,
        })?;
        if let Some(smask) = smask {
            let smask_id = self.doc.add_object(Object::Stream(smask));
            stream.dict.set("SMask", Object::Reference(smask_id));
        }
        let object_id = self.doc.add_object(Object::Stream(stream));

        self.image_count += 1;
        let name = format!("Im{}", self.image_count);
        self.xobjects.push((name.clone(), object_id));

        // cm operator scales the unit image square to the display size and
        // moves it to the rectangle's bottom-left corner.
        let w_pt = width * PT_PER_CM;
        let h_pt = height * PT_PER_CM;
        let x_pt = x * PT_PER_CM;
        let y_pt = self.page_height_pt - (y + height) * PT_PER_CM;
        self.content.push_str(&format!(
            "q {:.4} 0 0 {:.4} {:.4} {:.4} cm /{} Do Q\n",
            w_pt, h_pt, x_pt, y_pt, name
        ));
        Ok(())
    }

    fn draw_label(&mut self, text: &str, x: f32, y: f32) {
        self.ensure_font();
        let x_pt = x * PT_PER_CM;
        let y_pt = self.page_height_pt - y * PT_PER_CM;
        self.content.push_str(&format!(
            "BT /F1 {} Tf {:.4} {:.4} Td ({}) Tj ET\n",
            LABEL_FONT_SIZE,
            x_pt,
            y_pt,
            escape_pdf_text(text)
        ));
    }

    fn finalize(&mut self, output: &Path) -> Result<(), GalleryError> {
        if self.page_open {
            self.flush_page();
            self.page_open = false;
        }
        if self.kids.is_empty() {
            // A document needs at least one page to be well-formed.
            self.flush_page();
        }

        let kids: Vec<Object> = self.kids.iter().map(|id| Object::Reference(*id)).collect();
        let mut pages = Dictionary::new();
        pages.set("Type", Object::Name(b"Pages".to_vec()));
        pages.set("Count", Object::Integer(self.kids.len() as i64));
        pages.set("Kids", Object::Array(kids));
        self.doc
            .objects
            .insert(self.pages_id, Object::Dictionary(pages));

        let mut catalog = Dictionary::new();
        catalog.set("Type", Object::Name(b"Catalog".to_vec()));
        catalog.set("Pages", Object::Reference(self.pages_id));
        let catalog_id = self.doc.add_object(Object::Dictionary(catalog));
        self.doc.trailer.set("Root", catalog_id);

        self.doc.compress();
        self.doc
            .save(output)
            .map_err(|e| GalleryError::Sink(format!("{}: {}", output.display(), e)))?;
        Ok(())
    }
}

/// Escape a string for a PDF literal string object.
fn escape_pdf_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '(' | ')' | '\\' => {
                out.push('\\');
                out.push(ch);
            }
            '\n' | '\r' => out.push(' '),
            _ => out.push(ch),
        }
    }
    out
}

/// Build the image XObject stream (and SMask stream, when the image has
/// alpha) for a normalized scratch copy.
///
/// Scratch JPEGs embed as-is under DCTDecode. Anything else is decoded;
/// images with alpha become a FlateDecode RGB stream plus a DCTDecode
/// grayscale SMask, opaque ones are re-encoded as JPEG.
fn embed_image(image: &NormalizedImage) -> Result<(Stream, Option<Stream>), String> {
    let data = fs::read(&image.path).map_err(|e| e.to_string())?;

    if data.starts_with(&[0xFF, 0xD8]) {
        let mut dict = Dictionary::new();
        dict.set("Type", Object::Name(b"XObject".to_vec()));
        dict.set("Subtype", Object::Name(b"Image".to_vec()));
        dict.set("Width", Object::Integer(image.pixel_width as i64));
        dict.set("Height", Object::Integer(image.pixel_height as i64));
        dict.set("ColorSpace", Object::Name(b"DeviceRGB".to_vec()));
        dict.set("BitsPerComponent", Object::Integer(8));
        dict.set("Filter", Object::Name(b"DCTDecode".to_vec()));
        return Ok((Stream::new(dict, data), None));
    }

    let decoded = image::load_from_memory(&data).map_err(|e| e.to_string())?;
    if has_alpha(&decoded) {
        encode_with_alpha_stream(&decoded)
    } else {
        let stream = encode_as_jpeg_stream(&decoded, EMBED_JPEG_QUALITY)?;
        Ok((stream, None))
    }
}

/// Encode an image as a JPEG DCTDecode stream.
fn encode_as_jpeg_stream(img: &image::DynamicImage, quality: u8) -> Result<Stream, String> {
    let rgb = img.to_rgb8();
    let (width, height) = rgb.dimensions();

    let mut jpeg_bytes = Vec::new();
    let mut encoder = jpeg_encoder::Encoder::new(&mut jpeg_bytes, quality);
    encoder.set_sampling_factor(jpeg_encoder::SamplingFactor::R_4_2_0);
    encoder
        .encode(
            rgb.as_raw(),
            width as u16,
            height as u16,
            jpeg_encoder::ColorType::Rgb,
        )
        .map_err(|e| format!("failed to encode JPEG: {}", e))?;

    let mut dict = Dictionary::new();
    dict.set("Type", Object::Name(b"XObject".to_vec()));
    dict.set("Subtype", Object::Name(b"Image".to_vec()));
    dict.set("Width", Object::Integer(width as i64));
    dict.set("Height", Object::Integer(height as i64));
    dict.set("ColorSpace", Object::Name(b"DeviceRGB".to_vec()));
    dict.set("BitsPerComponent", Object::Integer(8));
    dict.set("Filter", Object::Name(b"DCTDecode".to_vec()));

    Ok(Stream::new(dict, jpeg_bytes))
}

/// Encode an image with alpha as FlateDecode RGB plus a grayscale SMask.
fn encode_with_alpha_stream(
    img: &image::DynamicImage,
) -> Result<(Stream, Option<Stream>), String> {
    let rgba = img.to_rgba8();
    let (width, height) = rgba.dimensions();
    let raw_data = rgba.into_raw();

    let mut rgb_data = Vec::with_capacity((width * height * 3) as usize);
    let mut alpha_data = Vec::with_capacity((width * height) as usize);
    for chunk in raw_data.chunks(4) {
        rgb_data.push(chunk[0]);
        rgb_data.push(chunk[1]);
        rgb_data.push(chunk[2]);
        alpha_data.push(chunk[3]);
    }

    let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::best());
    std::io::Write::write_all(&mut encoder, &rgb_data)
        .map_err(|e| format!("failed to compress RGB data: {}", e))?;
    let compressed_rgb = encoder
        .finish()
        .map_err(|e| format!("failed to finish compression: {}", e))?;

    let mut dict = Dictionary::new();
    dict.set("Type", Object::Name(b"XObject".to_vec()));
    dict.set("Subtype", Object::Name(b"Image".to_vec()));
    dict.set("Width", Object::Integer(width as i64));
    dict.set("Height", Object::Integer(height as i64));
    dict.set("ColorSpace", Object::Name(b"DeviceRGB".to_vec()));
    dict.set("BitsPerComponent", Object::Integer(8));
    dict.set("Filter", Object::Name(b"FlateDecode".to_vec()));
    let main_stream = Stream::new(dict, compressed_rgb);

    let mut smask_bytes = Vec::new();
    let encoder = jpeg_encoder::Encoder::new(&mut smask_bytes, EMBED_JPEG_QUALITY);
    encoder
        .encode(
            &alpha_data,
            width as u16,
            height as u16,
            jpeg_encoder::ColorType::Luma,
        )
        .map_err(|e| format!("failed to encode SMask: {}", e))?;

    let mut smask_dict = Dictionary::new();
    smask_dict.set("Type", Object::Name(b"XObject".to_vec()));
    smask_dict.set("Subtype", Object::Name(b"Image".to_vec()));
    smask_dict.set("Width", Object::Integer(width as i64));
    smask_dict.set("Height", Object::Integer(height as i64));
    smask_dict.set("ColorSpace", Object::Name(b"DeviceGray".to_vec()));
    smask_dict.set("BitsPerComponent", Object::Integer(8));
    smask_dict.set("Filter", Object::Name(b"DCTDecode".to_vec()));
    let smask_stream = Stream::new(smask_dict, smask_bytes);

    Ok((main_stream, Some(smask_stream)))
}
