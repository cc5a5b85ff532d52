// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Per-page PDF synthesis: the page image with an invisible, positioned text
// layer on top ("sandwich" rendering), or the text layer alone for grafting
// onto an existing page.
//
// Text is drawn in render mode 3 (invisible) with Type3 fonts whose single
// glyph is empty. Each font covers up to 256 distinct characters of the
// page and carries a ToUnicode map, so any script stays searchable and
// copyable. Word width is matched with horizontal scaling (`Tz`).

use std::collections::HashMap;
use std::fmt::Write as _;

use image::DynamicImage;
use lopdf::{Dictionary, Document, Object, ObjectId, Stream, dictionary};
use ocrwerk_core::page::PageFailureKind;
use thiserror::Error;
use tracing::{debug, instrument};

use super::deflate;
use super::objects::displayed_size;
use crate::ocr::TextPage;

/// Resource name prefix for text layer fonts.
pub const FONT_PREFIX: &str = "OcrF";

/// Resource name of the page image.
const IMAGE_NAME: &str = "OcrIm0";

/// Advance width of the invisible glyph, in glyph space (1/1000 em).
const GLYPH_WIDTH: i64 = 500;

/// Failure to build a page's PDF.
#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("cannot encode page image: {0}")]
    Image(String),

    #[error("cannot write page PDF: {0}")]
    Pdf(String),
}

impl SynthesisError {
    pub fn kind(&self) -> PageFailureKind {
        PageFailureKind::SynthesisFailed
    }
}

/// Native page geometry the text layer is drawn into.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageFrame {
    pub media_box: [f64; 4],
    /// Clockwise `/Rotate` of the page, 0, 90, 180 or 270.
    pub rotation: i32,
}

impl PageFrame {
    /// Size of the page as displayed, which is the frame OCR boxes are in.
    pub fn displayed_size(&self) -> (f64, f64) {
        displayed_size(self.media_box, self.rotation)
    }

    /// `cm` operands mapping displayed coordinates to native page space.
    pub fn display_to_native(&self) -> [f64; 6] {
        let [llx, lly, urx, ury] = self.media_box;
        let (w, h) = (urx - llx, ury - lly);
        let [a, b, c, d, e, f] = match self.rotation.rem_euclid(360) {
            90 => [0.0, 1.0, -1.0, 0.0, w, 0.0],
            180 => [-1.0, 0.0, 0.0, -1.0, w, h],
            270 => [0.0, -1.0, 1.0, 0.0, 0.0, h],
            _ => [1.0, 0.0, 0.0, 1.0, 0.0, 0.0],
        };
        [a, b, c, d, e + llx, f + lly]
    }
}

/// What a synthesized page is made of.
#[derive(Debug, Clone, Copy)]
pub struct SynthesisInput<'a> {
    /// Visible page image, spanning the whole page as displayed by the source.
    pub visible: &'a DynamicImage,
    /// Recognized words, in the pixel space of the OCR raster.
    pub text: &'a TextPage,
    /// Source page size as displayed, in points.
    pub page_size: (f64, f64),
    /// Clockwise rotation that makes the page upright, 0 when none.
    pub correction: i32,
}

/// Build a single-page PDF holding the image and the invisible text.
///
/// With an orientation correction the image keeps its orientation and the
/// page gets `/Rotate`, so viewers show it upright; the text is laid out in
/// the upright frame.
#[instrument(skip_all, fields(words = input.text.word_count(), correction = input.correction))]
pub fn synthesize_page(input: &SynthesisInput<'_>) -> Result<Vec<u8>, SynthesisError> {
    let (width, height) = input.page_size;
    let frame = PageFrame {
        media_box: [0.0, 0.0, width, height],
        rotation: input.correction.rem_euclid(360),
    };

    let mut doc = Document::with_version("1.7");
    let image_id = doc.add_object(image_xobject(input.visible));

    let mut content = format!("q {} 0 0 {} 0 0 cm /{IMAGE_NAME} Do Q\n", num(width), num(height)).into_bytes();
    let (layer, fonts) = text_layer(&mut doc, input.text, &frame);
    content.extend_from_slice(&layer);

    let resources = dictionary! {
        "XObject" => dictionary! { IMAGE_NAME => image_id },
        "Font" => fonts,
    };
    finish_single_page(doc, &frame, content, resources)
}

/// Build a single-page PDF holding only the invisible text, laid out for a
/// page with the given native geometry.
#[instrument(skip_all, fields(words = text.word_count()))]
pub fn render_overlay(text: &TextPage, frame: &PageFrame) -> Result<Vec<u8>, SynthesisError> {
    let mut doc = Document::with_version("1.7");
    let (layer, fonts) = text_layer(&mut doc, text, frame);
    finish_single_page(doc, frame, layer, dictionary! { "Font" => fonts })
}

fn finish_single_page(
    mut doc: Document,
    frame: &PageFrame,
    content: Vec<u8>,
    resources: Dictionary,
) -> Result<Vec<u8>, SynthesisError> {
    let pages_id = doc.new_object_id();
    let content_id = doc.add_object(Stream::new(Dictionary::new(), content));
    let media_box: Vec<Object> = frame.media_box.iter().map(|v| Object::Real(*v as _)).collect();
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => media_box,
        "Rotate" => i64::from(frame.rotation),
        "Contents" => content_id,
        "Resources" => resources,
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![Object::Reference(page_id)],
            "Count" => 1,
        }),
    );
    let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).map_err(|e| SynthesisError::Pdf(e.to_string()))?;
    Ok(bytes)
}

fn image_xobject(image: &DynamicImage) -> Stream {
    let (width, height) = (image.width(), image.height());
    let (color_space, pixels) = match image {
        DynamicImage::ImageLuma8(gray) => ("DeviceGray", gray.as_raw().clone()),
        DynamicImage::ImageLumaA8(_) | DynamicImage::ImageLuma16(_) | DynamicImage::ImageLumaA16(_) => {
            ("DeviceGray", image.to_luma8().into_raw())
        }
        other => ("DeviceRGB", other.to_rgb8().into_raw()),
    };
    Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => i64::from(width),
            "Height" => i64::from(height),
            "ColorSpace" => color_space,
            "BitsPerComponent" => 8,
            "Filter" => "FlateDecode",
        },
        deflate(&pixels),
    )
}

/// Assignment of the page's characters to font codes.
#[derive(Debug, Default)]
struct FontPlan {
    /// Characters of each font, indexed by code.
    fonts: Vec<Vec<char>>,
    lookup: HashMap<char, (usize, u8)>,
}

impl FontPlan {
    fn for_page(text: &TextPage) -> Self {
        let mut plan = Self::default();
        for c in text.words.iter().flat_map(|w| w.text.chars()).filter(|c| !c.is_whitespace()) {
            if plan.lookup.contains_key(&c) {
                continue;
            }
            if plan.fonts.last().is_none_or(|f| f.len() == 256) {
                plan.fonts.push(Vec::with_capacity(256));
            }
            let font = plan.fonts.len() - 1;
            let chars = &mut plan.fonts[font];
            plan.lookup.insert(c, (font, chars.len() as u8));
            chars.push(c);
        }
        plan
    }

    /// Split `text` into runs of (font, codes).
    fn encode(&self, text: &str) -> Vec<(usize, Vec<u8>)> {
        let mut runs: Vec<(usize, Vec<u8>)> = Vec::new();
        for c in text.chars() {
            let Some(&(font, code)) = self.lookup.get(&c) else {
                continue;
            };
            match runs.last_mut() {
                Some((f, codes)) if *f == font => codes.push(code),
                _ => runs.push((font, vec![code])),
            }
        }
        runs
    }
}

/// Write the fonts into `doc` and return the text layer content together
/// with the font resource dictionary.
fn text_layer(doc: &mut Document, text: &TextPage, frame: &PageFrame) -> (Vec<u8>, Dictionary) {
    let plan = FontPlan::for_page(text);
    let mut fonts = Dictionary::new();
    if plan.fonts.is_empty() || text.width == 0 || text.height == 0 {
        return (Vec::new(), fonts);
    }

    let glyph_id = doc.add_object(Stream::new(Dictionary::new(), format!("{GLYPH_WIDTH} 0 d0").into_bytes()));
    for (index, chars) in plan.fonts.iter().enumerate() {
        let font_id = type3_font(doc, glyph_id, chars);
        fonts.set(format!("{FONT_PREFIX}{index}"), font_id);
    }

    let (frame_w, frame_h) = frame.displayed_size();
    let sx = frame_w / f64::from(text.width);
    let sy = frame_h / f64::from(text.height);
    let [a, b, c, d, e, f] = frame.display_to_native();

    let mut out = String::from("q\n");
    let _ = writeln!(out, "{} {} {} {} {} {} cm", num(a), num(b), num(c), num(d), num(e), num(f));
    out.push_str("BT\n3 Tr\n");
    for word in &text.words {
        let runs = plan.encode(&word.text);
        let glyphs: usize = runs.iter().map(|(_, codes)| codes.len()).sum();
        if glyphs == 0 {
            continue;
        }
        let size = (f64::from(word.bbox.height) * sy).max(1.0);
        let target_width = (f64::from(word.bbox.width) * sx).max(0.1);
        let natural_width = glyphs as f64 * size * GLYPH_WIDTH as f64 / 1000.0;
        let scale = (100.0 * target_width / natural_width).clamp(1.0, 10_000.0);
        let advance = size * GLYPH_WIDTH as f64 / 1000.0 * scale / 100.0;

        let mut x = f64::from(word.bbox.left) * sx;
        let y = frame_h - f64::from(word.bbox.bottom()) * sy;
        for (font, codes) in runs {
            let _ = writeln!(
                out,
                "/{FONT_PREFIX}{font} {} Tf {} Tz 1 0 0 1 {} {} Tm <{}> Tj",
                num(size),
                num(scale),
                num(x),
                num(y),
                hex_codes(&codes)
            );
            x += advance * codes.len() as f64;
        }
    }
    out.push_str("ET\nQ\n");
    debug!(fonts = plan.fonts.len(), words = text.word_count(), "Text layer written");
    (out.into_bytes(), fonts)
}

fn type3_font(doc: &mut Document, glyph_id: ObjectId, chars: &[char]) -> ObjectId {
    let count = chars.len() as i64;
    let mut differences: Vec<Object> = vec![Object::Integer(0)];
    differences.extend(chars.iter().map(|_| Object::Name(b"g".to_vec())));
    let widths: Vec<Object> = chars.iter().map(|_| Object::Integer(GLYPH_WIDTH)).collect();
    let to_unicode = doc.add_object(Stream::new(Dictionary::new(), to_unicode_cmap(chars).into_bytes()));

    doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type3",
        "FontBBox" => vec![0.into(), 0.into(), GLYPH_WIDTH.into(), 1000.into()],
        "FontMatrix" => vec![
            Object::Real(0.001), Object::Integer(0), Object::Integer(0),
            Object::Real(0.001), Object::Integer(0), Object::Integer(0),
        ],
        "CharProcs" => dictionary! { "g" => glyph_id },
        "Encoding" => dictionary! { "Type" => "Encoding", "Differences" => differences },
        "FirstChar" => 0,
        "LastChar" => count - 1,
        "Widths" => widths,
        "Resources" => Dictionary::new(),
        "ToUnicode" => to_unicode,
    })
}

fn to_unicode_cmap(chars: &[char]) -> String {
    let mut cmap = String::from(
        "/CIDInit /ProcSet findresource begin\n12 dict begin\nbegincmap\n\
         /CIDSystemInfo << /Registry (Adobe) /Ordering (UCS) /Supplement 0 >> def\n\
         /CMapName /Adobe-Identity-UCS def\n/CMapType 2 def\n\
         1 begincodespacerange\n<00> <FF>\nendcodespacerange\n",
    );
    for (chunk_index, chunk) in chars.chunks(100).enumerate() {
        let _ = writeln!(cmap, "{} beginbfchar", chunk.len());
        for (offset, c) in chunk.iter().enumerate() {
            let code = chunk_index * 100 + offset;
            let mut units = [0u16; 2];
            let utf16: String = c.encode_utf16(&mut units).iter().map(|u| format!("{u:04X}")).collect();
            let _ = writeln!(cmap, "<{code:02X}> <{utf16}>");
        }
        cmap.push_str("endbfchar\n");
    }
    cmap.push_str("endcmap\nCMapName currentdict /CMap defineresource pop\nend\nend\n");
    cmap
}

fn hex_codes(codes: &[u8]) -> String {
    codes.iter().map(|c| format!("{c:02X}")).collect()
}

/// Compact number formatting for content streams.
fn num(value: f64) -> String {
    let text = format!("{value:.3}");
    let text = text.trim_end_matches('0').trim_end_matches('.');
    if text == "-0" { "0".to_string() } else { text.to_string() }
}
