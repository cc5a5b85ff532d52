// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Source document inspection: everything the pipeline needs to know about
// the input before any page is dispatched.
//
// For each page this works out the geometry, rotation, whether text is
// already present (and whether that text is an invisible OCR layer), the
// resolution of the images drawn on it and their colour depth.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use lopdf::content::Content;
use lopdf::{Dictionary, Document, Object, ObjectId};
use ocrwerk_core::error::OcrwerkError;
use ocrwerk_core::page::{MAX_OVERSAMPLE_DPI, PageUnitDescriptor, PreprocessFlags};
use ocrwerk_core::types::{ColorMode, DocumentMetadata, PageSelection};
use tracing::{debug, info, instrument, warn};

use super::objects::{self, decode_text_string, get, get_dict, name, number, resolve};
use crate::integrity::Fingerprint;

/// Form XObjects nested deeper than this are not inspected.
const MAX_FORM_DEPTH: usize = 4;

/// What was found on one source page.
#[derive(Debug, Clone, PartialEq)]
pub struct PageInfo {
    /// 1-based page number.
    pub index: u32,
    pub object_id: ObjectId,
    /// Normalized `[llx, lly, urx, ury]`.
    pub media_box: [f64; 4],
    pub rotation: i32,
    pub has_text: bool,
    /// Every text-showing operation on the page draws invisibly (render
    /// mode 3), which is what OCR layers look like.
    pub has_invisible_text: bool,
    /// Highest resolution of the images drawn on the page.
    pub image_dpi: Option<u32>,
    pub color_mode: ColorMode,
    pub image_count: usize,
}

impl PageInfo {
    /// Width and height as displayed (after `/Rotate`).
    pub fn displayed_size(&self) -> (f64, f64) {
        objects::displayed_size(self.media_box, self.rotation)
    }
}

/// An opened, inspected input PDF.
#[derive(Debug)]
pub struct SourceDocument {
    path: PathBuf,
    document: Document,
    pages: Vec<PageInfo>,
    metadata: DocumentMetadata,
}

impl SourceDocument {
    /// Open and inspect a PDF. Encrypted files are rejected.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self, OcrwerkError> {
        let path = path.as_ref();
        let document = Document::load(path).map_err(|err| {
            let text = err.to_string();
            if text.contains("ncrypt") || text.contains("ecrypt") {
                OcrwerkError::EncryptedPdf
            } else {
                OcrwerkError::Input(format!("{} is not a readable PDF: {text}", path.display()))
            }
        })?;
        Self::from_document(document, path)
    }

    /// Inspect an already loaded document.
    pub fn from_document(document: Document, path: impl Into<PathBuf>) -> Result<Self, OcrwerkError> {
        if document.trailer.get(b"Encrypt").is_ok() {
            return Err(OcrwerkError::EncryptedPdf);
        }

        let page_ids = document.get_pages();
        if page_ids.is_empty() {
            return Err(OcrwerkError::Input("the PDF has no pages".into()));
        }

        let mut pages = Vec::with_capacity(page_ids.len());
        for (&index, &object_id) in &page_ids {
            pages.push(inspect_page(&document, index, object_id));
        }
        let metadata = read_metadata(&document);

        info!(
            pages = pages.len(),
            with_text = pages.iter().filter(|p| p.has_text).count(),
            "Source document inspected"
        );

        Ok(Self {
            path: path.into(),
            document,
            pages,
            metadata,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn pages(&self) -> &[PageInfo] {
        &self.pages
    }

    /// Page by 1-based index.
    pub fn page(&self, index: u32) -> Option<&PageInfo> {
        index.checked_sub(1).and_then(|i| self.pages.get(i as usize))
    }

    pub fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    /// Title, author, subject and keywords from `/Info`.
    pub fn metadata(&self) -> &DocumentMetadata {
        &self.metadata
    }

    /// `/CreationDate` from `/Info`, as written.
    pub fn creation_date(&self) -> Option<&Object> {
        info_dict(&self.document).and_then(|info| get(&self.document, info, b"CreationDate"))
    }

    /// Fingerprint of a page's content and drawn resources.
    pub fn fingerprint(&self, index: u32) -> Option<String> {
        self.page(index).map(|p| page_fingerprint(&self.document, p.object_id))
    }

    /// Build one descriptor per page.
    pub fn descriptors(
        &self,
        languages: &[String],
        flags: &PreprocessFlags,
        selection: Option<&PageSelection>,
    ) -> Result<Vec<PageUnitDescriptor>, OcrwerkError> {
        let languages: Arc<[String]> = Arc::from(languages.to_vec());
        self.pages
            .iter()
            .map(|page| {
                let (w, h) = page.displayed_size();
                PageUnitDescriptor::builder(page.index, w, h)
                    .rotation(page.rotation)
                    .dpi(page.image_dpi)
                    .color_mode(page.color_mode)
                    .languages(Arc::clone(&languages))
                    .flags(flags.clone())
                    .text(page.has_text, page.has_invisible_text)
                    .selected(selection.is_none_or(|s| s.contains(page.index)))
                    .build()
            })
            .collect()
    }
}

/// SHA-256 over a page's raw content streams and the raw data of every
/// XObject its resources name, in name order.
pub fn page_fingerprint(doc: &Document, page_id: ObjectId) -> String {
    let mut fp = Fingerprint::new();
    for stream in objects::content_streams(doc, page_id) {
        fp.part(b"content", &stream.content);
    }
    if let Some(xobjects) = objects::page_resources(doc, page_id).and_then(|r| get_dict(doc, r, b"XObject")) {
        let mut names: Vec<&Vec<u8>> = xobjects.iter().map(|(k, _)| k).collect();
        names.sort();
        for key in names {
            if let Some(Object::Stream(stream)) = get(doc, xobjects, key) {
                fp.part(key, &stream.content);
            }
        }
    }
    fp.finish()
}

fn info_dict(doc: &Document) -> Option<&Dictionary> {
    match resolve(doc, doc.trailer.get(b"Info").ok()?)? {
        Object::Dictionary(d) => Some(d),
        _ => None,
    }
}

fn read_metadata(doc: &Document) -> DocumentMetadata {
    let Some(info) = info_dict(doc) else {
        return DocumentMetadata::default();
    };
    let field = |key: &[u8]| match get(doc, info, key) {
        Some(Object::String(bytes, _)) => {
            let text = decode_text_string(bytes).trim().to_string();
            (!text.is_empty()).then_some(text)
        }
        _ => None,
    };
    DocumentMetadata {
        title: field(b"Title"),
        author: field(b"Author"),
        subject: field(b"Subject"),
        keywords: field(b"Keywords"),
    }
}

fn inspect_page(doc: &Document, index: u32, object_id: ObjectId) -> PageInfo {
    let media_box = objects::media_box(doc, object_id);
    let rotation = objects::rotation(doc, object_id);
    let content = objects::page_content(doc, object_id);
    let resources = objects::page_resources(doc, object_id);

    let mut scan = ContentScan::default();
    scan.run(doc, &content, resources, IDENTITY, 0);

    let info = PageInfo {
        index,
        object_id,
        media_box,
        rotation,
        has_text: scan.visible_text || scan.invisible_text,
        has_invisible_text: scan.invisible_text && !scan.visible_text,
        image_dpi: scan.max_dpi.map(|d| d.round().clamp(1.0, f64::from(MAX_OVERSAMPLE_DPI)) as u32),
        color_mode: scan.color.unwrap_or(ColorMode::Color),
        image_count: scan.images,
    };
    debug!(
        page = index,
        has_text = info.has_text,
        invisible = info.has_invisible_text,
        dpi = ?info.image_dpi,
        color = ?info.color_mode,
        "Page inspected"
    );
    info
}

type Matrix = [f64; 6];

const IDENTITY: Matrix = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0];

/// `a × b` in PDF's row-vector convention (apply `a`, then `b`).
fn multiply(a: &Matrix, b: &Matrix) -> Matrix {
    [
        a[0] * b[0] + a[1] * b[2],
        a[0] * b[1] + a[1] * b[3],
        a[2] * b[0] + a[3] * b[2],
        a[2] * b[1] + a[3] * b[3],
        a[4] * b[0] + a[5] * b[2] + b[4],
        a[4] * b[1] + a[5] * b[3] + b[5],
    ]
}

fn matrix_from(operands: &[Object]) -> Option<Matrix> {
    let values: Vec<f64> = operands.iter().filter_map(number).collect();
    (values.len() == 6).then(|| [values[0], values[1], values[2], values[3], values[4], values[5]])
}

/// Accumulated findings while walking a page's content.
#[derive(Debug, Default)]
struct ContentScan {
    visible_text: bool,
    invisible_text: bool,
    images: usize,
    max_dpi: Option<f64>,
    color: Option<ColorMode>,
}

impl ContentScan {
    fn run(&mut self, doc: &Document, content: &[u8], resources: Option<&Dictionary>, base: Matrix, depth: usize) {
        let operations = match Content::decode(content) {
            Ok(c) => c.operations,
            Err(err) => {
                warn!(error = %err, "Unparseable content stream; treating page as image-only");
                return;
            }
        };

        let mut ctm = base;
        let mut render_mode = 0_i64;
        let mut stack: Vec<(Matrix, i64)> = Vec::new();

        for op in &operations {
            match op.operator.as_str() {
                "q" => stack.push((ctm, render_mode)),
                "Q" => {
                    if let Some((saved_ctm, saved_mode)) = stack.pop() {
                        ctm = saved_ctm;
                        render_mode = saved_mode;
                    }
                }
                "cm" => {
                    if let Some(m) = matrix_from(&op.operands) {
                        ctm = multiply(&m, &ctm);
                    }
                }
                "Tr" => {
                    if let Some(mode) = op.operands.first().and_then(number) {
                        render_mode = mode as i64;
                    }
                }
                "Tj" | "TJ" | "'" | "\"" => {
                    if render_mode == 3 {
                        self.invisible_text = true;
                    } else {
                        self.visible_text = true;
                    }
                }
                "Do" => {
                    let Some(Object::Name(key)) = op.operands.first() else {
                        continue;
                    };
                    let xobject = resources
                        .and_then(|r| get_dict(doc, r, b"XObject"))
                        .and_then(|x| get(doc, x, key));
                    if let Some(Object::Stream(stream)) = xobject {
                        match name(doc, &stream.dict, b"Subtype") {
                            Some(b"Image") => self.image(doc, &stream.dict, &ctm),
                            Some(b"Form") if depth < MAX_FORM_DEPTH => {
                                let matrix = get(doc, &stream.dict, b"Matrix")
                                    .and_then(|m| m.as_array().ok())
                                    .and_then(|m| matrix_from(m))
                                    .unwrap_or(IDENTITY);
                                let form_resources = get_dict(doc, &stream.dict, b"Resources").or(resources);
                                let data = stream.decompressed_content().unwrap_or_else(|_| stream.content.clone());
                                self.run(doc, &data, form_resources, multiply(&matrix, &ctm), depth + 1);
                            }
                            _ => {}
                        }
                    }
                }
                _ => {}
            }
        }
    }

    fn image(&mut self, doc: &Document, dict: &Dictionary, ctm: &Matrix) {
        self.images += 1;
        let color = image_color_mode(doc, dict);
        self.color = Some(self.color.map_or(color, |c| c.widen(color)));

        let width = get(doc, dict, b"Width").and_then(number).unwrap_or(0.0);
        let height = get(doc, dict, b"Height").and_then(number).unwrap_or(0.0);
        // The image occupies the unit square; its edges map to these lengths.
        let drawn_w = (ctm[0] * ctm[0] + ctm[1] * ctm[1]).sqrt();
        let drawn_h = (ctm[2] * ctm[2] + ctm[3] * ctm[3]).sqrt();
        if width <= 0.0 || height <= 0.0 || drawn_w < 1e-3 || drawn_h < 1e-3 {
            return;
        }
        let dpi = (width / (drawn_w / 72.0)).max(height / (drawn_h / 72.0));
        self.max_dpi = Some(self.max_dpi.map_or(dpi, |d| d.max(dpi)));
    }
}

fn image_color_mode(doc: &Document, dict: &Dictionary) -> ColorMode {
    if matches!(get(doc, dict, b"ImageMask"), Some(Object::Boolean(true))) {
        return ColorMode::Bilevel;
    }
    if get(doc, dict, b"BitsPerComponent").and_then(number) == Some(1.0) {
        return ColorMode::Bilevel;
    }
    let filters = objects::filters(doc, dict);
    if filters.iter().any(|f| f == b"CCITTFaxDecode" || f == b"JBIG2Decode") {
        return ColorMode::Bilevel;
    }
    match get(doc, dict, b"ColorSpace") {
        Some(Object::Name(n)) if n == b"DeviceGray" || n == b"CalGray" => ColorMode::Gray,
        Some(Object::Array(items)) => match items.first().and_then(|i| resolve(doc, i)) {
            Some(Object::Name(n)) if n == b"CalGray" => ColorMode::Gray,
            Some(Object::Name(n)) if n == b"ICCBased" => {
                let components = items
                    .get(1)
                    .and_then(|i| resolve(doc, i))
                    .and_then(|o| o.as_stream().ok())
                    .and_then(|s| get(doc, &s.dict, b"N"))
                    .and_then(number);
                if components == Some(1.0) { ColorMode::Gray } else { ColorMode::Color }
            }
            _ => ColorMode::Color,
        },
        _ => ColorMode::Color,
    }
}
