// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Output assembly: one output page per input page, in input order.
//
// Pass-through pages are deep-copied from the source with their content
// and resources untouched. Synthesized pages are copied from their
// single-page PDFs. Overlay pages are source pages with any previous
// invisible text removed and a fresh text layer appended.

use std::collections::HashMap;

use chrono::{DateTime, FixedOffset, Local};
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream, dictionary};
use ocrwerk_core::error::OcrwerkError;
use ocrwerk_core::page::{PageContent, PageDecision, PageResult};
use ocrwerk_core::types::DocumentMetadata;
use tracing::{debug, info, instrument, warn};

use super::inspect::{SourceDocument, page_fingerprint};
use super::objects::{self, INHERITABLE_PAGE_KEYS, displayed_size, pdf_date, text_string};
use super::sandwich::FONT_PREFIX;
use crate::integrity;

/// Catalog entries carried over from the source document.
const CATALOG_KEYS: [&[u8]; 7] = [
    b"Outlines",
    b"PageLabels",
    b"Names",
    b"Dests",
    b"Lang",
    b"ViewerPreferences",
    b"PageMode",
];

/// Largest size difference, in points, tolerated between a source page and
/// its output page.
const GEOMETRY_TOLERANCE: f64 = 0.01;

/// The assembled output document.
#[derive(Debug, Clone)]
pub struct AssembledDocument {
    pub bytes: Vec<u8>,
    pub page_count: u32,
    /// Pages copied through byte-identically.
    pub pass_through_pages: Vec<u32>,
    /// Pages whose processing failed and which were copied through.
    pub failed_pages: Vec<u32>,
    pub metadata: DocumentMetadata,
}

/// Builds the output document from per-page results.
pub struct Assembler<'a> {
    source: &'a SourceDocument,
    metadata: DocumentMetadata,
    producer: String,
    timestamp: DateTime<FixedOffset>,
}

impl<'a> Assembler<'a> {
    pub fn new(source: &'a SourceDocument) -> Self {
        Self {
            source,
            metadata: source.metadata().clone(),
            producer: format!("ocrwerk {}", env!("CARGO_PKG_VERSION")),
            timestamp: Local::now().fixed_offset(),
        }
    }

    /// Metadata overrides; unset fields keep the source values.
    pub fn with_metadata(mut self, overrides: DocumentMetadata) -> Self {
        self.metadata = overrides.or(self.source.metadata());
        self
    }

    /// Timestamp written as the modification date (and as the creation
    /// date when the source has none).
    pub fn with_timestamp(mut self, timestamp: DateTime<FixedOffset>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Assemble the output. `results` must hold exactly one result per
    /// source page, in page order.
    #[instrument(skip_all, fields(pages = results.len()))]
    pub fn assemble(&self, results: &[PageResult]) -> Result<AssembledDocument, OcrwerkError> {
        let page_count = self.source.page_count();
        if results.len() != page_count as usize {
            return Err(OcrwerkError::Assembly(format!(
                "{} page results for a {page_count}-page document",
                results.len()
            )));
        }
        if let Some((i, r)) = results.iter().enumerate().find(|(i, r)| r.page != *i as u32 + 1) {
            return Err(OcrwerkError::Assembly(format!(
                "result for page {} found at position {}",
                r.page,
                i + 1
            )));
        }

        let source = self.source.document();
        let mut target = Document::with_version("1.7");
        let mut grafter = Grafter::new(source);

        let pages_id = target.new_object_id();
        let mut kids = Vec::with_capacity(results.len());
        for info in self.source.pages() {
            let id = target.new_object_id();
            grafter.seed(info.object_id, id);
            kids.push(id);
        }

        for (result, &target_id) in results.iter().zip(&kids) {
            let Some(info) = self.source.page(result.page) else {
                return Err(OcrwerkError::Assembly(format!("page {} is not in the source", result.page)));
            };
            let mut page = match &result.content {
                PageContent::PassThrough => grafter.page(&mut target, info.object_id)?,
                PageContent::Synthesized(pdf) => {
                    let mut page = single_page(&mut target, pdf, result.page)?;
                    if result.orientation_correction == 0
                        && let Some(annots) = source
                            .get_dictionary(info.object_id)
                            .ok()
                            .and_then(|d| d.get(b"Annots").ok())
                    {
                        page.set("Annots", grafter.value(&mut target, annots));
                    }
                    page
                }
                PageContent::Overlay(pdf) => {
                    let page = grafter.page(&mut target, info.object_id)?;
                    // The copied resources must exist before fonts are merged in.
                    grafter.drain(&mut target);
                    let stripped = strip_invisible_text(&objects::page_content(source, info.object_id));
                    graft_overlay(&mut target, page, stripped, pdf, result.page)?
                }
            };
            page.set("Parent", pages_id);
            target.objects.insert(target_id, Object::Dictionary(page));
        }

        target.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids.iter().map(|&id| Object::Reference(id)).collect::<Vec<_>>(),
                "Count" => i64::from(page_count),
            }),
        );

        let mut catalog = dictionary! { "Type" => "Catalog", "Pages" => pages_id };
        if let Ok(source_catalog) = source.catalog() {
            for key in CATALOG_KEYS {
                if let Ok(value) = source_catalog.get(key) {
                    catalog.set(key.to_vec(), grafter.value(&mut target, value));
                }
            }
        }
        grafter.drain(&mut target);

        let catalog_id = target.add_object(catalog);
        target.trailer.set("Root", catalog_id);
        let info_id = target.add_object(self.info_dictionary());
        target.trailer.set("Info", info_id);

        let mut bytes = Vec::new();
        target
            .save_to(&mut bytes)
            .map_err(|e| OcrwerkError::Assembly(format!("cannot write output PDF: {e}")))?;

        self.verify(&bytes, results)?;

        let pass_through_pages: Vec<u32> = results
            .iter()
            .filter(|r| r.decision.is_pass_through())
            .map(|r| r.page)
            .collect();
        let failed_pages: Vec<u32> = results
            .iter()
            .filter(|r| r.decision == PageDecision::FailedTolerated)
            .map(|r| r.page)
            .collect();
        info!(
            pages = page_count,
            pass_through = pass_through_pages.len(),
            failed = failed_pages.len(),
            bytes = bytes.len(),
            "Output assembled"
        );

        Ok(AssembledDocument {
            bytes,
            page_count,
            pass_through_pages,
            failed_pages,
            metadata: self.metadata.clone(),
        })
    }

    fn info_dictionary(&self) -> Dictionary {
        let mut info = Dictionary::new();
        let fields = [
            ("Title", &self.metadata.title),
            ("Author", &self.metadata.author),
            ("Subject", &self.metadata.subject),
            ("Keywords", &self.metadata.keywords),
        ];
        for (key, value) in fields {
            if let Some(value) = value {
                info.set(key, text_string(value));
            }
        }
        info.set("Creator", text_string(&self.producer));
        info.set("Producer", text_string(&self.producer));
        let now = pdf_date(&self.timestamp);
        let created = self.source.creation_date().cloned().unwrap_or_else(|| text_string(&now));
        info.set("CreationDate", created);
        info.set("ModDate", text_string(&now));
        info
    }

    /// Reload the output and check page count, geometry and the integrity
    /// of pass-through pages.
    fn verify(&self, bytes: &[u8], results: &[PageResult]) -> Result<(), OcrwerkError> {
        let output = Document::load_mem(bytes)
            .map_err(|e| OcrwerkError::Assembly(format!("output PDF does not reload: {e}")))?;
        let pages = output.get_pages();
        if pages.len() != results.len() {
            return Err(OcrwerkError::Assembly(format!(
                "output has {} pages, expected {}",
                pages.len(),
                results.len()
            )));
        }

        for result in results {
            let (Some(info), Some(&out_id)) = (self.source.page(result.page), pages.get(&result.page)) else {
                return Err(OcrwerkError::Assembly(format!("page {} missing from output", result.page)));
            };
            let rotation = objects::rotation(&output, out_id) - result.orientation_correction;
            let (ow, oh) = displayed_size(objects::media_box(&output, out_id), rotation.rem_euclid(360));
            let (sw, sh) = info.displayed_size();
            if (ow - sw).abs() > GEOMETRY_TOLERANCE || (oh - sh).abs() > GEOMETRY_TOLERANCE {
                return Err(OcrwerkError::Assembly(format!(
                    "page {} is {ow:.2} x {oh:.2} pt, source is {sw:.2} x {sh:.2} pt",
                    result.page
                )));
            }
            if result.content == PageContent::PassThrough {
                let expected = page_fingerprint(self.source.document(), info.object_id);
                integrity::verify_page(result.page, &expected, &page_fingerprint(&output, out_id))?;
            }
        }
        debug!(pages = results.len(), "Output verified");
        Ok(())
    }
}

/// Copy the only page of a single-page PDF into `target`, returning its
/// dictionary (without `/Parent`).
fn single_page(target: &mut Document, pdf: &[u8], page: u32) -> Result<Dictionary, OcrwerkError> {
    let doc = Document::load_mem(pdf)
        .map_err(|e| OcrwerkError::Assembly(format!("page {page}: unreadable page PDF: {e}")))?;
    let Some(&page_id) = doc.get_pages().get(&1) else {
        return Err(OcrwerkError::Assembly(format!("page {page}: page PDF has no page")));
    };
    let mut grafter = Grafter::new(&doc);
    let dict = grafter.page(target, page_id)?;
    grafter.drain(target);
    Ok(dict)
}

/// Put the text layer of `overlay_pdf` on top of `page`, whose content is
/// replaced by `content` (the source content with old OCR text removed).
fn graft_overlay(
    target: &mut Document,
    mut page: Dictionary,
    content: Vec<u8>,
    overlay_pdf: &[u8],
    page_no: u32,
) -> Result<Dictionary, OcrwerkError> {
    let overlay = Document::load_mem(overlay_pdf)
        .map_err(|e| OcrwerkError::Assembly(format!("page {page_no}: unreadable overlay PDF: {e}")))?;
    let Some(&overlay_page) = overlay.get_pages().get(&1) else {
        return Err(OcrwerkError::Assembly(format!("page {page_no}: overlay PDF has no page")));
    };

    let mut grafter = Grafter::new(&overlay);
    let mut fonts = Vec::new();
    if let Some(font_dict) = objects::page_resources(&overlay, overlay_page)
        .and_then(|res| objects::get_dict(&overlay, res, b"Font"))
    {
        for (name, value) in font_dict.iter() {
            fonts.push((name.clone(), grafter.value(target, value)));
        }
    }
    grafter.drain(target);

    let mut combined = b"q\n".to_vec();
    combined.extend_from_slice(&content);
    combined.extend_from_slice(b"\nQ\n");
    combined.extend_from_slice(&objects::page_content(&overlay, overlay_page));
    let content_id = target.add_object(Stream::new(Dictionary::new(), combined));
    page.set("Contents", content_id);

    let mut resources = owned_dictionary(target, page.get(b"Resources").ok());
    let mut font_resources = owned_dictionary(target, resources.get(b"Font").ok());
    for (name, font) in fonts {
        font_resources.set(name, font);
    }
    resources.set("Font", font_resources);
    page.set("Resources", resources);

    let rotation = objects::rotation(&overlay, overlay_page);
    page.set("Rotate", i64::from(rotation));
    debug!(page = page_no, rotation, "Overlay grafted");
    Ok(page)
}

/// A copy of a dictionary value already in `target`, direct or referenced.
fn owned_dictionary(target: &Document, value: Option<&Object>) -> Dictionary {
    match value.and_then(|v| objects::resolve(target, v)) {
        Some(Object::Dictionary(d)) => d.clone(),
        _ => Dictionary::new(),
    }
}

/// Remove the text of text objects drawn entirely in render mode 3.
///
/// Text state (font, render mode, spacing, scaling) persists past `ET`, so
/// a removed object keeps its state operators and loses only its show
/// operators. Content that does not parse is returned unchanged.
pub fn strip_invisible_text(content: &[u8]) -> Vec<u8> {
    let parsed = match Content::decode(content) {
        Ok(parsed) => parsed,
        Err(err) => {
            warn!(%err, "Cannot parse page content; previous text layer kept");
            return content.to_vec();
        }
    };

    let mut kept: Vec<Operation> = Vec::with_capacity(parsed.operations.len());
    let mut block: Vec<Operation> = Vec::new();
    let mut in_text = false;
    let (mut visible, mut invisible) = (false, false);
    let mut mode = 0i64;
    let mut saved = Vec::new();

    for op in parsed.operations {
        match op.operator.as_str() {
            "BT" => {
                kept.append(&mut block);
                in_text = true;
                visible = false;
                invisible = false;
                block.push(op);
                continue;
            }
            "ET" if in_text => {
                block.push(op);
                in_text = false;
                if invisible && !visible {
                    kept.extend(text_state_only(block.drain(..)));
                } else {
                    kept.append(&mut block);
                }
                continue;
            }
            "q" => saved.push(mode),
            "Q" => mode = saved.pop().unwrap_or(0),
            "Tr" => {
                mode = op.operands.first().and_then(objects::number).unwrap_or(0.0) as i64;
            }
            "Tj" | "TJ" | "'" | "\"" => {
                if mode == 3 {
                    invisible = true;
                } else {
                    visible = true;
                }
            }
            _ => {}
        }
        if in_text {
            block.push(op);
        } else {
            kept.push(op);
        }
    }
    kept.append(&mut block);

    Content { operations: kept }.encode().unwrap_or_else(|err| {
        warn!(%err, "Cannot re-encode page content; previous text layer kept");
        content.to_vec()
    })
}

/// A text object with its show operators removed. `"` also sets word and
/// character spacing, which is kept as `Tw` and `Tc`.
fn text_state_only(block: impl Iterator<Item = Operation>) -> Vec<Operation> {
    let mut ops = Vec::new();
    for op in block {
        match op.operator.as_str() {
            "Tj" | "TJ" | "'" => {}
            "\"" => {
                let mut operands = op.operands.into_iter();
                if let (Some(word), Some(chars)) = (operands.next(), operands.next()) {
                    ops.push(Operation::new("Tw", vec![word]));
                    ops.push(Operation::new("Tc", vec![chars]));
                }
            }
            _ => ops.push(op),
        }
    }
    ops
}

/// Deep copy of objects from one document into another.
///
/// Each source object is copied once; references are rewritten to the
/// copies. Page objects are copied without `/Parent` and with inherited
/// attributes made explicit.
struct Grafter<'s> {
    source: &'s Document,
    memo: HashMap<ObjectId, ObjectId>,
    pending: Vec<(ObjectId, ObjectId)>,
}

impl<'s> Grafter<'s> {
    fn new(source: &'s Document) -> Self {
        Self {
            source,
            memo: HashMap::new(),
            pending: Vec::new(),
        }
    }

    /// Map a source object to an id the caller fills in itself.
    fn seed(&mut self, source_id: ObjectId, target_id: ObjectId) {
        self.memo.insert(source_id, target_id);
    }

    /// Copy of a page dictionary, without `/Parent`.
    fn page(&mut self, target: &mut Document, page_id: ObjectId) -> Result<Dictionary, OcrwerkError> {
        let source = self.source;
        let dict = source
            .get_dictionary(page_id)
            .map_err(|e| OcrwerkError::Assembly(format!("source page object {page_id:?}: {e}")))?;
        let mut copy = self.dictionary(target, dict, true);
        for key in INHERITABLE_PAGE_KEYS {
            if !copy.has(key)
                && let Some(value) = objects::inherited(source, page_id, key)
            {
                copy.set(key.to_vec(), self.value(target, value));
            }
        }
        Ok(copy)
    }

    fn reference(&mut self, target: &mut Document, id: ObjectId) -> ObjectId {
        if let Some(&mapped) = self.memo.get(&id) {
            return mapped;
        }
        let mapped = target.new_object_id();
        self.memo.insert(id, mapped);
        self.pending.push((id, mapped));
        mapped
    }

    fn value(&mut self, target: &mut Document, object: &Object) -> Object {
        match object {
            Object::Reference(id) => Object::Reference(self.reference(target, *id)),
            Object::Array(items) => Object::Array(items.iter().map(|item| self.value(target, item)).collect()),
            Object::Dictionary(dict) => Object::Dictionary(self.dictionary(target, dict, false)),
            Object::Stream(stream) => {
                let dict = self.dictionary(target, &stream.dict, false);
                Object::Stream(Stream::new(dict, stream.content.clone()))
            }
            other => other.clone(),
        }
    }

    fn dictionary(&mut self, target: &mut Document, dict: &Dictionary, skip_parent: bool) -> Dictionary {
        let is_page = skip_parent || matches!(dict.get(b"Type"), Ok(Object::Name(n)) if n == b"Page");
        let mut copy = Dictionary::new();
        for (key, value) in dict.iter() {
            if is_page && key == b"Parent" {
                continue;
            }
            copy.set(key.clone(), self.value(target, value));
        }
        copy
    }

    /// Copy every object referenced so far, and everything they reference.
    fn drain(&mut self, target: &mut Document) {
        let source = self.source;
        while let Some((source_id, target_id)) = self.pending.pop() {
            let copy = match source.get_object(source_id) {
                Ok(object) => self.value(target, object),
                Err(_) => Object::Null,
            };
            target.objects.insert(target_id, copy);
        }
    }
}
