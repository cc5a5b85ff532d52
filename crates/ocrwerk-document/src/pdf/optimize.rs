// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Post-assembly optimization: recompress page images and unfiltered
// streams, keeping whichever encoding is smallest.
//
// Objects reachable from pass-through pages are never touched. JPEG and
// other lossy or special-purpose encodings are never re-encoded, so a
// second pass over an optimized file changes nothing.

use std::collections::HashSet;

use flate2::Compression;
use image::ExtendedColorType;
use image::codecs::jpeg::JpegEncoder;
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use ocrwerk_core::error::OcrwerkError;
use ocrwerk_core::types::OptimizeLevel;
use serde::Serialize;
use tracing::{debug, info, instrument};

use super::objects::{self, filters, resolve};
use super::{deflate_with, inflate};

/// What an optimization pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OptimizeReport {
    pub input_bytes: usize,
    pub output_bytes: usize,
    pub images_examined: usize,
    pub images_rewritten: usize,
    pub streams_compressed: usize,
}

impl OptimizeReport {
    pub fn saved_bytes(&self) -> usize {
        self.input_bytes.saturating_sub(self.output_bytes)
    }
}

/// Image recompression over a whole document.
#[derive(Debug, Clone)]
pub struct Optimizer {
    level: OptimizeLevel,
    protected_pages: Vec<u32>,
}

impl Optimizer {
    pub fn new(level: OptimizeLevel) -> Self {
        Self {
            level,
            protected_pages: Vec::new(),
        }
    }

    /// 1-based pages whose objects must stay byte-identical.
    pub fn with_protected_pages(mut self, pages: Vec<u32>) -> Self {
        self.protected_pages = pages;
        self
    }

    /// Optimize `input`. The result is never larger than the input.
    #[instrument(skip_all, fields(level = ?self.level, input_bytes = input.len()))]
    pub fn optimize(&self, input: &[u8]) -> Result<(Vec<u8>, OptimizeReport), OcrwerkError> {
        let mut report = OptimizeReport {
            input_bytes: input.len(),
            output_bytes: input.len(),
            ..Default::default()
        };
        if self.level == OptimizeLevel::None {
            return Ok((input.to_vec(), report));
        }

        let mut doc = Document::load_mem(input).map_err(|e| OcrwerkError::Pdf(format!("cannot reload output: {e}")))?;
        let protected = self.protected_objects(&doc);

        let mut replacements: Vec<(ObjectId, Stream)> = Vec::new();
        for (&id, object) in &doc.objects {
            if protected.contains(&id) {
                continue;
            }
            let Object::Stream(stream) = object else {
                continue;
            };
            if is_image(stream) {
                report.images_examined += 1;
                if let Some(smaller) = self.recompress_image(&doc, stream) {
                    debug!(object = ?id, before = stream.content.len(), after = smaller.content.len(), "Image recompressed");
                    report.images_rewritten += 1;
                    replacements.push((id, smaller));
                }
            } else if let Some(smaller) = compress_plain_stream(&doc, stream) {
                report.streams_compressed += 1;
                replacements.push((id, smaller));
            }
        }
        for (id, stream) in replacements {
            doc.objects.insert(id, Object::Stream(stream));
        }

        let mut output = Vec::new();
        doc.save_to(&mut output)
            .map_err(|e| OcrwerkError::Pdf(format!("cannot write optimized PDF: {e}")))?;

        if output.len() >= input.len() {
            // Not smaller overall: keep the input as it was.
            debug!(optimized = output.len(), "Optimization did not pay off");
            report.images_rewritten = 0;
            report.streams_compressed = 0;
            return Ok((input.to_vec(), report));
        }

        report.output_bytes = output.len();
        info!(
            input_bytes = report.input_bytes,
            output_bytes = report.output_bytes,
            images = report.images_rewritten,
            streams = report.streams_compressed,
            "Optimization complete"
        );
        Ok((output, report))
    }

    /// Every object reachable from a protected page, not following
    /// `/Parent` links.
    fn protected_objects(&self, doc: &Document) -> HashSet<ObjectId> {
        let pages = doc.get_pages();
        let mut seen = HashSet::new();
        let mut todo: Vec<ObjectId> = self
            .protected_pages
            .iter()
            .filter_map(|p| pages.get(p).copied())
            .collect();
        while let Some(id) = todo.pop() {
            if !seen.insert(id) {
                continue;
            }
            if let Ok(object) = doc.get_object(id) {
                collect_references(object, &mut todo);
            }
        }
        seen
    }

    fn recompress_image(&self, doc: &Document, stream: &Stream) -> Option<Stream> {
        let image = RawImage::from_stream(doc, stream)?;
        let mut best: Option<Stream> = None;
        let mut consider = |candidate: Stream| {
            let current = best.as_ref().map_or(stream.content.len(), |b| b.content.len());
            if candidate.content.len() < current {
                best = Some(candidate);
            }
        };

        if image.is_two_tone_gray() {
            consider(image.bilevel_stream(&stream.dict));
        } else if let Some(quality) = self.level.jpeg_quality()
            && let Some(jpeg) = image.jpeg_stream(&stream.dict, quality)
        {
            consider(jpeg);
        }
        consider(image.flate_stream(&stream.dict));
        best
    }
}

fn collect_references(object: &Object, todo: &mut Vec<ObjectId>) {
    match object {
        Object::Reference(id) => todo.push(*id),
        Object::Array(items) => items.iter().for_each(|item| collect_references(item, todo)),
        Object::Dictionary(dict) => collect_dict_references(dict, todo),
        Object::Stream(stream) => collect_dict_references(&stream.dict, todo),
        _ => {}
    }
}

fn collect_dict_references(dict: &Dictionary, todo: &mut Vec<ObjectId>) {
    for (key, value) in dict.iter() {
        if key != b"Parent" {
            collect_references(value, todo);
        }
    }
}

fn is_image(stream: &Stream) -> bool {
    matches!(stream.dict.get(b"Subtype"), Ok(Object::Name(n)) if n == b"Image")
}

/// Flate-compress an unfiltered stream that is not an image, metadata or
/// cross-reference data, if that makes it smaller.
fn compress_plain_stream(doc: &Document, stream: &Stream) -> Option<Stream> {
    if stream.dict.has(b"Filter") {
        return None;
    }
    if let Some(kind) = objects::name(doc, &stream.dict, b"Type")
        && matches!(kind, b"Metadata" | b"XRef" | b"ObjStm")
    {
        return None;
    }
    let packed = deflate_with(&stream.content, Compression::best());
    if packed.len() >= stream.content.len() {
        return None;
    }
    let mut dict = stream.dict.clone();
    dict.set("Filter", "FlateDecode");
    Some(Stream::new(dict, packed))
}

/// Decoded 8-bit samples of an image we know how to re-encode.
struct RawImage {
    width: u32,
    height: u32,
    gray: bool,
    samples: Vec<u8>,
}

impl RawImage {
    fn from_stream(doc: &Document, stream: &Stream) -> Option<Self> {
        let dict = &stream.dict;
        for key in [&b"DecodeParms"[..], b"ImageMask", b"Decode", b"Mask"] {
            if dict.has(key) {
                return None;
            }
        }
        let flated = match filters(doc, dict).as_slice() {
            [] => false,
            [f] if f == b"FlateDecode" => true,
            _ => return None,
        };
        let bits = objects::get(doc, dict, b"BitsPerComponent").and_then(objects::number)?;
        if bits != 8.0 {
            return None;
        }
        let gray = match resolve(doc, dict.get(b"ColorSpace").ok()?)? {
            Object::Name(n) if n == b"DeviceGray" => true,
            Object::Name(n) if n == b"DeviceRGB" => false,
            _ => return None,
        };
        let width = objects::get(doc, dict, b"Width").and_then(objects::number)? as u32;
        let height = objects::get(doc, dict, b"Height").and_then(objects::number)? as u32;

        let samples = if flated { inflate(&stream.content).ok()? } else { stream.content.clone() };
        let channels = if gray { 1 } else { 3 };
        if width == 0 || height == 0 || samples.len() != width as usize * height as usize * channels {
            return None;
        }
        Some(Self {
            width,
            height,
            gray,
            samples,
        })
    }

    fn is_two_tone_gray(&self) -> bool {
        self.gray && self.samples.iter().all(|&s| s == 0 || s == 255)
    }

    fn flate_stream(&self, original: &Dictionary) -> Stream {
        let mut dict = original.clone();
        dict.set("Filter", "FlateDecode");
        Stream::new(dict, deflate_with(&self.samples, Compression::best()))
    }

    /// 1 bit per pixel, rows padded to a whole byte, white as 1.
    fn bilevel_stream(&self, original: &Dictionary) -> Stream {
        let width = self.width as usize;
        let row_bytes = width.div_ceil(8);
        let mut packed = vec![0u8; row_bytes * self.height as usize];
        for (y, row) in self.samples.chunks_exact(width).enumerate() {
            for (x, &sample) in row.iter().enumerate() {
                if sample == 255 {
                    packed[y * row_bytes + x / 8] |= 0x80 >> (x % 8);
                }
            }
        }
        let mut dict = original.clone();
        dict.set("BitsPerComponent", 1);
        dict.set("Filter", "FlateDecode");
        Stream::new(dict, deflate_with(&packed, Compression::best()))
    }

    fn jpeg_stream(&self, original: &Dictionary, quality: u8) -> Option<Stream> {
        let color = if self.gray { ExtendedColorType::L8 } else { ExtendedColorType::Rgb8 };
        let mut encoded = Vec::new();
        JpegEncoder::new_with_quality(&mut encoded, quality)
            .encode(&self.samples, self.width, self.height, color)
            .ok()?;
        let mut dict = original.clone();
        dict.set("Filter", "DCTDecode");
        Some(Stream::new(dict, encoded))
    }
}
