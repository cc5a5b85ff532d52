// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// In-process stand-ins for the external programs a job drives, plus helpers
// to build source PDFs and look at outputs.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use image::{GrayImage, Luma};
use lopdf::{Dictionary, Document, Object, Stream, dictionary};
use ocrwerk_core::config::RetrySettings;
use ocrwerk_core::{JobConfig, OcrwerkError, OptimizeLevel, OutputType};
use ocrwerk_document::ocr::{BBox, LineKey, Orientation, Word};
use ocrwerk_document::pdf::objects;
use ocrwerk_document::pdf::validate::StructuralValidator;
use ocrwerk_document::pdf::{ConformanceValidator, PdfaConverter, PdfaRequest};
use ocrwerk_document::raster::RasterError;
use ocrwerk_document::{OcrEngine, OcrError, OcrRequest, RasterRequest, Rasterizer, TextPage};
use ocrwerk_pipeline::{Collaborators, Pipeline};

/// Writes a gray raster whose width encodes the page number (100 + page).
#[derive(Default)]
pub struct FakeRasterizer {
    pub pages: Mutex<Vec<u32>>,
}

impl FakeRasterizer {
    pub fn rendered(&self) -> Vec<u32> {
        let mut pages = self.pages.lock().unwrap().clone();
        pages.sort_unstable();
        pages
    }
}

#[async_trait]
impl Rasterizer for FakeRasterizer {
    fn name(&self) -> &str {
        "fake-raster"
    }

    async fn rasterize(&self, request: &RasterRequest<'_>) -> Result<PathBuf, RasterError> {
        self.pages.lock().unwrap().push(request.page);
        let mut raster = GrayImage::from_pixel(100 + request.page, 60, Luma([255]));
        for x in 10..40 {
            for y in 20..30 {
                raster.put_pixel(x, y, Luma([0]));
            }
        }
        let path = request.output_stem().with_extension("png");
        raster
            .save_with_format(&path, image::ImageFormat::Png)
            .map_err(|e| RasterError::Failed(e.to_string()))?;
        Ok(path)
    }
}

/// Recognizes one word, `page<N>`, per page. Pages can be made slow, made
/// to hang, or made to fail.
#[derive(Default)]
pub struct FakeEngine {
    pub delays_ms: HashMap<u32, u64>,
    pub hang: HashSet<u32>,
    pub hang_all: bool,
    pub crash: HashSet<u32>,
    pub rotate: Option<Orientation>,
    pub calls: AtomicUsize,
}

#[async_trait]
impl OcrEngine for FakeEngine {
    fn name(&self) -> &str {
        "fake-ocr"
    }

    async fn recognize(&self, request: &OcrRequest<'_>) -> Result<TextPage, OcrError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hang_all || self.hang.contains(&request.page) {
            std::future::pending::<()>().await;
        }
        if let Some(ms) = self.delays_ms.get(&request.page) {
            tokio::time::sleep(Duration::from_millis(*ms)).await;
        }
        if self.crash.contains(&request.page) {
            return Err(OcrError::EngineCrashed("killed by signal 11".into()));
        }
        Ok(TextPage {
            width: request.width,
            height: request.height,
            words: vec![Word {
                text: format!("page{}", request.page),
                bbox: BBox {
                    left: 10,
                    top: 20,
                    width: 30,
                    height: 10,
                },
                confidence: 91.0,
                line: LineKey {
                    block: 1,
                    paragraph: 1,
                    line: 1,
                },
            }],
        })
    }

    async fn detect_orientation(&self, _request: &OcrRequest<'_>) -> Result<Orientation, OcrError> {
        Ok(self.rotate.unwrap_or_else(Orientation::upright))
    }

    async fn languages(&self) -> Result<Vec<String>, OcrError> {
        Ok(vec!["eng".into(), "deu".into(), "osd".into()])
    }
}

/// Copies its input and adds an sRGB output intent, which is what a real
/// converter contributes that normalization cannot.
#[derive(Default)]
pub struct FakeConverter {
    pub runs: AtomicUsize,
}

#[async_trait]
impl PdfaConverter for FakeConverter {
    fn name(&self) -> &str {
        "fake-pdfa"
    }

    async fn convert(&self, request: &PdfaRequest<'_>) -> Result<(), OcrwerkError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let mut doc = Document::load(request.input).map_err(|e| OcrwerkError::Pdf(e.to_string()))?;
        let icc = doc.add_object(Stream::new(dictionary! { "N" => 3 }, vec![0u8; 128]));
        let intent = doc.add_object(dictionary! {
            "Type" => "OutputIntent",
            "S" => "GTS_PDFA1",
            "OutputConditionIdentifier" => Object::string_literal("sRGB"),
            "DestOutputProfile" => icc,
        });
        doc.catalog_mut()
            .map_err(|e| OcrwerkError::Pdf(e.to_string()))?
            .set("OutputIntents", vec![Object::Reference(intent)]);
        doc.save(request.output).map_err(|e| OcrwerkError::Pdf(e.to_string()))?;
        Ok(())
    }
}

/// The fakes a test wires into a pipeline, kept so it can inspect them.
pub struct Fakes {
    pub rasterizer: Arc<FakeRasterizer>,
    pub engine: Arc<FakeEngine>,
    pub converter: Arc<FakeConverter>,
}

impl Fakes {
    pub fn new(engine: FakeEngine) -> Self {
        Self {
            rasterizer: Arc::new(FakeRasterizer::default()),
            engine: Arc::new(engine),
            converter: Arc::new(FakeConverter::default()),
        }
    }

    pub fn pipeline(&self, config: JobConfig) -> Pipeline {
        Pipeline::new(
            config,
            Collaborators {
                rasterizer: self.rasterizer.clone(),
                engine: self.engine.clone(),
                converter: self.converter.clone(),
                validators: vec![Arc::new(StructuralValidator) as Arc<dyn ConformanceValidator>],
            },
        )
    }
}

/// Plain-PDF output, no optimization, no retries, temp files under `dir`.
pub fn test_config(dir: &Path, workers: usize) -> JobConfig {
    let temp_root = dir.join("tmp");
    std::fs::create_dir_all(&temp_root).unwrap();
    JobConfig {
        jobs: Some(workers),
        output_type: OutputType::Pdf,
        optimize: OptimizeLevel::None,
        temp_root: Some(temp_root),
        retry: RetrySettings {
            max_retries: 0,
            base_delay_ms: 1,
            max_delay_ms: 1,
        },
        ..Default::default()
    }
}

/// How a source page is made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourcePage {
    /// Nothing drawn.
    Blank,
    /// Visible text in a standard font.
    Text,
    /// A scanned image with an invisible text layer on top.
    PreviousOcr,
}

/// Write a PDF whose pages are 200 x 100 pt.
pub fn write_source(path: &Path, pages: &[SourcePage]) {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let scan = doc.add_object(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => 200,
            "Height" => 100,
            "ColorSpace" => "DeviceGray",
            "BitsPerComponent" => 8,
        },
        vec![200u8; 200 * 100],
    ));

    let mut kids = Vec::new();
    for kind in pages {
        let (content, resources) = match kind {
            SourcePage::Blank => (String::new(), Dictionary::new()),
            SourcePage::Text => (
                "BT /F1 12 Tf 10 50 Td (Hello) Tj ET".to_string(),
                dictionary! { "Font" => dictionary! { "F1" => font } },
            ),
            SourcePage::PreviousOcr => (
                "q 200 0 0 100 0 0 cm /Im0 Do Q\nBT 3 Tr /F1 12 Tf 10 50 Td (Stale) Tj ET".to_string(),
                dictionary! {
                    "Font" => dictionary! { "F1" => font },
                    "XObject" => dictionary! { "Im0" => scan },
                },
            ),
        };
        let contents = doc.add_object(Stream::new(Dictionary::new(), content.into_bytes()));
        let page = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 200.into(), 100.into()],
            "Contents" => contents,
            "Resources" => resources,
        });
        kids.push(page.into());
    }
    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
    doc.trailer.set("Root", catalog);
    doc.save(path).unwrap();
}

pub fn load(path: &Path) -> Document {
    Document::load(path).unwrap()
}

/// Decoded content of every page, in page order.
pub fn page_contents(doc: &Document) -> Vec<String> {
    doc.get_pages()
        .values()
        .map(|id| String::from_utf8_lossy(&objects::page_content(doc, *id)).into_owned())
        .collect()
}

/// Width of the synthesized page image on every page, `None` where there
/// is none.
pub fn page_image_widths(doc: &Document) -> Vec<Option<i64>> {
    doc.get_pages()
        .values()
        .map(|id| {
            let resources = objects::page_resources(doc, *id)?;
            let xobjects = objects::get_dict(doc, resources, b"XObject")?;
            let image = objects::get_dict(doc, xobjects, b"OcrIm0")?;
            objects::get(doc, image, b"Width")?.as_i64().ok()
        })
        .collect()
}

pub fn fingerprints(doc: &Document) -> Vec<String> {
    doc.get_pages()
        .values()
        .map(|id| ocrwerk_document::pdf::inspect::page_fingerprint(doc, *id))
        .collect()
}
