// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// ocrwerk-document — Page-level document work for the Ocrwerk OCR pipeline.
//
// Provides rasterization of source pages, the preprocessing chain, OCR engine
// adapters (Tesseract, optionally ocrs), and the PDF side: inspection, page
// synthesis with an invisible text layer, assembly, optimization, PDF/A
// conversion and validation.

pub mod image;
pub mod integrity;
pub mod ocr;
pub mod pdf;
pub mod preprocess;
pub mod process;
pub mod raster;

// Re-export the primary types so callers can use `ocrwerk_document::SourceDocument` etc.
pub use image::processor::ImageProcessor;
pub use ocr::{OcrEngine, OcrError, OcrRequest, TesseractEngine, TextPage};
pub use pdf::{AssembledDocument, Assembler, ImagePdfWriter, Optimizer, SourceDocument};
pub use preprocess::PreprocessChain;
pub use raster::{PdftoppmRasterizer, RasterRequest, Rasterizer};

#[cfg(feature = "ocrs")]
pub use ocr::OcrsEngine;
