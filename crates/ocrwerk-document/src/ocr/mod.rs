// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// OCR invocation adapter.
//
// One trait for every OCR engine, a normalized text-position model (words
// with pixel bounding boxes, confidences and line grouping) and a typed
// failure classification.
//
// Engines:
//
// - **Tesseract** (default): the `tesseract` CLI in TSV mode.
// - **ocrs** (feature `ocrs`): pure-Rust engine running in-process.

pub mod tesseract;

#[cfg(feature = "ocrs")]
pub mod ocrs_engine;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use ocrwerk_core::page::PageFailureKind;
use thiserror::Error;

pub use tesseract::TesseractEngine;

#[cfg(feature = "ocrs")]
pub use ocrs_engine::OcrsEngine;

/// OCR failure for one page.
#[derive(Debug, Error)]
pub enum OcrError {
    #[error("OCR engine '{0}' is not installed")]
    EngineMissing(String),

    #[error("OCR timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("OCR engine crashed: {0}")]
    EngineCrashed(String),

    #[error("OCR language data not available: {0}")]
    UnsupportedLanguage(String),

    #[error("OCR engine produced unreadable output: {0}")]
    InvalidOutput(String),

    #[error("OCR I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl OcrError {
    pub fn kind(&self) -> PageFailureKind {
        match self {
            Self::EngineMissing(_) => PageFailureKind::EngineMissing,
            Self::Timeout(_) => PageFailureKind::OcrTimeout,
            Self::EngineCrashed(_) | Self::InvalidOutput(_) => PageFailureKind::OcrEngineCrashed,
            Self::UnsupportedLanguage(_) => PageFailureKind::UnsupportedLanguage,
            Self::Io(_) => PageFailureKind::Io,
        }
    }
}

/// Axis-aligned box in raster pixels, origin top-left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BBox {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

/// Edges saturate at `u32::MAX` for boxes reported past the raster.
impl BBox {
    pub fn right(&self) -> u32 {
        self.left.saturating_add(self.width)
    }

    pub fn bottom(&self) -> u32 {
        self.top.saturating_add(self.height)
    }
}

/// Position of a word in the engine's layout hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LineKey {
    pub block: u32,
    pub paragraph: u32,
    pub line: u32,
}

/// A recognized word.
#[derive(Debug, Clone, PartialEq)]
pub struct Word {
    pub text: String,
    pub bbox: BBox,
    /// 0..=100; negative when the engine reports none.
    pub confidence: f32,
    pub line: LineKey,
}

/// Everything recognized on one raster.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextPage {
    /// Raster size the boxes refer to.
    pub width: u32,
    pub height: u32,
    /// Words in reading order.
    pub words: Vec<Word>,
}

impl TextPage {
    pub fn empty(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            words: Vec::new(),
        }
    }

    pub fn word_count(&self) -> usize {
        self.words.len()
    }

    /// Mean confidence over words that carry one.
    pub fn mean_confidence(&self) -> Option<f32> {
        let scored: Vec<f32> = self.words.iter().map(|w| w.confidence).filter(|c| *c >= 0.0).collect();
        if scored.is_empty() {
            return None;
        }
        Some(scored.iter().sum::<f32>() / scored.len() as f32)
    }

    /// Words grouped into lines, keeping reading order.
    pub fn lines(&self) -> Vec<&[Word]> {
        self.words.chunk_by(|a, b| a.line == b.line).collect()
    }

    /// Plain text: words joined by spaces, lines by newlines, paragraphs
    /// separated by a blank line.
    pub fn plain_text(&self) -> String {
        let mut out = String::new();
        let mut previous: Option<LineKey> = None;
        for line in self.lines() {
            let key = line[0].line;
            if let Some(prev) = previous {
                out.push('\n');
                if (prev.block, prev.paragraph) != (key.block, key.paragraph) {
                    out.push('\n');
                }
            }
            let words: Vec<&str> = line.iter().map(|w| w.text.as_str()).collect();
            out.push_str(&words.join(" "));
            previous = Some(key);
        }
        out
    }
}

/// Orientation detection result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Orientation {
    /// Clockwise rotation (0, 90, 180 or 270) that makes the page upright.
    pub rotate: i32,
    pub confidence: f32,
}

impl Orientation {
    pub fn upright() -> Self {
        Self {
            rotate: 0,
            confidence: 0.0,
        }
    }
}

/// One recognition call.
#[derive(Debug, Clone)]
pub struct OcrRequest<'a> {
    /// Prepared raster on disk (PNG).
    pub image: &'a Path,
    pub width: u32,
    pub height: u32,
    pub dpi: u32,
    pub languages: &'a [String],
    pub timeout: Duration,
    /// 1-based page number, for logging.
    pub page: u32,
}

/// An OCR engine: raster in, positioned words out.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    fn name(&self) -> &str;

    async fn recognize(&self, request: &OcrRequest<'_>) -> Result<TextPage, OcrError>;

    /// Detect how the page must be rotated to read upright.
    async fn detect_orientation(&self, request: &OcrRequest<'_>) -> Result<Orientation, OcrError>;

    /// Language codes the engine has data for.
    async fn languages(&self) -> Result<Vec<String>, OcrError>;
}
