// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Per-page units of work and their outcomes.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::OcrwerkError;
use crate::types::ColorMode;

/// Highest resolution the oversample stage may request.
pub const MAX_OVERSAMPLE_DPI: u32 = 5000;

/// Raster preprocessing requested for every page of a job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessFlags {
    /// Straighten the page before OCR (and in the output image).
    pub deskew: bool,
    /// Despeckle the raster used for OCR.
    pub clean: bool,
    /// Use the cleaned raster as the visible output image too.
    pub clean_final: bool,
    /// Flatten uneven background illumination.
    pub remove_background: bool,
    /// Upsample pages below this resolution before OCR.
    pub oversample_dpi: Option<u32>,
    /// Binarize the raster used for OCR.
    pub threshold: bool,
    /// Treat a failing requested stage as a page failure instead of skipping it.
    pub strict: bool,
}

impl PreprocessFlags {
    /// Whether any stage is requested at all.
    pub fn any(&self) -> bool {
        self.deskew
            || self.clean
            || self.clean_final
            || self.remove_background
            || self.oversample_dpi.is_some()
            || self.threshold
    }
}

/// Immutable description of one source page, created once before dispatch.
///
/// Constructed via [`PageUnitDescriptor::builder`], which validates every
/// field; there is no way to mutate a descriptor afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct PageUnitDescriptor {
    index: u32,
    width_pt: f64,
    height_pt: f64,
    rotation: i32,
    dpi: Option<u32>,
    color_mode: ColorMode,
    languages: Arc<[String]>,
    flags: PreprocessFlags,
    has_text: bool,
    has_invisible_text: bool,
    selected: bool,
}

impl PageUnitDescriptor {
    /// Start building a descriptor for the 1-based page `index` with the
    /// given media box size in points.
    pub fn builder(index: u32, width_pt: f64, height_pt: f64) -> PageUnitBuilder {
        PageUnitBuilder {
            inner: PageUnitDescriptor {
                index,
                width_pt,
                height_pt,
                rotation: 0,
                dpi: None,
                color_mode: ColorMode::Color,
                languages: Arc::from(vec!["eng".to_string()]),
                flags: PreprocessFlags::default(),
                has_text: false,
                has_invisible_text: false,
                selected: true,
            },
        }
    }

    /// 1-based page index, stable for the whole job.
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn width_pt(&self) -> f64 {
        self.width_pt
    }

    pub fn height_pt(&self) -> f64 {
        self.height_pt
    }

    /// Page `/Rotate` value, normalized to 0, 90, 180 or 270.
    pub fn rotation(&self) -> i32 {
        self.rotation
    }

    /// Detected image resolution, `None` if unknown.
    pub fn dpi(&self) -> Option<u32> {
        self.dpi
    }

    pub fn color_mode(&self) -> ColorMode {
        self.color_mode
    }

    pub fn languages(&self) -> &[String] {
        &self.languages
    }

    pub fn flags(&self) -> &PreprocessFlags {
        &self.flags
    }

    /// Whether the source page already has extractable text.
    pub fn has_text(&self) -> bool {
        self.has_text
    }

    /// Whether the source page carries an invisible (prior OCR) text layer.
    pub fn has_invisible_text(&self) -> bool {
        self.has_invisible_text
    }

    /// Whether the page is inside the job's page selection.
    pub fn is_selected(&self) -> bool {
        self.selected
    }

    /// Resolution the page is rendered at: the detected dpi, or
    /// `default_dpi` when unknown.
    pub fn base_dpi(&self, default_dpi: u32) -> u32 {
        self.dpi.unwrap_or(default_dpi)
    }

    /// Resolution OCR sees: the base dpi raised to the oversample target
    /// when one is set.
    pub fn effective_dpi(&self, default_dpi: u32) -> u32 {
        let base = self.base_dpi(default_dpi);
        match self.flags.oversample_dpi {
            Some(target) if target > base => target,
            _ => base,
        }
    }

    /// Pixel dimensions of the page when rendered at `dpi`.
    pub fn pixel_size(&self, dpi: u32) -> (u32, u32) {
        let scale = dpi as f64 / 72.0;
        (
            (self.width_pt * scale).round().max(1.0) as u32,
            (self.height_pt * scale).round().max(1.0) as u32,
        )
    }

    /// Page area in megapixels at `dpi`.
    pub fn megapixels(&self, dpi: u32) -> f64 {
        let (w, h) = self.pixel_size(dpi);
        w as f64 * h as f64 / 1_000_000.0
    }
}

/// Validating builder for [`PageUnitDescriptor`].
#[derive(Debug, Clone)]
pub struct PageUnitBuilder {
    inner: PageUnitDescriptor,
}

impl PageUnitBuilder {
    pub fn rotation(mut self, degrees: i32) -> Self {
        self.inner.rotation = degrees;
        self
    }

    pub fn dpi(mut self, dpi: Option<u32>) -> Self {
        self.inner.dpi = dpi;
        self
    }

    pub fn color_mode(mut self, mode: ColorMode) -> Self {
        self.inner.color_mode = mode;
        self
    }

    pub fn languages(mut self, languages: Arc<[String]>) -> Self {
        self.inner.languages = languages;
        self
    }

    pub fn flags(mut self, flags: PreprocessFlags) -> Self {
        self.inner.flags = flags;
        self
    }

    pub fn text(mut self, has_text: bool, has_invisible_text: bool) -> Self {
        self.inner.has_text = has_text;
        self.inner.has_invisible_text = has_invisible_text;
        self
    }

    pub fn selected(mut self, selected: bool) -> Self {
        self.inner.selected = selected;
        self
    }

    /// Validate and produce the descriptor.
    pub fn build(self) -> Result<PageUnitDescriptor, OcrwerkError> {
        let mut d = self.inner;
        let bad = |msg: String| OcrwerkError::Input(format!("page {}: {msg}", d.index));

        if d.index == 0 {
            return Err(OcrwerkError::Input("page indices are 1-based".into()));
        }
        if !(d.width_pt.is_finite() && d.height_pt.is_finite()) || d.width_pt <= 0.0 || d.height_pt <= 0.0 {
            return Err(bad(format!("invalid page size {}x{} pt", d.width_pt, d.height_pt)));
        }
        if d.languages.is_empty() {
            return Err(bad("no OCR language given".into()));
        }
        if d.dpi == Some(0) {
            return Err(bad("resolution of 0 dpi".into()));
        }
        if let Some(target) = d.flags.oversample_dpi
            && (target == 0 || target > MAX_OVERSAMPLE_DPI)
        {
            return Err(bad(format!("oversample resolution {target} dpi out of range")));
        }
        if d.rotation % 90 != 0 {
            return Err(bad(format!("rotation {} is not a multiple of 90", d.rotation)));
        }
        d.rotation = d.rotation.rem_euclid(360);
        if d.has_invisible_text {
            d.has_text = true;
        }
        Ok(d)
    }
}

/// What the worker decided to do with a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PageDecision {
    /// Rasterized, recognized and re-synthesized.
    Recognized,
    /// Already had text; copied through (skip-text).
    SkippedText,
    /// Larger than the skip-big threshold; copied through.
    SkippedBig,
    /// Outside the page selection; copied through.
    NotSelected,
    /// Previous OCR layer replaced, page image untouched (redo-ocr).
    Replaced,
    /// Processing failed but the failure was tolerated; copied through.
    FailedTolerated,
}

impl PageDecision {
    /// Whether the output page is the unmodified source page.
    pub fn is_pass_through(&self) -> bool {
        matches!(
            self,
            Self::SkippedText | Self::SkippedBig | Self::NotSelected | Self::FailedTolerated
        )
    }
}

/// Content produced for one output page.
#[derive(Clone, PartialEq, Eq)]
pub enum PageContent {
    /// A complete single-page PDF: page image plus invisible text layer.
    Synthesized(Vec<u8>),
    /// A single-page PDF holding only an invisible text layer, to be
    /// grafted onto the untouched source page.
    Overlay(Vec<u8>),
    /// Copy the source page unchanged.
    PassThrough,
}

impl fmt::Debug for PageContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Synthesized(bytes) => write!(f, "Synthesized({} bytes)", bytes.len()),
            Self::Overlay(bytes) => write!(f, "Overlay({} bytes)", bytes.len()),
            Self::PassThrough => f.write_str("PassThrough"),
        }
    }
}

/// Successful outcome for one page.
#[derive(Debug, Clone)]
pub struct PageResult {
    pub page: u32,
    pub content: PageContent,
    pub decision: PageDecision,
    /// Recognized plain text (empty for pass-through pages).
    pub text: String,
    pub word_count: usize,
    /// Mean word confidence in 0..=100, when the engine reports one.
    pub mean_confidence: Option<f32>,
    /// Diagnostic notes (skipped stages, rotation applied, ...).
    pub notes: Vec<String>,
    pub elapsed: Duration,
    /// Resolution OCR ran at, `None` if never rasterized.
    pub dpi_used: Option<u32>,
    /// Clockwise rotation applied to make the page upright (0 when none).
    pub orientation_correction: i32,
}

impl PageResult {
    /// Result for a page copied through unchanged.
    pub fn pass_through(page: u32, decision: PageDecision, elapsed: Duration) -> Self {
        Self {
            page,
            content: PageContent::PassThrough,
            decision,
            text: String::new(),
            word_count: 0,
            mean_confidence: None,
            notes: Vec::new(),
            elapsed,
            dpi_used: None,
            orientation_correction: 0,
        }
    }
}

/// Category of a page-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PageFailureKind {
    /// The rasterizer could not render the page.
    RasterFailed,
    /// The rasterizer exceeded its time limit.
    RasterTimeout,
    /// A mandatory preprocessing stage failed.
    PreprocessFailed,
    /// The OCR engine exceeded its time limit and was killed.
    OcrTimeout,
    /// The OCR engine exited abnormally.
    OcrEngineCrashed,
    /// The OCR engine has no data for a requested language.
    UnsupportedLanguage,
    /// An external program is not installed.
    EngineMissing,
    /// Building the page's PDF from raster and text failed.
    SynthesisFailed,
    /// Temporary file I/O failed or timed out.
    Io,
    /// The job was cancelled while the page was in flight.
    Cancelled,
}

impl PageFailureKind {
    /// Whether rerunning the page might succeed (transient resource
    /// trouble as opposed to bad input or missing software).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RasterTimeout | Self::OcrTimeout | Self::OcrEngineCrashed | Self::Io
        )
    }
}

impl fmt::Display for PageFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::RasterFailed => "raster failed",
            Self::RasterTimeout => "raster timeout",
            Self::PreprocessFailed => "preprocessing failed",
            Self::OcrTimeout => "OCR timeout",
            Self::OcrEngineCrashed => "OCR engine crashed",
            Self::UnsupportedLanguage => "unsupported language",
            Self::EngineMissing => "engine missing",
            Self::SynthesisFailed => "page synthesis failed",
            Self::Io => "I/O error",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Failed outcome for one page.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("page {page}: {kind}: {detail}")]
pub struct PageFailure {
    pub page: u32,
    pub kind: PageFailureKind,
    pub detail: String,
    pub retryable: bool,
}

impl PageFailure {
    /// Build a failure whose retry eligibility follows from its kind.
    pub fn new(page: u32, kind: PageFailureKind, detail: impl Into<String>) -> Self {
        Self {
            page,
            kind,
            detail: detail.into(),
            retryable: kind.is_retryable(),
        }
    }

    /// Override the retry eligibility derived from the kind.
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn langs() -> Arc<[String]> {
        Arc::from(vec!["eng".to_string(), "deu".to_string()])
    }

    #[test]
    fn builder_validates_geometry_and_index() {
        assert!(PageUnitDescriptor::builder(0, 612.0, 792.0).build().is_err());
        assert!(PageUnitDescriptor::builder(1, 0.0, 792.0).build().is_err());
        assert!(PageUnitDescriptor::builder(1, f64::NAN, 792.0).build().is_err());
        assert!(PageUnitDescriptor::builder(1, 612.0, 792.0).build().is_ok());
    }

    #[test]
    fn builder_rejects_empty_languages_and_bad_oversample() {
        let empty: Arc<[String]> = Arc::from(Vec::<String>::new());
        assert!(PageUnitDescriptor::builder(1, 612.0, 792.0).languages(empty).build().is_err());

        let flags = PreprocessFlags {
            oversample_dpi: Some(MAX_OVERSAMPLE_DPI + 1),
            ..Default::default()
        };
        assert!(PageUnitDescriptor::builder(1, 612.0, 792.0).flags(flags).build().is_err());
    }

    #[test]
    fn rotation_is_normalized() {
        let d = PageUnitDescriptor::builder(2, 612.0, 792.0)
            .rotation(-90)
            .languages(langs())
            .build()
            .unwrap();
        assert_eq!(d.rotation(), 270);
        assert!(PageUnitDescriptor::builder(2, 612.0, 792.0).rotation(45).build().is_err());
    }

    #[test]
    fn effective_dpi_prefers_oversample_when_higher() {
        let flags = PreprocessFlags {
            oversample_dpi: Some(400),
            ..Default::default()
        };
        let low = PageUnitDescriptor::builder(1, 612.0, 792.0)
            .dpi(Some(200))
            .flags(flags.clone())
            .build()
            .unwrap();
        assert_eq!(low.effective_dpi(300), 400);

        let high = PageUnitDescriptor::builder(1, 612.0, 792.0)
            .dpi(Some(600))
            .flags(flags)
            .build()
            .unwrap();
        assert_eq!(high.effective_dpi(300), 600);

        let unknown = PageUnitDescriptor::builder(1, 612.0, 792.0).build().unwrap();
        assert_eq!(unknown.effective_dpi(300), 300);
    }

    #[test]
    fn pixel_size_of_letter_at_300_dpi() {
        let d = PageUnitDescriptor::builder(1, 612.0, 792.0).build().unwrap();
        assert_eq!(d.pixel_size(300), (2550, 3300));
        assert!((d.megapixels(300) - 8.415).abs() < 1e-3);
    }

    #[test]
    fn invisible_text_implies_text() {
        let d = PageUnitDescriptor::builder(1, 612.0, 792.0)
            .text(false, true)
            .build()
            .unwrap();
        assert!(d.has_text());
    }

    #[test]
    fn failure_retryability_follows_kind() {
        assert!(PageFailure::new(1, PageFailureKind::OcrTimeout, "slow").retryable);
        assert!(!PageFailure::new(1, PageFailureKind::RasterFailed, "corrupt").retryable);
        assert!(!PageFailure::new(1, PageFailureKind::Io, "gone").with_retryable(false).retryable);
    }
}
