// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Job configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::OcrwerkError;
use crate::page::{MAX_OVERSAMPLE_DPI, PreprocessFlags};
use crate::types::{DocumentMetadata, OptimizeLevel, OutputType, PageSelection, TextPolicy};

/// Tesseract invocation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TesseractSettings {
    /// Executable name or path.
    pub program: String,
    /// Wall-clock limit for one page, in seconds.
    pub timeout_secs: f64,
    /// `--psm` page segmentation mode.
    pub pagesegmode: Option<u8>,
    /// `-c key=value` overrides.
    pub config: BTreeMap<String, String>,
}

impl Default for TesseractSettings {
    fn default() -> Self {
        Self {
            program: "tesseract".into(),
            timeout_secs: 180.0,
            pagesegmode: None,
            config: BTreeMap::new(),
        }
    }
}

/// Scheduler-level retry settings for transient page failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Extra attempts per page after the first.
    pub max_retries: u32,
    /// Base delay for exponential backoff, in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound on a single backoff delay, in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 250,
            max_delay_ms: 5_000,
        }
    }
}

/// Everything a job needs to know, loaded from JSON and/or CLI flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// Tesseract language codes, e.g. `["eng", "deu"]`.
    pub languages: Vec<String>,
    /// Concurrent page workers; `None` means one per CPU.
    pub jobs: Option<usize>,
    pub text_policy: TextPolicy,
    pub output_type: OutputType,
    pub optimize: OptimizeLevel,
    /// Pages to OCR; the rest are copied through.
    pub pages: Option<PageSelection>,
    pub preprocess: PreprocessFlags,
    /// Rasterization resolution when a page's image resolution is unknown.
    pub default_dpi: u32,
    /// Resolution assumed for image (non-PDF) input lacking one.
    pub image_dpi: Option<u32>,
    /// Detect and correct page orientation.
    pub rotate_pages: bool,
    /// Minimum orientation confidence before a page is rotated.
    pub rotate_pages_threshold: f32,
    /// Pass pages larger than this many megapixels through without OCR.
    pub skip_big_mpixels: Option<f64>,
    pub tesseract: TesseractSettings,
    /// Program used to render pages.
    pub rasterizer_program: String,
    pub rasterizer_timeout_secs: f64,
    /// Limit for a single temporary-file read or write.
    pub io_timeout_secs: f64,
    /// Page failures tolerated before the job is aborted.
    pub max_page_failures: usize,
    pub retry: RetrySettings,
    pub metadata: DocumentMetadata,
    pub keep_temporary_files: bool,
    /// Directory in which the per-job temporary directory is created.
    pub temp_root: Option<PathBuf>,
    /// Write recognized text to this file.
    pub sidecar: Option<PathBuf>,
    /// Program used for PDF/A conversion.
    pub ghostscript_program: String,
    pub pdfa_timeout_secs: f64,
    /// sRGB ICC profile for the PDF/A output intent; searched for when unset.
    pub icc_profile: Option<PathBuf>,
    /// Stricter PDF/A normalization (no transparency, no embedded files).
    pub pdfa_strict: bool,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            languages: vec!["eng".into()],
            jobs: None,
            text_policy: TextPolicy::Default,
            output_type: OutputType::Pdfa,
            optimize: OptimizeLevel::Lossless,
            pages: None,
            preprocess: PreprocessFlags::default(),
            default_dpi: 300,
            image_dpi: None,
            rotate_pages: false,
            rotate_pages_threshold: 14.0,
            skip_big_mpixels: None,
            tesseract: TesseractSettings::default(),
            rasterizer_program: "pdftoppm".into(),
            rasterizer_timeout_secs: 120.0,
            io_timeout_secs: 60.0,
            max_page_failures: 0,
            retry: RetrySettings::default(),
            metadata: DocumentMetadata::default(),
            keep_temporary_files: false,
            temp_root: None,
            sidecar: None,
            ghostscript_program: "gs".into(),
            pdfa_timeout_secs: 600.0,
            icc_profile: None,
            pdfa_strict: false,
        }
    }
}

impl JobConfig {
    /// Load a configuration from a JSON file. Missing fields take defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, OcrwerkError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| OcrwerkError::file_access(path, e))?;
        serde_json::from_str(&raw)
            .map_err(|e| OcrwerkError::Config(format!("{}: {e}", path.display())))
    }

    /// Number of workers to run, resolving `None` to the host CPU count.
    pub fn worker_count(&self) -> usize {
        self.jobs.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }

    pub fn tesseract_timeout(&self) -> Duration {
        seconds(self.tesseract.timeout_secs)
    }

    pub fn rasterizer_timeout(&self) -> Duration {
        seconds(self.rasterizer_timeout_secs)
    }

    pub fn io_timeout(&self) -> Duration {
        seconds(self.io_timeout_secs)
    }

    pub fn pdfa_timeout(&self) -> Duration {
        seconds(self.pdfa_timeout_secs)
    }

    /// `+`-joined language string as Tesseract expects it.
    pub fn language_arg(&self) -> String {
        self.languages.join("+")
    }

    /// Check every field before any work starts.
    pub fn validate(&self) -> Result<(), OcrwerkError> {
        let bad = |msg: String| Err(OcrwerkError::BadArgs(msg));

        if self.languages.is_empty() {
            return bad("at least one OCR language is required".into());
        }
        for lang in &self.languages {
            validate_language(lang)?;
        }
        if self.jobs == Some(0) {
            return bad("--jobs must be at least 1".into());
        }
        if self.default_dpi == 0 || self.default_dpi > MAX_OVERSAMPLE_DPI {
            return bad(format!("default resolution {} dpi out of range", self.default_dpi));
        }
        if let Some(dpi) = self.image_dpi
            && (dpi == 0 || dpi > MAX_OVERSAMPLE_DPI)
        {
            return bad(format!("image resolution {dpi} dpi out of range"));
        }
        if let Some(dpi) = self.preprocess.oversample_dpi
            && (dpi == 0 || dpi > MAX_OVERSAMPLE_DPI)
        {
            return bad(format!("oversample resolution {dpi} dpi out of range"));
        }
        for (name, secs) in [
            ("tesseract timeout", self.tesseract.timeout_secs),
            ("rasterizer timeout", self.rasterizer_timeout_secs),
            ("I/O timeout", self.io_timeout_secs),
            ("PDF/A timeout", self.pdfa_timeout_secs),
        ] {
            if !secs.is_finite() || secs <= 0.0 {
                return bad(format!("{name} must be a positive number of seconds"));
            }
            if secs > MAX_TIMEOUT_SECS {
                return bad(format!("{name} of {secs} seconds exceeds the limit of {MAX_TIMEOUT_SECS}"));
            }
        }
        if let Some(mp) = self.skip_big_mpixels
            && (!mp.is_finite() || mp <= 0.0)
        {
            return bad("--skip-big must be a positive number of megapixels".into());
        }
        if !self.rotate_pages_threshold.is_finite() || self.rotate_pages_threshold < 0.0 {
            return bad("--rotate-pages-threshold must not be negative".into());
        }
        if self.text_policy == TextPolicy::RedoOcr && self.preprocess.deskew {
            return bad("--redo-ocr cannot be combined with --deskew (the page image is kept unchanged)".into());
        }
        if self.text_policy == TextPolicy::RedoOcr && self.preprocess.clean_final {
            return bad("--redo-ocr cannot be combined with --clean-final".into());
        }
        if self.preprocess.clean_final && !self.preprocess.clean {
            return bad("--clean-final requires --clean".into());
        }
        if let Some(psm) = self.tesseract.pagesegmode
            && psm > 13
        {
            return bad(format!("tesseract page segmentation mode {psm} out of range (0-13)"));
        }
        for key in self.tesseract.config.keys() {
            if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return bad(format!("invalid tesseract config key '{key}'"));
            }
        }
        if let Some(icc) = &self.icc_profile
            && !icc.is_file()
        {
            return bad(format!("ICC profile {} does not exist", icc.display()));
        }
        if self.output_type == OutputType::None && self.sidecar.is_none() {
            return bad("--output-type none only makes sense with --sidecar".into());
        }
        Ok(())
    }
}

/// Longest accepted timeout: one week.
pub const MAX_TIMEOUT_SECS: f64 = 7.0 * 24.0 * 3600.0;

/// Timeout duration for a configured number of seconds. Out-of-range values
/// are clamped; `validate` reports them.
fn seconds(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.clamp(0.0, MAX_TIMEOUT_SECS)).unwrap_or(Duration::ZERO)
}

/// Language codes are alphanumeric with optional underscores
/// (`eng`, `chi_sim`), never flags or paths.
fn validate_language(lang: &str) -> Result<(), OcrwerkError> {
    if lang.is_empty() || lang.len() > 32 {
        return Err(OcrwerkError::BadArgs(format!("invalid language code '{lang}'")));
    }
    if let Some(c) = lang.chars().find(|c| !c.is_ascii_alphanumeric() && *c != '_') {
        return Err(OcrwerkError::BadArgs(format!(
            "invalid character '{c}' in language code '{lang}'"
        )));
    }
    Ok(())
}
