// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Command-line surface and its translation into a job configuration.

use std::path::PathBuf;

use clap::{ArgGroup, Parser, ValueEnum};
use ocrwerk_core::{JobConfig, OcrwerkError, OptimizeLevel, OutputType, PageSelection, TextPolicy};

#[derive(Debug, Parser)]
#[command(name = "ocrwerk")]
#[command(about = "Add a searchable text layer to scanned PDFs and produce PDF/A")]
#[command(version)]
#[command(group(ArgGroup::new("text_policy").args(["force_ocr", "skip_text", "redo_ocr"])))]
pub struct Cli {
    /// Scanned PDF, or a single PNG/JPEG/TIFF image
    pub input: PathBuf,

    /// Where to write the searchable PDF
    pub output: PathBuf,

    /// JSON job configuration; command-line options override it
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// OCR languages, joined with '+' (e.g. eng+deu)
    #[arg(short, long = "language", value_delimiter = '+')]
    pub languages: Vec<String>,

    /// Pages processed concurrently (default: one per CPU)
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// 0 = off, 1 = lossless, 2 = lossy, 3 = aggressive lossy
    #[arg(short = 'O', long, value_parser = clap::value_parser!(u8).range(0..=3))]
    pub optimize: Option<u8>,

    /// Rasterize and OCR every page, discarding existing text
    #[arg(long)]
    pub force_ocr: bool,

    /// Copy pages that already have text through unchanged
    #[arg(long)]
    pub skip_text: bool,

    /// Replace an earlier invisible OCR layer, keep visible text pages
    #[arg(long)]
    pub redo_ocr: bool,

    /// pdf, pdfa, pdfa-1, pdfa-2, pdfa-3 or none
    #[arg(long, value_name = "TYPE")]
    pub output_type: Option<OutputType>,

    /// Pages to OCR, e.g. 1,3-5; the rest are copied through
    #[arg(long)]
    pub pages: Option<PageSelection>,

    #[arg(long)]
    pub title: Option<String>,
    #[arg(long)]
    pub author: Option<String>,
    #[arg(long)]
    pub subject: Option<String>,
    #[arg(long)]
    pub keywords: Option<String>,

    /// Straighten crooked pages
    #[arg(long)]
    pub deskew: bool,

    /// Despeckle pages before OCR
    #[arg(long)]
    pub clean: bool,

    /// Despeckle the visible page image too
    #[arg(long)]
    pub clean_final: bool,

    /// Flatten uneven page backgrounds
    #[arg(long)]
    pub remove_background: bool,

    /// Upsample pages below this resolution before OCR
    #[arg(long, value_name = "DPI")]
    pub oversample: Option<u32>,

    /// Binarize pages before OCR
    #[arg(long)]
    pub threshold: bool,

    /// Detect page orientation and turn pages upright
    #[arg(long)]
    pub rotate_pages: bool,

    /// Minimum orientation confidence for --rotate-pages
    #[arg(long, value_name = "CONFIDENCE")]
    pub rotate_pages_threshold: Option<f32>,

    /// Copy pages above this many megapixels through without OCR
    #[arg(long, value_name = "MPIXELS")]
    pub skip_big: Option<f64>,

    /// Resolution of image input that does not record one
    #[arg(long, value_name = "DPI")]
    pub image_dpi: Option<u32>,

    /// Seconds allowed for OCR of one page
    #[arg(long, value_name = "SECS")]
    pub tesseract_timeout: Option<f64>,

    /// Tesseract page segmentation mode
    #[arg(long, value_name = "N")]
    pub tesseract_pagesegmode: Option<u8>,

    /// Tesseract config variable, repeatable
    #[arg(long = "tesseract-config", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub tesseract_config: Vec<(String, String)>,

    /// Also write the recognized text to this file
    #[arg(long, value_name = "FILE")]
    pub sidecar: Option<PathBuf>,

    /// Page failures to tolerate before giving up
    #[arg(long, value_name = "N")]
    pub max_page_failures: Option<usize>,

    /// Leave the job's temporary directory in place
    #[arg(short = 'k', long)]
    pub keep_temporary_files: bool,

    /// sRGB ICC profile for the PDF/A output intent
    #[arg(long, value_name = "FILE")]
    pub icc_profile: Option<PathBuf>,

    /// Convert with the stricter PDF/A profile from the start
    #[arg(long)]
    pub pdfa_strict: bool,

    /// Write a JSON report of the job to this file
    #[arg(long, value_name = "FILE")]
    pub json_report: Option<PathBuf>,

    /// OCR engine to use
    #[arg(long, value_enum, default_value_t = Engine::Tesseract)]
    pub engine: Engine,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, conflicts_with = "quiet")]
    pub verbose: u8,

    /// Less logging (-q warnings, -qq errors only)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub quiet: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Engine {
    Tesseract,
    /// Pure-Rust engine; needs a build with the `ocrs` feature.
    Ocrs,
}

impl Cli {
    /// Log filter used when `RUST_LOG` is not set.
    pub fn default_log_filter(&self) -> &'static str {
        match (self.verbose, self.quiet) {
            (0, 0) => "info",
            (1, _) => "debug",
            (v, _) if v > 1 => "trace",
            (_, 1) => "warn",
            _ => "error",
        }
    }

    /// The configuration file (if any) with command-line options on top.
    pub fn job_config(&self) -> Result<JobConfig, OcrwerkError> {
        let mut config = match &self.config {
            Some(path) => JobConfig::from_json_file(path)?,
            None => JobConfig::default(),
        };
        self.apply(&mut config)?;
        Ok(config)
    }

    fn apply(&self, config: &mut JobConfig) -> Result<(), OcrwerkError> {
        if !self.languages.is_empty() {
            config.languages = self.languages.clone();
        }
        if self.jobs.is_some() {
            config.jobs = self.jobs;
        }
        if let Some(level) = self.optimize {
            config.optimize = OptimizeLevel::try_from(level)?;
        }
        if let Some(policy) = self.text_policy() {
            config.text_policy = policy;
        }
        if let Some(output_type) = self.output_type {
            config.output_type = output_type;
        }
        if let Some(pages) = &self.pages {
            config.pages = Some(pages.clone());
        }

        let metadata = &mut config.metadata;
        for (field, value) in [
            (&mut metadata.title, &self.title),
            (&mut metadata.author, &self.author),
            (&mut metadata.subject, &self.subject),
            (&mut metadata.keywords, &self.keywords),
        ] {
            if value.is_some() {
                field.clone_from(value);
            }
        }

        let preprocess = &mut config.preprocess;
        preprocess.deskew |= self.deskew;
        preprocess.clean |= self.clean;
        preprocess.clean_final |= self.clean_final;
        preprocess.remove_background |= self.remove_background;
        preprocess.threshold |= self.threshold;
        if self.oversample.is_some() {
            preprocess.oversample_dpi = self.oversample;
        }

        config.rotate_pages |= self.rotate_pages;
        if let Some(threshold) = self.rotate_pages_threshold {
            config.rotate_pages_threshold = threshold;
        }
        if self.skip_big.is_some() {
            config.skip_big_mpixels = self.skip_big;
        }
        if self.image_dpi.is_some() {
            config.image_dpi = self.image_dpi;
        }

        if let Some(secs) = self.tesseract_timeout {
            config.tesseract.timeout_secs = secs;
        }
        if self.tesseract_pagesegmode.is_some() {
            config.tesseract.pagesegmode = self.tesseract_pagesegmode;
        }
        config.tesseract.config.extend(self.tesseract_config.iter().cloned());

        if self.sidecar.is_some() {
            config.sidecar.clone_from(&self.sidecar);
        }
        if let Some(limit) = self.max_page_failures {
            config.max_page_failures = limit;
        }
        config.keep_temporary_files |= self.keep_temporary_files;
        if self.icc_profile.is_some() {
            config.icc_profile.clone_from(&self.icc_profile);
        }
        config.pdfa_strict |= self.pdfa_strict;
        Ok(())
    }

    fn text_policy(&self) -> Option<TextPolicy> {
        if self.force_ocr {
            Some(TextPolicy::ForceOcr)
        } else if self.skip_text {
            Some(TextPolicy::SkipText)
        } else if self.redo_ocr {
            Some(TextPolicy::RedoOcr)
        } else {
            None
        }
    }
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim().to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}
