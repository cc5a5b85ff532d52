// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Tesseract OCR engine, driven through its command-line interface.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use super::{BBox, LineKey, OcrEngine, OcrError, OcrRequest, Orientation, TextPage, Word};
use crate::process::{self, ProcessError};

/// Limit for the quick `--list-langs` and `--version` queries.
const QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Tesseract invocation settings shared by every page of a job.
#[derive(Debug, Clone)]
pub struct TesseractEngine {
    program: String,
    pagesegmode: Option<u8>,
    config: BTreeMap<String, String>,
}

impl TesseractEngine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            pagesegmode: None,
            config: BTreeMap::new(),
        }
    }

    /// Page segmentation mode passed as `--psm`.
    pub fn with_pagesegmode(mut self, psm: Option<u8>) -> Self {
        self.pagesegmode = psm;
        self
    }

    /// `-c key=value` overrides.
    pub fn with_config(mut self, config: BTreeMap<String, String>) -> Self {
        self.config = config;
        self
    }

    fn recognize_args(&self, request: &OcrRequest<'_>) -> Vec<String> {
        let mut args = vec![
            request.image.display().to_string(),
            "stdout".to_string(),
            "-l".to_string(),
            request.languages.join("+"),
            "--dpi".to_string(),
            request.dpi.to_string(),
        ];
        if let Some(psm) = self.pagesegmode {
            args.push("--psm".to_string());
            args.push(psm.to_string());
        }
        for (key, value) in &self.config {
            args.push("-c".to_string());
            args.push(format!("{key}={value}"));
        }
        args.push("tsv".to_string());
        args
    }

    fn classify(&self, err: ProcessError) -> OcrError {
        let signalled = err.was_signalled();
        match err {
            ProcessError::NotFound { program } => OcrError::EngineMissing(program),
            ProcessError::Timeout { limit, .. } => OcrError::Timeout(limit),
            ProcessError::Spawn { source, .. } | ProcessError::Io { source, .. } => OcrError::Io(source),
            ProcessError::Failed { status, stderr, .. } => {
                if let Some(lang) = missing_language(&stderr) {
                    OcrError::UnsupportedLanguage(lang)
                } else if signalled {
                    OcrError::EngineCrashed(format!("terminated by signal: {stderr}"))
                } else {
                    OcrError::EngineCrashed(format!("exit {status}: {stderr}"))
                }
            }
        }
    }
}

impl Default for TesseractEngine {
    fn default() -> Self {
        Self::new("tesseract")
    }
}

#[async_trait]
impl OcrEngine for TesseractEngine {
    fn name(&self) -> &str {
        &self.program
    }

    #[instrument(skip_all, fields(page = request.page, dpi = request.dpi))]
    async fn recognize(&self, request: &OcrRequest<'_>) -> Result<TextPage, OcrError> {
        let args = self.recognize_args(request);
        let output = process::run(&self.program, &args, request.timeout)
            .await
            .map_err(|e| self.classify(e))?;
        let page = parse_tsv(&output.stdout_lossy(), request.width, request.height)?;
        debug!(words = page.word_count(), elapsed_ms = output.elapsed.as_millis() as u64, "Tesseract finished");
        Ok(page)
    }

    #[instrument(skip_all, fields(page = request.page))]
    async fn detect_orientation(&self, request: &OcrRequest<'_>) -> Result<Orientation, OcrError> {
        let args = [
            request.image.display().to_string(),
            "stdout".to_string(),
            "--psm".to_string(),
            "0".to_string(),
            "--dpi".to_string(),
            request.dpi.to_string(),
        ];
        match process::run(&self.program, &args, request.timeout).await {
            Ok(output) => Ok(parse_osd(&output.stdout_lossy()).unwrap_or_else(Orientation::upright)),
            Err(ProcessError::Failed { stderr, .. }) if stderr.contains("Too few characters") => {
                debug!("Too little text for orientation detection");
                Ok(Orientation::upright())
            }
            Err(err) => Err(self.classify(err)),
        }
    }

    async fn languages(&self) -> Result<Vec<String>, OcrError> {
        let output = process::run(&self.program, ["--list-langs"], QUERY_TIMEOUT)
            .await
            .map_err(|e| self.classify(e))?;
        // Older releases print the list on stderr.
        let listing = format!("{}\n{}", output.stdout_lossy(), output.stderr_lossy());
        Ok(parse_language_list(&listing))
    }
}

/// Parse Tesseract TSV output into words.
///
/// Columns: level, page_num, block_num, par_num, line_num, word_num, left,
/// top, width, height, conf, text. Level 1 rows carry the page size; level
/// 5 rows are words.
pub fn parse_tsv(tsv: &str, fallback_width: u32, fallback_height: u32) -> Result<TextPage, OcrError> {
    let mut page = TextPage::empty(fallback_width, fallback_height);

    for (number, line) in tsv.lines().enumerate() {
        if line.trim().is_empty() || line.starts_with("level") {
            continue;
        }
        let cols: Vec<&str> = line.splitn(12, '\t').collect();
        if cols.len() < 11 {
            return Err(OcrError::InvalidOutput(format!("TSV line {} has {} columns", number + 1, cols.len())));
        }
        let num = |i: usize| -> Result<i64, OcrError> {
            cols[i]
                .trim()
                .parse::<i64>()
                .map_err(|_| OcrError::InvalidOutput(format!("TSV line {}: bad number '{}'", number + 1, cols[i])))
        };
        let level = num(0)?;
        let to_u32 = |v: i64| v.clamp(0, u32::MAX as i64) as u32;

        match level {
            1 => {
                let (w, h) = (to_u32(num(8)?), to_u32(num(9)?));
                if w > 0 && h > 0 {
                    page.width = w;
                    page.height = h;
                }
            }
            5 => {
                let text = cols.get(11).map(|t| t.trim()).unwrap_or_default();
                if text.is_empty() {
                    continue;
                }
                let confidence = cols[10].trim().parse::<f32>().unwrap_or(-1.0);
                page.words.push(Word {
                    text: text.to_string(),
                    bbox: BBox {
                        left: to_u32(num(6)?),
                        top: to_u32(num(7)?),
                        width: to_u32(num(8)?),
                        height: to_u32(num(9)?),
                    },
                    confidence,
                    line: LineKey {
                        block: to_u32(num(2)?),
                        paragraph: to_u32(num(3)?),
                        line: to_u32(num(4)?),
                    },
                });
            }
            _ => {}
        }
    }
    Ok(page)
}

/// Parse `--psm 0` output. `None` when the fields are missing.
pub fn parse_osd(output: &str) -> Option<Orientation> {
    let mut rotate = None;
    let mut confidence = None;
    for line in output.lines() {
        if let Some((key, value)) = line.split_once(':') {
            match key.trim() {
                "Rotate" => rotate = value.trim().parse::<i32>().ok(),
                "Orientation confidence" => confidence = value.trim().parse::<f32>().ok(),
                _ => {}
            }
        }
    }
    let rotate = rotate?.rem_euclid(360);
    if rotate % 90 != 0 {
        warn!(rotate, "Ignoring non-quarter orientation from OSD");
        return None;
    }
    Some(Orientation {
        rotate,
        confidence: confidence.unwrap_or(0.0),
    })
}

/// Parse `--list-langs` output.
pub fn parse_language_list(listing: &str) -> Vec<String> {
    let mut langs: Vec<String> = listing
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with("List of available languages") && !l.contains(' '))
        .map(str::to_string)
        .collect();
    langs.sort();
    langs.dedup();
    langs
}

/// Extract the language name from Tesseract's "failed loading" messages.
fn missing_language(stderr: &str) -> Option<String> {
    for line in stderr.lines() {
        if let Some(rest) = line.split("Failed loading language '").nth(1) {
            return rest.split('\'').next().map(str::to_string);
        }
        if line.contains("Error opening data file")
            && let Some(file) = line.rsplit('/').next()
        {
            return Some(file.trim_end_matches(".traineddata").trim().to_string());
        }
    }
    None
}
