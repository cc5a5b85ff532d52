// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PDF/A conformance validation.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lopdf::{Dictionary, Document, Object};
use ocrwerk_core::error::OcrwerkError;
use ocrwerk_core::types::PdfaPart;
use serde::Serialize;
use tracing::{debug, instrument, warn};

use super::objects::{get, get_dict, name, number, resolve};
use crate::process::{self, ProcessError};

/// Outcome of validating one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub validator: String,
    pub conformant: bool,
    /// Findings in the validator's own words.
    pub messages: Vec<String>,
}

/// Checks a file against a PDF/A part.
#[async_trait]
pub trait ConformanceValidator: Send + Sync {
    fn name(&self) -> &str;

    async fn validate(&self, path: &Path, part: PdfaPart) -> Result<ValidationReport, OcrwerkError>;
}

/// In-process check of the structural requirements the conversion is
/// responsible for. Always available; not a full PDF/A validator.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralValidator;

impl StructuralValidator {
    pub fn new() -> Self {
        Self
    }

    /// Findings for an already loaded document.
    pub fn check(&self, doc: &Document, part: PdfaPart) -> Vec<String> {
        let mut messages = Vec::new();

        let max_version = part.pdf_version();
        let version_ok = match (doc.version.parse::<f32>(), max_version.parse::<f32>()) {
            (Ok(have), Ok(max)) => have <= max,
            _ => false,
        };
        if !version_ok {
            messages.push(format!("PDF version {} exceeds {max_version} allowed by {part}", doc.version));
        }
        if doc.trailer.has(b"Encrypt") {
            messages.push("document is encrypted".into());
        }
        if !doc.trailer.has(b"ID") {
            messages.push("trailer has no /ID".into());
        }

        let Ok(catalog) = doc.catalog() else {
            messages.push("document has no catalog".into());
            return messages;
        };
        check_identification(doc, catalog, part, &mut messages);
        check_output_intent(doc, catalog, &mut messages);

        if let Some(names) = get_dict(doc, catalog, b"Names") {
            if names.has(b"JavaScript") {
                messages.push("document-level JavaScript present".into());
            }
            if names.has(b"EmbeddedFiles") && part != PdfaPart::Three {
                messages.push(format!("embedded files are not allowed in {part}"));
            }
        }

        for object in doc.objects.values() {
            let dict = match object {
                Object::Dictionary(d) => d,
                Object::Stream(s) => &s.dict,
                _ => continue,
            };
            if name(doc, dict, b"S") == Some(b"JavaScript".as_slice()) {
                messages.push("JavaScript action present".into());
            }
            if part == PdfaPart::One && uses_transparency(doc, dict) {
                messages.push(format!("transparency is not allowed in {part}"));
            }
            if name(doc, dict, b"Type") == Some(b"Font".as_slice())
                && let Some(font) = unembedded_font(doc, dict)
            {
                messages.push(format!("font {font} is not embedded"));
            }
        }

        messages.sort();
        messages.dedup();
        messages
    }
}

fn check_identification(doc: &Document, catalog: &Dictionary, part: PdfaPart, messages: &mut Vec<String>) {
    let xmp = match get(doc, catalog, b"Metadata") {
        Some(Object::Stream(stream)) => {
            let data = stream.decompressed_content().unwrap_or_else(|_| stream.content.clone());
            String::from_utf8_lossy(&data).into_owned()
        }
        _ => {
            messages.push("catalog has no XMP metadata stream".into());
            return;
        }
    };
    let number = part.number().to_string();
    if xmp_value(&xmp, "pdfaid:part").as_deref() != Some(number.as_str()) {
        messages.push(format!("XMP metadata does not declare pdfaid:part {number}"));
    }
    let conformance = xmp_value(&xmp, "pdfaid:conformance");
    if !conformance.is_some_and(|c| c.eq_ignore_ascii_case(part.conformance())) {
        messages.push(format!("XMP metadata does not declare pdfaid:conformance {}", part.conformance()));
    }
}

/// Value of an XMP property written either as an element or an attribute.
fn xmp_value(xmp: &str, property: &str) -> Option<String> {
    let element = format!("<{property}>");
    if let Some(start) = xmp.find(&element) {
        let rest = &xmp[start + element.len()..];
        return rest.find('<').map(|end| rest[..end].trim().to_string());
    }
    let attribute = format!("{property}=");
    let start = xmp.find(&attribute)? + attribute.len();
    let rest = &xmp[start..];
    let quote = rest.chars().next()?;
    let rest = &rest[quote.len_utf8()..];
    rest.find(quote).map(|end| rest[..end].trim().to_string())
}

fn check_output_intent(doc: &Document, catalog: &Dictionary, messages: &mut Vec<String>) {
    let intents = match get(doc, catalog, b"OutputIntents") {
        Some(Object::Array(items)) => items,
        _ => {
            messages.push("catalog has no OutputIntents".into());
            return;
        }
    };
    let valid = intents.iter().any(|intent| match resolve(doc, intent) {
        Some(Object::Dictionary(d)) => {
            name(doc, d, b"S") == Some(b"GTS_PDFA1".as_slice()) && matches!(get(doc, d, b"DestOutputProfile"), Some(Object::Stream(_)))
        }
        _ => false,
    });
    if !valid {
        messages.push("no GTS_PDFA1 output intent with an embedded ICC profile".into());
    }
}

fn uses_transparency(doc: &Document, dict: &Dictionary) -> bool {
    if let Some(group) = get_dict(doc, dict, b"Group")
        && name(doc, group, b"S") == Some(b"Transparency".as_slice())
    {
        return true;
    }
    if name(doc, dict, b"Type") == Some(b"ExtGState".as_slice()) {
        let soft_mask = get(doc, dict, b"SMask").is_some_and(|m| !matches!(m, Object::Name(n) if n == b"None"));
        let alpha = [&b"CA"[..], b"ca"]
            .iter()
            .any(|key| get(doc, dict, key).and_then(number).is_some_and(|a| a < 1.0));
        return soft_mask || alpha;
    }
    false
}

/// Base font name of a font without embedded font data.
fn unembedded_font(doc: &Document, font: &Dictionary) -> Option<String> {
    let subtype = name(doc, font, b"Subtype")?;
    if subtype == b"Type3" {
        return None;
    }
    let described = if subtype == b"Type0" {
        match get(doc, font, b"DescendantFonts")? {
            Object::Array(items) => match resolve(doc, items.first()?)? {
                Object::Dictionary(d) => d,
                _ => return None,
            },
            _ => return None,
        }
    } else {
        font
    };
    let embedded = get_dict(doc, described, b"FontDescriptor")
        .is_some_and(|fd| fd.has(b"FontFile") || fd.has(b"FontFile2") || fd.has(b"FontFile3"));
    if embedded {
        return None;
    }
    let base = name(doc, font, b"BaseFont").map(|n| String::from_utf8_lossy(n).into_owned());
    Some(base.unwrap_or_else(|| "(unnamed)".into()))
}

#[async_trait]
impl ConformanceValidator for StructuralValidator {
    fn name(&self) -> &str {
        "structural"
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    async fn validate(&self, path: &Path, part: PdfaPart) -> Result<ValidationReport, OcrwerkError> {
        let bytes = tokio::fs::read(path).await.map_err(|e| OcrwerkError::file_access(path, e))?;
        let validator = *self;
        let messages = tokio::task::spawn_blocking(move || match Document::load_mem(&bytes) {
            Ok(doc) => validator.check(&doc, part),
            Err(err) => vec![format!("file does not parse as PDF: {err}")],
        })
        .await
        .map_err(|e| OcrwerkError::Other(format!("validation task failed: {e}")))?;

        debug!(findings = messages.len(), "Structural validation finished");
        Ok(ValidationReport {
            validator: self.name().to_string(),
            conformant: messages.is_empty(),
            messages,
        })
    }
}

/// Validation with the veraPDF command-line tool.
#[derive(Debug, Clone)]
pub struct VeraPdfValidator {
    program: String,
    timeout: Duration,
}

impl VeraPdfValidator {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    /// A validator for `verapdf` on `PATH`, if it is installed.
    pub fn detect(timeout: Duration) -> Option<Self> {
        process::find_program("verapdf").map(|p| Self::new(p.display().to_string(), timeout))
    }

    fn flavour(part: PdfaPart) -> String {
        format!("{}{}", part.number(), part.conformance().to_ascii_lowercase())
    }
}

/// Interpret veraPDF's text report: `PASS <file>` or `FAIL <file>`
/// followed by rule findings.
pub fn parse_verapdf_text(output: &str) -> Option<(bool, Vec<String>)> {
    let mut verdict = None;
    let mut messages = Vec::new();
    for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if line.starts_with("PASS") {
            verdict = Some(true);
        } else if line.starts_with("FAIL") {
            verdict = Some(false);
        } else {
            messages.push(line.to_string());
        }
    }
    verdict.map(|conformant| (conformant, messages))
}

#[async_trait]
impl ConformanceValidator for VeraPdfValidator {
    fn name(&self) -> &str {
        "verapdf"
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    async fn validate(&self, path: &Path, part: PdfaPart) -> Result<ValidationReport, OcrwerkError> {
        let path_arg = path.display().to_string();
        let flavour = Self::flavour(part);
        let args = ["--format", "text", "--flavour", flavour.as_str(), path_arg.as_str()];
        let (status, output) = process::run_unchecked(&self.program, args, self.timeout)
            .await
            .map_err(|err| match err {
                ProcessError::NotFound { program } => OcrwerkError::DependencyMissing {
                    program,
                    hint: "install veraPDF or rely on the built-in checks".into(),
                },
                other => OcrwerkError::Other(format!("veraPDF failed: {other}")),
            })?;

        let stdout = output.stdout_lossy();
        let Some((conformant, messages)) = parse_verapdf_text(&stdout) else {
            warn!(%status, "veraPDF produced no verdict");
            return Err(OcrwerkError::Other(format!(
                "veraPDF produced no verdict: {}",
                output.stderr_lossy().trim()
            )));
        };
        Ok(ValidationReport {
            validator: self.name().to_string(),
            conformant,
            messages,
        })
    }
}

/// Validators to run for a job: always the structural checks, plus
/// veraPDF when it is installed.
pub fn default_validators(timeout: Duration) -> Vec<Arc<dyn ConformanceValidator>> {
    let mut validators: Vec<Arc<dyn ConformanceValidator>> = vec![Arc::new(StructuralValidator)];
    if let Some(verapdf) = VeraPdfValidator::detect(timeout) {
        validators.push(Arc::new(verapdf));
    }
    validators
}
