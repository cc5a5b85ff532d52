// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Human-readable error reports.
//
// Every fatal job error is mapped to a plain-English message, a suggestion,
// and the exit code the process should return.

use crate::error::{ExitCode, OcrwerkError};
use crate::page::PageFailureKind;

/// A human-readable error with plain English message and actionable suggestion.
#[derive(Debug, Clone)]
pub struct HumanError {
    /// One-line summary.
    pub message: String,
    /// What the user should try next.
    pub suggestion: String,
    /// Process exit code.
    pub exit_code: ExitCode,
}

/// Convert an `OcrwerkError` into a `HumanError`.
pub fn humanize_error(err: &OcrwerkError) -> HumanError {
    let exit_code = err.exit_code();
    let (message, suggestion) = match err {
        OcrwerkError::BadArgs(detail) => (
            format!("The command line or configuration is invalid: {detail}"),
            "Run with --help to see the accepted options.".to_string(),
        ),

        OcrwerkError::Config(detail) => (
            format!("The configuration file could not be loaded: {detail}"),
            "Check the JSON syntax and field names against the documented options.".to_string(),
        ),

        OcrwerkError::Input(detail) => (
            format!("The input file could not be read: {detail}"),
            "Check that the file is a PDF or a PNG/JPEG/TIFF image and is not damaged.".to_string(),
        ),

        OcrwerkError::EncryptedPdf => (
            "The input PDF is encrypted.".to_string(),
            "Remove the password protection first (for example with qpdf --decrypt).".to_string(),
        ),

        OcrwerkError::DependencyMissing { program, hint } => (
            format!("The program '{program}' is required but was not found."),
            hint.clone(),
        ),

        OcrwerkError::PageProcessing { page, kind, detail } => humanize_page_failure(*page, *kind, detail),

        OcrwerkError::Assembly(detail) => (
            format!("Internal error while assembling the output: {detail}"),
            "Please report this, together with the input file if possible.".to_string(),
        ),

        OcrwerkError::Conformance { part, messages } => (
            format!("The output could not be made {part} compliant."),
            format!(
                "Try --output-type pdf to skip archival conversion. Validator said: {}",
                messages.join("; ")
            ),
        ),

        OcrwerkError::PdfaConversion(detail) => (
            format!("PDF/A conversion failed: {detail}"),
            "Check that Ghostscript is installed and up to date, or use --output-type pdf.".to_string(),
        ),

        OcrwerkError::Pdf(detail) => (
            format!("The PDF structure could not be processed: {detail}"),
            "The file may be damaged. Try repairing it with another tool first.".to_string(),
        ),

        OcrwerkError::Image(detail) => (
            format!("An image could not be processed: {detail}"),
            "Try converting the input image to PNG first.".to_string(),
        ),

        OcrwerkError::FileAccess { path, source } => {
            let suggestion = match source.kind() {
                std::io::ErrorKind::NotFound => "Check the path and try again.",
                std::io::ErrorKind::PermissionDenied => "Check the file and directory permissions.",
                _ => "Check free disk space and try again.",
            };
            (
                format!("Cannot access {}: {source}", path.display()),
                suggestion.to_string(),
            )
        }

        OcrwerkError::Cancelled => (
            "The job was cancelled; no output was written.".to_string(),
            "Run the command again to restart from the beginning.".to_string(),
        ),

        OcrwerkError::Io(io_err) => (
            format!("A file operation failed: {io_err}"),
            "Check free space in the temporary directory and try again.".to_string(),
        ),

        OcrwerkError::Serialization(err) => (
            format!("Could not write or read JSON data: {err}"),
            "Please report this if it keeps happening.".to_string(),
        ),

        OcrwerkError::Other(detail) => (
            format!("Something went wrong: {detail}"),
            "Run again with -v for details.".to_string(),
        ),
    };

    HumanError {
        message,
        suggestion,
        exit_code,
    }
}

fn humanize_page_failure(page: u32, kind: PageFailureKind, detail: &str) -> (String, String) {
    let message = format!("Page {page} could not be processed ({kind}): {detail}");
    let suggestion = match kind {
        PageFailureKind::OcrTimeout => "Raise --tesseract-timeout, or use --skip-big for very large pages.",
        PageFailureKind::RasterTimeout => "Raise the rasterizer timeout in the configuration file.",
        PageFailureKind::RasterFailed => "The page may be damaged; try --pages to leave it out of OCR.",
        PageFailureKind::UnsupportedLanguage => "Install the Tesseract language pack for the requested language.",
        PageFailureKind::EngineMissing => "Install Tesseract OCR and poppler-utils.",
        PageFailureKind::OcrEngineCrashed => "Try again with fewer --jobs; the OCR engine may have run out of memory.",
        PageFailureKind::PreprocessFailed => "Drop the preprocessing option that failed, or disable strict preprocessing.",
        PageFailureKind::SynthesisFailed => "Report this page; try --force-ocr or leave it out with --pages.",
        PageFailureKind::Io => "Check free space in the temporary directory.",
        PageFailureKind::Cancelled => "Run the command again.",
    };
    (
        message,
        format!("{suggestion} Use --max-page-failures to keep going past failed pages."),
    )
}
