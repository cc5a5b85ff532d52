// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified job-level error types and process exit codes for Ocrwerk.

use std::path::PathBuf;

use thiserror::Error;

use crate::page::{PageFailure, PageFailureKind};
use crate::types::PdfaPart;

/// Top-level error type for all Ocrwerk job operations.
#[derive(Debug, Error)]
pub enum OcrwerkError {
    // -- Configuration --
    #[error("invalid arguments: {0}")]
    BadArgs(String),

    #[error("invalid configuration file: {0}")]
    Config(String),

    // -- Input --
    #[error("input file error: {0}")]
    Input(String),

    #[error("input PDF is encrypted")]
    EncryptedPdf,

    #[error("required program '{program}' not found: {hint}")]
    DependencyMissing { program: String, hint: String },

    // -- Page processing --
    #[error("page {page} failed ({kind}): {detail}")]
    PageProcessing {
        page: u32,
        kind: PageFailureKind,
        detail: String,
    },

    // -- Output --
    #[error("assembly invariant violated: {0}")]
    Assembly(String),

    #[error("output is not valid {part}: {}", messages.join("; "))]
    Conformance { part: PdfaPart, messages: Vec<String> },

    #[error("PDF/A conversion failed: {0}")]
    PdfaConversion(String),

    #[error("PDF operation failed: {0}")]
    Pdf(String),

    #[error("image processing failed: {0}")]
    Image(String),

    #[error("cannot access {}: {source}", path.display())]
    FileAccess {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("job was cancelled")]
    Cancelled,

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl OcrwerkError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::BadArgs(_) => ExitCode::BadArgs,
            Self::Config(_) => ExitCode::InvalidConfig,
            Self::Input(_) | Self::Pdf(_) | Self::Image(_) => ExitCode::InputFile,
            Self::EncryptedPdf => ExitCode::EncryptedPdf,
            Self::DependencyMissing { .. } => ExitCode::MissingDependency,
            Self::PageProcessing { kind, .. } => match kind {
                PageFailureKind::EngineMissing => ExitCode::MissingDependency,
                PageFailureKind::RasterFailed => ExitCode::InputFile,
                PageFailureKind::Cancelled => ExitCode::CtrlC,
                _ => ExitCode::ChildProcessError,
            },
            Self::Conformance { .. } => ExitCode::InvalidOutputPdf,
            Self::PdfaConversion(_) => ExitCode::PdfaConversionFailed,
            Self::FileAccess { .. } => ExitCode::FileAccessError,
            Self::Cancelled => ExitCode::CtrlC,
            Self::Assembly(_) | Self::Io(_) | Self::Serialization(_) | Self::Other(_) => ExitCode::OtherError,
        }
    }

    /// Wrap an I/O error with the path it concerns.
    pub fn file_access(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileAccess {
            path: path.into(),
            source,
        }
    }
}

impl From<PageFailure> for OcrwerkError {
    fn from(failure: PageFailure) -> Self {
        match failure.kind {
            PageFailureKind::Cancelled => Self::Cancelled,
            kind => Self::PageProcessing {
                page: failure.page,
                kind,
                detail: failure.detail,
            },
        }
    }
}

/// Deterministic process exit codes, one per failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Ok = 0,
    BadArgs = 1,
    InputFile = 2,
    MissingDependency = 3,
    InvalidOutputPdf = 4,
    FileAccessError = 5,
    AlreadyDoneOcr = 6,
    ChildProcessError = 7,
    EncryptedPdf = 8,
    InvalidConfig = 9,
    PdfaConversionFailed = 10,
    OtherError = 15,
    CtrlC = 130,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, OcrwerkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_stable() {
        assert_eq!(OcrwerkError::BadArgs("x".into()).exit_code().code(), 1);
        assert_eq!(OcrwerkError::Input("x".into()).exit_code().code(), 2);
        assert_eq!(
            OcrwerkError::DependencyMissing {
                program: "tesseract".into(),
                hint: String::new()
            }
            .exit_code()
            .code(),
            3
        );
        assert_eq!(
            OcrwerkError::Conformance {
                part: PdfaPart::Two,
                messages: vec![]
            }
            .exit_code()
            .code(),
            4
        );
        assert_eq!(
            OcrwerkError::file_access("/tmp/x", std::io::Error::other("denied"))
                .exit_code()
                .code(),
            5
        );
        assert_eq!(OcrwerkError::EncryptedPdf.exit_code().code(), 8);
        assert_eq!(OcrwerkError::Config("x".into()).exit_code().code(), 9);
        assert_eq!(OcrwerkError::Cancelled.exit_code().code(), 130);
        assert_eq!(OcrwerkError::Assembly("x".into()).exit_code().code(), 15);
    }

    #[test]
    fn cancelled_page_failure_becomes_job_cancellation() {
        let failure = PageFailure::new(3, PageFailureKind::Cancelled, "stop");
        assert!(matches!(OcrwerkError::from(failure), OcrwerkError::Cancelled));
    }

    #[test]
    fn conformance_message_keeps_validator_output() {
        let err = OcrwerkError::Conformance {
            part: PdfaPart::One,
            messages: vec!["missing XMP".into(), "no OutputIntent".into()],
        };
        let text = err.to_string();
        assert!(text.contains("PDF/A-1b"));
        assert!(text.contains("missing XMP; no OutputIntent"));
    }
}
