// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Up-front dependency checks, so a job fails before any page work when an
// external program or OCR language is missing.

use ocrwerk_core::{JobConfig, OcrwerkError};
use ocrwerk_document::OcrEngine;
use tracing::{debug, instrument};

/// An external program a job needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub program: String,
    /// What to tell the user when it is missing.
    pub hint: &'static str,
}

/// Programs the default collaborators invoke for `config`. With an
/// in-process OCR engine the Tesseract executable is not needed.
pub fn required_programs(config: &JobConfig, external_ocr: bool) -> Vec<Requirement> {
    let mut required = vec![Requirement {
        program: config.rasterizer_program.clone(),
        hint: "install poppler-utils (provides pdftoppm)",
    }];
    if external_ocr {
        required.push(Requirement {
            program: config.tesseract.program.clone(),
            hint: "install tesseract-ocr and the language data you need",
        });
    }
    if config.output_type.pdfa_part().is_some() {
        required.push(Requirement {
            program: config.ghostscript_program.clone(),
            hint: "install ghostscript, or use --output-type pdf",
        });
    }
    required
}

/// Fail with `DependencyMissing` for the first requirement not on `PATH`.
pub fn check_programs(required: &[Requirement]) -> Result<(), OcrwerkError> {
    for requirement in required {
        match which::which(&requirement.program) {
            Ok(path) => debug!(program = %requirement.program, path = %path.display(), "found"),
            Err(_) => {
                return Err(OcrwerkError::DependencyMissing {
                    program: requirement.program.clone(),
                    hint: requirement.hint.to_string(),
                });
            }
        }
    }
    Ok(())
}

/// Fail with `DependencyMissing` unless `engine` has data for every
/// language in `languages`.
#[instrument(skip_all, fields(engine = engine.name()))]
pub async fn check_languages(engine: &dyn OcrEngine, languages: &[String]) -> Result<(), OcrwerkError> {
    let installed = engine.languages().await.map_err(|err| OcrwerkError::DependencyMissing {
        program: engine.name().to_string(),
        hint: err.to_string(),
    })?;
    let missing: Vec<&str> = languages
        .iter()
        .filter(|lang| !installed.iter().any(|i| i == *lang))
        .map(String::as_str)
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    Err(OcrwerkError::DependencyMissing {
        program: format!("{} language data ({})", engine.name(), missing.join(", ")),
        hint: format!("installed languages: {}", installed.join(", ")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ocrwerk_core::OutputType;
    use ocrwerk_document::ocr::Orientation;
    use ocrwerk_document::{OcrError, OcrRequest, TextPage};

    struct Langs(Vec<&'static str>);

    #[async_trait]
    impl OcrEngine for Langs {
        fn name(&self) -> &str {
            "fake"
        }

        async fn recognize(&self, request: &OcrRequest<'_>) -> Result<TextPage, OcrError> {
            Ok(TextPage::empty(request.width, request.height))
        }

        async fn detect_orientation(&self, _request: &OcrRequest<'_>) -> Result<Orientation, OcrError> {
            Ok(Orientation::upright())
        }

        async fn languages(&self) -> Result<Vec<String>, OcrError> {
            Ok(self.0.iter().map(|l| l.to_string()).collect())
        }
    }

    #[test]
    fn ghostscript_only_needed_for_pdfa() {
        let pdfa = required_programs(&JobConfig::default(), true);
        assert!(pdfa.iter().any(|r| r.program == "gs"));

        let plain = required_programs(
            &JobConfig {
                output_type: OutputType::Pdf,
                ..Default::default()
            },
            true,
        );
        assert!(!plain.iter().any(|r| r.program == "gs"));
        assert_eq!(plain.len(), 2);
    }

    #[test]
    fn in_process_ocr_needs_no_tesseract() {
        let required = required_programs(&JobConfig::default(), false);
        let programs: Vec<&str> = required.iter().map(|r| r.program.as_str()).collect();
        assert_eq!(programs, vec!["pdftoppm", "gs"]);
    }

    #[test]
    fn missing_program_is_reported() {
        let err = check_programs(&[Requirement {
            program: "ocrwerk-no-such-program".into(),
            hint: "nothing to install",
        }])
        .unwrap_err();
        assert!(matches!(err, OcrwerkError::DependencyMissing { ref program, .. } if program == "ocrwerk-no-such-program"));
        assert_eq!(err.exit_code().code(), 3);
    }

    #[tokio::test]
    async fn languages_must_be_installed() {
        let engine = Langs(vec!["eng", "deu", "osd"]);
        check_languages(&engine, &["eng".into(), "deu".into()]).await.unwrap();
        let err = check_languages(&engine, &["eng".into(), "fra".into()]).await.unwrap_err();
        match err {
            OcrwerkError::DependencyMissing { program, .. } => assert!(program.contains("fra")),
            other => panic!("unexpected error {other:?}"),
        }
    }
}
