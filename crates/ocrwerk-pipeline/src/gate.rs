// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PDF/A gate: convert, normalize, validate. A candidate that fails
// validation gets exactly one more conversion with the strict profile; if
// that fails too the job fails and the validator messages are reported.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use ocrwerk_core::{OcrwerkError, PdfaPart};
use ocrwerk_document::pdf::{ConformanceValidator, PdfaConverter, PdfaProfile, PdfaRequest, ValidationReport, normalize_file};
use serde::Serialize;
use tracing::{info, instrument, warn};

/// What the gate did for a job that passed.
#[derive(Debug, Clone, Serialize)]
pub struct GateOutcome {
    pub part: String,
    /// `standard` or `strict`.
    pub profile: &'static str,
    pub retried: bool,
    pub reports: Vec<ValidationReport>,
}

pub struct ConformanceGate {
    converter: Arc<dyn PdfaConverter>,
    validators: Vec<Arc<dyn ConformanceValidator>>,
    timeout: Duration,
    strict_only: bool,
}

impl ConformanceGate {
    pub fn new(
        converter: Arc<dyn PdfaConverter>,
        validators: Vec<Arc<dyn ConformanceValidator>>,
        timeout: Duration,
    ) -> Self {
        Self {
            converter,
            validators,
            timeout,
            strict_only: false,
        }
    }

    /// Start with the strict profile; there is then nothing to retry with.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict_only = strict;
        self
    }

    /// Turn `input` into a validated PDF/A `part` at `output`.
    #[instrument(skip_all, fields(part = %part, converter = self.converter.name()))]
    pub async fn run(&self, input: &Path, output: &Path, part: PdfaPart) -> Result<GateOutcome, OcrwerkError> {
        let profiles: &[PdfaProfile] = if self.strict_only {
            &[PdfaProfile::Strict]
        } else {
            &[PdfaProfile::Standard, PdfaProfile::Strict]
        };

        let mut messages = Vec::new();
        for (round, profile) in profiles.iter().copied().enumerate() {
            self.converter
                .convert(&PdfaRequest {
                    input,
                    output,
                    part,
                    profile,
                    timeout: self.timeout,
                })
                .await?;
            normalize_file(output, part, profile).await?;

            let reports = self.validate(output, part).await?;
            if reports.iter().all(|r| r.conformant) {
                info!(profile = profile_name(profile), "output passed PDF/A validation");
                return Ok(GateOutcome {
                    part: part.to_string(),
                    profile: profile_name(profile),
                    retried: round > 0,
                    reports,
                });
            }
            messages.clear();
            for report in reports.into_iter().filter(|r| !r.conformant) {
                warn!(
                    profile = profile_name(profile),
                    validator = %report.validator,
                    problems = report.messages.len(),
                    "output failed PDF/A validation"
                );
                messages.extend(report.messages);
            }
        }

        Err(OcrwerkError::Conformance { part, messages })
    }

    async fn validate(&self, path: &Path, part: PdfaPart) -> Result<Vec<ValidationReport>, OcrwerkError> {
        let mut reports = Vec::with_capacity(self.validators.len());
        for validator in &self.validators {
            reports.push(validator.validate(path, part).await?);
        }
        Ok(reports)
    }
}

fn profile_name(profile: PdfaProfile) -> &'static str {
    match profile {
        PdfaProfile::Standard => "standard",
        PdfaProfile::Strict => "strict",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;

    #[derive(Default)]
    struct RecordingConverter {
        profiles: Mutex<Vec<PdfaProfile>>,
    }

    #[async_trait]
    impl PdfaConverter for RecordingConverter {
        fn name(&self) -> &str {
            "recording"
        }

        async fn convert(&self, request: &PdfaRequest<'_>) -> Result<(), OcrwerkError> {
            self.profiles.lock().unwrap().push(request.profile);
            tokio::fs::copy(request.input, request.output).await?;
            Ok(())
        }
    }

    /// Hands out scripted verdicts in call order.
    struct Verdicts(Vec<bool>, Mutex<usize>);

    #[async_trait]
    impl ConformanceValidator for Verdicts {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn validate(&self, _path: &Path, _part: PdfaPart) -> Result<ValidationReport, OcrwerkError> {
            let mut calls = self.1.lock().unwrap();
            let conformant = self.0.get(*calls).copied().unwrap_or(false);
            *calls += 1;
            Ok(ValidationReport {
                validator: self.name().into(),
                conformant,
                messages: if conformant {
                    Vec::new()
                } else {
                    vec!["6.1.3-1: trailer dictionary lacks the ID keyword".into()]
                },
            })
        }
    }

    fn minimal_pdf(dir: &Path) -> std::path::PathBuf {
        use lopdf::{Document, Object, dictionary};
        let mut doc = Document::with_version("1.7");
        let pages_id = doc.new_object_id();
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 100.into(), 100.into()],
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
            }),
        );
        let catalog = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
        doc.trailer.set("Root", catalog);
        let path = dir.join("in.pdf");
        doc.save(&path).unwrap();
        path
    }

    fn gate(converter: Arc<RecordingConverter>, verdicts: Vec<bool>) -> ConformanceGate {
        ConformanceGate::new(
            converter,
            vec![Arc::new(Verdicts(verdicts, Mutex::new(0)))],
            Duration::from_secs(10),
        )
    }

    #[tokio::test]
    async fn passing_candidate_is_accepted_first_time() {
        let dir = tempfile::tempdir().unwrap();
        let input = minimal_pdf(dir.path());
        let converter = Arc::new(RecordingConverter::default());
        let outcome = gate(converter.clone(), vec![true])
            .run(&input, &dir.path().join("out.pdf"), PdfaPart::Two)
            .await
            .unwrap();
        assert!(!outcome.retried);
        assert_eq!(outcome.profile, "standard");
        assert_eq!(*converter.profiles.lock().unwrap(), vec![PdfaProfile::Standard]);
    }

    #[tokio::test]
    async fn failure_is_retried_once_with_strict_profile() {
        let dir = tempfile::tempdir().unwrap();
        let input = minimal_pdf(dir.path());
        let converter = Arc::new(RecordingConverter::default());
        let outcome = gate(converter.clone(), vec![false, true])
            .run(&input, &dir.path().join("out.pdf"), PdfaPart::Two)
            .await
            .unwrap();
        assert!(outcome.retried);
        assert_eq!(outcome.profile, "strict");
        assert_eq!(
            *converter.profiles.lock().unwrap(),
            vec![PdfaProfile::Standard, PdfaProfile::Strict]
        );
    }

    #[tokio::test]
    async fn second_failure_reports_validator_messages() {
        let dir = tempfile::tempdir().unwrap();
        let input = minimal_pdf(dir.path());
        let converter = Arc::new(RecordingConverter::default());
        let err = gate(converter.clone(), vec![false, false])
            .run(&input, &dir.path().join("out.pdf"), PdfaPart::One)
            .await
            .unwrap_err();
        match err {
            OcrwerkError::Conformance { part, messages } => {
                assert_eq!(part, PdfaPart::One);
                assert_eq!(messages, vec!["6.1.3-1: trailer dictionary lacks the ID keyword".to_string()]);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(converter.profiles.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn strict_configuration_converts_once() {
        let dir = tempfile::tempdir().unwrap();
        let input = minimal_pdf(dir.path());
        let converter = Arc::new(RecordingConverter::default());
        let err = gate(converter.clone(), vec![false])
            .strict(true)
            .run(&input, &dir.path().join("out.pdf"), PdfaPart::Two)
            .await;
        assert!(err.is_err());
        assert_eq!(*converter.profiles.lock().unwrap(), vec![PdfaProfile::Strict]);
    }
}
