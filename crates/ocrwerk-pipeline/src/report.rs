// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Machine-readable summary of a finished job.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use ocrwerk_core::{JobId, OcrwerkError, PageDecision, PageFailure, PageResult};
use ocrwerk_document::pdf::OptimizeReport;
use serde::Serialize;

use crate::gate::GateOutcome;

/// Per-page line of the job report.
#[derive(Debug, Clone, Serialize)]
pub struct PageReport {
    pub page: u32,
    pub decision: PageDecision,
    pub word_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean_confidence: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dpi: Option<u32>,
    pub rotation_applied: i32,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

impl From<&PageResult> for PageReport {
    fn from(result: &PageResult) -> Self {
        Self {
            page: result.page,
            decision: result.decision,
            word_count: result.word_count,
            mean_confidence: result.mean_confidence,
            dpi: result.dpi_used,
            rotation_applied: result.orientation_correction,
            elapsed_ms: result.elapsed.as_millis() as u64,
            notes: result.notes.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub job_id: JobId,
    pub input: PathBuf,
    /// `None` when no PDF was written.
    pub output: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sidecar: Option<PathBuf>,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub page_count: u32,
    pub recognized_pages: Vec<u32>,
    pub pass_through_pages: Vec<u32>,
    /// Pages whose failure was tolerated.
    pub failed_pages: Vec<String>,
    pub retries: u32,
    pub pages: Vec<PageReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optimization: Option<OptimizeReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdfa: Option<GateOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temporary_files: Option<PathBuf>,
}

impl JobReport {
    pub fn new(job_id: JobId, input: &Path, started_at: DateTime<Utc>) -> Self {
        Self {
            job_id,
            input: input.to_path_buf(),
            output: None,
            sidecar: None,
            started_at,
            elapsed_ms: 0,
            page_count: 0,
            recognized_pages: Vec::new(),
            pass_through_pages: Vec::new(),
            failed_pages: Vec::new(),
            retries: 0,
            pages: Vec::new(),
            optimization: None,
            pdfa: None,
            temporary_files: None,
        }
    }

    /// Fill in the per-page part from ordered results.
    pub fn record_pages(&mut self, results: &[PageResult], tolerated: &[PageFailure]) {
        self.page_count = results.len() as u32;
        self.pages = results.iter().map(PageReport::from).collect();
        self.recognized_pages = results
            .iter()
            .filter(|r| !r.decision.is_pass_through())
            .map(|r| r.page)
            .collect();
        self.pass_through_pages = results
            .iter()
            .filter(|r| r.decision.is_pass_through())
            .map(|r| r.page)
            .collect();
        self.failed_pages = tolerated.iter().map(ToString::to_string).collect();
    }

    pub fn to_json(&self) -> Result<String, OcrwerkError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write_json(&self, path: &Path) -> Result<(), OcrwerkError> {
        std::fs::write(path, self.to_json()?).map_err(|e| OcrwerkError::file_access(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use ocrwerk_core::PageFailureKind;

    #[test]
    fn pages_are_split_by_decision() {
        let mut recognized = PageResult::pass_through(1, PageDecision::Recognized, Duration::from_millis(40));
        recognized.word_count = 12;
        recognized.dpi_used = Some(300);
        let results = vec![
            recognized,
            PageResult::pass_through(2, PageDecision::SkippedText, Duration::ZERO),
            PageResult::pass_through(3, PageDecision::FailedTolerated, Duration::ZERO),
        ];
        let tolerated = vec![PageFailure::new(3, PageFailureKind::OcrTimeout, "slow")];

        let mut report = JobReport::new(JobId::new(), Path::new("in.pdf"), Utc::now());
        report.record_pages(&results, &tolerated);
        assert_eq!(report.page_count, 3);
        assert_eq!(report.recognized_pages, vec![1]);
        assert_eq!(report.pass_through_pages, vec![2, 3]);
        assert_eq!(report.failed_pages, vec!["page 3: OCR timeout: slow".to_string()]);

        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["pages"][0]["decision"], "recognized");
        assert_eq!(json["pages"][0]["dpi"], 300);
        assert_eq!(json["pages"][1]["decision"], "skipped-text");
        assert!(json.get("pdfa").is_none());
    }
}
