// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Job orchestrator.
//
// validate config -> check dependencies -> (image to PDF) -> inspect ->
// schedule pages -> assemble -> optimize -> PDF/A gate -> sidecar -> write.
//
// All intermediate files live in one temporary directory per job, removed
// when the job ends unless temporary files are kept. The output file is
// written next to its final location and renamed into place, so a failed
// or cancelled job never leaves a partial output behind.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use ocrwerk_core::{JobConfig, JobId, OcrwerkError, PageResult};
use ocrwerk_document::pdf::writer::is_image;
use ocrwerk_document::pdf::{
    Assembler, ConformanceValidator, GhostscriptConverter, PdfaConverter, SourceDocument, default_validators,
};
use ocrwerk_document::{ImagePdfWriter, OcrEngine, Optimizer, PdftoppmRasterizer, Rasterizer, TesseractEngine};
use tempfile::TempDir;
use tokio::io::AsyncReadExt;
use tracing::{Instrument, debug, info, info_span};

use crate::cancel::CancelFlag;
use crate::deps;
use crate::gate::ConformanceGate;
use crate::report::JobReport;
use crate::scheduler::{Scheduler, SchedulerConfig};
use crate::worker::{PageWorker, WorkerSettings};

/// The external collaborators a job talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub rasterizer: Arc<dyn Rasterizer>,
    pub engine: Arc<dyn OcrEngine>,
    pub converter: Arc<dyn PdfaConverter>,
    pub validators: Vec<Arc<dyn ConformanceValidator>>,
}

impl Collaborators {
    /// pdftoppm, Tesseract and Ghostscript as configured, plus the
    /// structural validator and veraPDF when installed.
    pub fn from_config(config: &JobConfig) -> Self {
        Self {
            rasterizer: Arc::new(PdftoppmRasterizer::new(config.rasterizer_program.clone())),
            engine: Arc::new(
                TesseractEngine::new(config.tesseract.program.clone())
                    .with_pagesegmode(config.tesseract.pagesegmode)
                    .with_config(config.tesseract.config.clone()),
            ),
            converter: Arc::new(
                GhostscriptConverter::new(config.ghostscript_program.clone())
                    .with_icc_profile(config.icc_profile.clone()),
            ),
            validators: default_validators(config.pdfa_timeout()),
        }
    }
}

pub struct Pipeline {
    config: JobConfig,
    collaborators: Collaborators,
    cancel: CancelFlag,
    /// Programs that must be on `PATH` before any page work.
    required: Vec<deps::Requirement>,
}

impl Pipeline {
    /// A pipeline driving the given collaborators. Nothing is looked up on
    /// `PATH` unless requirements are added with `with_required_programs`.
    pub fn new(config: JobConfig, collaborators: Collaborators) -> Self {
        Self {
            config,
            collaborators,
            cancel: CancelFlag::new(),
            required: Vec::new(),
        }
    }

    /// A pipeline using the external programs named in `config`.
    pub fn from_config(config: JobConfig) -> Self {
        let collaborators = Collaborators::from_config(&config);
        let required = deps::required_programs(&config, true);
        Self::new(config, collaborators).with_required_programs(required)
    }

    /// The configured external programs around an in-process OCR engine.
    pub fn with_engine(config: JobConfig, engine: Arc<dyn OcrEngine>) -> Self {
        let collaborators = Collaborators {
            engine,
            ..Collaborators::from_config(&config)
        };
        let required = deps::required_programs(&config, false);
        Self::new(config, collaborators).with_required_programs(required)
    }

    /// Check these programs before any page work.
    pub fn with_required_programs(mut self, required: Vec<deps::Requirement>) -> Self {
        self.required = required;
        self
    }

    /// Share an existing cancel flag, e.g. one wired to Ctrl-C.
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    /// Run one job from `input` to `output`.
    pub async fn run(&self, input: &Path, output: &Path) -> Result<JobReport, OcrwerkError> {
        let job_id = JobId::new();
        let span = info_span!("job", id = %job_id);
        self.run_job(job_id, input, output).instrument(span).await
    }

    async fn run_job(&self, job_id: JobId, input: &Path, output: &Path) -> Result<JobReport, OcrwerkError> {
        let started = Instant::now();
        let mut report = JobReport::new(job_id, input, Utc::now());
        info!(input = %input.display(), output = %output.display(), "job started");

        self.config.validate()?;
        deps::check_programs(&self.required)?;
        deps::check_languages(self.collaborators.engine.as_ref(), &self.config.languages).await?;
        if self.config.output_type.writes_pdf() {
            check_output_dir(output)?;
        }

        let work = self.temp_dir(job_id)?;
        debug!(path = %work.path().display(), "temporary directory created");
        let result = self.process(input, output, work.path(), &mut report).await;

        if self.config.keep_temporary_files {
            let kept = work.keep();
            info!(path = %kept.display(), "temporary files kept");
            report.temporary_files = Some(kept);
        }
        result?;

        report.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            pages = report.page_count,
            recognized = report.recognized_pages.len(),
            elapsed_ms = report.elapsed_ms,
            "job finished"
        );
        Ok(report)
    }

    async fn process(
        &self,
        input: &Path,
        output: &Path,
        work: &Path,
        report: &mut JobReport,
    ) -> Result<(), OcrwerkError> {
        let config = &self.config;

        let source_path = if looks_like_image(input).await? {
            let pdf = work.join("image-input.pdf");
            let writer = ImagePdfWriter::new().with_dpi(config.image_dpi);
            let (from, to) = (input.to_path_buf(), pdf.clone());
            blocking(move || writer.convert_file(&from, &to)).await?;
            info!("image input converted to PDF");
            pdf
        } else {
            input.to_path_buf()
        };

        let source = {
            let path = source_path.clone();
            Arc::new(blocking(move || SourceDocument::open(&path)).await?)
        };
        if let Some(selection) = &config.pages {
            selection.validate_against(source.page_count())?;
        }
        let descriptors = source.descriptors(&config.languages, &config.preprocess, config.pages.as_ref())?;
        self.check_cancel()?;

        let worker = PageWorker::new(
            &source_path,
            Arc::from(source.pages().to_vec()),
            work,
            Arc::clone(&self.collaborators.rasterizer),
            Arc::clone(&self.collaborators.engine),
            WorkerSettings::from(config),
        );
        let scheduler = Scheduler::new(Arc::new(worker), SchedulerConfig::from(config));
        let outcome = scheduler.run(descriptors, &self.cancel).await?;
        report.record_pages(&outcome.results, &outcome.tolerated);
        report.retries = outcome.retries;
        self.check_cancel()?;

        let sidecar = config.sidecar.as_ref().map(|path| (path.clone(), sidecar_text(&outcome.results)));

        if config.output_type.writes_pdf() {
            let assembled = {
                let source = Arc::clone(&source);
                let metadata = config.metadata.clone();
                let results = outcome.results;
                blocking(move || Assembler::new(&source).with_metadata(metadata).assemble(&results)).await?
            };
            self.check_cancel()?;

            let optimizer = Optimizer::new(config.optimize).with_protected_pages(assembled.pass_through_pages.clone());
            let (optimized, optimization) = blocking(move || optimizer.optimize(&assembled.bytes)).await?;
            info!(saved_bytes = optimization.saved_bytes(), "optimization finished");
            report.optimization = Some(optimization);
            self.check_cancel()?;

            let final_bytes = match config.output_type.pdfa_part() {
                Some(part) => {
                    let candidate = work.join("assembled.pdf");
                    let converted = work.join("pdfa.pdf");
                    tokio::fs::write(&candidate, &optimized)
                        .await
                        .map_err(|e| OcrwerkError::file_access(&candidate, e))?;
                    let gate = ConformanceGate::new(
                        Arc::clone(&self.collaborators.converter),
                        self.collaborators.validators.clone(),
                        config.pdfa_timeout(),
                    )
                    .strict(config.pdfa_strict);
                    report.pdfa = Some(gate.run(&candidate, &converted, part).await?);
                    tokio::fs::read(&converted)
                        .await
                        .map_err(|e| OcrwerkError::file_access(&converted, e))?
                }
                None => optimized,
            };

            if let Some((path, text)) = sidecar {
                self.install(text.into_bytes(), &path).await?;
                report.sidecar = Some(path);
            }
            self.install(final_bytes, output).await?;
            report.output = Some(output.to_path_buf());
        } else if let Some((path, text)) = sidecar {
            self.install(text.into_bytes(), &path).await?;
            report.sidecar = Some(path);
        }
        Ok(())
    }

    fn temp_dir(&self, job_id: JobId) -> Result<TempDir, OcrwerkError> {
        let root = self.config.temp_root.clone().unwrap_or_else(std::env::temp_dir);
        tempfile::Builder::new()
            .prefix(&format!("ocrwerk-{job_id}-"))
            .tempdir_in(&root)
            .map_err(|e| OcrwerkError::file_access(root, e))
    }

    fn check_cancel(&self) -> Result<(), OcrwerkError> {
        if self.cancel.is_cancelled() {
            Err(OcrwerkError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Write `bytes` to a temporary file beside `target` and rename it into
    /// place.
    async fn install(&self, bytes: Vec<u8>, target: &Path) -> Result<(), OcrwerkError> {
        self.check_cancel()?;
        let target = target.to_path_buf();
        let cancel = self.cancel.clone();
        blocking(move || {
            let dir = parent_dir(&target);
            let mut partial = tempfile::Builder::new()
                .prefix(".ocrwerk-")
                .suffix(".partial")
                .tempfile_in(&dir)
                .map_err(|e| OcrwerkError::file_access(&dir, e))?;
            partial
                .write_all(&bytes)
                .and_then(|()| partial.as_file().sync_all())
                .map_err(|e| OcrwerkError::file_access(partial.path(), e))?;
            if cancel.is_cancelled() {
                return Err(OcrwerkError::Cancelled);
            }
            partial
                .persist(&target)
                .map_err(|e| OcrwerkError::file_access(&target, e.error))?;
            info!(path = %target.display(), "output written");
            Ok(())
        })
        .await
    }
}

/// Recognized text per page, pages separated by form feeds.
pub fn sidecar_text(results: &[PageResult]) -> String {
    let pages: Vec<String> = results
        .iter()
        .map(|r| {
            if r.decision.is_pass_through() {
                format!("[OCR skipped on page {}]\n", r.page)
            } else {
                let mut text = r.text.clone();
                if !text.ends_with('\n') {
                    text.push('\n');
                }
                text
            }
        })
        .collect();
    pages.join("\x0c")
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn check_output_dir(output: &Path) -> Result<(), OcrwerkError> {
    if output.as_os_str() == "-" {
        return Err(OcrwerkError::BadArgs("writing the output to standard output is not supported".into()));
    }
    let dir = parent_dir(output);
    if !dir.is_dir() {
        return Err(OcrwerkError::file_access(
            dir,
            std::io::Error::new(std::io::ErrorKind::NotFound, "output directory does not exist"),
        ));
    }
    Ok(())
}

async fn looks_like_image(input: &Path) -> Result<bool, OcrwerkError> {
    let mut file = tokio::fs::File::open(input)
        .await
        .map_err(|e| OcrwerkError::file_access(input, e))?;
    let mut head = [0u8; 16];
    let mut filled = 0;
    while filled < head.len() {
        let n = file
            .read(&mut head[filled..])
            .await
            .map_err(|e| OcrwerkError::file_access(input, e))?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(is_image(&head[..filled]))
}

async fn blocking<T, F>(work: F) -> Result<T, OcrwerkError>
where
    F: FnOnce() -> Result<T, OcrwerkError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| OcrwerkError::Other(format!("background task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use ocrwerk_core::{PageContent, PageDecision};

    #[test]
    fn sidecar_separates_pages_with_form_feeds() {
        let recognized = PageResult {
            text: "Hello world".into(),
            content: PageContent::Synthesized(Vec::new()),
            ..PageResult::pass_through(1, PageDecision::Recognized, Duration::ZERO)
        };
        let skipped = PageResult::pass_through(2, PageDecision::SkippedText, Duration::ZERO);
        assert_eq!(
            sidecar_text(&[recognized, skipped]),
            "Hello world\n\x0c[OCR skipped on page 2]\n"
        );
    }

    #[test]
    fn stdout_output_is_rejected() {
        assert!(matches!(check_output_dir(Path::new("-")), Err(OcrwerkError::BadArgs(_))));
        assert!(matches!(
            check_output_dir(Path::new("/no/such/dir/out.pdf")),
            Err(OcrwerkError::FileAccess { .. })
        ));
        assert!(check_output_dir(Path::new("out.pdf")).is_ok());
    }

    #[tokio::test]
    async fn image_inputs_are_recognized_by_content() {
        let dir = tempfile::tempdir().unwrap();
        let png = dir.path().join("scan.dat");
        image::RgbImage::new(4, 4).save_with_format(&png, image::ImageFormat::Png).unwrap();
        assert!(looks_like_image(&png).await.unwrap());

        let pdf = dir.path().join("doc.png");
        std::fs::write(&pdf, b"%PDF-1.7\n").unwrap();
        assert!(!looks_like_image(&pdf).await.unwrap());
    }
}
