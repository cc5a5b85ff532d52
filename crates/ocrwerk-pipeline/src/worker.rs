// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Page worker: turns one page descriptor into one page result.
//
// Decide -> rasterize -> preprocess -> (orientation) -> recognize -> synthesize.
// Pages that need no OCR are passed through before anything is rendered.
// The worker owns a private directory under the job's temp dir and checks
// the cancel flag between steps.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat};
use ocrwerk_core::{
    JobConfig, PageContent, PageDecision, PageFailure, PageFailureKind, PageResult, PageUnitDescriptor, PreprocessFlags,
    TextPolicy,
};
use ocrwerk_document::ocr::Orientation;
use ocrwerk_document::pdf::{PageFrame, PageInfo, SynthesisInput, render_overlay, synthesize_page};
use ocrwerk_document::preprocess::PreparedRaster;
use ocrwerk_document::{ImageProcessor, OcrEngine, OcrError, OcrRequest, PreprocessChain, RasterRequest, Rasterizer};
use tracing::{debug, warn};

use crate::cancel::CancelFlag;

/// Processes single pages. The scheduler is generic over this so it can be
/// driven without external programs.
#[async_trait]
pub trait PageProcessor: Send + Sync {
    /// Run page work for `descriptor`. `attempt` counts from 0 and grows
    /// with each retry of the same page.
    async fn process(
        &self,
        descriptor: &PageUnitDescriptor,
        attempt: u32,
        cancel: &CancelFlag,
    ) -> Result<PageResult, PageFailure>;
}

/// The slice of job configuration page workers look at.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerSettings {
    pub text_policy: TextPolicy,
    pub default_dpi: u32,
    pub rotate_pages: bool,
    pub rotate_pages_threshold: f32,
    pub skip_big_mpixels: Option<f64>,
    pub raster_timeout: Duration,
    pub ocr_timeout: Duration,
    pub io_timeout: Duration,
    pub keep_temporary_files: bool,
}

impl From<&JobConfig> for WorkerSettings {
    fn from(config: &JobConfig) -> Self {
        Self {
            text_policy: config.text_policy,
            default_dpi: config.default_dpi,
            rotate_pages: config.rotate_pages,
            rotate_pages_threshold: config.rotate_pages_threshold,
            skip_big_mpixels: config.skip_big_mpixels,
            raster_timeout: config.rasterizer_timeout(),
            ocr_timeout: config.tesseract_timeout(),
            io_timeout: config.io_timeout(),
            keep_temporary_files: config.keep_temporary_files,
        }
    }
}

/// Why a page needs no OCR, if it doesn't.
pub fn pass_through_decision(descriptor: &PageUnitDescriptor, settings: &WorkerSettings) -> Option<PageDecision> {
    if !descriptor.is_selected() {
        return Some(PageDecision::NotSelected);
    }
    let has_text = descriptor.has_text();
    let skip_text = match settings.text_policy {
        TextPolicy::Default | TextPolicy::SkipText => has_text,
        TextPolicy::ForceOcr => false,
        // Only a previous OCR layer is replaced; visible text stays as it is.
        TextPolicy::RedoOcr => has_text && !descriptor.has_invisible_text(),
    };
    if skip_text {
        return Some(PageDecision::SkippedText);
    }
    if let Some(limit) = settings.skip_big_mpixels
        && descriptor.megapixels(descriptor.effective_dpi(settings.default_dpi)) > limit
    {
        return Some(PageDecision::SkippedBig);
    }
    None
}

/// The production page processor.
pub struct PageWorker {
    source: PathBuf,
    pages: Arc<[PageInfo]>,
    work_dir: PathBuf,
    rasterizer: Arc<dyn Rasterizer>,
    engine: Arc<dyn OcrEngine>,
    settings: WorkerSettings,
}

impl PageWorker {
    /// `source` is the PDF being rasterized, `pages` its inspected pages and
    /// `work_dir` the job's temporary directory.
    pub fn new(
        source: impl Into<PathBuf>,
        pages: Arc<[PageInfo]>,
        work_dir: impl Into<PathBuf>,
        rasterizer: Arc<dyn Rasterizer>,
        engine: Arc<dyn OcrEngine>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            source: source.into(),
            pages,
            work_dir: work_dir.into(),
            rasterizer,
            engine,
            settings,
        }
    }

    async fn recognize(
        &self,
        descriptor: &PageUnitDescriptor,
        dir: &Path,
        cancel: &CancelFlag,
        started: Instant,
    ) -> Result<PageResult, PageFailure> {
        let page = descriptor.index();
        let dpi = descriptor.base_dpi(self.settings.default_dpi);

        debug!(page, dpi, rasterizer = self.rasterizer.name(), "rasterizing");
        let raster = self
            .rasterizer
            .rasterize(&RasterRequest {
                source: &self.source,
                page,
                dpi,
                color_mode: descriptor.color_mode(),
                output_dir: dir,
                timeout: self.settings.raster_timeout,
            })
            .await
            .map_err(|err| PageFailure::new(page, err.kind(), err.to_string()))?;
        cancel.check(page)?;

        debug!(page, "preprocessing");
        let ocr_path = dir.join(format!("page-{page:06}-ocr.png"));
        let prepared = {
            let flags = descriptor.flags().clone();
            let ocr_path = ocr_path.clone();
            blocking(page, move || prepare(page, &raster, &flags, dpi, &ocr_path)).await?
        };
        let PreparedRaster {
            ocr_image,
            visible_image,
            ocr_dpi,
            mut notes,
        } = prepared;
        cancel.check(page)?;

        let mut size = (ocr_image.width(), ocr_image.height());
        let mut correction = 0;
        if self.settings.rotate_pages {
            debug!(page, "detecting orientation");
            let request = self.ocr_request(descriptor, &ocr_path, size, ocr_dpi);
            match self.bounded(page, self.engine.detect_orientation(&request)).await {
                Ok(Orientation { rotate, confidence }) if rotate.rem_euclid(360) != 0 => {
                    if confidence >= self.settings.rotate_pages_threshold {
                        correction = rotate.rem_euclid(360);
                        notes.push(format!("rotated {correction} degrees (confidence {confidence:.1})"));
                    } else {
                        notes.push(format!(
                            "orientation {rotate} degrees not applied (confidence {confidence:.1} below threshold)"
                        ));
                    }
                }
                Ok(_) => {}
                Err(failure) if matches!(failure.kind, PageFailureKind::EngineMissing | PageFailureKind::Cancelled) => {
                    return Err(failure);
                }
                Err(failure) => {
                    warn!(page, error = %failure, "orientation detection failed; keeping page as is");
                    notes.push(format!("orientation detection failed: {}", failure.detail));
                }
            }
            if correction != 0 {
                let path = ocr_path.clone();
                size = blocking(page, move || {
                    let upright = ImageProcessor::from_dynamic(ocr_image).rotate_quarter(correction).into_dynamic();
                    save_png(page, &upright, &path)?;
                    Ok((upright.width(), upright.height()))
                })
                .await?;
            }
            cancel.check(page)?;
        }

        debug!(page, engine = self.engine.name(), ocr_dpi, "recognizing");
        let request = self.ocr_request(descriptor, &ocr_path, size, ocr_dpi);
        let text = self.bounded(page, self.engine.recognize(&request)).await?;
        cancel.check(page)?;

        debug!(page, words = text.word_count(), "synthesizing");
        let redo = self.settings.text_policy == TextPolicy::RedoOcr && descriptor.has_invisible_text();
        let (content, decision, text) = if redo {
            let info = self
                .pages
                .iter()
                .find(|p| p.index == page)
                .ok_or_else(|| PageFailure::new(page, PageFailureKind::SynthesisFailed, "page missing from source"))?;
            let frame = PageFrame {
                media_box: info.media_box,
                rotation: (info.rotation + correction).rem_euclid(360),
            };
            blocking(page, move || {
                let overlay = render_overlay(&text, &frame)
                    .map_err(|err| PageFailure::new(page, err.kind(), err.to_string()))?;
                Ok((PageContent::Overlay(overlay), PageDecision::Replaced, text))
            })
            .await?
        } else {
            let page_size = (descriptor.width_pt(), descriptor.height_pt());
            blocking(page, move || {
                let pdf = synthesize_page(&SynthesisInput {
                    visible: &visible_image,
                    text: &text,
                    page_size,
                    correction,
                })
                .map_err(|err| PageFailure::new(page, err.kind(), err.to_string()))?;
                Ok((PageContent::Synthesized(pdf), PageDecision::Recognized, text))
            })
            .await?
        };

        Ok(PageResult {
            page,
            content,
            decision,
            word_count: text.word_count(),
            mean_confidence: text.mean_confidence(),
            text: text.plain_text(),
            notes,
            elapsed: started.elapsed(),
            dpi_used: Some(ocr_dpi),
            orientation_correction: correction,
        })
    }

    fn ocr_request<'a>(
        &self,
        descriptor: &'a PageUnitDescriptor,
        image: &'a Path,
        (width, height): (u32, u32),
        dpi: u32,
    ) -> OcrRequest<'a> {
        OcrRequest {
            image,
            width,
            height,
            dpi,
            languages: descriptor.languages(),
            timeout: self.settings.ocr_timeout,
            page: descriptor.index(),
        }
    }

    /// Run an engine call under the OCR time limit. Engines enforce the
    /// limit themselves; this bounds engines that don't.
    async fn bounded<T>(
        &self,
        page: u32,
        call: impl Future<Output = Result<T, OcrError>>,
    ) -> Result<T, PageFailure> {
        let limit = self.settings.ocr_timeout;
        match tokio::time::timeout(limit, call).await {
            Ok(result) => result.map_err(|err| PageFailure::new(page, err.kind(), err.to_string())),
            Err(_) => Err(PageFailure::new(
                page,
                PageFailureKind::OcrTimeout,
                format!("OCR timed out after {}s", limit.as_secs_f64()),
            )),
        }
    }

    async fn io<T>(&self, page: u32, op: impl Future<Output = std::io::Result<T>>) -> Result<T, PageFailure> {
        let limit = self.settings.io_timeout;
        match tokio::time::timeout(limit, op).await {
            Ok(result) => result.map_err(|err| PageFailure::new(page, PageFailureKind::Io, err.to_string())),
            Err(_) => Err(PageFailure::new(
                page,
                PageFailureKind::Io,
                format!("temporary file operation timed out after {}s", limit.as_secs_f64()),
            )),
        }
    }
}

#[async_trait]
impl PageProcessor for PageWorker {
    async fn process(
        &self,
        descriptor: &PageUnitDescriptor,
        attempt: u32,
        cancel: &CancelFlag,
    ) -> Result<PageResult, PageFailure> {
        let started = Instant::now();
        let page = descriptor.index();
        cancel.check(page)?;

        if let Some(decision) = pass_through_decision(descriptor, &self.settings) {
            debug!(page, ?decision, "page passed through");
            return Ok(PageResult::pass_through(page, decision, started.elapsed()));
        }

        let dir = self.work_dir.join(format!("page-{page:06}-{attempt}"));
        self.io(page, tokio::fs::create_dir_all(&dir)).await?;
        let result = self.recognize(descriptor, &dir, cancel, started).await;
        if !self.settings.keep_temporary_files
            && let Err(err) = tokio::fs::remove_dir_all(&dir).await
        {
            debug!(page, error = %err, "could not remove page directory");
        }
        match &result {
            Ok(done) => debug!(page, decision = ?done.decision, elapsed_ms = done.elapsed.as_millis() as u64, "page done"),
            Err(failure) => debug!(page, kind = %failure.kind, "page failed"),
        }
        result
    }
}

/// Load the raster, run the preprocessing chain and write the OCR image.
fn prepare(
    page: u32,
    raster: &Path,
    flags: &PreprocessFlags,
    dpi: u32,
    ocr_path: &Path,
) -> Result<PreparedRaster, PageFailure> {
    let image = image::open(raster)
        .map_err(|err| PageFailure::new(page, PageFailureKind::RasterFailed, format!("unreadable raster: {err}")))?;
    let prepared = PreprocessChain::from_flags(flags, dpi)
        .run(image, dpi)
        .map_err(|err| PageFailure::new(page, PageFailureKind::PreprocessFailed, err.to_string()))?;
    save_png(page, &prepared.ocr_image, ocr_path)?;
    Ok(prepared)
}

fn save_png(page: u32, image: &DynamicImage, path: &Path) -> Result<(), PageFailure> {
    image
        .save_with_format(path, ImageFormat::Png)
        .map_err(|err| PageFailure::new(page, PageFailureKind::Io, format!("cannot write {}: {err}", path.display())))
}

/// CPU-bound page work off the async runtime.
async fn blocking<T, F>(page: u32, work: F) -> Result<T, PageFailure>
where
    F: FnOnce() -> Result<T, PageFailure> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work).await.map_err(|err| {
        PageFailure::new(page, PageFailureKind::SynthesisFailed, format!("page task panicked: {err}"))
            .with_retryable(false)
    })?
}
