// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Raster preprocessing chain.
//
// An ordered list of pure `raster -> raster` stages built from a page's
// preprocessing flags. Stages run in a fixed order: background removal,
// deskew, clean, threshold, oversample. The chain yields two rasters: the
// one handed to the OCR engine and the one that becomes the visible page
// image.

pub mod stages;

use image::DynamicImage;
use ocrwerk_core::page::PreprocessFlags;
use thiserror::Error;
use tracing::{debug, warn};

pub use stages::{Clean, Deskew, Oversample, RemoveBackground, Threshold};

/// A preprocessing stage failed on a particular raster.
#[derive(Debug, Clone, Error)]
#[error("preprocessing stage '{stage}' failed: {detail}")]
pub struct StageError {
    pub stage: &'static str,
    pub detail: String,
}

impl StageError {
    pub fn new(stage: &'static str, detail: impl Into<String>) -> Self {
        Self {
            stage,
            detail: detail.into(),
        }
    }
}

/// One deterministic raster transform.
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether the output may differ in pixel dimensions from the input.
    fn changes_dimensions(&self) -> bool {
        false
    }

    /// Whether the stage's output also becomes the visible page image.
    fn alters_visible(&self) -> bool;

    /// Resolution of the output raster given the input resolution.
    fn output_dpi(&self, input_dpi: u32) -> u32 {
        input_dpi
    }

    fn apply(&self, image: DynamicImage) -> Result<DynamicImage, StageError>;
}

/// Rasters produced by running the chain over one page.
#[derive(Debug, Clone)]
pub struct PreparedRaster {
    /// Raster to recognize.
    pub ocr_image: DynamicImage,
    /// Raster to place on the output page.
    pub visible_image: DynamicImage,
    /// Resolution of `ocr_image`.
    pub ocr_dpi: u32,
    /// Stages skipped after a failure, one note each.
    pub notes: Vec<String>,
}

/// Ordered preprocessing stages for one page.
pub struct PreprocessChain {
    stages: Vec<Box<dyn Stage>>,
    strict: bool,
}

impl PreprocessChain {
    /// Build the chain requested by `flags` for a raster rendered at
    /// `raster_dpi`.
    pub fn from_flags(flags: &PreprocessFlags, raster_dpi: u32) -> Self {
        let mut stages: Vec<Box<dyn Stage>> = Vec::new();
        if flags.remove_background {
            stages.push(Box::new(RemoveBackground::default()));
        }
        if flags.deskew {
            stages.push(Box::new(Deskew::default()));
        }
        if flags.clean {
            stages.push(Box::new(Clean {
                visible: flags.clean_final,
            }));
        }
        if flags.threshold {
            stages.push(Box::new(Threshold::for_dpi(raster_dpi)));
        }
        if let Some(target) = flags.oversample_dpi
            && target > raster_dpi
        {
            stages.push(Box::new(Oversample {
                from_dpi: raster_dpi,
                to_dpi: target,
            }));
        }
        Self {
            stages,
            strict: flags.strict,
        }
    }

    /// A chain with explicitly supplied stages, run in the given order.
    pub fn with_stages(stages: Vec<Box<dyn Stage>>, strict: bool) -> Self {
        Self { stages, strict }
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run every stage over `image`.
    ///
    /// A failing stage is skipped with a warning (its input passes on
    /// unchanged) unless the chain is strict, in which case the error is
    /// returned.
    pub fn run(&self, image: DynamicImage, raster_dpi: u32) -> Result<PreparedRaster, StageError> {
        let mut visible = image.clone();
        let mut current = image;
        let mut dpi = raster_dpi;
        let mut notes = Vec::new();

        for stage in &self.stages {
            let (width, height) = (current.width(), current.height());
            let outcome = stage.apply(current.clone()).and_then(|output| {
                if !stage.changes_dimensions() && (output.width(), output.height()) != (width, height) {
                    Err(StageError::new(stage.name(), "stage changed raster dimensions"))
                } else {
                    Ok(output)
                }
            });
            match outcome {
                Ok(output) => {
                    debug!(stage = stage.name(), "Preprocessing stage applied");
                    dpi = stage.output_dpi(dpi);
                    current = output;
                    if stage.alters_visible() {
                        visible = current.clone();
                    }
                }
                Err(err) if self.strict => return Err(err),
                Err(err) => {
                    warn!(stage = stage.name(), error = %err, "Preprocessing stage failed; skipping");
                    notes.push(format!("{} skipped: {}", stage.name(), err.detail));
                }
            }
        }

        Ok(PreparedRaster {
            ocr_image: current,
            visible_image: visible,
            ocr_dpi: dpi,
            notes,
        })
    }
}
