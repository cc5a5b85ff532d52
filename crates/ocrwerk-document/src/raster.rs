// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Page rasterization: PDF page -> PNG file at a given resolution.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use ocrwerk_core::page::PageFailureKind;
use ocrwerk_core::types::ColorMode;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::process::{self, ProcessError};

/// Rasterization failure for one page.
#[derive(Debug, Error)]
pub enum RasterError {
    #[error("rasterizer '{0}' is not installed")]
    Missing(String),

    #[error("rasterizing timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("rasterizer failed: {0}")]
    Failed(String),

    #[error("rasterizer I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RasterError {
    pub fn kind(&self) -> PageFailureKind {
        match self {
            Self::Missing(_) => PageFailureKind::EngineMissing,
            Self::Timeout(_) => PageFailureKind::RasterTimeout,
            Self::Failed(_) => PageFailureKind::RasterFailed,
            Self::Io(_) => PageFailureKind::Io,
        }
    }
}

impl From<ProcessError> for RasterError {
    fn from(err: ProcessError) -> Self {
        match err {
            ProcessError::NotFound { program } => Self::Missing(program),
            ProcessError::Timeout { limit, .. } => Self::Timeout(limit),
            ProcessError::Io { source, .. } | ProcessError::Spawn { source, .. } => Self::Io(source),
            other => Self::Failed(other.to_string()),
        }
    }
}

/// What to render.
#[derive(Debug, Clone)]
pub struct RasterRequest<'a> {
    pub source: &'a Path,
    /// 1-based page number.
    pub page: u32,
    pub dpi: u32,
    pub color_mode: ColorMode,
    /// Directory the raster is written into; owned by the page's worker.
    pub output_dir: &'a Path,
    pub timeout: Duration,
}

impl RasterRequest<'_> {
    /// File stem used for this page's raster, named by page index.
    pub fn output_stem(&self) -> PathBuf {
        self.output_dir.join(format!("page-{:06}-raster", self.page))
    }
}

/// Renders single PDF pages to raster images.
#[async_trait]
pub trait Rasterizer: Send + Sync {
    fn name(&self) -> &str;

    /// Render the requested page and return the path of the PNG written.
    async fn rasterize(&self, request: &RasterRequest<'_>) -> Result<PathBuf, RasterError>;
}

/// Poppler's `pdftoppm`.
#[derive(Debug, Clone)]
pub struct PdftoppmRasterizer {
    program: String,
}

impl PdftoppmRasterizer {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn arguments(&self, request: &RasterRequest<'_>) -> Vec<String> {
        let page = request.page.to_string();
        let dpi = request.dpi.to_string();
        let mut args = vec![
            "-f".to_string(),
            page.clone(),
            "-l".to_string(),
            page,
            "-r".to_string(),
            dpi,
            "-png".to_string(),
            "-singlefile".to_string(),
        ];
        match request.color_mode {
            ColorMode::Bilevel => args.push("-mono".to_string()),
            ColorMode::Gray => args.push("-gray".to_string()),
            ColorMode::Color => {}
        }
        args.push(request.source.display().to_string());
        args.push(request.output_stem().display().to_string());
        args
    }
}

impl Default for PdftoppmRasterizer {
    fn default() -> Self {
        Self::new("pdftoppm")
    }
}

#[async_trait]
impl Rasterizer for PdftoppmRasterizer {
    fn name(&self) -> &str {
        &self.program
    }

    #[instrument(skip_all, fields(page = request.page, dpi = request.dpi))]
    async fn rasterize(&self, request: &RasterRequest<'_>) -> Result<PathBuf, RasterError> {
        let args = self.arguments(request);
        process::run(&self.program, &args, request.timeout).await?;

        let png = request.output_stem().with_extension("png");
        if !tokio::fs::try_exists(&png).await? {
            return Err(RasterError::Failed(format!(
                "{} produced no image for page {}",
                self.program, request.page
            )));
        }
        debug!(path = %png.display(), "Page rasterized");
        Ok(png)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request<'a>(source: &'a Path, dir: &'a Path, mode: ColorMode) -> RasterRequest<'a> {
        RasterRequest {
            source,
            page: 7,
            dpi: 300,
            color_mode: mode,
            output_dir: dir,
            timeout: Duration::from_secs(10),
        }
    }

    #[test]
    fn pdftoppm_arguments_select_single_page() {
        let src = Path::new("/in/doc.pdf");
        let dir = Path::new("/tmp/job");
        let args = PdftoppmRasterizer::default().arguments(&request(src, dir, ColorMode::Gray));
        assert_eq!(&args[..6], &["-f", "7", "-l", "7", "-r", "300"]);
        assert!(args.contains(&"-gray".to_string()));
        assert_eq!(args.last().unwrap(), "/tmp/job/page-000007-raster");
    }

    #[test]
    fn colour_mode_maps_to_flags() {
        let src = Path::new("a.pdf");
        let dir = Path::new("d");
        let mono = PdftoppmRasterizer::default().arguments(&request(src, dir, ColorMode::Bilevel));
        assert!(mono.contains(&"-mono".to_string()));
        let color = PdftoppmRasterizer::default().arguments(&request(src, dir, ColorMode::Color));
        assert!(!color.iter().any(|a| a == "-mono" || a == "-gray"));
    }

    #[test]
    fn process_errors_map_to_failure_kinds() {
        let timeout: RasterError = ProcessError::Timeout {
            program: "pdftoppm".into(),
            limit: Duration::from_secs(1),
        }
        .into();
        assert_eq!(timeout.kind(), PageFailureKind::RasterTimeout);
        let missing: RasterError = ProcessError::NotFound {
            program: "pdftoppm".into(),
        }
        .into();
        assert_eq!(missing.kind(), PageFailureKind::EngineMissing);
    }
}
