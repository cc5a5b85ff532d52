// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// In-process OCR backed by the `ocrs` crate, a pure-Rust engine running
// neural network models through `rten`.
//
// # Model Setup
//
// The engine needs two model files in one directory:
//
// - `text-detection.rten` locates words in the image.
// - `text-recognition.rten` decodes characters from detected lines.
//
// Running `ocrs-cli` once downloads both to `$XDG_CACHE_HOME/ocrs`
// (typically `~/.cache/ocrs`), which is the default directory.
//
// The models are English-only and cannot detect orientation, so
// [`OcrsEngine::languages`] reports `eng` and orientation is always upright.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use ocrs::{ImageSource, OcrEngine as OcrsInner, OcrEngineParams, TextItem};
use rten::Model;
use tracing::{debug, info, instrument};

use super::{BBox, LineKey, OcrEngine, OcrError, OcrRequest, Orientation, TextPage, Word};

const DETECTION_MODEL_FILENAME: &str = "text-detection.rten";
const RECOGNITION_MODEL_FILENAME: &str = "text-recognition.rten";

/// `$XDG_CACHE_HOME/ocrs`, falling back to `~/.cache/ocrs`.
pub fn default_model_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CACHE_HOME") {
        PathBuf::from(xdg).join("ocrs")
    } else if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join(".cache").join("ocrs")
    } else {
        PathBuf::from("ocrs-models")
    }
}

/// Whether both model files are present in `dir`.
pub fn models_available(dir: &Path) -> bool {
    dir.join(DETECTION_MODEL_FILENAME).exists() && dir.join(RECOGNITION_MODEL_FILENAME).exists()
}

/// OCR engine that keeps the loaded models for the lifetime of a job.
#[derive(Clone)]
pub struct OcrsEngine {
    engine: Arc<OcrsInner>,
}

impl std::fmt::Debug for OcrsEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OcrsEngine").finish_non_exhaustive()
    }
}

impl OcrsEngine {
    /// Load both models from `dir`.
    ///
    /// Model loading is the expensive step; build one engine per job and
    /// share it across workers. The `ocrs` and `rten` crates are very slow
    /// in debug builds.
    #[instrument(skip_all, fields(dir = %dir.as_ref().display()))]
    pub fn from_model_dir(dir: impl AsRef<Path>) -> Result<Self, OcrError> {
        let dir = dir.as_ref();
        let detection_path = dir.join(DETECTION_MODEL_FILENAME);
        let recognition_path = dir.join(RECOGNITION_MODEL_FILENAME);
        for path in [&detection_path, &recognition_path] {
            if !path.exists() {
                return Err(OcrError::EngineMissing(format!(
                    "ocrs (model not found at {}; run `ocrs-cli` once to download models)",
                    path.display()
                )));
            }
        }

        info!("Loading OCR detection model");
        let detection_model = Model::load_file(&detection_path).map_err(|err| {
            OcrError::EngineCrashed(format!(
                "failed to load detection model from {}: {err}",
                detection_path.display()
            ))
        })?;

        info!("Loading OCR recognition model");
        let recognition_model = Model::load_file(&recognition_path).map_err(|err| {
            OcrError::EngineCrashed(format!(
                "failed to load recognition model from {}: {err}",
                recognition_path.display()
            ))
        })?;

        let engine = OcrsInner::new(OcrEngineParams {
            detection_model: Some(detection_model),
            recognition_model: Some(recognition_model),
            ..Default::default()
        })
        .map_err(|err| OcrError::EngineCrashed(format!("failed to initialise ocrs: {err}")))?;

        Ok(Self {
            engine: Arc::new(engine),
        })
    }

    pub fn with_defaults() -> Result<Self, OcrError> {
        Self::from_model_dir(default_model_dir())
    }
}

/// Detect words, group them into lines and recognize each line.
fn recognize_blocking(engine: &OcrsInner, path: &Path) -> Result<TextPage, OcrError> {
    let rgb = image::open(path)
        .map_err(|err| OcrError::InvalidOutput(format!("cannot read raster {}: {err}", path.display())))?
        .to_rgb8();
    let (width, height) = rgb.dimensions();

    let source = ImageSource::from_bytes(rgb.as_raw(), (width, height))
        .map_err(|err| OcrError::EngineCrashed(format!("image source ({width}x{height}): {err}")))?;
    let input = engine
        .prepare_input(source)
        .map_err(|err| OcrError::EngineCrashed(format!("preprocessing failed: {err}")))?;

    let word_rects = engine
        .detect_words(&input)
        .map_err(|err| OcrError::EngineCrashed(format!("word detection failed: {err}")))?;
    let line_rects = engine.find_text_lines(&input, &word_rects);
    let lines = engine
        .recognize_text(&input, &line_rects)
        .map_err(|err| OcrError::EngineCrashed(format!("line recognition failed: {err}")))?;

    let mut page = TextPage::empty(width, height);
    for (index, line) in lines.iter().flatten().enumerate() {
        let key = LineKey {
            block: 1,
            paragraph: 1,
            line: index as u32 + 1,
        };
        for word in line.words() {
            let text = word.to_string();
            if text.trim().is_empty() {
                continue;
            }
            let rect = word.bounding_rect();
            let left = (rect.left() as f32).max(0.0);
            let top = (rect.top() as f32).max(0.0);
            page.words.push(Word {
                text: text.trim().to_string(),
                bbox: BBox {
                    left: left as u32,
                    top: top as u32,
                    width: (rect.width() as f32).max(1.0) as u32,
                    height: (rect.height() as f32).max(1.0) as u32,
                },
                confidence: -1.0,
                line: key,
            });
        }
    }
    Ok(page)
}

#[async_trait]
impl OcrEngine for OcrsEngine {
    fn name(&self) -> &str {
        "ocrs"
    }

    #[instrument(skip_all, fields(page = request.page))]
    async fn recognize(&self, request: &OcrRequest<'_>) -> Result<TextPage, OcrError> {
        let engine = Arc::clone(&self.engine);
        let path = request.image.to_path_buf();
        let handle = tokio::task::spawn_blocking(move || recognize_blocking(&engine, &path));

        let page = match tokio::time::timeout(request.timeout, handle).await {
            Ok(Ok(result)) => result?,
            Ok(Err(join)) => return Err(OcrError::EngineCrashed(format!("OCR task panicked: {join}"))),
            // The blocking task cannot be interrupted; its result is discarded.
            Err(_) => return Err(OcrError::Timeout(request.timeout)),
        };
        debug!(words = page.word_count(), "ocrs finished");
        Ok(page)
    }

    async fn detect_orientation(&self, _request: &OcrRequest<'_>) -> Result<Orientation, OcrError> {
        Ok(Orientation::upright())
    }

    async fn languages(&self) -> Result<Vec<String>, OcrError> {
        Ok(vec!["eng".to_string()])
    }
}
