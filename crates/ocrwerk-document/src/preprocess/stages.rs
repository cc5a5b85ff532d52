// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Preprocessing stages: background removal, deskew, speck cleaning,
// adaptive binarization and oversampling.

use image::{DynamicImage, GrayImage, Luma, RgbImage};
use imageproc::filter::median_filter;
use imageproc::region_labelling::{Connectivity, connected_components};
use tracing::{debug, instrument};

use super::{Stage, StageError};
use crate::image::processor::ImageProcessor;

fn ensure_non_empty(stage: &'static str, image: &DynamicImage) -> Result<(), StageError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(StageError::new(stage, "empty raster"));
    }
    Ok(())
}

// -- Background removal -------------------------------------------------------

/// Flattens uneven illumination by dividing every pixel by a large-radius
/// local mean of the luminance.
#[derive(Debug, Clone)]
pub struct RemoveBackground {
    /// Neighbourhood radius as a fraction of the longer raster side.
    pub radius_fraction: f64,
}

impl Default for RemoveBackground {
    fn default() -> Self {
        Self {
            radius_fraction: 1.0 / 24.0,
        }
    }
}

impl Stage for RemoveBackground {
    fn name(&self) -> &'static str {
        "remove-background"
    }

    fn alters_visible(&self) -> bool {
        true
    }

    #[instrument(skip_all, name = "remove_background")]
    fn apply(&self, image: DynamicImage) -> Result<DynamicImage, StageError> {
        ensure_non_empty(self.name(), &image)?;
        let gray = image.to_luma8();
        let (width, height) = gray.dimensions();
        let radius = ((width.max(height) as f64 * self.radius_fraction) as u32).max(4);
        let integral = compute_integral_image(&gray);

        let background = |x: u32, y: u32| region_mean(&integral, width, height, x, y, radius).max(1.0);
        let normalize = |value: u8, bg: f64| ((value as f64 * 255.0 / bg).round()).clamp(0.0, 255.0) as u8;

        let output = match image {
            DynamicImage::ImageLuma8(_) => DynamicImage::ImageLuma8(GrayImage::from_fn(width, height, |x, y| {
                Luma([normalize(gray.get_pixel(x, y).0[0], background(x, y))])
            })),
            other => {
                let rgb = other.to_rgb8();
                DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
                    let bg = background(x, y);
                    let [r, g, b] = rgb.get_pixel(x, y).0;
                    image::Rgb([normalize(r, bg), normalize(g, bg), normalize(b, bg)])
                }))
            }
        };
        debug!(radius, "Background flattened");
        Ok(output)
    }
}

// -- Deskew -------------------------------------------------------------------

/// Straightens a page by finding the rotation that makes text rows line
/// up with the pixel grid (horizontal projection profile with the highest
/// variance), then rotating by the opposite angle.
#[derive(Debug, Clone)]
pub struct Deskew {
    /// Largest skew searched for, in degrees.
    pub max_angle: f64,
    /// Skews smaller than this are left alone.
    pub min_angle: f64,
}

impl Default for Deskew {
    fn default() -> Self {
        Self {
            max_angle: 5.0,
            min_angle: 0.1,
        }
    }
}

impl Deskew {
    /// Estimated skew of the raster in degrees; positive means text rows
    /// descend to the right.
    pub fn estimate_angle(&self, image: &DynamicImage) -> f64 {
        let gray = downsample_for_analysis(&image.to_luma8(), 1000);
        let threshold = otsu_threshold(&gray);
        let dark: Vec<(f64, f64)> = gray
            .enumerate_pixels()
            .filter(|(_, _, p)| p.0[0] < threshold)
            .map(|(x, y, _)| (x as f64, y as f64))
            .collect();
        if dark.len() < 32 {
            return 0.0;
        }

        let score = |degrees: f64| profile_variance(&dark, gray.width(), gray.height(), degrees);
        let coarse = best_angle(-self.max_angle, self.max_angle, 0.5, score);
        best_angle(coarse - 0.5, coarse + 0.5, 0.05, score)
    }
}

impl Stage for Deskew {
    fn name(&self) -> &'static str {
        "deskew"
    }

    fn alters_visible(&self) -> bool {
        true
    }

    #[instrument(skip_all, name = "deskew")]
    fn apply(&self, image: DynamicImage) -> Result<DynamicImage, StageError> {
        ensure_non_empty(self.name(), &image)?;
        let angle = self.estimate_angle(&image);
        if angle.abs() < self.min_angle {
            debug!(angle, "Skew below threshold; leaving raster unchanged");
            return Ok(image);
        }
        debug!(angle, "Deskewing raster");
        Ok(ImageProcessor::from_dynamic(image).rotate(-angle as f32).into_dynamic())
    }
}

/// Scan `[from, to]` in `step` increments and return the angle with the
/// highest score (the first one on ties, so the result is deterministic).
fn best_angle(from: f64, to: f64, step: f64, score: impl Fn(f64) -> f64) -> f64 {
    let steps = ((to - from) / step).round() as i64;
    let mut best = (0.0, f64::MIN);
    for i in 0..=steps {
        let angle = from + i as f64 * step;
        let s = score(angle);
        if s > best.1 {
            best = (angle, s);
        }
    }
    best.0
}

/// Variance of the row histogram of dark pixels after shearing them by
/// `degrees`.
fn profile_variance(dark: &[(f64, f64)], width: u32, height: u32, degrees: f64) -> f64 {
    let tan = degrees.to_radians().tan();
    let offset = (width as f64 * tan.abs()).ceil() as usize;
    let mut rows = vec![0u32; height as usize + 2 * offset + 1];
    for &(x, y) in dark {
        let shifted = (y - x * tan).round() as i64 + offset as i64;
        if let Some(bin) = usize::try_from(shifted).ok().and_then(|i| rows.get_mut(i)) {
            *bin += 1;
        }
    }
    let n = rows.len() as f64;
    let mean = rows.iter().map(|&c| c as f64).sum::<f64>() / n;
    rows.iter().map(|&c| (c as f64 - mean).powi(2)).sum::<f64>() / n
}

fn downsample_for_analysis(gray: &GrayImage, max_side: u32) -> GrayImage {
    let longest = gray.width().max(gray.height());
    if longest <= max_side {
        return gray.clone();
    }
    let factor = max_side as f64 / longest as f64;
    image::imageops::resize(
        gray,
        ((gray.width() as f64 * factor) as u32).max(1),
        ((gray.height() as f64 * factor) as u32).max(1),
        image::imageops::FilterType::Triangle,
    )
}

// -- Clean --------------------------------------------------------------------

/// Removes scanner noise: a 3x3 median filter followed by erasing isolated
/// dark specks of a few pixels. Produces a grayscale raster.
#[derive(Debug, Clone, Default)]
pub struct Clean {
    /// Whether the cleaned raster also replaces the visible page image.
    pub visible: bool,
}

/// Connected dark regions up to this many pixels are treated as specks.
const MAX_SPECK_AREA: u32 = 4;

impl Stage for Clean {
    fn name(&self) -> &'static str {
        "clean"
    }

    fn alters_visible(&self) -> bool {
        self.visible
    }

    #[instrument(skip_all, name = "clean")]
    fn apply(&self, image: DynamicImage) -> Result<DynamicImage, StageError> {
        ensure_non_empty(self.name(), &image)?;
        let mut filtered = median_filter(&image.to_luma8(), 1, 1);
        let threshold = otsu_threshold(&filtered);

        let mask = GrayImage::from_fn(filtered.width(), filtered.height(), |x, y| {
            Luma([if filtered.get_pixel(x, y).0[0] < threshold { 0 } else { 255 }])
        });
        let labels = connected_components(&mask, Connectivity::Eight, Luma([255u8]));

        let max_label = labels.pixels().map(|p| p.0[0]).max().unwrap_or(0) as usize;
        let mut areas = vec![0u32; max_label + 1];
        for p in labels.pixels() {
            areas[p.0[0] as usize] += 1;
        }

        let mut removed = 0u32;
        for (x, y, label) in labels.enumerate_pixels() {
            let label = label.0[0] as usize;
            if label != 0 && areas[label] <= MAX_SPECK_AREA {
                filtered.put_pixel(x, y, Luma([255]));
                removed += 1;
            }
        }
        debug!(removed, "Specks removed");
        Ok(DynamicImage::ImageLuma8(filtered))
    }
}

// -- Threshold ----------------------------------------------------------------

/// Adaptive local-mean binarization.
///
/// For each pixel the threshold is the mean intensity within a
/// `block_radius` neighbourhood, minus a constant `c`. Pixels darker than
/// the local threshold become black; others become white.
#[derive(Debug, Clone)]
pub struct Threshold {
    pub block_radius: u32,
    pub c: i32,
}

impl Threshold {
    /// Neighbourhood scaled to the raster resolution (radius 15 at 300 dpi).
    pub fn for_dpi(dpi: u32) -> Self {
        Self {
            block_radius: (dpi / 20).max(4),
            c: 10,
        }
    }
}

impl Stage for Threshold {
    fn name(&self) -> &'static str {
        "threshold"
    }

    fn alters_visible(&self) -> bool {
        false
    }

    #[instrument(skip_all, name = "threshold", fields(block_radius = self.block_radius))]
    fn apply(&self, image: DynamicImage) -> Result<DynamicImage, StageError> {
        ensure_non_empty(self.name(), &image)?;
        let gray = image.to_luma8();
        let (width, height) = gray.dimensions();
        let integral = compute_integral_image(&gray);

        let output = GrayImage::from_fn(width, height, |x, y| {
            let local_mean = region_mean(&integral, width, height, x, y, self.block_radius);
            let threshold = (local_mean as i32 - self.c).clamp(0, 255) as u8;
            Luma([if gray.get_pixel(x, y).0[0] < threshold { 0u8 } else { 255u8 }])
        });
        Ok(DynamicImage::ImageLuma8(output))
    }
}

// -- Oversample ---------------------------------------------------------------

/// Upsamples a low-resolution raster so the OCR engine sees `to_dpi`.
#[derive(Debug, Clone)]
pub struct Oversample {
    pub from_dpi: u32,
    pub to_dpi: u32,
}

impl Stage for Oversample {
    fn name(&self) -> &'static str {
        "oversample"
    }

    fn changes_dimensions(&self) -> bool {
        true
    }

    fn alters_visible(&self) -> bool {
        false
    }

    fn output_dpi(&self, _input_dpi: u32) -> u32 {
        self.to_dpi
    }

    fn apply(&self, image: DynamicImage) -> Result<DynamicImage, StageError> {
        ensure_non_empty(self.name(), &image)?;
        if self.from_dpi == 0 {
            return Err(StageError::new(self.name(), "source resolution is zero"));
        }
        let factor = self.to_dpi as f64 / self.from_dpi as f64;
        Ok(ImageProcessor::from_dynamic(image).scale(factor).into_dynamic())
    }
}

// -- Integral image helpers ---------------------------------------------------

/// Compute the integral (summed-area table) of a grayscale image.
///
/// `integral[y * (width+1) + x]` contains the sum of all pixel values in the
/// rectangle [0, 0) to (x, y) (exclusive on both axes). The table has
/// dimensions `(width+1) x (height+1)` with a zero-padded border.
fn compute_integral_image(gray: &GrayImage) -> Vec<u64> {
    let (w, h) = gray.dimensions();
    let stride = (w + 1) as usize;
    let mut table = vec![0u64; stride * (h + 1) as usize];

    for y in 0..h {
        let mut row_sum: u64 = 0;
        for x in 0..w {
            row_sum += gray.get_pixel(x, y).0[0] as u64;
            let idx = (y + 1) as usize * stride + (x + 1) as usize;
            let above = y as usize * stride + (x + 1) as usize;
            table[idx] = row_sum + table[above];
        }
    }

    table
}

/// Mean pixel value within a square region centred on (cx, cy), clamped
/// to the image bounds.
fn region_mean(integral: &[u64], img_width: u32, img_height: u32, cx: u32, cy: u32, radius: u32) -> f64 {
    let stride = (img_width + 1) as usize;

    let x1 = cx.saturating_sub(radius) as usize;
    let y1 = cy.saturating_sub(radius) as usize;
    let x2 = ((cx + radius + 1) as usize).min(img_width as usize);
    let y2 = ((cy + radius + 1) as usize).min(img_height as usize);

    let area = ((x2 - x1) * (y2 - y1)) as f64;
    if area == 0.0 {
        return 128.0;
    }

    // S = I[y2][x2] - I[y1][x2] - I[y2][x1] + I[y1][x1]
    let sum = integral[y2 * stride + x2] as f64 - integral[y1 * stride + x2] as f64 - integral[y2 * stride + x1] as f64
        + integral[y1 * stride + x1] as f64;

    sum / area
}

/// Otsu threshold: the value that maximises the between-class variance of
/// the dark and light pixel groups.
pub(crate) fn otsu_threshold(gray: &GrayImage) -> u8 {
    let mut histogram = [0u64; 256];
    for pixel in gray.pixels() {
        histogram[pixel.0[0] as usize] += 1;
    }

    let total_pixels = gray.width() as u64 * gray.height() as u64;
    if total_pixels == 0 {
        return 128;
    }

    let sum_total: f64 = histogram.iter().enumerate().map(|(i, &c)| i as f64 * c as f64).sum();

    let mut sum_background: f64 = 0.0;
    let mut weight_background: u64 = 0;
    let mut max_variance: f64 = 0.0;
    let mut best_threshold: u8 = 0;

    for (t, &count) in histogram.iter().enumerate() {
        weight_background += count;
        if weight_background == 0 {
            continue;
        }
        let weight_foreground = total_pixels - weight_background;
        if weight_foreground == 0 {
            break;
        }

        sum_background += t as f64 * count as f64;
        let mean_background = sum_background / weight_background as f64;
        let mean_foreground = (sum_total - sum_background) / weight_foreground as f64;

        let between_variance =
            weight_background as f64 * weight_foreground as f64 * (mean_background - mean_foreground).powi(2);

        if between_variance > max_variance {
            max_variance = between_variance;
            // Pixels strictly below the threshold are dark.
            best_threshold = (t as u8).saturating_add(1);
        }
    }

    best_threshold
}
