// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Image processor: rotate and scale page rasters.
// Operates on in-memory images using the `image` and `imageproc` crates.

use image::{DynamicImage, Luma, Rgb};
use imageproc::geometric_transformations::{self, Interpolation};
use tracing::{debug, instrument};

/// Chainable transformations on a single page raster.
///
/// Each method consumes `self` and returns a new `ImageProcessor`:
///
/// ```ignore
/// let upright = ImageProcessor::from_dynamic(raster)
///     .rotate_quarter(90)
///     .scale(2.0)
///     .into_dynamic();
/// ```
pub struct ImageProcessor {
    image: DynamicImage,
}

impl ImageProcessor {
    /// Wrap an already-decoded `DynamicImage`.
    pub fn from_dynamic(image: DynamicImage) -> Self {
        Self { image }
    }

    pub fn into_dynamic(self) -> DynamicImage {
        self.image
    }

    // -- Transformations ------------------------------------------------------

    /// Rotate by an arbitrary angle in degrees (clockwise) about the centre.
    ///
    /// The canvas keeps its size; uncovered corners are filled white. Gray
    /// rasters stay gray.
    #[instrument(skip(self), fields(degrees))]
    pub fn rotate(self, degrees: f32) -> Self {
        if degrees.abs() < 0.01 {
            return self;
        }
        let radians = degrees.to_radians();
        let image = match self.image {
            DynamicImage::ImageLuma8(gray) => DynamicImage::ImageLuma8(
                geometric_transformations::rotate_about_center(
                    &gray,
                    radians,
                    Interpolation::Bilinear,
                    Luma([255u8]),
                ),
            ),
            other => DynamicImage::ImageRgb8(geometric_transformations::rotate_about_center(
                &other.to_rgb8(),
                radians,
                Interpolation::Bilinear,
                Rgb([255u8, 255, 255]),
            )),
        };
        debug!("Rotation applied");
        Self { image }
    }

    /// Lossless rotation by a multiple of 90 degrees (clockwise).
    pub fn rotate_quarter(self, degrees: i32) -> Self {
        let image = match degrees.rem_euclid(360) {
            90 => self.image.rotate90(),
            180 => self.image.rotate180(),
            270 => self.image.rotate270(),
            _ => self.image,
        };
        Self { image }
    }

    /// Resample by `factor` in both directions (Catmull-Rom filter).
    pub fn scale(self, factor: f64) -> Self {
        if (factor - 1.0).abs() < 1e-6 {
            return self;
        }
        let width = ((self.image.width() as f64 * factor).round() as u32).max(1);
        let height = ((self.image.height() as f64 * factor).round() as u32).max(1);
        debug!(width, height, factor, "Resampling raster");
        let resized = self
            .image
            .resize_exact(width, height, image::imageops::FilterType::CatmullRom);
        Self { image: resized }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GrayImage;

    #[test]
    fn rotate_keeps_canvas_and_type() {
        let gray = DynamicImage::ImageLuma8(GrayImage::from_pixel(40, 20, Luma([0])));
        let rotated = ImageProcessor::from_dynamic(gray).rotate(3.0).into_dynamic();
        assert_eq!((rotated.width(), rotated.height()), (40, 20));
        assert!(matches!(rotated, DynamicImage::ImageLuma8(_)));
    }

    #[test]
    fn quarter_rotation_swaps_dimensions() {
        let img = DynamicImage::ImageLuma8(GrayImage::new(30, 10));
        let out = ImageProcessor::from_dynamic(img).rotate_quarter(270).into_dynamic();
        assert_eq!((out.width(), out.height()), (10, 30));
    }

    #[test]
    fn quarter_rotation_is_clockwise() {
        let mut img = GrayImage::from_pixel(3, 2, Luma([255]));
        img.put_pixel(0, 0, Luma([0]));
        let out = ImageProcessor::from_dynamic(DynamicImage::ImageLuma8(img))
            .rotate_quarter(90)
            .into_dynamic()
            .to_luma8();
        // Top-left moves to top-right.
        assert_eq!(out.get_pixel(1, 0).0[0], 0);
        assert_eq!(out.get_pixel(0, 0).0[0], 255);
    }

    #[test]
    fn scale_doubles_dimensions() {
        let img = DynamicImage::ImageLuma8(GrayImage::new(25, 10));
        let out = ImageProcessor::from_dynamic(img).scale(2.0).into_dynamic();
        assert_eq!((out.width(), out.height()), (50, 20));
    }
}
