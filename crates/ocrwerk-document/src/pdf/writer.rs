// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Image input: wrap a single raster image into a one-page PDF with
// `printpdf` 0.8, so image files go through the same pipeline as PDFs.
//
// printpdf 0.8 uses a data-oriented API: documents are built by constructing
// `PdfPage` structs containing `Vec<Op>` operation lists, then serialised via
// `PdfDocument::save()`.

use std::path::Path;

use ocrwerk_core::error::OcrwerkError;
use printpdf::{
    Mm, Op, PdfDocument, PdfPage, PdfSaveOptions, PdfWarnMsg, Pt, RawImage, RawImageData, RawImageFormat,
    XObjectTransform,
};
use tracing::{debug, info, instrument, warn};

/// Resolutions below this are treated as "aspect ratio only" and ignored.
const MIN_PLAUSIBLE_DPI: f64 = 10.0;

/// Creates one-page PDFs from raster images, sized by the image resolution.
#[derive(Debug, Clone, Default)]
pub struct ImagePdfWriter {
    /// Resolution to assume when the image carries none (or to override it).
    dpi_override: Option<u32>,
    title: Option<String>,
}

impl ImagePdfWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `dpi` instead of the resolution stored in the image.
    pub fn with_dpi(mut self, dpi: Option<u32>) -> Self {
        self.dpi_override = dpi;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Create a single-page PDF whose page is exactly the image at its
    /// resolution.
    #[instrument(skip(self, image_bytes), fields(bytes_len = image_bytes.len()))]
    pub fn create_from_image(&self, image_bytes: &[u8]) -> Result<Vec<u8>, OcrwerkError> {
        let dpi = match self.dpi_override.map(f64::from).or_else(|| embedded_dpi(image_bytes)) {
            Some(dpi) => dpi,
            None => {
                return Err(OcrwerkError::BadArgs(
                    "the input image does not record its resolution; pass --image-dpi".into(),
                ));
            }
        };

        let dynamic_image = ::image::load_from_memory(image_bytes)
            .map_err(|err| OcrwerkError::Input(format!("failed to decode input image: {err}")))?;
        let width = dynamic_image.width() as usize;
        let height = dynamic_image.height() as usize;

        let (pixels, data_format) = match dynamic_image.color() {
            ::image::ColorType::L8 | ::image::ColorType::L16 | ::image::ColorType::La8 | ::image::ColorType::La16 => {
                (dynamic_image.to_luma8().into_raw(), RawImageFormat::R8)
            }
            _ => (dynamic_image.to_rgb8().into_raw(), RawImageFormat::RGB8),
        };
        let raw = RawImage {
            pixels: RawImageData::U8(pixels),
            width,
            height,
            data_format,
            tag: Vec::new(),
        };

        let title = self.title.as_deref().unwrap_or("Scanned image");
        let mut doc = PdfDocument::new(title);
        let xobject_id = doc.add_image(&raw);

        let page_w = Mm((width as f64 / dpi * 25.4) as f32);
        let page_h = Mm((height as f64 / dpi * 25.4) as f32);
        info!(width, height, dpi, "Creating PDF from image");

        let ops = vec![Op::UseXobject {
            id: xobject_id,
            transform: XObjectTransform {
                translate_x: Some(Pt(0.0)),
                translate_y: Some(Pt(0.0)),
                scale_x: None,
                scale_y: None,
                dpi: Some(dpi as f32),
                rotate: None,
            },
        }];
        let page = PdfPage::new(page_w, page_h, ops);
        doc.with_pages(vec![page]);

        let mut warnings: Vec<PdfWarnMsg> = Vec::new();
        let output = doc.save(&PdfSaveOptions::default(), &mut warnings);
        if !warnings.is_empty() {
            warn!(count = warnings.len(), "printpdf reported warnings");
        }
        debug!(output_bytes = output.len(), "Image PDF created");
        Ok(output)
    }

    /// Convert the image at `input` and write the PDF to `output`.
    pub fn convert_file(&self, input: impl AsRef<Path>, output: impl AsRef<Path>) -> Result<(), OcrwerkError> {
        let input = input.as_ref();
        let output = output.as_ref();
        let bytes = std::fs::read(input).map_err(|e| OcrwerkError::file_access(input, e))?;
        let pdf = self.create_from_image(&bytes)?;
        std::fs::write(output, &pdf).map_err(|e| OcrwerkError::file_access(output, e))?;
        info!("Wrote image PDF to {}", output.display());
        Ok(())
    }
}

/// Whether `bytes` look like an image format we accept as input.
pub fn is_image(bytes: &[u8]) -> bool {
    matches!(
        ::image::guess_format(bytes),
        Ok(::image::ImageFormat::Png | ::image::ImageFormat::Jpeg | ::image::ImageFormat::Tiff)
    )
}

/// Resolution recorded in a PNG `pHYs` chunk or a JPEG JFIF header.
pub fn embedded_dpi(bytes: &[u8]) -> Option<f64> {
    let dpi = png_dpi(bytes).or_else(|| jfif_dpi(bytes))?;
    (dpi >= MIN_PLAUSIBLE_DPI).then_some(dpi)
}

fn png_dpi(bytes: &[u8]) -> Option<f64> {
    const SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";
    let mut rest = bytes.strip_prefix(SIGNATURE)?;
    while rest.len() >= 12 {
        let length = u32::from_be_bytes(rest[0..4].try_into().ok()?) as usize;
        let kind = &rest[4..8];
        let data = rest.get(8..8 + length)?;
        match kind {
            b"pHYs" if length >= 9 => {
                let x = u32::from_be_bytes(data[0..4].try_into().ok()?);
                let unit = data[8];
                return (unit == 1).then(|| f64::from(x) * 0.0254);
            }
            b"IDAT" | b"IEND" => return None,
            _ => {}
        }
        rest = rest.get(12 + length..)?;
    }
    None
}

fn jfif_dpi(bytes: &[u8]) -> Option<f64> {
    let rest = bytes.strip_prefix(&[0xFF, 0xD8, 0xFF, 0xE0])?;
    let segment = rest.get(2..14)?;
    if &segment[0..5] != b"JFIF\0" {
        return None;
    }
    let units = segment[7];
    let x = f64::from(u16::from_be_bytes([segment[8], segment[9]]));
    match units {
        1 => Some(x),
        2 => Some(x * 2.54),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, GrayImage, ImageFormat, Luma};
    use std::io::Cursor;

    fn png_with_phys(dpi: u32) -> Vec<u8> {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(300, 150, Luma([200])));
        let mut plain = Vec::new();
        img.write_to(&mut Cursor::new(&mut plain), ImageFormat::Png).unwrap();

        // Splice a pHYs chunk in right after IHDR (8 + 25 bytes).
        let ppm = (dpi as f64 / 0.0254).round() as u32;
        let mut data = Vec::new();
        data.extend_from_slice(&ppm.to_be_bytes());
        data.extend_from_slice(&ppm.to_be_bytes());
        data.push(1);
        let mut chunk = Vec::new();
        chunk.extend_from_slice(&(data.len() as u32).to_be_bytes());
        chunk.extend_from_slice(b"pHYs");
        chunk.extend_from_slice(&data);
        let mut crc = flate2::Crc::new();
        crc.update(b"pHYs");
        crc.update(&data);
        chunk.extend_from_slice(&crc.sum().to_be_bytes());
        let mut out = plain[..33].to_vec();
        out.extend_from_slice(&chunk);
        out.extend_from_slice(&plain[33..]);
        out
    }

    #[test]
    fn reads_png_resolution() {
        let dpi = embedded_dpi(&png_with_phys(300)).unwrap();
        assert!((dpi - 300.0).abs() < 0.5);
    }

    #[test]
    fn reads_jfif_resolution() {
        let mut header = vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10];
        header.extend_from_slice(b"JFIF\0");
        header.extend_from_slice(&[1, 1, 1, 0x00, 0xC8, 0x00, 0xC8, 0, 0]);
        assert_eq!(embedded_dpi(&header), Some(200.0));
    }

    #[test]
    fn missing_resolution_needs_override() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(30, 30, Luma([0])));
        let mut png = Vec::new();
        img.write_to(&mut Cursor::new(&mut png), ImageFormat::Png).unwrap();

        let err = ImagePdfWriter::new().create_from_image(&png).unwrap_err();
        assert!(matches!(err, OcrwerkError::BadArgs(_)));
        assert!(ImagePdfWriter::new().with_dpi(Some(150)).create_from_image(&png).is_ok());
    }

    #[test]
    fn page_size_follows_resolution() {
        let pdf = ImagePdfWriter::new().create_from_image(&png_with_phys(150)).unwrap();
        let doc = lopdf::Document::load_mem(&pdf).unwrap();
        let page = doc.get_pages()[&1];
        let media_box = crate::pdf::objects::media_box(&doc, page);
        // 300 x 150 px at 150 dpi is 2 x 1 inches.
        assert!((media_box[2] - media_box[0] - 144.0).abs() < 1.0);
        assert!((media_box[3] - media_box[1] - 72.0).abs() < 1.0);
    }

    #[test]
    fn image_detection() {
        assert!(is_image(&png_with_phys(72)));
        assert!(!is_image(b"%PDF-1.7"));
    }
}
