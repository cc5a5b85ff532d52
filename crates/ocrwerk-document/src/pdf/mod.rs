// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PDF module: inspection, page synthesis, assembly, optimization and PDF/A.

pub mod assemble;
pub mod inspect;
pub mod objects;
pub mod optimize;
pub mod pdfa;
pub mod sandwich;
pub mod validate;
pub mod writer;

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;

pub use assemble::{AssembledDocument, Assembler};
pub use inspect::{PageInfo, SourceDocument};
pub use optimize::{OptimizeReport, Optimizer};
pub use pdfa::{GhostscriptConverter, PdfaConverter, PdfaProfile, PdfaRequest, normalize_file};
pub use sandwich::{PageFrame, SynthesisError, SynthesisInput, render_overlay, synthesize_page};
pub use validate::{ConformanceValidator, StructuralValidator, ValidationReport, VeraPdfValidator, default_validators};
pub use writer::ImagePdfWriter;

/// Zlib-compress `data` at the default level.
pub(crate) fn deflate(data: &[u8]) -> Vec<u8> {
    deflate_with(data, Compression::default())
}

pub(crate) fn deflate_with(data: &[u8], level: Compression) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2), level);
    // Writing into a Vec cannot fail.
    let _ = encoder.write_all(data);
    encoder.finish().unwrap_or_default()
}

/// Zlib-decompress `data`.
pub(crate) fn inflate(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() * 2);
    ZlibDecoder::new(data).read_to_end(&mut out)?;
    Ok(out)
}
