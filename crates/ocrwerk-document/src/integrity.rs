// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// SHA-256 fingerprints used to prove pass-through pages leave the pipeline
// untouched.

use ocrwerk_core::error::OcrwerkError;
use sha2::{Digest, Sha256};

/// Compute the SHA-256 hash of `data` as a lowercase hex string.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Incremental fingerprint over several labelled parts.
///
/// Each part is length-prefixed so that moving bytes between parts changes
/// the digest.
#[derive(Debug, Clone, Default)]
pub struct Fingerprint {
    hasher: Sha256,
}

impl Fingerprint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn part(&mut self, label: &[u8], data: &[u8]) -> &mut Self {
        self.hasher.update((label.len() as u64).to_be_bytes());
        self.hasher.update(label);
        self.hasher.update((data.len() as u64).to_be_bytes());
        self.hasher.update(data);
        self
    }

    pub fn finish(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

/// Check that page `page` of the output carries the source's fingerprint.
pub fn verify_page(page: u32, expected_hex: &str, actual_hex: &str) -> Result<(), OcrwerkError> {
    if expected_hex == actual_hex {
        Ok(())
    } else {
        Err(OcrwerkError::Assembly(format!(
            "pass-through page {page} changed: expected sha256 {expected_hex}, got {actual_hex}"
        )))
    }
}
