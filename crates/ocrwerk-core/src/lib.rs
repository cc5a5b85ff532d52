// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Ocrwerk — Core types, configuration and error definitions shared across all crates.

pub mod config;
pub mod error;
pub mod human_errors;
pub mod page;
pub mod types;

pub use config::JobConfig;
pub use error::{ExitCode, OcrwerkError};
pub use page::*;
pub use types::*;
