// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// ocrwerk-pipeline — Job orchestration for the Ocrwerk OCR pipeline.
//
// Runs page work on a bounded worker pool with retries and a failure
// budget, reassembles the pages in order, and takes the result through
// optimization and the PDF/A gate to an atomically written output file.

pub mod cancel;
pub mod deps;
pub mod gate;
pub mod job_state;
pub mod pipeline;
pub mod report;
pub mod retry;
pub mod scheduler;
pub mod worker;

pub use cancel::CancelFlag;
pub use gate::{ConformanceGate, GateOutcome};
pub use pipeline::{Collaborators, Pipeline};
pub use report::{JobReport, PageReport};
pub use scheduler::{Scheduler, SchedulerConfig};
pub use worker::{PageProcessor, PageWorker, WorkerSettings};
