// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Ocrwerk — searchable PDF/A from scanned documents.
//
// Entry point. Parses the command line, initialises logging, runs one job
// on a tokio runtime and exits with the code for its outcome.

mod args;

use clap::Parser;
use clap::error::ErrorKind;
use ocrwerk_core::human_errors::humanize_error;
use ocrwerk_core::{ExitCode, JobConfig, OcrwerkError};
use ocrwerk_pipeline::{CancelFlag, JobReport, Pipeline};
use tracing::{info, warn};

use args::{Cli, Engine};

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => err.exit(),
        Err(err) => {
            let _ = err.print();
            std::process::exit(ExitCode::BadArgs.code());
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.default_log_filter())),
        )
        .with_writer(std::io::stderr)
        .init();

    let code = match run(&cli) {
        Ok(report) => {
            summarize(&report);
            ExitCode::Ok
        }
        Err(err) => {
            let human = humanize_error(&err);
            tracing::debug!(error = %err, "job failed");
            eprintln!("ocrwerk: {}", human.message);
            eprintln!("  {}", human.suggestion);
            human.exit_code
        }
    };
    std::process::exit(code.code());
}

fn run(cli: &Cli) -> Result<JobReport, OcrwerkError> {
    let config = cli.job_config()?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| OcrwerkError::Other(format!("cannot start the async runtime: {e}")))?;

    runtime.block_on(async {
        let cancel = CancelFlag::new();
        let on_interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, cancelling job");
                on_interrupt.cancel();
            }
        });

        info!(input = %cli.input.display(), workers = config.worker_count(), "Ocrwerk starting");
        let pipeline = pipeline(config, cli.engine)?.with_cancel(cancel);
        let report = pipeline.run(&cli.input, &cli.output).await?;
        if let Some(path) = &cli.json_report {
            report.write_json(path)?;
        }
        Ok(report)
    })
}

fn pipeline(config: JobConfig, engine: Engine) -> Result<Pipeline, OcrwerkError> {
    match engine {
        Engine::Tesseract => Ok(Pipeline::from_config(config)),
        Engine::Ocrs => ocrs_pipeline(config),
    }
}

#[cfg(feature = "ocrs")]
fn ocrs_pipeline(config: JobConfig) -> Result<Pipeline, OcrwerkError> {
    use std::sync::Arc;

    use ocrwerk_document::OcrsEngine;

    let engine = OcrsEngine::with_defaults().map_err(|e| OcrwerkError::DependencyMissing {
        program: "ocrs models".into(),
        hint: e.to_string(),
    })?;
    Ok(Pipeline::with_engine(config, Arc::new(engine)))
}

#[cfg(not(feature = "ocrs"))]
fn ocrs_pipeline(_config: JobConfig) -> Result<Pipeline, OcrwerkError> {
    Err(OcrwerkError::BadArgs(
        "this build has no ocrs engine; rebuild with --features ocrs".into(),
    ))
}

fn summarize(report: &JobReport) {
    info!(
        pages = report.page_count,
        recognized = report.recognized_pages.len(),
        passed_through = report.pass_through_pages.len(),
        retries = report.retries,
        elapsed_ms = report.elapsed_ms,
        "job finished"
    );
    for failure in &report.failed_pages {
        warn!("{failure}; page copied without OCR");
    }
    if let Some(saved) = report.optimization.as_ref().map(|o| o.saved_bytes())
        && saved > 0
    {
        info!(saved_bytes = saved, "optimized output");
    }
    if let Some(path) = &report.temporary_files {
        info!(path = %path.display(), "temporary files kept");
    }
}
