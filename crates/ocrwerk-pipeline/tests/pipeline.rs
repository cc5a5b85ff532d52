// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// End-to-end job tests with in-process rasterizer, OCR engine and PDF/A
// converter.

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use common::{
    FakeEngine, Fakes, SourcePage, fingerprints, load, page_contents, page_image_widths, test_config, write_source,
};
use ocrwerk_core::{OcrwerkError, OptimizeLevel, OutputType, PageDecision, PageFailureKind, TextPolicy};
use ocrwerk_document::ocr::Orientation;
use ocrwerk_pipeline::{Pipeline, deps};

#[tokio::test]
async fn text_pages_are_copied_and_the_rest_recognized() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.pdf");
    let output = dir.path().join("out.pdf");
    write_source(&input, &[SourcePage::Blank, SourcePage::Text, SourcePage::Blank]);

    let fakes = Fakes::new(FakeEngine::default());
    let config = ocrwerk_core::JobConfig {
        optimize: OptimizeLevel::Lossless,
        ..test_config(dir.path(), 2)
    };
    let report = fakes.pipeline(config).run(&input, &output).await.unwrap();

    assert_eq!(report.page_count, 3);
    assert_eq!(report.recognized_pages, vec![1, 3]);
    assert_eq!(report.pass_through_pages, vec![2]);
    assert_eq!(fakes.engine.calls.load(Ordering::SeqCst), 2);
    assert_eq!(fakes.rasterizer.rendered(), vec![1, 3]);

    let source = load(&input);
    let out = load(&output);
    assert_eq!(out.get_pages().len(), 3);
    assert_eq!(fingerprints(&out)[1], fingerprints(&source)[1]);
    let contents = page_contents(&out);
    assert!(contents[0].contains("3 Tr"));
    assert!(contents[1].contains("(Hello) Tj"));
    assert!(contents[2].contains("3 Tr"));
}

#[tokio::test]
async fn output_order_does_not_depend_on_worker_count() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.pdf");
    write_source(&input, &[SourcePage::Blank; 12]);

    for workers in [1, 2, 8] {
        // Earlier pages take longer, so completion order is reversed.
        let engine = FakeEngine {
            delays_ms: (1..=12).map(|p| (p, (13 - p as u64) * 4)).collect(),
            ..Default::default()
        };
        let output = dir.path().join(format!("out-{workers}.pdf"));
        Fakes::new(engine)
            .pipeline(test_config(dir.path(), workers))
            .run(&input, &output)
            .await
            .unwrap();

        let widths = page_image_widths(&load(&output));
        let expected: Vec<Option<i64>> = (1..=12).map(|p| Some(100 + p)).collect();
        assert_eq!(widths, expected, "workers = {workers}");
    }
}

#[tokio::test]
async fn twenty_pages_come_out_identical_at_any_parallelism() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.pdf");
    let mut pages = vec![SourcePage::Blank; 20];
    pages[4] = SourcePage::Text;
    pages[13] = SourcePage::Text;
    write_source(&input, &pages);

    let mut runs = Vec::new();
    for workers in [1, 8] {
        let engine = FakeEngine {
            delays_ms: (1..=20).map(|p| (p, (p as u64 * 7) % 11)).collect(),
            ..Default::default()
        };
        let output = dir.path().join(format!("out-{workers}.pdf"));
        let report = Fakes::new(engine)
            .pipeline(test_config(dir.path(), workers))
            .run(&input, &output)
            .await
            .unwrap();
        assert_eq!(report.pass_through_pages, vec![5, 14]);
        runs.push(fingerprints(&load(&output)));
    }
    assert_eq!(runs[0].len(), 20);
    assert_eq!(runs[0], runs[1]);
}

#[tokio::test]
async fn hung_engine_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.pdf");
    let output = dir.path().join("out.pdf");
    write_source(&input, &[SourcePage::Blank, SourcePage::Blank]);

    let mut config = test_config(dir.path(), 2);
    config.tesseract.timeout_secs = 0.3;
    let fakes = Fakes::new(FakeEngine {
        hang_all: true,
        ..Default::default()
    });

    let started = Instant::now();
    let err = fakes.pipeline(config).run(&input, &output).await.unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(5), "took {:?}", started.elapsed());
    match &err {
        OcrwerkError::PageProcessing { kind, .. } => assert_eq!(*kind, PageFailureKind::OcrTimeout),
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(err.exit_code().code(), 7);
    assert!(!output.exists());
}

#[tokio::test]
async fn timeouts_are_retried_before_failing() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.pdf");
    let output = dir.path().join("out.pdf");
    write_source(&input, &[SourcePage::Blank]);

    let mut config = test_config(dir.path(), 1);
    config.tesseract.timeout_secs = 0.1;
    config.retry.max_retries = 2;
    let fakes = Fakes::new(FakeEngine {
        hang_all: true,
        ..Default::default()
    });
    let err = fakes.pipeline(config).run(&input, &output).await.unwrap_err();
    assert!(matches!(err, OcrwerkError::PageProcessing { page: 1, .. }));
    assert_eq!(fakes.engine.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn cancellation_leaves_nothing_behind() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.pdf");
    let output = dir.path().join("out.pdf");
    write_source(&input, &[SourcePage::Blank; 4]);

    let config = test_config(dir.path(), 1);
    let temp_root = config.temp_root.clone().unwrap();
    let fakes = Fakes::new(FakeEngine {
        hang: [1].into(),
        ..Default::default()
    });
    let pipeline = Arc::new(fakes.pipeline(config));
    let cancel = pipeline.cancel_flag();

    let job = {
        let pipeline = Arc::clone(&pipeline);
        let (input, output) = (input.clone(), output.clone());
        tokio::spawn(async move { pipeline.run(&input, &output).await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;
    cancel.cancel();

    let err = tokio::time::timeout(Duration::from_secs(5), job)
        .await
        .expect("job must stop promptly")
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, OcrwerkError::Cancelled));
    assert_eq!(err.exit_code().code(), 130);
    assert!(!output.exists());
    assert_eq!(std::fs::read_dir(&temp_root).unwrap().count(), 0);
    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".partial"))
        .collect();
    assert!(leftovers.is_empty());
}

#[tokio::test]
async fn tolerated_failures_copy_the_source_page() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.pdf");
    let output = dir.path().join("out.pdf");
    write_source(&input, &[SourcePage::Blank, SourcePage::Blank, SourcePage::Blank]);

    let config = ocrwerk_core::JobConfig {
        max_page_failures: 1,
        ..test_config(dir.path(), 2)
    };
    let fakes = Fakes::new(FakeEngine {
        crash: [2].into(),
        ..Default::default()
    });
    let report = fakes.pipeline(config).run(&input, &output).await.unwrap();

    assert_eq!(report.failed_pages.len(), 1);
    assert!(report.failed_pages[0].contains("page 2"));
    assert_eq!(report.pages[1].decision, PageDecision::FailedTolerated);
    assert_eq!(fingerprints(&load(&output))[1], fingerprints(&load(&input))[1]);
}

#[tokio::test]
async fn budget_exceeded_fails_the_job() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.pdf");
    let output = dir.path().join("out.pdf");
    write_source(&input, &[SourcePage::Blank, SourcePage::Blank, SourcePage::Blank]);

    let config = ocrwerk_core::JobConfig {
        max_page_failures: 1,
        ..test_config(dir.path(), 1)
    };
    let fakes = Fakes::new(FakeEngine {
        crash: [1, 2].into(),
        ..Default::default()
    });
    let err = fakes.pipeline(config).run(&input, &output).await.unwrap_err();
    assert!(matches!(
        err,
        OcrwerkError::PageProcessing {
            page: 2,
            kind: PageFailureKind::OcrEngineCrashed,
            ..
        }
    ));
    assert!(!output.exists());
}

#[tokio::test]
async fn redo_ocr_replaces_the_old_layer_only() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.pdf");
    let output = dir.path().join("out.pdf");
    write_source(&input, &[SourcePage::PreviousOcr, SourcePage::Text]);

    let config = ocrwerk_core::JobConfig {
        text_policy: TextPolicy::RedoOcr,
        ..test_config(dir.path(), 2)
    };
    let report = Fakes::new(FakeEngine::default())
        .pipeline(config)
        .run(&input, &output)
        .await
        .unwrap();
    assert_eq!(report.pages[0].decision, PageDecision::Replaced);
    assert_eq!(report.pages[1].decision, PageDecision::SkippedText);

    let contents = page_contents(&load(&output));
    assert!(contents[0].contains("/Im0 Do"));
    assert!(!contents[0].contains("(Stale)"));
    assert!(contents[0].contains("3 Tr"));
    assert!(contents[1].contains("(Hello) Tj"));
}

#[tokio::test]
async fn force_ocr_rasterizes_text_pages() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.pdf");
    let output = dir.path().join("out.pdf");
    write_source(&input, &[SourcePage::Text]);

    let config = ocrwerk_core::JobConfig {
        text_policy: TextPolicy::ForceOcr,
        ..test_config(dir.path(), 1)
    };
    let report = Fakes::new(FakeEngine::default())
        .pipeline(config)
        .run(&input, &output)
        .await
        .unwrap();
    assert_eq!(report.recognized_pages, vec![1]);
    let contents = page_contents(&load(&output));
    assert!(!contents[0].contains("(Hello)"));
    assert!(contents[0].contains("/OcrIm0 Do"));
}

#[tokio::test]
async fn page_selection_limits_ocr() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.pdf");
    let output = dir.path().join("out.pdf");
    write_source(&input, &[SourcePage::Blank; 3]);

    let config = ocrwerk_core::JobConfig {
        pages: Some("2".parse().unwrap()),
        ..test_config(dir.path(), 2)
    };
    let fakes = Fakes::new(FakeEngine::default());
    let report = fakes.pipeline(config).run(&input, &output).await.unwrap();
    assert_eq!(report.recognized_pages, vec![2]);
    assert_eq!(report.pages[0].decision, PageDecision::NotSelected);
    assert_eq!(fakes.rasterizer.rendered(), vec![2]);

    let bad = ocrwerk_core::JobConfig {
        pages: Some("7".parse().unwrap()),
        ..test_config(dir.path(), 2)
    };
    let err = fakes.pipeline(bad).run(&input, &output).await.unwrap_err();
    assert_eq!(err.exit_code().code(), 1);
}

#[tokio::test]
async fn orientation_is_corrected_above_the_threshold() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.pdf");
    let output = dir.path().join("out.pdf");
    write_source(&input, &[SourcePage::Blank]);

    let config = ocrwerk_core::JobConfig {
        rotate_pages: true,
        ..test_config(dir.path(), 1)
    };
    let fakes = Fakes::new(FakeEngine {
        rotate: Some(Orientation {
            rotate: 90,
            confidence: 20.0,
        }),
        ..Default::default()
    });
    let report = fakes.pipeline(config).run(&input, &output).await.unwrap();
    assert_eq!(report.pages[0].rotation_applied, 90);

    let out = load(&output);
    let page_id = *out.get_pages().get(&1).unwrap();
    let rotate = out.get_dictionary(page_id).unwrap().get(b"Rotate").unwrap().as_i64().unwrap();
    assert_eq!(rotate, 90);
}

#[tokio::test]
async fn low_confidence_orientation_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.pdf");
    let output = dir.path().join("out.pdf");
    write_source(&input, &[SourcePage::Blank]);

    let config = ocrwerk_core::JobConfig {
        rotate_pages: true,
        ..test_config(dir.path(), 1)
    };
    let fakes = Fakes::new(FakeEngine {
        rotate: Some(Orientation {
            rotate: 180,
            confidence: 2.0,
        }),
        ..Default::default()
    });
    let report = fakes.pipeline(config).run(&input, &output).await.unwrap();
    assert_eq!(report.pages[0].rotation_applied, 0);
    assert!(report.pages[0].notes.iter().any(|n| n.contains("below threshold")));
}

#[tokio::test]
async fn pdfa_output_passes_structural_validation() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.pdf");
    let output = dir.path().join("out.pdf");
    write_source(&input, &[SourcePage::Blank, SourcePage::Blank]);

    let config = ocrwerk_core::JobConfig {
        output_type: OutputType::Pdfa,
        optimize: OptimizeLevel::Lossless,
        ..test_config(dir.path(), 2)
    };
    let fakes = Fakes::new(FakeEngine::default());
    let report = fakes.pipeline(config).run(&input, &output).await.unwrap();

    let pdfa = report.pdfa.expect("PDF/A outcome recorded");
    assert!(!pdfa.retried);
    assert!(pdfa.reports.iter().all(|r| r.conformant));
    assert_eq!(fakes.converter.runs.load(Ordering::SeqCst), 1);

    let out = load(&output);
    assert_eq!(out.version, "1.7");
    assert_eq!(out.get_pages().len(), 2);
    assert!(out.trailer.get(b"ID").is_ok());
}

#[tokio::test]
async fn sidecar_only_jobs_write_no_pdf() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.pdf");
    let output = dir.path().join("out.pdf");
    let sidecar = dir.path().join("out.txt");
    write_source(&input, &[SourcePage::Blank, SourcePage::Text]);

    let config = ocrwerk_core::JobConfig {
        output_type: OutputType::None,
        sidecar: Some(sidecar.clone()),
        ..test_config(dir.path(), 2)
    };
    let report = Fakes::new(FakeEngine::default())
        .pipeline(config)
        .run(&input, &output)
        .await
        .unwrap();
    assert!(report.output.is_none());
    assert!(!output.exists());

    let text = std::fs::read_to_string(&sidecar).unwrap();
    let pages: Vec<&str> = text.split('\x0c').collect();
    assert_eq!(pages.len(), 2);
    assert!(pages[0].contains("page1"));
    assert!(pages[1].contains("[OCR skipped on page 2]"));
}

#[tokio::test]
async fn image_input_becomes_a_one_page_pdf() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("scan.png");
    let output = dir.path().join("out.pdf");
    image::GrayImage::from_pixel(300, 150, image::Luma([255]))
        .save_with_format(&input, image::ImageFormat::Png)
        .unwrap();

    let config = ocrwerk_core::JobConfig {
        image_dpi: Some(150),
        ..test_config(dir.path(), 1)
    };
    let report = Fakes::new(FakeEngine::default())
        .pipeline(config)
        .run(&input, &output)
        .await
        .unwrap();
    assert_eq!(report.page_count, 1);
    assert_eq!(report.recognized_pages, vec![1]);
    assert_eq!(load(&output).get_pages().len(), 1);
}

#[tokio::test]
async fn temporary_files_can_be_kept() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.pdf");
    let output = dir.path().join("out.pdf");
    write_source(&input, &[SourcePage::Blank]);

    let config = ocrwerk_core::JobConfig {
        keep_temporary_files: true,
        ..test_config(dir.path(), 1)
    };
    let report = Fakes::new(FakeEngine::default())
        .pipeline(config)
        .run(&input, &output)
        .await
        .unwrap();
    let kept = report.temporary_files.expect("kept directory reported");
    assert!(kept.is_dir());
    assert!(std::fs::read_dir(&kept).unwrap().next().is_some());
}

#[tokio::test]
async fn unknown_language_fails_before_any_page_work() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.pdf");
    let output = dir.path().join("out.pdf");
    write_source(&input, &[SourcePage::Blank]);

    let config = ocrwerk_core::JobConfig {
        languages: vec!["fra".into()],
        ..test_config(dir.path(), 1)
    };
    let fakes = Fakes::new(FakeEngine::default());
    let err = fakes.pipeline(config).run(&input, &output).await.unwrap_err();
    assert_eq!(err.exit_code().code(), 3);
    assert!(fakes.rasterizer.rendered().is_empty());
}

#[tokio::test]
async fn missing_input_is_a_file_access_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = Fakes::new(FakeEngine::default())
        .pipeline(test_config(dir.path(), 1))
        .run(&dir.path().join("nope.pdf"), &dir.path().join("out.pdf"))
        .await
        .unwrap_err();
    assert_eq!(err.exit_code().code(), 5);
}

#[tokio::test]
async fn in_process_engine_still_checks_programs_up_front() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.pdf");
    let output = dir.path().join("out.pdf");
    write_source(&input, &[SourcePage::Blank, SourcePage::Blank]);

    let config = ocrwerk_core::JobConfig {
        rasterizer_program: "ocrwerk-missing-pdftoppm".into(),
        tesseract: ocrwerk_core::config::TesseractSettings {
            program: "ocrwerk-missing-tesseract".into(),
            ..Default::default()
        },
        ..test_config(dir.path(), 2)
    };
    let temp_root = config.temp_root.clone().unwrap();
    let engine = Arc::new(FakeEngine::default());
    let err = Pipeline::with_engine(config, engine.clone())
        .run(&input, &output)
        .await
        .unwrap_err();
    match &err {
        OcrwerkError::DependencyMissing { program, .. } => assert_eq!(program, "ocrwerk-missing-pdftoppm"),
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(err.exit_code().code(), 3);
    assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
    assert!(!output.exists());
    assert_eq!(std::fs::read_dir(&temp_root).unwrap().count(), 0);
}

#[cfg(unix)]
#[tokio::test]
async fn missing_ghostscript_fails_before_any_page_is_rendered() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.pdf");
    let output = dir.path().join("out.pdf");
    write_source(&input, &[SourcePage::Blank, SourcePage::Blank]);

    let config = ocrwerk_core::JobConfig {
        output_type: OutputType::Pdfa,
        rasterizer_program: "sh".into(),
        ghostscript_program: "ocrwerk-missing-gs".into(),
        ..test_config(dir.path(), 2)
    };
    let required = deps::required_programs(&config, false);
    let fakes = Fakes::new(FakeEngine::default());
    let err = fakes
        .pipeline(config)
        .with_required_programs(required)
        .run(&input, &output)
        .await
        .unwrap_err();
    assert!(matches!(err, OcrwerkError::DependencyMissing { ref program, .. } if program == "ocrwerk-missing-gs"));
    assert!(fakes.rasterizer.rendered().is_empty());
    assert_eq!(fakes.engine.calls.load(Ordering::SeqCst), 0);
    assert_eq!(fakes.converter.runs.load(Ordering::SeqCst), 0);
}
