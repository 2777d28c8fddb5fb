//! Full pipeline through the orchestrator

mod fixtures;

use fixtures::{init_logging, jpeg_blob, png_blob, remover, DiscFactory, StubFetcher};
use image::GenericImageView;
use nobg::{
    export_image, generate_filename, BgRemovalError, ExportOptions, ImageBlob, Orchestrator,
    OutputFormat, ProcessingState,
};
use nobg::utils::validation::UNSUPPORTED_FORMAT_MESSAGE;
use std::sync::Arc;
use std::time::Duration;

fn idle_orchestrator() -> Orchestrator {
    Orchestrator::new(remover(
        DiscFactory::default(),
        Arc::new(StubFetcher::default()),
    ))
}

#[tokio::test]
async fn test_png_completes_at_original_resolution() {
    init_logging();
    let orchestrator = idle_orchestrator();

    let processed = orchestrator.submit(png_blob(500, 500)).await.unwrap();
    assert_eq!(processed.dimensions(), (500, 500));

    let ProcessingState::Complete {
        original,
        processed,
        ..
    } = orchestrator.state()
    else {
        panic!("expected complete state, got {:?}", orchestrator.state());
    };
    assert_eq!(original.dimensions(), (500, 500));

    let output = image::load_from_memory(processed.blob.bytes()).unwrap();
    assert_eq!(output.dimensions(), (500, 500));
    let rgba = output.to_rgba8();
    assert_eq!(rgba.get_pixel(250, 250).0, [40, 120, 200, 255]);
    assert_eq!(rgba.get_pixel(2, 2).0[3], 0);
}

#[tokio::test]
async fn test_tiny_blob_is_unsupported() {
    init_logging();
    let fetcher = Arc::new(StubFetcher::default());
    let orchestrator = Orchestrator::new(remover(DiscFactory::default(), fetcher.clone()));

    let err = orchestrator
        .submit(ImageBlob::new(vec![0xDE, 0xAD, 0xBE, 0xEF], "image/png"))
        .await
        .unwrap_err();

    assert!(matches!(err, BgRemovalError::Validation(_)));
    assert_eq!(
        orchestrator.state(),
        ProcessingState::Error {
            message: UNSUPPORTED_FORMAT_MESSAGE.to_string()
        }
    );
    assert_eq!(fetcher.model_calls(), 0);
}

#[tokio::test]
async fn test_cancel_during_loading_returns_to_idle() {
    init_logging();
    let (fetcher, gate) = StubFetcher::gated();
    let orchestrator = Orchestrator::new(remover(DiscFactory::default(), Arc::new(fetcher)));
    let mut states = orchestrator.subscribe();

    let task = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.submit(png_blob(120, 90)).await })
    };

    // Model download reports 0.1 and then blocks on the gate
    states
        .wait_for(|state| {
            matches!(state, ProcessingState::Loading { progress } if *progress >= 0.1)
        })
        .await
        .unwrap();
    orchestrator.cancel();
    assert_eq!(orchestrator.state(), ProcessingState::Idle);

    gate.add_permits(1);
    let outcome = task.await.unwrap();
    assert!(matches!(outcome, Err(BgRemovalError::Cancelled)));
    assert_eq!(orchestrator.state(), ProcessingState::Idle);
}

#[tokio::test]
async fn test_new_submit_supersedes_in_flight_call() {
    init_logging();
    let factory = DiscFactory::with_delay(Duration::from_millis(150));
    let orchestrator = Orchestrator::new(remover(factory, Arc::new(StubFetcher::default())));
    let mut states = orchestrator.subscribe();

    let first = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.submit(png_blob(80, 80)).await })
    };
    states
        .wait_for(|state| {
            matches!(state, ProcessingState::Processing { progress } if *progress >= 0.9)
        })
        .await
        .unwrap();

    let second = orchestrator.submit(jpeg_blob(60, 40)).await.unwrap();
    let first = first.await.unwrap();

    assert!(matches!(first, Err(BgRemovalError::Cancelled)));
    assert_eq!(second.dimensions(), (60, 40));
    let ProcessingState::Complete { original, .. } = orchestrator.state() else {
        panic!("expected complete state");
    };
    assert_eq!(original.blob.mime_type(), "image/jpeg");
}

#[tokio::test]
async fn test_orchestrators_share_one_model() {
    init_logging();
    let factory = DiscFactory::default();
    let fetcher = Arc::new(StubFetcher::default());
    let shared = remover(factory.clone(), fetcher.clone());

    let a = Orchestrator::new(Arc::clone(&shared));
    let b = Orchestrator::new(shared);
    let (ra, rb) = tokio::join!(a.submit(png_blob(50, 50)), b.submit(png_blob(70, 30)));

    assert_eq!(ra.unwrap().dimensions(), (50, 50));
    assert_eq!(rb.unwrap().dimensions(), (70, 30));
    assert_eq!(factory.init_count(), 1);
    assert_eq!(fetcher.model_calls(), 1);
}

#[tokio::test]
async fn test_reprocess_with_lower_threshold() {
    init_logging();
    let factory = DiscFactory::with_delay(Duration::from_millis(100));
    let orchestrator =
        Orchestrator::new(remover(factory.clone(), Arc::new(StubFetcher::default())));
    orchestrator.submit(png_blob(100, 100)).await.unwrap();

    let mut states = orchestrator.subscribe();
    let reprocessed = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.reprocess(0.2).await })
    };

    // Reprocessing skips loading entirely
    states.changed().await.unwrap();
    assert!(matches!(*states.borrow(), ProcessingState::Processing { .. }));

    let processed = reprocessed.await.unwrap().unwrap();
    assert_eq!(processed.dimensions(), (100, 100));
    assert_eq!(factory.init_count(), 1);
}

#[tokio::test]
async fn test_export_result_as_jpeg() {
    init_logging();
    let orchestrator = idle_orchestrator();
    let input = jpeg_blob(90, 60);
    let processed = orchestrator.submit(input.clone()).await.unwrap();

    let options = ExportOptions::new(OutputFormat::Jpeg)
        .with_quality(80)
        .with_filename(input.name().unwrap());
    let exported = export_image(&processed.blob, &options).unwrap();

    assert_eq!(exported.filename, "fixture-photo-nobg.jpg");
    assert_eq!(
        exported.filename,
        generate_filename(Some("fixture photo.jpg"), OutputFormat::Jpeg)
    );
    let decoded = image::load_from_memory(exported.blob.bytes()).unwrap();
    assert_eq!(decoded.dimensions(), (90, 60));
    // Transparent corners are flattened onto white
    assert!(decoded.to_rgb8().get_pixel(1, 1).0.iter().all(|&c| c > 235));
}
