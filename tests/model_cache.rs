//! Model caching and fetching across remover instances

mod fixtures;

use fixtures::{
    cpu_config, init_logging, png_blob, remover_with, serve_files, DiscFactory, StubFetcher,
    MODEL_BYTES,
};
use nobg::{
    Backend, BackgroundRemover, BgRemovalError, FsStore, ModelCache, ModelSpec, RemovalConfig,
    RemovalOptions,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tempfile::TempDir;

fn fs_cache(dir: &TempDir, version: &str) -> ModelCache {
    ModelCache::new(Some(Arc::new(FsStore::open(dir.path()).unwrap())), version)
}

fn cached_remover(
    fetcher: &Arc<StubFetcher>,
    dir: &TempDir,
    version: &str,
) -> Arc<BackgroundRemover> {
    remover_with(
        cpu_config(),
        DiscFactory::default(),
        fetcher.clone(),
        fs_cache(dir, version),
    )
}

#[tokio::test]
async fn test_second_instance_reads_model_from_disk() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let fetcher = Arc::new(StubFetcher::default());

    let first = cached_remover(&fetcher, &dir, "1.0");
    first.preload(None).await.unwrap();
    assert_eq!(fetcher.model_calls(), 1);
    assert!(first.is_model_cached());

    let second = cached_remover(&fetcher, &dir, "1.0");
    assert!(second.is_model_cached());
    let result = second
        .remove_background(&png_blob(32, 32), RemovalOptions::default())
        .await
        .unwrap();

    assert_eq!(result.dimensions(), (32, 32));
    assert_eq!(fetcher.model_calls(), 1);
}

#[tokio::test]
async fn test_version_bump_refetches() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let fetcher = Arc::new(StubFetcher::default());

    cached_remover(&fetcher, &dir, "1.0")
        .preload(None)
        .await
        .unwrap();

    let upgraded = cached_remover(&fetcher, &dir, "2.0");
    let stale = upgraded.cache_info();
    assert!(!stale.cached);
    assert_eq!(stale.stored_version.as_deref(), Some("1.0"));

    upgraded.preload(None).await.unwrap();
    assert_eq!(fetcher.model_calls(), 2);

    let info = upgraded.cache_info();
    assert!(info.cached);
    assert_eq!(info.stored_version.as_deref(), Some("2.0"));
    assert_eq!(info.size_bytes, Some(MODEL_BYTES.len() as u64));
}

#[tokio::test]
async fn test_clear_cache_forces_download() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let fetcher = Arc::new(StubFetcher::default());

    let remover = cached_remover(&fetcher, &dir, "1.0");
    remover.preload(None).await.unwrap();
    assert!(remover.clear_model_cache());
    assert!(!remover.is_model_cached());
    assert!(remover.cache_info().stored_version.is_none());

    // The loaded session survives a cache clear
    assert!(remover.is_ready());

    let fresh = cached_remover(&fetcher, &dir, "1.0");
    fresh.preload(None).await.unwrap();
    assert_eq!(fetcher.model_calls(), 2);
}

#[tokio::test]
async fn test_corrupted_record_is_ignored() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let fetcher = Arc::new(StubFetcher::default());

    cached_remover(&fetcher, &dir, "1.0")
        .preload(None)
        .await
        .unwrap();

    // Flip the payload behind the metadata's back
    for entry in std::fs::read_dir(dir.path()).unwrap() {
        let path = entry.unwrap().path();
        if path.extension().is_some_and(|ext| ext == "bin") {
            std::fs::write(&path, b"tampered").unwrap();
        }
    }

    let again = cached_remover(&fetcher, &dir, "1.0");
    assert!(!again.is_model_cached());
    assert!(!again.cache_info().cached);
    again.preload(None).await.unwrap();
    assert_eq!(fetcher.model_calls(), 2);
}

fn http_config(base_url: &str, cache_dir: &TempDir) -> RemovalConfig {
    RemovalConfig::builder()
        .backend_preference(Backend::Cpu)
        .model(ModelSpec::remote(format!("{base_url}/onnx/model.onnx")))
        .model_version("1.0")
        .cache_dir(cache_dir.path())
        .build()
        .unwrap()
}

fn http_remover(config: RemovalConfig) -> BackgroundRemover {
    BackgroundRemover::builder(config)
        .backend_factory(Arc::new(DiscFactory::default()))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_http_fetch_and_cached_restart() {
    init_logging();
    let (base_url, requests) = serve_files(vec![
        ("/onnx/model.onnx", MODEL_BYTES.to_vec()),
        (
            "/preprocessor_config.json",
            br#"{"size": {"width": 48, "height": 48}, "image_mean": [0.5, 0.5, 0.5]}"#.to_vec(),
        ),
    ])
    .await;
    let cache_dir = TempDir::new().unwrap();

    let remover = http_remover(http_config(&base_url, &cache_dir));
    let result = remover
        .remove_background(&png_blob(40, 30), RemovalOptions::default())
        .await
        .unwrap();
    assert_eq!(result.dimensions(), (40, 30));
    assert_eq!(requests.load(Ordering::SeqCst), 2);
    assert!(remover.is_model_cached());

    // Only the small config is fetched after a restart
    let restarted = http_remover(http_config(&base_url, &cache_dir));
    restarted.preload(None).await.unwrap();
    assert_eq!(requests.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_http_missing_model_is_model_load_error() {
    init_logging();
    let (base_url, _) = serve_files(Vec::new()).await;
    let cache_dir = TempDir::new().unwrap();

    let remover = http_remover(http_config(&base_url, &cache_dir));
    let err = remover.preload(None).await.unwrap_err();

    assert!(matches!(err, BgRemovalError::ModelLoad(_)), "{err:?}");
    assert!(!remover.is_ready());
    assert!(!remover.is_model_cached());
}
