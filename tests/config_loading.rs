use std::fs;
use std::path::PathBuf;

use eventgraph_core::config::{ConfigManager, GraphBackend, StoreBackend};
use eventgraph_core::{EventPipeline, SourceKind};
use tempfile::TempDir;

fn shipped_config_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("config")
        .join("eventgraph")
}

#[test]
fn test_shipped_environments_load_and_validate() {
    for environment in ["development", "test", "production"] {
        let manager =
            ConfigManager::load_from_directory_with_env(Some(shipped_config_dir()), environment)
                .unwrap_or_else(|e| panic!("{environment}: {e}"));
        let config = manager.config();
        assert_eq!(config.sources.len(), 3, "{environment}");
        assert!(config.documents.concurrency_limit <= config.documents.worker_threads);
    }
}

#[test]
fn test_environment_file_overrides_base() {
    let manager =
        ConfigManager::load_from_directory_with_env(Some(shipped_config_dir()), "test").unwrap();
    let config = manager.config();
    assert_eq!(config.store.backend, StoreBackend::Memory);
    assert_eq!(config.graph.backend, GraphBackend::Memory);
    assert_eq!(config.documents.worker_threads, 5);
    assert!(config.is_mutable(SourceKind::Transcript));
    assert!(config.source(SourceKind::Filing).unwrap().documents);
}

#[test]
fn test_invalid_concurrency_is_rejected() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("base.toml"),
        "[documents]\nworker_threads = 2\nconcurrency_limit = 3\n",
    )
    .unwrap();
    let result = ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test");
    assert!(result.is_err());
}

#[test]
fn test_missing_base_file_is_reported() {
    let dir = TempDir::new().unwrap();
    let error = ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test")
        .unwrap_err();
    assert!(error.to_string().contains("base.toml"));
}

#[tokio::test]
async fn test_pipeline_boots_from_test_environment() {
    let manager =
        ConfigManager::load_from_directory_with_env(Some(shipped_config_dir()), "test").unwrap();
    let pipeline = EventPipeline::from_config_manager(&manager).await.unwrap();
    let handle = pipeline.start();
    handle
        .shutdown(std::time::Duration::from_secs(5))
        .await
        .unwrap();
}
