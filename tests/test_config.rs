//! Configuration files on disk, and an engine opened from one.

use sift::config::Config;
use sift::ingest::IngestDocument;
use sift::retrieval::ExecutionMode;
use sift::{Sift, SiftError};
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

fn config_in(dir: &Path) -> Config {
    let mut config = Config::default();
    config.storage.data_dir = dir.join("data");
    config.embedding.dimension = Some(48);
    config
}

#[test]
fn test_saved_config_loads_back() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    config_in(dir.path()).save(&path).unwrap();

    let loaded = Config::load(&path).unwrap();
    assert_eq!(loaded.storage.data_dir, dir.path().join("data"));
    assert_eq!(loaded.embedding.dimension, Some(48));
    assert_eq!(
        loaded.database_path().unwrap(),
        dir.path().join("data").join("sift.db")
    );
    assert_eq!(loaded.searcher_options().unwrap().deadline, Some(Duration::from_secs(10)));
}

#[test]
fn test_missing_file_is_reported() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("absent.toml");

    match Config::load(&path) {
        Err(SiftError::ConfigNotFound { path: reported }) => assert_eq!(reported, path),
        other => panic!("expected ConfigNotFound, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_invalid_file_lists_every_problem() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");

    let mut config = config_in(dir.path());
    config.chunking.overlap = config.chunking.chunk_size;
    config.retrieval.execution = "eventually".to_string();
    config.save(&path).unwrap();

    match Config::load(&path) {
        Err(SiftError::ConfigValidation { errors }) => {
            let paths: Vec<&str> = errors.iter().map(|e| e.path.as_str()).collect();
            assert_eq!(paths, vec!["chunking.overlap", "retrieval.execution"]);
        }
        other => panic!("expected ConfigValidation, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_profiles_from_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    config_in(dir.path()).save(&path).unwrap();

    let mut text = std::fs::read_to_string(&path).unwrap();
    text.push_str(
        "\n[profiles.batch]\nexecution = \"sequential\"\nsimilarity_threshold = 0.5\ntrack_searches = false\n",
    );
    std::fs::write(&path, text).unwrap();

    let config = Config::load_with_profile(&path, "batch").unwrap();
    assert_eq!(config.execution_mode().unwrap(), ExecutionMode::Sequential);
    assert_eq!(config.retrieval.similarity_threshold, 0.5);
    assert!(!config.retrieval.track_searches);

    assert!(matches!(
        Config::load_with_profile(&path, "nightly"),
        Err(SiftError::Config(_))
    ));
}

#[test]
fn test_overrides_then_validation() {
    let mut config = config_in(Path::new("/tmp"));
    config.apply_overrides([
        ("SIFT_CHUNKING__CHUNK_SIZE", "256"),
        ("SIFT_RETRIEVAL__RRF_K", "30"),
        ("HOME", "/root"),
    ]);

    assert_eq!(config.chunking.chunk_size, 256);
    assert_eq!(config.retrieval.rrf_k, 30.0);
    assert_eq!(config.chunker().unwrap().chunk_size(), 256);
}

#[tokio::test]
async fn test_engine_from_config_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    config_in(dir.path()).save(&path).unwrap();

    let config = Config::load(&path).unwrap();
    let sift = tokio::task::spawn_blocking(move || Sift::open(config))
        .await
        .unwrap()
        .unwrap();

    let report = sift
        .ingest(
            &IngestDocument::new("notes", "Certificates rotate every ninety days.")
                .tags(["security"]),
        )
        .unwrap();
    assert_eq!(report.chunks_embedded, 1);

    let results = sift
        .search(&sift.request("certificates rotate").track(false))
        .await
        .unwrap();
    assert!(results[0].content.contains("Certificates"));
    assert!(dir.path().join("data").join("sift.db").exists());

    let stats = sift.stats().unwrap();
    assert_eq!(stats.document_count, 1);
    assert_eq!(stats.embedding_count, 1);
}
