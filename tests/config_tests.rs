//! Integration tests for file-based settings
//!
//! These tests verify that:
//! - Settings files load, validate and fall back to defaults
//! - Invalid files are rejected with the right error
//! - The settings manager reloads from disk, manually and on file change
//! - An engine can be built straight from a settings file

use std::fs;
use std::path::Path;
use std::time::Duration;

use ragcore::rag::chunker::ChunkingStrategy;
use ragcore::utils::toml_config::StorageBackend;
use ragcore::{ConfigError, Provider, RagEngineBuilder, RagSettings, RagSettingsManager};
use tempfile::TempDir;

const FULL_CONFIG: &str = r#"
[chunking]
strategy = "fixed-size"
chunk_size = 400
chunk_overlap = 50
min_chunk_size = 10

[cache]
max_size = 256
ttl_ms = 60000

[index]
table = "handbook_chunks"
dimension = 384
ivfflat_min_rows = 500
hnsw_min_rows = 50000

[ingest]
concurrency = 2
batch_size = 8

[retrieval]
limit = 8
threshold = 0.3
max_context_tokens = 1500
generation_timeout_ms = 20000

[generation]
max_tokens = 256
temperature = 0.2

[storage]
backend = "memory"

[logging]
level = "debug"
json = true
"#;

fn write_config(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).expect("config should be writable");
    path
}

#[test]
fn test_load_full_config() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "ragcore.toml", FULL_CONFIG);

    let settings = RagSettings::load(&path).unwrap();

    assert_eq!(settings.chunking.strategy, ChunkingStrategy::FixedSize);
    assert_eq!(settings.chunking.chunk_size, 400);
    assert_eq!(settings.chunking.chunk_overlap, 50);
    assert_eq!(settings.cache.max_size, 256);
    assert_eq!(settings.cache.ttl_ms, Some(60_000));
    assert_eq!(settings.index.table, "handbook_chunks");
    assert_eq!(settings.index.dimension, 384);
    assert_eq!(settings.index.ivfflat_min_rows, 500);
    assert_eq!(settings.ingest.concurrency, 2);
    assert_eq!(settings.retrieval.limit, 8);
    assert_eq!(settings.retrieval.max_context_tokens, 1500);
    assert_eq!(settings.generation.max_tokens, 256);
    assert_eq!(settings.storage.backend, StorageBackend::Memory);
    assert_eq!(settings.logging.level, "debug");
    assert!(settings.logging.json);
    assert!(settings.provider.is_none());

    let answer = settings.retrieval.answer_options();
    assert_eq!(answer.max_context_tokens, 1500);
    assert_eq!(answer.search.limit, 8);
    assert_eq!(answer.generation_timeout, Some(Duration::from_secs(20)));
}

#[test]
fn test_load_missing_file() {
    let dir = TempDir::new().unwrap();
    let result = RagSettings::load(dir.path().join("absent.toml"));
    assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
}

#[test]
fn test_load_malformed_toml() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "ragcore.toml", "[chunking\nchunk_size = ");
    assert!(matches!(
        RagSettings::load(&path),
        Err(ConfigError::ParseError(_))
    ));
}

#[test]
fn test_load_rejects_inconsistent_values() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        "ragcore.toml",
        "[index]\nivfflat_min_rows = 2000\nhnsw_min_rows = 1000\n",
    );
    assert!(matches!(
        RagSettings::load(&path),
        Err(ConfigError::ValidationError(_))
    ));
}

#[test]
fn test_provider_section() {
    let settings = RagSettings::parse(
        r#"
[index]
dimension = 768

[provider]
provider = "ollama"
base_url = "http://localhost:11434"
model = "llama3.2"
embedding_model = "nomic-embed-text"
dimension = 768
"#,
    )
    .unwrap();

    match settings.provider {
        Some(Provider::Ollama {
            ref model,
            dimension,
            ..
        }) => {
            assert_eq!(model, "llama3.2");
            assert_eq!(dimension, 768);
        }
        None => panic!("provider section should parse"),
    }
}

#[test]
fn test_provider_dimension_must_match_index() {
    let result = RagSettings::parse(
        r#"
[index]
dimension = 384

[provider]
provider = "ollama"
base_url = "http://localhost:11434"
model = "llama3.2"
embedding_model = "nomic-embed-text"
dimension = 768
"#,
    );
    assert!(matches!(result, Err(ConfigError::ValidationError(_))));
}

#[test]
fn test_manager_reload() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "ragcore.toml", "[retrieval]\nlimit = 3\n");

    let manager = RagSettingsManager::new(&path).unwrap();
    assert_eq!(manager.settings().retrieval.limit, 3);
    assert_eq!(manager.config_path(), path.as_path());

    fs::write(&path, "[retrieval]\nlimit = 7\n").unwrap();
    manager.reload().unwrap();
    assert_eq!(manager.settings().retrieval.limit, 7);

    // An invalid edit fails the reload and keeps the previous settings
    fs::write(&path, "[retrieval]\nlimit = \"many\"\n").unwrap();
    assert!(manager.reload().is_err());
    assert_eq!(manager.settings().retrieval.limit, 7);
}

#[test]
fn test_manager_clone_shares_settings() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "ragcore.toml", "[ingest]\nbatch_size = 4\n");

    let manager = RagSettingsManager::new(&path).unwrap();
    let clone = manager.clone();

    fs::write(&path, "[ingest]\nbatch_size = 16\n").unwrap();
    manager.reload().unwrap();
    assert_eq!(clone.settings().ingest.batch_size, 16);
}

async fn wait_for_limit(manager: &RagSettingsManager, expected: usize) -> bool {
    for _ in 0..50 {
        if manager.settings().retrieval.limit == expected {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    false
}

#[tokio::test]
async fn test_manager_hot_reload_on_file_change() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "ragcore.toml", "[retrieval]\nlimit = 2\n");

    let mut manager = RagSettingsManager::new(&path).unwrap();
    manager.start_watching().unwrap();

    // Unrelated files in the same directory are ignored
    fs::write(dir.path().join("notes.txt"), "scratch").unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    fs::write(&path, "[retrieval]\nlimit = 9\n").unwrap();

    assert!(
        wait_for_limit(&manager, 9).await,
        "settings were not reloaded after the file changed"
    );
    manager.stop_watching();
}

#[tokio::test]
async fn test_engine_from_settings_file() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "ragcore.toml", FULL_CONFIG);
    let settings = RagSettings::load(Path::new(&path)).unwrap();

    // No provider section and no injected embedder
    let result = RagEngineBuilder::new(settings).build().await;
    if cfg!(feature = "local-embeddings") {
        assert!(result.is_ok());
    } else {
        assert!(result.is_err());
    }
}
