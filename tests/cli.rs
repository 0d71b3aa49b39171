use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn mdrag_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_mdrag"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let docs_dir = root.join("docs");
    fs::create_dir_all(docs_dir.join("ops")).unwrap();
    fs::write(
        docs_dir.join("alpha.md"),
        "# Alpha Document\n\nThis is the alpha document about Rust programming.\n\nIt contains information about cargo and crates.",
    )
    .unwrap();
    fs::write(
        docs_dir.join("ops/deploy.md"),
        "---\ntitle: Deploy\ntags: [ops]\n---\n# Deploy\n\n## Rollback\n\nRun the rollback job.",
    )
    .unwrap();
    fs::write(
        docs_dir.join("notes.txt"),
        "Plain text is not picked up by the default globs.",
    )
    .unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/mdrag.sqlite"

[chunking]
target_chunk_size = 64
model_token_limit = 128
padding_factor = 0.9

[sources]
root = "{root}/docs"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("mdrag.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_mdrag(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = mdrag_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run mdrag binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_mdrag(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/mdrag.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_mdrag(&config_path, &["init"]);
    assert!(success1, "First init failed");
    let (_, _, success2) = run_mdrag(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_index_dry_run() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_mdrag(&config_path, &["index", "--dry-run"]);
    assert!(success, "dry run failed: {}", stderr);
    assert!(stdout.contains("documents found: 2"), "stdout: {}", stdout);
    assert!(stdout.contains("estimated chunks:"));
}

#[test]
fn test_index_requires_embeddings() {
    let (tmp, config_path) = setup_test_env();

    run_mdrag(&config_path, &["init"]);
    let (stdout, stderr, success) =
        run_mdrag(&config_path, &["index", "--progress", "off"]);
    assert!(!success, "index succeeded without a provider: {}", stdout);
    assert!(stderr.contains("requires embeddings"), "stderr: {}", stderr);
    assert!(!stdout.contains("added:"), "stdout: {}", stdout);

    // Nothing was recorded, so a later run with a provider starts clean.
    let (stdout, _, success) = run_mdrag(&config_path, &["stats", "--json"]);
    assert!(success);
    let json: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(json["total_resources"], 0);
    assert!(tmp.path().join("data/mdrag.sqlite").exists());
}

/// Write one indexed document straight into the database the CLI reads.
fn seed_database(root: &Path) {
    use mdrag_core::models::{Document, IndexedDocument, RagChunk, RawChunk};
    use mdrag_core::store::RagAdminProvider;

    let runtime = tokio::runtime::Runtime::new().unwrap();
    runtime.block_on(async {
        let pool = mdrag::db::connect_path(&root.join("data/mdrag.sqlite"))
            .await
            .unwrap();
        mdrag::migrate::apply(&pool).await.unwrap();
        let store = mdrag::sqlite_store::SqliteStore::new(pool.clone());

        let doc = Document::new("ops/deploy.md", "# Deploy\n\nRun the job.", chrono::Utc::now());
        let chunk = RagChunk::from_raw(
            &doc,
            0,
            RawChunk {
                content: "Run the job.".to_string(),
                heading_path: Some("Deploy".to_string()),
                heading_level: Some(1),
                start_line: 3,
                end_line: 3,
                synthetic_split: false,
            },
            vec![1.0, 0.0],
        );
        let meta = IndexedDocument {
            file_path: doc.file_path.clone(),
            checksum: doc.checksum.clone(),
            chunk_count: 1,
            embedding_model: "seeded".to_string(),
            indexed_at: chrono::Utc::now(),
        };
        store.upsert_chunks(&meta, &[chunk]).await.unwrap();
        pool.close().await;
    });
}

#[test]
fn test_stats_json_and_clear() {
    let (tmp, config_path) = setup_test_env();
    seed_database(tmp.path());

    let (stdout, stderr, success) = run_mdrag(&config_path, &["stats", "--json"]);
    assert!(success, "stats failed: {}", stderr);
    let json: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(json["total_resources"], 1);
    assert_eq!(json["total_chunks"], 1);
    assert_eq!(json["embedding_model"], "seeded");
    assert_eq!(json["documents"][0]["file_path"], "ops/deploy.md");

    let (stdout, _, success) = run_mdrag(&config_path, &["clear"]);
    assert!(success);
    assert!(stdout.contains("cleared 1 chunks from 1 documents"), "stdout: {}", stdout);

    let (stdout, _, _) = run_mdrag(&config_path, &["stats", "--json"]);
    let json: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(json["total_resources"], 0);
}

#[test]
fn test_query_requires_embeddings() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_mdrag(&config_path, &["query", "rollback"]);
    assert!(!success);
    assert!(stderr.contains("require embeddings"), "stderr: {}", stderr);
}

#[test]
fn test_invalid_config_rejected() {
    let (tmp, _config_path) = setup_test_env();
    let bad = tmp.path().join("config/bad.toml");
    fs::write(
        &bad,
        "[db]\npath = \"x.sqlite\"\n[sources]\nroot = \".\"\n[chunking]\npadding_factor = 0.0\n",
    )
    .unwrap();

    let (_, stderr, success) = run_mdrag(&bad, &["stats"]);
    assert!(!success);
    assert!(stderr.contains("padding_factor"), "stderr: {}", stderr);
}
