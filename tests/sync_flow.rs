//! End-to-end sync scenarios against the in-memory remote.

use filetime::FileTime;
use modelsync::core::{ComponentState, LocalTreeScanner, ModelSyncer, ProceedPolicy, UploadOptions};
use modelsync::storage::MemoryRepository;
use modelsync::SyncError;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

const BASE: &str = "/models";

fn write_file(root: &Path, rel: &str, body: &str, mtime: i64) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, body).unwrap();
    filetime::set_file_mtime(&path, FileTime::from_unix_time(mtime, 0)).unwrap();
}

fn models(entries: &[(&str, Option<u32>)]) -> BTreeMap<String, Option<u32>> {
    entries.iter().map(|(n, v)| (n.to_string(), *v)).collect()
}

async fn open(repo: &Arc<MemoryRepository>) -> ModelSyncer {
    ModelSyncer::open(repo.clone(), BASE).await.unwrap()
}

#[tokio::test]
async fn upload_then_download_reproduces_tree() {
    let src = TempDir::new().unwrap();
    write_file(src.path(), "bert/weights.bin", "weights", 1_600_000_000);
    write_file(src.path(), "bert/vocab/words.txt", "words", 1_600_000_123);
    write_file(src.path(), "tfidf/matrix.npz", "matrix", 1_650_000_000);

    let repo = Arc::new(MemoryRepository::new());
    let syncer = open(&repo).await;
    let requested = models(&[("bert", Some(1)), ("tfidf", Some(4))]);

    let report = syncer
        .upload_models(src.path(), &requested, &UploadOptions::default())
        .await
        .unwrap();
    assert!(report.is_synced());
    assert_eq!(report.files_transferred(), 3);

    let dst = TempDir::new().unwrap();
    let report = syncer
        .download_models(dst.path(), &requested, false)
        .await
        .unwrap();
    assert!(report.is_synced());

    let scanner = LocalTreeScanner::new();
    for component in ["bert", "tfidf"] {
        assert_eq!(
            scanner.scan(&dst.path().join(component)).unwrap(),
            scanner.scan(&src.path().join(component)).unwrap()
        );
    }
    assert_eq!(
        fs::read_to_string(dst.path().join("bert/vocab/words.txt")).unwrap(),
        "words"
    );
}

#[tokio::test]
async fn missing_remote_version_leaves_local_untouched() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "bert/local.bin", "mine", 1_600_000_000);

    let repo = Arc::new(MemoryRepository::new());
    let syncer = open(&repo).await;

    let err = syncer
        .download_models(dir.path(), &models(&[("bert", Some(3))]), true)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SyncError::ModelNotExistant { ref component, version: 3 } if component == "bert"
    ));
    assert_eq!(fs::read_to_string(dir.path().join("bert/local.bin")).unwrap(), "mine");
}

#[tokio::test]
async fn existing_version_is_not_overwritten_without_authorization() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "bert/weights.bin", "v1", 1_600_000_000);

    let repo = Arc::new(MemoryRepository::new());
    let syncer = open(&repo).await;
    let requested = models(&[("bert", Some(1))]);
    syncer
        .upload_models(dir.path(), &requested, &UploadOptions::default())
        .await
        .unwrap();
    let before: Vec<_> = repo
        .file_paths()
        .into_iter()
        .map(|p| (p.clone(), repo.file(&p)))
        .collect();

    write_file(dir.path(), "bert/weights.bin", "v1-retrained", 1_600_000_500);
    let err = syncer
        .upload_models(dir.path(), &requested, &UploadOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::VersionConflict { version: 1, .. }));

    let after: Vec<_> = repo
        .file_paths()
        .into_iter()
        .map(|p| (p.clone(), repo.file(&p)))
        .collect();
    assert_eq!(before, after);

    let options = UploadOptions {
        overwrite: true,
        ..Default::default()
    };
    let report = syncer
        .upload_models(dir.path(), &requested, &options)
        .await
        .unwrap();
    assert_eq!(report.outcome("bert").unwrap().state, ComponentState::Synced);
    assert_eq!(
        repo.file("/models/bert/1/weights.bin").unwrap(),
        b"v1-retrained"
    );
}

#[tokio::test]
async fn non_ascii_names_are_transliterated_before_upload() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "bert/café.txt", "menu", 1_600_000_000);

    let scanner = LocalTreeScanner::new();
    assert!(matches!(
        scanner.scan(&dir.path().join("bert")),
        Err(SyncError::Encoding { .. })
    ));

    let repo = Arc::new(MemoryRepository::new());
    let syncer = open(&repo).await;
    let report = syncer
        .upload_models(dir.path(), &models(&[("bert", Some(1))]), &UploadOptions::default())
        .await
        .unwrap();

    let outcome = report.outcome("bert").unwrap();
    assert_eq!(outcome.renamed.len(), 1);
    assert_eq!(outcome.renamed[0].to, "cafe.txt");
    assert!(dir.path().join("bert/cafe.txt").exists());
    assert!(repo.file("/models/bert/1/cafe.txt").is_some());

    let ledger = String::from_utf8(repo.file("/models/bert/1/last_changes.txt").unwrap()).unwrap();
    assert_eq!(ledger, "cafe.txt: 2020-09-13 12:26:40");
}

#[tokio::test]
async fn interrupted_upload_resumes_without_resending() {
    let dir = TempDir::new().unwrap();
    for (i, name) in ["a.bin", "b.bin", "c.bin", "d.bin"].iter().enumerate() {
        write_file(dir.path(), &format!("bert/{}", name), name, 1_600_000_000 + i as i64);
    }

    let repo = Arc::new(MemoryRepository::new());
    let syncer = open(&repo).await;
    let requested = models(&[("bert", Some(1))]);

    repo.fail_writes_after(Some(2));
    let err = syncer
        .upload_models(dir.path(), &requested, &UploadOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Connectivity(_)));
    assert!(repo.file("/models/bert/1/last_changes.txt").is_none());
    assert!(repo.file("/models/bert/1/b.bin").is_some());

    repo.fail_writes_after(None);
    let report = syncer
        .upload_models(dir.path(), &requested, &UploadOptions::default())
        .await
        .unwrap();

    let outcome = report.outcome("bert").unwrap();
    assert_eq!(
        outcome.transferred.iter().map(String::as_str).collect::<Vec<_>>(),
        vec!["c.bin", "d.bin"]
    );
    // two files plus the ledger
    assert_eq!(repo.write_count(), 3);
    assert!(repo.file("/models/bert/1/last_changes.txt").is_some());
}

#[tokio::test]
async fn unrecoverable_deletion_aborts_by_default() {
    let src = TempDir::new().unwrap();
    write_file(src.path(), "bert/weights.bin", "w", 1_600_000_000);

    let repo = Arc::new(MemoryRepository::new());
    let syncer = open(&repo).await;
    let requested = models(&[("bert", Some(1))]);
    syncer
        .upload_models(src.path(), &requested, &UploadOptions::default())
        .await
        .unwrap();

    let dst = TempDir::new().unwrap();
    syncer.download_models(dst.path(), &requested, false).await.unwrap();
    write_file(dst.path(), "bert/notes.txt", "unsaved work", 1_700_000_000);

    let report = syncer.download_models(dst.path(), &requested, false).await.unwrap();
    assert_eq!(report.outcome("bert").unwrap().state, ComponentState::Aborted);
    assert!(dst.path().join("bert/notes.txt").exists());

    let syncer = open(&repo).await.with_policy(ProceedPolicy);
    let report = syncer.download_models(dst.path(), &requested, false).await.unwrap();
    let outcome = report.outcome("bert").unwrap();
    assert_eq!(outcome.state, ComponentState::Synced);
    assert!(outcome.deleted.contains("notes.txt"));
    assert!(!dst.path().join("bert/notes.txt").exists());
}

#[tokio::test]
async fn check_reports_without_downloading() {
    let src = TempDir::new().unwrap();
    write_file(src.path(), "bert/weights.bin", "w", 1_600_000_000);

    let repo = Arc::new(MemoryRepository::new());
    let syncer = open(&repo).await;
    let requested = models(&[("bert", Some(1)), ("tfidf", None)]);
    syncer
        .upload_models(src.path(), &requested, &UploadOptions::default())
        .await
        .unwrap();

    let dst = TempDir::new().unwrap();
    let report = syncer.check_updates(dst.path(), &requested).await.unwrap();

    assert!(!report.is_synced());
    assert_eq!(report.outcome("bert").unwrap().pending.len(), 1);
    assert_eq!(report.outcome("tfidf").unwrap().state, ComponentState::Skipped);
    assert!(!dst.path().join("bert").exists());
}

#[tokio::test]
async fn forced_download_discards_unrecoverable_files() {
    let src = TempDir::new().unwrap();
    write_file(src.path(), "bert/weights.bin", "w", 1_600_000_000);

    let repo = Arc::new(MemoryRepository::new());
    let syncer = open(&repo).await;
    let requested = models(&[("bert", Some(1))]);
    syncer
        .upload_models(src.path(), &requested, &UploadOptions::default())
        .await
        .unwrap();

    let dst = TempDir::new().unwrap();
    write_file(dst.path(), "bert/notes.txt", "unsaved work", 1_700_000_000);
    write_file(dst.path(), "bert/scratch/tmp.bin", "t", 1_700_000_001);

    let report = syncer.download_models(dst.path(), &requested, true).await.unwrap();

    let outcome = report.outcome("bert").unwrap();
    assert_eq!(outcome.state, ComponentState::Synced);
    assert_eq!(outcome.deleted.len(), 2);
    assert!(!dst.path().join("bert/notes.txt").exists());
    assert!(!dst.path().join("bert/scratch").exists());
    assert_eq!(fs::read_to_string(dst.path().join("bert/weights.bin")).unwrap(), "w");
}
