//! End-to-End Test Suite: undo log as wired into a host application
//!
//! Covers configuration loading from a TOML file, service discovery through
//! the shared registry, and a batch workflow a file organizer would drive.

use std::sync::Arc;

use ena_common::di::{list_discovered_factories, ServiceEntry};
use ena_undo::{OperationType, UndoConfig, UndoManager};
use tempfile::TempDir;
use tokio::fs;

#[test]
fn test_undo_services_are_discoverable() {
    // Referencing the crate keeps its registration linked in.
    let _ = std::any::type_name::<UndoManager>();
    assert!(list_discovered_factories().contains(&"undo"));
}

#[test]
fn test_manager_handle_resolves_from_entry() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let manager = UndoManager::open(UndoConfig::rooted_at(temp_dir.path())).unwrap();

    let entry = ServiceEntry::new::<UndoManager>(Arc::new(manager));
    let resolved = entry.downcast::<UndoManager>().expect("manager entry");
    assert!(resolved.get_history().is_empty());
}

#[tokio::test]
async fn test_config_file_drives_manager() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let root = temp_dir.path();
    let config_path = root.join("undo.toml");
    let history = root.join("state").join("history.json");
    let backups = root.join("state").join("backups");
    fs::write(
        &config_path,
        format!(
            "history_file = {:?}\nbackup_dir = {:?}\nmax_snapshot_bytes = 4\n",
            history.to_string_lossy(),
            backups.to_string_lossy()
        ),
    )
    .await
    .unwrap();

    let config = UndoConfig::load(Some(&config_path)).unwrap();
    assert_eq!(config.history_file, history);
    assert_eq!(config.max_snapshot_bytes, 4);

    let manager = UndoManager::open(config).unwrap();
    let notes = root.join("notes.txt");
    fs::write(&notes, "longer than four bytes").await.unwrap();
    let op_id = manager
        .track_operation(OperationType::Update, &notes, None)
        .await
        .unwrap();

    let op = manager.current_session().unwrap().operations[0].clone();
    assert_eq!(op.id, op_id);
    assert!(op.content_snapshot.is_none());
    assert!(op.backup_path.unwrap().starts_with(&backups));
    assert!(history.exists());
}

/// Organizer moves a batch of downloads into folders, user asks to undo it all.
#[tokio::test]
async fn test_organizer_batch_is_undone_as_a_session() {
    let _ = ena_common::logging::init_tracing_with("ena_undo=debug");
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let root = temp_dir.path();
    let manager = UndoManager::open(UndoConfig::rooted_at(root)).unwrap();
    let downloads = root.join("downloads");
    fs::create_dir_all(&downloads).await.unwrap();

    let files = ["a.jpg", "b.png", "report.pdf", "old.tmp"];
    for name in files {
        fs::write(downloads.join(name), name).await.unwrap();
    }

    let session = manager
        .start_session("organize downloads", "sort by extension, drop temp files")
        .await
        .unwrap();

    for name in ["a.jpg", "b.png"] {
        let src = downloads.join(name);
        let dst = downloads.join("images").join(name);
        manager
            .track_operation(OperationType::Move, &src, Some(&dst))
            .await
            .unwrap();
        fs::create_dir_all(dst.parent().unwrap()).await.unwrap();
        fs::rename(&src, &dst).await.unwrap();
    }
    let src = downloads.join("report.pdf");
    let dst = downloads.join("docs").join("report.pdf");
    manager
        .track_operation(OperationType::Copy, &src, Some(&dst))
        .await
        .unwrap();
    fs::create_dir_all(dst.parent().unwrap()).await.unwrap();
    fs::copy(&src, &dst).await.unwrap();
    let tmp = downloads.join("old.tmp");
    manager
        .track_operation(OperationType::Delete, &tmp, None)
        .await
        .unwrap();
    fs::remove_file(&tmp).await.unwrap();
    manager.end_session();

    manager.undo_session(&session.id).await.unwrap();

    for name in files {
        assert_eq!(
            fs::read_to_string(downloads.join(name)).await.unwrap(),
            name
        );
    }
    assert!(!downloads.join("docs").join("report.pdf").exists());
    assert!(!downloads.join("images").join("a.jpg").exists());

    let stats = manager.stats();
    assert_eq!(stats.operations, 4);
    assert_eq!(stats.undone_operations, 4);
}
