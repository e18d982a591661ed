//! Release store semantics through the `ReleaseStore` trait

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use releaser::models::release::{ReleaseRecord, UploadResult};
use releaser::store::{MemoryReleaseStore, ReleaseStore};

use common::request;

fn record_for(name: &str, code: u32, notes: &str) -> ReleaseRecord {
    let dir = tempfile::tempdir().unwrap();
    let mut req = request(dir.path(), name, code);
    req.release_notes = notes.to_string();
    let upload = UploadResult {
        remote_path: format!("/srv/updates/android-{}-{}.apk", name, code),
        bytes: 9,
        elapsed: Duration::from_millis(5),
    };
    ReleaseRecord::from_request(&req, &upload, Utc::now())
}

#[tokio::test]
async fn test_upsert_same_code_keeps_one_row() {
    let memory = Arc::new(MemoryReleaseStore::new());
    let store: Arc<dyn ReleaseStore> = memory.clone();

    store.upsert_release(&record_for("1.2.3", 7, "first")).await.unwrap();
    store.upsert_release(&record_for("1.2.3", 7, "second")).await.unwrap();

    let rows = memory.rows().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].record.release_notes, "second");
}

#[tokio::test]
async fn test_version_name_change_deactivates_old_rows() {
    let memory = Arc::new(MemoryReleaseStore::new());
    let store: Arc<dyn ReleaseStore> = memory.clone();

    store.upsert_release(&record_for("1.0.0", 1, "")).await.unwrap();
    store.upsert_release(&record_for("1.0.0", 2, "")).await.unwrap();
    let summary = store.upsert_release(&record_for("2.0.0", 3, "")).await.unwrap();
    assert_eq!(summary.deactivated, 2);

    let rows = memory.rows().await;
    let active: Vec<_> = rows.iter().filter(|r| r.is_active).collect();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].record.version_name, "2.0.0");
}

#[tokio::test]
async fn test_record_mapping() {
    let record = record_for("1.2.3", 7, "Bug fixes");
    assert_eq!(record.platform, "android");
    assert_eq!(record.version_code, 7);
    assert_eq!(record.package_path, "/srv/updates/android-1.2.3-7.apk");
    assert_eq!(record.build_platform, "Linux");
    assert!(!record.is_mandatory);
    assert!(record.validate().is_ok());
}
