use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use moodwatch_lib::{
    cli::{export_record, recover_interrupted, write_artifact},
    models::{SessionRecord, SessionStatus},
    readings::{summarize, XLSX_MIME},
    sensing::{DemoClassifier, SyntheticSource},
    Database, MonitorController, MonitorSettings, SessionRequest,
};
use tempfile::tempdir;

fn settings() -> MonitorSettings {
    MonitorSettings {
        tick_interval_ms: 10,
        ..MonitorSettings::default()
    }
}

#[tokio::test]
async fn finished_session_can_be_exported_from_the_archive() {
    let dir = tempdir().unwrap();
    let db = Database::new(dir.path().join("moodwatch.sqlite3")).unwrap();
    let monitor = MonitorController::new(db.clone(), settings());

    monitor
        .start(
            SessionRequest {
                subject_id: "P 12/345".into(),
                duration: Duration::from_millis(300),
                interval: Duration::from_millis(30),
            },
            Box::new(SyntheticSource::new(32, 24, 120)),
            Arc::new(DemoClassifier::new(9)),
        )
        .await
        .unwrap();

    let record = monitor.wait_finished().await.unwrap();
    assert_eq!(record.status, SessionStatus::Completed);

    let live = monitor.export().await.unwrap().unwrap();
    let archived = export_record(&db, &record).await.unwrap().unwrap();
    assert_eq!(archived.mime, XLSX_MIME);
    assert!(archived.filename.starts_with("subject_P_12_345_emotions_"));
    assert!(archived.filename.ends_with(".xlsx"));
    assert_eq!(live.filename.len(), archived.filename.len());

    let stored = db.get_readings_for_session(&record.id).await.unwrap();
    assert_eq!(summarize(&stored), monitor.summary().await);

    let out = dir.path().join("exports");
    let path = write_artifact(&archived, &out).unwrap();
    let bytes = std::fs::read(path).unwrap();
    // xlsx is a zip container
    assert_eq!(&bytes[..2], b"PK");
}

#[tokio::test]
async fn crashed_sessions_are_marked_interrupted() {
    let dir = tempdir().unwrap();
    let db = Database::new(dir.path().join("moodwatch.sqlite3")).unwrap();
    let now = Utc::now();
    db.insert_session(&SessionRecord {
        id: "left-running".into(),
        subject_id: "P1".into(),
        started_at: now,
        ended_at: None,
        status: SessionStatus::Running,
        duration_ms: 300_000,
        interval_ms: 2_000,
        reading_count: 0,
        end_reason: None,
        created_at: now,
        updated_at: now,
    })
    .await
    .unwrap();

    assert_eq!(recover_interrupted(&db).await.unwrap(), 1);
    assert_eq!(recover_interrupted(&db).await.unwrap(), 0);

    let stored = db.get_session("left-running").await.unwrap().unwrap();
    assert_eq!(stored.status, SessionStatus::Stopped);
    assert_eq!(stored.end_reason.as_deref(), Some("interrupted"));
    assert!(export_record(&db, &stored).await.unwrap().is_none());
}
