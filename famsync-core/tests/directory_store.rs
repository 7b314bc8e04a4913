//! The coordinator over real calendar directories and a registry file.

use std::sync::Arc;
use std::time::{Duration as StdDuration, SystemTime};

use chrono::{Duration, TimeZone, Utc};
use famsync_core::event::{CalendarInfo, EventDraft};
use famsync_core::recurrence::{Frequency, RecurrenceRule};
use famsync_core::registry::{LinkRegistry, SqliteRegistry};
use famsync_core::store::{CalendarStore, DirectoryCalendarStore};
use famsync_core::sync::{CreateRequest, GroupReport, Propagation, SyncCoordinator, UpdateRequest};
use tempfile::TempDir;

struct Family {
    tmp: TempDir,
    store: Arc<DirectoryCalendarStore>,
    registry: Arc<SqliteRegistry>,
    coordinator: SyncCoordinator,
}

fn family() -> Family {
    let tmp = tempfile::tempdir().expect("failed to create temporary directory");
    let store = Arc::new(DirectoryCalendarStore::new(tmp.path().join("calendars")));
    for name in ["Anna", "Ben"] {
        store
            .create_calendar(&CalendarInfo::new("", name))
            .expect("failed to create calendar directory");
    }
    let registry = Arc::new(
        SqliteRegistry::open(tmp.path().join("links.db")).expect("failed to open registry"),
    );
    let coordinator = SyncCoordinator::new(store.clone(), registry.clone());
    Family {
        tmp,
        store,
        registry,
        coordinator,
    }
}

fn swim() -> EventDraft {
    let start = Utc.with_ymd_and_hms(2025, 3, 20, 10, 0, 0).unwrap();
    EventDraft::new("Swim", start, start + Duration::hours(1))
}

fn id_in(report: &GroupReport, calendar_id: &str) -> String {
    report
        .created_ids()
        .find(|(calendar, _)| *calendar == calendar_id)
        .map(|(_, id)| id.to_string())
        .unwrap()
}

#[tokio::test]
async fn test_linked_copies_are_files_and_links_persist() {
    let f = family();
    let report = f
        .coordinator
        .create(CreateRequest::new(swim(), vec!["anna".into(), "ben".into()]))
        .await
        .unwrap();
    let ben_id = id_in(&report, "ben");

    let ben_file = f.store.root().join("ben").join(format!("{ben_id}.ics"));
    let ics = std::fs::read_to_string(&ben_file).unwrap();
    assert!(ics.contains("SUMMARY:Swim"));

    let reopened = SqliteRegistry::open(f.tmp.path().join("links.db")).unwrap();
    assert_eq!(reopened.get(report.group_id).await.unwrap().len(), 2);
    assert_eq!(
        reopened.group_for(&ben_id).await.unwrap(),
        Some(report.group_id)
    );
}

#[tokio::test]
async fn test_file_touched_by_another_tool_is_flagged() {
    let f = family();
    let report = f
        .coordinator
        .create(CreateRequest::new(swim(), vec!["anna".into(), "ben".into()]))
        .await
        .unwrap();
    let anna_id = id_in(&report, "anna");
    let ben_id = id_in(&report, "ben");

    assert!(
        f.coordinator
            .detect_external_edits("anna", &anna_id)
            .await
            .unwrap()
            .is_empty()
    );

    let ben_file = f.store.root().join("ben").join(format!("{ben_id}.ics"));
    std::fs::File::options()
        .write(true)
        .open(&ben_file)
        .unwrap()
        .set_modified(SystemTime::now() + StdDuration::from_secs(3600))
        .unwrap();

    assert_eq!(
        f.coordinator
            .detect_external_edits("anna", &anna_id)
            .await
            .unwrap(),
        vec!["Ben".to_string()]
    );
}

#[tokio::test]
async fn test_update_rewrites_every_linked_file() {
    let f = family();
    let report = f
        .coordinator
        .create(CreateRequest::new(swim(), vec!["anna".into(), "ben".into()]))
        .await
        .unwrap();
    let anna_id = id_in(&report, "anna");
    let ben_id = id_in(&report, "ben");

    let mut event = f.store.find_event("anna", &anna_id, None).await.unwrap().unwrap();
    event.location = Some("Leisure centre".into());
    f.coordinator
        .update(UpdateRequest::new(event), Propagation::AllLinked)
        .await
        .unwrap();

    let ben = f.store.find_event("ben", &ben_id, None).await.unwrap().unwrap();
    assert_eq!(ben.location.as_deref(), Some("Leisure centre"));
    assert_eq!(f.registry.get(report.group_id).await.unwrap().len(), 2);
    assert!(
        f.coordinator
            .detect_external_edits("anna", &anna_id)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_occurrence_edit_without_overrides_splits_the_series() {
    let f = family();
    let report = f
        .coordinator
        .create(
            CreateRequest::new(swim(), vec!["anna".into()])
                .with_recurrence(RecurrenceRule::new(Frequency::Weekly, 1).with_count(3)),
        )
        .await
        .unwrap();
    let anna_id = id_in(&report, "anna");
    let second = Utc.with_ymd_and_hms(2025, 3, 27, 10, 0, 0).unwrap();

    let mut occurrence = f
        .store
        .find_event("anna", &anna_id, Some(second))
        .await
        .unwrap()
        .unwrap();
    occurrence.location = Some("Lido".into());
    f.coordinator
        .update(UpdateRequest::new(occurrence), Propagation::AllLinked)
        .await
        .unwrap();

    let start = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
    let all = f
        .store
        .events_in_range(&["anna".to_string()], start, start + Duration::days(60))
        .await
        .unwrap();
    let locations: Vec<Option<&str>> = all.iter().map(|e| e.location.as_deref()).collect();
    assert_eq!(locations, [None, Some("Lido"), Some("Lido")]);

    let record = f
        .registry
        .get(report.group_id)
        .await
        .unwrap()
        .pop()
        .unwrap();
    assert_ne!(record.external_event_id, anna_id);
    let series = f
        .store
        .find_event("anna", &record.external_event_id, None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(series.start, second);
}
