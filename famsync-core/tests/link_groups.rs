//! Create, update and delete across link groups.

mod support;

use std::sync::Arc;

use chrono::Duration;
use famsync_core::SyncError;
use famsync_core::notify::Notification;
use famsync_core::recurrence::{Frequency, RecurrenceRule};
use famsync_core::registry::LinkRegistry;
use famsync_core::store::{CalendarStore, Removal, Span};
use famsync_core::sync::{
    CreateRequest, DeleteRequest, DeleteScope, DeleteSpan, GroupState, Propagation,
    SyncCoordinator, TargetApplied, UpdateRequest,
};
use support::{DeleteRefusingRegistry, Harness, at, calendars, created_in, draft};

// ============================================================================
// Create
// ============================================================================

#[tokio::test]
async fn test_create_links_every_copy_in_target_order() {
    let h = Harness::new(&["anna", "ben", "family"]);

    let report = h
        .coordinator
        .create(CreateRequest::new(
            draft("Swim", 10),
            calendars(&["anna", "ben", "family"]),
        ))
        .await
        .unwrap();

    assert_eq!(report.succeeded(), 3);
    let records = h.registry.get(report.group_id).await.unwrap();
    let order: Vec<&str> = records.iter().map(|r| r.calendar_id.as_str()).collect();
    assert_eq!(order, ["anna", "ben", "family"]);
    assert_eq!(h.coordinator.group_state(report.group_id).await.unwrap(), GroupState::Linked);
}

#[tokio::test]
async fn test_partial_failure_reports_every_target() {
    let h = Harness::new(&["a", "b", "c"]);
    h.store.fail_writes_for("b", true);

    let err = h
        .coordinator
        .create(CreateRequest::new(draft("Dentist", 9), calendars(&["a", "b", "c"])))
        .await
        .unwrap_err();

    let report = match err {
        SyncError::PartialGroupFailure { report } => report,
        other => panic!("expected partial failure, got {other}"),
    };
    let outcomes = &report.outcomes;
    let summary: Vec<(&str, bool)> = outcomes
        .iter()
        .map(|o| (o.calendar_id.as_str(), o.is_success()))
        .collect();
    assert_eq!(summary, [("a", true), ("b", false), ("c", true)]);
    assert!(matches!(outcomes[1].result, Err(SyncError::WriteFailed { .. })));

    // Created copies stay and stay linked; nothing is rolled back.
    assert_eq!(h.store.event_count("a"), 1);
    assert_eq!(h.store.event_count("b"), 0);
    assert_eq!(h.store.event_count("c"), 1);
    let Ok(TargetApplied::Created { external_id }) = &outcomes[0].result else {
        panic!("first target should have been created");
    };
    let record = h
        .registry
        .get_by_external_id("a", external_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.group_id, report.group_id);
    assert_eq!(h.registry.get(report.group_id).await.unwrap().len(), 2);
    assert_eq!(report.travel, None);
}

#[tokio::test]
async fn test_single_target_failure_is_its_own_error() {
    let h = Harness::new(&["a"]);
    h.store.remove_calendar("a");

    let err = h
        .coordinator
        .create(CreateRequest::new(draft("Dentist", 9), calendars(&["a"])))
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::CalendarUnavailable(_)));
}

#[tokio::test]
async fn test_invalid_rule_is_rejected_before_any_write() {
    let h = Harness::new(&["a", "b"]);

    let err = h
        .coordinator
        .create(
            CreateRequest::new(draft("Piano", 16), calendars(&["a", "b"]))
                .with_recurrence(RecurrenceRule::new(Frequency::Weekly, 0)),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::InvalidRule(_)));
    assert_eq!(h.store.event_count("a"), 0);
    assert_eq!(h.store.event_count("b"), 0);
}

#[tokio::test]
async fn test_notifications_follow_writes() {
    let store = std::sync::Arc::new(famsync_core::store::InMemoryCalendarStore::with_calendars(
        &["a", "b"],
    ));
    let registry = std::sync::Arc::new(famsync_core::registry::SqliteRegistry::open_in_memory().unwrap());
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let coordinator = SyncCoordinator::new(store, registry).with_notifications(tx);

    let report = coordinator
        .create(CreateRequest::new(
            draft("Swim", 10).with_alarm(15),
            calendars(&["a", "b"]),
        ))
        .await
        .unwrap();
    let a_id = created_in(&report, "a");

    for _ in 0..2 {
        match rx.recv().await.unwrap() {
            Notification::Scheduled {
                start,
                alert_offsets,
                ..
            } => {
                assert_eq!(start, at(10, 0));
                assert_eq!(alert_offsets, vec![15]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    coordinator
        .delete(DeleteRequest::new("a", &a_id).with_scope(DeleteScope::SingleCalendar))
        .await
        .unwrap();
    assert_eq!(rx.recv().await.unwrap(), Notification::cancelled(a_id));
}

// ============================================================================
// Update
// ============================================================================

#[tokio::test]
async fn test_update_propagates_to_all_linked_copies() {
    let h = Harness::new(&["anna", "ben"]);
    let report = h
        .coordinator
        .create(CreateRequest::new(draft("Swim", 10), calendars(&["anna", "ben"])))
        .await
        .unwrap();
    let anna_id = created_in(&report, "anna");
    let ben_id = created_in(&report, "ben");

    let mut event = h.store.find_event("anna", &anna_id, None).await.unwrap().unwrap();
    event.title = "Swim gala".into();
    event.location = Some("Leisure centre".into());
    let updated = h
        .coordinator
        .update(UpdateRequest::new(event), Propagation::AllLinked)
        .await
        .unwrap();

    assert_eq!(updated.succeeded(), 2);
    let ben = h.store.find_event("ben", &ben_id, None).await.unwrap().unwrap();
    assert_eq!(ben.title, "Swim gala");
    assert_eq!(ben.location.as_deref(), Some("Leisure centre"));

    // Our own writes never look like external edits.
    assert!(
        h.coordinator
            .detect_external_edits("anna", &anna_id)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_update_this_calendar_only_leaves_siblings() {
    let h = Harness::new(&["anna", "ben"]);
    let report = h
        .coordinator
        .create(CreateRequest::new(draft("Swim", 10), calendars(&["anna", "ben"])))
        .await
        .unwrap();
    let anna_id = created_in(&report, "anna");
    let ben_id = created_in(&report, "ben");
    let ben_before = h.registry.get_by_external_id("ben", &ben_id).await.unwrap().unwrap();

    let mut event = h.store.find_event("anna", &anna_id, None).await.unwrap().unwrap();
    event.title = "Swim (Anna only)".into();
    let updated = h
        .coordinator
        .update(UpdateRequest::new(event), Propagation::ThisCalendarOnly)
        .await
        .unwrap();

    assert_eq!(updated.outcomes.len(), 1);
    let ben = h.store.find_event("ben", &ben_id, None).await.unwrap().unwrap();
    assert_eq!(ben.title, "Swim");
    let ben_after = h.registry.get_by_external_id("ben", &ben_id).await.unwrap().unwrap();
    assert_eq!(ben_after.last_synced_at, ben_before.last_synced_at);
}

#[tokio::test]
async fn test_external_edit_detection() {
    let h = Harness::new(&["anna", "ben"]);
    let report = h
        .coordinator
        .create(CreateRequest::new(draft("Swim", 10), calendars(&["anna", "ben"])))
        .await
        .unwrap();
    let anna_id = created_in(&report, "anna");
    let ben_id = created_in(&report, "ben");
    let synced = h
        .registry
        .get_by_external_id("ben", &ben_id)
        .await
        .unwrap()
        .unwrap()
        .last_synced_at;

    h.store.touch_externally("ben", &ben_id, synced);
    assert!(
        h.coordinator
            .detect_external_edits("anna", &anna_id)
            .await
            .unwrap()
            .is_empty()
    );

    h.store.touch_externally("ben", &ben_id, synced + Duration::hours(1));
    assert_eq!(
        h.coordinator.detect_external_edits("anna", &anna_id).await.unwrap(),
        vec!["ben".to_string()]
    );
    assert_eq!(
        h.coordinator.group_state(report.group_id).await.unwrap(),
        GroupState::LinkedDivergent
    );
}

#[tokio::test]
async fn test_externally_edited_siblings_are_reported_then_overwritten_on_request() {
    let h = Harness::new(&["anna", "ben"]);
    let report = h
        .coordinator
        .create(CreateRequest::new(draft("Swim", 10), calendars(&["anna", "ben"])))
        .await
        .unwrap();
    let anna_id = created_in(&report, "anna");
    let ben_id = created_in(&report, "ben");
    h.store.touch_externally("ben", &ben_id, at(23, 0));

    let plan = h.coordinator.prepare_update("anna", &anna_id).await.unwrap();
    assert!(plan.is_linked());
    assert!(plan.needs_decision());
    assert_eq!(plan.externally_edited, vec!["ben".to_string()]);

    let mut event = h.store.find_event("anna", &anna_id, None).await.unwrap().unwrap();
    event.title = "Swim gala".into();
    let updated = h
        .coordinator
        .update(UpdateRequest::new(event), Propagation::AllLinked)
        .await
        .unwrap();

    assert_eq!(updated.externally_edited, vec!["ben".to_string()]);
    assert_eq!(
        h.coordinator.group_state(report.group_id).await.unwrap(),
        GroupState::Linked
    );
}

#[tokio::test]
async fn test_update_with_missing_sibling_orphans_it() {
    let h = Harness::new(&["anna", "ben"]);
    let report = h
        .coordinator
        .create(CreateRequest::new(draft("Swim", 10), calendars(&["anna", "ben"])))
        .await
        .unwrap();
    let anna_id = created_in(&report, "anna");
    let ben_id = created_in(&report, "ben");
    h.store.delete_externally("ben", &ben_id);

    let mut event = h.store.find_event("anna", &anna_id, None).await.unwrap().unwrap();
    event.title = "Swim gala".into();
    let err = h
        .coordinator
        .update(UpdateRequest::new(event), Propagation::AllLinked)
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::PartialGroupFailure { .. }));
    assert_eq!(
        h.coordinator.group_state(report.group_id).await.unwrap(),
        GroupState::PartiallyDeleted
    );
}

#[tokio::test]
async fn test_occurrence_edit_overrides_only_that_occurrence() {
    let h = Harness::new(&["anna"]);
    let report = h
        .coordinator
        .create(
            CreateRequest::new(draft("Piano", 16), calendars(&["anna"]))
                .with_recurrence(RecurrenceRule::new(Frequency::Weekly, 1).with_count(4)),
        )
        .await
        .unwrap();
    let id = created_in(&report, "anna");
    let second = at(16, 0) + Duration::weeks(1);

    let mut occurrence = h
        .store
        .find_event("anna", &id, Some(second))
        .await
        .unwrap()
        .unwrap();
    occurrence.location = Some("Studio B".into());
    h.coordinator
        .update(UpdateRequest::new(occurrence), Propagation::AllLinked)
        .await
        .unwrap();

    let all = h
        .store
        .events_in_range(&calendars(&["anna"]), at(0, 0), at(0, 0) + Duration::weeks(5))
        .await
        .unwrap();
    let locations: Vec<Option<&str>> = all.iter().map(|e| e.location.as_deref()).collect();
    assert_eq!(locations, [None, Some("Studio B"), None, None]);
}

#[tokio::test]
async fn test_future_edit_from_later_occurrence_keeps_earlier_ones() {
    let h = Harness::new(&["anna", "ben"]);
    let report = h
        .coordinator
        .create(
            CreateRequest::new(draft("Piano", 16), calendars(&["anna", "ben"]))
                .with_recurrence(RecurrenceRule::new(Frequency::Weekly, 1).with_count(4)),
        )
        .await
        .unwrap();
    let anna_id = created_in(&report, "anna");
    let third = at(16, 0) + Duration::weeks(2);

    let mut occurrence = h
        .store
        .find_event("anna", &anna_id, Some(third))
        .await
        .unwrap()
        .unwrap();
    occurrence.title = "Piano with Ms Lee".into();
    h.coordinator
        .update(
            UpdateRequest::new(occurrence).with_span(Span::FutureEvents),
            Propagation::AllLinked,
        )
        .await
        .unwrap();

    for calendar in ["anna", "ben"] {
        let titles: Vec<String> = h
            .store
            .events_in_range(&calendars(&[calendar]), at(0, 0), at(0, 0) + Duration::weeks(6))
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.title)
            .collect();
        assert_eq!(
            titles,
            ["Piano", "Piano", "Piano with Ms Lee", "Piano with Ms Lee"],
            "titles in {calendar}"
        );
    }

    // The group now follows the series that holds the edited occurrence.
    let records = h.registry.get(report.group_id).await.unwrap();
    assert_eq!(records.len(), 2);
    for record in &records {
        let series = h
            .store
            .find_event(&record.calendar_id, &record.external_event_id, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(series.start, third);
        assert_eq!(series.title, "Piano with Ms Lee");
    }
    assert_eq!(h.coordinator.group_state(report.group_id).await.unwrap(), GroupState::Linked);
}

// ============================================================================
// Delete
// ============================================================================

#[tokio::test]
async fn test_linked_delete_requires_scope() {
    let h = Harness::new(&["anna", "ben"]);
    let report = h
        .coordinator
        .create(CreateRequest::new(draft("Swim", 10), calendars(&["anna", "ben"])))
        .await
        .unwrap();
    let anna_id = created_in(&report, "anna");

    let options = h.coordinator.delete_options("anna", &anna_id).await.unwrap();
    assert!(options.needs_scope);
    assert!(!options.needs_span);
    assert_eq!(options.linked_calendars, calendars(&["anna", "ben"]));

    let err = h
        .coordinator
        .delete(DeleteRequest::new("anna", &anna_id))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::ScopeRequired("scope")));
    assert_eq!(h.store.event_count("anna"), 1);
}

#[tokio::test]
async fn test_recurring_delete_requires_span() {
    let h = Harness::new(&["anna"]);
    let report = h
        .coordinator
        .create(
            CreateRequest::new(draft("Piano", 16), calendars(&["anna"]))
                .with_recurrence(RecurrenceRule::new(Frequency::Weekly, 1)),
        )
        .await
        .unwrap();
    let id = created_in(&report, "anna");

    let err = h
        .coordinator
        .delete(DeleteRequest::new("anna", &id))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::ScopeRequired("span")));
}

#[tokio::test]
async fn test_all_linked_delete_twice_leaves_no_records() {
    let h = Harness::new(&["anna", "ben"]);
    let report = h
        .coordinator
        .create(CreateRequest::new(draft("Swim", 10), calendars(&["anna", "ben"])))
        .await
        .unwrap();
    let anna_id = created_in(&report, "anna");
    let request = DeleteRequest::new("anna", &anna_id).with_scope(DeleteScope::AllLinked);

    let first = h.coordinator.delete(request.clone()).await.unwrap();
    assert_eq!(first.succeeded(), 2);

    let second = h.coordinator.delete(request).await.unwrap();
    assert!(matches!(second.outcomes[0].result, Ok(TargetApplied::AlreadyGone)));

    assert!(h.registry.get(report.group_id).await.unwrap().is_empty());
    assert_eq!(h.coordinator.group_state(report.group_id).await.unwrap(), GroupState::Gone);
}

#[tokio::test]
async fn test_all_linked_delete_treats_externally_deleted_copy_as_done() {
    let h = Harness::new(&["anna", "ben"]);
    let report = h
        .coordinator
        .create(CreateRequest::new(draft("Swim", 10), calendars(&["anna", "ben"])))
        .await
        .unwrap();
    let anna_id = created_in(&report, "anna");
    let ben_id = created_in(&report, "ben");
    h.store.delete_externally("ben", &ben_id);

    let deleted = h
        .coordinator
        .delete(DeleteRequest::new("anna", &anna_id).with_scope(DeleteScope::AllLinked))
        .await
        .unwrap();

    let applied: Vec<&TargetApplied> = deleted
        .outcomes
        .iter()
        .filter_map(|o| o.result.as_ref().ok())
        .collect();
    assert_eq!(
        applied,
        [
            &TargetApplied::Deleted(Removal::Event),
            &TargetApplied::AlreadyGone
        ]
    );
    assert!(h.registry.get(report.group_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_single_calendar_delete_keeps_sibling() {
    let h = Harness::new(&["anna", "ben"]);
    let report = h
        .coordinator
        .create(CreateRequest::new(draft("Swim", 10), calendars(&["anna", "ben"])))
        .await
        .unwrap();
    let anna_id = created_in(&report, "anna");

    h.coordinator
        .delete(DeleteRequest::new("anna", &anna_id).with_scope(DeleteScope::SingleCalendar))
        .await
        .unwrap();

    assert_eq!(h.store.event_count("anna"), 0);
    assert_eq!(h.store.event_count("ben"), 1);
    assert_eq!(
        h.coordinator.group_state(report.group_id).await.unwrap(),
        GroupState::Unlinked
    );
}

#[tokio::test]
async fn test_failed_copy_is_orphaned_and_delete_still_succeeds() {
    let h = Harness::new(&["anna", "ben"]);
    let report = h
        .coordinator
        .create(CreateRequest::new(draft("Swim", 10), calendars(&["anna", "ben"])))
        .await
        .unwrap();
    let anna_id = created_in(&report, "anna");
    h.store.fail_writes_for("ben", true);

    let deleted = h
        .coordinator
        .delete(DeleteRequest::new("anna", &anna_id).with_scope(DeleteScope::AllLinked))
        .await
        .unwrap();

    assert_eq!(deleted.failures().count(), 1);
    assert_eq!(
        h.coordinator.group_state(report.group_id).await.unwrap(),
        GroupState::PartiallyDeleted
    );
}

#[tokio::test]
async fn test_all_targets_failing_is_group_failure() {
    let h = Harness::new(&["anna", "ben"]);
    let report = h
        .coordinator
        .create(CreateRequest::new(draft("Swim", 10), calendars(&["anna", "ben"])))
        .await
        .unwrap();
    let anna_id = created_in(&report, "anna");
    h.store.fail_writes_for("anna", true);
    h.store.fail_writes_for("ben", true);

    let err = h
        .coordinator
        .delete(DeleteRequest::new("anna", &anna_id).with_scope(DeleteScope::AllLinked))
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::GroupFailed { .. }));
}

#[tokio::test]
async fn test_occurrence_delete_keeps_series_linked() {
    let h = Harness::new(&["anna", "ben"]);
    let report = h
        .coordinator
        .create(
            CreateRequest::new(draft("Piano", 16), calendars(&["anna", "ben"]))
                .with_recurrence(RecurrenceRule::new(Frequency::Weekly, 1).with_count(4)),
        )
        .await
        .unwrap();
    let anna_id = created_in(&report, "anna");

    h.coordinator
        .delete(
            DeleteRequest::new("anna", &anna_id)
                .at_occurrence(at(16, 0) + Duration::weeks(1))
                .with_span(DeleteSpan::ThisOccurrence)
                .with_scope(DeleteScope::AllLinked),
        )
        .await
        .unwrap();

    assert_eq!(h.registry.get(report.group_id).await.unwrap().len(), 2);
    let remaining = h
        .store
        .events_in_range(
            &calendars(&["anna", "ben"]),
            at(0, 0),
            at(0, 0) + Duration::weeks(5),
        )
        .await
        .unwrap();
    assert_eq!(remaining.len(), 6);
    assert_eq!(
        h.coordinator.group_state(report.group_id).await.unwrap(),
        GroupState::Linked
    );
}

#[tokio::test]
async fn test_this_and_future_from_first_occurrence_removes_series() {
    let h = Harness::new(&["anna"]);
    let report = h
        .coordinator
        .create(
            CreateRequest::new(draft("Piano", 16), calendars(&["anna"]))
                .with_recurrence(RecurrenceRule::new(Frequency::Weekly, 1)),
        )
        .await
        .unwrap();
    let id = created_in(&report, "anna");

    let deleted = h
        .coordinator
        .delete(
            DeleteRequest::new("anna", &id)
                .at_occurrence(at(16, 0))
                .with_span(DeleteSpan::ThisAndFuture),
        )
        .await
        .unwrap();

    assert!(matches!(
        deleted.outcomes[0].result,
        Ok(TargetApplied::Deleted(Removal::Event))
    ));
    assert_eq!(h.store.event_count("anna"), 0);
    assert_eq!(h.coordinator.group_state(report.group_id).await.unwrap(), GroupState::Gone);
}

#[tokio::test]
async fn test_removed_copy_counts_when_registry_delete_fails() {
    let h = Harness::new(&["anna"]);
    let report = h
        .coordinator
        .create(CreateRequest::new(draft("Swim", 10), calendars(&["anna"])))
        .await
        .unwrap();
    let anna_id = created_in(&report, "anna");
    let coordinator = SyncCoordinator::new(
        h.store.clone(),
        Arc::new(DeleteRefusingRegistry {
            inner: h.registry.clone(),
        }),
    );

    let deleted = coordinator
        .delete(DeleteRequest::new("anna", &anna_id))
        .await
        .unwrap();

    assert_eq!(h.store.event_count("anna"), 0);
    let outcome = &deleted.outcomes[0];
    assert!(matches!(outcome.result, Ok(TargetApplied::Deleted(Removal::Event))));
    assert!(matches!(outcome.registry_error, Some(SyncError::StaleLink { .. })));
    assert_eq!(deleted.registry_errors().count(), 1);

    let record = h
        .registry
        .get_by_external_id("anna", &anna_id)
        .await
        .unwrap()
        .unwrap();
    assert!(record.is_orphaned());
}
