//! Reminder notifications for a scheduling collaborator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::event::CalendarEvent;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// (Re)schedule reminders for an occurrence that was just written
    Scheduled {
        calendar_id: String,
        external_id: String,
        start: DateTime<Utc>,
        /// Minutes before `start`
        alert_offsets: Vec<i64>,
    },
    /// Drop every reminder for this event
    Cancelled { external_id: String },
}

impl Notification {
    pub fn scheduled(event: &CalendarEvent) -> Self {
        Notification::Scheduled {
            calendar_id: event.calendar_id.clone(),
            external_id: event.external_id.clone(),
            start: event.start,
            alert_offsets: event.alarms.iter().map(|a| a.minutes).collect(),
        }
    }

    pub fn cancelled(external_id: impl Into<String>) -> Self {
        Notification::Cancelled {
            external_id: external_id.into(),
        }
    }
}

/// Sending half handed to the coordinator.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: UnboundedSender<Notification>,
}

impl Notifier {
    pub fn new(tx: UnboundedSender<Notification>) -> Self {
        Notifier { tx }
    }

    pub fn send(&self, notification: Notification) {
        if self.tx.send(notification).is_err() {
            debug!("notification receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Reminder;
    use chrono::TimeZone;
    use tokio::sync::mpsc;

    #[test]
    fn test_scheduled_carries_alert_offsets() {
        let start = Utc.with_ymd_and_hms(2025, 3, 20, 10, 0, 0).unwrap();
        let event = CalendarEvent {
            external_id: "e1".into(),
            calendar_id: "mom".into(),
            title: "Soccer".into(),
            start,
            end: start,
            location: None,
            notes: None,
            is_all_day: false,
            recurrence: None,
            occurrence: None,
            alarms: vec![Reminder { minutes: 10 }, Reminder { minutes: 60 }],
            last_modified: None,
        };

        let Notification::Scheduled { alert_offsets, .. } = Notification::scheduled(&event) else {
            panic!("expected Scheduled");
        };
        assert_eq!(alert_offsets, vec![10, 60]);
    }

    #[test]
    fn test_closed_receiver_is_ignored() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        Notifier::new(tx).send(Notification::cancelled("e1"));
    }
}
