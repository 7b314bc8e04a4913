//! Error types for the famsync engine.

use thiserror::Error;

use crate::sync::GroupReport;

/// Errors that can occur in famsync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Invalid recurrence rule: {0}")]
    InvalidRule(String),

    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    #[error("Calendar unavailable: {0}")]
    CalendarUnavailable(String),

    #[error("Event '{external_id}' not found in calendar '{calendar_id}'")]
    EventNotFound {
        calendar_id: String,
        external_id: String,
    },

    #[error("Write to calendar '{calendar_id}' failed: {reason}")]
    WriteFailed { calendar_id: String, reason: String },

    /// Advisory, never a failure: these calendars were edited outside famsync.
    #[error("Edited elsewhere: {}", .calendars.join(", "))]
    ExternallyEdited { calendars: Vec<String> },

    #[error("{} of {} calendar targets succeeded", .report.succeeded(), .report.outcomes.len())]
    PartialGroupFailure { report: Box<GroupReport> },

    #[error("All {} calendar targets failed", .report.outcomes.len())]
    GroupFailed { report: Box<GroupReport> },

    #[error("Explicit {0} selection required")]
    ScopeRequired(&'static str),

    #[error("Calendar '{calendar_id}' already holds a copy of group {group_id}")]
    DuplicateLink {
        group_id: uuid::Uuid,
        calendar_id: String,
    },

    #[error("Event exists in calendar '{calendar_id}' but is unlinked: {reason}")]
    Unlinked { calendar_id: String, reason: String },

    #[error("Event removed from calendar '{calendar_id}' but its link remains: {reason}")]
    StaleLink { calendar_id: String, reason: String },

    #[error("Link registry error: {0}")]
    Registry(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("ICS parse error: {0}")]
    IcsParse(String),

    #[error("ICS generation error: {0}")]
    IcsGenerate(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Whether repeating the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::WriteFailed { .. } | SyncError::Registry(_) | SyncError::Io(_)
        )
    }

    /// The report carried by aggregate group errors.
    pub fn report(&self) -> Option<&GroupReport> {
        match self {
            SyncError::PartialGroupFailure { report } | SyncError::GroupFailed { report } => {
                Some(&**report)
            }
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for SyncError {
    fn from(err: rusqlite::Error) -> Self {
        SyncError::Registry(err.to_string())
    }
}

impl From<tokio::task::JoinError> for SyncError {
    fn from(err: tokio::task::JoinError) -> Self {
        SyncError::Registry(format!("registry task failed: {err}"))
    }
}

/// Result type alias for famsync operations.
pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_and_storage_failures_are_retryable() {
        let write = SyncError::WriteFailed {
            calendar_id: "anna".into(),
            reason: "disk full".into(),
        };
        assert!(write.is_retryable());
        assert!(SyncError::Registry("locked".into()).is_retryable());
        assert!(!SyncError::InvalidRule("COUNT=0".into()).is_retryable());
        assert!(!SyncError::ScopeRequired("span").is_retryable());
    }

    #[test]
    fn test_group_failed_exposes_report() {
        let report = GroupReport::new(uuid::Uuid::new_v4());
        let group_id = report.group_id;
        let err = SyncError::GroupFailed {
            report: Box::new(report),
        };
        assert_eq!(err.report().map(|r| r.group_id), Some(group_id));
        assert!(SyncError::Config("bad".into()).report().is_none());
    }
}
