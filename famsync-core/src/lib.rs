//! Engine for keeping family members' calendar copies of one event linked.
//!
//! - `recurrence` expands simple rules into occurrences
//! - `sync` creates, updates and deletes link groups across calendars
//! - `grouping` merges per-attendee copies into display events
//! - `refresh` runs cancellable read-and-regroup passes

pub mod config;
pub mod driver;
pub mod error;
pub mod event;
pub mod grouping;
mod ics;
pub mod notify;
pub mod recurrence;
pub mod refresh;
pub mod registry;
pub mod store;
pub mod sync;

pub use error::{SyncError, SyncResult};
pub use event::{CalendarEvent, CalendarInfo, EventDraft, Reminder};
pub use recurrence::{Frequency, RecurrenceEnd, RecurrenceRule};
pub use sync::SyncCoordinator;
