//! Read-and-regroup passes over the calendar store.
//!
//! A reload holds the coordinator's write gate shared, so it never observes
//! a half-finished group operation. Every reload gets a generation number
//! when it starts; a snapshot is only published if nothing newer has been
//! published first.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::SyncResult;
use crate::grouping::{self, AggregatedEvent, AttendeeTag, DEFAULT_COLOR, DriverNames, RawOccurrence};
use crate::registry::{FamilyDirectory, LinkRegistry};
use crate::store::CalendarStore;

/// One published, grouped view of a date range.
#[derive(Debug, Clone)]
pub struct ViewSnapshot {
    pub generation: u64,
    pub range: Range<DateTime<Utc>>,
    pub events: Vec<AggregatedEvent>,
    pub loaded_at: DateTime<Utc>,
}

pub struct Refresher {
    store: Arc<dyn CalendarStore>,
    registry: Arc<dyn LinkRegistry>,
    directory: Arc<dyn FamilyDirectory>,
    write_gate: Arc<RwLock<()>>,
    generation: AtomicU64,
    published: watch::Sender<Option<ViewSnapshot>>,
}

impl Refresher {
    /// `write_gate` must be the gate of the coordinator writing to `store`.
    pub fn new(
        store: Arc<dyn CalendarStore>,
        registry: Arc<dyn LinkRegistry>,
        directory: Arc<dyn FamilyDirectory>,
        write_gate: Arc<RwLock<()>>,
    ) -> Self {
        let (published, _) = watch::channel(None);
        Refresher {
            store,
            registry,
            directory,
            write_gate,
            generation: AtomicU64::new(0),
            published,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<ViewSnapshot>> {
        self.published.subscribe()
    }

    /// Read `range` from the given calendars (every calendar when empty),
    /// group it and publish the result.
    ///
    /// Returns `Ok(None)` when cancelled or when a newer snapshot was
    /// published in the meantime; nothing is published in either case.
    pub async fn reload(
        &self,
        calendar_ids: &[String],
        range: Range<DateTime<Utc>>,
        cancel: &CancellationToken,
    ) -> SyncResult<Option<ViewSnapshot>> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let events = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(generation, "reload cancelled");
                return Ok(None);
            }
            loaded = self.load(calendar_ids, &range) => loaded?,
        };

        let snapshot = ViewSnapshot {
            generation,
            range,
            events,
            loaded_at: Utc::now(),
        };
        if self.publish(&snapshot) {
            debug!(generation, events = snapshot.events.len(), "snapshot published");
            Ok(Some(snapshot))
        } else {
            debug!(generation, "stale snapshot discarded");
            Ok(None)
        }
    }

    /// Reload on every change signal and every `tick` until `shutdown`.
    ///
    /// A trigger arriving while a reload is in flight cancels it and starts
    /// a fresh pass. Change signals carry no detail; each one only means
    /// "read again".
    pub async fn run(
        &self,
        calendar_ids: Vec<String>,
        range: Range<DateTime<Utc>>,
        mut changes: mpsc::Receiver<()>,
        tick: Duration,
        shutdown: CancellationToken,
    ) {
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut changes_open = true;
        let mut triggered = false;

        info!(every = ?tick, "refresh loop started");
        loop {
            if shutdown.is_cancelled() {
                break;
            }
            if !triggered {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {}
                    signal = changes.recv(), if changes_open => {
                        if signal.is_none() {
                            changes_open = false;
                            continue;
                        }
                    }
                }
            }
            triggered = false;

            let cancel = shutdown.child_token();
            let reload = self.reload(&calendar_ids, range.clone(), &cancel);
            tokio::pin!(reload);
            loop {
                tokio::select! {
                    result = &mut reload => {
                        if let Err(e) = result {
                            warn!(error = %e, "reload failed");
                        }
                        break;
                    }
                    _ = interval.tick(), if !triggered => {
                        cancel.cancel();
                        triggered = true;
                    }
                    signal = changes.recv(), if changes_open && !triggered => match signal {
                        Some(()) => {
                            cancel.cancel();
                            triggered = true;
                        }
                        None => changes_open = false,
                    },
                }
            }
        }
        info!("refresh loop stopped");
    }

    async fn load(
        &self,
        calendar_ids: &[String],
        range: &Range<DateTime<Utc>>,
    ) -> SyncResult<Vec<AggregatedEvent>> {
        let _read = self.write_gate.read().await;

        let calendars = self.store.calendars().await?;
        let people = self.directory.people().await?;
        let ids: Vec<String> = if calendar_ids.is_empty() {
            calendars.iter().map(|c| c.id.clone()).collect()
        } else {
            calendar_ids.to_vec()
        };

        let events = self
            .store
            .events_in_range(&ids, range.start, range.end)
            .await?;
        let drivers =
            DriverNames::load(&events, self.registry.as_ref(), self.directory.as_ref()).await?;

        let tags: HashMap<&str, AttendeeTag> = calendars
            .iter()
            .map(|c| (c.id.as_str(), AttendeeTag::for_calendar(c, &people)))
            .collect();
        let occurrences = events
            .into_iter()
            .map(|event| {
                let attendee = tags
                    .get(event.calendar_id.as_str())
                    .cloned()
                    .unwrap_or_else(|| AttendeeTag::new(&event.calendar_id, DEFAULT_COLOR));
                RawOccurrence { event, attendee }
            })
            .collect();

        Ok(grouping::group(occurrences, &drivers))
    }

    /// Publish unless a newer generation is already out.
    fn publish(&self, snapshot: &ViewSnapshot) -> bool {
        self.published.send_if_modified(|current| match current {
            Some(existing) if existing.generation > snapshot.generation => false,
            _ => {
                *current = Some(snapshot.clone());
                true
            }
        })
    }
}
