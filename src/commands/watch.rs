use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Local, Utc};
use famsync_core::CalendarInfo;
use famsync_core::refresh::ViewSnapshot;
use famsync_core::store::DirectoryCalendarStore;
use owo_colors::OwoColorize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::context::Context;
use crate::render;

/// How often the calendar directories are scanned for changes.
const POLL_EVERY: Duration = Duration::from_secs(2);

pub async fn run(ctx: &Context, calendars: Vec<CalendarInfo>, range: Range<DateTime<Utc>>) -> Result<()> {
    let ids: Vec<String> = calendars.into_iter().map(|c| c.id).collect();
    let tick = ctx.settings.refresh_interval()?;
    let refresher = Arc::new(ctx.refresher());
    let mut snapshots = refresher.subscribe();

    let shutdown = CancellationToken::new();
    let (changes_tx, changes_rx) = mpsc::channel(1);

    let refresh_task = tokio::spawn({
        let refresher = refresher.clone();
        let shutdown = shutdown.clone();
        async move { refresher.run(ids, range, changes_rx, tick, shutdown).await }
    });
    let poll_task = tokio::spawn(poll_changes(
        ctx.store.clone(),
        changes_tx,
        POLL_EVERY,
        shutdown.clone(),
    ));

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                if let Some(snapshot) = snapshot {
                    redraw(&snapshot);
                }
            }
        }
    }

    shutdown.cancel();
    refresh_task.await?;
    poll_task.await?;
    Ok(())
}

fn redraw(snapshot: &ViewSnapshot) {
    // Clear the screen and move the cursor home
    print!("\x1b[2J\x1b[H");
    let header = format!(
        "Updated {} · Ctrl-C to stop",
        snapshot.loaded_at.with_timezone(&Local).format("%H:%M:%S")
    );
    println!("{}\n", header.dimmed());
    println!("{}", render::agenda(&snapshot.events));
}

/// Send a change signal whenever the calendar files change on disk, by us
/// or by any other tool. A full channel already holds a pending reload.
async fn poll_changes(
    store: Arc<DirectoryCalendarStore>,
    changes: mpsc::Sender<()>,
    every: Duration,
    shutdown: CancellationToken,
) {
    let mut last = store.fingerprint().ok();
    let mut interval = tokio::time::interval(every);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }

        let current = match store.fingerprint() {
            Ok(fingerprint) => Some(fingerprint),
            Err(e) => {
                warn!(error = %e, "could not scan calendar directories");
                continue;
            }
        };
        if current != last {
            debug!(?current, "calendar files changed");
            last = current;
            if changes.try_send(()).is_err() && changes.is_closed() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use famsync_core::EventDraft;
    use famsync_core::store::CalendarStore;

    #[tokio::test]
    async fn test_new_event_file_sends_change_signal() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(DirectoryCalendarStore::new(tmp.path()));
        let info = store
            .create_calendar(&CalendarInfo::new("", "Anna"))
            .unwrap();

        let shutdown = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(1);
        let poller = tokio::spawn(poll_changes(
            store.clone(),
            tx,
            Duration::from_millis(10),
            shutdown.clone(),
        ));

        let start = Utc.with_ymd_and_hms(2025, 3, 20, 10, 0, 0).unwrap();
        store
            .create_event(
                &info.id,
                &EventDraft::new("Swim", start, start + chrono::Duration::hours(1)),
            )
            .await
            .unwrap();

        let signal = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await;
        assert_eq!(signal.unwrap(), Some(()));

        shutdown.cancel();
        poller.await.unwrap();
    }
}
