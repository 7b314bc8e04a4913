use std::ops::Range;

use anyhow::Result;
use chrono::{DateTime, Utc};
use famsync_core::CalendarInfo;
use tokio_util::sync::CancellationToken;

use crate::context::Context;
use crate::render;

pub async fn run(ctx: &Context, calendars: Vec<CalendarInfo>, range: Range<DateTime<Utc>>) -> Result<()> {
    let ids: Vec<String> = calendars.into_iter().map(|c| c.id).collect();
    let refresher = ctx.refresher();

    let Some(snapshot) = refresher.reload(&ids, range, &CancellationToken::new()).await? else {
        return Ok(());
    };
    println!("{}", render::agenda(&snapshot.events));
    Ok(())
}
