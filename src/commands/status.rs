use anyhow::Result;
use famsync_core::registry::{FamilyDirectory, LinkRegistry, LinkedEventRecord};
use famsync_core::sync::GroupState;
use owo_colors::OwoColorize;

use crate::context::Context;
use crate::render::Render;

/// State of one event's link group, with the calendars edited elsewhere.
pub async fn run(ctx: &Context, calendar: &str, external_id: &str) -> Result<()> {
    let calendar = ctx.calendar(calendar).await?;
    let Some(record) = ctx
        .registry
        .get_by_external_id(&calendar.id, external_id)
        .await?
    else {
        println!("  {} {}", "not linked".dimmed(), "(created outside famsync)".dimmed());
        return Ok(());
    };

    let state = ctx.coordinator.group_state(record.group_id).await?;
    println!("  {} {}", "Group".bold(), record.group_id.dimmed());
    println!("  State: {}", state.render());

    for copy in ctx.registry.get(record.group_id).await? {
        println!("{}", render_copy(ctx, &copy, copy.id == record.id).await?);
    }

    let edited = ctx
        .coordinator
        .detect_external_edits(&calendar.id, external_id)
        .await?;
    if !edited.is_empty() {
        println!();
        let warning = format!("  Changed outside famsync in: {}", edited.join(", "));
        println!("{}", warning.yellow());
        println!(
            "{}",
            "  The next `famsync edit` will ask before overwriting them".dimmed()
        );
    }
    Ok(())
}

/// Every link group that needs attention.
pub async fn all(ctx: &Context) -> Result<()> {
    let groups = ctx.registry.all_groups().await?;
    let mut shown = 0;

    for group_id in groups {
        let state = ctx.coordinator.group_state(group_id).await?;
        if !matches!(state, GroupState::LinkedDivergent | GroupState::PartiallyDeleted) {
            continue;
        }
        let calendars: Vec<_> = ctx
            .registry
            .get(group_id)
            .await?
            .into_iter()
            .map(|r| r.calendar_id)
            .collect();
        println!(
            "  {} {} {}",
            state.render(),
            calendars.join(", "),
            group_id.dimmed()
        );
        shown += 1;
    }

    if shown == 0 {
        println!("{}", "  All linked events are in step".dimmed());
    }
    Ok(())
}

async fn render_copy(ctx: &Context, copy: &LinkedEventRecord, is_current: bool) -> Result<String> {
    let marker = if is_current { "▸" } else { " " };
    let mut line = format!(
        "  {} {} {}",
        marker,
        copy.calendar_id,
        copy.external_event_id.dimmed()
    );
    if copy.is_orphaned() {
        line.push_str(&format!(" {}", "orphaned".red()));
    }
    if copy.is_shared_calendar_copy {
        line.push_str(&format!(" {}", "shared".cyan()));
    }
    if let Some(driver) = copy.driver {
        let name = ctx
            .registry
            .driver_name(driver)
            .await?
            .unwrap_or_else(|| "unknown driver".to_string());
        line.push_str(&format!(" {}", format!("driver: {name}").dimmed()));
    }
    let synced = format!(
        "synced {}",
        copy.last_synced_at
            .with_timezone(&chrono::Local)
            .format("%Y-%m-%d %H:%M")
    );
    line.push_str(&format!(" {}", synced.dimmed()));
    Ok(line)
}
