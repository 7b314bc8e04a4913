use anyhow::Result;
use famsync_core::CalendarEvent;
use famsync_core::store::CalendarStore;
use famsync_core::sync::{Propagation, UpdateRequest};
use owo_colors::OwoColorize;

use super::{choose, group_error, print_reminders};
use crate::context::Context;
use crate::dates::{self, When};
use crate::render;

pub struct EditArgs {
    pub occurrence: Option<String>,
    pub title: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub duration: Option<String>,
    pub location: Option<String>,
    pub this_calendar: bool,
}

#[derive(Clone, Copy)]
enum Decision {
    Propagate,
    ThisCalendar,
    Cancel,
}

pub async fn run(ctx: &mut Context, calendar: &str, external_id: &str, args: EditArgs) -> Result<()> {
    let calendar = ctx.calendar(calendar).await?;
    let occurrence = args.occurrence.as_deref().map(dates::parse_instant).transpose()?;

    let Some(original) = ctx
        .store
        .find_event(&calendar.id, external_id, occurrence)
        .await?
    else {
        anyhow::bail!("Event '{}' not found in {}", external_id, calendar.name);
    };

    let mut event = original.clone();
    apply_edits(&mut event, &args)?;
    if event == original {
        println!("{}", "  Nothing to change".dimmed());
        return Ok(());
    }

    let propagation = if args.this_calendar {
        Propagation::ThisCalendarOnly
    } else {
        let plan = ctx.coordinator.prepare_update(&calendar.id, external_id).await?;
        if plan.needs_decision() {
            let warning = format!(
                "  Changed outside famsync in: {}",
                plan.externally_edited.join(", ")
            );
            println!("{}", warning.yellow());
            let decision = choose(
                "  Apply this edit to",
                &[
                    (Decision::Propagate, "every linked calendar (overwrite their changes)"),
                    (Decision::ThisCalendar, "this calendar only"),
                    (Decision::Cancel, "cancel"),
                ],
            )?;
            match decision {
                Decision::Propagate => Propagation::AllLinked,
                Decision::ThisCalendar => Propagation::ThisCalendarOnly,
                Decision::Cancel => return Ok(()),
            }
        } else {
            Propagation::AllLinked
        }
    };

    let report = ctx
        .coordinator
        .update(UpdateRequest::new(event), propagation)
        .await
        .map_err(group_error)?;

    println!("{}", format!("  Updated: {}", original.title).green());
    println!("{}", render::report(&report));
    if propagation == Propagation::ThisCalendarOnly && report.outcomes.len() == 1 {
        println!("{}", "  Linked copies left unchanged".dimmed());
    }
    print_reminders(ctx);
    Ok(())
}

/// Apply the flags to `event`. A new start keeps the event's length unless
/// an end or duration is also given.
fn apply_edits(event: &mut CalendarEvent, args: &EditArgs) -> Result<()> {
    if let Some(title) = &args.title {
        event.title = title.clone();
    }

    let length = event.end - event.start;
    let start = match &args.start {
        Some(input) => {
            let start = dates::parse_when(input)?;
            event.start = start.to_utc();
            event.is_all_day = start.is_all_day();
            start
        }
        None if event.is_all_day => When::Day(event.start.date_naive()),
        None => When::At(event.start),
    };

    if let Some(end) = &args.end {
        event.end = dates::parse_when(end)?.to_utc();
    } else if let Some(duration) = &args.duration {
        event.end = start.plus(dates::parse_duration(duration)?).to_utc();
    } else if args.start.is_some() {
        event.end = event.start + length;
    }

    if let Some(location) = &args.location {
        event.location = if location.is_empty() {
            None
        } else {
            Some(location.clone())
        };
    }
    Ok(())
}
