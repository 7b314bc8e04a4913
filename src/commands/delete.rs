use anyhow::Result;
use dialoguer::Input;
use famsync_core::sync::{DeleteRequest, DeleteScope, DeleteSpan};
use owo_colors::OwoColorize;

use super::{choose, group_error, print_reminders};
use crate::context::Context;
use crate::dates;
use crate::render;

pub async fn run(
    ctx: &mut Context,
    calendar: &str,
    external_id: &str,
    occurrence: Option<String>,
    span: Option<DeleteSpan>,
    scope: Option<DeleteScope>,
) -> Result<()> {
    let calendar = ctx.calendar(calendar).await?;
    let mut occurrence = occurrence.as_deref().map(dates::parse_instant).transpose()?;
    let options = ctx.coordinator.delete_options(&calendar.id, external_id).await?;

    let span = match span {
        Some(span) => Some(span),
        None if options.needs_span => Some(choose(
            "  This event repeats. Delete",
            &[
                (DeleteSpan::ThisOccurrence, "only this occurrence"),
                (DeleteSpan::ThisAndFuture, "this and all following occurrences"),
            ],
        )?),
        None => None,
    };
    if span == Some(DeleteSpan::ThisOccurrence) && occurrence.is_none() {
        occurrence = Some(prompt_occurrence()?);
    }

    let scope = match scope {
        Some(scope) => Some(scope),
        None if options.needs_scope => {
            let others = options.linked_calendars.len().saturating_sub(1);
            let all_label = format!("every linked calendar ({others} more)");
            Some(choose(
                &format!("  Also in {}. Delete from", options.linked_calendars.join(", ")),
                &[
                    (DeleteScope::SingleCalendar, "this calendar only"),
                    (DeleteScope::AllLinked, all_label.as_str()),
                ],
            )?)
        }
        None => None,
    };

    let mut request = DeleteRequest::new(&calendar.id, external_id);
    if let Some(at) = occurrence {
        request = request.at_occurrence(at);
    }
    if let Some(span) = span {
        request = request.with_span(span);
    }
    if let Some(scope) = scope {
        request = request.with_scope(scope);
    }

    let report = ctx.coordinator.delete(request).await.map_err(group_error)?;

    println!("{}", "  Deleted".green());
    println!("{}", render::report(&report));
    let failed = report.failures().count();
    if failed > 0 {
        let note = format!("  {failed} copies could not be removed and are marked orphaned");
        println!("{}", note.yellow());
    }
    let stale = report.registry_errors().count();
    if stale > 0 {
        let note = format!("  {stale} removed copies are still recorded as linked, marked orphaned");
        println!("{}", note.yellow());
    }
    print_reminders(ctx);
    Ok(())
}

fn prompt_occurrence() -> Result<chrono::DateTime<chrono::Utc>> {
    loop {
        let input: String = Input::new()
            .with_prompt("  Which occurrence? (its start)")
            .interact_text()?;
        match dates::parse_instant(&input) {
            Ok(at) => return Ok(at),
            Err(e) => eprintln!("  {}", e.to_string().red()),
        }
    }
}
