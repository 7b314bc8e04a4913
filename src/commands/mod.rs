pub mod calendars;
pub mod delete;
pub mod drivers;
pub mod edit;
pub mod events;
pub mod new;
pub mod people;
pub mod status;
pub mod watch;

use anyhow::Result;
use dialoguer::Select;
use famsync_core::SyncError;
use famsync_core::notify::Notification;
use owo_colors::OwoColorize;
use tracing::debug;

use crate::context::Context;
use crate::render;

/// Ask the user to pick one of `choices`, returning the chosen value.
pub fn choose<T: Copy>(prompt: &str, choices: &[(T, &str)]) -> Result<T> {
    let labels: Vec<_> = choices.iter().map(|(_, label)| *label).collect();
    let index = Select::new()
        .with_prompt(prompt)
        .items(&labels)
        .default(0)
        .interact()?;
    Ok(choices[index].0)
}

/// Print the report a group error carries, then hand it back.
pub fn group_error(err: SyncError) -> anyhow::Error {
    if let Some(report) = err.report() {
        eprintln!("{}", render::report(report));
        if !report.externally_edited.is_empty() {
            let note = format!(
                "  Changed outside famsync in: {}",
                report.externally_edited.join(", ")
            );
            eprintln!("{}", note.yellow());
        }
    }
    if err.is_retryable() {
        eprintln!("{}", "  This may be temporary, try the command again".dimmed());
    }
    err.into()
}

/// Show reminders the last operation scheduled.
pub fn print_reminders(ctx: &mut Context) {
    for notification in ctx.take_reminders() {
        match notification {
            Notification::Scheduled {
                calendar_id,
                alert_offsets,
                ..
            } if !alert_offsets.is_empty() => {
                let offsets: Vec<_> = alert_offsets.iter().map(|m| format!("{m}m")).collect();
                let line = format!("  Reminder in {calendar_id}: {} before", offsets.join(", "));
                println!("{}", line.dimmed());
            }
            Notification::Scheduled { .. } => {}
            Notification::Cancelled { external_id } => {
                debug!(%external_id, "reminders cancelled");
            }
        }
    }
}
