//! Terminal rendering for famsync types.
//!
//! Extension traits that add colored output to famsync-core types using
//! owo_colors.

use chrono::{Local, NaiveDate};
use famsync_core::driver::TravelOutcome;
use famsync_core::grouping::{AggregatedEvent, AttendeeTag};
use famsync_core::sync::{GroupReport, GroupState, TargetOutcome};
use owo_colors::OwoColorize;

pub trait Render {
    fn render(&self) -> String;
}

impl Render for AttendeeTag {
    fn render(&self) -> String {
        match hex_rgb(&self.color) {
            Some((r, g, b)) => self.name.truecolor(r, g, b).to_string(),
            None => self.name.clone(),
        }
    }
}

impl Render for AggregatedEvent {
    fn render(&self) -> String {
        let time = if self.is_all_day {
            format!("{:>7}", "all-day")
        } else {
            format!("{:>7}", self.start.with_timezone(&Local).format("%H:%M"))
        };

        let mut line = format!("  {} {}", time, self.title);
        if self.has_recurrence {
            line.push_str(&format!(" {}", "↻".dimmed()));
        }
        let attendees: Vec<_> = self.attendees.iter().map(Render::render).collect();
        line.push_str(&format!(" {}", attendees.join(", ")));
        if let Some(driver) = &self.driver_name {
            line.push_str(&format!(" {}", format!("(driving: {driver})").dimmed()));
        }
        if let Some(location) = &self.location {
            line.push_str(&format!(" {}", format!("@ {location}").dimmed()));
        }
        line
    }
}

impl Render for TargetOutcome {
    fn render(&self) -> String {
        match (self.is_success(), &self.registry_error) {
            (true, None) => format!("  {} {}", "✓".green(), self),
            (true, Some(_)) => format!("  {} {}", "!".yellow(), self.to_string().yellow()),
            (false, _) => format!("  {} {}", "✗".red(), self.to_string().red()),
        }
    }
}

impl Render for GroupState {
    fn render(&self) -> String {
        match self {
            GroupState::Linked | GroupState::Unlinked => self.to_string().green().to_string(),
            GroupState::LinkedDivergent | GroupState::PartiallyDeleted => {
                self.to_string().yellow().to_string()
            }
            GroupState::Gone => self.to_string().dimmed().to_string(),
        }
    }
}

impl Render for TravelOutcome {
    fn render(&self) -> String {
        match self {
            TravelOutcome::Created(travel) => {
                format!("  Travel event added to {}", travel.calendar_id).green().to_string()
            }
            TravelOutcome::Updated(travel) => {
                format!("  Travel event updated in {}", travel.calendar_id).green().to_string()
            }
            TravelOutcome::Removed => "  Travel event removed".dimmed().to_string(),
            TravelOutcome::Skipped(reason) => {
                format!("  No travel event: {reason}").yellow().to_string()
            }
            TravelOutcome::Failed(reason) => {
                format!("  Travel event failed: {reason}").red().to_string()
            }
        }
    }
}

/// Agenda grouped under day headings. Events arrive sorted by day with
/// all-day events first.
pub fn agenda(events: &[AggregatedEvent]) -> String {
    if events.is_empty() {
        return "No events found".dimmed().to_string();
    }

    let today = Local::now().date_naive();
    let mut lines = Vec::new();
    let mut current: Option<NaiveDate> = None;

    for event in events {
        let day = display_day(event);
        if current != Some(day) {
            if current.is_some() {
                lines.push(String::new());
            }
            lines.push(day_label(day, today).bold().to_string());
            current = Some(day);
        }
        lines.push(event.render());
    }

    lines.join("\n")
}

/// Per-copy lines, then the travel outcome when there is one.
pub fn report(report: &GroupReport) -> String {
    let mut lines: Vec<_> = report.outcomes.iter().map(Render::render).collect();
    if let Some(travel) = &report.travel {
        lines.push(travel.render());
    }
    lines.join("\n")
}

pub fn created_summary(succeeded: usize, total: usize) -> String {
    let noun = if total == 1 { "calendar" } else { "calendars" };
    format!("created in {succeeded} of {total} {noun}")
}

/// All-day events are stored at UTC midnight of their date; timed events
/// are shown on their local day.
fn display_day(event: &AggregatedEvent) -> NaiveDate {
    if event.is_all_day {
        event.day()
    } else {
        event.start.with_timezone(&Local).date_naive()
    }
}

/// "Today", "Tomorrow", or e.g. "Wed Feb 25".
fn day_label(date: NaiveDate, today: NaiveDate) -> String {
    match (date - today).num_days() {
        0 => "Today".to_string(),
        1 => "Tomorrow".to_string(),
        _ => date.format("%a %b %-d").to_string(),
    }
}

fn hex_rgb(color: &str) -> Option<(u8, u8, u8)> {
    let hex = color.strip_prefix('#')?;
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    Some((channel(0)?, channel(2)?, channel(4)?))
}
