use anyhow::Result;
use dialoguer::{Input, MultiSelect};
use famsync_core::driver::DriverAssignment;
use famsync_core::registry::DriverRef;
use famsync_core::sync::CreateRequest;
use famsync_core::{CalendarInfo, EventDraft, Frequency, RecurrenceRule};
use owo_colors::OwoColorize;

use super::{group_error, print_reminders};
use crate::context::Context;
use crate::dates::{self, When};
use crate::render::{self, Render};

pub struct NewArgs {
    pub title: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub duration: Option<String>,
    pub location: Option<String>,
    pub calendars: Vec<String>,
    pub repeat: Option<Frequency>,
    pub interval: u32,
    pub count: Option<u32>,
    pub until: Option<String>,
    pub driver_person: Option<String>,
    pub travel: Option<u32>,
    pub driver: Option<String>,
    pub alarm: Option<i64>,
}

pub async fn run(ctx: &mut Context, args: NewArgs) -> Result<()> {
    let interactive = args.title.is_none() || args.start.is_none();
    if args.travel.is_some() && args.driver_person.is_none() {
        anyhow::bail!("--travel only applies to a family-member driver (--driver-person)");
    }

    // --- Title ---
    let title = match args.title {
        Some(t) => t,
        None => Input::<String>::new().with_prompt("  Title").interact_text()?,
    };

    // --- Start ---
    let start = match &args.start {
        Some(s) => dates::parse_when(s)?,
        None => prompt_with_retry("  When?", dates::parse_when)?,
    };

    // --- Duration / End ---
    let end = if let Some(end) = &args.end {
        dates::parse_when(end)?
    } else if let Some(duration) = &args.duration {
        start.plus(dates::parse_duration(duration)?)
    } else if interactive {
        prompt_duration(start)?
    } else {
        start.default_end()
    };

    // --- Location ---
    let location = match args.location {
        Some(loc) => Some(loc),
        None if interactive => Some(
            Input::<String>::new()
                .with_prompt("  Where? (skip)")
                .default(String::new())
                .show_default(false)
                .interact_text()?,
        ),
        None => None,
    }
    .filter(|loc| !loc.is_empty());

    // --- Calendars ---
    let calendars = resolve_targets(ctx, &args.calendars, interactive).await?;

    let mut draft = EventDraft::new(title, start.to_utc(), end.to_utc());
    if start.is_all_day() {
        draft = draft.all_day();
    }
    if let Some(location) = location {
        draft = draft.with_location(location);
    }
    if let Some(minutes) = args.alarm {
        draft = draft.with_alarm(minutes);
    }

    let ids: Vec<String> = calendars.iter().map(|c| c.id.clone()).collect();
    let mut request = CreateRequest::new(draft, ids);

    if let Some(frequency) = args.repeat {
        let mut rule = RecurrenceRule::new(frequency, args.interval);
        if let Some(count) = args.count {
            rule = rule.with_count(count);
        }
        if let Some(until) = &args.until {
            rule = rule.with_until(dates::parse_until(until)?);
        }
        request = request.with_recurrence(rule);
    }

    if let Some(name) = &args.driver_person {
        let person = ctx.person(name).await?;
        request = request.with_driver(DriverAssignment {
            driver: DriverRef::Person(person.id),
            travel_minutes: args.travel,
        });
    } else if let Some(name) = &args.driver {
        let driver = ctx.driver(name).await?;
        request = request.with_driver(DriverAssignment {
            driver: DriverRef::Driver(driver.id),
            travel_minutes: None,
        });
    }

    let title = request.draft.title.clone();
    let total = request.calendars.len();
    let report = match ctx.coordinator.create(request).await {
        Ok(report) => report,
        Err(err) => {
            if let Some(report) = err.report() {
                let succeeded = report.succeeded();
                let summary = format!("  {title}: {}", render::created_summary(succeeded, total));
                eprintln!("{}", summary.yellow());
            }
            print_reminders(ctx);
            return Err(group_error(err));
        }
    };

    if interactive {
        println!();
    }
    println!(
        "{}",
        format!(
            "  Created: {} ({})",
            title,
            render::created_summary(report.succeeded(), total)
        )
        .green()
    );
    for (calendar_id, external_id) in report.created_ids() {
        println!("  {}", format!("[{calendar_id}] {external_id}").dimmed());
    }
    if let Some(travel) = &report.travel {
        println!("{}", travel.render());
    }
    print_reminders(ctx);

    Ok(())
}

/// Target calendars from the flags, the configured default, or a prompt.
async fn resolve_targets(
    ctx: &Context,
    filters: &[String],
    interactive: bool,
) -> Result<Vec<CalendarInfo>> {
    if !filters.is_empty() {
        return ctx.require_calendars(filters).await;
    }

    let all = ctx.require_calendars(&[]).await?;
    let default = ctx.settings.default_calendar.as_deref();

    if !interactive {
        return match default {
            Some(d) => ctx.require_calendars(&[d.to_string()]).await,
            None => anyhow::bail!(
                "No calendar given. Pass --calendar, or set default_calendar in {}",
                famsync_core::config::Settings::config_path()?.display()
            ),
        };
    }

    let labels: Vec<_> = all.iter().map(|c| c.name.as_str()).collect();
    let defaults: Vec<bool> = all
        .iter()
        .map(|c| Some(c.id.as_str()) == default || Some(c.name.as_str()) == default)
        .collect();

    loop {
        let picked = MultiSelect::new()
            .with_prompt("  Which calendars? (space to select)")
            .items(&labels)
            .defaults(&defaults)
            .interact()?;
        if !picked.is_empty() {
            return Ok(picked.into_iter().map(|i| all[i].clone()).collect());
        }
        eprintln!("  {}", "Pick at least one calendar".red());
    }
}

/// Prompt the user with retry on parse errors.
fn prompt_with_retry<F>(prompt: &str, parse: F) -> Result<When>
where
    F: Fn(&str) -> Result<When>,
{
    loop {
        let input: String = Input::new().with_prompt(prompt).interact_text()?;
        match parse(&input) {
            Ok(result) => return Ok(result),
            Err(e) => eprintln!("  {}", e.to_string().red()),
        }
    }
}

/// Prompt for duration/end with retry on parse errors.
fn prompt_duration(start: When) -> Result<When> {
    let hint = if start.is_all_day() { "1 day" } else { "1 hour" };
    loop {
        let input: String = Input::new()
            .with_prompt(format!("  How long? ({hint})"))
            .default(String::new())
            .show_default(false)
            .interact_text()?;
        if input.is_empty() {
            return Ok(start.default_end());
        }
        match dates::parse_end(&input, start) {
            Ok(result) => return Ok(result),
            Err(e) => eprintln!("  {}", e.to_string().red()),
        }
    }
}
