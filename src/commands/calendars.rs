use anyhow::Result;
use famsync_core::CalendarInfo;
use famsync_core::registry::FamilyDirectory;
use owo_colors::OwoColorize;

use crate::context::Context;

pub async fn list(ctx: &Context) -> Result<()> {
    let calendars = ctx.calendars().await?;
    if calendars.is_empty() {
        println!("{}", "No calendars yet. Add one with `famsync calendars add <name>`".dimmed());
        return Ok(());
    }
    let people = ctx.registry.people().await?;

    for calendar in &calendars {
        let owner = calendar
            .owner
            .and_then(|id| people.iter().find(|p| p.id == id))
            .map(|p| p.name.as_str());

        let mut flags = Vec::new();
        if let Some(owner) = owner {
            flags.push(format!("owner: {owner}"));
        }
        if calendar.auto_link {
            flags.push("auto-link".to_string());
        }
        if calendar.shared {
            flags.push("shared".to_string());
        }

        let tag = format!("[{}]", calendar.id);
        if flags.is_empty() {
            println!("  {} {}", calendar.name, tag.dimmed());
        } else {
            println!("  {} {} {}", calendar.name, tag.dimmed(), flags.join(", ").cyan());
        }
    }
    Ok(())
}

pub async fn add(
    ctx: &Context,
    name: String,
    color: Option<String>,
    owner: Option<String>,
    auto_link: bool,
    shared: bool,
) -> Result<()> {
    let owner = match owner {
        Some(o) => Some(ctx.person(&o).await?),
        None => None,
    };

    let mut info = CalendarInfo::new("", name);
    info.color = color;
    info.owner = owner.as_ref().map(|p| p.id);
    info.auto_link = auto_link;
    info.shared = shared;

    // A person has one home calendar for travel events
    if let (true, Some(person)) = (auto_link, &owner) {
        for mut previous in ctx.calendars().await? {
            if previous.auto_link && previous.owner == Some(person.id) {
                previous.auto_link = false;
                ctx.store.save_calendar(&previous)?;
                println!("  {} is no longer {}'s home calendar", previous.name, person.name);
            }
        }
    }

    let created = ctx.store.create_calendar(&info)?;
    println!("{}", format!("  Created calendar: {}", created.name).green());
    println!("  {}", ctx.store.root().join(&created.id).display().dimmed());
    Ok(())
}
