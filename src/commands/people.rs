use anyhow::Result;
use famsync_core::registry::{FamilyDirectory, Person};
use owo_colors::OwoColorize;

use crate::context::Context;

pub async fn add(ctx: &Context, name: String, color: String) -> Result<()> {
    if !color.starts_with('#') || color.len() != 7 {
        anyhow::bail!("Color must look like \"#3366ff\", got \"{}\"", color);
    }
    let person = Person::new(name, color);
    ctx.registry.save_person(&person).await?;

    println!("{}", format!("  Added: {}", person.name).green());
    println!("  {}", person.id.dimmed());
    Ok(())
}

pub async fn list(ctx: &Context) -> Result<()> {
    let people = ctx.registry.people().await?;
    if people.is_empty() {
        println!("{}", "No people yet. Add one with `famsync people add <name> --color <hex>`".dimmed());
        return Ok(());
    }

    for person in &people {
        println!("  {} {} {}", person.name, person.color.dimmed(), person.id.dimmed());
    }
    Ok(())
}

pub async fn remove(ctx: &Context, name_or_id: String) -> Result<()> {
    let person = ctx.person(&name_or_id).await?;
    ctx.registry.remove_person(person.id).await?;

    println!("{}", format!("  Removed: {}", person.name).green());
    Ok(())
}
