use anyhow::Result;
use famsync_core::registry::{Driver, FamilyDirectory};
use owo_colors::OwoColorize;

use crate::context::Context;

pub async fn add(ctx: &Context, name: String) -> Result<()> {
    let driver = Driver::new(name);
    ctx.registry.save_driver(&driver).await?;

    println!("{}", format!("  Added driver: {}", driver.name).green());
    println!("  {}", driver.id.dimmed());
    Ok(())
}

pub async fn list(ctx: &Context) -> Result<()> {
    let drivers = ctx.registry.drivers().await?;
    if drivers.is_empty() {
        println!("{}", "No drivers yet".dimmed());
        return Ok(());
    }

    for driver in &drivers {
        println!("  {} {}", driver.name, driver.id.dimmed());
    }
    Ok(())
}

pub async fn remove(ctx: &Context, name_or_id: String) -> Result<()> {
    let driver = ctx.driver(&name_or_id).await?;
    ctx.registry.remove_driver(driver.id).await?;

    println!("{}", format!("  Removed driver: {}", driver.name).green());
    Ok(())
}
