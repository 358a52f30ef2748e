use anyhow::Result;
use colored::Colorize;
use reconcile::Variables;

use crate::Context;
use crate::facts;
use crate::ui;

pub async fn run(ctx: &Context) -> Result<()> {
    let globals = facts::gather(&ctx.config.tools.lsb_release).await;
    ui::header("Global variables");
    for global in globals {
        println!(
            "  {:<18} {:<14} {}",
            Variables::token(&global.name).cyan(),
            global.value,
            global.description.dimmed()
        );
    }
    Ok(())
}
