use anyhow::Result;
use colored::Colorize;
use reconcile::GroupSnapshot;
use std::time::Duration;

use crate::Context;
use crate::agent::Agent;
use crate::cli::StatusArgs;
use crate::ui;

pub async fn run(ctx: &Context, args: StatusArgs) -> Result<()> {
    let agent = Agent::start(&ctx.config).await?;
    if !agent.service.settle(Duration::from_secs(args.settle_secs)).await {
        ui::warn("Some instructions are still being checked");
    }
    let groups = agent.service.groups();
    agent.shutdown();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&groups)?);
    } else if groups.is_empty() {
        ui::dim("No groups configured");
    } else {
        print_groups(&groups, args.detail);
    }
    Ok(())
}

/// Print groups with their instructions, optionally with detail payloads.
pub fn print_groups(groups: &[GroupSnapshot], detail: bool) {
    for group in groups {
        println!();
        println!("{} {}", ui::status(group.status), group.name.bold());
        for instruction in &group.instructions {
            println!(
                "  {} {} {}",
                ui::status(instruction.status),
                instruction.command.cyan(),
                instruction.info
            );
            if detail && let Some(payload) = &instruction.detail {
                println!("{}", ui::indented(&payload.render(), "             "));
            }
        }
    }
}
