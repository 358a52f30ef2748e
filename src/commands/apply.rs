use anyhow::{Result, bail};
use std::time::Duration;

use super::status::print_groups;
use crate::Context;
use crate::agent::Agent;
use crate::cli::ApplyArgs;
use crate::ui;

/// Quiet period after an apply before reading the final statuses
const AFTER_APPLY: Duration = Duration::from_millis(500);

pub async fn run(ctx: &Context, args: ApplyArgs) -> Result<()> {
    let agent = Agent::start(&ctx.config).await?;
    if !agent.service.settle(Duration::from_secs(args.settle_secs)).await {
        ui::warn("Applying before every instruction was checked");
    }

    let applied = if agent.service.group(&args.id).is_ok() {
        agent.service.apply_group(&args.id).await
    } else {
        agent.service.apply_instruction(&args.id).await
    };
    let applied = match applied {
        Ok(applied) => applied,
        Err(err) => {
            agent.shutdown();
            bail!("Nothing to apply: {err}");
        }
    };

    tokio::time::sleep(AFTER_APPLY).await;
    agent.service.settle(Duration::from_secs(args.settle_secs)).await;
    let groups = agent.service.groups();
    agent.shutdown();

    if !ctx.quiet {
        print_groups(&groups, ctx.verbose > 0);
        println!();
    }
    if applied {
        ui::success(&format!("Applied {}", args.id));
        Ok(())
    } else {
        ui::error(&format!("Apply of {} failed", args.id));
        bail!("Apply failed")
    }
}
