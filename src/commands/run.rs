use anyhow::{Context as _, Result};

use crate::Context;
use crate::agent::Agent;

/// Watch until Ctrl-C. Nothing is applied automatically.
pub async fn run(ctx: &Context) -> Result<()> {
    let agent = Agent::start(&ctx.config).await?;
    log::info!("Watching {} groups", agent.service.groups().len());

    tokio::signal::ctrl_c().await.context("Could not listen for Ctrl-C")?;
    log::info!("Stopping");
    agent.shutdown();
    Ok(())
}
