//! `sub` command group.

use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Subcommand;

use rc_subscribe::{Manager, UpdateResult};

use crate::context::AppContext;

#[derive(Subcommand, Debug)]
pub enum SubCmd {
    /// Update a group's subscription (or all of them)
    Update {
        /// Group name
        group: Option<String>,
        /// Update every group that has a subscription URL
        #[arg(long)]
        all: bool,
    },
    /// Show subscription update status
    Status,
}

pub async fn run(ctx: &AppContext, cmd: SubCmd) -> Result<()> {
    let manager = Manager::new(Arc::clone(&ctx.store), Arc::clone(&ctx.registry))?;
    match cmd {
        SubCmd::Update { group, all } => update(&manager, group, all).await,
        SubCmd::Status => status(&manager),
    }
}

async fn update(manager: &Manager, group: Option<String>, all: bool) -> Result<()> {
    if let Some(name) = group {
        let result = manager.update_group_by_name(&name).await?;
        print_result(&result);
        return Ok(());
    }
    if !all {
        bail!("specify a group name or pass --all");
    }

    let targets = manager.update_status()?;
    if targets.is_empty() {
        println!("No groups have subscription URLs.");
        return Ok(());
    }
    for target in targets {
        match manager.update_group(target.group_id).await {
            Ok(result) => print_result(&result),
            Err(e) => eprintln!("Group '{}': {e}", target.group_name),
        }
    }
    Ok(())
}

fn status(manager: &Manager) -> Result<()> {
    let statuses = manager.update_status()?;
    if statuses.is_empty() {
        println!("No groups have subscription URLs.");
        return Ok(());
    }
    println!(
        "{:<20} {:<8} {:<8} {:<22} {:<22} {}",
        "GROUP", "CONFIGS", "DUE", "LAST UPDATED", "NEXT UPDATE", "AUTO"
    );
    for st in statuses {
        println!(
            "{:<20} {:<8} {:<8} {:<22} {:<22} {}",
            st.group_name,
            st.endpoint_count,
            if st.is_due { "yes" } else { "" },
            st.last_updated
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "never".to_string()),
            st.next_update
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "-".to_string()),
            if st.auto_update { "yes" } else { "no" },
        );
    }
    Ok(())
}

fn print_result(result: &UpdateResult) {
    println!(
        "Group '{}': {} added, {} removed, {} failed ({} URIs in feed)",
        result.group_name, result.added, result.removed, result.failed, result.total_uris
    );
    for error in &result.errors {
        eprintln!("  warning: {error}");
    }
}
