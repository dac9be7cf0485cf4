//! `group` command group.

use anyhow::Result;
use chrono::Utc;
use clap::Subcommand;

use rc_storage::EndpointFilter;
use rc_types::{settings, Group};

use crate::context::AppContext;

#[derive(Subcommand, Debug)]
pub enum GroupCmd {
    /// Create a group
    Create {
        name: String,
        #[arg(short, long, default_value = "")]
        description: String,
        /// Subscription URL backing this group
        #[arg(short, long)]
        url: Option<String>,
        /// Update interval in seconds
        #[arg(short, long, default_value_t = 86400)]
        interval: i64,
        /// Disable automatic subscription updates
        #[arg(long)]
        no_auto_update: bool,
    },
    /// List groups
    List,
    /// Delete a group and all of its configs
    Delete { name: String },
    /// List the configs in a group
    Configs { name: String },
}

pub fn run(ctx: &AppContext, cmd: GroupCmd) -> Result<()> {
    match cmd {
        GroupCmd::Create {
            name,
            description,
            url,
            interval,
            no_auto_update,
        } => create(ctx, name, description, url, interval, !no_auto_update),
        GroupCmd::List => list(ctx),
        GroupCmd::Delete { name } => delete(ctx, &name),
        GroupCmd::Configs { name } => configs(ctx, &name),
    }
}

fn create(
    ctx: &AppContext,
    name: String,
    description: String,
    url: Option<String>,
    interval: i64,
    auto_update: bool,
) -> Result<()> {
    let user_agent = ctx
        .store
        .setting_or_default(settings::SUBSCRIPTION_USER_AGENT)?;
    let group = Group {
        id: 0,
        name,
        description,
        is_global: false,
        subscription_url: url,
        auto_update,
        update_interval: interval,
        last_updated: None,
        next_update: None,
        user_agent,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    let id = ctx.store.create_group(&group)?;
    println!("Created group '{}' (ID: {id})", group.name);
    if group.subscription_url.is_some() {
        println!("Run 'raycoon sub update {}' to fetch its configs.", group.name);
    }
    Ok(())
}

fn list(ctx: &AppContext) -> Result<()> {
    let groups = ctx.store.groups()?;
    println!(
        "{:<5} {:<20} {:<8} {:<14} {}",
        "ID", "NAME", "GLOBAL", "SUBSCRIPTION", "CONFIGS"
    );
    for group in groups {
        let count = ctx
            .store
            .endpoints(&EndpointFilter {
                group_id: Some(group.id),
                ..Default::default()
            })?
            .len();
        println!(
            "{:<5} {:<20} {:<8} {:<14} {}",
            group.id,
            group.name,
            if group.is_global { "yes" } else { "" },
            if group.subscription_url.is_some() {
                "yes"
            } else {
                ""
            },
            count,
        );
    }
    Ok(())
}

fn delete(ctx: &AppContext, name: &str) -> Result<()> {
    let group = ctx.resolve_group(name)?;
    ctx.store.delete_group(group.id)?;
    println!("Deleted group '{}' and its configs", group.name);
    Ok(())
}

fn configs(ctx: &AppContext, name: &str) -> Result<()> {
    let group = ctx.resolve_group(name)?;
    let endpoints = ctx.store.endpoints(&EndpointFilter {
        group_id: Some(group.id),
        ..Default::default()
    })?;
    if endpoints.is_empty() {
        println!("Group '{}' has no configs.", group.name);
        return Ok(());
    }
    for ep in endpoints {
        println!(
            "{:<5} {:<24} {:<12} {}:{}",
            ep.id, ep.name, ep.protocol, ep.address, ep.port
        );
    }
    Ok(())
}
