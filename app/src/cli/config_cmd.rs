//! `config` command group.

use anyhow::{bail, Context, Result};
use clap::Subcommand;

use rc_storage::EndpointFilter;

use crate::context::AppContext;

#[derive(Subcommand, Debug)]
pub enum ConfigCmd {
    /// Add a config from a share URI
    Add {
        /// Proxy share URI (vmess://, vless://, trojan://, ss://, ...)
        uri: String,
        /// Group to add the config to (default: global)
        #[arg(short, long)]
        group: Option<String>,
    },
    /// List configs
    List {
        #[arg(short, long)]
        group: Option<String>,
        #[arg(short, long)]
        protocol: Option<String>,
        /// Only enabled configs
        #[arg(long)]
        enabled: bool,
        /// Substring match on name, address and notes
        #[arg(short, long)]
        search: Option<String>,
        /// Require tag (repeatable; all must match)
        #[arg(short, long)]
        tag: Vec<String>,
    },
    /// Show one config in full
    Show {
        /// Config ID or name
        target: String,
    },
    /// Delete a config
    Delete {
        /// Config ID or name
        target: String,
    },
}

pub fn run(ctx: &AppContext, cmd: ConfigCmd) -> Result<()> {
    match cmd {
        ConfigCmd::Add { uri, group } => add(ctx, &uri, group.as_deref()),
        ConfigCmd::List {
            group,
            protocol,
            enabled,
            search,
            tag,
        } => list(ctx, group.as_deref(), protocol, enabled, search, tag),
        ConfigCmd::Show { target } => show(ctx, &target),
        ConfigCmd::Delete { target } => delete(ctx, &target),
    }
}

fn add(ctx: &AppContext, uri: &str, group: Option<&str>) -> Result<()> {
    let mut endpoint = ctx
        .registry
        .parse(uri)
        .with_context(|| "failed to parse URI")?;

    let group = match group {
        Some(name) => ctx.resolve_group(name)?,
        None => ctx.store.global_group()?,
    };
    endpoint.group_id = group.id;
    endpoint.from_subscription = false;

    let id = ctx.store.create_endpoint(&endpoint)?;
    println!(
        "Added config '{}' (ID: {id}) to group '{}'",
        endpoint.name, group.name
    );
    Ok(())
}

fn list(
    ctx: &AppContext,
    group: Option<&str>,
    protocol: Option<String>,
    enabled: bool,
    search: Option<String>,
    tags: Vec<String>,
) -> Result<()> {
    let mut filter = EndpointFilter {
        protocol,
        search,
        tags,
        ..Default::default()
    };
    if enabled {
        filter.enabled = Some(true);
    }
    if let Some(name) = group {
        filter.group_id = Some(ctx.resolve_group(name)?.id);
    }

    let endpoints = ctx.store.endpoints(&filter)?;
    if endpoints.is_empty() {
        println!("No configs found.");
        return Ok(());
    }

    println!(
        "{:<5} {:<24} {:<12} {:<28} {:<8} {}",
        "ID", "NAME", "PROTOCOL", "ADDRESS", "ENABLED", "SOURCE"
    );
    for ep in endpoints {
        println!(
            "{:<5} {:<24} {:<12} {:<28} {:<8} {}",
            ep.id,
            truncate(&ep.name, 24),
            ep.protocol,
            truncate(&format!("{}:{}", ep.address, ep.port), 28),
            if ep.enabled { "yes" } else { "no" },
            if ep.from_subscription {
                "subscription"
            } else {
                "manual"
            },
        );
    }
    Ok(())
}

fn show(ctx: &AppContext, target: &str) -> Result<()> {
    let ep = ctx.resolve_endpoint(target)?;
    let group = ctx.store.group(ep.group_id)?;

    println!("Config {} (ID: {})", ep.name, ep.id);
    println!("  Protocol:  {}", ep.protocol);
    println!("  Address:   {}:{}", ep.address, ep.port);
    println!("  Network:   {}", ep.network);
    println!("  TLS:       {}", if ep.tls_enabled { "yes" } else { "no" });
    println!("  Group:     {}", group.name);
    println!(
        "  Source:    {}",
        if ep.from_subscription {
            "subscription"
        } else {
            "manual"
        }
    );
    println!("  Enabled:   {}", if ep.enabled { "yes" } else { "no" });
    if !ep.tags.is_empty() {
        println!("  Tags:      {}", ep.tags.join(", "));
    }
    if !ep.notes.is_empty() {
        println!("  Notes:     {}", ep.notes);
    }
    println!("  Used:      {} times", ep.use_count);
    if let Some(last) = ep.last_used {
        println!("  Last used: {}", last.to_rfc3339());
    }
    if let Some(latency) = ctx.store.latest_latency(ep.id)? {
        match latency.latency_ms {
            Some(ms) => println!("  Latency:   {ms} ms ({})", latency.strategy),
            None => println!("  Latency:   failed ({})", latency.error_message),
        }
    }
    if !ep.uri.is_empty() {
        println!("  URI:       {}", ep.uri);
    }
    Ok(())
}

fn delete(ctx: &AppContext, target: &str) -> Result<()> {
    let ep = ctx.resolve_endpoint(target)?;
    // Feed-sourced entries are owned by the synchronizer; deleting one by
    // hand would silently reappear on the next sync.
    if ep.from_subscription {
        bail!(
            "config '{}' is managed by its group's subscription; delete the group or remove it from the feed",
            ep.name
        );
    }
    ctx.store.delete_endpoint(ep.id)?;
    println!("Deleted config '{}' (ID: {})", ep.name, ep.id);
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{cut}…")
    }
}
