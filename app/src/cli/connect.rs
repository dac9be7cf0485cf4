//! `connect`, `disconnect` and `status`.

use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use clap::Args;

use rc_engine::{build_config, supervisor, BuildParams, Supervisor};
use rc_latency::{new_strategy, Tester, TesterConfig};
use rc_storage::EndpointFilter;
use rc_types::{ActiveConnection, CoreKind, Endpoint, VpnMode};

use crate::context::AppContext;

/// DNS servers handed to the engine config; they resolve through the
/// proxy in proxy mode and are bypass-routed in tunnel mode.
const DNS_SERVERS: [&str; 2] = ["8.8.8.8", "1.1.1.1"];

#[derive(Args, Debug)]
pub struct ConnectArgs {
    /// Config ID or name
    pub target: Option<String>,
    /// Pick the lowest-latency enabled config automatically
    #[arg(long)]
    pub auto: bool,
    /// Restrict --auto selection to a group
    #[arg(short, long)]
    pub group: Option<String>,
    /// VPN mode (proxy | tunnel)
    #[arg(short, long)]
    pub mode: Option<String>,
    /// SOCKS proxy port
    #[arg(short, long)]
    pub port: Option<u16>,
    /// HTTP proxy port
    #[arg(long)]
    pub http_port: Option<u16>,
    /// Engine backend (xray | singbox)
    #[arg(long)]
    pub core: Option<String>,
    /// Measure latency before connecting
    #[arg(long)]
    pub test: bool,
}

pub async fn connect(ctx: &AppContext, args: ConnectArgs) -> Result<()> {
    let endpoint = select_endpoint(ctx, &args)?;

    if let Some(active) = ctx.store.active_connection()? {
        let current = ctx
            .store
            .endpoint(active.endpoint_id)
            .map(|ep| ep.name)
            .unwrap_or_else(|_| format!("config {}", active.endpoint_id));
        if active.endpoint_id == endpoint.id {
            bail!("already connected to: {current}");
        }
        bail!("already connected to: {current}; run 'raycoon disconnect' first");
    }

    let vpn_mode = match &args.mode {
        Some(mode) => VpnMode::from_str(mode).map_err(|e| anyhow!(e))?,
        None => ctx.vpn_mode()?,
    };
    let socks_port = match args.port {
        Some(port) => port,
        None => ctx.socks_port()?,
    };
    let http_port = match args.http_port {
        Some(port) => port,
        None => ctx.http_port()?,
    };
    let core = match &args.core {
        Some(core) => CoreKind::from_str(core).map_err(|e| anyhow!(e))?,
        None => ctx.core_kind()?,
    };

    let engine = Supervisor::new(core)?;

    if args.test {
        use std::io::Write;
        print!("Testing latency to {}... ", endpoint.name);
        let _ = std::io::stdout().flush();
        let strategy = new_strategy(&ctx.latency_strategy()?)?;
        let tester = Tester::new(
            Arc::clone(&ctx.store),
            Arc::from(strategy),
            TesterConfig {
                workers: 1,
                timeout: std::time::Duration::from_millis(ctx.latency_timeout_ms()?),
            },
        );
        let result = tester.test_single(&endpoint).await;
        match result.record.latency_ms {
            Some(ms) => println!("{ms} ms"),
            None => println!("failed ({})", result.record.error_message),
        }
    }

    println!("Connecting to {} ({})...", endpoint.name, endpoint.protocol);
    println!("  Address: {}:{}", endpoint.address, endpoint.port);
    println!("  Mode:    {vpn_mode}");
    println!("  Core:    {core}");

    let config = build_config(&BuildParams {
        endpoint: &endpoint,
        vpn_mode,
        socks_port,
        http_port,
        log_level: "",
        dns_servers: &DNS_SERVERS,
        rules: &[],
    })?;

    engine.start(&config).await.context("failed to start proxy")?;

    if vpn_mode == VpnMode::Tunnel {
        println!("Enabling tunnel...");
        let bypasses = vec![endpoint.address.clone()];
        if let Err(e) = rc_tun::enable(socks_port, &bypasses).await {
            // The engine came up but the tunnel did not; leave nothing
            // half-connected behind.
            let _ = engine.stop().await;
            return Err(anyhow!(e).context("failed to enable tunnel"));
        }
    }

    ctx.store.set_active_connection(&ActiveConnection {
        endpoint_id: endpoint.id,
        core,
        vpn_mode,
        started_at: Utc::now(),
    })?;

    let mut used = endpoint.clone();
    used.use_count += 1;
    used.last_used = Some(Utc::now());
    if let Err(e) = ctx.store.update_endpoint(&used) {
        tracing::warn!(error = %e, "failed to update config usage stats");
    }

    println!();
    println!("Connected successfully.");
    if vpn_mode == VpnMode::Tunnel {
        println!("Tunnel active: all system traffic is routed through the proxy.");
    } else {
        println!("Configure your applications to use:");
        println!("  SOCKS5: 127.0.0.1:{socks_port}");
        println!("  HTTP:   127.0.0.1:{http_port}");
    }
    println!("Use 'raycoon disconnect' to stop.");
    Ok(())
}

pub async fn disconnect(ctx: &AppContext) -> Result<()> {
    let Some(active) = ctx.store.active_connection()? else {
        bail!("no active connection");
    };

    if active.vpn_mode == VpnMode::Tunnel {
        println!("Disabling tunnel...");
        if let Err(e) = rc_tun::disable().await {
            eprintln!("Warning: failed to disable tunnel: {e}");
        }
    }

    println!("Stopping proxy engine...");
    match Supervisor::new(active.core) {
        Ok(engine) => engine.stop().await.context("failed to stop engine")?,
        Err(e) => {
            // Without the binary there is no supervisor, but the stale
            // connection row must still be cleared.
            tracing::warn!(error = %e, "engine unavailable during disconnect");
        }
    }

    ctx.store.clear_active_connection()?;
    println!("Disconnected.");
    Ok(())
}

pub fn status(ctx: &AppContext) -> Result<()> {
    let Some(active) = ctx.store.active_connection()? else {
        println!("Status: Not connected");
        return Ok(());
    };

    let endpoint = ctx
        .store
        .endpoint(active.endpoint_id)
        .context("active connection references a missing config")?;
    let group = ctx.store.group(endpoint.group_id)?;
    let engine_running = supervisor::running_from_pid_file()?;

    println!("Connection Status");
    println!("═════════════════");
    if engine_running {
        println!("Status:    ● Connected");
    } else {
        println!("Status:    ○ Disconnected (stale)");
    }
    println!("Config:    {} (ID: {})", endpoint.name, endpoint.id);
    println!("Protocol:  {}", endpoint.protocol);
    println!("Address:   {}:{}", endpoint.address, endpoint.port);
    println!("Group:     {}", group.name);
    println!("Core:      {}", active.core);
    println!("Mode:      {}", active.vpn_mode);
    println!("Started:   {}", active.started_at.to_rfc3339());
    let uptime = Utc::now() - active.started_at;
    println!("Uptime:    {}", format_duration(uptime));

    if engine_running {
        if let Ok(engine) = Supervisor::new(active.core) {
            let stats = engine.stats();
            println!(
                "Traffic:   ↑ {} ↓ {} (↑ {}/s ↓ {}/s)",
                format_bytes(stats.total_upload),
                format_bytes(stats.total_download),
                format_bytes(stats.upload_speed),
                format_bytes(stats.download_speed),
            );
        }
    } else {
        println!();
        println!("The engine process is not running; the connection state is stale.");
        println!("Run 'raycoon disconnect' to clear it, then reconnect.");
    }
    Ok(())
}

fn select_endpoint(ctx: &AppContext, args: &ConnectArgs) -> Result<Endpoint> {
    if let Some(target) = &args.target {
        return ctx.resolve_endpoint(target);
    }
    if !args.auto {
        bail!("specify a config ID or name, or use --auto");
    }

    let mut filter = EndpointFilter {
        enabled: Some(true),
        ..Default::default()
    };
    if let Some(group) = &args.group {
        filter.group_id = Some(ctx.resolve_group(group)?.id);
    }
    let endpoints = ctx.store.endpoints(&filter)?;
    if endpoints.is_empty() {
        bail!("no enabled configs found");
    }

    // Lowest measured latency wins; endpoints without data lose to any
    // measured one.
    let mut best: Option<(i64, &Endpoint)> = None;
    for ep in &endpoints {
        if let Some(record) = ctx.store.latest_latency(ep.id)? {
            if let (true, Some(ms)) = (record.success, record.latency_ms) {
                if best.map_or(true, |(best_ms, _)| ms < best_ms) {
                    best = Some((ms, ep));
                }
            }
        }
    }
    Ok(best
        .map(|(_, ep)| ep.clone())
        .unwrap_or_else(|| endpoints[0].clone()))
}

fn format_duration(d: chrono::Duration) -> String {
    let secs = d.num_seconds().max(0);
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h}h{m:02}m{s:02}s")
    } else if m > 0 {
        format!("{m}m{s:02}s")
    } else {
        format!("{s}s")
    }
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    match bytes {
        b if b >= GB => format!("{:.1} GB", b as f64 / GB as f64),
        b if b >= MB => format!("{:.1} MB", b as f64 / MB as f64),
        b if b >= KB => format!("{:.1} KB", b as f64 / KB as f64),
        b => format!("{b} B"),
    }
}
