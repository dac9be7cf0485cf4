//! `test` command: single, batch, and history.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Args, Subcommand};

use rc_latency::{new_strategy, ProgressFn, Tester, TesterConfig};
use rc_storage::EndpointFilter;

use crate::context::AppContext;

#[derive(Args, Debug)]
pub struct TestArgs {
    /// Config ID or name
    pub target: Option<String>,
    /// Test every enabled config
    #[arg(long)]
    pub all: bool,
    /// Restrict --all to a group
    #[arg(short, long)]
    pub group: Option<String>,
    /// Test strategy (tcp | http)
    #[arg(short, long)]
    pub strategy: Option<String>,
    /// Concurrent test workers
    #[arg(short, long)]
    pub workers: Option<usize>,
    /// Per-test timeout in milliseconds
    #[arg(short, long)]
    pub timeout: Option<u64>,
    #[command(subcommand)]
    pub command: Option<TestSub>,
}

#[derive(Subcommand, Debug)]
pub enum TestSub {
    /// Show recorded latency history for a config
    History {
        /// Config ID or name
        target: String,
        /// Number of records to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
}

pub async fn run(ctx: &AppContext, args: TestArgs) -> Result<()> {
    if let Some(TestSub::History { target, limit }) = args.command {
        return history(ctx, &target, limit);
    }

    let endpoints = if let Some(target) = &args.target {
        vec![ctx.resolve_endpoint(target)?]
    } else if args.all || args.group.is_some() {
        let mut filter = EndpointFilter {
            enabled: Some(true),
            ..Default::default()
        };
        if let Some(group) = &args.group {
            filter.group_id = Some(ctx.resolve_group(group)?.id);
        }
        ctx.store.endpoints(&filter)?
    } else {
        bail!("specify a config ID or name, or use --all");
    };

    if endpoints.is_empty() {
        println!("No enabled configs to test.");
        return Ok(());
    }

    let strategy_name = match &args.strategy {
        Some(name) => name.clone(),
        None => ctx.latency_strategy()?,
    };
    let workers = match args.workers {
        Some(w) => w,
        None => ctx.latency_workers()?,
    };
    let timeout_ms = match args.timeout {
        Some(t) => t,
        None => ctx.latency_timeout_ms()?,
    };

    let strategy = new_strategy(&strategy_name)?;
    let tester = Tester::new(
        Arc::clone(&ctx.store),
        Arc::from(strategy),
        TesterConfig {
            workers,
            timeout: Duration::from_millis(timeout_ms),
        },
    );

    println!(
        "Testing {} config(s) with the {strategy_name} strategy...",
        endpoints.len()
    );
    let progress: ProgressFn = Arc::new(|result, current, total| {
        match result.record.latency_ms {
            Some(ms) => println!("[{current}/{total}] {:<28} {ms} ms", result.endpoint.name),
            None => println!(
                "[{current}/{total}] {:<28} failed ({})",
                result.endpoint.name, result.record.error_message
            ),
        }
    });

    let batch = tester.test_batch(endpoints, Some(progress)).await;

    println!();
    println!("Results (fastest first):");
    for result in &batch.results {
        match result.record.latency_ms {
            Some(ms) => println!("  {:<28} {ms} ms", result.endpoint.name),
            None => println!("  {:<28} failed", result.endpoint.name),
        }
    }
    println!();
    println!(
        "{} tested, {} ok, {} failed in {:.1}s",
        batch.tested,
        batch.succeeded,
        batch.failed,
        batch.duration.as_secs_f64()
    );
    Ok(())
}

fn history(ctx: &AppContext, target: &str, limit: usize) -> Result<()> {
    let endpoint = ctx.resolve_endpoint(target)?;
    let records = ctx.store.latency_history(endpoint.id, limit)?;
    if records.is_empty() {
        println!("No latency records for '{}'.", endpoint.name);
        return Ok(());
    }

    println!("Latency history for '{}':", endpoint.name);
    println!("{:<22} {:<10} {:<10} {}", "TESTED AT", "STRATEGY", "RESULT", "DETAIL");
    for record in records {
        let (result, detail) = match record.latency_ms {
            Some(ms) => (format!("{ms} ms"), String::new()),
            None => ("failed".to_string(), record.error_message.clone()),
        };
        println!(
            "{:<22} {:<10} {:<10} {detail}",
            record.tested_at.format("%Y-%m-%d %H:%M:%S"),
            record.strategy,
            result,
        );
    }
    Ok(())
}
