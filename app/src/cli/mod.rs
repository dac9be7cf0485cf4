//! Command-line surface and dispatch.

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::context::AppContext;
use crate::logging;

pub mod completion;
pub mod config_cmd;
pub mod connect;
pub mod group_cmd;
pub mod sub_cmd;
pub mod test_cmd;
pub mod tund;
pub mod version;

#[derive(Parser, Debug)]
#[command(
    name = "raycoon",
    version,
    about = "Manage proxy endpoints and run a local SOCKS/HTTP proxy or system-wide tunnel"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage proxy configs
    #[command(subcommand)]
    Config(config_cmd::ConfigCmd),
    /// Manage config groups
    #[command(subcommand)]
    Group(group_cmd::GroupCmd),
    /// Manage subscriptions
    #[command(subcommand)]
    Sub(sub_cmd::SubCmd),
    /// Connect to a proxy config
    Connect(connect::ConnectArgs),
    /// Disconnect the current connection
    Disconnect,
    /// Show connection status
    Status,
    /// Test config latency
    Test(test_cmd::TestArgs),
    /// Generate shell completion scripts
    Completion(completion::CompletionArgs),
    /// Show version information
    Version,
    /// Internal tunnel daemon (spawned by connect, not for direct use)
    #[command(hide = true)]
    Tund(tund::TundArgs),
}

pub async fn run(args: Args) -> Result<()> {
    match args.command {
        // The daemon subcommand owns the device and must not touch the
        // regular app bootstrap (no store, no recovery pass).
        Commands::Tund(cmd) => {
            logging::init_daemon();
            tund::run(cmd).await
        }
        command => {
            logging::init();

            // Recover from a crashed tunnel daemon. Undoing routes and
            // DNS needs privileges, so unprivileged invocations leave
            // the state alone.
            if rc_paths::is_elevated() {
                if let Err(e) = rc_tun::cleanup_if_needed().await {
                    tracing::warn!(error = %e, "tunnel state recovery failed");
                }
            }

            match command {
                Commands::Config(cmd) => config_cmd::run(&AppContext::init()?, cmd),
                Commands::Group(cmd) => group_cmd::run(&AppContext::init()?, cmd),
                Commands::Sub(cmd) => sub_cmd::run(&AppContext::init()?, cmd).await,
                Commands::Connect(cmd) => connect::connect(&AppContext::init()?, cmd).await,
                Commands::Disconnect => connect::disconnect(&AppContext::init()?).await,
                Commands::Status => connect::status(&AppContext::init()?),
                Commands::Test(cmd) => test_cmd::run(&AppContext::init()?, cmd).await,
                Commands::Completion(cmd) => completion::run(cmd),
                Commands::Version => version::run(),
                Commands::Tund(_) => unreachable!("handled above"),
            }
        }
    }
}
