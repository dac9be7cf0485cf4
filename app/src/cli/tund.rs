//! Hidden tunnel-daemon entry point, spawned by `connect --mode tunnel`.

use anyhow::Result;
use clap::Args;

#[derive(Args, Debug)]
pub struct TundArgs {
    /// SOCKS5 proxy port the tunnel forwards into
    #[arg(long, default_value_t = 1080)]
    pub socks_port: u16,
    /// Address to route around the tunnel (repeatable)
    #[arg(long = "bypass")]
    pub bypass: Vec<String>,
}

pub async fn run(args: TundArgs) -> Result<()> {
    rc_tun::run_daemon(args.socks_port, args.bypass).await?;
    Ok(())
}
