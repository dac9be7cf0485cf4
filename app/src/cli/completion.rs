//! Shell completion scripts.

use anyhow::Result;
use clap::{Args, CommandFactory};
use clap_complete::{generate, Shell};

#[derive(Args, Debug)]
pub struct CompletionArgs {
    /// Target shell
    #[arg(value_enum)]
    pub shell: Shell,
}

pub fn run(args: CompletionArgs) -> Result<()> {
    let mut cmd = super::Args::command();
    let bin = cmd.get_name().to_string();
    generate(args.shell, &mut cmd, bin, &mut std::io::stdout());
    Ok(())
}
