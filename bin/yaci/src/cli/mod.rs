use std::future::Future;

use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use tokio::runtime::Runtime;

mod extract;

pub use extract::ExtractArgs;

#[derive(Debug, Parser)]
#[cfg_attr(test, derive(PartialEq))]
#[command(name = "yaci", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    commands: Commands,
}

impl Cli {
    pub fn run(self) -> Result<()> {
        match self.commands {
            Commands::Extract(args) => execute_async(args.execute())?,
            Commands::Completions(args) => args.execute(),
        }
    }
}

#[derive(Debug, Subcommand)]
#[cfg_attr(test, derive(PartialEq))]
pub enum Commands {
    #[command(about = "Extract blocks, transactions, and block results into a sink")]
    Extract(ExtractArgs),

    #[command(about = "Generate shell completion file for specified shell")]
    Completions(CompletionsArgs),
}

#[derive(Debug, Args)]
#[cfg_attr(test, derive(PartialEq))]
pub struct CompletionsArgs {
    pub shell: Shell,
}

impl CompletionsArgs {
    fn execute(self) -> Result<()> {
        let mut command = Cli::command();
        let name = command.get_name().to_string();
        clap_complete::generate(self.shell, &mut command, name, &mut std::io::stdout());
        Ok(())
    }
}

pub fn execute_async<F: Future>(future: F) -> Result<F::Output> {
    Ok(build_tokio_runtime().context("Failed to build tokio runtime")?.block_on(future))
}

fn build_tokio_runtime() -> std::io::Result<Runtime> {
    tokio::runtime::Builder::new_multi_thread().enable_all().build()
}
