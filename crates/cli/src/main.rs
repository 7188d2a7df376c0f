// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! EdgeMesh CLI (em)
//!
//! Thin surface over the coordinator's control plane: start a node,
//! register a device, run a routed command.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "em", version, about = "EdgeMesh task orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a coordinator (default) or worker node
    Server(commands::server::ServerArgs),

    /// Talk to a running coordinator
    Client {
        #[command(subcommand)]
        command: commands::client::ClientCommand,
    },
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Command::Server(args) => commands::server::run(args).await,
        Command::Client { command } => commands::client::run(command).await,
    }
}
