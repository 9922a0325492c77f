//! `vmctl`: command-line client for the vmctl management API.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use vmctl_gateway::client::{describe, ClientError, VmctlClient};

#[derive(Debug, Parser)]
#[command(name = "vmctl", version, about = "Manage microVMs through a vmctl-gateway server")]
struct Cli {
    /// Management API address.
    #[arg(short, long, global = true, env = "VMCTL_SERVER", default_value = "http://127.0.0.1:3456")]
    server: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create and boot a VM.
    Start {
        #[arg(short, long)]
        name: String,
        /// Launch profile passed to the guest.
        #[arg(short, long)]
        entry_point: Option<String>,
    },
    /// Stop a running VM.
    Stop {
        #[arg(short, long)]
        name: String,
    },
    /// Destroy a VM.
    Destroy {
        #[arg(short, long)]
        name: String,
    },
    /// Destroy every VM.
    DestroyAll,
    /// Show one VM.
    List {
        #[arg(short, long)]
        name: String,
    },
    /// Show every VM.
    ListAll,
}

async fn run(cli: Cli) -> Result<(), ClientError> {
    let client = VmctlClient::new(&cli.server)?;
    match cli.command {
        Command::Start { name, entry_point } => {
            let info = client.start(&name, entry_point.as_deref()).await?;
            println!("{}", describe(&info));
        }
        Command::Stop { name } => {
            client.stop(&name).await?;
            println!("VM {name} stopped");
        }
        Command::Destroy { name } => {
            client.destroy(&name).await?;
            println!("VM {name} destroyed");
        }
        Command::DestroyAll => {
            let report = client.destroy_all().await?;
            for name in &report.destroyed {
                println!("VM {name} destroyed");
            }
            for failure in &report.failed {
                eprintln!("VM {} destroyed with errors: {}", failure.name, failure.error);
            }
            if !report.failed.is_empty() {
                return Err(ClientError::Api {
                    status: 500,
                    kind: "destroy_failed".to_owned(),
                    message: format!("{} VM(s) failed to tear down cleanly", report.failed.len()),
                });
            }
        }
        Command::List { name } => {
            let info = client.list(&name).await?;
            println!("{}", describe(&info));
        }
        Command::ListAll => {
            for info in client.list_all().await? {
                println!("{}", describe(&info));
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
