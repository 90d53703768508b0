// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

use clap::Parser;
use tracing::error;

use switchboard::config::ServeConfig;

#[derive(Parser)]
#[command(
    name = "switchboard",
    version,
    about = "Project-scoped coordination service for automated agents."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Run the coordination server.
    Serve(ServeConfig),
    /// Create a keys file with one generated key for a project.
    Init {
        /// Project the generated key is scoped to.
        #[arg(long)]
        project: String,
        /// Where to write the keys file.
        #[arg(long, default_value = "switchboard-keys.json")]
        keys_file: PathBuf,
    },
}

fn init_tracing(config: &ServeConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log_level.clone()));
    if config.log_format == "json" {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(config) => {
            init_tracing(&config);
            if let Err(e) = switchboard::run(config).await {
                error!("fatal: {e:#}");
                std::process::exit(1);
            }
        }
        Commands::Init { project, keys_file } => {
            match switchboard::keys::bootstrap(&keys_file, &project) {
                Ok(key) => {
                    println!("{key}");
                }
                Err(e) => {
                    eprintln!("error: {e:#}");
                    std::process::exit(1);
                }
            }
        }
    }
}
