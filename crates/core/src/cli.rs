use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::AppConfig;

#[derive(Parser)]
#[command(
    name = "teamserver",
    version = env!("CARGO_PKG_VERSION"),
    about = "Teamserver - multi-operator agent and listener core"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the teamserver
    Server {
        /// Profile with host, port, plugins and operators (TOML)
        #[arg(long)]
        profile: Option<PathBuf>,
        /// Verbose logging
        #[arg(long)]
        debug: bool,
    },
    /// Print version and build information
    Version,
    /// Print an Argon2 hash usable as an operator password in a profile
    HashPassword {
        password: String,
    },
}

impl Cli {
    /// Whether debug logging was asked for on the command line.
    #[must_use]
    pub fn debug(&self) -> bool {
        matches!(self.command, Some(Commands::Server { debug: true, .. }))
    }
}

pub async fn dispatch(command: Option<Commands>) -> anyhow::Result<()> {
    match command {
        None => run_server(None).await,
        Some(Commands::Server { profile, .. }) => run_server(profile).await,
        Some(Commands::Version) => {
            cmd_version();
            Ok(())
        }
        Some(Commands::HashPassword { password }) => {
            println!("{}", crate::operators::hash_password(&password)?);
            Ok(())
        }
    }
}

async fn run_server(profile: Option<PathBuf>) -> anyhow::Result<()> {
    let config = match profile {
        Some(path) => AppConfig::load_with_profile(Some(&path))?,
        None => AppConfig::load()?,
    };
    crate::run(config).await
}

fn cmd_version() {
    println!("teamserver {}", crate::VERSION);
    println!("plugin sdk {}", teamserver_shared::SDK_VERSION);
    println!("os:     {}", std::env::consts::OS);
    println!("arch:   {}", std::env::consts::ARCH);
}
