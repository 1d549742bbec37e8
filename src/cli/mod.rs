pub mod commands;
pub mod utils;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

#[derive(Parser)]
#[command(name = "corp")]
#[command(about = "Corp CLI - tenant isolation tooling for the Corp API")]
#[command(version)]
pub struct Cli {
    #[arg(long, global = true, help = "Output in human-readable text format")]
    pub text: bool,

    #[arg(long, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Inspect the effective configuration")]
    Config {
        #[command(subcommand)]
        cmd: commands::config::ConfigCommands,
    },

    #[command(about = "Row-level security policy management")]
    Rls {
        #[command(subcommand)]
        cmd: commands::rls::RlsCommands,
    },

    #[command(about = "Development token issuing")]
    Token {
        #[command(subcommand)]
        cmd: commands::token::TokenCommands,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_cli(cli: &Cli) -> Self {
        if cli.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let output_format = OutputFormat::from_cli(&cli);

    match cli.command {
        Commands::Config { cmd } => commands::config::handle(cmd, output_format).await,
        Commands::Rls { cmd } => commands::rls::handle(cmd, output_format).await,
        Commands::Token { cmd } => commands::token::handle(cmd, output_format).await,
    }
}
