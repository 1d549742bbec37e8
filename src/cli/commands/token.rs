use anyhow::Context;
use clap::Subcommand;
use serde_json::json;
use uuid::Uuid;

use crate::auth::{generate_jwt, Claims};
use crate::cli::utils::output_success;
use crate::cli::OutputFormat;

#[derive(Subcommand)]
pub enum TokenCommands {
    #[command(about = "Issue a bearer token for a tenant (development use)")]
    Issue {
        #[arg(long, help = "Tenant id")]
        tenant: Uuid,
        #[arg(long, help = "Group id, for two-level tenancy")]
        group: Option<Uuid>,
        #[arg(long, default_value = "cli", help = "Token subject")]
        subject: String,
    },
}

pub async fn handle(cmd: TokenCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        TokenCommands::Issue { tenant, group, subject } => {
            if tenant.is_nil() {
                anyhow::bail!("tenant id must not be nil");
            }

            let claims = Claims::new(subject, tenant, group);
            let token = generate_jwt(&claims).context("issuing token")?;

            match output_format {
                OutputFormat::Json => output_success(
                    output_format,
                    "Token issued",
                    Some(json!({ "token": token, "claims": claims })),
                ),
                OutputFormat::Text => {
                    println!("{}", token);
                    Ok(())
                }
            }
        }
    }
}
