use anyhow::Context;
use clap::Subcommand;
use serde_json::json;

use crate::cli::utils::output_success;
use crate::cli::OutputFormat;
use crate::database::DatabaseManager;
use crate::rls::RlsPolicy;

#[derive(Subcommand)]
pub enum RlsCommands {
    #[command(about = "Create policy functions and enable RLS on tenant tables")]
    Enable {
        #[arg(long, help = "Run the statements against DATABASE_URL instead of printing them")]
        apply: bool,
    },

    #[command(about = "Drop policies and functions and disable RLS on tenant tables")]
    Disable {
        #[arg(long, help = "Run the statements against DATABASE_URL instead of printing them")]
        apply: bool,
    },
}

pub async fn handle(cmd: RlsCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    let policy = RlsPolicy::corp();
    let (action, statements, apply) = match cmd {
        RlsCommands::Enable { apply } => ("enable", policy.enable_statements(), apply),
        RlsCommands::Disable { apply } => ("disable", policy.disable_statements(), apply),
    };

    if !apply {
        return match output_format {
            OutputFormat::Json => output_success(
                output_format,
                &format!("RLS {} statements", action),
                Some(json!({ "statements": statements })),
            ),
            OutputFormat::Text => {
                for statement in &statements {
                    println!("{};\n", statement);
                }
                Ok(())
            }
        };
    }

    let pool = DatabaseManager::main_pool()
        .await
        .context("connecting to DATABASE_URL")?;
    RlsPolicy::apply(&pool, &statements)
        .await
        .with_context(|| format!("applying RLS {} statements", action))?;

    output_success(
        output_format,
        &format!("Applied {} RLS {} statements", statements.len(), action),
        Some(json!({ "tables": policy.tables() })),
    )
}
