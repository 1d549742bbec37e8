use clap::Subcommand;
use serde_json::json;

use crate::cli::utils::{output_fields, output_success};
use crate::cli::OutputFormat;
use crate::config;
use crate::tenancy::GuardFactory;

#[derive(Subcommand)]
pub enum ConfigCommands {
    #[command(about = "Show the effective configuration and the guard policy it produces")]
    Show,
}

pub async fn handle(cmd: ConfigCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        ConfigCommands::Show => show(output_format),
    }
}

fn show(output_format: OutputFormat) -> anyhow::Result<()> {
    let config = config::config();
    let factory = GuardFactory::from_config(config)?;

    match output_format {
        OutputFormat::Json => output_success(
            output_format,
            "Effective configuration",
            Some(json!({
                "config": config,
                "policy": {
                    "factory": factory,
                    "guard": if factory.uses_tenant_context() { "transactional" } else { "passthrough" },
                    "write_promotion": factory.promotes_on_save(),
                    "transaction_stamping": factory.stamps_attached_transactions(),
                }
            })),
        ),
        OutputFormat::Text => {
            println!("Configuration ({:?})", config.environment);
            output_fields(&[
                ("provider", factory.capability().provider.name().to_string()),
                ("database_url", config.database.url.is_some().to_string()),
                ("tenant_context", factory.features().is_tenant_context_enabled().to_string()),
                ("rls", factory.features().is_rls_enabled().to_string()),
                ("write_guard", factory.features().is_write_guard_enabled().to_string()),
                ("mode", format!("{:?}", factory.mode())),
            ]);
            println!("Guard policy");
            output_fields(&[
                (
                    "guard",
                    if factory.uses_tenant_context() { "transactional" } else { "passthrough" }.to_string(),
                ),
                ("write_promotion", factory.promotes_on_save().to_string()),
                ("transaction_stamping", factory.stamps_attached_transactions().to_string()),
            ]);
            Ok(())
        }
    }
}
