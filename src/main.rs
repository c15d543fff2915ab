use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;
use tracing::warn;

use agent_mesh::cli::commands::{dispatch, report_error, Context, OutputMode};
use agent_mesh::cli::Cli;
use agent_mesh::{init_telemetry, MeshConfig, MeshError};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let mode = if cli.json { OutputMode::Json } else { OutputMode::Text };

    let env_file = MeshConfig::load_env_file();
    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(err) => {
            let err = MeshError::InvalidInput(format!("configuration: {err:#}"));
            return report_error(cli.command.name(), &err, mode);
        }
    };

    if let Err(err) = init_telemetry(&config.observability) {
        eprintln!("⚠️  Logging disabled: {err}");
    }
    if let Err(err) = env_file {
        warn!(error = %err, "Ignoring unreadable .env file");
    }

    let ctx = Context::new(config);
    dispatch(&cli.command, &ctx, mode).await
}

/// Defaults, then config file, then environment, then global flags
fn load_config(cli: &Cli) -> Result<MeshConfig> {
    let mut config = MeshConfig::load(cli.config.as_deref())?;
    cli.apply_overrides(&mut config);
    Ok(config)
}
