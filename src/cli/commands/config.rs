use super::{Command, Context};
use crate::config::MeshConfig;
use crate::error::MeshError;

/// Prints the configuration after files, environment and flags are applied
pub struct ConfigCommand;

impl Command for ConfigCommand {
    type Output = MeshConfig;

    async fn execute(&self, ctx: &Context) -> Result<MeshConfig, MeshError> {
        Ok(ctx.config.clone())
    }

    fn render(&self, config: &MeshConfig) -> String {
        config
            .to_toml()
            .unwrap_or_else(|err| format!("❌ Failed to render configuration: {err}"))
    }
}
