use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration file picked up from the working directory
pub const DEFAULT_CONFIG_FILE: &str = "agent-mesh.toml";

/// Main configuration structure for the coordination mesh
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Path of the coordination document
    pub state_path: PathBuf,
    /// Upper bound on waiting for the document lock
    pub lock_timeout_ms: u64,
    /// Base poll interval while the lock is busy (jittered)
    pub lock_retry_interval_ms: u64,
    pub default_agent_ttl_secs: u64,
    pub default_task_ttl_secs: u64,
    pub default_file_ttl_secs: u64,
    /// Sweep stale leases at the start of every mutating command
    pub auto_sweep: bool,
    /// Audit entries kept in the document
    pub audit_log_limit: usize,
    /// Expired agents are purged this long after their lease ran out
    pub expired_agent_retention_secs: u64,
    /// Observability settings
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default filter when RUST_LOG is unset
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "warn".to_string(),
            log_format: LogFormat::Text,
        }
    }
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            state_path: PathBuf::from(".agent-mesh/state.json"),
            lock_timeout_ms: 5_000,
            lock_retry_interval_ms: 25,
            default_agent_ttl_secs: 300,   // 5 minutes
            default_task_ttl_secs: 1_800,  // 30 minutes
            default_file_ttl_secs: 1_800,
            auto_sweep: true,
            audit_log_limit: 500,
            expired_agent_retention_secs: 86_400, // 1 day
            observability: ObservabilityConfig::default(),
        }
    }
}

impl MeshConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration file (`agent-mesh.toml`, or `explicit_file`)
    /// 3. Environment variables (prefixed with AGENT_MESH_, `__` between nested keys)
    ///
    /// An explicitly named file must exist; the default one is optional.
    pub fn load(explicit_file: Option<&Path>) -> Result<Self> {
        let defaults = Config::try_from(&MeshConfig::default())?;
        let mut builder = Config::builder().add_source(defaults);

        match explicit_file {
            Some(path) => {
                if !path.exists() {
                    anyhow::bail!("Config file not found: {}", path.display());
                }
                builder = builder.add_source(File::from(path).format(FileFormat::Toml));
            }
            None => {
                if Path::new(DEFAULT_CONFIG_FILE).exists() {
                    builder = builder.add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Toml));
                }
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("AGENT_MESH")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to assemble configuration")?;
        let mesh_config: MeshConfig = config
            .try_deserialize()
            .context("Failed to parse configuration")?;
        mesh_config.validate()?;
        Ok(mesh_config)
    }

    fn validate(&self) -> Result<()> {
        if self.state_path.as_os_str().is_empty() {
            anyhow::bail!("state_path must not be empty");
        }
        if self.lock_retry_interval_ms == 0 {
            anyhow::bail!("lock_retry_interval_ms must be at least 1");
        }
        Ok(())
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = MeshConfig::default();
        assert_eq!(config.state_path, PathBuf::from(".agent-mesh/state.json"));
        assert_eq!(config.lock_timeout_ms, 5_000);
        assert!(config.auto_sweep);
        assert_eq!(config.observability.log_level, "warn");
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mesh.toml");
        std::fs::write(
            &path,
            "lock_timeout_ms = 750\nauto_sweep = false\n\n[observability]\nlog_format = \"json\"\n",
        )
        .unwrap();

        let config = MeshConfig::load(Some(&path)).unwrap();
        assert_eq!(config.lock_timeout_ms, 750);
        assert!(!config.auto_sweep);
        assert_eq!(config.observability.log_format, LogFormat::Json);
        assert_eq!(config.default_task_ttl_secs, 1_800);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(MeshConfig::load(Some(&dir.path().join("absent.toml"))).is_err());
    }

    #[test]
    fn test_rendered_config_loads_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rendered.toml");
        let mut config = MeshConfig::default();
        config.audit_log_limit = 42;
        std::fs::write(&path, config.to_toml().unwrap()).unwrap();

        assert_eq!(MeshConfig::load(Some(&path)).unwrap(), config);
    }
}
