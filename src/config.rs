use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize)]
pub struct Config {
    /// Notion integration token
    pub notion_token: String,

    /// Name of the Calendar app calendar that receives events
    pub calendar_name: String,

    /// Ids of the Notion databases to mirror
    pub databases: Vec<String>,

    /// Directory holding one snapshot file per database
    #[serde(default = "default_snapshot_dir")]
    pub snapshot_dir: String,
}

fn default_snapshot_dir() -> String {
    "~/.local/share/notioncal".to_string()
}

/// Get the config directory path (~/.config/notioncal)
pub fn config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .context("Could not determine config directory")?
        .join("notioncal");
    Ok(config_dir)
}

/// Get the config file path (~/.config/notioncal/config.toml)
pub fn config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

/// Load config from ~/.config/notioncal/config.toml
pub fn load_config() -> Result<Config> {
    let path = config_path()?;

    if !path.exists() {
        anyhow::bail!(
            "Config file not found at {}\n\n\
            Create it with your Notion token and calendar:\n\n\
            notion_token = \"secret_...\"\n\
            calendar_name = \"Personal\"\n\
            databases = [\"your-database-id\"]",
            path.display()
        );
    }

    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;

    let config: Config = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;

    validate(&config)?;

    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.notion_token.trim().is_empty() {
        anyhow::bail!("notion_token is empty in config.toml");
    }
    if config.calendar_name.trim().is_empty() {
        anyhow::bail!("calendar_name is empty in config.toml");
    }
    if config.databases.iter().all(|id| id.trim().is_empty()) {
        anyhow::bail!("No valid database ids found in config.toml");
    }
    Ok(())
}

/// Path of the snapshot file for one database
pub fn snapshot_path(config: &Config, database_id: &str) -> PathBuf {
    expand_path(&config.snapshot_dir).join(format!("{database_id}.csv"))
}

/// Expand ~ in paths to the home directory
pub fn expand_path(path: &str) -> PathBuf {
    if path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(&path[2..]);
        }
    }
    PathBuf::from(path)
}
