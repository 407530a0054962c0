//! Configuration file management for dayplan.
//!
//! Provides a TOML-based config file at `~/.config/dayplan/config.toml` and a
//! resolution chain: CLI flag > env var > config file > default.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use dayplan_core::SchedulerConfig;
use dayplan_db::config::DbConfig;

/// Environment variable naming the default anchors file.
pub const ANCHORS_ENV_VAR: &str = "DAYPLAN_ANCHORS_FILE";

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigFile {
    pub database: DatabaseSection,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub home: HomeSection,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DatabaseSection {
    pub url: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct HomeSection {
    /// Name the travel estimator knows home by.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Calendar export consulted when no `--anchors` flag is given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchors_file: Option<PathBuf>,
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the dayplan config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/dayplan` or `~/.config/dayplan`,
/// never the platform-specific `dirs::config_dir()`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("dayplan");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("dayplan")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

pub fn load_config_from(path: &Path) -> Result<ConfigFile> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file at {}", path.display()))?;
    Ok(config)
}

/// Serialize and write the config file, creating parent dirs as needed.
/// The file is owner read/write only on Unix.
pub fn save_config_to(path: &Path, config: &ConfigFile) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create config directory {}", dir.display()))?;
    }

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct DayplanConfig {
    pub db_config: DbConfig,
    pub scheduler: SchedulerConfig,
    pub anchors_file: Option<PathBuf>,
}

impl DayplanConfig {
    /// Resolve configuration from the default config file location.
    pub fn resolve(cli_db_url: Option<&str>) -> Result<Self> {
        Self::resolve_with(cli_db_url, &config_path())
    }

    /// Resolve using the chain: CLI flag > env var > config file > default.
    ///
    /// - DB URL: `cli_db_url` > `DAYPLAN_DATABASE_URL` > `database.url` > `DbConfig::DEFAULT_URL`
    /// - Anchors file: `DAYPLAN_ANCHORS_FILE` > `home.anchors_file` > none
    /// - Scheduler: `[scheduler]` > built-in defaults, with `home.location`
    ///   taking precedence over `scheduler.home_location`
    ///
    /// A missing config file is not an error; a malformed one is.
    pub fn resolve_with(cli_db_url: Option<&str>, path: &Path) -> Result<Self> {
        let file_config = if path.exists() {
            Some(load_config_from(path)?)
        } else {
            None
        };

        let db_url = if let Some(url) = cli_db_url {
            url.to_owned()
        } else if let Ok(url) = std::env::var(DbConfig::ENV_VAR) {
            url
        } else if let Some(ref cfg) = file_config {
            cfg.database.url.clone()
        } else {
            DbConfig::DEFAULT_URL.to_owned()
        };

        let (mut scheduler, home) = match file_config {
            Some(cfg) => (cfg.scheduler, cfg.home),
            None => (SchedulerConfig::default(), HomeSection::default()),
        };
        if let Some(location) = home.location {
            scheduler.home_location = location;
        }

        let anchors_file = std::env::var_os(ANCHORS_ENV_VAR)
            .map(PathBuf::from)
            .or(home.anchors_file);

        Ok(Self {
            db_config: DbConfig::new(db_url),
            scheduler,
            anchors_file,
        })
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
