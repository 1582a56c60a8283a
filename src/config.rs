use anyhow::{Context, Result};
use clap::ArgMatches;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use crate::{BINDING_NAME, SIDECAR_NAME};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub daprd_binary_path: String,
    /// Directory holding one sub-directory of component manifests per flow.
    pub components_root: String,
    pub sidecar_name: String,
    pub binding_name: String,
    pub log_level: String,
    pub startup_timeout_secs: u64,
    pub readiness_poll_interval_ms: u64,
    /// Pause before the first CosmosDB query to stay under the metadata rate limit.
    pub verification_delay_secs: u64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            daprd_binary_path: default_daprd_path(),
            components_root: "./components".to_string(),
            sidecar_name: SIDECAR_NAME.to_string(),
            binding_name: BINDING_NAME.to_string(),
            log_level: "info".to_string(),
            startup_timeout_secs: 60,
            readiness_poll_interval_ms: 250,
            verification_delay_secs: 3,
        }
    }
}

// `dapr init` installs daprd under ~/.dapr/bin
fn default_daprd_path() -> String {
    std::env::var("HOME")
        .map(|home| format!("{home}/.dapr/bin/daprd"))
        .unwrap_or_else(|_| "daprd".to_string())
}

/// Finds `program` the way process spawning does: a bare name is looked up
/// in `PATH`, anything with a directory part is used as given.
pub fn resolve_binary(program: &Path) -> Option<PathBuf> {
    resolve_binary_in(program, std::env::var_os("PATH"))
}

fn resolve_binary_in(program: &Path, search_path: Option<OsString>) -> Option<PathBuf> {
    let mut components = program.components();
    let is_bare_name = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );

    if !is_bare_name {
        return program.is_file().then(|| program.to_path_buf());
    }

    let search_path = search_path?;
    std::env::split_paths(&search_path)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

impl HarnessConfig {
    pub fn validate(&self) -> Result<()> {
        self.validate_in(std::env::var_os("PATH"))
    }

    fn validate_in(&self, search_path: Option<OsString>) -> Result<()> {
        if resolve_binary_in(Path::new(&self.daprd_binary_path), search_path).is_none() {
            return Err(anyhow::anyhow!(
                "daprd binary not found at path: {}",
                self.daprd_binary_path
            ));
        }

        if !Path::new(&self.components_root).is_dir() {
            return Err(anyhow::anyhow!(
                "Components directory not found: {}",
                self.components_root
            ));
        }

        if self.sidecar_name.trim().is_empty() {
            return Err(anyhow::anyhow!("sidecar_name must not be empty"));
        }

        if self.binding_name.trim().is_empty() {
            return Err(anyhow::anyhow!("binding_name must not be empty"));
        }

        if self.startup_timeout_secs == 0 {
            return Err(anyhow::anyhow!(
                "startup_timeout_secs must be greater than 0"
            ));
        }

        if self.readiness_poll_interval_ms == 0 {
            return Err(anyhow::anyhow!(
                "readiness_poll_interval_ms must be greater than 0"
            ));
        }

        Ok(())
    }

    pub fn components_path(&self, variant: &str) -> PathBuf {
        Path::new(&self.components_root).join(variant)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn readiness_poll_interval(&self) -> Duration {
        Duration::from_millis(self.readiness_poll_interval_ms)
    }

    pub fn verification_delay(&self) -> Duration {
        Duration::from_secs(self.verification_delay_secs)
    }

    pub fn apply_cli_overrides(&mut self, matches: &ArgMatches) {
        if let Some(path) = matches.get_one::<String>("daprd") {
            self.daprd_binary_path = path.clone();
        }

        if let Some(root) = matches.get_one::<String>("components") {
            self.components_root = root.clone();
        }

        if let Some(log_level) = matches.get_one::<String>("log-level") {
            self.log_level = log_level.clone();
        }

        if let Some(timeout_str) = matches.get_one::<String>("startup-timeout") {
            if let Ok(timeout) = timeout_str.parse::<u64>() {
                self.startup_timeout_secs = timeout;
            }
        }
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("COSMOS_CERT_DAPRD") {
            self.daprd_binary_path = path;
        }

        if let Some(root) = lookup("COSMOS_CERT_COMPONENTS") {
            self.components_root = root;
        }

        if let Some(name) = lookup("COSMOS_CERT_SIDECAR_NAME") {
            self.sidecar_name = name;
        }

        if let Some(name) = lookup("COSMOS_CERT_BINDING_NAME") {
            self.binding_name = name;
        }

        if let Some(log_level) = lookup("COSMOS_CERT_LOG_LEVEL") {
            self.log_level = log_level;
        }

        if let Some(timeout_str) = lookup("COSMOS_CERT_STARTUP_TIMEOUT") {
            if let Ok(timeout) = timeout_str.parse::<u64>() {
                self.startup_timeout_secs = timeout;
            }
        }

        if let Some(delay_str) = lookup("COSMOS_CERT_VERIFICATION_DELAY") {
            if let Ok(delay) = delay_str.parse::<u64>() {
                self.verification_delay_secs = delay;
            }
        }
    }
}

/// Load configuration: CLI args > env vars > config file > defaults
pub fn load_config(config_path: Option<&str>, matches: &ArgMatches) -> Result<HarnessConfig> {
    let mut config = load_file_or_default(config_path)?;

    config.apply_env_overrides();
    config.apply_cli_overrides(matches);

    config
        .validate()
        .with_context(|| "Configuration validation failed")?;

    log::info!("Configuration loaded successfully");
    log::debug!("Final config: {config:?}");

    Ok(config)
}

/// Configuration for the test suite: env vars > config file > defaults, unvalidated.
pub fn load_test_config() -> Result<HarnessConfig> {
    let path = std::env::var("COSMOS_CERT_CONFIG").ok();
    let mut config = load_file_or_default(path.as_deref())?;
    config.apply_env_overrides();
    Ok(config)
}

fn load_file_or_default(config_path: Option<&str>) -> Result<HarnessConfig> {
    let Some(path) = config_path else {
        return Ok(HarnessConfig::default());
    };

    if !Path::new(path).exists() {
        log::info!("Config file not found: {path}, using defaults");
        return Ok(HarnessConfig::default());
    }

    let file_content =
        fs::read_to_string(path).with_context(|| format!("Failed to read config file: {path}"))?;
    let config: HarnessConfig = toml::from_str(&file_content)
        .with_context(|| format!("Failed to parse config file: {path}"))?;

    log::info!("Loaded configuration from file: {path}");
    Ok(config)
}

/// Create a sample configuration file
pub fn create_sample_config(path: &str) -> Result<()> {
    let config = HarnessConfig::default();
    let toml_content =
        toml::to_string_pretty(&config).context("Failed to serialize default config")?;

    fs::write(path, toml_content)
        .with_context(|| format!("Failed to write sample config to: {path}"))?;

    println!("Sample configuration written to: {path}");
    Ok(())
}
