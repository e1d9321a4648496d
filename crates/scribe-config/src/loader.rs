//! Layered configuration loading.
//!
//! # Design
//! - Precedence, lowest first: defaults, JSON file named by `SCRIBE_CONFIG`,
//!   `SCRIBE_*` environment overrides.
//! - The environment is read through a lookup function so callers and tests
//!   can supply their own source.
//! - The merged result is validated before it is returned.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::model::EngineConfig;
use crate::validate::validate;

/// Environment variable naming an optional JSON configuration file.
pub const CONFIG_PATH_ENV: &str = "SCRIBE_CONFIG";

/// Load configuration from the process environment.
///
/// # Errors
///
/// Returns an error when the configuration file cannot be read or parsed, an
/// override cannot be parsed, or the merged result fails validation.
pub fn from_env() -> ConfigResult<EngineConfig> {
    from_lookup(|name| std::env::var(name).ok())
}

/// Load configuration using `lookup` as the environment source.
///
/// # Errors
///
/// See [`from_env`].
pub fn from_lookup<F>(lookup: F) -> ConfigResult<EngineConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match lookup(CONFIG_PATH_ENV).filter(|value| !value.trim().is_empty()) {
        Some(path) => read_file(Path::new(path.trim()))?,
        None => EngineConfig::default(),
    };
    apply_overrides(&mut config, &lookup)?;
    validate(&config)?;
    Ok(config)
}

/// Load and validate a JSON configuration file without environment overrides.
///
/// # Errors
///
/// Returns an error when the file cannot be read or parsed, or fails validation.
pub fn from_file(path: &Path) -> ConfigResult<EngineConfig> {
    let config = read_file(path)?;
    validate(&config)?;
    Ok(config)
}

fn read_file(path: &Path) -> ConfigResult<EngineConfig> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
        path: PathBuf::from(path),
        source,
    })?;
    let config = serde_json::from_str(&raw).map_err(|source| ConfigError::ParseFile {
        path: PathBuf::from(path),
        source,
    })?;
    debug!(path = %path.display(), "loaded configuration file");
    Ok(config)
}

fn apply_overrides<F>(config: &mut EngineConfig, lookup: &F) -> ConfigResult<()>
where
    F: Fn(&str) -> Option<String>,
{
    override_parsed(lookup, "SCRIBE_SYNC_THRESHOLD_BYTES", &mut config.sync_threshold_bytes)?;
    override_parsed(
        lookup,
        "SCRIBE_STREAMING_THRESHOLD_BYTES",
        &mut config.streaming_threshold_bytes,
    )?;
    override_parsed(
        lookup,
        "SCRIBE_CHUNKED_WRITE_THRESHOLD_BYTES",
        &mut config.chunked_write_threshold_bytes,
    )?;
    override_parsed(lookup, "SCRIBE_WRITE_CHUNK_BYTES", &mut config.write_chunk_bytes)?;
    override_parsed(lookup, "SCRIBE_CHUNK_PAUSE_MS", &mut config.chunk_pause_ms)?;
    override_parsed(lookup, "SCRIBE_DRAIN_TIMEOUT_MS", &mut config.drain_timeout_ms)?;
    override_parsed(lookup, "SCRIBE_FORCE_GRACE_MS", &mut config.force_grace_ms)?;
    override_parsed(lookup, "SCRIBE_QUEUE_CAPACITY", &mut config.queue_capacity)?;
    override_parsed(lookup, "SCRIBE_WRITE_BOM", &mut config.write_bom)?;
    if let Some(label) = lookup("SCRIBE_LEGACY_ENCODING") {
        config.legacy_encoding = label.trim().to_string();
    }
    Ok(())
}

fn override_parsed<F, T>(lookup: &F, name: &'static str, slot: &mut T) -> ConfigResult<()>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    let Some(raw) = lookup(name) else {
        return Ok(());
    };
    *slot = raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        name,
        value: raw.clone(),
        reason: "unparseable",
    })?;
    debug!(name, "applied environment override");
    Ok(())
}
