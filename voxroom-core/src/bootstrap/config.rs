//! Configuration loading

use anyhow::Result;
use tracing::info;

use crate::Config;

/// Load configuration from a config file or environment variables
///
/// Config file search order:
/// 1. `explicit` (the `--config` flag)
/// 2. `VOXROOM_CONFIG_PATH` environment variable
/// 3. ./config.yaml (current working directory)
/// 4. /config/config.yaml (container mount path)
/// 5. Fall back to environment variables only
///
/// An explicit path that cannot be loaded is an error; the fallbacks are not.
pub fn load_config(explicit: Option<&str>) -> Result<Config> {
    let config = if let Some(path) = explicit {
        if !std::path::Path::new(path).exists() {
            anyhow::bail!("Config file {path} does not exist");
        }
        eprintln!("Loading config from {path}");
        Config::from_file(path)
            .map_err(|e| anyhow::anyhow!("Failed to load config {path}: {e}"))?
    } else {
        let config_path = std::env::var("VOXROOM_CONFIG_PATH")
            .ok()
            .filter(|p| std::path::Path::new(p).exists())
            .or_else(|| existing("config.yaml"))
            .or_else(|| existing("/config/config.yaml"));

        if let Some(path) = config_path {
            eprintln!("Loading config from {path}");
            Config::from_file(&path).unwrap_or_else(|e| {
                eprintln!("Failed to load {path}: {e}");
                eprintln!("Falling back to environment variables");
                Config::from_env().unwrap_or_default()
            })
        } else {
            eprintln!("No config file found, using environment variables");
            Config::from_env().unwrap_or_else(|e| {
                eprintln!("Failed to load config: {e}");
                eprintln!("Using default configuration");
                Config::default()
            })
        }
    };

    // Fail fast on misconfigurations
    if let Err(errors) = config.validate() {
        for error in &errors {
            tracing::error!("Config validation error: {}", error);
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s): {}",
            errors.len(),
            errors.join("; ")
        ));
    }

    info!("Configuration loaded and validated successfully");
    info!("HTTP address: {}", config.http_address());

    Ok(config)
}

fn existing(path: &str) -> Option<String> {
    std::path::Path::new(path)
        .exists()
        .then(|| path.to_string())
}
