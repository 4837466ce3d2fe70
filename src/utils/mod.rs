pub mod casing;

use anyhow::{Context, Result};
use config::{Environment, File};
use std::path::Path;
use tracing::info;

use crate::models::common::Config;

pub const ENV_PREFIX: &str = "BURROW_FEED";

pub fn load_config<P: AsRef<Path>>(file_name: P) -> Result<Config> {
    // Build the path to the config file
    let manifest_dir = env!("CARGO_MANIFEST_DIR").to_string();
    let config_path = Path::new(&manifest_dir).join(file_name);
    info!("Config path: {}", config_path.to_string_lossy());

    load_config_from(&config_path)
}

pub fn load_config_from(config_path: &Path) -> Result<Config> {
    // The file is optional; every field has a default
    let settings = config::Config::builder()
        .add_source(File::from(config_path).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("failed to read config sources")?;

    let mut config: Config = settings
        .try_deserialize()
        .context("failed to parse config")?;

    // Blank account means no narrowing
    config.filter.account_id = config
        .filter
        .account_id
        .take()
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty());

    config.validate().context("invalid config")?;

    Ok(config)
}
