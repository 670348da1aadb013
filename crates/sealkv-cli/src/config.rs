use std::path::Path;

use anyhow::{Context, Result};
use sealkv::Options;
use serde::{Deserialize, Serialize};

use crate::kdf::KdfParams;

/// CLI configuration (loaded from sealkv.toml)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Options used when opening the database
    pub store: Options,
    /// Argon2id cost for passphrase-derived keys
    pub kdf: KdfParams,
    /// Log level when --log is not given (default: warn)
    pub log_level: Option<String>,
}

pub fn load_config(path: &Path) -> Result<CliConfig> {
    if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing config: {}", path.display()))
    } else {
        Ok(CliConfig::default())
    }
}
