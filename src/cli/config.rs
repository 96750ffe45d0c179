use std::path::Path;

use anyhow::{Context as _, Result};
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "hrflow.yaml";

/// Configuration loaded from `hrflow.yaml`.
/// All fields are optional; missing fields fall back to CLI/env/defaults.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct HrflowConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    /// Directory for the JSON store.
    pub store_dir: Option<String>,
    /// YAML/JSON organisation directory used for approver resolution.
    pub directory_file: Option<String>,
    pub max_body: Option<usize>,
    pub max_cascade_steps: Option<usize>,
}

impl HrflowConfig {
    /// Load configuration from a YAML file.
    ///
    /// - If `path` is `Some`, load that specific file (error if missing).
    /// - If `path` is `None`, auto-detect `hrflow.yaml` in cwd; return defaults if absent.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file_path = match path {
            Some(p) => {
                if !p.exists() {
                    anyhow::bail!("Config file not found: {}", p.display());
                }
                p.to_path_buf()
            }
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if !default_path.exists() {
                    return Ok(Self::default());
                }
                default_path.to_path_buf()
            }
        };

        let contents = std::fs::read_to_string(&file_path)
            .with_context(|| format!("Failed to read config file: {}", file_path.display()))?;

        let config: HrflowConfig = serde_yml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", file_path.display()))?;

        Ok(config)
    }
}
