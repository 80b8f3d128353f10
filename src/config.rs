use anyhow::{Context, Result};
use executor::GlobalParams;
use serde_json::Value;
use std::fs;
use std::path::Path;

/// Load the global parameter file (YAML).
pub fn load_params(path: &Path) -> Result<GlobalParams> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Could not read {}", path.display()))?;
    GlobalParams::from_yaml_str(&content)
        .with_context(|| format!("Invalid parameter file {}", path.display()))
}

/// Parse the `--value` argument: inline JSON, or `@file` holding JSON or YAML.
pub fn parse_value(raw: &str) -> Result<Value> {
    if let Some(file) = raw.strip_prefix('@') {
        let path = crate::paths::expand(file);
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        // YAML parser also takes JSON
        return serde_yaml::from_str(&content)
            .with_context(|| format!("Invalid value file {}", path.display()));
    }
    serde_json::from_str(raw).context("--value must be valid JSON")
}
