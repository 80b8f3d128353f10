//! Global parameter object shared by every template render.

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Default project for OCI file references when `fileProject` is unset.
pub const DEFAULT_FILE_PROJECT: &str = "edgekit";

/// A node as declared in the parameter file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub ssh_passwd: String,
    #[serde(default)]
    pub ssh_key: String,
    #[serde(default)]
    pub ssh_key_path: String,
    #[serde(default)]
    pub ssh_port: u16,
    #[serde(default)]
    pub role: Vec<String>,
    /// Any other keys of the entry, visible to templates as `Node.<key>`
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The global parameter object.
///
/// Known keys are typed; everything else is kept in `extra` so templates
/// can reference arbitrary settings from the parameter file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalParams {
    /// Registry host (the day-0 machine in most installs)
    #[serde(rename = "providerIP", default)]
    pub provider_ip: String,

    #[serde(default, deserialize_with = "string_or_number")]
    pub registry_port: String,

    /// Registry user
    #[serde(default)]
    pub user: String,

    /// Registry password
    #[serde(default)]
    pub password: String,

    /// Project holding files pushed with pushFile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_project: Option<String>,

    #[serde(default)]
    pub nodes: Vec<NodeConfig>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Registry endpoint and credentials, all present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEndpoint {
    pub ip: String,
    pub port: String,
    pub user: String,
    pub password: String,
}

impl RegistryEndpoint {
    /// `host:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

impl GlobalParams {
    /// Parse a parameter document.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// The parameter object as a template value.
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Registry settings, failing on the first one that is missing.
    pub fn registry_endpoint(&self) -> Result<RegistryEndpoint> {
        let required = [
            ("providerIP", &self.provider_ip),
            ("registryPort", &self.registry_port),
            ("user", &self.user),
            ("password", &self.password),
        ];
        if let Some((name, _)) = required.iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(Error::KitCfgParameter((*name).to_string()));
        }

        Ok(RegistryEndpoint {
            ip: self.provider_ip.clone(),
            port: self.registry_port.clone(),
            user: self.user.clone(),
            password: self.password.clone(),
        })
    }

    /// `providerIP:registryPort`; credentials are not required.
    pub fn registry_address(&self) -> Result<String> {
        if self.provider_ip.trim().is_empty() {
            return Err(Error::KitCfgParameter("providerIP".to_string()));
        }
        if self.registry_port.trim().is_empty() {
            return Err(Error::KitCfgParameter("registryPort".to_string()));
        }
        Ok(format!("{}:{}", self.provider_ip, self.registry_port))
    }

    pub fn file_project(&self) -> &str {
        self.file_project
            .as_deref()
            .filter(|p| !p.is_empty())
            .unwrap_or(DEFAULT_FILE_PROJECT)
    }
}

/// Ports show up as `5000` or `"5000"` depending on who wrote the file.
fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(String::new()),
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected a string or number, got {}",
            other
        ))),
    }
}
