//! Spec documents: the step list and its loader.
//!
//! ```yaml
//! spec:
//!   steps:
//!     - name: install containerd
//!       nodes:
//!         allOf: [controlplane, worker]
//!       commands:
//!         - type: shell
//!           cmd: [sh, -c, "apt-get install -y containerd"]
//!           when: '\{\{ Node.ip != providerIP \}\}'
//! ```

use crate::error::{Error, Result};
use crate::selector::{DEFAULT_WHEN, NodeSelector};
use crate::template::TemplateOverride;
use manifest::{TrustManifest, Verdict};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// What a command does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Shell,
    CopyFromDay0,
    CopyToDay0,
    PushImage,
    PushFile,
    PullFile,
    CreateHarborProject,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Shell => "shell",
            Self::CopyFromDay0 => "copyFromDay0",
            Self::CopyToDay0 => "copyToDay0",
            Self::PushImage => "pushImage",
            Self::PushFile => "pushFile",
            Self::PullFile => "pullFile",
            Self::CreateHarborProject => "createHarborProject",
        }
    }

    /// Kinds that may only target the day-0 node.
    pub fn is_day0_only(&self) -> bool {
        matches!(
            self,
            Self::PushImage | Self::PushFile | Self::PullFile | Self::CreateHarborProject
        )
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "shell" => Self::Shell,
            "copyFromDay0" => Self::CopyFromDay0,
            "copyToDay0" => Self::CopyToDay0,
            "pushImage" => Self::PushImage,
            "pushFile" => Self::PushFile,
            "pullFile" => Self::PullFile,
            "createHarborProject" => Self::CreateHarborProject,
            other => return Err(Error::UnknownCommandType(other.to_string())),
        })
    }
}

/// One command of a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub kind: CommandKind,
    pub cmd: Vec<String>,
    pub when: String,
}

impl Command {
    pub fn new(kind: CommandKind, cmd: &[&str]) -> Self {
        Self {
            kind,
            cmd: cmd.iter().map(|s| (*s).to_string()).collect(),
            when: DEFAULT_WHEN.to_string(),
        }
    }

    pub fn when(mut self, guard: impl Into<String>) -> Self {
        self.when = guard.into();
        self
    }
}

/// A named group of commands and the nodes they run on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub name: String,
    pub nodes: NodeSelector,
    pub commands: Vec<Command>,
}

// Wire shapes. The command type stays a string until validation so an
// unknown type surfaces as `UnknownCommandType` instead of a YAML error.

#[derive(Debug, Deserialize, Serialize)]
struct SpecDocument {
    spec: SpecBody,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct SpecBody {
    #[serde(default)]
    steps: Vec<RawStep>,
}

#[derive(Debug, Deserialize, Serialize)]
struct RawStep {
    #[serde(default)]
    name: String,
    #[serde(default)]
    nodes: NodeSelector,
    #[serde(default)]
    commands: Vec<RawCommand>,
}

#[derive(Debug, Deserialize, Serialize)]
struct RawCommand {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    cmd: Vec<String>,
    #[serde(default)]
    when: Option<String>,
}

impl TryFrom<RawCommand> for Command {
    type Error = Error;

    fn try_from(raw: RawCommand) -> Result<Self> {
        Ok(Self {
            kind: raw.kind.parse()?,
            cmd: raw.cmd,
            when: raw.when.unwrap_or_else(|| DEFAULT_WHEN.to_string()),
        })
    }
}

impl TryFrom<RawStep> for Step {
    type Error = Error;

    fn try_from(raw: RawStep) -> Result<Self> {
        let commands = raw
            .commands
            .into_iter()
            .map(Command::try_from)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            name: raw.name,
            nodes: raw.nodes,
            commands,
        })
    }
}

/// Parse an already rendered spec document.
pub fn parse_steps(document: &str) -> Result<Vec<Step>> {
    let doc: SpecDocument = serde_yaml::from_str(document)?;
    doc.spec.steps.into_iter().map(Step::try_from).collect()
}

/// Hash check applied to a spec before it is rendered.
#[derive(Debug, Default)]
pub struct TrustGate {
    manifest: Option<TrustManifest>,
    strict: bool,
}

impl TrustGate {
    /// Accept every spec.
    pub fn open() -> Self {
        Self::default()
    }

    /// Check specs against `manifest`. With `strict`, specs that have no
    /// entry are refused too.
    pub fn with_manifest(manifest: TrustManifest, strict: bool) -> Self {
        Self {
            manifest: Some(manifest),
            strict,
        }
    }

    pub fn check(&self, path: &Path, content: &[u8]) -> Result<()> {
        let Some(manifest) = &self.manifest else {
            return Ok(());
        };
        let key = manifest::spec_key(path)?;

        match manifest.verify(&key, content) {
            Verdict::Trusted => {
                log::debug!("spec {} matches its trusted hash", path.display());
                Ok(())
            }
            Verdict::Mismatch { expected, actual } => {
                log::warn!(
                    "spec {} hash {} does not match trusted {}; user-defined spec will not be executed to avoid risk",
                    path.display(),
                    actual,
                    expected
                );
                Err(Error::SpecHashMismatch {
                    path: path.to_path_buf(),
                })
            }
            Verdict::Unknown if self.strict => Err(Error::UntrustedSpec {
                path: path.to_path_buf(),
            }),
            Verdict::Unknown => {
                log::debug!("spec {} has no trust entry", path.display());
                Ok(())
            }
        }
    }
}

/// Read, trust-check, render and parse a spec file.
///
/// Any failure aborts; no partial step list is returned.
pub fn load_spec_from_file(
    path: &Path,
    template: &TemplateOverride,
    trust: &TrustGate,
) -> Result<Vec<Step>> {
    let content = std::fs::read(path).map_err(|source| Error::ReadSpec {
        path: path.to_path_buf(),
        source,
    })?;
    trust.check(path, &content)?;

    let text = String::from_utf8(content).map_err(|e| Error::ReadSpec {
        path: path.to_path_buf(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
    })?;
    let rendered = template.render_globals(&text)?;
    parse_steps(&rendered)
}
