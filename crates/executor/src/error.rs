//! Error types for executor operations.
//!
//! Every policy violation has its own variant so callers can tell a
//! misconfigured node list apart from a failed SSH session or a spec that
//! was refused by the trust gate. Nothing in this crate retries; the
//! category only drives reporting.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Categories of executor errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Node list or registry settings are incomplete
    Config,
    /// Guard or override template failed to render
    Template,
    /// Dial, authentication or session failure
    Transport,
    /// A command was used in a way its kind does not allow
    Policy,
    /// Spec document refused by the trust manifest
    Trust,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Config => "Configuration error",
            Self::Template => "Template error",
            Self::Transport => "Transport failure",
            Self::Policy => "Policy violation",
            Self::Trust => "Untrusted spec",
            Self::Other => "Unexpected error",
        }
    }

    /// Get actionable advice for resolving this error category.
    pub fn advice(&self) -> &'static str {
        match self {
            Self::Config => "Check the node list and registry settings in the parameter file",
            Self::Template => "Check the template expressions in the spec commands",
            Self::Transport => "Check that the node is reachable and the credentials are valid",
            Self::Policy => "Check the command arguments and the nodes it targets",
            Self::Trust => "Review the spec and record it with `edgekit trust add`",
            Self::Other => "Check the error details for more information",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Errors that can occur while building nodes, loading specs or running steps.
#[derive(Debug, Error)]
pub enum Error {
    /// Node declares no login user
    #[error("node {ip}: login user is missing")]
    LoginMissing { ip: String },

    /// Node declares neither a private key nor a password
    #[error("node {ip}: login credentials are missing (need sshKey, sshKeyPath or sshPasswd)")]
    LoginCredentialsMissing { ip: String },

    /// Per-node template rendering failed
    #[error("string override with node {ip} failed for {input:?}: {message}")]
    StringOverrideWithNode {
        ip: String,
        input: String,
        message: String,
    },

    /// A `when` guard rendered to something that is not a boolean
    #[error("when guard {guard:?} rendered {rendered:?} on node {ip}, expected a boolean")]
    WhenNotBool {
        ip: String,
        guard: String,
        rendered: String,
    },

    /// copyFromDay0 arguments are invalid
    #[error("copyFromDay0: {0}")]
    CopyFromDay0(String),

    /// copyToDay0 arguments are invalid
    #[error("copyToDay0: {0}")]
    CopyToDay0(String),

    /// A day-0 only command targeted another node
    #[error("{kind} only runs on the day-0 node, but node {ip} was selected")]
    NoDay0 { kind: String, ip: String },

    /// Registry settings are missing from the global parameters
    #[error("registry parameter missing: {0}")]
    KitCfgParameter(String),

    /// Command has no arguments
    #[error("{0}: cmd must not be empty")]
    EmptyCommand(String),

    /// Command type is not one of the known kinds
    #[error("unknown command type: {0:?}")]
    UnknownCommandType(String),

    /// Spec hash does not match the trust manifest
    #[error("spec {} does not match its trusted hash", .path.display())]
    SpecHashMismatch { path: PathBuf },

    /// Spec has no trust manifest entry and the policy is strict
    #[error("spec {} is not in the trust manifest", .path.display())]
    UntrustedSpec { path: PathBuf },

    /// TCP dial failed
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Every configured authentication method was rejected
    #[error("authentication as {user}@{addr} failed: {message}")]
    Auth {
        user: String,
        addr: String,
        message: String,
    },

    /// SSH protocol error
    #[error("ssh error on {addr}: {source}")]
    Ssh {
        addr: String,
        #[source]
        source: ssh2::Error,
    },

    /// Transport used before `connect`
    #[error("node {0} is not connected")]
    NotConnected(String),

    /// Command exited unsuccessfully
    #[error("command `{command}` on {ip} failed: {message}")]
    CommandFailed {
        ip: String,
        command: String,
        message: String,
    },

    /// Run was cancelled
    #[error("cancelled while running `{command}` on {ip}")]
    Cancelled { ip: String, command: String },

    /// Cancellation was observed between commands
    #[error("run interrupted before step {0:?} finished")]
    Interrupted(String),

    /// Worker pool could not be started
    #[error("failed to start worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// Registry collaborator failed
    #[error("registry: {0}")]
    Registry(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to read a spec file
    #[error("failed to read {}: {source}", .path.display())]
    ReadSpec {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Spec document is not valid YAML for the step schema
    #[error("invalid spec document: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Parameter object could not be turned into a template context
    #[error("invalid template context: {0}")]
    Json(#[from] serde_json::Error),

    /// Global template substitution failed
    #[error("template error: {0}")]
    Template(String),

    /// Trust manifest error
    #[error("trust manifest: {0}")]
    Manifest(#[from] manifest::Error),
}

impl Error {
    /// Categorize this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::LoginMissing { .. }
            | Self::LoginCredentialsMissing { .. }
            | Self::KitCfgParameter(_) => ErrorCategory::Config,
            Self::StringOverrideWithNode { .. } | Self::WhenNotBool { .. } | Self::Template(_) => {
                ErrorCategory::Template
            }
            Self::Connect { .. }
            | Self::Auth { .. }
            | Self::Ssh { .. }
            | Self::NotConnected(_)
            | Self::CommandFailed { .. }
            | Self::Cancelled { .. }
            | Self::Interrupted(_) => ErrorCategory::Transport,
            Self::CopyFromDay0(_)
            | Self::CopyToDay0(_)
            | Self::NoDay0 { .. }
            | Self::EmptyCommand(_)
            | Self::UnknownCommandType(_) => ErrorCategory::Policy,
            Self::SpecHashMismatch { .. } | Self::UntrustedSpec { .. } => ErrorCategory::Trust,
            _ => ErrorCategory::Other,
        }
    }

    pub(crate) fn ssh(addr: &str, source: ssh2::Error) -> Self {
        Self::Ssh {
            addr: addr.to_string(),
            source,
        }
    }
}

/// Render a tera error with its whole source chain.
///
/// Tera keeps the useful part ("Variable `Node.foo` not found") in the
/// source, not in the top-level message.
pub(crate) fn tera_message(err: &tera::Error) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}

/// Result type for executor operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_errors_are_categorized() {
        let err = Error::LoginMissing {
            ip: "10.0.0.1".into(),
        };
        assert_eq!(err.category(), ErrorCategory::Config);
        assert!(err.to_string().contains("10.0.0.1"));

        let err = Error::KitCfgParameter("providerIP".into());
        assert_eq!(err.category(), ErrorCategory::Config);
    }

    #[test]
    fn test_policy_errors_are_categorized() {
        let err = Error::NoDay0 {
            kind: "pushImage".into(),
            ip: "10.0.0.2".into(),
        };
        assert_eq!(err.category(), ErrorCategory::Policy);
        assert_eq!(
            err.to_string(),
            "pushImage only runs on the day-0 node, but node 10.0.0.2 was selected"
        );
        assert_eq!(
            Error::CopyFromDay0("x".into()).category(),
            ErrorCategory::Policy
        );
    }

    #[test]
    fn test_trust_errors_are_categorized() {
        let err = Error::SpecHashMismatch {
            path: PathBuf::from("/tmp/spec.yaml"),
        };
        assert_eq!(err.category(), ErrorCategory::Trust);
        assert!(!ErrorCategory::Trust.advice().is_empty());
    }
}
