//! Test doubles shared by the dispatcher and executor tests.

use crate::cancel::CancelToken;
use crate::client::{AuthConfig, RegistryClient};
use crate::error::{Error, Result};
use crate::params::{NodeConfig, RegistryEndpoint};
use crate::registry::{Node, NodeRegistry};
use crate::transport::{AttachIo, Transport};
use std::io::Read;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Connect(String),
    Cmd {
        ip: String,
        cmd: Vec<String>,
        tty: bool,
    },
    Disconnect(String),
}

#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<Call>>>);

impl CallLog {
    fn push(&self, call: Call) {
        self.0.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.0.lock().unwrap().clone()
    }

    /// Commands only, sorted by IP since workers finish in any order.
    pub fn commands(&self) -> Vec<(String, Vec<String>)> {
        let mut cmds: Vec<_> = self
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Cmd { ip, cmd, .. } => Some((ip, cmd)),
                _ => None,
            })
            .collect();
        cmds.sort();
        cmds
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().unwrap().is_empty()
    }
}

/// Records every call; optionally fails commands or echoes canned stdout.
pub struct RecordingTransport {
    ip: String,
    log: CallLog,
    fail: bool,
}

impl Transport for RecordingTransport {
    fn connect(&self) -> Result<()> {
        self.log.push(Call::Connect(self.ip.clone()));
        Ok(())
    }

    fn cmd_with_attach_io(
        &self,
        _cancel: &CancelToken,
        cmd: &[String],
        streams: AttachIo<'_>,
        tty: bool,
    ) -> Result<()> {
        self.log.push(Call::Cmd {
            ip: self.ip.clone(),
            cmd: cmd.to_vec(),
            tty,
        });
        if let Some(mut stdin) = streams.stdin {
            let mut sink = Vec::new();
            stdin.read_to_end(&mut sink)?;
        }
        if self.fail {
            return Err(Error::CommandFailed {
                ip: self.ip.clone(),
                command: cmd.join(" "),
                message: "exit status 1".to_string(),
            });
        }
        Ok(())
    }

    fn disconnect(&self) -> Result<()> {
        self.log.push(Call::Disconnect(self.ip.clone()));
        Ok(())
    }

    fn describe(&self) -> String {
        format!("recording {}", self.ip)
    }
}

/// A node backed by a [`RecordingTransport`].
pub fn recorded_node(name: &str, ip: &str, roles: &[&str], log: &CallLog, fail: bool) -> Node {
    let roles: Vec<String> = roles.iter().map(|r| (*r).to_string()).collect();
    Node::new(
        name,
        ip,
        roles.clone(),
        Some(NodeConfig {
            name: name.to_string(),
            ip: ip.to_string(),
            user: "root".to_string(),
            ssh_passwd: "pw".to_string(),
            role: roles,
            ..Default::default()
        }),
        Box::new(RecordingTransport {
            ip: ip.to_string(),
            log: log.clone(),
            fail,
        }),
    )
}

/// Registry with two controlplane nodes and a worker, all recorded.
pub fn recorded_registry(log: &CallLog) -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    registry.insert(recorded_node("cp-1", "10.0.0.11", &["controlplane"], log, false));
    registry.insert(recorded_node("cp-2", "10.0.0.12", &["controlplane"], log, false));
    registry.insert(recorded_node("worker-1", "10.0.0.21", &["worker"], log, false));
    registry
}

/// Registry client that records operations as strings.
#[derive(Debug, Clone, Default)]
pub struct RecordingClient {
    log: Arc<Mutex<Vec<String>>>,
}

impl RecordingClient {
    fn push(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

impl RegistryClient for RecordingClient {
    fn get_auth_conf(&self, endpoint: &RegistryEndpoint) -> Result<AuthConfig> {
        self.push(format!("auth {}", endpoint.address()));
        Ok(AuthConfig {
            server_address: endpoint.address(),
            username: endpoint.user.clone(),
            password: endpoint.password.clone(),
        })
    }

    fn tag_image_to_local(&self, image: &str, registry: &str) -> Result<String> {
        self.push(format!("tag {image}"));
        Ok(format!("{registry}/{image}"))
    }

    fn image_push(&self, image: &str, auth: &AuthConfig) -> Result<()> {
        self.push(format!("push {image} as {}", auth.username));
        Ok(())
    }

    fn map_image_url_create_harbor_project(
        &self,
        endpoint: &RegistryEndpoint,
        images: &[String],
    ) -> Result<Vec<String>> {
        self.push(format!("project {} {}", endpoint.address(), images.join(",")));
        Ok(images.iter().map(|i| format!("library/{i}")).collect())
    }

    fn push_file_to_repo(&self, path: &str, sub_ref: &str, rev: &str) -> Result<String> {
        self.push(format!("pushFile {path} {sub_ref} {rev}"));
        Ok(format!("{sub_ref}:{rev}"))
    }

    fn pull_file_from_repo(&self, target: &str, oci_url: &str) -> Result<()> {
        self.push(format!("pullFile {target} {oci_url}"));
        Ok(())
    }
}
