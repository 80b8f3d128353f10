//! Node registry: every reachable machine, indexed by IP and by role.
//!
//! The registry is built once per run, before any command is dispatched,
//! and is only read afterwards. It always contains the implicit local node
//! (`127.0.0.1`, role `day-0`), which stands for the machine edgekit runs on.

use crate::error::{Error, Result};
use crate::params::NodeConfig;
use crate::transport::ssh::DEFAULT_PORT;
use crate::transport::{LocalTransport, SshConfig, SshTransport, Transport};
use std::collections::{BTreeMap, HashMap};

/// IP of the implicit local node.
pub const LOCAL_IP: &str = "127.0.0.1";

/// Role of the implicit local node.
pub const ROLE_DAY0: &str = "day-0";

/// Role for nodes that declare none.
pub const UNKNOWN_ROLE: &str = "unknownRole";

/// Display name of the implicit local node.
pub const LOCAL_NAME: &str = "day-0";

/// A machine commands can run on.
pub struct Node {
    pub name: String,
    pub ip: String,
    pub roles: Vec<String>,
    /// Declared record, `None` for the implicit local node
    pub config: Option<NodeConfig>,
    transport: Box<dyn Transport>,
}

impl Node {
    pub fn new(
        name: impl Into<String>,
        ip: impl Into<String>,
        roles: Vec<String>,
        config: Option<NodeConfig>,
        transport: Box<dyn Transport>,
    ) -> Self {
        Self {
            name: name.into(),
            ip: ip.into(),
            roles,
            config,
            transport,
        }
    }

    /// The implicit local node.
    pub fn local() -> Self {
        Self::new(
            LOCAL_NAME,
            LOCAL_IP,
            vec![ROLE_DAY0.to_string()],
            None,
            Box::new(LocalTransport::new()),
        )
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    pub fn is_day0(&self) -> bool {
        self.ip == LOCAL_IP
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("ip", &self.ip)
            .field("roles", &self.roles)
            .field("transport", &self.transport.describe())
            .finish()
    }
}

/// Nodes indexed by IP and by role.
#[derive(Debug)]
pub struct NodeRegistry {
    /// Discovery order; index 0 is always the local node
    nodes: Vec<Node>,
    by_ip: HashMap<String, usize>,
    by_role: BTreeMap<String, Vec<usize>>,
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeRegistry {
    /// A registry holding only the implicit local node.
    pub fn new() -> Self {
        let mut registry = Self {
            nodes: Vec::new(),
            by_ip: HashMap::new(),
            by_role: BTreeMap::new(),
        };
        registry.ensure_local();
        registry
    }

    /// Build a registry from a node list.
    pub fn build(configs: &[NodeConfig]) -> Result<Self> {
        let mut registry = Self::new();
        registry.build_or_update(configs)?;
        Ok(registry)
    }

    /// Add every configured node that is not indexed yet.
    ///
    /// Nodes with an empty IP or the local IP are skipped, as are IPs that
    /// are already indexed (no update in place). The first node failing
    /// login validation aborts the call; nodes added before it stay.
    pub fn build_or_update(&mut self, configs: &[NodeConfig]) -> Result<()> {
        self.ensure_local();

        for config in configs {
            if config.ip.is_empty() {
                log::warn!("node {:?} has no ip, skipping", config.name);
                continue;
            }
            if config.ip == LOCAL_IP || self.by_ip.contains_key(&config.ip) {
                continue;
            }

            let ssh = ssh_config(config)?;
            log::debug!(
                "registering node {} ({}) roles={:?}",
                config.name,
                config.ip,
                config.role
            );
            self.insert(Node::new(
                config.name.clone(),
                config.ip.clone(),
                config.role.clone(),
                Some(config.clone()),
                Box::new(SshTransport::new(ssh)),
            ));
        }
        Ok(())
    }

    /// Index a node. Returns `false` (and drops the node) if its IP is taken.
    pub fn insert(&mut self, node: Node) -> bool {
        if self.by_ip.contains_key(&node.ip) {
            return false;
        }
        let index = self.nodes.len();
        self.by_ip.insert(node.ip.clone(), index);

        if node.roles.is_empty() {
            self.by_role
                .entry(UNKNOWN_ROLE.to_string())
                .or_default()
                .push(index);
        } else {
            for role in &node.roles {
                let members = self.by_role.entry(role.clone()).or_default();
                if !members.contains(&index) {
                    members.push(index);
                }
            }
        }

        self.nodes.push(node);
        true
    }

    fn ensure_local(&mut self) {
        if !self.by_ip.contains_key(LOCAL_IP) {
            self.insert(Node::local());
        }
    }

    /// The implicit local node.
    pub fn day0(&self) -> &Node {
        &self.nodes[0]
    }

    pub fn get(&self, ip: &str) -> Option<&Node> {
        self.by_ip.get(ip).map(|&i| &self.nodes[i])
    }

    /// Nodes filed under `role`, in discovery order.
    pub fn nodes_with_role(&self, role: &str) -> Vec<&Node> {
        self.by_role
            .get(role)
            .map(|indices| indices.iter().map(|&i| &self.nodes[i]).collect())
            .unwrap_or_default()
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.by_role.contains_key(role)
    }

    /// Every indexed role, sorted.
    pub fn roles(&self) -> impl Iterator<Item = &str> {
        self.by_role.keys().map(String::as_str)
    }

    /// Every node in discovery order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false: the local node is always present.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Resolve login settings for a remote node.
fn ssh_config(config: &NodeConfig) -> Result<SshConfig> {
    let private_key = if !config.ssh_key.is_empty() {
        config.ssh_key.clone()
    } else if !config.ssh_key_path.is_empty() {
        read_key_file(&config.ssh_key_path)
    } else {
        String::new()
    };

    if config.user.is_empty() {
        return Err(Error::LoginMissing {
            ip: config.ip.clone(),
        });
    }
    if private_key.is_empty() && config.ssh_passwd.is_empty() {
        return Err(Error::LoginCredentialsMissing {
            ip: config.ip.clone(),
        });
    }

    Ok(SshConfig {
        host: config.ip.clone(),
        port: if config.ssh_port == 0 {
            DEFAULT_PORT
        } else {
            config.ssh_port
        },
        user: config.user.clone(),
        password: config.ssh_passwd.clone(),
        private_key,
    })
}

/// Read a key file, `~` expanded. An unreadable file means "no key".
fn read_key_file(path: &str) -> String {
    let expanded = shellexpand::tilde(path);
    match std::fs::read_to_string(expanded.as_ref()) {
        Ok(key) => key,
        Err(e) => {
            log::debug!("could not read ssh key {}: {}", expanded, e);
            String::new()
        }
    }
}
