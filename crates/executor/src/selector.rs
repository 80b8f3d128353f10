//! Node selection: role-set algebra and `when` guards.
//!
//! A step names roles in three lists. Each non-empty list becomes a
//! [`Selector`], and the step's working set is the union of what the
//! selectors pick, deduplicated by IP:
//!
//! | List     | Selector    | Picks                                          |
//! |----------|-------------|------------------------------------------------|
//! | `anyOf`  | `AnyFirst`  | first node of the first listed non-empty role  |
//! | `allOf`  | `AllOf`     | every node of every listed role                |
//! | `noneOf` | `NoneOf`    | every node of every role *not* listed          |
//!
//! Each command then narrows the set with its `when` guard, rendered per
//! node.

use crate::error::{Error, Result};
use crate::registry::{Node, NodeRegistry};
use crate::template::TemplateOverride;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Guard used when a command has none.
pub const DEFAULT_WHEN: &str = "true";

/// The `nodes` block of a step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSelector {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub any_of: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub all_of: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub none_of: Vec<String>,
}

/// One term of the selector algebra.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// First node of the first listed role that has any nodes.
    ///
    /// Deliberately not "every node of the first role": existing specs rely
    /// on `anyOf` picking a single node.
    AnyFirst(Vec<String>),
    /// All nodes of every listed role.
    AllOf(Vec<String>),
    /// All nodes of every indexed role that is not listed.
    NoneOf(Vec<String>),
}

impl NodeSelector {
    /// The selectors this block expands to; empty lists contribute nothing.
    pub fn selectors(&self) -> Vec<Selector> {
        let mut selectors = Vec::new();
        if !self.any_of.is_empty() {
            selectors.push(Selector::AnyFirst(self.any_of.clone()));
        }
        if !self.all_of.is_empty() {
            selectors.push(Selector::AllOf(self.all_of.clone()));
        }
        if !self.none_of.is_empty() {
            selectors.push(Selector::NoneOf(self.none_of.clone()));
        }
        selectors
    }

    /// Resolve the working node set against `registry`.
    pub fn resolve<'r>(&self, registry: &'r NodeRegistry) -> NodeSet<'r> {
        let mut set = NodeSet::default();
        for selector in self.selectors() {
            selector.apply(registry, &mut set);
        }
        set
    }
}

impl Selector {
    /// Add the nodes this selector picks to `set`.
    pub fn apply<'r>(&self, registry: &'r NodeRegistry, set: &mut NodeSet<'r>) {
        match self {
            Self::AnyFirst(roles) => {
                if let Some(first) = roles
                    .iter()
                    .find_map(|role| registry.nodes_with_role(role).into_iter().next())
                {
                    set.add(first);
                }
            }
            Self::AllOf(roles) => {
                for role in roles {
                    set.extend(registry.nodes_with_role(role));
                }
            }
            Self::NoneOf(excluded) => {
                for role in registry.roles() {
                    if !excluded.iter().any(|e| e == role) {
                        set.extend(registry.nodes_with_role(role));
                    }
                }
            }
        }
    }
}

/// Nodes keyed by IP, in first-insertion order.
#[derive(Debug, Default)]
pub struct NodeSet<'r> {
    nodes: Vec<&'r Node>,
    seen: HashSet<&'r str>,
}

impl<'r> NodeSet<'r> {
    /// Add a node unless its IP is already present.
    pub fn add(&mut self, node: &'r Node) -> bool {
        if !self.seen.insert(node.ip.as_str()) {
            return false;
        }
        self.nodes.push(node);
        true
    }

    pub fn extend(&mut self, nodes: impl IntoIterator<Item = &'r Node>) {
        for node in nodes {
            self.add(node);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &'r Node> + '_ {
        self.nodes.iter().copied()
    }

    pub fn ips(&self) -> Vec<&'r str> {
        self.nodes.iter().map(|n| n.ip.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl<'r> FromIterator<&'r Node> for NodeSet<'r> {
    fn from_iter<I: IntoIterator<Item = &'r Node>>(iter: I) -> Self {
        let mut set = Self::default();
        set.extend(iter);
        set
    }
}

/// Keep the nodes of `set` whose `when` guard renders true.
///
/// An empty guard, or one that renders empty, counts as true. A render
/// failure or a non-boolean result is an error for the whole step.
pub fn filter_when<'r>(
    guard: &str,
    set: &NodeSet<'r>,
    template: &TemplateOverride,
) -> Result<NodeSet<'r>> {
    let guard = if guard.trim().is_empty() {
        DEFAULT_WHEN
    } else {
        guard
    };

    let mut kept = NodeSet::default();
    for node in set.iter() {
        let rendered = template.string_override_with_node(guard, node)?;
        let rendered = if rendered.trim().is_empty() {
            DEFAULT_WHEN.to_string()
        } else {
            rendered
        };
        match parse_bool(&rendered) {
            Some(true) => {
                kept.add(node);
            }
            Some(false) => log::debug!("when {:?} is false on {}, skipping", guard, node.ip),
            None => {
                return Err(Error::WhenNotBool {
                    ip: node.ip.clone(),
                    guard: guard.to_string(),
                    rendered,
                });
            }
        }
    }
    Ok(kept)
}

/// Parse the boolean spellings accepted in guards.
pub fn parse_bool(s: &str) -> Option<bool> {
    match s.trim() {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}
