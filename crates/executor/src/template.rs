//! Template override: per-node rendering of command arguments.
//!
//! Spec documents are rendered twice. At load time plain `{{ ... }}`
//! expressions are substituted against the global parameters. Expressions
//! that need a node are written escaped, `\{\{ Node.ip \}\}`, so they survive
//! the first pass untouched; the override pass un-escapes and renders them
//! once per node.
//!
//! The per-node context is the global parameter object plus:
//! - `Node`: the node's declared record, or `{user, ip}` for the local node
//! - `Value`: the caller's ad-hoc value, when one was given

use crate::error::{Error, Result, tera_message};
use crate::registry::{LOCAL_IP, Node};
use serde_json::{Map, Value, json};
use tera::{Context, Tera};

/// Escaped opening delimiter as written in spec documents.
pub const ESCAPED_OPEN: &str = r"\{\{";

/// Escaped closing delimiter as written in spec documents.
pub const ESCAPED_CLOSE: &str = r"\}\}";

/// Renders strings against the global parameters plus a node.
#[derive(Debug, Clone)]
pub struct TemplateOverride {
    globals: Map<String, Value>,
}

impl TemplateOverride {
    /// `params` is the global parameter object; `adhoc` is exposed as `Value`.
    pub fn new(params: Value, adhoc: Option<Value>) -> Self {
        let mut globals = match params {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("params".to_string(), other);
                map
            }
        };
        if let Some(value) = adhoc {
            globals.insert("Value".to_string(), value);
        }
        Self { globals }
    }

    /// Render `s` for `node`. Strings without escaped markers come back as is.
    pub fn string_override_with_node(&self, s: &str, node: &Node) -> Result<String> {
        if !needs_override(s) {
            return Ok(s.to_string());
        }

        let fail = |message: String| Error::StringOverrideWithNode {
            ip: node.ip.clone(),
            input: s.to_string(),
            message,
        };

        let template = literal_tags(&unescape(s));
        let context = Context::from_value(Value::Object(self.node_context(node)))
            .map_err(|e| fail(tera_message(&e)))?;
        Tera::one_off(&template, &context, false).map_err(|e| fail(tera_message(&e)))
    }

    /// Render every argument for `node`, stopping at the first failure.
    pub fn cmd_override_with_node(&self, cmd: &[String], node: &Node) -> Result<Vec<String>> {
        cmd.iter()
            .map(|arg| self.string_override_with_node(arg, node))
            .collect()
    }

    /// Render a whole document against the global parameters only.
    ///
    /// Escaped markers are left for the per-node pass.
    pub fn render_globals(&self, document: &str) -> Result<String> {
        let context = Context::from_value(Value::Object(self.globals.clone()))
            .map_err(|e| Error::Template(tera_message(&e)))?;
        Tera::one_off(&literal_tags(document), &context, false)
            .map_err(|e| Error::Template(tera_message(&e)))
    }

    fn node_context(&self, node: &Node) -> Map<String, Value> {
        let mut context = self.globals.clone();
        context.insert("Node".to_string(), node_record(node));
        context
    }
}

/// Whether `s` carries an escaped placeholder.
pub fn needs_override(s: &str) -> bool {
    s.contains(ESCAPED_OPEN)
}

/// Turn escaped delimiters into live ones.
pub fn unescape(s: &str) -> String {
    s.replace(ESCAPED_OPEN, "{{").replace(ESCAPED_CLOSE, "}}")
}

/// Make `{%` and `{#` render as themselves.
///
/// Only `{{ }}` is an expression; statement and comment openers are common
/// in shell (`${#ARR[@]}`, awk programs) and must pass through verbatim.
/// Each opener becomes a string-literal expression that prints it back.
pub fn literal_tags(s: &str) -> String {
    s.replace("{%", r#"{{ "{%" }}"#)
        .replace("{#", r#"{{ "{#" }}"#)
}

/// The `Node` entry of the template context.
fn node_record(node: &Node) -> Value {
    match &node.config {
        Some(config) => {
            let mut config = config.clone();
            if config.user.is_empty() {
                config.user = whoami::username();
            }
            serde_json::to_value(config).unwrap_or(Value::Null)
        }
        None => json!({ "user": whoami::username(), "ip": LOCAL_IP }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::NodeConfig;
    use crate::transport::LocalTransport;

    fn remote() -> Node {
        Node::new(
            "cp-1",
            "10.0.0.11",
            vec!["controlplane".into()],
            Some(NodeConfig {
                name: "cp-1".into(),
                ip: "10.0.0.11".into(),
                user: "root".into(),
                ssh_passwd: "pw".into(),
                role: vec!["controlplane".into()],
                ..Default::default()
            }),
            Box::new(LocalTransport),
        )
    }

    fn overrider() -> TemplateOverride {
        TemplateOverride::new(
            json!({ "providerIP": "10.0.0.1", "registryPort": "5000" }),
            Some(json!({ "version": "v1.28.2" })),
        )
    }

    #[test]
    fn test_plain_string_is_returned_unchanged() {
        let out = overrider()
            .string_override_with_node("echo {{ not rendered }}", &remote())
            .unwrap();
        assert_eq!(out, "echo {{ not rendered }}");
    }

    #[test]
    fn test_renders_node_fields() {
        let out = overrider()
            .string_override_with_node(r"\{\{ Node.user \}\}@\{\{ Node.ip \}\}", &remote())
            .unwrap();
        assert_eq!(out, "root@10.0.0.11");
    }

    #[test]
    fn test_renders_globals_and_adhoc_value() {
        let out = overrider()
            .string_override_with_node(
                r"\{\{ providerIP \}\}:\{\{ registryPort \}\}/\{\{ Value.version \}\}",
                &remote(),
            )
            .unwrap();
        assert_eq!(out, "10.0.0.1:5000/v1.28.2");
    }

    #[test]
    fn test_local_node_record() {
        let out = overrider()
            .string_override_with_node(r"\{\{ Node.ip \}\} \{\{ Node.user \}\}", &Node::local())
            .unwrap();
        assert_eq!(out, format!("127.0.0.1 {}", whoami::username()));
    }

    #[test]
    fn test_renders_custom_node_fields() {
        let config: NodeConfig = serde_yaml::from_str(
            "name: gpu-1\nip: 10.0.0.31\nuser: root\nsshPasswd: pw\nhostname: gpu-box\nlabels: {zone: edge-a}\n",
        )
        .unwrap();
        let node = Node::new(
            "gpu-1",
            "10.0.0.31",
            vec![],
            Some(config),
            Box::new(LocalTransport),
        );
        let out = overrider()
            .string_override_with_node(r"\{\{ Node.hostname \}\}/\{\{ Node.labels.zone \}\}", &node)
            .unwrap();
        assert_eq!(out, "gpu-box/edge-a");
    }

    #[test]
    fn test_missing_user_defaults_to_os_user() {
        let mut node = remote();
        if let Some(config) = node.config.as_mut() {
            config.user.clear();
        }
        let out = overrider()
            .string_override_with_node(r"\{\{ Node.user \}\}", &node)
            .unwrap();
        assert_eq!(out, whoami::username());
    }

    #[test]
    fn test_render_failure_is_wrapped() {
        let err = overrider()
            .string_override_with_node(r"\{\{ Node.nope \}\}", &remote())
            .unwrap_err();
        match err {
            Error::StringOverrideWithNode { ip, input, .. } => {
                assert_eq!(ip, "10.0.0.11");
                assert_eq!(input, r"\{\{ Node.nope \}\}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_cmd_override_stops_at_first_failure() {
        let cmd = vec![
            "echo".to_string(),
            r"\{\{ Node.ip \}\}".to_string(),
            r"\{\{ Node.nope \}\}".to_string(),
        ];
        assert!(overrider().cmd_override_with_node(&cmd, &remote()).is_err());

        let ok = overrider()
            .cmd_override_with_node(&cmd[..2], &remote())
            .unwrap();
        assert_eq!(ok, vec!["echo", "10.0.0.11"]);
    }

    #[test]
    fn test_render_globals_keeps_escaped_markers() {
        let doc = r"cmd: [ssh, '{{ providerIP }}', '\{\{ Node.ip \}\}']";
        let out = overrider().render_globals(doc).unwrap();
        assert_eq!(out, r"cmd: [ssh, '10.0.0.1', '\{\{ Node.ip \}\}']");
    }

    #[test]
    fn test_render_globals_leaves_shell_braces_alone() {
        let doc = r#"cmd: [bash, -c, 'A=(x y); echo ${#A[@]} {{ providerIP }}; awk "{%d}"; x={#}']"#;
        let out = overrider().render_globals(doc).unwrap();
        assert_eq!(
            out,
            r#"cmd: [bash, -c, 'A=(x y); echo ${#A[@]} 10.0.0.1; awk "{%d}"; x={#}']"#
        );
    }

    #[test]
    fn test_node_override_leaves_shell_braces_alone() {
        let out = overrider()
            .string_override_with_node(r"n=${#ARGS[@]} host=\{\{ Node.ip \}\}", &remote())
            .unwrap();
        assert_eq!(out, "n=${#ARGS[@]} host=10.0.0.11");
    }

    #[test]
    fn test_unescape() {
        assert_eq!(unescape(r"a \{\{ b \}\} c"), "a {{ b }} c");
        assert!(needs_override(r"\{\{ x \}\}"));
        assert!(!needs_override("{{ x }}"));
    }
}
