//! Command dispatch: one command, a filtered node set, one worker per node.
//!
//! Every handler follows the same shape:
//! 1. validate arguments and node eligibility (no transport call yet)
//! 2. render the argv for every node; any failure aborts here
//! 3. run `connect -> cmd_with_attach_io -> disconnect` per node concurrently
//! 4. join all workers and report the first error
//!
//! Failing nodes do not stop their siblings. Every failure is logged; only
//! the first one recorded is returned.

mod artifact;
mod copy;
mod shell;

use crate::cancel::CancelToken;
use crate::client::RegistryClient;
use crate::error::{Error, Result};
use crate::params::GlobalParams;
use crate::registry::{Node, NodeRegistry};
use crate::selector::NodeSet;
use crate::spec::{Command, CommandKind};
use crate::template::TemplateOverride;
use crate::transport::AttachIo;
use rayon::prelude::*;
use std::sync::Mutex;

/// A node and the argv rendered for it.
#[derive(Debug)]
pub(crate) struct Target<'n> {
    pub node: &'n Node,
    pub cmd: Vec<String>,
}

/// Everything a handler needs to run a command.
pub struct Dispatcher<'a> {
    registry: &'a NodeRegistry,
    params: &'a GlobalParams,
    template: &'a TemplateOverride,
    client: &'a dyn RegistryClient,
    cancel: &'a CancelToken,
    dry_run: bool,
}

impl<'a> Dispatcher<'a> {
    pub fn new(
        registry: &'a NodeRegistry,
        params: &'a GlobalParams,
        template: &'a TemplateOverride,
        client: &'a dyn RegistryClient,
        cancel: &'a CancelToken,
    ) -> Self {
        Self {
            registry,
            params,
            template,
            client,
            cancel,
            dry_run: false,
        }
    }

    /// Resolve and log instead of running anything.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Run `command` on `nodes`.
    pub fn dispatch(&self, command: &Command, nodes: &NodeSet<'_>) -> Result<()> {
        if nodes.is_empty() {
            return Ok(());
        }
        if command.kind.is_day0_only() {
            require_day0(command.kind, nodes)?;
        }

        match command.kind {
            CommandKind::Shell => shell::run(self, &command.cmd, nodes),
            CommandKind::CopyFromDay0 => copy::from_day0(self, &command.cmd, nodes),
            CommandKind::CopyToDay0 => copy::to_day0(self, &command.cmd, nodes),
            CommandKind::PushImage => artifact::push_image(self, &command.cmd),
            CommandKind::PushFile => artifact::push_file(self, &command.cmd),
            CommandKind::PullFile => artifact::pull_file(self, &command.cmd),
            CommandKind::CreateHarborProject => {
                artifact::create_harbor_project(self, &command.cmd)
            }
        }
    }

    /// Render `cmd` for every node before anything runs.
    fn override_all<'n>(&self, cmd: &[String], nodes: &NodeSet<'n>) -> Result<Vec<Target<'n>>> {
        nodes
            .iter()
            .map(|node| {
                Ok(Target {
                    node,
                    cmd: self.template.cmd_override_with_node(cmd, node)?,
                })
            })
            .collect()
    }

    fn render(&self, s: &str, node: &Node) -> Result<String> {
        self.template.string_override_with_node(s, node)
    }
}

/// Day-0 only commands refuse any other node before touching a transport.
fn require_day0(kind: CommandKind, nodes: &NodeSet<'_>) -> Result<()> {
    match nodes.iter().find(|node| !node.is_day0()) {
        Some(node) => Err(Error::NoDay0 {
            kind: kind.to_string(),
            ip: node.ip.clone(),
        }),
        None => Ok(()),
    }
}

/// Connect, run, disconnect. Dropping `streams` on return closes any
/// pipe ends the command held, on every path.
pub(crate) fn run_on_node(
    node: &Node,
    cancel: &CancelToken,
    cmd: &[String],
    streams: AttachIo<'_>,
    tty: bool,
) -> Result<()> {
    let transport = node.transport();
    transport.connect()?;
    let result = transport.cmd_with_attach_io(cancel, cmd, streams, tty);
    if let Err(e) = transport.disconnect() {
        log::warn!("{}: disconnect failed: {}", node.ip, e);
    }
    result
}

/// First error wins; later ones are only logged.
#[derive(Debug, Default)]
pub(crate) struct FirstError {
    slot: Mutex<Option<Error>>,
}

impl FirstError {
    pub fn record(&self, ip: &str, err: Error) {
        log::error!("node {}: {}", ip, err);
        let mut slot = match self.slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    pub fn into_result(self) -> Result<()> {
        let slot = match self.slot.into_inner() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        slot.map_or(Ok(()), Err)
    }
}

/// Run `work` for every target on its own pool thread and join them all.
pub(crate) fn fan_out<F>(targets: &[Target<'_>], work: F) -> Result<()>
where
    F: Fn(&Target<'_>) -> Result<()> + Sync,
{
    if targets.is_empty() {
        return Ok(());
    }

    let errors = FirstError::default();
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(targets.len())
        .build()?;

    pool.install(|| {
        targets.par_iter().for_each(|target| {
            if let Err(e) = work(target) {
                errors.record(&target.node.ip, e);
            }
        });
    });

    errors.into_result()
}

fn log_dry_run(kind: CommandKind, ip: &str, cmd: &[String]) {
    log::info!("[dry-run] {} on {}: {}", kind, ip, cmd.join(" "));
}
