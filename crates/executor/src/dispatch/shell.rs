//! `shell`: run the argv on every node with a TTY, output to our terminal.

use super::{Dispatcher, fan_out, log_dry_run, run_on_node};
use crate::error::{Error, Result};
use crate::selector::NodeSet;
use crate::spec::CommandKind;
use crate::transport::AttachIo;

pub(super) fn run(dispatcher: &Dispatcher<'_>, cmd: &[String], nodes: &NodeSet<'_>) -> Result<()> {
    if cmd.is_empty() {
        return Err(Error::EmptyCommand(CommandKind::Shell.to_string()));
    }

    let targets = dispatcher.override_all(cmd, nodes)?;

    if dispatcher.dry_run {
        for target in &targets {
            log_dry_run(CommandKind::Shell, &target.node.ip, &target.cmd);
        }
        return Ok(());
    }

    fan_out(&targets, |target| {
        run_on_node(
            target.node,
            dispatcher.cancel,
            &target.cmd,
            AttachIo::inherit(),
            true,
        )
    })
}
