//! Transport abstraction for running commands on a node.
//!
//! The [`Transport`] trait is the seam between the dispatcher and the
//! machine a command runs on:
//! - [`LocalTransport`] runs the argv as a child process of edgekit
//! - [`SshTransport`] runs it in a session on a remote host
//! - test doubles record calls without touching the system

pub mod local;
pub mod ssh;

pub use local::LocalTransport;
pub use ssh::{SshConfig, SshTransport};

use crate::cancel::CancelToken;
use crate::error::Result;
use std::io::{Read, Write};

/// Streams attached to a command.
///
/// A missing stream is connected to the null device. Streams are owned so
/// they are dropped (and pipe ends closed) as soon as the command returns.
#[derive(Default)]
pub struct AttachIo<'a> {
    pub stdin: Option<Box<dyn Read + Send + 'a>>,
    pub stdout: Option<Box<dyn Write + Send + 'a>>,
    pub stderr: Option<Box<dyn Write + Send + 'a>>,
}

impl<'a> AttachIo<'a> {
    /// No streams attached.
    pub fn none() -> Self {
        Self::default()
    }

    /// Output forwarded to the edgekit process's own stdout/stderr.
    pub fn inherit() -> Self {
        Self {
            stdin: None,
            stdout: Some(Box::new(std::io::stdout())),
            stderr: Some(Box::new(std::io::stderr())),
        }
    }

    /// Feed `reader` to the command's stdin, stderr forwarded.
    pub fn reading(reader: impl Read + Send + 'a) -> Self {
        Self {
            stdin: Some(Box::new(reader)),
            stdout: None,
            stderr: Some(Box::new(std::io::stderr())),
        }
    }

    /// Send the command's stdout to `writer`, stderr forwarded.
    pub fn writing(writer: impl Write + Send + 'a) -> Self {
        Self {
            stdin: None,
            stdout: Some(Box::new(writer)),
            stderr: Some(Box::new(std::io::stderr())),
        }
    }
}

/// A way of running commands on one node.
///
/// Implementations must be usable from several worker threads; a node is
/// driven by at most one worker per command, but the same transport is
/// reused across commands and steps.
pub trait Transport: Send + Sync {
    /// Establish the connection. No-op for local execution.
    fn connect(&self) -> Result<()>;

    /// Run `cmd` with the given streams attached and wait for it to finish.
    ///
    /// A non-zero exit status is an error. When `cancel` trips, the command
    /// is torn down and [`crate::Error::Cancelled`] is returned.
    fn cmd_with_attach_io(
        &self,
        cancel: &CancelToken,
        cmd: &[String],
        io: AttachIo<'_>,
        tty: bool,
    ) -> Result<()>;

    /// Release the connection. No-op for local execution.
    fn disconnect(&self) -> Result<()>;

    /// Short description for logs, e.g. `ssh root@10.0.0.5:22`.
    fn describe(&self) -> String;
}

/// Treat an IO error as benign when it only reports the peer closing.
pub(crate) fn is_benign_close(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::UnexpectedEof | std::io::ErrorKind::BrokenPipe
    )
}
