//! Local transport - runs commands as child processes of edgekit.

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::registry::LOCAL_IP;
use crate::transport::{AttachIo, Transport};
use std::io::{self, Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

/// How often a running child is checked for exit or cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Transport for the day-0 node: plain `std::process::Command`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalTransport;

impl LocalTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Transport for LocalTransport {
    fn connect(&self) -> Result<()> {
        Ok(())
    }

    fn cmd_with_attach_io(
        &self,
        cancel: &CancelToken,
        cmd: &[String],
        streams: AttachIo<'_>,
        _tty: bool,
    ) -> Result<()> {
        let (program, args) = cmd
            .split_first()
            .ok_or_else(|| Error::EmptyCommand("local command".to_string()))?;
        let command_line = cmd.join(" ");
        let failed = |message: String| Error::CommandFailed {
            ip: LOCAL_IP.to_string(),
            command: command_line.clone(),
            message,
        };

        let AttachIo {
            stdin,
            stdout,
            stderr,
        } = streams;

        log::debug!("local: {}", command_line);

        let mut child = Command::new(program)
            .args(args)
            .stdin(piped_if(stdin.is_some()))
            .stdout(piped_if(stdout.is_some()))
            .stderr(piped_if(stderr.is_some()))
            .spawn()
            .map_err(|e| failed(format!("failed to spawn: {}", e)))?;

        let child_stdin = child.stdin.take();
        let child_stdout = child.stdout.take();
        let child_stderr = child.stderr.take();

        let (status, pumps) = thread::scope(|s| {
            let feeder = stdin.zip(child_stdin).map(|(mut src, mut dst)| {
                s.spawn(move || {
                    // The child may stop reading early (tar does at end of
                    // archive); that is not a failure of the command.
                    match io::copy(&mut src, &mut dst) {
                        Err(e) if e.kind() != io::ErrorKind::BrokenPipe => Err(e),
                        _ => Ok(()),
                    }
                })
            });
            let out = stdout
                .zip(child_stdout)
                .map(|(dst, src)| s.spawn(move || pump(src, dst)));
            let err = stderr
                .zip(child_stderr)
                .map(|(dst, src)| s.spawn(move || pump(src, dst)));

            let status = wait_or_cancel(&mut child, cancel);

            let mut pumps: Vec<io::Result<()>> = Vec::new();
            for handle in [feeder, out, err].into_iter().flatten() {
                pumps.push(
                    handle
                        .join()
                        .unwrap_or_else(|_| Err(io::Error::other("stream pump panicked"))),
                );
            }
            (status, pumps)
        });

        let status = match status {
            Ok(Some(status)) => status,
            Ok(None) => {
                return Err(Error::Cancelled {
                    ip: LOCAL_IP.to_string(),
                    command: command_line.clone(),
                });
            }
            Err(e) => return Err(failed(format!("failed to wait: {}", e))),
        };

        if !status.success() {
            return Err(failed(describe_status(status)));
        }

        if let Some(e) = pumps.into_iter().find_map(|r| r.err()) {
            return Err(failed(format!("stream error: {}", e)));
        }

        Ok(())
    }

    fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    fn describe(&self) -> String {
        "local".to_string()
    }
}

fn piped_if(attached: bool) -> Stdio {
    if attached { Stdio::piped() } else { Stdio::null() }
}

fn pump(mut src: impl Read, mut dst: Box<dyn Write + Send + '_>) -> io::Result<()> {
    io::copy(&mut src, &mut dst)?;
    dst.flush()
}

/// Wait for the child, killing it if `cancel` trips first.
///
/// Returns `Ok(None)` when the child was killed because of cancellation.
fn wait_or_cancel(child: &mut Child, cancel: &CancelToken) -> io::Result<Option<ExitStatus>> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if cancel.is_cancelled() {
            child.kill()?;
            child.wait()?;
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn describe_status(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exit status {}", code),
        None => "terminated by signal".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[cfg(unix)]
    #[test]
    fn test_captures_stdout() {
        let mut out: Vec<u8> = Vec::new();
        let io = AttachIo {
            stdout: Some(Box::new(&mut out)),
            ..AttachIo::none()
        };
        LocalTransport
            .cmd_with_attach_io(&CancelToken::new(), &argv(&["echo", "hi"]), io, false)
            .unwrap();
        assert_eq!(String::from_utf8_lossy(&out), "hi\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_feeds_stdin() {
        let mut out: Vec<u8> = Vec::new();
        let io = AttachIo {
            stdin: Some(Box::new(&b"piped through cat"[..])),
            stdout: Some(Box::new(&mut out)),
            stderr: None,
        };
        LocalTransport
            .cmd_with_attach_io(&CancelToken::new(), &argv(&["cat"]), io, false)
            .unwrap();
        assert_eq!(out, b"piped through cat");
    }

    #[cfg(unix)]
    #[test]
    fn test_non_zero_exit_is_an_error() {
        let err = LocalTransport
            .cmd_with_attach_io(&CancelToken::new(), &argv(&["false"]), AttachIo::none(), false)
            .unwrap_err();
        match err {
            Error::CommandFailed { ip, message, .. } => {
                assert_eq!(ip, LOCAL_IP);
                assert_eq!(message, "exit status 1");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_empty_command_is_rejected() {
        let err = LocalTransport
            .cmd_with_attach_io(&CancelToken::new(), &[], AttachIo::none(), false)
            .unwrap_err();
        assert!(matches!(err, Error::EmptyCommand(_)));
    }

    #[test]
    fn test_missing_program_is_a_command_failure() {
        let err = LocalTransport
            .cmd_with_attach_io(
                &CancelToken::new(),
                &argv(&["edgekit-no-such-binary-4c1e"]),
                AttachIo::none(),
                false,
            )
            .unwrap_err();
        assert!(matches!(err, Error::CommandFailed { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_cancel_kills_child() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let started = Instant::now();
        let err = LocalTransport
            .cmd_with_attach_io(&cancel, &argv(&["sleep", "30"]), AttachIo::none(), false)
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_connect_and_disconnect_are_noops() {
        assert!(LocalTransport.connect().is_ok());
        assert!(LocalTransport.disconnect().is_ok());
        assert_eq!(LocalTransport.describe(), "local");
    }
}
