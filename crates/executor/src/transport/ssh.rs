//! SSH transport backed by libssh2.
//!
//! Host keys are not verified. Nodes come from an operator-written parameter
//! file and are usually freshly provisioned machines with no known_hosts
//! entry; edgekit accepts that trust trade-off.

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::transport::{AttachIo, Transport, is_benign_close};
use ssh2::{Channel, MethodType, PtyModeOpcode, PtyModes, Session};
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

/// Dial timeout, independent of cancellation.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Ciphers offered in both directions. libssh2 ignores entries it was not
/// built with.
pub const CIPHERS: &str =
    "aes128-gcm@openssh.com,aes256-gcm@openssh.com,aes128-ctr,aes192-ctr,aes256-ctr";

/// Default SSH port.
pub const DEFAULT_PORT: u16 = 22;

const PTY_TERM: &str = "xterm";
const PTY_WIDTH: u32 = 80;
const PTY_HEIGHT: u32 = 40;
const PTY_SPEED: u32 = 14_400;

/// How often the cancellation watcher looks at the token.
const WATCH_INTERVAL: Duration = Duration::from_millis(100);

/// Pause when no stream of a channel could move data.
const PUMP_IDLE_WAIT: Duration = Duration::from_millis(2);

const PUMP_CHUNK: usize = 32 * 1024;

/// Login settings for one remote node.
#[derive(Clone, Default)]
pub struct SshConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// PEM/OpenSSH private key contents, not a path
    pub private_key: String,
}

impl SshConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl std::fmt::Debug for SshConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &(!self.password.is_empty()).then_some("<redacted>"))
            .field(
                "private_key",
                &(!self.private_key.is_empty()).then_some("<redacted>"),
            )
            .finish()
    }
}

struct Connection {
    session: Session,
    /// Second handle on the session socket, shut down to abort a command.
    socket: TcpStream,
}

/// Transport for a remote node reached over SSH.
pub struct SshTransport {
    config: SshConfig,
    conn: Mutex<Option<Connection>>,
}

impl SshTransport {
    pub fn new(config: SshConfig) -> Self {
        Self {
            config,
            conn: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SshConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, Option<Connection>> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn dial(&self) -> Result<Connection> {
        let addr = self.config.addr();
        let socket_addr = addr
            .to_socket_addrs()
            .and_then(|mut addrs| {
                addrs
                    .next()
                    .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no address resolved"))
            })
            .map_err(|source| Error::Connect {
                addr: addr.clone(),
                source,
            })?;

        let tcp = TcpStream::connect_timeout(&socket_addr, DIAL_TIMEOUT).map_err(|source| {
            Error::Connect {
                addr: addr.clone(),
                source,
            }
        })?;
        let socket = tcp.try_clone()?;

        let mut session = Session::new().map_err(|e| Error::ssh(&addr, e))?;
        session
            .method_pref(MethodType::CryptCs, CIPHERS)
            .map_err(|e| Error::ssh(&addr, e))?;
        session
            .method_pref(MethodType::CryptSc, CIPHERS)
            .map_err(|e| Error::ssh(&addr, e))?;
        session.set_tcp_stream(tcp);
        session.handshake().map_err(|e| Error::ssh(&addr, e))?;

        self.authenticate(&session, &addr)?;

        Ok(Connection { session, socket })
    }

    /// Public key first when a key is configured and parses, password as
    /// the fallback.
    fn authenticate(&self, session: &Session, addr: &str) -> Result<()> {
        let user = &self.config.user;

        if !self.config.private_key.is_empty() {
            match pubkey_auth(session, user, &self.config.private_key) {
                Ok(()) if session.authenticated() => return Ok(()),
                Ok(()) => {}
                Err(e) => log::debug!("{}: public key not used for {}: {}", addr, user, e),
            }
        }

        if self.config.password.is_empty() {
            return Err(Error::Auth {
                user: user.clone(),
                addr: addr.to_string(),
                message: "public key rejected and no password configured".to_string(),
            });
        }

        session
            .userauth_password(user, &self.config.password)
            .map_err(|e| Error::Auth {
                user: user.clone(),
                addr: addr.to_string(),
                message: e.to_string(),
            })?;

        if !session.authenticated() {
            return Err(Error::Auth {
                user: user.clone(),
                addr: addr.to_string(),
                message: "password rejected".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(unix)]
fn pubkey_auth(session: &Session, user: &str, private_key: &str) -> std::result::Result<(), String> {
    session
        .userauth_pubkey_memory(user, None, private_key, None)
        .map_err(|e| e.to_string())
}

#[cfg(not(unix))]
fn pubkey_auth(_session: &Session, _user: &str, _private_key: &str) -> std::result::Result<(), String> {
    Err("in-memory keys are not supported on this platform".to_string())
}

impl Transport for SshTransport {
    fn connect(&self) -> Result<()> {
        let mut guard = self.lock();
        if guard.is_some() {
            return Ok(());
        }
        log::debug!("ssh: connecting to {}@{}", self.config.user, self.config.addr());
        *guard = Some(self.dial()?);
        Ok(())
    }

    fn cmd_with_attach_io(
        &self,
        cancel: &CancelToken,
        cmd: &[String],
        streams: AttachIo<'_>,
        tty: bool,
    ) -> Result<()> {
        let addr = self.config.addr();
        let guard = self.lock();
        let conn = guard
            .as_ref()
            .ok_or_else(|| Error::NotConnected(self.config.host.clone()))?;

        // Arguments are joined verbatim; quoting is the caller's job.
        let command_line = cmd.join(" ");
        log::debug!("ssh {}: {}", addr, command_line);

        let mut channel = conn
            .session
            .channel_session()
            .map_err(|e| Error::ssh(&addr, e))?;

        if tty {
            let mut modes = PtyModes::new();
            modes.set_boolean(PtyModeOpcode::ECHO, false);
            modes.set_u32(PtyModeOpcode::TTY_OP_ISPEED, PTY_SPEED);
            modes.set_u32(PtyModeOpcode::TTY_OP_OSPEED, PTY_SPEED);
            channel
                .request_pty(PTY_TERM, Some(modes), Some((PTY_WIDTH, PTY_HEIGHT, 0, 0)))
                .map_err(|e| Error::ssh(&addr, e))?;
        }

        channel
            .exec(&command_line)
            .map_err(|e| Error::ssh(&addr, e))?;

        let (done_tx, done_rx) = mpsc::channel::<()>();
        let watch_socket = conn.socket.try_clone()?;
        let watch_cancel = cancel.clone();
        let watcher = thread::spawn(move || {
            loop {
                match done_rx.recv_timeout(WATCH_INTERVAL) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => return false,
                    Err(RecvTimeoutError::Timeout) => {
                        if watch_cancel.is_cancelled() {
                            let _ = watch_socket.shutdown(Shutdown::Both);
                            return true;
                        }
                    }
                }
            }
        });

        let pumped = pump_channel(&conn.session, &mut channel, streams);
        let _ = done_tx.send(());
        let cancelled = watcher.join().unwrap_or(false);

        let failed = |message: String| Error::CommandFailed {
            ip: self.config.host.clone(),
            command: command_line.clone(),
            message,
        };

        if cancelled {
            return Err(Error::Cancelled {
                ip: self.config.host.clone(),
                command: command_line.clone(),
            });
        }

        match pumped {
            Err(e) if !is_benign_close(&e) => return Err(failed(format!("stream error: {}", e))),
            _ => {}
        }

        let status = channel.exit_status().map_err(|e| Error::ssh(&addr, e))?;
        if status != 0 {
            return Err(failed(format!("exit status {}", status)));
        }
        Ok(())
    }

    fn disconnect(&self) -> Result<()> {
        let Some(conn) = self.lock().take() else {
            return Ok(());
        };
        let result = conn
            .session
            .disconnect(None, "edgekit done", None)
            .map_err(|e| Error::ssh(&self.config.addr(), e));
        let _ = conn.socket.shutdown(Shutdown::Both);
        result
    }

    fn describe(&self) -> String {
        format!("ssh {}@{}", self.config.user, self.config.addr())
    }
}

/// Drive `channel` with the session in non-blocking mode, then wait for
/// the remote side to close.
fn pump_channel(session: &Session, channel: &mut Channel, streams: AttachIo<'_>) -> io::Result<()> {
    let stderr = channel.stderr();
    session.set_blocking(false);
    let pumped = pump(
        &mut SshStreams {
            channel: &mut *channel,
            stderr,
        },
        streams,
    );
    session.set_blocking(true);
    pumped?;
    channel.wait_close().map_err(io::Error::from)
}

/// The three streams of an exec channel. Calls may fail with
/// `WouldBlock` when the remote side is not ready.
trait ChannelStreams {
    fn write_stdin(&mut self, buf: &[u8]) -> io::Result<usize>;
    fn close_stdin(&mut self) -> io::Result<()>;
    fn read_stdout(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn read_stderr(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

struct SshStreams<'c> {
    channel: &'c mut Channel,
    stderr: ssh2::Stream,
}

impl ChannelStreams for SshStreams<'_> {
    fn write_stdin(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.channel.write(buf)
    }

    fn close_stdin(&mut self) -> io::Result<()> {
        self.channel.send_eof().map_err(io::Error::from)
    }

    fn read_stdout(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.channel.read(buf)
    }

    fn read_stderr(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stderr.read(buf)
    }
}

/// Move data in all three directions until stdout and stderr reach EOF.
///
/// Both outputs are drained on every turn, also while stdin is still being
/// fed: stdout and stderr share one channel window, and a remote that
/// cannot flush one of them stops producing the other.
fn pump(chan: &mut impl ChannelStreams, streams: AttachIo<'_>) -> io::Result<()> {
    let AttachIo {
        mut stdin,
        mut stdout,
        mut stderr,
    } = streams;

    let mut buf = vec![0u8; PUMP_CHUNK];
    let mut pending: Vec<u8> = Vec::new();
    let mut offset = 0;
    let mut eof_sent = false;
    let mut out_open = true;
    let mut err_open = true;

    while out_open || err_open {
        let mut progressed = false;

        if !eof_sent {
            if offset == pending.len() {
                pending.clear();
                offset = 0;
                if let Some(input) = stdin.as_mut() {
                    match input.read(&mut buf) {
                        Ok(0) => stdin = None,
                        Ok(n) => {
                            pending.extend_from_slice(&buf[..n]);
                            progressed = true;
                        }
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                        Err(e) if is_benign_close(&e) => stdin = None,
                        Err(e) => return Err(e),
                    }
                }
            }

            if offset < pending.len() {
                match chan.write_stdin(&pending[offset..]) {
                    Ok(n) => {
                        offset += n;
                        progressed = true;
                    }
                    Err(e) if is_retry(&e) => {}
                    // Remote stopped reading; the rest of the input is dropped.
                    Err(e) if is_benign_close(&e) => {
                        stdin = None;
                        pending.clear();
                        offset = 0;
                    }
                    Err(e) => return Err(e),
                }
            }

            if stdin.is_none() && offset == pending.len() {
                match chan.close_stdin() {
                    Ok(()) => {
                        eof_sent = true;
                        progressed = true;
                    }
                    Err(e) if is_retry(&e) => {}
                    Err(e) => return Err(e),
                }
            }
        }

        if out_open {
            let read = chan.read_stdout(&mut buf);
            out_open = forward(read, &buf, &mut stdout, &mut progressed)?;
        }
        if err_open {
            let read = chan.read_stderr(&mut buf);
            err_open = forward(read, &buf, &mut stderr, &mut progressed)?;
        }

        if !progressed {
            thread::sleep(PUMP_IDLE_WAIT);
        }
    }

    for sink in [stdout.as_mut(), stderr.as_mut()].into_iter().flatten() {
        sink.flush()?;
    }
    Ok(())
}

/// Pass one read result on to `sink`. Returns false once the stream is at EOF.
fn forward<'a>(
    read: io::Result<usize>,
    buf: &[u8],
    sink: &mut Option<Box<dyn Write + Send + 'a>>,
    progressed: &mut bool,
) -> io::Result<bool> {
    match read {
        Ok(0) => Ok(false),
        Ok(n) => {
            *progressed = true;
            if let Some(sink) = sink.as_mut() {
                sink.write_all(&buf[..n])?;
            }
            Ok(true)
        }
        Err(e) if is_retry(&e) => Ok(true),
        Err(e) => Err(e),
    }
}

fn is_retry(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}
