//! Ownership of one live engine process and its standard streams.

use crate::error::{DriftError, Result};
use crate::protocol::{EngineCommand, RenderMode};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Request/response primitives over the engine's line protocol.
///
/// Commands and replies are strictly lockstep: a reply line is always read
/// before the next command that expects one is sent.
pub trait EngineLink {
    /// Writes one command line. Never waits for a reply.
    fn send_line(&mut self, line: &str) -> Result<()>;

    /// Blocks until the engine writes one line, the stream closes, or the
    /// configured timeout expires.
    fn read_line(&mut self) -> Result<String>;

    /// Sends `quit`, closes input and waits for exit. Failures are logged.
    fn shutdown(&mut self);

    fn send(&mut self, command: &EngineCommand) -> Result<()> {
        self.send_line(&command.to_string())
    }

    /// Sends a command that produces a reply and returns that reply.
    fn request(&mut self, command: &EngineCommand) -> Result<String> {
        if command.reply_lines() == 0 {
            return Err(DriftError::Config(format!(
                "'{}' does not produce a reply",
                command
            )));
        }
        self.send(command)?;
        let mut reply = self.read_line()?;
        for _ in 1..command.reply_lines() {
            reply = self.read_line()?;
        }
        Ok(reply)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    pub read_timeout: Duration,
    pub shutdown_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

/// A running engine started as `<binary> -s stdin`, stderr discarded.
///
/// Dropping the session performs [`EngineLink::shutdown`] if it has not
/// already run, so the process is reaped on every exit path.
pub struct EngineSession {
    binary: PathBuf,
    child: Child,
    stdin: Option<ChildStdin>,
    lines: Receiver<std::io::Result<String>>,
    options: SessionOptions,
    closed: bool,
}

impl EngineSession {
    pub fn start(binary: &Path, mode: Option<RenderMode>, options: SessionOptions) -> Result<Self> {
        let spawn_err = |source| DriftError::Spawn {
            binary: binary.to_path_buf(),
            source,
        };
        let mut command = Command::new(binary);
        command
            .args(["-s", "stdin"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        // Own process group: a terminal interrupt reaches the harness only,
        // which then quits the engine through the protocol.
        #[cfg(unix)]
        std::os::unix::process::CommandExt::process_group(&mut command, 0);
        let mut child = command.spawn().map_err(spawn_err)?;

        let stdin = child.stdin.take();
        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(spawn_err(std::io::Error::new(
                    ErrorKind::BrokenPipe,
                    "engine stdout was not captured",
                )));
            }
        };

        let (tx, rx) = mpsc::channel();
        let reader = thread::Builder::new()
            .name(format!("engine-stdout-{}", child.id()))
            .spawn(move || {
                for line in BufReader::new(stdout).lines() {
                    let failed = line.is_err();
                    if tx.send(line).is_err() || failed {
                        break;
                    }
                }
            });
        if let Err(e) = reader {
            let _ = child.kill();
            let _ = child.wait();
            return Err(spawn_err(e));
        }

        info!(binary = %binary.display(), pid = child.id(), "engine started");
        let mut session = Self {
            binary: binary.to_path_buf(),
            child,
            stdin,
            lines: rx,
            options,
            closed: false,
        };
        if let Some(mode) = mode {
            session.send(&EngineCommand::Mode(mode))?;
        }
        Ok(session)
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }
}

impl EngineLink for EngineSession {
    fn send_line(&mut self, line: &str) -> Result<()> {
        let stdin = self.stdin.as_mut().ok_or(DriftError::ProcessExited)?;
        debug!(pid = self.child.id(), command = line, "send");
        stdin
            .write_all(format!("{}\n", line).as_bytes())
            .and_then(|_| stdin.flush())
            .map_err(|e| match e.kind() {
                ErrorKind::BrokenPipe => DriftError::ProcessExited,
                _ => DriftError::Io(e),
            })
    }

    fn read_line(&mut self) -> Result<String> {
        match self.lines.recv_timeout(self.options.read_timeout) {
            Ok(Ok(line)) => {
                debug!(pid = self.child.id(), reply = %line, "recv");
                Ok(line)
            }
            Ok(Err(e)) => Err(DriftError::Io(e)),
            Err(RecvTimeoutError::Timeout) => Err(DriftError::EngineUnresponsive {
                timeout: self.options.read_timeout,
            }),
            Err(RecvTimeoutError::Disconnected) => Err(DriftError::ProcessExited),
        }
    }

    fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let pid = self.child.id();

        if let Err(e) = self.send(&EngineCommand::Quit) {
            warn!(pid, error = %e, "could not send quit to engine");
        }
        // Closing stdin lets an engine blocked on input observe EOF.
        drop(self.stdin.take());

        match self.child.wait_timeout(self.options.shutdown_timeout) {
            Ok(Some(status)) => info!(pid, status = %status, "engine exited"),
            Ok(None) => {
                warn!(
                    pid,
                    timeout_secs = self.options.shutdown_timeout.as_secs_f64(),
                    "engine did not exit after quit; killing"
                );
                if let Err(e) = self.child.kill() {
                    warn!(pid, error = %e, "kill failed");
                }
                if let Err(e) = self.child.wait() {
                    warn!(pid, error = %e, "reaping engine failed");
                }
            }
            Err(e) => warn!(pid, error = %e, "waiting for engine exit failed"),
        }
    }
}

impl Drop for EngineSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

trait ChildExt {
    fn wait_timeout(&mut self, timeout: Duration) -> std::io::Result<Option<ExitStatus>>;
}

impl ChildExt for Child {
    fn wait_timeout(&mut self, timeout: Duration) -> std::io::Result<Option<ExitStatus>> {
        let start = Instant::now();
        let poll_interval = Duration::from_millis(20);
        loop {
            match self.try_wait()? {
                Some(status) => return Ok(Some(status)),
                None => {
                    if start.elapsed() >= timeout {
                        return Ok(None);
                    }
                    thread::sleep(poll_interval);
                }
            }
        }
    }
}
