// src/spawn.rs

//! Spawning child commands with all three stdio streams piped.
//!
//! Shared by [`stage::Process`](crate::stage::Process) and
//! [`endpoint::ProcessEndpoint`](crate::endpoint::ProcessEndpoint).

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::errors::{Result, TickpipeError};
use crate::stream::Stream;

/// What to run, where, and with which environment.
///
/// The command is interpreted by `/bin/sh -c`. When an environment is set it
/// replaces the inherited one entirely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub command: String,
    pub cwd: Option<PathBuf>,
    pub env: Option<BTreeMap<String, String>>,
}

impl CommandSpec {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            cwd: None,
            env: None,
        }
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command)
    }
}

impl From<&str> for CommandSpec {
    fn from(command: &str) -> Self {
        CommandSpec::new(command)
    }
}

impl From<String> for CommandSpec {
    fn from(command: String) -> Self {
        CommandSpec::new(command)
    }
}

/// A freshly spawned child and its stdio streams.
///
/// All three streams are non-blocking.
pub(crate) struct Spawned {
    pub child: Child,
    pub stdin: Rc<Stream>,
    pub stdout: Rc<Stream>,
    pub stderr: Rc<Stream>,
}

pub(crate) fn spawn(spec: &CommandSpec) -> Result<Spawned> {
    let mut cmd = Command::new("/bin/sh");
    cmd.arg("-c").arg(&spec.command);

    if let Some(ref cwd) = spec.cwd {
        cmd.current_dir(cwd);
    }
    if let Some(ref env) = spec.env {
        cmd.env_clear().envs(env);
    }

    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd
        .spawn()
        .map_err(|e| spawn_error(spec, e.to_string()))?;

    // Check status right away; a child we cannot query is useless to us.
    if let Err(e) = child.try_wait() {
        let _ = child.kill();
        let _ = child.wait();
        return Err(spawn_error(spec, e.to_string()));
    }

    let (Some(stdin), Some(stdout), Some(stderr)) =
        (child.stdin.take(), child.stdout.take(), child.stderr.take())
    else {
        let _ = child.kill();
        let _ = child.wait();
        return Err(spawn_error(spec, "stdio pipes were not created".to_string()));
    };

    let stdin = Stream::from_fd(format!("{}:stdin", spec.command), stdin);
    let stdout = Stream::from_fd(format!("{}:stdout", spec.command), stdout);
    let stderr = Stream::from_fd(format!("{}:stderr", spec.command), stderr);
    for stream in [&stdin, &stdout, &stderr] {
        stream.set_nonblocking(true)?;
    }

    info!(
        command = %spec.command,
        pid = child.id(),
        cwd = ?spec.cwd,
        "spawned process"
    );

    Ok(Spawned {
        child,
        stdin,
        stdout,
        stderr,
    })
}

/// How long a child whose output has ended may take to exit on its own.
pub(crate) const EXIT_GRACE: Duration = Duration::from_millis(100);

/// Wait at most `within` for the child to exit. Never kills.
pub(crate) fn wait_exit(command: &str, child: &mut Child, within: Duration) -> Option<ExitStatus> {
    let deadline = Instant::now() + within;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Some(status),
            Ok(None) if Instant::now() < deadline => thread::sleep(Duration::from_millis(2)),
            Ok(None) => {
                debug!(command = %command, pid = child.id(), "child still running after grace period");
                return None;
            }
            Err(e) => {
                warn!(command = %command, error = %e, "failed to query child status");
                return None;
            }
        }
    }
}

/// Collect the child's exit status, killing it first if it is still
/// running. Does not sleep.
pub(crate) fn reap(command: &str, child: &mut Child) -> Option<ExitStatus> {
    match child.try_wait() {
        Ok(Some(status)) => {
            debug!(command = %command, ?status, "process reaped");
            return Some(status);
        }
        Ok(None) => {
            debug!(command = %command, pid = child.id(), "process still running; killing");
            if let Err(e) = child.kill() {
                warn!(command = %command, error = %e, "failed to kill child process");
            }
        }
        Err(e) => warn!(command = %command, error = %e, "failed to query child status"),
    }

    match child.wait() {
        Ok(status) => {
            debug!(command = %command, ?status, "process reaped");
            Some(status)
        }
        Err(e) => {
            warn!(command = %command, error = %e, "failed to wait for child process");
            None
        }
    }
}

fn spawn_error(spec: &CommandSpec, message: String) -> TickpipeError {
    TickpipeError::Spawn {
        command: spec.command.clone(),
        message,
    }
}
