// src/endpoint/process.rs

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::Path;
use std::process::{Child, ExitStatus};
use std::rc::Rc;

use tracing::warn;

use super::Endpoint;
use crate::errors::Result;
use crate::spawn::{self, CommandSpec, Spawned};
use crate::stream::Stream;

/// A child process used as a pipeline endpoint: stdin is the input, stdout
/// the output, stderr the error stream.
pub struct ProcessEndpoint {
    command: String,
    pid: u32,
    child: RefCell<Option<Child>>,
    stdin: Rc<Stream>,
    stdout: Rc<Stream>,
    stderr: Rc<Stream>,
}

impl ProcessEndpoint {
    pub fn spawn(command: impl Into<CommandSpec>) -> Result<Rc<ProcessEndpoint>> {
        let spec = command.into();
        let Spawned {
            child,
            stdin,
            stdout,
            stderr,
        } = spawn::spawn(&spec)?;

        Ok(Rc::new(ProcessEndpoint {
            command: spec.command,
            pid: child.id(),
            child: RefCell::new(Some(child)),
            stdin,
            stdout,
            stderr,
        }))
    }

    pub fn spawn_in(
        command: &str,
        cwd: Option<&Path>,
        env: Option<BTreeMap<String, String>>,
    ) -> Result<Rc<ProcessEndpoint>> {
        Self::spawn(CommandSpec {
            command: command.to_string(),
            cwd: cwd.map(Path::to_path_buf),
            env,
        })
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Exit status if the child has exited; never blocks.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        let mut child = self.child.borrow_mut();
        match child.as_mut()?.try_wait() {
            Ok(status) => status,
            Err(e) => {
                warn!(command = %self.command, error = %e, "failed to query child status");
                None
            }
        }
    }
}

impl Endpoint for ProcessEndpoint {
    fn input(&self) -> Rc<Stream> {
        Rc::clone(&self.stdin)
    }

    fn output(&self) -> Rc<Stream> {
        Rc::clone(&self.stdout)
    }

    fn errors(&self) -> Option<Rc<Stream>> {
        Some(Rc::clone(&self.stderr))
    }
}

impl Drop for ProcessEndpoint {
    fn drop(&mut self) {
        for stream in [&self.stdin, &self.stdout, &self.stderr] {
            if let Err(e) = stream.close() {
                warn!(command = %self.command, stream = %stream, error = %e, "failed to close stream");
            }
        }
        if let Some(mut child) = self.child.get_mut().take() {
            spawn::reap(&self.command, &mut child);
        }
    }
}
