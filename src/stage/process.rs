// src/stage/process.rs

//! A spawned child command as a pipeline stage.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::process::{Child, ExitStatus};
use std::rc::{Rc, Weak};

use tracing::{debug, trace, warn};

use super::{CHUNK_SIZE, Capability, State, stat_verify};
use crate::errors::Result;
use crate::reactor::{Callback, Reactor, Verify};
use crate::sink::Sink;
use crate::spawn::{self, CommandSpec, Spawned};
use crate::stream::Stream;

#[derive(Debug, Clone, Copy)]
enum Output {
    Stdout,
    Stderr,
}

/// A child process with its three standard streams.
///
/// Output and error output go to the configured [`Sink`]s when the process
/// is registered with a reactor; without a sink the bytes are read and
/// discarded so the child never blocks on a full pipe.
///
/// Once both output streams have ended, [`stat`](Capability::stat) closes
/// the streams and reaps the child if it has exited, but never waits for it
/// or kills it. A child that outlives its output is collected by
/// [`exit_status`](Process::exit_status) or on drop.
///
/// Dropping a `Process` closes every stream and reaps the child, killing it
/// if it is still running after a short grace period.
pub struct Process {
    me: Weak<Process>,
    command: String,
    pid: u32,
    child: RefCell<Option<Child>>,
    stdin: Rc<Stream>,
    stdout: Rc<Stream>,
    stderr: Rc<Stream>,
    read_sink: RefCell<Option<Sink>>,
    error_sink: RefCell<Option<Sink>>,
    exit_status: Cell<Option<ExitStatus>>,
    settled: Cell<bool>,
}

impl Process {
    /// Run `sh -c command`.
    pub fn spawn(command: impl Into<CommandSpec>) -> Result<Rc<Process>> {
        let spec = command.into();
        let Spawned {
            child,
            stdin,
            stdout,
            stderr,
        } = spawn::spawn(&spec)?;

        Ok(Rc::new_cyclic(|me| Process {
            me: me.clone(),
            command: spec.command,
            pid: child.id(),
            child: RefCell::new(Some(child)),
            stdin,
            stdout,
            stderr,
            read_sink: RefCell::new(None),
            error_sink: RefCell::new(None),
            exit_status: Cell::new(None),
            settled: Cell::new(false),
        }))
    }

    /// Run `sh -c command` in `cwd`, with `env` replacing the inherited
    /// environment when given.
    pub fn spawn_in(
        command: &str,
        cwd: Option<&Path>,
        env: Option<BTreeMap<String, String>>,
    ) -> Result<Rc<Process>> {
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

    /// Exit status, once the child has exited.
    ///
    /// After the output has ended this waits briefly for a child that is
    /// still exiting; otherwise it never blocks.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        if self.exit_status.get().is_none() && self.settled.get() {
            if let Some(child) = self.child.borrow_mut().as_mut() {
                let status = spawn::wait_exit(&self.command, child, spawn::EXIT_GRACE);
                self.exit_status.set(status);
            }
        }
        self.exit_status.get()
    }

    fn is_running(&self) -> bool {
        let mut child = self.child.borrow_mut();
        let Some(child) = child.as_mut() else {
            return false;
        };
        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                self.exit_status.set(Some(status));
                false
            }
            Err(e) => {
                warn!(command = %self.command, error = %e, "failed to query child status");
                false
            }
        }
    }

    fn sink(&self, which: Output) -> Option<Sink> {
        match which {
            Output::Stdout => self.read_sink.borrow().clone(),
            Output::Stderr => self.error_sink.borrow().clone(),
        }
    }

    /// Readiness callback for stdout or stderr. The sink is looked up on
    /// every call, so `read`/`error` may be set after `with`.
    fn forward(&self, which: Output) -> Callback {
        let me = self.me.clone();
        Box::new(move |ready| {
            let sink = me.upgrade().and_then(|process| process.sink(which));
            match sink {
                Some(sink) => sink.deliver(ready, CHUNK_SIZE),
                None => {
                    let dropped = ready.read_chunk(CHUNK_SIZE)?;
                    if !dropped.is_empty() {
                        trace!(stream = %ready, bytes = dropped.len(), "discarded output without a sink");
                    }
                    Ok(())
                }
            }
        })
    }

    fn close_input(&self) {
        if let Err(e) = self.stdin.close() {
            warn!(command = %self.command, error = %e, "failed to close stdin");
        }
    }

    fn close_output(&self) {
        let streams = [&self.stdout, &self.stderr];
        for stream in streams {
            if let Err(e) = stream.close() {
                warn!(command = %self.command, stream = %stream, error = %e, "failed to close stream");
            }
        }
        for sink in [self.sink(Output::Stdout), self.sink(Output::Stderr)]
            .into_iter()
            .flatten()
        {
            if let Err(e) = sink.close_stream() {
                warn!(command = %self.command, error = %e, "failed to close sink stream");
            }
        }
    }

    /// Output has ended: close everything and reap the child only if it
    /// already exited.
    fn settle(&self) {
        if !self.settled.replace(true) {
            debug!(command = %self.command, pid = self.pid, "output ended");
        }
        self.close_input();
        self.close_output();
        if !self.is_running() {
            self.release();
        }
    }

    fn release(&self) {
        let Some(mut child) = self.child.borrow_mut().take() else {
            return;
        };
        if let Some(status) = spawn::reap(&self.command, &mut child) {
            self.exit_status.set(Some(status));
        }
        debug!(command = %self.command, pid = self.pid, status = ?self.exit_status.get(), "process closed");
    }
}

impl Capability for Process {
    fn with(&self, reactor: &mut Reactor, verify: Option<Verify>) {
        let verify = verify.unwrap_or_else(|| stat_verify(self.me.clone()));
        reactor
            .read(
                Rc::clone(&self.stdout),
                self.forward(Output::Stdout),
                Some(Rc::clone(&verify)),
            )
            .read(
                Rc::clone(&self.stderr),
                self.forward(Output::Stderr),
                Some(verify),
            );
    }

    /// Never blocks; returns how much stdin accepted.
    fn write(&self, data: &[u8]) -> usize {
        match self.stdin.write(data) {
            Ok(n) => n,
            Err(e) => {
                warn!(command = %self.command, error = %e, "write to stdin failed");
                0
            }
        }
    }

    fn read(&self, sink: Sink) -> Result<()> {
        sink.validate()?;
        *self.read_sink.borrow_mut() = Some(sink);
        Ok(())
    }

    fn error(&self, sink: Sink) -> Result<()> {
        sink.validate()?;
        *self.error_sink.borrow_mut() = Some(sink);
        Ok(())
    }

    /// `READABLE` while the child runs and neither output stream has hit
    /// end-of-stream. A child that already exited stays `READABLE` until
    /// its buffered output has been read.
    fn stat(&self) -> State {
        let running = self.is_running();
        let readable = self.stdout.is_live()
            && self.stderr.is_live()
            && (running || self.stdout.has_pending_input() || self.stderr.has_pending_input());

        let state = if readable {
            let mut state = State::READABLE;
            if self.stdin.is_open() {
                state |= State::WRITABLE;
            }
            state
        } else {
            self.settle();
            State::CLOSED
        };
        trace!(command = %self.command, running, state = ?state, "process stat");
        state
    }

    fn close(&self, what: State) {
        let everything = what.is_closed();
        if everything || what.contains(State::WRITABLE) {
            self.close_input();
        }
        if everything || what.contains(State::READABLE) {
            self.close_output();
        }
        if everything {
            if self.settled.get() && self.is_running() {
                trace!(command = %self.command, pid = self.pid, "output ended; leaving child to exit");
            } else {
                self.release();
            }
        }
    }

    fn input_stream(&self) -> Option<Rc<Stream>> {
        Some(Rc::clone(&self.stdin))
    }

    fn output_stream(&self) -> Option<Rc<Stream>> {
        Some(Rc::clone(&self.stdout))
    }
}

impl fmt::Display for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command)
    }
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Process")
            .field("command", &self.command)
            .field("pid", &self.pid)
            .field("exit_status", &self.exit_status.get())
            .finish_non_exhaustive()
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        self.close(State::CLOSED);
        if let Some(mut child) = self.child.get_mut().take() {
            spawn::wait_exit(&self.command, &mut child, spawn::EXIT_GRACE);
            spawn::reap(&self.command, &mut child);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_process_is_readable_and_writable() {
        let process = Process::spawn("cat").unwrap();
        assert_eq!(process.stat(), State::READABLE | State::WRITABLE);
        assert!(process.exit_status().is_none());
    }

    #[test]
    fn closing_input_drops_writable() {
        let process = Process::spawn("sleep 5").unwrap();
        process.close(State::WRITABLE);
        assert_eq!(process.stat(), State::READABLE);
    }

    #[test]
    fn full_close_kills_and_reaps() {
        let process = Process::spawn("sleep 5").unwrap();
        process.close(State::CLOSED);
        process.close(State::CLOSED);
        assert_eq!(process.stat(), State::CLOSED);
        assert!(process.exit_status().is_some());
        assert_eq!(process.write(b"x"), 0);
    }

    #[test]
    fn write_into_full_stdin_returns_short_count() {
        let process = Process::spawn("sleep 5").unwrap();
        let chunk = vec![b'x'; 1024 * 1024];
        let accepted = process.write(&chunk);
        assert!(accepted > 0 && accepted < chunk.len());
        assert_eq!(process.write(b"more"), 0);
    }

    #[test]
    fn closed_stream_sink_is_rejected() {
        let process = Process::spawn("true").unwrap();
        let (reader, _writer) = crate::stream::pipe("sink").unwrap();
        reader.close().unwrap();
        assert!(process.read(Sink::Stream(reader)).is_err());
        assert!(process.read(Sink::callback(|_| Ok(()))).is_ok());
    }
}
