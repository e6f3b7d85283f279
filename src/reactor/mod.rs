// src/reactor/mod.rs

//! Readiness-driven event loop.
//!
//! The reactor keeps two watch tables (read and write), keyed by descriptor.
//! One [`Reactor::wait`] call:
//!
//! 1. polls every watched descriptor for at most the given timeout,
//! 2. runs the callback of each ready descriptor once,
//! 3. re-evaluates every entry's liveness predicate and drops the dead ones,
//! 4. returns how many entries remain.
//!
//! Callers drive it until it reports zero. Nothing here is thread-safe; the
//! reactor and everything it watches live on one thread.
//!
//! A read watch may be gated on another stream (see [`Reactor::gate`]):
//! while the gate has no room for a write, the watched stream is not polled and
//! the reactor waits for the gate to become writable instead. This is how
//! forwarding between stages applies backpressure without blocking.
//!
//! - `signals` pumps OS signals into handlers during [`Reactor::dispatch`].
//! - [`driver`] ticks registered reactors periodically instead of an
//!   explicit wait loop.

use std::cell::Ref;
use std::collections::HashMap;
use std::fs::File;
use std::os::fd::{AsFd, RawFd};
use std::rc::Rc;
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use tracing::{debug, trace};

use crate::endpoint::Endpoint;
use crate::errors::{Result, TickpipeError};
use crate::sink::Sink;
use crate::stage::CHUNK_SIZE;
use crate::stream::Stream;

pub mod driver;
mod signals;

pub use driver::Driver;

use signals::SignalTable;

/// Invoked with the stream that became ready.
pub type Callback = Box<dyn FnMut(&Stream) -> Result<()>>;

/// Liveness predicate: `false` drops the watch on the next pruning pass.
pub type Verify = Rc<dyn Fn() -> bool>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Read,
    Write,
}

impl Direction {
    fn interest(self) -> PollFlags {
        match self {
            Direction::Read => PollFlags::POLLIN,
            Direction::Write => PollFlags::POLLOUT,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Direction::Read => "read",
            Direction::Write => "write",
        }
    }
}

struct Watch {
    stream: Rc<Stream>,
    callback: Callback,
    verify: Option<Verify>,
    gate: Option<Rc<Stream>>,
}

impl Watch {
    /// The gate, while it has no room for a write. Bytes held on the gate
    /// do not block it: the callback is what delivers them.
    fn blocked_gate(&self) -> Option<&Stream> {
        self.gate.as_deref().filter(|gate| !gate.has_room())
    }

    fn is_alive(&self) -> bool {
        if !self.stream.is_open() {
            return false;
        }
        match &self.verify {
            Some(verify) => verify(),
            None => self.stream.is_live(),
        }
    }
}

#[derive(Default)]
pub struct Reactor {
    reads: HashMap<RawFd, Watch>,
    writes: HashMap<RawFd, Watch>,
    signals: SignalTable,
}

impl Reactor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Watch `stream` for read readiness.
    ///
    /// Without `verify`, the watch lives while the stream is open and not
    /// at end-of-stream. Registering the same descriptor again replaces the
    /// previous entry.
    pub fn read(&mut self, stream: Rc<Stream>, callback: Callback, verify: Option<Verify>) -> &mut Self {
        self.watch(Direction::Read, stream, callback, verify);
        self
    }

    /// Watch `stream` for write readiness. Same rules as [`read`](Self::read).
    pub fn write(&mut self, stream: Rc<Stream>, callback: Callback, verify: Option<Verify>) -> &mut Self {
        self.watch(Direction::Write, stream, callback, verify);
        self
    }

    fn watch(&mut self, direction: Direction, stream: Rc<Stream>, callback: Callback, verify: Option<Verify>) {
        let Some(fd) = stream.raw_fd() else {
            debug!(stream = %stream, direction = direction.as_str(), "stream has no pollable descriptor");
            return;
        };
        trace!(stream = %stream, fd, direction = direction.as_str(), "watch registered");
        let table = match direction {
            Direction::Read => &mut self.reads,
            Direction::Write => &mut self.writes,
        };
        table.insert(
            fd,
            Watch {
                stream,
                callback,
                verify,
                gate: None,
            },
        );
    }

    /// Only poll the read watch on `stream` while `gate` can take a write.
    ///
    /// Returns `false` if `stream` has no read watch.
    pub fn gate(&mut self, stream: &Stream, gate: Rc<Stream>) -> bool {
        let Some(watch) = stream.raw_fd().and_then(|fd| self.reads.get_mut(&fd)) else {
            return false;
        };
        trace!(stream = %stream, gate = %gate, "read gated");
        watch.gate = Some(gate);
        true
    }

    /// Number of registered watches, without a liveness pass.
    pub fn len(&self) -> usize {
        self.reads.len() + self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run the liveness pass and return how many watches remain.
    pub fn count(&mut self) -> usize {
        prune(&mut self.reads, Direction::Read);
        prune(&mut self.writes, Direction::Write);
        self.len()
    }

    /// Wait at most `timeout` for readiness, run ready callbacks, prune.
    ///
    /// Returns the number of watches left. With nothing watched this returns
    /// 0 immediately. A callback error aborts the pass and is returned as is.
    pub fn wait(&mut self, timeout: Duration) -> Result<usize> {
        self.flush_gates()?;
        for (direction, fd) in self.poll_ready(timeout)? {
            let table = match direction {
                Direction::Read => &mut self.reads,
                Direction::Write => &mut self.writes,
            };
            if let Some(watch) = table.get_mut(&fd) {
                trace!(stream = %watch.stream, direction = direction.as_str(), "ready");
                (watch.callback)(&*watch.stream)?;
            }
        }
        Ok(self.count())
    }

    /// One tick: deliver pending signals, then `wait(timeout)`.
    pub fn invoke(&mut self, timeout: Duration) -> Result<usize> {
        self.dispatch();
        self.wait(timeout)
    }

    /// Install `action` for `signal`; it runs during [`dispatch`](Self::dispatch).
    pub fn on<F>(&mut self, signal: i32, action: F) -> Result<&mut Self>
    where
        F: FnMut(i32) + 'static,
    {
        self.signals.on(signal, Box::new(action))?;
        Ok(self)
    }

    /// Run handlers for signals received since the last call.
    pub fn dispatch(&mut self) -> usize {
        self.signals.dispatch()
    }

    /// Chain endpoints: each stage's output feeds the next stage, the last
    /// stage's output goes to `sink`.
    ///
    /// The first stage's input is left to the caller (see
    /// [`pipe_from`](Self::pipe_from)). Error streams are drained and logged.
    pub fn pipe(&mut self, stages: &[Rc<dyn Endpoint>], sink: Sink) -> Result<()> {
        sink.validate()?;
        let Some(last) = stages.last() else {
            return Err(TickpipeError::ConfigError(
                "pipe needs at least one stage".to_string(),
            ));
        };

        for pair in stages.windows(2) {
            let producer = Rc::clone(&pair[0]);
            let consumer = Rc::clone(&pair[1]);
            let (output, input) = (producer.output(), consumer.input());
            self.drain_errors(&*producer);
            self.read(
                Rc::clone(&output),
                Box::new(move |ready| {
                    consumer.invoke(Some(ready))?;
                    producer.pump()
                }),
                None,
            );
            self.gate(&output, input);
        }

        let last = Rc::clone(last);
        let output = last.output();
        let destination = match &sink {
            Sink::Stream(stream) => Some(Rc::clone(stream)),
            Sink::Callback(_) => None,
        };
        self.drain_errors(&*last);
        self.read(
            Rc::clone(&output),
            Box::new(move |ready| {
                sink.deliver(ready, CHUNK_SIZE)?;
                last.pump()
            }),
            None,
        );
        if let Some(destination) = destination {
            self.gate(&output, destination);
        }
        Ok(())
    }

    /// Like [`pipe`](Self::pipe), but also feeds `source` into the first
    /// stage; EOF on `source` closes the first stage's input.
    pub fn pipe_from(&mut self, source: Rc<Stream>, stages: &[Rc<dyn Endpoint>], sink: Sink) -> Result<()> {
        self.pipe(stages, sink)?;
        if let Some(first) = stages.first() {
            let input = first.input();
            let first = Rc::clone(first);
            self.read(
                Rc::clone(&source),
                Box::new(move |ready| first.invoke(Some(ready)).map(|_| ())),
                None,
            );
            self.gate(&source, input);
        }
        Ok(())
    }

    fn drain_errors(&mut self, stage: &dyn Endpoint) {
        let Some(errors) = stage.errors() else {
            return;
        };
        self.read(
            errors,
            Box::new(|ready| {
                let chunk = ready.read_chunk(CHUNK_SIZE)?;
                if !chunk.is_empty() {
                    debug!(stream = %ready, "stderr: {}", String::from_utf8_lossy(&chunk).trim_end());
                }
                Ok(())
            }),
            None,
        );
    }

    /// Deliver bytes held on gates that have room again, so they do not
    /// wait for the upstream stream to become readable.
    fn flush_gates(&self) -> Result<()> {
        for watch in self.reads.values() {
            let Some(gate) = watch.gate.as_deref() else {
                continue;
            };
            if gate.is_holding() && gate.has_room() {
                gate.flush_held()?;
            }
        }
        Ok(())
    }

    fn poll_ready(&self, timeout: Duration) -> Result<Vec<(Direction, RawFd)>> {
        let mut polled = Vec::with_capacity(self.len());
        for (direction, table) in [(Direction::Read, &self.reads), (Direction::Write, &self.writes)] {
            for (fd, watch) in table {
                let entry = match watch.blocked_gate() {
                    // A hook-backed gate frees up when its own output is read.
                    Some(gate) => gate.file().map(|file| Polled {
                        direction,
                        fd: *fd,
                        file,
                        interest: PollFlags::POLLOUT,
                        wake_only: true,
                    }),
                    None => watch.stream.file().map(|file| Polled {
                        direction,
                        fd: *fd,
                        file,
                        interest: direction.interest(),
                        wake_only: false,
                    }),
                };
                polled.extend(entry);
            }
        }
        if polled.is_empty() {
            return Ok(Vec::new());
        }

        let mut fds: Vec<PollFd<'_>> = polled
            .iter()
            .map(|entry| PollFd::new(entry.file.as_fd(), entry.interest))
            .collect();

        match poll(&mut fds, poll_timeout(timeout)) {
            Ok(0) | Err(Errno::EINTR) => return Ok(Vec::new()),
            Ok(_) => {}
            Err(e) => return Err(e.into()),
        }

        Ok(fds
            .iter()
            .zip(&polled)
            .filter(|(pfd, entry)| !entry.wake_only && pfd.revents().is_some_and(|events| !events.is_empty()))
            .map(|(_, entry)| (entry.direction, entry.fd))
            .collect())
    }
}

/// One descriptor handed to `poll(2)`. Gate entries only wake the loop so
/// the gated stream is polled again on the next pass.
struct Polled<'a> {
    direction: Direction,
    fd: RawFd,
    file: Ref<'a, File>,
    interest: PollFlags,
    wake_only: bool,
}

fn prune(table: &mut HashMap<RawFd, Watch>, direction: Direction) {
    table.retain(|fd, watch| {
        let alive = watch.is_alive();
        if !alive {
            debug!(stream = %watch.stream, fd = *fd, direction = direction.as_str(), "watch dropped");
        }
        alive
    });
}

fn poll_timeout(timeout: Duration) -> PollTimeout {
    if timeout.is_zero() {
        return PollTimeout::ZERO;
    }
    let millis = timeout.as_millis().clamp(1, i32::MAX as u128) as i32;
    PollTimeout::try_from(millis).unwrap_or(PollTimeout::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    use crate::stream::pipe;

    #[test]
    fn timeout_rounds_sub_millisecond_up() {
        assert_eq!(poll_timeout(Duration::ZERO), PollTimeout::ZERO);
        assert_eq!(poll_timeout(Duration::from_micros(10)), PollTimeout::try_from(1).unwrap());
        assert_eq!(poll_timeout(Duration::from_millis(250)), PollTimeout::try_from(250).unwrap());
    }

    #[test]
    fn closed_stream_is_not_registered() {
        let (r, _w) = pipe("t").unwrap();
        r.close().unwrap();
        let mut reactor = Reactor::new();
        reactor.read(r, Box::new(|_| Ok(())), None);
        assert!(reactor.is_empty());
    }

    #[test]
    fn same_descriptor_and_direction_replaces_entry() {
        let (r, _w) = pipe("t").unwrap();
        let mut reactor = Reactor::new();
        reactor.read(Rc::clone(&r), Box::new(|_| Ok(())), None);
        reactor.read(Rc::clone(&r), Box::new(|_| Ok(())), None);
        assert_eq!(reactor.len(), 1);
        reactor.write(r, Box::new(|_| Ok(())), None);
        assert_eq!(reactor.len(), 2);
    }

    #[test]
    fn closing_a_watched_stream_drops_it_on_next_pass() {
        let (r, _w) = pipe("t").unwrap();
        let mut reactor = Reactor::new();
        reactor.read(Rc::clone(&r), Box::new(|_| Ok(())), Some(Rc::new(|| true)));
        assert_eq!(reactor.count(), 1);
        r.close().unwrap();
        assert_eq!(reactor.count(), 0);
    }

    #[test]
    fn gated_watch_waits_for_room_downstream() {
        let (src_r, src_w) = pipe("src").unwrap();
        let (dst_r, dst_w) = pipe("dst").unwrap();
        dst_r.set_nonblocking(true).unwrap();
        dst_w.set_nonblocking(true).unwrap();
        while dst_w.write(&[0u8; 4096]).unwrap() > 0 {}
        src_w.write(b"x").unwrap();

        let fired = Rc::new(Cell::new(0));
        let counter = Rc::clone(&fired);
        let mut reactor = Reactor::new();
        reactor.read(
            Rc::clone(&src_r),
            Box::new(move |_| {
                counter.set(counter.get() + 1);
                Ok(())
            }),
            None,
        );
        assert!(reactor.gate(&src_r, Rc::clone(&dst_w)));
        assert!(!reactor.gate(&dst_r, Rc::clone(&dst_w)));

        assert_eq!(reactor.wait(Duration::from_millis(10)).unwrap(), 1);
        assert_eq!(fired.get(), 0);

        while !dst_r.read_chunk(65536).unwrap().is_empty() {}
        reactor.wait(Duration::from_millis(10)).unwrap();
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn held_bytes_on_a_gate_flush_without_upstream_activity() {
        let (src_r, src_w) = pipe("src").unwrap();
        let (dst_r, dst_w) = pipe("dst").unwrap();
        src_r.set_nonblocking(true).unwrap();
        dst_r.set_nonblocking(true).unwrap();
        dst_w.set_nonblocking(true).unwrap();
        while dst_w.write(&[0u8; 4096]).unwrap() > 0 {}
        src_w.write(&[7u8; 8192]).unwrap();

        let gate = Rc::clone(&dst_w);
        let mut reactor = Reactor::new();
        reactor.read(
            Rc::clone(&src_r),
            Box::new(move |ready| crate::stream::copy(ready, &gate, 8192).map(|_| ())),
            None,
        );
        reactor.gate(&src_r, Rc::clone(&dst_w));

        // One page of room: half the chunk is accepted, half is held.
        assert_eq!(dst_r.read_chunk(4096).unwrap().len(), 4096);
        reactor.wait(Duration::from_millis(10)).unwrap();
        assert!(dst_w.is_holding());
        assert!(!src_r.has_pending_input());

        while !dst_r.read_chunk(65536).unwrap().is_empty() {}
        reactor.wait(Duration::from_millis(1)).unwrap();
        assert!(!dst_w.is_holding());
        assert_eq!(dst_r.read_chunk(65536).unwrap(), vec![7u8; 4096]);
    }

    #[test]
    fn hook_backed_stream_is_not_registered() {
        use crate::endpoint::{Endpoint, Filter};

        let filter = Filter::new(|chunk, _| Ok(chunk.to_vec())).unwrap();
        let mut reactor = Reactor::new();
        reactor.read(filter.input(), Box::new(|_| Ok(())), None);
        assert!(reactor.is_empty());
    }
}
