// src/stage/pipe.rs

//! Composition of two stages into one, `producer | consumer`.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::{debug, trace, warn};

use super::{CHUNK_SIZE, Capability, State, stat_verify};
use crate::errors::Result;
use crate::reactor::{Reactor, Verify};
use crate::sink::Sink;
use crate::stream::Stream;

/// Two stages glued together: the producer's output is written to the
/// consumer's input, one chunk per readiness event.
///
/// Forwarding never blocks. Bytes the consumer does not accept are held and
/// offered again before anything more is read from the producer.
///
/// Writing to the pipe writes to the producer; the pipe's output and error
/// output are the consumer's. Pipes nest, so `a | b | c` is
/// `Pipe::new(Pipe::new(a, b)?, c)?`.
pub struct Pipe {
    me: Weak<Pipe>,
    producer: Rc<dyn Capability>,
    consumer: Rc<dyn Capability>,
    held: Rc<RefCell<Vec<u8>>>,
    input_forwarded: Cell<bool>,
}

impl Pipe {
    /// Install a forwarder as the producer's output sink.
    pub fn new(producer: Rc<dyn Capability>, consumer: Rc<dyn Capability>) -> Result<Rc<Pipe>> {
        let held = Rc::new(RefCell::new(Vec::new()));
        let pending = Rc::clone(&held);
        let downstream = Rc::clone(&consumer);
        producer.read(Sink::callback(move |ready| {
            if !offer(&*downstream, &pending) {
                return Ok(());
            }
            let chunk = ready.read_chunk(CHUNK_SIZE)?;
            if chunk.is_empty() {
                return Ok(());
            }
            pending.borrow_mut().extend_from_slice(&chunk);
            offer(&*downstream, &pending);
            Ok(())
        }))?;

        Ok(Rc::new_cyclic(|me| Pipe {
            me: me.clone(),
            producer,
            consumer,
            held,
            input_forwarded: Cell::new(false),
        }))
    }

    pub fn producer(&self) -> &Rc<dyn Capability> {
        &self.producer
    }

    pub fn consumer(&self) -> &Rc<dyn Capability> {
        &self.consumer
    }
}

impl Capability for Pipe {
    fn with(&self, reactor: &mut Reactor, verify: Option<Verify>) {
        let verify = verify.unwrap_or_else(|| stat_verify(self.me.clone()));
        self.producer.with(reactor, Some(Rc::clone(&verify)));
        self.consumer.with(reactor, Some(verify));
        if let (Some(output), Some(input)) = (self.producer.output_stream(), self.consumer.input_stream()) {
            reactor.gate(&output, input);
        }
    }

    fn write(&self, data: &[u8]) -> usize {
        self.producer.write(data)
    }

    fn read(&self, sink: Sink) -> Result<()> {
        self.consumer.read(sink)
    }

    fn error(&self, sink: Sink) -> Result<()> {
        self.consumer.error(sink)
    }

    /// Once the producer stops being readable and nothing is held for the
    /// consumer, the consumer's input is closed (once) and the pipe stays
    /// `READABLE` while the consumer drains. The pipe is `CLOSED` when both
    /// ends are done.
    fn stat(&self) -> State {
        let producer = self.producer.stat();
        let holding = !offer(&*self.consumer, &self.held);

        let state = if producer.contains(State::READABLE) {
            (producer & State::WRITABLE) | (self.consumer.stat() & State::READABLE)
        } else {
            let consumer = self.consumer.stat();
            if holding && consumer.contains(State::WRITABLE) {
                trace!(pipe = %self, held = self.held.borrow().len(), "consumer still taking held bytes");
                State::READABLE
            } else if consumer.contains(State::WRITABLE) && !self.input_forwarded.get() {
                self.input_forwarded.set(true);
                debug!(pipe = %self, "producer finished; closing consumer input");
                self.consumer.close(State::WRITABLE);
                State::READABLE
            } else if consumer.contains(State::READABLE) {
                State::READABLE
            } else {
                self.consumer.close(State::CLOSED);
                State::CLOSED
            }
        };
        trace!(pipe = %self, state = ?state, "pipe stat");
        state
    }

    fn input_stream(&self) -> Option<Rc<Stream>> {
        self.producer.input_stream()
    }

    fn output_stream(&self) -> Option<Rc<Stream>> {
        self.consumer.output_stream()
    }

    /// `WRITABLE` closes the producer's input only. Anything else closes
    /// the consumer first, then the producer.
    fn close(&self, what: State) {
        if what == State::WRITABLE {
            self.producer.close(State::WRITABLE);
            return;
        }
        self.consumer.close(what);
        self.producer.close(what);
    }
}

/// Write held bytes into `consumer`. Returns `true` once nothing is held.
///
/// Held bytes are dropped if the consumer no longer takes input.
fn offer(consumer: &dyn Capability, held: &RefCell<Vec<u8>>) -> bool {
    let mut held = held.borrow_mut();
    if held.is_empty() {
        return true;
    }
    let written = consumer.write(&held).min(held.len());
    held.drain(..written);
    if !held.is_empty() && !consumer.stat().contains(State::WRITABLE) {
        warn!(consumer = %consumer, dropped = held.len(), "consumer input closed; dropping held bytes");
        held.clear();
    }
    held.is_empty()
}

impl fmt::Display for Pipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} | {}", self.producer, self.consumer)
    }
}
