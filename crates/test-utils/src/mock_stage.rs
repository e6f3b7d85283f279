use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use tickpipe::errors::Result;
use tickpipe::reactor::{Reactor, Verify};
use tickpipe::sink::Sink;
use tickpipe::stage::{Capability, State};
use tickpipe::stream::Stream;

/// A stage without descriptors whose state is set by the test.
///
/// - `close(what)` removes the matching bits and is recorded;
/// - `write` accepts everything while `WRITABLE`, up to an optional total
///   capacity, and records it;
/// - `feed` hands a stream to the output sink, as a reactor would.
pub struct MockStage {
    name: String,
    state: Cell<State>,
    closes: RefCell<Vec<State>>,
    written: RefCell<Vec<u8>>,
    capacity: Cell<usize>,
    sink: RefCell<Option<Sink>>,
    journal: Rc<RefCell<Vec<String>>>,
}

impl MockStage {
    pub fn new(name: &str) -> Rc<MockStage> {
        Self::with_journal(name, Rc::new(RefCell::new(Vec::new())))
    }

    /// Like `new`, but every `close` is also appended to `journal` as
    /// `"<name>:<state>"`, so several stages can share one ordered log.
    pub fn with_journal(name: &str, journal: Rc<RefCell<Vec<String>>>) -> Rc<MockStage> {
        Rc::new(MockStage {
            name: name.to_string(),
            state: Cell::new(State::READABLE | State::WRITABLE),
            closes: RefCell::new(Vec::new()),
            written: RefCell::new(Vec::new()),
            capacity: Cell::new(usize::MAX),
            sink: RefCell::new(None),
            journal,
        })
    }

    pub fn set_state(&self, state: State) {
        self.state.set(state);
    }

    /// Accept at most `total` bytes over the stage's lifetime.
    pub fn set_capacity(&self, total: usize) {
        self.capacity.set(total);
    }

    /// Run the output sink on `ready`. A stream sink is not supported.
    pub fn feed(&self, ready: &Stream) -> Result<()> {
        let sink = self.sink.borrow().clone();
        match sink {
            Some(Sink::Callback(f)) => (&mut *f.borrow_mut())(ready),
            Some(Sink::Stream(_)) => panic!("feed only drives callback sinks"),
            None => Ok(()),
        }
    }

    /// Every `close` call so far, in order.
    pub fn closes(&self) -> Vec<State> {
        self.closes.borrow().clone()
    }

    pub fn written(&self) -> Vec<u8> {
        self.written.borrow().clone()
    }

    pub fn has_sink(&self) -> bool {
        self.sink.borrow().is_some()
    }
}

impl Capability for MockStage {
    fn with(&self, _reactor: &mut Reactor, _verify: Option<Verify>) {}

    fn write(&self, data: &[u8]) -> usize {
        if !self.state.get().contains(State::WRITABLE) {
            return 0;
        }
        let mut written = self.written.borrow_mut();
        let room = self.capacity.get().saturating_sub(written.len());
        let accepted = data.len().min(room);
        written.extend_from_slice(&data[..accepted]);
        accepted
    }

    fn read(&self, sink: Sink) -> Result<()> {
        sink.validate()?;
        *self.sink.borrow_mut() = Some(sink);
        Ok(())
    }

    fn error(&self, sink: Sink) -> Result<()> {
        sink.validate()
    }

    fn stat(&self) -> State {
        self.state.get()
    }

    fn close(&self, what: State) {
        self.closes.borrow_mut().push(what);
        self.journal
            .borrow_mut()
            .push(format!("{}:{:?}", self.name, what));
        let remaining = if what.is_closed() {
            State::CLOSED
        } else {
            self.state.get() - what
        };
        self.state.set(remaining);
    }
}

impl fmt::Display for MockStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
