// src/stage/mod.rs

//! Pipeline stages and the contract they share.
//!
//! Every stage (a spawned [`Process`], a composed [`Pipe`]) implements
//! [`Capability`]. Stages are shared as `Rc<dyn Capability>` so a pipe can
//! hold its legs while the reactor's callbacks keep them reachable.
//!
//! State is never stored: [`Capability::stat`] recomputes it on every call,
//! and is the only place where a dead stage gets finalized.

use std::fmt;
use std::rc::{Rc, Weak};

use bitflags::bitflags;

use crate::errors::Result;
use crate::reactor::{Reactor, Verify};
use crate::sink::Sink;
use crate::stream::Stream;

pub mod pipe;
pub mod process;

pub use pipe::Pipe;
pub use process::Process;

/// Bytes moved per readiness event between stages.
pub const CHUNK_SIZE: usize = 8192;

bitflags! {
    /// Liveness bitmask of a stage. The empty set is [`State::CLOSED`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct State: u8 {
        const READABLE = 1;
        const WRITABLE = 2;
    }
}

impl State {
    pub const CLOSED: State = State::empty();

    pub fn is_closed(self) -> bool {
        self.is_empty()
    }
}

/// Operations shared by all pipeline stages.
pub trait Capability: fmt::Display {
    /// Register this stage's descriptors with `reactor`.
    ///
    /// Every registration uses `verify` as its liveness predicate, or this
    /// stage's own `stat()` ("not closed") when `None`. Calling it again
    /// replaces the previous registrations.
    fn with(&self, reactor: &mut Reactor, verify: Option<Verify>);

    /// Push bytes into the input side; returns how many were accepted.
    fn write(&self, data: &[u8]) -> usize;

    /// Where output goes.
    fn read(&self, sink: Sink) -> Result<()>;

    /// Where error output goes.
    fn error(&self, sink: Sink) -> Result<()>;

    fn stat(&self) -> State;

    /// `WRITABLE` closes the input side, `READABLE` the output and error
    /// sides, `CLOSED` everything. Closing a closed side is a no-op.
    fn close(&self, what: State);

    /// Descriptor behind the input side, if the stage has one.
    fn input_stream(&self) -> Option<Rc<Stream>> {
        None
    }

    /// Descriptor the reactor reads output from, if the stage has one.
    fn output_stream(&self) -> Option<Rc<Stream>> {
        None
    }
}

/// Liveness predicate backed by a stage's own `stat()`.
///
/// Holds the stage weakly, so a stage that has been dropped stops being
/// watched.
pub fn stat_verify<C>(stage: Weak<C>) -> Verify
where
    C: Capability + 'static,
{
    Rc::new(move || stage.upgrade().is_some_and(|stage| !stage.stat().is_closed()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_is_empty_mask() {
        assert_eq!(State::CLOSED.bits(), 0);
        assert_eq!(State::READABLE.bits(), 1);
        assert_eq!(State::WRITABLE.bits(), 2);
        assert!(State::CLOSED.is_closed());
        assert!(!(State::READABLE | State::WRITABLE).is_closed());
    }

    #[test]
    fn masks_combine() {
        let both = State::READABLE | State::WRITABLE;
        assert_eq!(both & State::WRITABLE, State::WRITABLE);
        assert_eq!(State::READABLE & State::WRITABLE, State::CLOSED);
    }
}
