// src/sink.rs

//! Where a stage's output goes.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::errors::{Result, TickpipeError};
use crate::stream::{Stream, copy};

/// Callback invoked with a stream that is ready to be read.
pub type SinkFn = dyn FnMut(&Stream) -> Result<()>;

/// Destination for a stage's output or error output.
///
/// - `Stream`: bytes are forwarded verbatim; end-of-stream on the source
///   closes the destination.
/// - `Callback`: invoked with the ready source stream; the callback decides
///   what to read, if anything.
#[derive(Clone)]
pub enum Sink {
    Stream(Rc<Stream>),
    Callback(Rc<RefCell<SinkFn>>),
}

impl Sink {
    pub fn callback<F>(f: F) -> Self
    where
        F: FnMut(&Stream) -> Result<()> + 'static,
    {
        Sink::Callback(Rc::new(RefCell::new(f)))
    }

    /// Reject stream sinks that are already closed.
    pub fn validate(&self) -> Result<()> {
        match self {
            Sink::Stream(stream) if !stream.is_open() => Err(TickpipeError::InvalidSink(format!(
                "stream '{}' is already closed",
                stream.label()
            ))),
            _ => Ok(()),
        }
    }

    /// Hand the ready `source` to this sink, moving at most `chunk` bytes
    /// for stream sinks.
    pub(crate) fn deliver(&self, source: &Stream, chunk: usize) -> Result<()> {
        match self {
            Sink::Stream(dest) => copy(source, dest, chunk).map(|_| ()),
            Sink::Callback(f) => (&mut *f.borrow_mut())(source),
        }
    }

    /// Close the destination if it is a stream; callbacks are left alone.
    pub(crate) fn close_stream(&self) -> Result<()> {
        match self {
            Sink::Stream(dest) => dest.close(),
            Sink::Callback(_) => Ok(()),
        }
    }
}

impl From<Rc<Stream>> for Sink {
    fn from(stream: Rc<Stream>) -> Self {
        Sink::Stream(stream)
    }
}

impl fmt::Debug for Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sink::Stream(stream) => f.debug_tuple("Stream").field(stream).finish(),
            Sink::Callback(_) => f.write_str("Callback"),
        }
    }
}
