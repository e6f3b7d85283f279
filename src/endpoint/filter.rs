// src/endpoint/filter.rs

//! In-process transform endpoint.
//!
//! Bytes written to the filter's input run through the transform right
//! away; the results go to the write end of an OS pipe whose read end is
//! the filter's output, so the reactor can poll it like a child's stdout.
//!
//! The transform sees one call per write (the chunk that was written) and
//! a last call with an empty chunk and `is_final = true` when the input is
//! closed. Results that do not fit in the pipe wait in a backlog that is
//! retried on every write and every [`pump`](super::Endpoint::pump). While
//! the backlog is non-empty the input reports no room, so upstream stops
//! feeding the filter until its output has been read.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::{debug, warn};

use super::Endpoint;
use crate::errors::{Result, TickpipeError};
use crate::stream::{InputHook, Stream, pipe};

type TransformFn<C> = Box<dyn FnMut(&mut C, &[u8], bool) -> anyhow::Result<Vec<u8>>>;
type DestroyFn<C> = Box<dyn FnOnce(C)>;

struct FilterCore<C> {
    context: Option<C>,
    transform: TransformFn<C>,
    destroy: Option<DestroyFn<C>>,
    writer: Rc<Stream>,
    backlog: Vec<u8>,
    finished: bool,
}

impl<C> FilterCore<C> {
    fn apply(&mut self, chunk: &[u8], is_final: bool) -> Result<()> {
        let Some(context) = self.context.as_mut() else {
            return Ok(());
        };
        let out = (self.transform)(context, chunk, is_final).map_err(TickpipeError::Transform)?;
        self.backlog.extend_from_slice(&out);
        Ok(())
    }

    fn emit(&mut self) -> Result<()> {
        while !self.backlog.is_empty() {
            let n = self.writer.write(&self.backlog)?;
            if n == 0 {
                break;
            }
            self.backlog.drain(..n);
        }

        if !self.writer.is_open() {
            if !self.backlog.is_empty() {
                warn!(bytes = self.backlog.len(), "filter output closed; dropping backlog");
                self.backlog.clear();
            }
        } else if self.finished && self.backlog.is_empty() {
            self.writer.close()?;
        }
        Ok(())
    }

    fn teardown(&mut self) {
        let Some(context) = self.context.take() else {
            return;
        };
        if let Some(destroy) = self.destroy.take() {
            debug!("running filter destroy hook");
            destroy(context);
        }
    }
}

impl<C> InputHook for FilterCore<C> {
    fn write(&mut self, data: &[u8]) -> Result<usize> {
        if self.finished {
            return Ok(0);
        }
        self.apply(data, false)?;
        self.emit()?;
        Ok(data.len())
    }

    fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        let last = self.apply(&[], true);
        self.teardown();
        last?;
        self.emit()
    }

    fn flush(&mut self) -> Result<()> {
        self.emit()
    }

    fn ready(&self) -> bool {
        self.backlog.is_empty()
    }
}

impl<C> Drop for FilterCore<C> {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// An endpoint backed by a byte transform instead of a process.
pub struct Filter {
    input: Rc<Stream>,
    output: Rc<Stream>,
    core: Rc<RefCell<dyn InputHook>>,
}

impl Filter {
    /// Stateless transform: `transform(chunk, is_final)`.
    pub fn new<F>(mut transform: F) -> Result<Rc<Filter>>
    where
        F: FnMut(&[u8], bool) -> anyhow::Result<Vec<u8>> + 'static,
    {
        Self::with_hooks(
            || (),
            move |_: &mut (), chunk: &[u8], is_final: bool| transform(chunk, is_final),
            |()| {},
        )
    }

    /// Transform with a context: `construct` runs now, `destroy` receives
    /// the context exactly once (when the input closes, or on drop).
    pub fn with_hooks<C, K, T, D>(construct: K, transform: T, destroy: D) -> Result<Rc<Filter>>
    where
        C: 'static,
        K: FnOnce() -> C,
        T: FnMut(&mut C, &[u8], bool) -> anyhow::Result<Vec<u8>> + 'static,
        D: FnOnce(C) + 'static,
    {
        let (output, writer) = pipe("filter")?;
        output.set_nonblocking(true)?;
        writer.set_nonblocking(true)?;

        let core: Rc<RefCell<dyn InputHook>> = Rc::new(RefCell::new(FilterCore {
            context: Some(construct()),
            transform: Box::new(transform),
            destroy: Some(Box::new(destroy)),
            writer,
            backlog: Vec::new(),
            finished: false,
        }));
        let input = Stream::from_hook("filter:in", Rc::clone(&core));

        Ok(Rc::new(Filter {
            input,
            output,
            core,
        }))
    }
}

impl Endpoint for Filter {
    fn input(&self) -> Rc<Stream> {
        Rc::clone(&self.input)
    }

    fn output(&self) -> Rc<Stream> {
        Rc::clone(&self.output)
    }

    fn pump(&self) -> Result<()> {
        self.core.borrow_mut().flush()
    }
}
