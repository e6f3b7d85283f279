// src/endpoint/mod.rs

//! Input/output pairs that [`Reactor::pipe`](crate::reactor::Reactor::pipe)
//! can chain.
//!
//! An endpoint is anything with an input stream to write into and an output
//! stream the reactor can poll: a spawned process ([`ProcessEndpoint`]) or
//! an in-process transform ([`Filter`]). Both follow the same protocol, so a
//! pipeline can mix them freely.

use std::rc::Rc;

use crate::errors::Result;
use crate::stream::{COPY_CHUNK, Stream, copy};

pub mod filter;
pub mod process;

pub use filter::Filter;
pub use process::ProcessEndpoint;

pub trait Endpoint {
    /// Where bytes for this endpoint are written.
    fn input(&self) -> Rc<Stream>;

    /// Where this endpoint's results appear.
    fn output(&self) -> Rc<Stream>;

    /// Diagnostic output, if the endpoint has any.
    fn errors(&self) -> Option<Rc<Stream>> {
        None
    }

    /// Copy what `source` has available right now into [`input`](Self::input),
    /// closing the input once `source` reaches end-of-stream. Returns the
    /// output stream.
    fn invoke(&self, source: Option<&Stream>) -> Result<Rc<Stream>> {
        if let Some(source) = source {
            copy(source, &self.input(), COPY_CHUNK)?;
        }
        Ok(self.output())
    }

    /// Flush output that was produced but could not be delivered yet.
    fn pump(&self) -> Result<()> {
        Ok(())
    }
}
