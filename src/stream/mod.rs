// src/stream/mod.rs

//! Shared descriptor handles.
//!
//! A [`Stream`] is what the rest of the crate calls a "descriptor": one end
//! of an OS pipe, a child's stdio, or the input side of an in-process
//! filter. Streams are always handled as `Rc<Stream>` so that a process,
//! the reactor's watch table and a caller-provided sink can all refer to
//! the same descriptor, and closing it from any side is visible to every
//! holder.
//!
//! - reads return at most one chunk and never block on a non-blocking fd;
//! - a read of zero bytes marks the stream as being at end-of-stream;
//! - writes to a closed stream accept nothing instead of failing;
//! - [`copy`] moves one chunk between two streams and forwards EOF. It never
//!   blocks: nothing is read while the destination has no room, and bytes
//!   the destination did not accept are held on it and offered first next
//!   time.

use std::cell::{Cell, Ref, RefCell};
use std::fmt;
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd, OwnedFd, RawFd};
use std::rc::Rc;

use nix::fcntl::{FcntlArg, OFlag, fcntl};
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use tracing::{debug, trace, warn};

use crate::errors::Result;

/// Default number of bytes moved by [`copy`] per call.
pub const COPY_CHUNK: usize = 4096;

/// Write-side hook that replaces an OS descriptor for in-process stages.
///
/// Implemented by the filter endpoint; a stream backed by a hook behaves
/// like the write end of a pipe whose bytes are transformed synchronously.
pub(crate) trait InputHook {
    fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Runs once, when the stream is closed.
    fn finish(&mut self) -> Result<()>;

    /// Push out anything produced earlier but not yet delivered.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    /// Whether a write now would be taken without growing a backlog.
    fn ready(&self) -> bool {
        true
    }
}

enum Inner {
    Fd(File),
    Hook(Rc<RefCell<dyn InputHook>>),
    Closed,
}

/// A shared, closable descriptor with end-of-stream tracking.
pub struct Stream {
    label: String,
    inner: RefCell<Inner>,
    eof: Cell<bool>,
    held: RefCell<Vec<u8>>,
}

impl Stream {
    /// Wrap an owned OS descriptor.
    pub fn from_fd(label: impl Into<String>, fd: impl Into<OwnedFd>) -> Rc<Stream> {
        Rc::new(Stream {
            label: label.into(),
            inner: RefCell::new(Inner::Fd(File::from(fd.into()))),
            eof: Cell::new(false),
            held: RefCell::new(Vec::new()),
        })
    }

    pub(crate) fn from_hook(label: impl Into<String>, hook: Rc<RefCell<dyn InputHook>>) -> Rc<Stream> {
        Rc::new(Stream {
            label: label.into(),
            inner: RefCell::new(Inner::Hook(hook)),
            eof: Cell::new(false),
            held: RefCell::new(Vec::new()),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Raw descriptor number, if this stream is backed by an open fd.
    pub fn raw_fd(&self) -> Option<RawFd> {
        match &*self.inner.borrow() {
            Inner::Fd(file) => Some(file.as_raw_fd()),
            _ => None,
        }
    }

    /// Borrow the underlying file for polling. `None` once closed or for
    /// hook-backed streams.
    pub(crate) fn file(&self) -> Option<Ref<'_, File>> {
        Ref::filter_map(self.inner.borrow(), |inner| match inner {
            Inner::Fd(file) => Some(file),
            _ => None,
        })
        .ok()
    }

    pub fn is_open(&self) -> bool {
        !matches!(&*self.inner.borrow(), Inner::Closed)
    }

    pub fn is_eof(&self) -> bool {
        self.eof.get()
    }

    /// Open and not at end-of-stream: the reactor's default liveness check.
    pub fn is_live(&self) -> bool {
        self.is_open() && !self.is_eof()
    }

    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        let Some(file) = self.file() else {
            return Ok(());
        };

        let mut flags = OFlag::from_bits_truncate(fcntl(file.as_fd(), FcntlArg::F_GETFL)?);
        flags.set(OFlag::O_NONBLOCK, nonblocking);
        fcntl(file.as_fd(), FcntlArg::F_SETFL(flags))?;
        Ok(())
    }

    /// Whether a read would return immediately (data or EOF pending).
    pub fn has_pending_input(&self) -> bool {
        let Some(file) = self.file() else {
            return false;
        };
        let mut fds = [PollFd::new(file.as_fd(), PollFlags::POLLIN)];
        matches!(poll(&mut fds, PollTimeout::ZERO), Ok(n) if n > 0)
    }

    /// Whether a write of fresh bytes would make progress right now.
    ///
    /// False while bytes are held from an earlier [`copy`].
    pub fn is_writable(&self) -> bool {
        !self.is_holding() && self.has_room()
    }

    /// Whether the descriptor itself can take a write, ignoring held bytes.
    ///
    /// A closed stream counts as having room: writes return at once,
    /// accepting nothing.
    pub fn has_room(&self) -> bool {
        match &*self.inner.borrow() {
            Inner::Closed => true,
            Inner::Hook(hook) => hook.borrow().ready(),
            Inner::Fd(file) => {
                let mut fds = [PollFd::new(file.as_fd(), PollFlags::POLLOUT)];
                matches!(poll(&mut fds, PollTimeout::ZERO), Ok(n) if n > 0)
            }
        }
    }

    /// Bytes read by [`copy`] that this stream has not accepted yet.
    pub fn is_holding(&self) -> bool {
        !self.held.borrow().is_empty()
    }

    /// Offer held bytes again. Returns `true` once nothing is held.
    pub fn flush_held(&self) -> Result<bool> {
        let held = self.held.take();
        if held.is_empty() {
            return Ok(true);
        }
        let written = self.write(&held)?;
        if written < held.len() && self.is_open() {
            self.held.borrow_mut().extend_from_slice(&held[written..]);
            return Ok(false);
        }
        trace!(stream = %self.label, bytes = written, "held bytes delivered");
        Ok(true)
    }

    /// Read at most `max` bytes.
    ///
    /// An empty result means either "nothing available right now" or
    /// end-of-stream; check [`is_eof`](Self::is_eof) to tell them apart.
    pub fn read_chunk(&self, max: usize) -> Result<Vec<u8>> {
        if max == 0 {
            return Ok(Vec::new());
        }
        let mut inner = self.inner.borrow_mut();
        let Inner::Fd(file) = &mut *inner else {
            return Ok(Vec::new());
        };

        let mut buf = vec![0u8; max];
        loop {
            match file.read(&mut buf) {
                Ok(0) => {
                    trace!(stream = %self.label, "end of stream");
                    self.eof.set(true);
                    return Ok(Vec::new());
                }
                Ok(n) => {
                    buf.truncate(n);
                    return Ok(buf);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Vec::new()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Write as much of `data` as the stream accepts right now.
    ///
    /// A closed stream accepts nothing. A broken pipe closes the stream.
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        let hook = {
            let mut inner = self.inner.borrow_mut();
            match &mut *inner {
                Inner::Closed => return Ok(0),
                Inner::Hook(hook) => Rc::clone(hook),
                Inner::Fd(file) => loop {
                    match file.write(data) {
                        Ok(n) => return Ok(n),
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(0),
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                            debug!(stream = %self.label, "broken pipe; closing stream");
                            *inner = Inner::Closed;
                            return Ok(0);
                        }
                        Err(e) => return Err(e.into()),
                    }
                },
            }
        };
        let written = hook.borrow_mut().write(data)?;
        Ok(written)
    }

    /// Write all of `data`, waiting for room if the descriptor is
    /// non-blocking. Stops early (returning the partial count) if the
    /// stream closes underneath.
    ///
    /// Blocks the calling thread: meant for callers that own the reading
    /// end, never for reactor callbacks.
    pub fn write_all(&self, data: &[u8]) -> Result<usize> {
        let mut written = 0;
        while written < data.len() {
            let n = self.write(&data[written..])?;
            if n == 0 {
                if !self.is_open() {
                    break;
                }
                self.wait_writable();
                continue;
            }
            written += n;
        }
        Ok(written)
    }

    fn wait_writable(&self) {
        if let Some(file) = self.file() {
            let mut fds = [PollFd::new(file.as_fd(), PollFlags::POLLOUT)];
            let _ = poll(&mut fds, PollTimeout::NONE);
        }
    }

    /// Close the stream. Idempotent.
    ///
    /// Closing a hook-backed stream runs the hook's final step.
    pub fn close(&self) -> Result<()> {
        let held = self.held.take();
        if !held.is_empty() {
            warn!(stream = %self.label, bytes = held.len(), "closing with undelivered bytes");
        }
        let previous = std::mem::replace(&mut *self.inner.borrow_mut(), Inner::Closed);
        match previous {
            Inner::Fd(file) => {
                debug!(stream = %self.label, fd = file.as_raw_fd(), "stream closed");
                drop(file);
                Ok(())
            }
            Inner::Hook(hook) => {
                debug!(stream = %self.label, "stream closed");
                hook.borrow_mut().finish()
            }
            Inner::Closed => Ok(()),
        }
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.raw_fd() {
            Some(fd) => write!(f, "{}#{}", self.label, fd),
            None => write!(f, "{}", self.label),
        }
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("label", &self.label)
            .field("fd", &self.raw_fd())
            .field("open", &self.is_open())
            .field("eof", &self.is_eof())
            .finish()
    }
}

/// Create an OS pipe, returning `(reader, writer)`.
pub fn pipe(label: &str) -> Result<(Rc<Stream>, Rc<Stream>)> {
    let (reader, writer) = nix::unistd::pipe()?;
    Ok((
        Stream::from_fd(format!("{label}:r"), reader),
        Stream::from_fd(format!("{label}:w"), writer),
    ))
}

/// Move at most `max` bytes from `from` to `to` without blocking.
///
/// Held bytes on `to` are offered first; while any remain, or while `to`
/// has no room, nothing is read from `from`. Whatever `to` does not accept
/// is held on it. On an empty read at end-of-stream, `to` is closed so the
/// EOF propagates. Returns the number of bytes read, `None` if none were.
pub fn copy(from: &Stream, to: &Stream, max: usize) -> Result<Option<usize>> {
    if !to.flush_held()? || !to.is_writable() {
        return Ok(None);
    }
    let data = from.read_chunk(max)?;
    if data.is_empty() {
        if from.is_eof() {
            to.close()?;
        }
        return Ok(None);
    }

    let written = to.write(&data)?;
    if written < data.len() && to.is_open() {
        trace!(stream = %to.label, bytes = data.len() - written, "holding bytes");
        to.held.borrow_mut().extend_from_slice(&data[written..]);
    }
    Ok(Some(data.len()))
}
