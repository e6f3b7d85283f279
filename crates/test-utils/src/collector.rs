use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tickpipe::sink::Sink;

/// In-memory sink: remembers every byte it was handed and whether the
/// source reached end-of-stream.
#[derive(Clone, Default)]
pub struct Collector {
    data: Rc<RefCell<Vec<u8>>>,
    eof: Rc<Cell<bool>>,
}

impl Collector {
    pub fn new() -> Self {
        Self::default()
    }

    /// A callback sink feeding this collector.
    pub fn sink(&self) -> Sink {
        let data = Rc::clone(&self.data);
        let eof = Rc::clone(&self.eof);
        Sink::callback(move |ready| {
            let chunk = ready.read_chunk(8192)?;
            if chunk.is_empty() {
                if ready.is_eof() {
                    eof.set(true);
                }
            } else {
                data.borrow_mut().extend_from_slice(&chunk);
            }
            Ok(())
        })
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.data.borrow().clone()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data.borrow()).into_owned()
    }

    pub fn saw_eof(&self) -> bool {
        self.eof.get()
    }
}
