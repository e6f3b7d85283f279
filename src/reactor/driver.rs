// src/reactor/driver.rs

//! Periodic ticking of reactors.
//!
//! A [`Driver`] holds weak handles to reactors and calls
//! [`Reactor::invoke`] with a zero timeout on each of them per tick. It is
//! the alternative to a caller-owned `while reactor.wait(t)? > 0 {}` loop,
//! for callers that already run a Tokio runtime on the current thread.

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::time::Duration;

use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, trace};

use super::Reactor;
use crate::errors::Result;

#[derive(Default)]
pub struct Driver {
    reactors: Vec<Weak<RefCell<Reactor>>>,
}

impl Driver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `reactor`. Returns `false` if it was already attached.
    pub fn register(&mut self, reactor: &Rc<RefCell<Reactor>>) -> bool {
        if self.is_registered(reactor) {
            return false;
        }
        self.reactors.push(Rc::downgrade(reactor));
        debug!(reactors = self.reactors.len(), "reactor registered");
        true
    }

    /// Detach `reactor`. Returns `false` if it was not attached.
    pub fn unregister(&mut self, reactor: &Rc<RefCell<Reactor>>) -> bool {
        let target = Rc::downgrade(reactor);
        let before = self.reactors.len();
        self.reactors.retain(|r| !Weak::ptr_eq(r, &target));
        let removed = self.reactors.len() != before;
        if removed {
            debug!(reactors = self.reactors.len(), "reactor unregistered");
        }
        removed
    }

    pub fn is_registered(&self, reactor: &Rc<RefCell<Reactor>>) -> bool {
        let target = Rc::downgrade(reactor);
        self.reactors.iter().any(|r| Weak::ptr_eq(r, &target))
    }

    /// Number of attached reactors that are still alive.
    pub fn len(&self) -> usize {
        self.reactors.iter().filter(|r| r.strong_count() > 0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke every live reactor once without blocking.
    ///
    /// Returns the total number of watches left across all reactors.
    /// Reactors that have been dropped are forgotten.
    pub fn tick(&mut self) -> Result<usize> {
        self.reactors.retain(|r| r.strong_count() > 0);

        let mut remaining = 0;
        for reactor in self.reactors.iter().filter_map(Weak::upgrade) {
            remaining += reactor.borrow_mut().invoke(Duration::ZERO)?;
        }
        trace!(remaining, "driver tick");
        Ok(remaining)
    }

    /// Tick every `period` until nothing is left to watch.
    pub async fn run(&mut self, period: Duration) -> Result<()> {
        let mut interval = time::interval(period.max(Duration::from_millis(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            if self.tick()? == 0 {
                debug!("driver idle; stopping");
                return Ok(());
            }
        }
    }
}
