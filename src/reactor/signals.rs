// src/reactor/signals.rs

//! Signal handlers run synchronously from [`Reactor::dispatch`].
//!
//! The OS-level handler only records the signal (`signal-hook`'s self-pipe);
//! user actions run later, on the reactor's thread, when the reactor is
//! pumped.
//!
//! [`Reactor::dispatch`]: super::Reactor::dispatch

use std::collections::HashMap;
use std::io;

use signal_hook::consts::FORBIDDEN;
use signal_hook::iterator::Signals;
use tracing::{debug, warn};

use crate::errors::{Result, TickpipeError};

pub(crate) type Action = Box<dyn FnMut(i32)>;

#[derive(Default)]
pub(crate) struct SignalTable {
    signals: Option<Signals>,
    actions: HashMap<i32, Action>,
}

impl SignalTable {
    /// Install `action` for `signal`, replacing any previous action.
    pub(crate) fn on(&mut self, signal: i32, action: Action) -> Result<()> {
        if FORBIDDEN.contains(&signal) {
            return Err(TickpipeError::Signal {
                signal,
                source: io::Error::new(io::ErrorKind::InvalidInput, "signal cannot be handled"),
            });
        }

        let signals = match self.signals.take() {
            Some(signals) => signals,
            None => Signals::new(std::iter::empty::<i32>())
                .map_err(|source| TickpipeError::Signal { signal, source })?,
        };
        let signals = self.signals.insert(signals);
        signals
            .add_signal(signal)
            .map_err(|source| TickpipeError::Signal { signal, source })?;

        debug!(signal, "signal handler installed");
        self.actions.insert(signal, action);
        Ok(())
    }

    /// Run the action of every signal received since the last call.
    pub(crate) fn dispatch(&mut self) -> usize {
        let Some(signals) = self.signals.as_mut() else {
            return 0;
        };
        let pending: Vec<i32> = signals.pending().collect();

        let mut ran = 0;
        for signal in pending {
            match self.actions.get_mut(&signal) {
                Some(action) => {
                    debug!(signal, "dispatching signal");
                    action(signal);
                    ran += 1;
                }
                None => warn!(signal, "signal received without a handler"),
            }
        }
        ran
    }
}
