//! Observable state cells
//!
//! A [`StateCell`] holds the latest value of a state (session lifecycle,
//! bias lifecycle) behind a mutex and publishes every transition on a
//! bounded channel. There is exactly one writer per cell — the owner of the
//! state machine — so observers see transitions in write order. Publication
//! is non-blocking: a slow observer loses intermediate transitions, never
//! the current value (`get` always reflects the last write).

use crossbeam_channel::{Receiver, Sender, bounded};
use parking_lot::Mutex;
use std::sync::Arc;

/// Observable single-writer state cell
pub struct StateCell<T: Clone> {
    value: Mutex<T>,
    transitions: Sender<T>,
}

impl<T: Clone> StateCell<T> {
    /// Create a cell with its transition receiver
    pub fn new(initial: T, capacity: usize) -> (Arc<Self>, Receiver<T>) {
        let (tx, rx) = bounded(capacity);
        (
            Arc::new(StateCell {
                value: Mutex::new(initial),
                transitions: tx,
            }),
            rx,
        )
    }

    /// Current value
    pub fn get(&self) -> T {
        self.value.lock().clone()
    }

    /// Store a new value and publish the transition
    pub fn set(&self, value: T) {
        {
            let mut current = self.value.lock();
            *current = value.clone();
        }
        if self.transitions.try_send(value).is_err() {
            log::trace!("State transition channel full, observer missed an update");
        }
    }
}
