//! Pending-transaction table
//!
//! Correlates control responses with their requests. Each entry is a
//! single-fire completion keyed by `(transaction id, magic)`: the sender
//! thread registers before writing, the reader thread resolves when the
//! matching frame arrives, and teardown fails every waiter with the
//! terminal cause. Waiters are `sync_channel(1)` one-shots, so resolving
//! never blocks the reader.

use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::mpsc::{Receiver, SyncSender, sync_channel};

/// Table key: (normalized transaction id, command magic)
pub type TxKey = (u32, u16);

/// One-shot completion carrying the response payload or the terminal error
pub type Completion = Result<Vec<u8>>;

/// Shared pending-request table
#[derive(Default)]
pub struct PendingTable {
    entries: Mutex<HashMap<TxKey, SyncSender<Completion>>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for `key`.
    ///
    /// Fails with [`Error::TransactionCollision`] when the pair is already
    /// pending; entries are single-use, so a collision means an id was
    /// reused before its predecessor finished.
    pub fn register(&self, key: TxKey) -> Result<Receiver<Completion>> {
        let mut entries = self.entries.lock();
        if entries.contains_key(&key) {
            return Err(Error::TransactionCollision {
                id: key.0,
                magic: key.1,
            });
        }
        let (tx, rx) = sync_channel(1);
        entries.insert(key, tx);
        Ok(rx)
    }

    /// Complete the waiter for `key` with `payload`.
    ///
    /// Returns false (and completes nothing) when the key is unknown —
    /// typically a response that arrived after its request timed out.
    pub fn resolve(&self, key: TxKey, payload: Vec<u8>) -> bool {
        let sender = self.entries.lock().remove(&key);
        match sender {
            Some(sender) => {
                // The waiter may have given up; a dead receiver is fine
                let _ = sender.try_send(Ok(payload));
                true
            }
            None => false,
        }
    }

    /// Drop the registration for `key` without completing it
    pub fn cancel(&self, key: TxKey) {
        self.entries.lock().remove(&key);
    }

    /// Fail every registered waiter with an error from `make_err`.
    ///
    /// New registrations made afterwards are unaffected.
    pub fn fail_all(&self, make_err: &dyn Fn() -> Error) {
        let drained: Vec<_> = {
            let mut entries = self.entries.lock();
            entries.drain().collect()
        };
        for (key, sender) in drained {
            log::debug!("Failing pending transaction {:?}", key);
            let _ = sender.try_send(Err(make_err()));
        }
    }

    /// Number of in-flight transactions
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
