use std::collections::HashMap;
use std::sync::Arc;

use tablebot_contracts::Actor;
use tablebot_kernel::{LedgerBook, SessionState};
use tokio::sync::Mutex;

/// Per-actor slots. The map lock is held only to find or create a slot, so
/// work on one actor never waits on another.
struct SlotMap<T> {
    slots: Mutex<HashMap<Actor, Arc<Mutex<T>>>>,
}

impl<T: Default> SlotMap<T> {
    fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    async fn slot(&self, actor: &Actor) -> Arc<Mutex<T>> {
        let mut slots = self.slots.lock().await;
        slots.entry(actor.clone()).or_default().clone()
    }
}

pub struct SessionStore {
    inner: SlotMap<SessionState>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            inner: SlotMap::new(),
        }
    }

    /// Session for `actor`, created on first use.
    pub async fn slot(&self, actor: &Actor) -> Arc<Mutex<SessionState>> {
        self.inner.slot(actor).await
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Append-only books, one per actor. Entries are only ever added through
/// the locked [`LedgerBook`].
pub struct LedgerStore {
    inner: SlotMap<LedgerBook>,
}

impl LedgerStore {
    pub fn new() -> Self {
        Self {
            inner: SlotMap::new(),
        }
    }

    pub async fn slot(&self, actor: &Actor) -> Arc<Mutex<LedgerBook>> {
        self.inner.slot(actor).await
    }
}

impl Default for LedgerStore {
    fn default() -> Self {
        Self::new()
    }
}
