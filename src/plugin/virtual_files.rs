//! Virtual module table.
//!
//! Holds modules that exist only in memory: files the compiler materializes
//! for a template (e.g. its extracted styles) and documents the orchestrator
//! synthesizes itself. In dev, an entry whose owner is being recompiled is
//! swapped for a pending placeholder; loads of that id wait until the owner
//! registers it again.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::watch;

use crate::options::PendingPolicy;
use crate::LinkError;

/// Content of a virtual module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualFile {
    pub code: String,
    pub map: Option<String>,
}

impl VirtualFile {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            map: None,
        }
    }

    pub fn with_map(mut self, map: Option<String>) -> Self {
        self.map = map;
        self
    }
}

/// Handle on a virtual module that is waiting for its owner to recompile.
#[derive(Debug, Clone)]
pub struct PendingVirtualFile {
    id: String,
    rx: watch::Receiver<Option<VirtualFile>>,
}

impl PendingVirtualFile {
    /// Content, if the placeholder has been fulfilled already.
    pub fn try_get(&self) -> Option<VirtualFile> {
        self.rx.borrow().clone()
    }

    /// Wait for the owner to re-register the module.
    ///
    /// Fails with [`LinkError::PendingAbandoned`] when the placeholder is
    /// dropped unfulfilled, and with [`LinkError::PendingTimeout`] when the
    /// policy's deadline passes first.
    pub async fn wait(mut self, policy: PendingPolicy) -> Result<VirtualFile, LinkError> {
        let id = self.id.clone();
        let fulfilled = async {
            let value = self
                .rx
                .wait_for(Option::is_some)
                .await
                .map_err(|_| LinkError::PendingAbandoned { id: id.clone() })?;
            value
                .clone()
                .ok_or_else(|| LinkError::PendingAbandoned { id: id.clone() })
        };

        match policy {
            PendingPolicy::WaitForever => fulfilled.await,
            PendingPolicy::Timeout(deadline) => tokio::time::timeout(deadline, fulfilled)
                .await
                .map_err(|_| LinkError::PendingTimeout { id: id.clone() })?,
        }
    }
}

/// What [`VirtualModuleTable::get`] finds.
#[derive(Debug, Clone)]
pub enum VirtualEntry {
    Ready(VirtualFile),
    Pending(PendingVirtualFile),
}

/// Outcome of [`VirtualModuleTable::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Inserted,
    /// Same content was already registered; nothing changed.
    Unchanged,
    Replaced,
    /// A pending placeholder was fulfilled and its waiters woken.
    Fulfilled,
}

#[derive(Debug)]
enum Slot {
    Ready(VirtualFile),
    Pending(watch::Sender<Option<VirtualFile>>),
}

#[derive(Debug, Default)]
struct TableState {
    slots: HashMap<String, Slot>,
    /// Owner path → ids it registered.
    owners: HashMap<String, BTreeSet<String>>,
}

/// Thread-safe virtual module table, shared by cloning.
#[derive(Debug, Clone, Default)]
pub struct VirtualModuleTable {
    inner: Arc<RwLock<TableState>>,
}

impl VirtualModuleTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, TableState> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, TableState> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register content for `id`, fulfilling a pending placeholder if there
    /// is one.
    pub fn register(&self, id: &str, file: VirtualFile) -> RegisterOutcome {
        let mut state = self.write();
        Self::register_locked(&mut state, id, file)
    }

    /// Register content for `id` on behalf of the module at `owner`.
    pub fn register_owned(&self, owner: &str, id: &str, file: VirtualFile) -> RegisterOutcome {
        let mut state = self.write();
        state
            .owners
            .entry(owner.to_string())
            .or_default()
            .insert(id.to_string());
        Self::register_locked(&mut state, id, file)
    }

    fn register_locked(state: &mut TableState, id: &str, file: VirtualFile) -> RegisterOutcome {
        match state.slots.get(id) {
            Some(Slot::Ready(existing)) if *existing == file => RegisterOutcome::Unchanged,
            Some(Slot::Ready(_)) => {
                state.slots.insert(id.to_string(), Slot::Ready(file));
                RegisterOutcome::Replaced
            }
            Some(Slot::Pending(tx)) => {
                tx.send_replace(Some(file.clone()));
                state.slots.insert(id.to_string(), Slot::Ready(file));
                tracing::trace!(id, "fulfilled pending virtual module");
                RegisterOutcome::Fulfilled
            }
            None => {
                state.slots.insert(id.to_string(), Slot::Ready(file));
                RegisterOutcome::Inserted
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<VirtualEntry> {
        match self.read().slots.get(id)? {
            Slot::Ready(file) => Some(VirtualEntry::Ready(file.clone())),
            Slot::Pending(tx) => Some(VirtualEntry::Pending(PendingVirtualFile {
                id: id.to_string(),
                rx: tx.subscribe(),
            })),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read().slots.contains_key(id)
    }

    pub fn is_pending(&self, id: &str) -> bool {
        matches!(self.read().slots.get(id), Some(Slot::Pending(_)))
    }

    /// Swap a ready entry for a pending placeholder. Returns a handle that
    /// completes when the entry is registered again, or `None` if `id` is
    /// unknown.
    pub fn invalidate(&self, id: &str) -> Option<PendingVirtualFile> {
        let mut state = self.write();
        Self::invalidate_locked(&mut state, id)
    }

    fn invalidate_locked(state: &mut TableState, id: &str) -> Option<PendingVirtualFile> {
        let rx = match state.slots.get(id)? {
            Slot::Pending(tx) => tx.subscribe(),
            Slot::Ready(_) => {
                let (tx, rx) = watch::channel(None);
                state.slots.insert(id.to_string(), Slot::Pending(tx));
                rx
            }
        };
        Some(PendingVirtualFile {
            id: id.to_string(),
            rx,
        })
    }

    /// Swap every id registered by `owner` to pending, under one lock.
    pub fn invalidate_owner(&self, owner: &str) -> Vec<String> {
        let mut state = self.write();
        let ids: Vec<String> = state
            .owners
            .get(owner)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();
        for id in &ids {
            Self::invalidate_locked(&mut state, id);
        }
        ids
    }

    /// Swap every owned id to pending. Used on structural changes.
    pub fn invalidate_all_owned(&self) -> Vec<String> {
        let mut state = self.write();
        let ids: BTreeSet<String> = state.owners.values().flatten().cloned().collect();
        for id in &ids {
            Self::invalidate_locked(&mut state, id);
        }
        ids.into_iter().collect()
    }

    /// Remove everything `owner` registered. Waiters on its pending ids fail
    /// with [`LinkError::PendingAbandoned`].
    pub fn abandon_owner(&self, owner: &str) -> Vec<String> {
        let mut state = self.write();
        let ids: Vec<String> = state
            .owners
            .remove(owner)
            .map(|ids| ids.into_iter().collect())
            .unwrap_or_default();
        for id in &ids {
            state.slots.remove(id);
        }
        ids
    }

    /// Drop ids of `owner` that are still pending but were not registered
    /// again by its latest compile. Waiters fail with
    /// [`LinkError::PendingAbandoned`].
    pub fn retire_pending(&self, owner: &str, registered: &BTreeSet<String>) -> Vec<String> {
        let mut state = self.write();
        let TableState { slots, owners } = &mut *state;
        let Some(ids) = owners.get_mut(owner) else {
            return Vec::new();
        };

        let stale: Vec<String> = ids
            .iter()
            .filter(|id| !registered.contains(*id))
            .filter(|id| matches!(slots.get(*id), Some(Slot::Pending(_))))
            .cloned()
            .collect();
        for id in &stale {
            ids.remove(id);
            slots.remove(id);
        }
        if ids.is_empty() {
            owners.remove(owner);
        }
        stale
    }

    /// Ids registered by `owner`.
    pub fn owned_by(&self, owner: &str) -> Vec<String> {
        self.read()
            .owners
            .get(owner)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop every entry. Pending waiters are abandoned.
    pub fn clear(&self) {
        let mut state = self.write();
        state.slots.clear();
        state.owners.clear();
    }

    pub fn len(&self) -> usize {
        self.read().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
