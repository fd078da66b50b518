//! Per-conversation cancellation handles for outstanding agent calls.
//!
//! At most one handle is live per conversation id. Registering again replaces
//! the previous handle without cancelling it; the older call keeps running but
//! can no longer be reached through the registry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use assist_core::CancellationHandle;

#[derive(Debug)]
struct RegistryEntry {
    generation: u64,
    handle: CancellationHandle,
}

#[derive(Debug, Default)]
struct RegistryState {
    next_generation: u64,
    entries: HashMap<String, RegistryEntry>,
}

/// Shared map from conversation id to the handle of its outstanding call.
///
/// Clones share the same map. Every operation takes the lock once, so
/// register/cancel/release are atomic per key.
#[derive(Debug, Clone, Default)]
pub struct CancellationRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a fresh handle for `conversation_id`, replacing any previous one.
    pub fn register(&self, conversation_id: impl Into<String>) -> CancellationRegistration {
        let conversation_id = conversation_id.into();
        let handle = CancellationHandle::new();
        let mut state = lock_or_recover(&self.state);
        state.next_generation = state.next_generation.wrapping_add(1);
        let generation = state.next_generation;
        let replaced = state.entries.insert(
            conversation_id.clone(),
            RegistryEntry {
                generation,
                handle: handle.clone(),
            },
        );
        drop(state);
        if replaced.is_some() {
            tracing::debug!(
                conversation_id = %conversation_id,
                "replaced outstanding cancellation handle"
            );
        }
        CancellationRegistration {
            registry: self.clone(),
            conversation_id,
            generation,
            handle,
            released: false,
        }
    }

    /// Fires the handle registered for `conversation_id`, if any.
    ///
    /// The entry stays registered until the call that owns it releases it.
    pub fn cancel(&self, conversation_id: &str) -> bool {
        let state = lock_or_recover(&self.state);
        match state.entries.get(conversation_id) {
            Some(entry) => {
                entry.handle.cancel();
                true
            }
            None => false,
        }
    }

    /// Removes whatever handle is registered for `conversation_id`.
    pub fn release(&self, conversation_id: &str) -> bool {
        lock_or_recover(&self.state)
            .entries
            .remove(conversation_id)
            .is_some()
    }

    /// Removes the entry only if it still belongs to `registration`.
    pub fn release_registration(&self, registration: &CancellationRegistration) -> bool {
        self.release_generation(&registration.conversation_id, registration.generation)
    }

    fn release_generation(&self, conversation_id: &str, generation: u64) -> bool {
        let mut state = lock_or_recover(&self.state);
        let owned = state
            .entries
            .get(conversation_id)
            .is_some_and(|entry| entry.generation == generation);
        if owned {
            state.entries.remove(conversation_id);
        }
        owned
    }

    pub fn is_registered(&self, conversation_id: &str) -> bool {
        lock_or_recover(&self.state)
            .entries
            .contains_key(conversation_id)
    }

    pub fn len(&self) -> usize {
        lock_or_recover(&self.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Owned registry entry for one call. Dropping it releases the entry unless a
/// newer registration for the same conversation has replaced it.
#[derive(Debug)]
pub struct CancellationRegistration {
    registry: CancellationRegistry,
    conversation_id: String,
    generation: u64,
    handle: CancellationHandle,
    released: bool,
}

impl CancellationRegistration {
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn handle(&self) -> &CancellationHandle {
        &self.handle
    }

    pub fn is_cancelled(&self) -> bool {
        self.handle.is_cancelled()
    }

    /// Releases the entry now; returns whether this registration still owned it.
    pub fn release(mut self) -> bool {
        self.released = true;
        self.registry
            .release_generation(&self.conversation_id, self.generation)
    }
}

impl Drop for CancellationRegistration {
    fn drop(&mut self) {
        if !self.released {
            self.registry
                .release_generation(&self.conversation_id, self.generation);
        }
    }
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
