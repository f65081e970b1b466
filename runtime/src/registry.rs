//! Callback registry: the keyed completion channel.
//!
//! Every live request registers the callback name its remote script will
//! call. The name maps to a [`CompletionSlot`]; invoking the callback deposits
//! the payload there, and the request's element handler takes it out when the
//! element signals completion. Requests that share a callback name (an
//! explicit name, or a fixed-convention endpoint) share the slot; requests
//! with auto-generated names each get their own.

use jsonp_core::Value;
use jsonp_core::environment::GlobalScope;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Single-value mailbox written by a callback and read by an element handler
#[derive(Debug, Default)]
pub struct CompletionSlot {
    value: Mutex<Option<Value>>,
}

impl CompletionSlot {
    /// Store a payload, replacing any unread one
    pub fn deposit(&self, payload: Value) {
        *self.value.lock().unwrap_or_else(PoisonError::into_inner) = Some(payload);
    }

    /// Read and clear the slot
    pub fn take(&self) -> Option<Value> {
        self.value
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Whether a payload is waiting
    #[must_use]
    pub fn is_filled(&self) -> bool {
        self.value
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

#[derive(Debug)]
struct Registration {
    slot: Arc<CompletionSlot>,
    holders: usize,
}

/// Process-wide mapping from callback name to completion slot
///
/// Also owns the sequence that numbers elements and unique callback names.
#[derive(Debug, Default)]
pub struct CallbackRegistry {
    entries: Mutex<HashMap<String, Registration>>,
    sequence: AtomicU64,
}

impl CallbackRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Next value of the monotonically increasing sequence
    pub fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    /// Register interest in `name` and get its slot
    ///
    /// Each call must be paired with one [`release`](Self::release).
    pub fn register(&self, name: &str) -> Arc<CompletionSlot> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let registration = entries
            .entry(name.to_string())
            .or_insert_with(|| Registration {
                slot: Arc::new(CompletionSlot::default()),
                holders: 0,
            });
        registration.holders += 1;

        if registration.holders > 1 {
            tracing::debug!(
                callback = name,
                holders = registration.holders,
                "Callback name shared by concurrent requests"
            );
        }

        Arc::clone(&registration.slot)
    }

    /// Drop one registration of `name`; the slot goes away with the last one
    pub fn release(&self, name: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(registration) = entries.get_mut(name) {
            registration.holders = registration.holders.saturating_sub(1);
            if registration.holders == 0 {
                entries.remove(name);
            }
        }
    }

    /// Whether `name` currently has a slot
    #[must_use]
    pub fn is_registered(&self, name: &str) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Number of registered callback names
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no callback is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl GlobalScope for CallbackRegistry {
    fn invoke(&self, name: &str, payload: Value) -> bool {
        let slot = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(|registration| Arc::clone(&registration.slot));

        match slot {
            Some(slot) => {
                slot.deposit(payload);
                tracing::trace!(callback = name, "Callback invoked");
                true
            },
            None => {
                tracing::warn!(callback = name, "Callback invoked but nothing is registered under it");
                false
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn invoke_deposits_into_registered_slot() {
        let registry = CallbackRegistry::new();
        let slot = registry.register("_jsonp0");

        assert!(!slot.is_filled());
        assert!(registry.invoke("_jsonp0", json!({"a": 1})));
        assert!(slot.is_filled());
        assert_eq!(slot.take(), Some(json!({"a": 1})));
        assert!(!slot.is_filled());
        assert_eq!(slot.take(), None);
    }

    #[test]
    fn invoke_unknown_name_is_rejected() {
        let registry = CallbackRegistry::new();
        assert!(!registry.invoke("missing", json!(1)));
    }

    #[test]
    fn shared_names_share_a_slot_until_last_release() {
        let registry = CallbackRegistry::new();
        let first = registry.register("feed");
        let second = registry.register("feed");
        assert!(Arc::ptr_eq(&first, &second));

        registry.release("feed");
        assert!(registry.is_registered("feed"));
        registry.release("feed");
        assert!(!registry.is_registered("feed"));
        assert!(registry.is_empty());
    }

    #[test]
    fn distinct_names_do_not_cross_talk() {
        let registry = CallbackRegistry::new();
        let a = registry.register("_jsonp1");
        let b = registry.register("_jsonp2");

        registry.invoke("_jsonp2", json!("b"));
        registry.invoke("_jsonp1", json!("a"));

        assert_eq!(a.take(), Some(json!("a")));
        assert_eq!(b.take(), Some(json!("b")));
    }

    #[test]
    fn sequence_is_monotonic() {
        let registry = CallbackRegistry::new();
        let first = registry.next_sequence();
        assert!(registry.next_sequence() > first);
    }
}
