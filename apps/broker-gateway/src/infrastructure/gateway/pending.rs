//! Correlation table for in-flight requests.
//!
//! Each outstanding request owns one entry holding a single-assignment
//! `oneshot` slot. Entries are removed exactly once: by the listener when a
//! reply arrives, by `fail_all` when the session drops, or by the
//! [`PendingGuard`] when the awaiting caller gives up (timeout or drop).

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::application::ports::VendorResponse;
use crate::domain::{ClientRef, CorrelationId, RequestKind};
use crate::error::GatewayError;

/// Result delivered to the awaiting caller.
pub type PendingResult = Result<VendorResponse, GatewayError>;

/// One outstanding request.
#[derive(Debug)]
pub struct PendingEntry {
    /// Operation kind.
    pub kind: RequestKind,
    /// When the request was registered.
    pub submitted_at: Instant,
    /// Order the request concerns, for `PlaceOrder`.
    pub client_ref: Option<ClientRef>,
    slot: oneshot::Sender<PendingResult>,
}

impl PendingEntry {
    /// Complete the request. Returns false if the caller already went away.
    pub fn resolve(self, result: PendingResult) -> bool {
        self.slot.send(result).is_ok()
    }
}

/// Correlation table shared by the executor and the session listener.
#[derive(Debug)]
pub struct PendingRequests {
    next_id: AtomicU64,
    entries: Mutex<HashMap<CorrelationId, PendingEntry>>,
}

impl Default for PendingRequests {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingRequests {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate a correlation id and register an entry for it.
    ///
    /// The returned guard evicts the entry when dropped.
    pub fn register(
        self: &Arc<Self>,
        kind: RequestKind,
        client_ref: Option<ClientRef>,
    ) -> (PendingGuard, oneshot::Receiver<PendingResult>) {
        let id = CorrelationId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        let entry = PendingEntry {
            kind,
            submitted_at: Instant::now(),
            client_ref,
            slot: tx,
        };
        self.entries.lock().insert(id, entry);

        let guard = PendingGuard {
            id,
            table: Arc::clone(self),
        };
        (guard, rx)
    }

    /// Remove and return the entry for `id`.
    pub fn take(&self, id: CorrelationId) -> Option<PendingEntry> {
        self.entries.lock().remove(&id)
    }

    /// Returns true if `id` is outstanding.
    #[must_use]
    pub fn contains(&self, id: CorrelationId) -> bool {
        self.entries.lock().contains_key(&id)
    }

    /// Returns true if a `PlaceOrder` for `client_ref` is outstanding.
    #[must_use]
    pub fn has_order_in_flight(&self, client_ref: &ClientRef) -> bool {
        self.entries
            .lock()
            .values()
            .any(|e| e.client_ref.as_ref() == Some(client_ref))
    }

    /// Fail every outstanding request with `error`. Returns how many.
    pub fn fail_all(&self, error: &GatewayError) -> usize {
        let drained: Vec<(CorrelationId, PendingEntry)> = self.entries.lock().drain().collect();
        let count = drained.len();
        for (id, entry) in drained {
            tracing::debug!(
                correlation_id = %id,
                kind = %entry.kind,
                error = %error,
                "Failing in-flight request"
            );
            entry.resolve(Err(error.clone()));
        }
        count
    }

    /// Number of outstanding requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if nothing is outstanding.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Evicts its entry from the table on drop.
#[derive(Debug)]
pub struct PendingGuard {
    id: CorrelationId,
    table: Arc<PendingRequests>,
}

impl PendingGuard {
    /// Correlation id of the guarded request.
    #[must_use]
    pub const fn id(&self) -> CorrelationId {
        self.id
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.table.take(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_and_resolve() {
        let table = Arc::new(PendingRequests::new());
        let (guard, rx) = table.register(RequestKind::AccountQuery, None);
        assert!(table.contains(guard.id()));

        let entry = table.take(guard.id()).unwrap();
        assert!(entry.resolve(Ok(VendorResponse::Positions(Vec::new()))));
        assert_eq!(rx.await.unwrap(), Ok(VendorResponse::Positions(Vec::new())));
        assert!(table.is_empty());
    }

    #[test]
    fn ids_are_unique() {
        let table = Arc::new(PendingRequests::new());
        let (a, _rx_a) = table.register(RequestKind::AccountQuery, None);
        let (b, _rx_b) = table.register(RequestKind::AccountQuery, None);
        assert_ne!(a.id(), b.id());
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn guard_drop_evicts_entry() {
        let table = Arc::new(PendingRequests::new());
        let (guard, _rx) = table.register(RequestKind::MarketQuote, None);
        let id = guard.id();
        drop(guard);
        assert!(!table.contains(id));
        assert!(table.take(id).is_none());
    }

    #[tokio::test]
    async fn fail_all_completes_every_waiter() {
        let table = Arc::new(PendingRequests::new());
        let client_ref = ClientRef::new("c-1");
        let (_g1, rx1) = table.register(RequestKind::PlaceOrder, Some(client_ref.clone()));
        let (_g2, rx2) = table.register(RequestKind::AccountQuery, None);
        assert!(table.has_order_in_flight(&client_ref));

        let error = GatewayError::ConnectionLost {
            reason: "reset".to_string(),
        };
        assert_eq!(table.fail_all(&error), 2);
        assert_eq!(rx1.await.unwrap(), Err(error.clone()));
        assert_eq!(rx2.await.unwrap(), Err(error));
        assert!(!table.has_order_in_flight(&client_ref));
    }
}
