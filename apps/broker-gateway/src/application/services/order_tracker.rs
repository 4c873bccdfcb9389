//! Order tracking service.
//!
//! Authoritative in-memory view of orders placed through the gateway. The
//! session listener is the only writer for vendor events; any number of
//! readers receive snapshot clones.
//!
//! Terminal orders leave the active set and move to a bounded recent-history
//! buffer so status queries keep working for a while after completion.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::time::Instant;

use crate::domain::{
    ClientRef, Order, OrderId, OrderLookup, OrderSpec, OrderStatus, OrderStatusReport,
    OrderUpdate, Transition,
};

/// Order tracker configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderTrackerConfig {
    /// Maximum terminal orders kept for status queries.
    pub history_capacity: usize,
    /// How long a terminal order is kept.
    pub history_retention: Duration,
}

impl Default for OrderTrackerConfig {
    fn default() -> Self {
        Self {
            history_capacity: 500,
            history_retention: Duration::from_secs(3600),
        }
    }
}

/// Outcome of applying a vendor order event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Order state changed.
    Applied {
        /// Status before.
        from: OrderStatus,
        /// Status after.
        to: OrderStatus,
    },
    /// Re-delivery of the current state.
    Duplicate,
    /// Event would move the order backward.
    Stale,
    /// No tracked order matches the event.
    Unknown,
}

impl From<Transition> for ApplyOutcome {
    fn from(value: Transition) -> Self {
        match value {
            Transition::Applied { from, to } => Self::Applied { from, to },
            Transition::Duplicate => Self::Duplicate,
            Transition::Stale => Self::Stale,
        }
    }
}

/// What to do about a cancel request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelDecision {
    /// Send a cancel for this vendor order.
    Submit {
        /// Vendor order ID.
        order_id: OrderId,
    },
    /// A cancel is already outstanding.
    AlreadyRequested,
    /// Order has not been acknowledged yet; there is nothing to cancel by ID.
    NotAcknowledged,
    /// Order is already terminal; nothing to do.
    Terminal {
        /// Final status.
        status: OrderStatus,
    },
    /// No tracked order matches.
    Unknown,
}

/// Result of reconciling against a vendor order list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Known orders whose state changed.
    pub updated: usize,
    /// Vendor orders the tracker did not know about.
    pub adopted: usize,
    /// Known orders already in sync.
    pub unchanged: usize,
}

#[derive(Debug, Default)]
struct TrackerState {
    active: HashMap<ClientRef, Order>,
    by_order_id: HashMap<OrderId, ClientRef>,
    history: VecDeque<(Instant, Order)>,
}

impl TrackerState {
    fn active_key(&self, lookup: &OrderLookup) -> Option<ClientRef> {
        match lookup {
            OrderLookup::ClientRef(client_ref) => {
                self.active.contains_key(client_ref).then(|| client_ref.clone())
            }
            OrderLookup::OrderId(order_id) => self.by_order_id.get(order_id).cloned(),
        }
    }

    /// Expired entries are invisible even before the next prune.
    fn history_index(&self, lookup: &OrderLookup, retention: Duration) -> Option<usize> {
        let now = Instant::now();
        self.history.iter().rposition(|(retired_at, order)| {
            now.duration_since(*retired_at) < retention
                && match lookup {
                    OrderLookup::ClientRef(client_ref) => &order.client_ref == client_ref,
                    OrderLookup::OrderId(order_id) => order.order_id.as_ref() == Some(order_id),
                }
        })
    }

    fn key_for_update(&self, update: &OrderUpdate) -> Option<ClientRef> {
        self.by_order_id.get(&update.order_id).cloned().or_else(|| {
            update
                .client_ref
                .as_ref()
                .filter(|r| self.active.contains_key(*r))
                .cloned()
        })
    }

    fn history_index_for_update(&self, update: &OrderUpdate, retention: Duration) -> Option<usize> {
        self.history_index(&OrderLookup::OrderId(update.order_id.clone()), retention)
            .or_else(|| {
                update.client_ref.as_ref().and_then(|r| {
                    self.history_index(&OrderLookup::ClientRef(r.clone()), retention)
                })
            })
    }

    fn retire(&mut self, client_ref: &ClientRef, config: &OrderTrackerConfig) {
        if let Some(order) = self.active.remove(client_ref) {
            if let Some(order_id) = &order.order_id {
                self.by_order_id.remove(order_id);
            }
            self.history.push_back((Instant::now(), order));
        }
        self.prune(config);
    }

    fn prune(&mut self, config: &OrderTrackerConfig) {
        while self.history.len() > config.history_capacity {
            self.history.pop_front();
        }
        let now = Instant::now();
        while let Some((retired_at, _)) = self.history.front() {
            if now.duration_since(*retired_at) < config.history_retention {
                break;
            }
            self.history.pop_front();
        }
    }

    fn apply_active(
        &mut self,
        client_ref: &ClientRef,
        update: &OrderUpdate,
        config: &OrderTrackerConfig,
    ) -> ApplyOutcome {
        let Some(order) = self.active.get_mut(client_ref) else {
            return ApplyOutcome::Unknown;
        };
        let had_order_id = order.order_id.is_some();
        let transition = order.apply(update);
        let terminal = order.is_terminal();
        let new_order_id = (!had_order_id).then(|| order.order_id.clone()).flatten();

        if let Some(order_id) = new_order_id {
            self.by_order_id.insert(order_id, client_ref.clone());
        }
        if terminal {
            self.retire(client_ref, config);
        }
        transition.into()
    }

    fn insert(&mut self, order: Order, config: &OrderTrackerConfig) {
        if order.is_terminal() {
            self.history.push_back((Instant::now(), order));
            self.prune(config);
            return;
        }
        if let Some(order_id) = &order.order_id {
            self.by_order_id
                .insert(order_id.clone(), order.client_ref.clone());
        }
        self.active.insert(order.client_ref.clone(), order);
    }
}

/// In-memory order tracker.
#[derive(Debug)]
pub struct OrderTracker {
    config: OrderTrackerConfig,
    state: RwLock<TrackerState>,
}

impl Default for OrderTracker {
    fn default() -> Self {
        Self::new(OrderTrackerConfig::default())
    }
}

impl OrderTracker {
    /// Create a new tracker.
    #[must_use]
    pub fn new(config: OrderTrackerConfig) -> Self {
        Self {
            config,
            state: RwLock::new(TrackerState::default()),
        }
    }

    /// Start tracking a new order in `PENDING_SUBMIT` and return its reference.
    ///
    /// The order spec is expected to be validated already.
    pub fn submit(&self, spec: OrderSpec) -> ClientRef {
        let client_ref = ClientRef::generate();
        let order = Order::pending(client_ref.clone(), spec, Utc::now());
        self.state.write().insert(order, &self.config);
        tracing::debug!(client_ref = %client_ref, "Order tracked");
        client_ref
    }

    /// Decide whether a cancel should be sent, and flag the order if so.
    ///
    /// The order keeps its status until the vendor confirms the cancel.
    pub fn request_cancel(&self, lookup: &OrderLookup) -> CancelDecision {
        let mut state = self.state.write();
        if let Some(key) = state.active_key(lookup)
            && let Some(order) = state.active.get_mut(&key)
        {
            if order.cancel_requested {
                return CancelDecision::AlreadyRequested;
            }
            let Some(order_id) = order.order_id.clone() else {
                return CancelDecision::NotAcknowledged;
            };
            order.cancel_requested = true;
            return CancelDecision::Submit { order_id };
        }

        state
            .history_index(lookup, self.config.history_retention)
            .map_or(CancelDecision::Unknown, |idx| CancelDecision::Terminal {
                status: state.history[idx].1.status,
            })
    }

    /// Clear the cancel flag after a cancel request failed to reach the vendor.
    pub fn clear_cancel_request(&self, order_id: &OrderId) {
        let mut state = self.state.write();
        if let Some(key) = state.by_order_id.get(order_id).cloned()
            && let Some(order) = state.active.get_mut(&key)
        {
            order.cancel_requested = false;
        }
    }

    /// Snapshot of one order, active or recently terminal.
    #[must_use]
    pub fn status_of(&self, lookup: &OrderLookup) -> Option<Order> {
        let state = self.state.read();
        if let Some(key) = state.active_key(lookup) {
            return state.active.get(&key).cloned();
        }
        state
            .history_index(lookup, self.config.history_retention)
            .map(|idx| state.history[idx].1.clone())
    }

    /// Snapshots of all non-terminal orders, oldest first.
    #[must_use]
    pub fn active_orders(&self) -> Vec<Order> {
        let mut orders: Vec<Order> = self.state.read().active.values().cloned().collect();
        orders.sort_by_key(|o| o.created_at);
        orders
    }

    /// Number of non-terminal orders.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.state.read().active.len()
    }

    /// Number of terminal orders retained and still within retention.
    #[must_use]
    pub fn history_len(&self) -> usize {
        let now = Instant::now();
        self.state
            .read()
            .history
            .iter()
            .filter(|(retired_at, _)| {
                now.duration_since(*retired_at) < self.config.history_retention
            })
            .count()
    }

    /// Apply a vendor order event.
    ///
    /// Events for orders the tracker has never seen are logged and dropped.
    pub fn apply(&self, update: &OrderUpdate) -> ApplyOutcome {
        let mut state = self.state.write();

        let retention = self.config.history_retention;
        let outcome = if let Some(key) = state.key_for_update(update) {
            state.apply_active(&key, update, &self.config)
        } else if let Some(idx) = state.history_index_for_update(update, retention) {
            state.history[idx].1.apply(update).into()
        } else {
            ApplyOutcome::Unknown
        };
        drop(state);

        match outcome {
            ApplyOutcome::Applied { from, to } => tracing::info!(
                order_id = %update.order_id,
                from = %from,
                to = %to,
                filled = %update.filled_quantity,
                "Order updated"
            ),
            ApplyOutcome::Stale => tracing::debug!(
                order_id = %update.order_id,
                status = %update.status,
                "Ignoring stale order event"
            ),
            ApplyOutcome::Duplicate => {}
            ApplyOutcome::Unknown => tracing::warn!(
                order_id = %update.order_id,
                status = %update.status,
                "Order event for unknown order dropped"
            ),
        }
        outcome
    }

    /// Reconcile with the vendor's view of a set of orders.
    ///
    /// Known orders are advanced; vendor orders the tracker has never seen
    /// are adopted.
    pub fn reconcile(&self, reports: &[OrderStatusReport]) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();
        let mut state = self.state.write();
        let retention = self.config.history_retention;

        for report in reports {
            let update = report.to_update();
            let outcome = if let Some(key) = state.key_for_update(&update) {
                state.apply_active(&key, &update, &self.config)
            } else if let Some(idx) = state.history_index_for_update(&update, retention) {
                state.history[idx].1.apply(&update).into()
            } else {
                ApplyOutcome::Unknown
            };

            match outcome {
                ApplyOutcome::Applied { .. } => summary.updated += 1,
                ApplyOutcome::Duplicate | ApplyOutcome::Stale => summary.unchanged += 1,
                ApplyOutcome::Unknown => {
                    tracing::info!(
                        order_id = %report.order_id,
                        status = %report.status,
                        "Adopting order unknown to tracker"
                    );
                    state.insert(Order::from_report(report), &self.config);
                    summary.adopted += 1;
                }
            }
        }
        state.prune(&self.config);
        summary
    }

    /// Active orders the vendor did not mention in `reports`.
    ///
    /// Acknowledged orders are returned by vendor ID, unacknowledged ones by
    /// client reference.
    #[must_use]
    pub fn missing_from(&self, reports: &[OrderStatusReport]) -> Vec<OrderLookup> {
        let state = self.state.read();
        state
            .active
            .values()
            .filter(|order| {
                !reports.iter().any(|r| {
                    order.order_id.as_ref() == Some(&r.order_id)
                        || r.client_ref.as_ref() == Some(&order.client_ref)
                })
            })
            .map(|order| {
                order.order_id.clone().map_or_else(
                    || OrderLookup::ClientRef(order.client_ref.clone()),
                    OrderLookup::OrderId,
                )
            })
            .collect()
    }

    /// Mark an unacknowledged order rejected.
    ///
    /// Returns false if the order is unknown or already terminal.
    pub fn mark_rejected(&self, client_ref: &ClientRef, reason: &str) -> bool {
        let mut state = self.state.write();
        let Some(order) = state.active.get_mut(client_ref) else {
            return false;
        };
        let applied = order.reject(reason, Utc::now()).is_applied();
        if applied {
            state.retire(client_ref, &self.config);
            tracing::warn!(client_ref = %client_ref, reason, "Order rejected");
        }
        applied
    }

    /// Stop tracking an order that provably never reached the vendor.
    ///
    /// Only `PENDING_SUBMIT` orders can be abandoned.
    pub fn abandon(&self, client_ref: &ClientRef) -> Option<Order> {
        let mut state = self.state.write();
        let pending = state
            .active
            .get(client_ref)
            .is_some_and(|o| o.status == OrderStatus::PendingSubmit && o.order_id.is_none());
        if !pending {
            return None;
        }
        let order = state.active.remove(client_ref);
        drop(state);
        tracing::debug!(client_ref = %client_ref, "Unsent order abandoned");
        order
    }
}
