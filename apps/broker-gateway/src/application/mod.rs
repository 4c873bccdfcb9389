//! Application Layer - Use cases and port definitions.
//!
//! Holds the vendor port the infrastructure adapters implement and the
//! order tracking service fed by vendor events.

/// Port interfaces for external systems (vendor gateway client).
pub mod ports;

/// Application services (order tracking).
pub mod services;
