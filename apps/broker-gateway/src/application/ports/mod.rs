//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern.
//!
//! ## Driven Ports (Outbound)
//!
//! - `VendorClient`: the brokerage SDK session (connect, disconnect, send,
//!   event stream)

mod vendor_port;

pub use vendor_port::{
    GatewayEndpoint, VendorClient, VendorError, VendorEvent, VendorRequest, VendorResponse,
};

#[cfg(test)]
pub use vendor_port::MockVendorClient;
