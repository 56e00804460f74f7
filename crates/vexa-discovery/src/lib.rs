//! Service discovery client for the Vexa agent fleet.
//!
//! This crate keeps a live, self-healing view of the backend addresses the
//! rest of the system routes to:
//! - Queries the discovery RPC service for node/pod topology, with DNS
//!   A-record resolution as fallback
//! - Connects and prunes a managed connection pool as the fleet changes
//! - Publishes the address list as an atomic snapshot readers never see
//!   half-updated
//! - Splits reads between the primary pool and an optional read-replica pool
//!   with a lock-free weighted round-robin
//!
//! # Architecture
//!
//! 1. **Resolution**: RPC topology query, sorted by memory pressure and
//!    interleaved across nodes; DNS fallback when the RPC path yields nothing
//! 2. **Reconciliation**: newly discovered addresses are connected, vanished
//!    ones are disconnected concurrently
//! 3. **Publication**: the full address set is swapped in atomically, last

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod registry;

pub use client::{DiscoverCallback, DiscoveryClient, DisconnectCallback};
pub use registry::AddressRegistry;
