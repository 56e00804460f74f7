//! Client contracts and multi-target dispatch for Vexa.
//!
//! This crate defines the seams between the consistency logic and the wire:
//! - Traits for the discovery service, the cluster gateway, and per-agent
//!   index management (the transport crate supplies the real stubs)
//! - A connection pool that dispatches a callback across many targets,
//!   sequentially or with bounded concurrency, joining per-target errors
//! - In-memory implementations for tests
//!
//! # Architecture
//!
//! 1. **Contracts**: `DiscovererService` / `GatewayClient` / `AgentClient`
//! 2. **Dispatch**: `ConnectionPool` owns one handle per address and runs
//!    `ordered_range` / `ordered_range_concurrent` / `range_concurrent` /
//!    `do_with` over them
//! 3. **Events**: pool membership changes are broadcast so owners can
//!    forward connect failures into their own error channels

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod pool;
pub mod testing;

pub use client::{AgentClient, AgentDiscoverer, DiscovererService, GatewayClient, ObjectStream};
pub use pool::{ConnectionFactory, ConnectionPool, PoolEvent};
