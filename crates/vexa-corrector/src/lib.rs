//! Cluster-wide index-consistency correction for Vexa.
//!
//! Agents replicate overlapping shards of one logical dataset without a
//! central lock, so replica counts and timestamps drift: crashed inserts
//! leave shortages, re-sharding leaves oversupply, and retried writes leave
//! stale timestamps. The corrector walks every object on every agent once
//! per pass and repairs what it finds.
//!
//! # Architecture
//!
//! 1. **Snapshot**: fetch the per-agent index counts and the configured
//!    replica count from the gateway; fix the pass start time
//! 2. **Walk**: stream each agent's objects in descending stored-count
//!    order, one agent at a time, with bounded per-object concurrency
//! 3. **Reconcile**: for each object, fan out timestamp lookups to the
//!    not-yet-visited agents, repair stale timestamps, then insert or
//!    remove replicas until the configured count holds
//! 4. **Ledger**: record each reconciled ID in a durable redb ledger so a
//!    restarted pass never reprocesses it

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod corrector;
pub mod ledger;

pub use corrector::{Corrector, StreamOutcome};
pub use ledger::CheckedLedger;
