// Copyright 2026 Vexa Dev
// SPDX-License-Identifier: Apache-2.0

//! Core types and utilities for Vexa distributed vector search.
//!
//! This crate provides the fundamental building blocks used across all Vexa
//! components:
//! - Common data types (object vectors, index counts, cluster topology)
//! - Error types shared by the discovery and correction subsystems
//! - Configuration management

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod types;

pub use config::{ConfigValidationError, CorrectorConfig, DiscoveryConfig};
pub use error::{Error, Result};
pub use types::{IndexCount, IndexDetail, Node, ObjectTimestamp, ObjectVector, Pod};
