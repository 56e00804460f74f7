// Copyright 2026 Vexa Dev
// SPDX-License-Identifier: Apache-2.0

//! Error types shared by the Vexa discovery and correction subsystems.

use thiserror::Error;

/// A specialized `Result` type for Vexa operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the discovery client and index corrector.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// The requested object does not exist on the target agent.
    #[error("object {id} not found")]
    ObjectNotFound {
        /// The object ID that was requested.
        id: String,
    },

    /// The object already exists on the target agent.
    #[error("object {id} already exists")]
    ObjectAlreadyExists {
        /// The object ID that was inserted.
        id: String,
    },

    /// The operation was canceled before completion.
    #[error("operation canceled")]
    Canceled,

    /// No live connection exists for the given address.
    #[error("connection not found for {addr}")]
    ConnectionNotFound {
        /// The address that had no connection.
        addr: String,
    },

    /// The discovered address list was empty when an agent was required.
    #[error("no available agent for {operation}")]
    NoAvailableAgents {
        /// The operation that needed an agent.
        operation: &'static str,
    },

    /// The supplied configuration failed validation.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// RPC-based discovery failed.
    #[error("discovery failed: {0}")]
    Discovery(String),

    /// DNS resolution of the fallback A record failed.
    #[error("DNS resolution failed: {0}")]
    DnsResolution(String),

    /// The durable checked ledger failed.
    #[error("checked ledger error: {0}")]
    Ledger(String),

    /// An RPC to a specific agent failed.
    #[error("rpc to {addr} failed: {message}")]
    Rpc {
        /// The address of the failing agent.
        addr: String,
        /// The underlying failure description.
        message: String,
    },

    /// An object stream terminated abnormally.
    #[error("object stream failed: {0}")]
    Stream(String),

    /// Multiple independent failures joined from a fan-out.
    #[error("{} errors occurred: [{}]", .0.len(), join_messages(.0))]
    Multi(Vec<Error>),
}

fn join_messages(errs: &[Error]) -> String {
    errs.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

impl Error {
    /// Joins a collection of errors into a single error.
    ///
    /// Returns `None` when the collection is empty, the sole error when it
    /// holds exactly one, and a flattened [`Error::Multi`] otherwise. Nested
    /// `Multi` values are inlined so joining is associative.
    pub fn join(errs: Vec<Error>) -> Option<Error> {
        let mut flat = Vec::with_capacity(errs.len());
        for err in errs {
            match err {
                Error::Multi(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => None,
            1 => flat.pop(),
            _ => Some(Error::Multi(flat)),
        }
    }

    /// Returns true for a not-found class failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::ObjectNotFound { .. })
    }

    /// Returns true for a cancellation class failure.
    pub fn is_canceled(&self) -> bool {
        matches!(self, Error::Canceled)
    }

    /// Returns true when the failure is a missing connection, including one
    /// buried inside a joined fan-out error.
    pub fn is_connection_not_found(&self) -> bool {
        match self {
            Error::ConnectionNotFound { .. } => true,
            Error::Multi(errs) => errs.iter().any(Error::is_connection_not_found),
            _ => false,
        }
    }

    /// Returns true for an already-exists class failure.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::ObjectAlreadyExists { .. })
    }
}
