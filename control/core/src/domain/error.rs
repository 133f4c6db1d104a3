// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Error kinds surfaced by the lifecycle and dispatch services.
//!
//! Validation and state-conflict errors are raised before any mutation or
//! network attempt; delivery failures never appear here — they are captured
//! into task records (multicast) or only logged (unicast/broadcast).

use super::repository::RepositoryError;

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// Address failed to parse, or parses to loopback, unspecified, or the
    /// IPv4 broadcast address.
    #[error("address is not a routable unicast address")]
    InvalidAddress,

    #[error("address {0} is already registered")]
    AddressExists(String),

    /// Bulk operations must carry a non-empty selector.
    #[error("bulk operation requires a selector")]
    MissingSelector,

    /// The node's current lifecycle state does not allow the requested
    /// transition or operation.
    #[error("node status does not allow this operation")]
    InvalidState,

    #[error("node not found")]
    NotFound,

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}
