// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # `marshal-control-core` — Fleet Control Plane Core
//!
//! Dispatch and node-lifecycle consistency engine for the Marshal fleet
//! manager: managed agent nodes ("minions") sit behind regional relay
//! gateways ("brokers"), and this crate propagates lifecycle and
//! configuration events to those relays.
//!
//! ## Crate Layout
//!
//! | Module | Layer | Contents |
//! |--------|-------|----------|
//! | [`domain`] | Domain | node/tag/effect/task aggregates, opcode table, port traits |
//! | [`application`] | Application | `NodeLifecycleService`, `Pusher` use cases |
//! | [`infrastructure`] | Infrastructure | dispatch gateway, repositories, inventory client |
//! | [`presentation`] | Presentation | Axum HTTP surface |
//!
//! ## Key Concepts
//!
//! - **Fan-out**: one logical command delivered to one, many, or all
//!   connected relays, with per-target outcomes collected in completion
//!   order and reconciled into durable task records.
//! - **Cascading drop**: a node's primary consistency set is removed in one
//!   transaction; denormalized mirrors and wild-tag Effects are cleaned up
//!   best-effort afterwards.
//!
//! The relay connection registry itself (sockets, heartbeats, wire
//! encoding) is an external collaborator behind the
//! [`domain::dispatch::BrokerRegistry`] port.

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
