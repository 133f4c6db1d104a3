// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Dispatch Gateway — Fan-Out Over the Relay Registry
//!
//! Unicast, multicast, and broadcast primitives over a space of relay
//! identities, built on the [`BrokerRegistry`] port:
//!
//! - `unicast` — fire-and-forget; a disconnected target is a silent no-op;
//!   the caller is never blocked on relay acknowledgement.
//! - `multicast` — concurrent delivery to a target set, collected into a
//!   [`MulticastResults`] aggregator: one outcome per target, arriving in
//!   completion order, bounded by a per-call deadline.
//! - `broadcast` — unicast to every currently connected relay, no
//!   acknowledgement bookkeeping.
//!
//! Fan-out to distinct targets is independent: one `tokio` task per target,
//! no cross-target lock. The aggregator is a bounded mpsc channel sized to
//! the target count, so a delivery task can never block on a slow consumer.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::domain::dispatch::{
    BrokerRegistry, DeliveryError, DispatchOutcome, Frame, Opcode,
};
use crate::domain::node::BrokerId;

const DEFAULT_DEADLINE: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct DispatchGateway {
    registry: Arc<dyn BrokerRegistry>,
    deadline: Duration,
}

impl DispatchGateway {
    /// Gateway with an explicit per-multicast deadline.
    pub fn new(registry: Arc<dyn BrokerRegistry>, deadline: Duration) -> Self {
        Self { registry, deadline }
    }

    /// Gateway with the default 10-second multicast deadline.
    pub fn with_default_deadline(registry: Arc<dyn BrokerRegistry>) -> Self {
        Self::new(registry, DEFAULT_DEADLINE)
    }

    /// Best-effort asynchronous delivery to a single relay.
    ///
    /// Returns immediately; a disconnected target or a failed delivery is
    /// only observable in the logs.
    pub fn unicast<T: Serialize>(&self, target: BrokerId, opcode: Opcode, payload: &T) {
        metrics::counter!("marshal_dispatch_unicast_total").increment(1);
        if !self.registry.contains(target) {
            debug!(broker = target.0, opcode = opcode.as_str(), "unicast target not connected, dropped");
            return;
        }
        let frame = match Frame::new(opcode, payload) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(opcode = opcode.as_str(), error = %e, "unicast payload not encodable, dropped");
                return;
            }
        };
        let registry = Arc::clone(&self.registry);
        tokio::spawn(async move {
            if let Err(e) = registry.deliver(target, frame).await {
                metrics::counter!("marshal_dispatch_failures_total").increment(1);
                warn!(broker = target.0, opcode = opcode.as_str(), error = %e, "unicast delivery failed");
            }
        });
    }

    /// Concurrent delivery to every relay in `targets`.
    ///
    /// Each distinct target resolves to exactly one [`DispatchOutcome`]:
    /// success, the relay's reported error, a synthetic `NotConnected` for
    /// unreachable targets, or a synthetic `Timeout` for targets still
    /// pending at the deadline. Outcomes arrive in completion order.
    pub fn multicast<T: Serialize>(
        &self,
        targets: impl IntoIterator<Item = BrokerId>,
        opcode: Opcode,
        payload: &T,
    ) -> MulticastResults {
        let mut seen = HashSet::new();
        let targets: Vec<BrokerId> = targets
            .into_iter()
            .filter(|id| seen.insert(*id))
            .collect();
        metrics::counter!("marshal_dispatch_multicast_targets_total")
            .increment(targets.len() as u64);

        let (tx, rx) = mpsc::channel(targets.len().max(1));

        let frame = match Frame::new(opcode, payload) {
            Ok(frame) => frame,
            Err(e) => {
                // Nothing went on the wire; resolve every target with the
                // encoding failure so the aggregator contract still holds.
                for id in &targets {
                    let _ = tx.try_send(DispatchOutcome::failed(*id, e.clone()));
                }
                return MulticastResults {
                    rx,
                    remaining: targets.len(),
                };
            }
        };

        for id in &targets {
            let id = *id;
            let registry = Arc::clone(&self.registry);
            let frame = frame.clone();
            let tx = tx.clone();
            let deadline = self.deadline;
            tokio::spawn(async move {
                let error = if !registry.contains(id) {
                    Some(DeliveryError::NotConnected)
                } else {
                    match tokio::time::timeout(deadline, registry.deliver(id, frame)).await {
                        Ok(Ok(())) => None,
                        Ok(Err(e)) => Some(e),
                        Err(_) => Some(DeliveryError::Timeout),
                    }
                };
                if error.is_some() {
                    metrics::counter!("marshal_dispatch_failures_total").increment(1);
                }
                // Capacity equals the target count, so this never blocks.
                let _ = tx.send(DispatchOutcome { broker_id: id, error }).await;
            });
        }

        MulticastResults {
            rx,
            remaining: targets.len(),
        }
    }

    /// Deliver to every currently connected relay, best-effort, no result
    /// collection.
    pub fn broadcast<T: Serialize>(&self, opcode: Opcode, payload: &T) {
        let frame = match Frame::new(opcode, payload) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(opcode = opcode.as_str(), error = %e, "broadcast payload not encodable, dropped");
                return;
            }
        };
        let connected = self.registry.connected();
        metrics::counter!("marshal_dispatch_broadcast_total").increment(1);
        debug!(opcode = opcode.as_str(), targets = connected.len(), "broadcast");
        for id in connected {
            let registry = Arc::clone(&self.registry);
            let frame = frame.clone();
            tokio::spawn(async move {
                if let Err(e) = registry.deliver(id, frame).await {
                    metrics::counter!("marshal_dispatch_failures_total").increment(1);
                    warn!(broker = id.0, error = %e, "broadcast delivery failed");
                }
            });
        }
    }
}

/// Bounded, completion-ordered collection of per-target multicast outcomes
/// (the result aggregator). Each target yields exactly one outcome; the
/// sequence is consumed once and always terminates, because every delivery
/// task resolves by the per-call deadline at the latest.
pub struct MulticastResults {
    rx: mpsc::Receiver<DispatchOutcome>,
    remaining: usize,
}

impl MulticastResults {
    /// Next outcome in completion order, or `None` once every target has
    /// resolved.
    pub async fn next(&mut self) -> Option<DispatchOutcome> {
        if self.remaining == 0 {
            return None;
        }
        match self.rx.recv().await {
            Some(outcome) => {
                self.remaining -= 1;
                Some(outcome)
            }
            None => {
                self.remaining = 0;
                None
            }
        }
    }

    /// Outcomes still expected.
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// Drain every remaining outcome.
    pub async fn collect(mut self) -> Vec<DispatchOutcome> {
        let mut all = Vec::with_capacity(self.remaining);
        while let Some(outcome) = self.next().await {
            all.push(outcome);
        }
        all
    }
}
