// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! In-process implementation of the `BrokerRegistry` port.
//!
//! The relay transport layer registers a frame channel when a relay
//! authenticates and tears it down on disconnect; the control plane only
//! ever sees the identity space this registry exposes. A relay that
//! disconnects mid-flight closes its channel, so outstanding deliveries
//! resolve to `NotConnected` instead of hanging.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::mpsc;

use marshal_core::dispatch::{BrokerRegistry, DeliveryError, Frame};
use marshal_core::node::BrokerId;

#[derive(Default)]
pub struct InProcessBrokerRegistry {
    links: RwLock<HashMap<BrokerId, mpsc::Sender<Frame>>>,
}

impl InProcessBrokerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a relay's frame channel after it authenticates.
    pub fn connect(&self, id: BrokerId, sender: mpsc::Sender<Frame>) {
        self.links.write().unwrap().insert(id, sender);
    }

    pub fn disconnect(&self, id: BrokerId) {
        self.links.write().unwrap().remove(&id);
    }
}

#[async_trait]
impl BrokerRegistry for InProcessBrokerRegistry {
    fn contains(&self, id: BrokerId) -> bool {
        self.links.read().unwrap().contains_key(&id)
    }

    fn connected(&self) -> Vec<BrokerId> {
        self.links.read().unwrap().keys().copied().collect()
    }

    async fn deliver(&self, id: BrokerId, frame: Frame) -> Result<(), DeliveryError> {
        let sender = {
            let links = self.links.read().unwrap();
            links.get(&id).cloned()
        };
        let Some(sender) = sender else {
            return Err(DeliveryError::NotConnected);
        };
        sender
            .send(frame)
            .await
            .map_err(|_| DeliveryError::NotConnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marshal_core::dispatch::Opcode;

    #[tokio::test]
    async fn deliver_reaches_a_connected_relay() {
        let registry = InProcessBrokerRegistry::new();
        let (tx, mut rx) = mpsc::channel(4);
        registry.connect(BrokerId(1), tx);

        assert!(registry.contains(BrokerId(1)));
        registry
            .deliver(BrokerId(1), Frame::empty(Opcode::CacheReset))
            .await
            .unwrap();
        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.opcode, Opcode::CacheReset);
    }

    #[tokio::test]
    async fn disconnected_relay_yields_not_connected() {
        let registry = InProcessBrokerRegistry::new();
        let (tx, rx) = mpsc::channel(4);
        registry.connect(BrokerId(2), tx);
        registry.disconnect(BrokerId(2));
        drop(rx);

        let err = registry
            .deliver(BrokerId(2), Frame::empty(Opcode::CacheReset))
            .await
            .unwrap_err();
        assert_eq!(err, DeliveryError::NotConnected);
        assert!(registry.connected().is_empty());
    }

    #[tokio::test]
    async fn closed_channel_counts_as_disconnect() {
        let registry = InProcessBrokerRegistry::new();
        let (tx, rx) = mpsc::channel(4);
        registry.connect(BrokerId(3), tx);
        drop(rx);

        let err = registry
            .deliver(BrokerId(3), Frame::empty(Opcode::SearchReset))
            .await
            .unwrap_err();
        assert_eq!(err, DeliveryError::NotConnected);
    }
}
