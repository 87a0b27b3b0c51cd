/********************************************************************************
 * Copyright (c) 2024 Contributors to the Eclipse Foundation
 *
 * See the NOTICE file(s) distributed with this work for additional
 * information regarding copyright ownership.
 *
 * This program and the accompanying materials are made available under the
 * terms of the Apache License Version 2.0 which is available at
 * https://www.apache.org/licenses/LICENSE-2.0
 *
 * SPDX-License-Identifier: Apache-2.0
 ********************************************************************************/

//! Transport seam.
//!
//! The wire transport (socket framing, connection management) is an external
//! collaborator: the bus only needs to send a message to a set of peers, acknowledge
//! a handled message, and be told when a message arrives.

use crate::error::BusError;
use crate::message::{MessageTypeId, OriginatorInfo, TransportMessage};
use crate::peer::{Peer, PeerId};
use async_trait::async_trait;
use std::sync::Arc;

/// Receives inbound messages from a [`Transport`].
#[async_trait]
pub trait TransportListener: Send + Sync {
    async fn on_message_received(&self, message: TransportMessage) -> Result<(), BusError>;
}

#[async_trait]
pub trait Transport: Send + Sync {
    fn peer_id(&self) -> PeerId;

    fn inbound_end_point(&self) -> String;

    /// Replaces the listener that inbound messages are delivered to.
    fn set_listener(&self, listener: Arc<dyn TransportListener>);

    async fn send(&self, message: TransportMessage, peers: Vec<Peer>) -> Result<(), BusError>;

    async fn ack_message(&self, message: &TransportMessage) -> Result<(), BusError>;

    fn originator(&self) -> OriginatorInfo {
        OriginatorInfo::new(self.peer_id(), self.inbound_end_point())
    }

    fn create_infrastructure_message(&self, message_type_id: MessageTypeId) -> TransportMessage {
        TransportMessage::infrastructure(message_type_id, self.originator())
    }
}
