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

//! Destination resolution for outgoing commands and events.

use crate::directory::PeerDirectory;
use crate::error::BusError;
use crate::message::{BusMessage, OriginatorInfo, TransportMessage};
use crate::observability::events;
use crate::peer::Peer;
use crate::routing::peer_selection::RoundRobinPeerSelector;
use crate::routing::MessageBinding;
use std::sync::Arc;
use tracing::debug;

const COMPONENT: &str = "outbound_router";

/// Resolves the peers a message must be sent to.
///
/// A command goes to exactly one handling peer, chosen in rotation; an event goes to
/// every handling peer.
pub struct OutboundRouter {
    directory: Arc<dyn PeerDirectory>,
    selector: RoundRobinPeerSelector,
}

impl OutboundRouter {
    pub fn new(directory: Arc<dyn PeerDirectory>) -> Self {
        Self {
            directory,
            selector: RoundRobinPeerSelector::new(),
        }
    }

    pub fn command_target(&self, binding: &MessageBinding) -> Option<Peer> {
        let handling_peers = self.directory.get_peers_handling_message(binding);
        let target = self
            .selector
            .get_target_peer(&binding.message_type_id, &handling_peers);

        if target.is_none() {
            debug!(
                event = events::ROUTING_NO_HANDLER,
                component = COMPONENT,
                msg_type = %binding.message_type_id,
                routing_key = %binding.routing_key,
                "no peer handles command"
            );
        }
        target
    }

    pub fn event_targets(&self, binding: &MessageBinding) -> Vec<Peer> {
        self.directory.get_peers_handling_message(binding)
    }

    /// Encodes `command` and pairs it with its target, if any.
    pub fn route_command<M: BusMessage>(
        &self,
        command: &M,
        originator: OriginatorInfo,
    ) -> Result<Option<(TransportMessage, Peer)>, BusError> {
        let Some(target) = self.command_target(&MessageBinding::from_message(command)) else {
            return Ok(None);
        };
        Ok(Some((TransportMessage::encode(command, originator)?, target)))
    }

    /// Encodes `event` and pairs it with every subscriber.
    pub fn route_event<M: BusMessage>(
        &self,
        event: &M,
        originator: OriginatorInfo,
    ) -> Result<(TransportMessage, Vec<Peer>), BusError> {
        let targets = self.event_targets(&MessageBinding::from_message(event));
        Ok((TransportMessage::encode(event, originator)?, targets))
    }
}
