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

//! Directory protocol: commands sent to directory peers and the events they publish.

use crate::error::BusError;
use crate::message::{BusMessage, MessageTypeId, TransportMessage};
use crate::peer::{PeerDescriptor, PeerId};
use crate::routing::{BindingKey, Subscription};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Error codes carried by [`CommandResult::error_code`].
pub mod error_codes {
    pub const SUCCESS: i32 = 0;
    pub const PEER_ALREADY_EXISTS: i32 = 1;
    pub const INVALID_PEER_DESCRIPTOR: i32 = 2;
}

macro_rules! directory_message {
    ($message:ty, $name:literal) => {
        impl BusMessage for $message {
            const MESSAGE_TYPE: &'static str = concat!("Bus.Directory.", $name);
            const IS_PERSISTENT: bool = false;
            const IS_INFRASTRUCTURE: bool = true;
        }
    };
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterPeerCommand {
    pub peer: PeerDescriptor,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterPeerResponse {
    pub peer_descriptors: Vec<PeerDescriptor>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnregisterPeerCommand {
    pub peer_id: PeerId,
    pub peer_end_point: Option<String>,
    pub timestamp_utc: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePeerSubscriptionsCommand {
    pub peer_id: PeerId,
    pub subscriptions: Vec<Subscription>,
    pub timestamp_utc: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerStarted {
    pub peer_descriptor: PeerDescriptor,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerStopped {
    pub peer_id: PeerId,
    pub peer_end_point: Option<String>,
    pub timestamp_utc: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerDecommissioned {
    pub peer_id: PeerId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSubscriptionsUpdated {
    pub peer_descriptor: PeerDescriptor,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSubscriptionsAdded {
    pub peer_id: PeerId,
    pub subscriptions: Vec<Subscription>,
    pub timestamp_utc: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSubscriptionsRemoved {
    pub peer_id: PeerId,
    pub subscriptions: Vec<Subscription>,
    pub timestamp_utc: Option<DateTime<Utc>>,
}

/// Full replacement of the binding keys of one message type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionsForType {
    pub message_type_id: MessageTypeId,
    pub binding_keys: Vec<BindingKey>,
}

impl SubscriptionsForType {
    pub fn new(
        message_type_id: MessageTypeId,
        binding_keys: Vec<BindingKey>,
    ) -> Self {
        Self {
            message_type_id,
            binding_keys,
        }
    }

    pub fn subscriptions(&self) -> impl Iterator<Item = Subscription> + '_ {
        self.binding_keys
            .iter()
            .map(|binding_key| Subscription::new(self.message_type_id.clone(), binding_key.clone()))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSubscriptionsForTypesUpdated {
    pub peer_id: PeerId,
    pub subscriptions_for_type: Vec<SubscriptionsForType>,
    pub timestamp_utc: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerNotResponding {
    pub peer_id: PeerId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerResponding {
    pub peer_id: PeerId,
    pub timestamp_utc: Option<DateTime<Utc>>,
}

directory_message!(RegisterPeerCommand, "RegisterPeerCommand");
directory_message!(RegisterPeerResponse, "RegisterPeerResponse");
directory_message!(UnregisterPeerCommand, "UnregisterPeerCommand");
directory_message!(UpdatePeerSubscriptionsCommand, "UpdatePeerSubscriptionsCommand");
directory_message!(PeerStarted, "PeerStarted");
directory_message!(PeerStopped, "PeerStopped");
directory_message!(PeerDecommissioned, "PeerDecommissioned");
directory_message!(PeerSubscriptionsUpdated, "PeerSubscriptionsUpdated");
directory_message!(PeerSubscriptionsAdded, "PeerSubscriptionsAdded");
directory_message!(PeerSubscriptionsRemoved, "PeerSubscriptionsRemoved");
directory_message!(PeerSubscriptionsForTypesUpdated, "PeerSubscriptionsForTypesUpdated");
directory_message!(PeerNotResponding, "PeerNotResponding");
directory_message!(PeerResponding, "PeerResponding");

/// Commands the directory client sends to directory peers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DirectoryCommand {
    RegisterPeer(RegisterPeerCommand),
    UpdatePeerSubscriptions(UpdatePeerSubscriptionsCommand),
    UnregisterPeer(UnregisterPeerCommand),
}

/// Outcome of a command sent to a directory peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandResult {
    pub error_code: i32,
    pub response: Option<RegisterPeerResponse>,
}

impl CommandResult {
    pub fn success(response: Option<RegisterPeerResponse>) -> Self {
        Self {
            error_code: error_codes::SUCCESS,
            response,
        }
    }

    pub fn error(error_code: i32) -> Self {
        Self {
            error_code,
            response: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error_code == error_codes::SUCCESS
    }
}

/// Every event published by the directory service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DirectoryEvent {
    PeerStarted(PeerStarted),
    PeerStopped(PeerStopped),
    PeerDecommissioned(PeerDecommissioned),
    PeerSubscriptionsUpdated(PeerSubscriptionsUpdated),
    PeerSubscriptionsAdded(PeerSubscriptionsAdded),
    PeerSubscriptionsRemoved(PeerSubscriptionsRemoved),
    PeerSubscriptionsForTypesUpdated(PeerSubscriptionsForTypesUpdated),
    PeerNotResponding(PeerNotResponding),
    PeerResponding(PeerResponding),
}

impl DirectoryEvent {
    pub fn peer_id(&self) -> &PeerId {
        match self {
            DirectoryEvent::PeerStarted(event) => event.peer_descriptor.peer_id(),
            DirectoryEvent::PeerStopped(event) => &event.peer_id,
            DirectoryEvent::PeerDecommissioned(event) => &event.peer_id,
            DirectoryEvent::PeerSubscriptionsUpdated(event) => event.peer_descriptor.peer_id(),
            DirectoryEvent::PeerSubscriptionsAdded(event) => &event.peer_id,
            DirectoryEvent::PeerSubscriptionsRemoved(event) => &event.peer_id,
            DirectoryEvent::PeerSubscriptionsForTypesUpdated(event) => &event.peer_id,
            DirectoryEvent::PeerNotResponding(event) => &event.peer_id,
            DirectoryEvent::PeerResponding(event) => &event.peer_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DirectoryEvent::PeerStarted(_) => PeerStarted::MESSAGE_TYPE,
            DirectoryEvent::PeerStopped(_) => PeerStopped::MESSAGE_TYPE,
            DirectoryEvent::PeerDecommissioned(_) => PeerDecommissioned::MESSAGE_TYPE,
            DirectoryEvent::PeerSubscriptionsUpdated(_) => PeerSubscriptionsUpdated::MESSAGE_TYPE,
            DirectoryEvent::PeerSubscriptionsAdded(_) => PeerSubscriptionsAdded::MESSAGE_TYPE,
            DirectoryEvent::PeerSubscriptionsRemoved(_) => PeerSubscriptionsRemoved::MESSAGE_TYPE,
            DirectoryEvent::PeerSubscriptionsForTypesUpdated(_) => {
                PeerSubscriptionsForTypesUpdated::MESSAGE_TYPE
            }
            DirectoryEvent::PeerNotResponding(_) => PeerNotResponding::MESSAGE_TYPE,
            DirectoryEvent::PeerResponding(_) => PeerResponding::MESSAGE_TYPE,
        }
    }

    /// Decodes a directory event; `Ok(None)` when the message is not one.
    pub fn from_transport_message(message: &TransportMessage) -> Result<Option<Self>, BusError> {
        let event = if message.is::<PeerStarted>() {
            DirectoryEvent::PeerStarted(message.decode()?)
        } else if message.is::<PeerStopped>() {
            DirectoryEvent::PeerStopped(message.decode()?)
        } else if message.is::<PeerDecommissioned>() {
            DirectoryEvent::PeerDecommissioned(message.decode()?)
        } else if message.is::<PeerSubscriptionsUpdated>() {
            DirectoryEvent::PeerSubscriptionsUpdated(message.decode()?)
        } else if message.is::<PeerSubscriptionsAdded>() {
            DirectoryEvent::PeerSubscriptionsAdded(message.decode()?)
        } else if message.is::<PeerSubscriptionsRemoved>() {
            DirectoryEvent::PeerSubscriptionsRemoved(message.decode()?)
        } else if message.is::<PeerSubscriptionsForTypesUpdated>() {
            DirectoryEvent::PeerSubscriptionsForTypesUpdated(message.decode()?)
        } else if message.is::<PeerNotResponding>() {
            DirectoryEvent::PeerNotResponding(message.decode()?)
        } else if message.is::<PeerResponding>() {
            DirectoryEvent::PeerResponding(message.decode()?)
        } else {
            return Ok(None);
        };
        Ok(Some(event))
    }
}
