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

//! Messages exchanged with the persistence service.

use crate::message::{BusMessage, MessageId, TransportMessage};
use crate::peer::PeerId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! persistence_message {
    ($message:ty, $name:literal) => {
        impl BusMessage for $message {
            const MESSAGE_TYPE: &'static str = concat!("Bus.Persistence.", $name);
            const IS_PERSISTENT: bool = false;
            const IS_INFRASTRUCTURE: bool = true;
        }
    };
}

/// Asks the persistence service to replay the messages missed by the sender.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartMessageReplayCommand {
    pub replay_id: Uuid,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageReplayed {
    pub replay_id: Uuid,
    pub message: TransportMessage,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayPhaseEnded {
    pub replay_id: Uuid,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyPhaseEnded {
    pub replay_id: Uuid,
}

/// Copy of a message sent to persistent peers, stored until each of them acks it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistMessageCommand {
    pub message: TransportMessage,
    pub target_peer_ids: Vec<PeerId>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHandled {
    pub message_id: MessageId,
}

/// Zero-payload signal sent by the persistence service before it shuts down.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistenceStopping;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistenceStoppingAck;

persistence_message!(StartMessageReplayCommand, "StartMessageReplayCommand");
persistence_message!(MessageReplayed, "MessageReplayed");
persistence_message!(ReplayPhaseEnded, "ReplayPhaseEnded");
persistence_message!(SafetyPhaseEnded, "SafetyPhaseEnded");
persistence_message!(PersistMessageCommand, "PersistMessageCommand");
persistence_message!(MessageHandled, "MessageHandled");
persistence_message!(PersistenceStopping, "PersistenceStopping");
persistence_message!(PersistenceStoppingAck, "PersistenceStoppingAck");
