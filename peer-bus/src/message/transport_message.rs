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

use crate::error::BusError;
use crate::message::{BusMessage, MessageId, MessageTypeId};
use crate::peer::PeerId;
use serde::{Deserialize, Serialize};

/// Identity of the peer that emitted a message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginatorInfo {
    pub sender_id: PeerId,
    pub sender_end_point: String,
}

impl OriginatorInfo {
    pub fn new(sender_id: PeerId, sender_end_point: impl Into<String>) -> Self {
        Self {
            sender_id,
            sender_end_point: sender_end_point.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportMessage {
    pub id: MessageId,
    pub message_type_id: MessageTypeId,
    pub content: Vec<u8>,
    pub originator: OriginatorInfo,
    /// Whether this message may be mirrored to the persistence service.
    pub is_persistent: bool,
    /// Set on copies sent to persistent peers: the receiver must ack to persistence.
    pub was_persisted: bool,
    /// Set locally on replayed messages so their ack always reaches persistence.
    #[serde(skip)]
    pub force_persistence_ack: bool,
}

impl TransportMessage {
    pub fn encode<M: BusMessage>(
        message: &M,
        originator: OriginatorInfo,
    ) -> Result<Self, BusError> {
        Ok(Self {
            id: MessageId::new(),
            message_type_id: M::message_type_id(),
            content: serde_json::to_vec(message)?,
            originator,
            is_persistent: M::IS_PERSISTENT && !M::IS_INFRASTRUCTURE,
            was_persisted: false,
            force_persistence_ack: false,
        })
    }

    /// Builds a body-less message, used for zero-payload protocol signals.
    pub fn infrastructure(message_type_id: MessageTypeId, originator: OriginatorInfo) -> Self {
        Self {
            id: MessageId::new(),
            message_type_id,
            content: Vec::new(),
            originator,
            is_persistent: false,
            was_persisted: false,
            force_persistence_ack: false,
        }
    }

    pub fn is<M: BusMessage>(&self) -> bool {
        self.message_type_id.full_name() == M::MESSAGE_TYPE
    }

    pub fn decode<M: BusMessage>(&self) -> Result<M, BusError> {
        if !self.is::<M>() {
            return Err(BusError::UnexpectedMessageType {
                expected: M::MESSAGE_TYPE.to_string(),
                actual: self.message_type_id.to_string(),
            });
        }
        Ok(serde_json::from_slice(&self.content)?)
    }

    /// Whether the ack of this message must be reported to the persistence service.
    pub fn requires_persistence_ack(&self) -> bool {
        self.was_persisted || self.force_persistence_ack
    }
}
