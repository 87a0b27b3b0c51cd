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

use crate::message::{BusMessage, MessageTypeId};
use crate::routing::BindingKey;

/// Message type plus the routing key of one concrete message.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MessageBinding {
    pub message_type_id: MessageTypeId,
    pub routing_key: BindingKey,
}

impl MessageBinding {
    pub fn new(message_type_id: MessageTypeId, routing_key: BindingKey) -> Self {
        Self {
            message_type_id,
            routing_key,
        }
    }

    pub fn from_message<M: BusMessage>(message: &M) -> Self {
        Self::new(M::message_type_id(), message.routing_key())
    }

    /// Binding of a message type without routing members.
    pub fn of<M: BusMessage>() -> Self {
        Self::new(M::message_type_id(), BindingKey::empty())
    }
}
