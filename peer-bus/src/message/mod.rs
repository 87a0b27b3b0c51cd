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

//! Message identity and the transport envelope.
//!
//! Every message exchanged on the bus travels as a [`TransportMessage`]: an id, a
//! [`MessageTypeId`], the originator and a `serde_json`-encoded body. Typed messages
//! implement [`BusMessage`] to describe their type id, routing key and persistence
//! behavior.

mod message_id;
mod transport_message;

pub use message_id::MessageId;
pub use transport_message::{OriginatorInfo, TransportMessage};

use crate::routing::BindingKey;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Full name of a message type, e.g. `Bus.Directory.PeerStarted`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageTypeId(String);

impl MessageTypeId {
    pub fn new(full_name: impl Into<String>) -> Self {
        Self(full_name.into())
    }

    pub fn of<M: BusMessage>() -> Self {
        Self::new(M::MESSAGE_TYPE)
    }

    pub fn full_name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageTypeId {
    fn from(full_name: &str) -> Self {
        Self::new(full_name)
    }
}

/// A typed message that can be carried by a [`TransportMessage`].
pub trait BusMessage: Serialize + DeserializeOwned + Send + Sync + 'static {
    const MESSAGE_TYPE: &'static str;

    /// Transient messages are never mirrored to the persistence service.
    const IS_PERSISTENT: bool = true;

    /// Infrastructure messages are protocol plumbing (directory, persistence).
    const IS_INFRASTRUCTURE: bool = false;

    fn message_type_id() -> MessageTypeId {
        MessageTypeId::of::<Self>()
    }

    /// Routing key derived from the routable members of the message.
    fn routing_key(&self) -> BindingKey {
        BindingKey::empty()
    }
}
