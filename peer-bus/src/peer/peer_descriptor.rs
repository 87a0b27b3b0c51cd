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

use crate::peer::{Peer, PeerId};
use crate::routing::Subscription;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Everything the directory knows about a peer.
///
/// `timestamp_utc` is the logical clock of the descriptor: updates carrying an older
/// timestamp than the one already known are discarded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerDescriptor {
    pub peer: Peer,
    pub subscriptions: Vec<Subscription>,
    pub is_persistent: bool,
    pub timestamp_utc: Option<DateTime<Utc>>,
    pub has_debugger_attached: bool,
}

impl PeerDescriptor {
    pub fn new(
        peer: Peer,
        subscriptions: Vec<Subscription>,
        is_persistent: bool,
        timestamp_utc: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            peer,
            subscriptions,
            is_persistent,
            timestamp_utc,
            has_debugger_attached: false,
        }
    }

    pub fn peer_id(&self) -> &PeerId {
        self.peer.id()
    }
}
