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

//! Formatting helpers for structured log fields.

use crate::message::TransportMessage;
use crate::peer::Peer;

pub fn format_message_id(message: &TransportMessage) -> String {
    message.id.to_string()
}

pub fn format_message_type(message: &TransportMessage) -> String {
    message.message_type_id.full_name().to_string()
}

pub fn format_originator(message: &TransportMessage) -> String {
    message.originator.sender_id.to_string()
}

/// Renders a peer list as `id@endpoint` pairs separated by commas.
pub fn format_peers(peers: &[Peer]) -> String {
    peers
        .iter()
        .map(|peer| format!("{}@{}", peer.id(), peer.end_point()))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::format_peers;
    use crate::peer::{Peer, PeerId};

    #[test]
    fn format_peers_joins_id_and_endpoint() {
        let peers = vec![
            Peer::new(PeerId::new("Abc.A.0"), "tcp://a:1"),
            Peer::new(PeerId::new("Abc.B.0"), "tcp://b:2"),
        ];

        assert_eq!(format_peers(&peers), "Abc.A.0@tcp://a:1, Abc.B.0@tcp://b:2");
        assert_eq!(format_peers(&[]), "");
    }
}
