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

//! Target selection for commands with several handling peers.

use crate::message::MessageTypeId;
use crate::peer::Peer;
use dashmap::DashMap;

/// Rotates through the handlers of each command type.
///
/// Peers that are up and responding are preferred; when none is, every handler is a
/// candidate so the command still goes somewhere.
#[derive(Default)]
pub struct RoundRobinPeerSelector {
    next_index_by_type: DashMap<MessageTypeId, usize>,
}

impl RoundRobinPeerSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_target_peer(
        &self,
        message_type_id: &MessageTypeId,
        handling_peers: &[Peer],
    ) -> Option<Peer> {
        match handling_peers {
            [] => None,
            [single] => Some(single.clone()),
            _ => {
                let responding: Vec<&Peer> = handling_peers
                    .iter()
                    .filter(|peer| peer.is_up() && peer.is_responding())
                    .collect();
                let candidates: Vec<&Peer> = if responding.is_empty() {
                    handling_peers.iter().collect()
                } else {
                    responding
                };

                let mut next_index = self
                    .next_index_by_type
                    .entry(message_type_id.clone())
                    .or_insert(0);
                let selected = candidates[*next_index % candidates.len()].clone();
                *next_index = next_index.wrapping_add(1);
                Some(selected)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::RoundRobinPeerSelector;
    use crate::message::MessageTypeId;
    use crate::peer::{Peer, PeerId};

    fn peers(names: &[&str]) -> Vec<Peer> {
        names
            .iter()
            .map(|name| Peer::new(PeerId::new(*name), format!("tcp://{name}:1")))
            .collect()
    }

    #[test]
    fn no_handler_selects_nothing() {
        let selector = RoundRobinPeerSelector::new();

        assert!(selector
            .get_target_peer(&MessageTypeId::new("Tests.Cmd"), &[])
            .is_none());
    }

    #[test]
    fn rotates_per_message_type() {
        let selector = RoundRobinPeerSelector::new();
        let handlers = peers(&["Abc.H.0", "Abc.H.1", "Abc.H.2"]);
        let command = MessageTypeId::new("Tests.Cmd");
        let other = MessageTypeId::new("Tests.Other");

        let picks: Vec<String> = (0..4)
            .filter_map(|_| selector.get_target_peer(&command, &handlers))
            .map(|peer| peer.id().to_string())
            .collect();

        assert_eq!(picks, ["Abc.H.0", "Abc.H.1", "Abc.H.2", "Abc.H.0"]);
        assert_eq!(
            selector
                .get_target_peer(&other, &handlers)
                .map(|peer| peer.id().to_string()),
            Some("Abc.H.0".to_string())
        );
    }

    #[test]
    fn skips_non_responding_peers_while_others_respond() {
        let selector = RoundRobinPeerSelector::new();
        let handlers = peers(&["Abc.H.0", "Abc.H.1"]);
        handlers[0].set_responding(false);
        let command = MessageTypeId::new("Tests.Cmd");

        for _ in 0..3 {
            let pick = selector
                .get_target_peer(&command, &handlers)
                .expect("a handler");
            assert_eq!(pick.id().as_str(), "Abc.H.1");
        }
    }

    #[test]
    fn falls_back_to_all_handlers_when_none_responds() {
        let selector = RoundRobinPeerSelector::new();
        let handlers = peers(&["Abc.H.0", "Abc.H.1"]);
        handlers.iter().for_each(|peer| peer.set_responding(false));

        assert!(selector
            .get_target_peer(&MessageTypeId::new("Tests.Cmd"), &handlers)
            .is_some());
    }
}
