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

//! Ordering of the configured directory peers for each attempt.

use crate::config::BusConfiguration;
use crate::peer::{Peer, PeerId};
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Builds the directory peer list for register, update and unregister attempts.
///
/// Peers that recently failed are moved to the back of the list until their cooldown
/// expires; among themselves they are ordered by how long ago they failed.
pub struct DirectoryPeerSelector {
    directory_peers: Vec<Peer>,
    is_picked_randomly: bool,
    faulty_cooldown: Duration,
    faulty_since: Mutex<HashMap<PeerId, Instant>>,
    last_selection: Mutex<Vec<Peer>>,
}

impl DirectoryPeerSelector {
    pub fn new(configuration: &BusConfiguration) -> Self {
        let directory_peers = configuration
            .directory_service_end_points
            .iter()
            .enumerate()
            .map(|(index, end_point)| Peer::new(PeerId::directory(index), end_point.clone()))
            .collect();

        Self {
            directory_peers,
            is_picked_randomly: configuration.is_directory_picked_randomly,
            faulty_cooldown: configuration.faulty_directory_cooldown(),
            faulty_since: Mutex::new(HashMap::new()),
            last_selection: Mutex::new(Vec::new()),
        }
    }

    /// Returns the peers to try, in order, and remembers the selection.
    pub fn get_peers(&self) -> Vec<Peer> {
        let mut candidates = self.directory_peers.clone();
        if self.is_picked_randomly {
            candidates.shuffle(&mut rand::thread_rng());
        }

        let now = Instant::now();
        let faulty_since = self.faulty_since.lock().unwrap_or_else(PoisonError::into_inner);
        let fault_time = |peer: &Peer| {
            faulty_since
                .get(peer.id())
                .copied()
                .filter(|since| now.duration_since(*since) < self.faulty_cooldown)
        };

        let (mut faulty, mut selection): (Vec<Peer>, Vec<Peer>) =
            candidates.into_iter().partition(|peer| fault_time(peer).is_some());
        faulty.sort_by_key(|peer| fault_time(peer));
        selection.append(&mut faulty);
        drop(faulty_since);

        *self
            .last_selection
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = selection.clone();
        selection
    }

    /// Returns the last selection, or a fresh one when nothing was selected yet.
    pub fn get_peers_from_cache(&self) -> Vec<Peer> {
        let cached = self
            .last_selection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if cached.is_empty() {
            self.get_peers()
        } else {
            cached
        }
    }

    pub fn set_faulty(&self, peer_id: &PeerId) {
        self.faulty_since
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(peer_id.clone(), Instant::now());
    }

    pub fn clear_faulty(&self, peer_id: &PeerId) {
        self.faulty_since
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(peer_id);
    }
}
