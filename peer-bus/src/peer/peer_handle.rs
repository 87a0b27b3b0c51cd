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

use crate::peer::PeerId;
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A shared handle on a peer.
///
/// Clones share state: when the directory marks a peer stopped or not responding,
/// every holder of a clone (subscription trees, routing results, callers) observes it
/// without re-fetching. The directory keeps a single instance per [`PeerId`].
#[derive(Clone, Serialize, Deserialize)]
#[serde(from = "PeerRecord", into = "PeerRecord")]
pub struct Peer {
    inner: Arc<PeerState>,
}

struct PeerState {
    id: PeerId,
    end_point: ArcSwap<String>,
    is_up: AtomicBool,
    is_responding: AtomicBool,
}

/// Plain-data view of a peer, used on the wire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct PeerRecord {
    id: PeerId,
    end_point: String,
    is_up: bool,
    is_responding: bool,
}

impl Peer {
    /// Creates an up and responding peer.
    pub fn new(id: PeerId, end_point: impl Into<String>) -> Self {
        Self::with_state(id, end_point, true, true)
    }

    pub fn with_state(
        id: PeerId,
        end_point: impl Into<String>,
        is_up: bool,
        is_responding: bool,
    ) -> Self {
        Self {
            inner: Arc::new(PeerState {
                id,
                end_point: ArcSwap::from_pointee(end_point.into()),
                is_up: AtomicBool::new(is_up),
                is_responding: AtomicBool::new(is_responding),
            }),
        }
    }

    /// Copies the current state into a new, unshared instance.
    pub fn detached_copy(&self) -> Self {
        Self::with_state(
            self.id().clone(),
            self.end_point(),
            self.is_up(),
            self.is_responding(),
        )
    }

    pub fn id(&self) -> &PeerId {
        &self.inner.id
    }

    pub fn end_point(&self) -> String {
        self.inner.end_point.load().as_ref().clone()
    }

    pub fn is_up(&self) -> bool {
        self.inner.is_up.load(Ordering::Acquire)
    }

    pub fn is_responding(&self) -> bool {
        self.inner.is_responding.load(Ordering::Acquire)
    }

    pub fn set_end_point(&self, end_point: impl Into<String>) {
        self.inner.end_point.store(Arc::new(end_point.into()));
    }

    pub fn set_up(&self, is_up: bool) {
        self.inner.is_up.store(is_up, Ordering::Release);
    }

    pub fn set_responding(&self, is_responding: bool) {
        self.inner.is_responding.store(is_responding, Ordering::Release);
    }

    /// Copies endpoint and liveness flags from `other` into this instance.
    pub fn update_from(&self, other: &Peer) {
        if Self::same_instance(self, other) {
            return;
        }
        self.set_end_point(other.end_point());
        self.set_up(other.is_up());
        self.set_responding(other.is_responding());
    }

    pub fn same_instance(left: &Peer, right: &Peer) -> bool {
        Arc::ptr_eq(&left.inner, &right.inner)
    }

    fn record(&self) -> PeerRecord {
        PeerRecord {
            id: self.id().clone(),
            end_point: self.end_point(),
            is_up: self.is_up(),
            is_responding: self.is_responding(),
        }
    }
}

impl From<PeerRecord> for Peer {
    fn from(record: PeerRecord) -> Self {
        Peer::with_state(
            record.id,
            record.end_point,
            record.is_up,
            record.is_responding,
        )
    }
}

impl From<Peer> for PeerRecord {
    fn from(peer: Peer) -> Self {
        peer.record()
    }
}

impl PartialEq for Peer {
    fn eq(&self, other: &Self) -> bool {
        Self::same_instance(self, other) || self.record() == other.record()
    }
}

impl Eq for Peer {}

impl Debug for Peer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("id", self.id())
            .field("end_point", &self.end_point())
            .field("is_up", &self.is_up())
            .field("is_responding", &self.is_responding())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::Peer;
    use crate::peer::PeerId;

    #[test]
    fn clones_observe_state_changes() {
        let peer = Peer::new(PeerId::new("Abc.A.0"), "tcp://a:1");
        let holder = peer.clone();

        peer.set_responding(false);
        peer.set_end_point("tcp://a:2");

        assert!(!holder.is_responding());
        assert_eq!(holder.end_point(), "tcp://a:2");
        assert!(Peer::same_instance(&peer, &holder));
    }

    #[test]
    fn detached_copy_does_not_share_state() {
        let peer = Peer::new(PeerId::new("Abc.A.0"), "tcp://a:1");
        let copy = peer.detached_copy();

        peer.set_up(false);

        assert!(copy.is_up());
        assert!(!Peer::same_instance(&peer, &copy));
    }

    #[test]
    fn serde_round_trip_keeps_flags() {
        let peer = Peer::with_state(PeerId::new("Abc.A.0"), "tcp://a:1", false, true);

        let json = serde_json::to_string(&peer).expect("serialize");
        let decoded: Peer = serde_json::from_str(&json).expect("deserialize");

        assert_eq!(decoded, peer);
        assert!(!Peer::same_instance(&decoded, &peer));
        assert!(!decoded.is_up());
    }
}
