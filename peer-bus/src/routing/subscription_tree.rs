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

//! Per-message-type trie of subscribed peers.
//!
//! Nodes are indexed by token position. Each node holds the peers whose binding key
//! terminates there, at most one `#` child, at most one `*` child and a map of
//! literal children. Peers subscribed with an empty binding key live in a separate
//! root-level list.
//!
//! Published node state (child maps, child slots, peer lists) is never mutated in
//! place: writers build a new snapshot and swap it in, so [`PeerSubscriptionTree::get_peers`]
//! runs lock-free next to a writer. Writers are serialized by an internal lock.
//! Nodes are never pruned; [`PeerSubscriptionTree::is_empty`] walks the whole tree.

use crate::peer::{Peer, PeerId};
use crate::routing::binding_key::{SHARP, STAR};
use crate::routing::subscription::binding_key_matches;
use crate::routing::{BindingKey, Subscription};
use arc_swap::{ArcSwap, ArcSwapOption};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Clone, Copy, PartialEq, Eq)]
enum UpdateAction {
    Add,
    Remove,
}

pub struct PeerSubscriptionTree {
    peers_matching_all_messages: ArcSwap<Vec<Peer>>,
    root: SubscriptionNode,
    write_lock: Mutex<()>,
}

impl Default for PeerSubscriptionTree {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerSubscriptionTree {
    pub fn new() -> Self {
        Self {
            peers_matching_all_messages: ArcSwap::from_pointee(Vec::new()),
            root: SubscriptionNode::new(0),
            write_lock: Mutex::new(()),
        }
    }

    /// Idempotent: a `(peer, binding_key)` pair is stored at most once.
    pub fn add(&self, peer: &Peer, binding_key: &BindingKey) {
        self.update(peer, binding_key, UpdateAction::Add);
    }

    pub fn remove(&self, peer: &Peer, binding_key: &BindingKey) {
        self.update(peer, binding_key, UpdateAction::Remove);
    }

    pub fn add_subscription(&self, peer: &Peer, subscription: &Subscription) {
        self.add(peer, &subscription.binding_key);
    }

    pub fn remove_subscription(&self, peer: &Peer, subscription: &Subscription) {
        self.remove(peer, &subscription.binding_key);
    }

    /// Peers whose binding keys match `routing_key`, deduplicated by [`PeerId`].
    ///
    /// An empty routing key (a message without routing members) reaches every peer of
    /// the tree.
    pub fn get_peers(&self, routing_key: &BindingKey) -> Vec<Peer> {
        let mut collector = PeerCollector::default();
        collector.offer(&self.peers_matching_all_messages.load());

        if routing_key.is_empty() {
            self.root.add_all_peers(&mut collector);
        } else if routing_key.is_joined() {
            let mut path = Vec::new();
            self.root.accept_joined(&mut collector, &mut path, routing_key);
        } else {
            self.root.accept(&mut collector, routing_key);
        }

        collector.into_peers()
    }

    pub fn is_empty(&self) -> bool {
        self.peers_matching_all_messages.load().is_empty() && self.root.is_empty()
    }

    fn update(&self, peer: &Peer, binding_key: &BindingKey, action: UpdateAction) {
        let _writer = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        if binding_key.is_empty() {
            update_peer_list(&self.peers_matching_all_messages, peer, action);
            return;
        }

        self.root.update(peer, binding_key, action);
    }
}

struct SubscriptionNode {
    next_part_index: usize,
    children: ArcSwap<HashMap<String, Arc<SubscriptionNode>>>,
    sharp_node: ArcSwapOption<SubscriptionNode>,
    star_node: ArcSwapOption<SubscriptionNode>,
    peers: ArcSwap<Vec<Peer>>,
}

impl SubscriptionNode {
    fn new(next_part_index: usize) -> Self {
        Self {
            next_part_index,
            children: ArcSwap::from_pointee(HashMap::new()),
            sharp_node: ArcSwapOption::empty(),
            star_node: ArcSwapOption::empty(),
            peers: ArcSwap::from_pointee(Vec::new()),
        }
    }

    fn is_leaf(&self, key: &BindingKey) -> bool {
        self.next_part_index != 0 && self.next_part_index == key.part_count()
    }

    fn update(&self, peer: &Peer, binding_key: &BindingKey, action: UpdateAction) {
        if self.is_leaf(binding_key) {
            update_peer_list(&self.peers, peer, action);
            return;
        }

        let Some(next_part) = binding_key.part(self.next_part_index) else {
            return;
        };

        let child = match (next_part, action) {
            (SHARP, UpdateAction::Add) => Some(self.get_or_create_slot(&self.sharp_node)),
            (STAR, UpdateAction::Add) => Some(self.get_or_create_slot(&self.star_node)),
            (SHARP, UpdateAction::Remove) => self.sharp_node.load_full(),
            (STAR, UpdateAction::Remove) => self.star_node.load_full(),
            (literal, UpdateAction::Add) => Some(self.get_or_create_child(literal)),
            (literal, UpdateAction::Remove) => self.children.load().get(literal).cloned(),
        };

        if let Some(child) = child {
            child.update(peer, binding_key, action);
        }
    }

    fn get_or_create_slot(&self, slot: &ArcSwapOption<SubscriptionNode>) -> Arc<SubscriptionNode> {
        if let Some(existing) = slot.load_full() {
            return existing;
        }
        let created = Arc::new(SubscriptionNode::new(self.next_part_index + 1));
        slot.store(Some(created.clone()));
        created
    }

    fn get_or_create_child(&self, part: &str) -> Arc<SubscriptionNode> {
        if let Some(existing) = self.children.load().get(part) {
            return existing.clone();
        }

        let created = Arc::new(SubscriptionNode::new(self.next_part_index + 1));
        let mut children = HashMap::clone(&self.children.load());
        children.insert(part.to_string(), created.clone());
        self.children.store(Arc::new(children));
        created
    }

    fn accept(&self, collector: &mut PeerCollector, routing_key: &BindingKey) {
        if self.is_leaf(routing_key) {
            collector.offer(&self.peers.load());
            return;
        }

        if let Some(sharp_node) = &*self.sharp_node.load() {
            sharp_node.add_all_peers(collector);
        }

        if let Some(star_node) = &*self.star_node.load() {
            star_node.accept(collector, routing_key);
        }

        let Some(next_part) = routing_key.part(self.next_part_index) else {
            return;
        };
        if let Some(child) = self.children.load().get(next_part) {
            child.accept(collector, routing_key);
        }
    }

    // Joined routing keys cannot be walked token by token: rebuild each terminal
    // pattern from the path and test it.
    fn accept_joined(
        &self,
        collector: &mut PeerCollector,
        path: &mut Vec<String>,
        routing_key: &BindingKey,
    ) {
        let peers = self.peers.load();
        if !peers.is_empty()
            && binding_key_matches(&BindingKey::new(path.iter().cloned()), routing_key)
        {
            collector.offer(&peers);
        }

        for (part, slot) in [(SHARP, &self.sharp_node), (STAR, &self.star_node)] {
            if let Some(node) = &*slot.load() {
                path.push(part.to_string());
                node.accept_joined(collector, path, routing_key);
                path.pop();
            }
        }

        for (part, child) in self.children.load().iter() {
            path.push(part.clone());
            child.accept_joined(collector, path, routing_key);
            path.pop();
        }
    }

    fn add_all_peers(&self, collector: &mut PeerCollector) {
        collector.offer(&self.peers.load());

        if let Some(sharp_node) = &*self.sharp_node.load() {
            sharp_node.add_all_peers(collector);
        }
        if let Some(star_node) = &*self.star_node.load() {
            star_node.add_all_peers(collector);
        }
        for child in self.children.load().values() {
            child.add_all_peers(collector);
        }
    }

    fn is_empty(&self) -> bool {
        self.peers.load().is_empty()
            && slot_is_empty(&self.sharp_node)
            && slot_is_empty(&self.star_node)
            && self.children.load().values().all(|child| child.is_empty())
    }
}

fn slot_is_empty(slot: &ArcSwapOption<SubscriptionNode>) -> bool {
    match &*slot.load() {
        Some(node) => node.is_empty(),
        None => true,
    }
}

fn update_peer_list(list: &ArcSwap<Vec<Peer>>, peer: &Peer, action: UpdateAction) {
    let current = list.load();
    let is_present = current.iter().any(|existing| existing.id() == peer.id());

    match action {
        UpdateAction::Add if !is_present => {
            let mut updated = Vec::with_capacity(current.len() + 1);
            updated.extend(current.iter().cloned());
            updated.push(peer.clone());
            list.store(Arc::new(updated));
        }
        UpdateAction::Remove if is_present => {
            let updated = current
                .iter()
                .filter(|existing| existing.id() != peer.id())
                .cloned()
                .collect();
            list.store(Arc::new(updated));
        }
        _ => {}
    }
}

#[derive(Default)]
struct PeerCollector {
    seen: HashSet<PeerId>,
    peers: Vec<Peer>,
}

impl PeerCollector {
    fn offer(&mut self, peers: &[Peer]) {
        for peer in peers {
            if self.seen.insert(peer.id().clone()) {
                self.peers.push(peer.clone());
            }
        }
    }

    fn into_peers(self) -> Vec<Peer> {
        self.peers
    }
}
