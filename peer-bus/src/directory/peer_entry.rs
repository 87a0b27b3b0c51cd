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

//! Directory-side state of one known peer.

use super::protocol::SubscriptionsForType;
use crate::message::MessageTypeId;
use crate::peer::{Peer, PeerDescriptor};
use crate::routing::{PeerSubscriptionTree, Subscription};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Subscription trees shared by every peer entry, one per message type.
pub(crate) type SubscriptionIndex = DashMap<MessageTypeId, Arc<PeerSubscriptionTree>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct SubscriptionStatus {
    enabled: bool,
    timestamp_utc: Option<DateTime<Utc>>,
}

/// Returns true when `incoming` is strictly older than `existing`.
///
/// A missing timestamp on either side never makes an update stale.
pub(crate) fn is_stale(
    existing: Option<DateTime<Utc>>,
    incoming: Option<DateTime<Utc>>,
) -> bool {
    matches!((existing, incoming), (Some(existing), Some(incoming)) if existing > incoming)
}

/// A known peer and the status of every subscription it ever announced.
///
/// Removed subscriptions are kept as disabled tombstones carrying the removal
/// timestamp, so a late add with an older timestamp does not resurrect them. Tombstones
/// are purged on the next full replacement of the subscription set.
///
/// Not synchronized: the directory client serializes writers.
pub(crate) struct PeerEntry {
    pub(crate) peer: Peer,
    pub(crate) is_persistent: bool,
    pub(crate) timestamp_utc: Option<DateTime<Utc>>,
    pub(crate) has_debugger_attached: bool,
    subscription_statuses: HashMap<Subscription, SubscriptionStatus>,
}

impl PeerEntry {
    /// Creates an entry owning a private copy of the descriptor's peer.
    pub(crate) fn new(descriptor: &PeerDescriptor) -> Self {
        Self::with_peer(descriptor, descriptor.peer.detached_copy())
    }

    pub(crate) fn with_peer(descriptor: &PeerDescriptor, peer: Peer) -> Self {
        Self {
            peer,
            is_persistent: descriptor.is_persistent,
            timestamp_utc: descriptor.timestamp_utc,
            has_debugger_attached: descriptor.has_debugger_attached,
            subscription_statuses: HashMap::new(),
        }
    }

    pub(crate) fn to_descriptor(&self) -> PeerDescriptor {
        PeerDescriptor {
            peer: self.peer.clone(),
            subscriptions: self.enabled_subscriptions(),
            is_persistent: self.is_persistent,
            timestamp_utc: self.timestamp_utc,
            has_debugger_attached: self.has_debugger_attached,
        }
    }

    /// Enabled subscriptions, ordered by message type then binding key.
    pub(crate) fn enabled_subscriptions(&self) -> Vec<Subscription> {
        let mut subscriptions: Vec<Subscription> = self
            .subscription_statuses
            .iter()
            .filter(|(_, status)| status.enabled)
            .map(|(subscription, _)| subscription.clone())
            .collect();
        subscriptions.sort_by(|left, right| {
            left.message_type_id
                .cmp(&right.message_type_id)
                .then_with(|| left.binding_key.to_string().cmp(&right.binding_key.to_string()))
        });
        subscriptions
    }

    /// Replaces the whole subscription set.
    ///
    /// Subscriptions present before and after are left untouched, vanished ones are
    /// disabled and new ones are enabled, both at `timestamp_utc`.
    pub(crate) fn replace_subscriptions(
        &mut self,
        subscriptions: &[Subscription],
        timestamp_utc: Option<DateTime<Utc>>,
        index: &SubscriptionIndex,
    ) {
        self.subscription_statuses.retain(|_, status| status.enabled);

        let replacement: HashSet<&Subscription> = subscriptions.iter().collect();
        let removed: Vec<Subscription> = self
            .subscription_statuses
            .keys()
            .filter(|subscription| !replacement.contains(subscription))
            .cloned()
            .collect();

        for subscription in removed {
            self.set_subscription_status(subscription, false, timestamp_utc, index);
        }
        for subscription in subscriptions {
            if !self.subscription_statuses.contains_key(subscription) {
                self.set_subscription_status(subscription.clone(), true, timestamp_utc, index);
            }
        }
    }

    /// Replaces the binding keys of each listed message type, leaving other types alone.
    pub(crate) fn set_subscriptions_for_types(
        &mut self,
        subscriptions_for_types: &[SubscriptionsForType],
        timestamp_utc: Option<DateTime<Utc>>,
        index: &SubscriptionIndex,
    ) {
        for subscriptions_for_type in subscriptions_for_types {
            let replacement: HashSet<Subscription> =
                subscriptions_for_type.subscriptions().collect();
            let removed: Vec<Subscription> = self
                .subscription_statuses
                .iter()
                .filter(|(subscription, status)| {
                    status.enabled
                        && subscription.message_type_id == subscriptions_for_type.message_type_id
                        && !replacement.contains(*subscription)
                })
                .map(|(subscription, _)| subscription.clone())
                .collect();

            for subscription in removed {
                self.set_subscription_status(subscription, false, timestamp_utc, index);
            }
            for subscription in replacement {
                self.set_subscription_status(subscription, true, timestamp_utc, index);
            }
        }
    }

    pub(crate) fn add_subscriptions(
        &mut self,
        subscriptions: &[Subscription],
        timestamp_utc: Option<DateTime<Utc>>,
        index: &SubscriptionIndex,
    ) {
        for subscription in subscriptions {
            self.set_subscription_status(subscription.clone(), true, timestamp_utc, index);
        }
    }

    pub(crate) fn remove_subscriptions(
        &mut self,
        subscriptions: &[Subscription],
        timestamp_utc: Option<DateTime<Utc>>,
        index: &SubscriptionIndex,
    ) {
        for subscription in subscriptions {
            self.set_subscription_status(subscription.clone(), false, timestamp_utc, index);
        }
    }

    /// Drops every subscription from the trees, used when the peer is decommissioned.
    pub(crate) fn remove_all_subscriptions(&mut self, index: &SubscriptionIndex) {
        for (subscription, status) in self.subscription_statuses.drain() {
            if status.enabled {
                remove_from_index(index, &self.peer, &subscription);
            }
        }
    }

    /// Applies one status change; returns false when it was rejected.
    ///
    /// A change is rejected when the known status is newer, or when it would not
    /// change the enabled flag.
    fn set_subscription_status(
        &mut self,
        subscription: Subscription,
        enabled: bool,
        timestamp_utc: Option<DateTime<Utc>>,
        index: &SubscriptionIndex,
    ) -> bool {
        let incoming = SubscriptionStatus {
            enabled,
            timestamp_utc,
        };

        match self.subscription_statuses.get_mut(&subscription) {
            Some(status) => {
                if is_stale(status.timestamp_utc, timestamp_utc) || status.enabled == enabled {
                    return false;
                }
                *status = incoming;
            }
            None => {
                self.subscription_statuses
                    .insert(subscription.clone(), incoming);
                if !enabled {
                    return true;
                }
            }
        }

        if enabled {
            add_to_index(index, &self.peer, &subscription);
        } else {
            remove_from_index(index, &self.peer, &subscription);
        }
        true
    }
}

fn add_to_index(index: &SubscriptionIndex, peer: &Peer, subscription: &Subscription) {
    let tree = Arc::clone(
        index
            .entry(subscription.message_type_id.clone())
            .or_insert_with(|| Arc::new(PeerSubscriptionTree::new()))
            .value(),
    );
    tree.add_subscription(peer, subscription);
}

fn remove_from_index(index: &SubscriptionIndex, peer: &Peer, subscription: &Subscription) {
    let Some(tree) = index
        .get(&subscription.message_type_id)
        .map(|tree| Arc::clone(tree.value()))
    else {
        return;
    };
    tree.remove_subscription(peer, subscription);
    if tree.is_empty() {
        index.remove_if(&subscription.message_type_id, |_, tree| tree.is_empty());
    }
}
