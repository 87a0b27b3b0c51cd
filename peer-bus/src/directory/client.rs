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

//! Directory client state machine.
//!
//! The client owns the local view of every known peer. It is fed by two paths that
//! race with each other: the registration handshake, which returns a snapshot of all
//! peers, and the directory events delivered by the transport. Events that arrive while
//! a registration is in flight are buffered and applied, in arrival order, once the
//! snapshot has been merged.
//!
//! Event application is serialized by an internal lock; reads (`get_peers_handling_message`,
//! descriptor queries) never take it.

use super::directory_selector::DirectoryPeerSelector;
use super::dispatcher::DirectoryDispatcher;
use super::peer_entry::{is_stale, PeerEntry, SubscriptionIndex};
use super::protocol::{
    error_codes, CommandResult, DirectoryCommand, DirectoryEvent, RegisterPeerCommand,
    UnregisterPeerCommand, UpdatePeerSubscriptionsCommand,
};
use super::timestamp::{Clock, SystemClock, UniqueTimestampProvider};
use super::{PeerDirectory, PeerUpdateAction, PeerUpdated};
use crate::config::BusConfiguration;
use crate::error::BusError;
use crate::message::{BusMessage, TransportMessage};
use crate::observability::{events, fields};
use crate::peer::{Peer, PeerDescriptor, PeerId};
use crate::routing::{MessageBinding, Subscription};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

const COMPONENT: &str = "directory_client";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegistrationState {
    Unregistered,
    Registering,
    Registered,
}

pub struct PeerDirectoryClient {
    configuration: BusConfiguration,
    dispatcher: Arc<dyn DirectoryDispatcher>,
    directory_selector: DirectoryPeerSelector,
    timestamps: UniqueTimestampProvider,
    peers: DashMap<PeerId, PeerEntry>,
    subscription_index: SubscriptionIndex,
    self_peer: Mutex<Option<Peer>>,
    state: Mutex<RegistrationState>,
    events_received_during_registration: Mutex<Option<VecDeque<DirectoryEvent>>>,
    update_lock: Mutex<()>,
    peer_updates: broadcast::Sender<PeerUpdated>,
}

impl PeerDirectoryClient {
    pub fn new(configuration: BusConfiguration, dispatcher: Arc<dyn DirectoryDispatcher>) -> Self {
        Self::with_clock(configuration, dispatcher, Arc::new(SystemClock))
    }

    pub fn with_clock(
        configuration: BusConfiguration,
        dispatcher: Arc<dyn DirectoryDispatcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (peer_updates, _) = broadcast::channel(configuration.peer_update_queue_size.max(1));

        Self {
            directory_selector: DirectoryPeerSelector::new(&configuration),
            timestamps: UniqueTimestampProvider::new(clock),
            configuration,
            dispatcher,
            peers: DashMap::new(),
            subscription_index: SubscriptionIndex::default(),
            self_peer: Mutex::new(None),
            state: Mutex::new(RegistrationState::Unregistered),
            events_received_during_registration: Mutex::new(None),
            update_lock: Mutex::new(()),
            peer_updates,
        }
    }

    /// Registers `self_peer` on the first directory peer that accepts it.
    ///
    /// Clears the known peers, then merges the snapshot returned by the directory.
    /// Directory events handled meanwhile are applied after the snapshot, in arrival
    /// order, whether the registration succeeded or not.
    pub async fn register(
        &self,
        self_peer: Peer,
        subscriptions: Vec<Subscription>,
    ) -> Result<(), BusError> {
        *self.lock_registration_buffer() = Some(VecDeque::new());
        self.set_state(RegistrationState::Registering);

        let descriptor = PeerDescriptor::new(
            self_peer.clone(),
            subscriptions,
            self.configuration.is_persistent,
            Some(self.timestamps.next_utc_timestamp()),
        );

        {
            let _update = self.lock_updates();
            self.peers.clear();
            self.subscription_index.clear();

            let mut entry = PeerEntry::with_peer(&descriptor, self_peer.clone());
            entry.replace_subscriptions(
                &descriptor.subscriptions,
                descriptor.timestamp_utc,
                &self.subscription_index,
            );
            self.peers.insert(descriptor.peer_id().clone(), entry);
        }
        *self.self_peer.lock().unwrap_or_else(PoisonError::into_inner) = Some(self_peer);

        let result = self.register_on_directory(&descriptor).await;

        self.drain_events_received_during_registration();
        self.set_state(if result.is_ok() {
            RegistrationState::Registered
        } else {
            RegistrationState::Unregistered
        });
        result
    }

    /// Replaces the subscriptions of the local peer, locally and on the directory.
    pub async fn update_subscriptions(
        &self,
        subscriptions: Vec<Subscription>,
    ) -> Result<(), BusError> {
        let self_peer = self.registered_self_peer()?;
        let timestamp_utc = Some(self.timestamps.next_utc_timestamp());

        {
            let _update = self.lock_updates();
            if let Some(mut entry) = self.peers.get_mut(self_peer.id()) {
                entry.replace_subscriptions(
                    &subscriptions,
                    timestamp_utc,
                    &self.subscription_index,
                );
                entry.timestamp_utc = timestamp_utc;
            }
        }

        let command = DirectoryCommand::UpdatePeerSubscriptions(UpdatePeerSubscriptionsCommand {
            peer_id: self_peer.id().clone(),
            subscriptions,
            timestamp_utc,
        });
        let directory_peers = self.directory_selector.get_peers();
        self.send_to_any_directory(command, "update subscriptions", directory_peers).await
    }

    /// Unregisters the local peer, trying the directory peers of the last selection.
    pub async fn unregister(&self) -> Result<(), BusError> {
        let self_peer = self.registered_self_peer()?;

        let command = DirectoryCommand::UnregisterPeer(UnregisterPeerCommand {
            peer_id: self_peer.id().clone(),
            peer_end_point: Some(self_peer.end_point()),
            timestamp_utc: Some(self.timestamps.next_utc_timestamp()),
        });
        let directory_peers = self.directory_selector.get_peers_from_cache();
        self.send_to_any_directory(command, "unregister", directory_peers).await?;

        self.set_state(RegistrationState::Unregistered);
        Ok(())
    }

    /// Applies a directory event, or buffers it while a registration is in flight.
    pub fn handle(&self, event: DirectoryEvent) {
        let Some(event) = self.buffer_if_registering(event) else {
            return;
        };

        let _update = self.lock_updates();
        self.apply(event);
    }

    /// Handles `message` if it carries a directory event; returns whether it did.
    pub fn handle_transport_message(&self, message: &TransportMessage) -> Result<bool, BusError> {
        match DirectoryEvent::from_transport_message(message)? {
            Some(event) => {
                self.handle(event);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn get_peers_handling_message(&self, binding: &MessageBinding) -> Vec<Peer> {
        self.subscription_index
            .get(&binding.message_type_id)
            .map(|tree| Arc::clone(tree.value()))
            .map(|tree| tree.get_peers(&binding.routing_key))
            .unwrap_or_default()
    }

    pub fn get_peers_handling<M: BusMessage>(&self, message: &M) -> Vec<Peer> {
        self.get_peers_handling_message(&MessageBinding::from_message(message))
    }

    pub fn get_peer_descriptor(&self, peer_id: &PeerId) -> Option<PeerDescriptor> {
        self.peers.get(peer_id).map(|entry| entry.to_descriptor())
    }

    /// Every known peer, ordered by id.
    pub fn get_peer_descriptors(&self) -> Vec<PeerDescriptor> {
        let mut descriptors: Vec<PeerDescriptor> = self
            .peers
            .iter()
            .map(|entry| entry.to_descriptor())
            .collect();
        descriptors.sort_by(|left, right| left.peer_id().cmp(right.peer_id()));
        descriptors
    }

    /// The shared instance of a known peer.
    pub fn get_peer(&self, peer_id: &PeerId) -> Option<Peer> {
        self.peers.get(peer_id).map(|entry| entry.peer.clone())
    }

    pub fn is_persistent(&self, peer_id: &PeerId) -> bool {
        self.peers
            .get(peer_id)
            .map(|entry| entry.is_persistent)
            .unwrap_or(false)
    }

    pub fn self_peer(&self) -> Option<Peer> {
        self.self_peer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn registration_state(&self) -> RegistrationState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe_peer_updates(&self) -> broadcast::Receiver<PeerUpdated> {
        self.peer_updates.subscribe()
    }

    async fn register_on_directory(&self, descriptor: &PeerDescriptor) -> Result<(), BusError> {
        let timeout = self.configuration.registration_timeout();
        let directory_peers = self.directory_selector.get_peers();

        info!(
            event = events::DIRECTORY_REGISTER_START,
            component = COMPONENT,
            peer_id = %descriptor.peer_id(),
            directory_peers = %fields::format_peers(&directory_peers),
            "registering on directory"
        );

        for directory_peer in &directory_peers {
            match self.try_register_on(directory_peer, descriptor, timeout).await {
                Ok(true) => {
                    self.directory_selector.clear_faulty(directory_peer.id());
                    info!(
                        event = events::DIRECTORY_REGISTER_OK,
                        component = COMPONENT,
                        peer_id = %descriptor.peer_id(),
                        directory_peer = %directory_peer.id(),
                        known_peers = self.peers.len(),
                        "registered on directory"
                    );
                    return Ok(());
                }
                Ok(false) => self.directory_selector.set_faulty(directory_peer.id()),
                Err(err) => {
                    warn!(
                        event = events::DIRECTORY_REGISTER_ATTEMPT_FAILED,
                        component = COMPONENT,
                        directory_peer = %directory_peer.id(),
                        err = %err,
                        "registration attempt failed"
                    );
                    self.directory_selector.set_faulty(directory_peer.id());
                }
            }
        }

        Err(BusError::RegistrationTimeout {
            tried: fields::format_peers(&directory_peers),
            timeout,
        })
    }

    /// Returns `Ok(false)` when the directory peer rejected the registration.
    async fn try_register_on(
        &self,
        directory_peer: &Peer,
        descriptor: &PeerDescriptor,
        timeout: Duration,
    ) -> Result<bool, BusError> {
        let command = DirectoryCommand::RegisterPeer(RegisterPeerCommand {
            peer: descriptor.clone(),
        });
        let result = self.send_with_timeout(command, directory_peer, timeout).await?;

        if !result.is_success() {
            let reason = match result.error_code {
                error_codes::PEER_ALREADY_EXISTS => "peer_already_exists",
                error_codes::INVALID_PEER_DESCRIPTOR => "invalid_peer_descriptor",
                _ => "directory_error",
            };
            warn!(
                event = events::DIRECTORY_REGISTER_REJECTED,
                component = COMPONENT,
                directory_peer = %directory_peer.id(),
                error_code = result.error_code,
                reason,
                "directory rejected the registration"
            );
            return Ok(false);
        }

        let Some(response) = result.response else {
            warn!(
                event = events::DIRECTORY_REGISTER_REJECTED,
                component = COMPONENT,
                directory_peer = %directory_peer.id(),
                reason = "missing_response",
                "directory did not return the known peers"
            );
            return Ok(false);
        };

        let _update = self.lock_updates();
        for peer_descriptor in &response.peer_descriptors {
            self.upsert_peer_entry(peer_descriptor, true);
        }
        Ok(true)
    }

    async fn send_to_any_directory(
        &self,
        command: DirectoryCommand,
        operation: &'static str,
        directory_peers: Vec<Peer>,
    ) -> Result<(), BusError> {
        let timeout = self.configuration.registration_timeout();

        for directory_peer in &directory_peers {
            match self.send_with_timeout(command.clone(), directory_peer, timeout).await {
                Ok(result) if result.is_success() => {
                    self.directory_selector.clear_faulty(directory_peer.id());
                    return Ok(());
                }
                Ok(result) => warn!(
                    event = events::DIRECTORY_COMMAND_FAILED,
                    component = COMPONENT,
                    operation,
                    directory_peer = %directory_peer.id(),
                    error_code = result.error_code,
                    "directory command failed"
                ),
                Err(err) => warn!(
                    event = events::DIRECTORY_COMMAND_FAILED,
                    component = COMPONENT,
                    operation,
                    directory_peer = %directory_peer.id(),
                    err = %err,
                    "directory command failed"
                ),
            }
            self.directory_selector.set_faulty(directory_peer.id());
        }

        Err(BusError::DirectoryUnreachable {
            operation,
            tried: fields::format_peers(&directory_peers),
        })
    }

    async fn send_with_timeout(
        &self,
        command: DirectoryCommand,
        directory_peer: &Peer,
        timeout: Duration,
    ) -> Result<CommandResult, BusError> {
        match tokio::time::timeout(timeout, self.dispatcher.send(command, directory_peer)).await {
            Ok(result) => result,
            Err(_) => Err(BusError::transport(format!(
                "no response from {} after {timeout:?}",
                directory_peer.id()
            ))),
        }
    }

    fn registered_self_peer(&self) -> Result<Peer, BusError> {
        if self.registration_state() != RegistrationState::Registered {
            return Err(BusError::NotRegistered);
        }
        self.self_peer().ok_or(BusError::NotRegistered)
    }

    fn buffer_if_registering(&self, event: DirectoryEvent) -> Option<DirectoryEvent> {
        let mut buffer = self.lock_registration_buffer();
        match buffer.as_mut() {
            Some(queue) => {
                debug!(
                    event = events::DIRECTORY_EVENT_BUFFERED,
                    component = COMPONENT,
                    peer_id = %event.peer_id(),
                    directory_event = event.name(),
                    "registration in flight, buffering directory event"
                );
                queue.push_back(event);
                None
            }
            None => Some(event),
        }
    }

    /// Applies buffered events until the buffer stays empty, then removes it.
    fn drain_events_received_during_registration(&self) {
        let mut drained = 0;
        loop {
            let batch = {
                let mut buffer = self.lock_registration_buffer();
                let batch = buffer.as_mut().map(std::mem::take).unwrap_or_default();
                if batch.is_empty() {
                    *buffer = None;
                }
                batch
            };
            if batch.is_empty() {
                break;
            }

            drained += batch.len();
            let _update = self.lock_updates();
            for event in batch {
                self.apply(event);
            }
        }

        debug!(
            event = events::DIRECTORY_EVENT_BUFFER_DRAINED,
            component = COMPONENT,
            drained,
            "applied directory events received during registration"
        );
    }

    fn apply(&self, event: DirectoryEvent) {
        let event_name = event.name();
        match event {
            DirectoryEvent::PeerStarted(event) => {
                if self.upsert_peer_entry(&event.peer_descriptor, true) {
                    self.publish(event.peer_descriptor.peer_id(), PeerUpdateAction::Started);
                }
            }
            DirectoryEvent::PeerStopped(event) => {
                let applied = self.update_known_peer(&event.peer_id, event_name, |entry| {
                    if !self.accept_timestamp(entry, event.timestamp_utc, event_name) {
                        return false;
                    }
                    entry.peer.set_up(false);
                    entry.peer.set_responding(false);
                    entry.timestamp_utc = event.timestamp_utc;
                    true
                });
                if applied {
                    self.publish(&event.peer_id, PeerUpdateAction::Stopped);
                }
            }
            DirectoryEvent::PeerDecommissioned(event) => {
                match self.peers.remove(&event.peer_id) {
                    Some((_, mut entry)) => {
                        entry.remove_all_subscriptions(&self.subscription_index);
                        self.publish(&event.peer_id, PeerUpdateAction::Decommissioned);
                    }
                    None => self.log_unknown_peer(&event.peer_id, event_name),
                }
            }
            DirectoryEvent::PeerSubscriptionsUpdated(event) => {
                if self.upsert_peer_entry(&event.peer_descriptor, false) {
                    self.publish(event.peer_descriptor.peer_id(), PeerUpdateAction::Updated);
                }
            }
            DirectoryEvent::PeerSubscriptionsAdded(event) => {
                let applied = self.update_known_peer(&event.peer_id, event_name, |entry| {
                    entry.add_subscriptions(
                        &event.subscriptions,
                        event.timestamp_utc,
                        &self.subscription_index,
                    );
                    true
                });
                if applied {
                    self.publish(&event.peer_id, PeerUpdateAction::Updated);
                }
            }
            DirectoryEvent::PeerSubscriptionsRemoved(event) => {
                let applied = self.update_known_peer(&event.peer_id, event_name, |entry| {
                    entry.remove_subscriptions(
                        &event.subscriptions,
                        event.timestamp_utc,
                        &self.subscription_index,
                    );
                    true
                });
                if applied {
                    self.publish(&event.peer_id, PeerUpdateAction::Updated);
                }
            }
            DirectoryEvent::PeerSubscriptionsForTypesUpdated(event) => {
                let applied = self.update_known_peer(&event.peer_id, event_name, |entry| {
                    entry.set_subscriptions_for_types(
                        &event.subscriptions_for_type,
                        event.timestamp_utc,
                        &self.subscription_index,
                    );
                    true
                });
                if applied {
                    self.publish(&event.peer_id, PeerUpdateAction::Updated);
                }
            }
            DirectoryEvent::PeerNotResponding(event) => {
                self.set_responding(&event.peer_id, false, event_name);
            }
            DirectoryEvent::PeerResponding(event) => {
                self.set_responding(&event.peer_id, true, event_name);
            }
        }
    }

    /// Creates or refreshes an entry from a full descriptor; returns whether it applied.
    ///
    /// `refresh_peer` copies the endpoint and liveness flags into the shared peer
    /// instance, which a subscriptions-only update must not do.
    fn upsert_peer_entry(&self, descriptor: &PeerDescriptor, refresh_peer: bool) -> bool {
        let timestamp_utc = descriptor.timestamp_utc;

        match self.peers.entry(descriptor.peer_id().clone()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if is_stale(entry.timestamp_utc, timestamp_utc) {
                    self.log_stale(descriptor.peer_id(), entry.timestamp_utc, timestamp_utc);
                    return false;
                }
                if refresh_peer {
                    entry.peer.update_from(&descriptor.peer);
                    entry.is_persistent = descriptor.is_persistent;
                    entry.has_debugger_attached = descriptor.has_debugger_attached;
                }
                entry.timestamp_utc = timestamp_utc;
                entry.replace_subscriptions(
                    &descriptor.subscriptions,
                    timestamp_utc,
                    &self.subscription_index,
                );
            }
            Entry::Vacant(vacant) => {
                let mut entry = PeerEntry::new(descriptor);
                entry.replace_subscriptions(
                    &descriptor.subscriptions,
                    timestamp_utc,
                    &self.subscription_index,
                );
                vacant.insert(entry);
            }
        }
        true
    }

    fn update_known_peer<F>(&self, peer_id: &PeerId, event_name: &'static str, update: F) -> bool
    where
        F: FnOnce(&mut PeerEntry) -> bool,
    {
        match self.peers.get_mut(peer_id) {
            Some(mut entry) => update(entry.value_mut()),
            None => {
                self.log_unknown_peer(peer_id, event_name);
                false
            }
        }
    }

    /// Responding state is applied without timestamp ordering.
    fn set_responding(&self, peer_id: &PeerId, is_responding: bool, event_name: &'static str) {
        let applied = self.update_known_peer(peer_id, event_name, |entry| {
            entry.peer.set_responding(is_responding);
            true
        });
        if applied {
            self.publish(peer_id, PeerUpdateAction::Updated);
        }
    }

    fn accept_timestamp(
        &self,
        entry: &PeerEntry,
        incoming: Option<DateTime<Utc>>,
        event_name: &'static str,
    ) -> bool {
        if is_stale(entry.timestamp_utc, incoming) {
            info!(
                event = events::DIRECTORY_EVENT_STALE,
                component = COMPONENT,
                peer_id = %entry.peer.id(),
                directory_event = event_name,
                known_timestamp = ?entry.timestamp_utc,
                incoming_timestamp = ?incoming,
                "ignoring stale directory event"
            );
            return false;
        }
        true
    }

    fn log_stale(
        &self,
        peer_id: &PeerId,
        known: Option<DateTime<Utc>>,
        incoming: Option<DateTime<Utc>>,
    ) {
        info!(
            event = events::DIRECTORY_EVENT_STALE,
            component = COMPONENT,
            peer_id = %peer_id,
            known_timestamp = ?known,
            incoming_timestamp = ?incoming,
            "ignoring stale peer descriptor"
        );
    }

    fn log_unknown_peer(&self, peer_id: &PeerId, event_name: &'static str) {
        debug!(
            event = events::DIRECTORY_EVENT_UNKNOWN_PEER,
            component = COMPONENT,
            peer_id = %peer_id,
            directory_event = event_name,
            "ignoring directory event for unknown peer"
        );
    }

    fn publish(&self, peer_id: &PeerId, action: PeerUpdateAction) {
        debug!(
            event = events::DIRECTORY_PEER_UPDATED,
            component = COMPONENT,
            peer_id = %peer_id,
            action = ?action,
            "peer updated"
        );

        let update = PeerUpdated {
            peer_id: peer_id.clone(),
            action,
        };
        if self.peer_updates.send(update).is_err() {
            trace!(
                event = events::DIRECTORY_PEER_UPDATE_NOT_BROADCAST,
                component = COMPONENT,
                peer_id = %peer_id,
                "no peer update subscriber"
            );
        }
    }

    fn set_state(&self, state: RegistrationState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn lock_updates(&self) -> MutexGuard<'_, ()> {
        self.update_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_registration_buffer(&self) -> MutexGuard<'_, Option<VecDeque<DirectoryEvent>>> {
        self.events_received_during_registration
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl PeerDirectory for PeerDirectoryClient {
    fn get_peers_handling_message(&self, binding: &MessageBinding) -> Vec<Peer> {
        PeerDirectoryClient::get_peers_handling_message(self, binding)
    }

    fn get_peer_descriptor(&self, peer_id: &PeerId) -> Option<PeerDescriptor> {
        PeerDirectoryClient::get_peer_descriptor(self, peer_id)
    }

    fn is_persistent(&self, peer_id: &PeerId) -> bool {
        PeerDirectoryClient::is_persistent(self, peer_id)
    }

    fn subscribe_peer_updates(&self) -> broadcast::Receiver<PeerUpdated> {
        PeerDirectoryClient::subscribe_peer_updates(self)
    }
}

#[cfg(test)]
mod tests {
    use super::{PeerDirectoryClient, RegistrationState};
    use crate::config::BusConfiguration;
    use crate::directory::protocol::{
        error_codes, CommandResult, DirectoryCommand, DirectoryEvent, PeerDecommissioned,
        PeerNotResponding, PeerResponding, PeerStarted, PeerStopped, PeerSubscriptionsUpdated,
        RegisterPeerResponse,
    };
    use crate::directory::{DirectoryDispatcher, PeerUpdateAction};
    use crate::error::BusError;
    use crate::message::MessageTypeId;
    use crate::peer::{Peer, PeerDescriptor, PeerId};
    use crate::routing::{BindingKey, MessageBinding, Subscription};
    use async_trait::async_trait;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use tokio::sync::{oneshot, Notify};

    enum Reply {
        Result(CommandResult),
        Hang,
    }

    #[derive(Default)]
    struct RecordingDispatcher {
        sent: Mutex<Vec<(DirectoryCommand, PeerId)>>,
        replies: Mutex<HashMap<PeerId, Reply>>,
        entered: Notify,
        gate: Mutex<Option<oneshot::Receiver<()>>>,
    }

    impl RecordingDispatcher {
        fn reply(self, directory_peer: usize, reply: Reply) -> Self {
            self.replies
                .lock()
                .unwrap()
                .insert(PeerId::directory(directory_peer), reply);
            self
        }

        fn gated(self, gate: oneshot::Receiver<()>) -> Self {
            *self.gate.lock().unwrap() = Some(gate);
            self
        }

        fn sent(&self) -> Vec<(DirectoryCommand, PeerId)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DirectoryDispatcher for RecordingDispatcher {
        async fn send(
            &self,
            command: DirectoryCommand,
            directory_peer: &Peer,
        ) -> Result<CommandResult, BusError> {
            self.sent
                .lock()
                .unwrap()
                .push((command.clone(), directory_peer.id().clone()));
            self.entered.notify_one();

            let gate = self.gate.lock().unwrap().take();
            if let Some(gate) = gate {
                let _ = gate.await;
            }

            let reply = self.replies.lock().unwrap().remove(directory_peer.id());
            match reply {
                Some(Reply::Result(result)) => Ok(result),
                Some(Reply::Hang) => futures::future::pending().await,
                None => Ok(CommandResult::success(match command {
                    DirectoryCommand::RegisterPeer(_) => Some(RegisterPeerResponse {
                        peer_descriptors: Vec::new(),
                    }),
                    _ => None,
                })),
            }
        }
    }

    fn configuration() -> BusConfiguration {
        BusConfiguration {
            directory_service_end_points: vec![
                "tcp://directory-a:129".to_string(),
                "tcp://directory-b:129".to_string(),
            ],
            registration_timeout_ms: 500,
            ..BusConfiguration::default()
        }
    }

    fn t(seconds: i64) -> Option<DateTime<Utc>> {
        Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap() + Duration::seconds(seconds))
    }

    fn self_peer() -> Peer {
        Peer::new(PeerId::new("Abc.Self.0"), "tcp://self:1")
    }

    fn subscription(message_type: &str, binding_key: &str) -> Subscription {
        Subscription::new(MessageTypeId::new(message_type), BindingKey::parse(binding_key))
    }

    fn descriptor(id: &str, subscriptions: Vec<Subscription>, seconds: i64) -> PeerDescriptor {
        PeerDescriptor::new(
            Peer::new(PeerId::new(id), format!("tcp://{id}:1")),
            subscriptions,
            true,
            t(seconds),
        )
    }

    fn handlers(
        client: &PeerDirectoryClient,
        message_type: &str,
        routing_key: &str,
    ) -> Vec<String> {
        let binding = MessageBinding::new(
            MessageTypeId::new(message_type),
            BindingKey::parse(routing_key),
        );
        let mut ids: Vec<String> = client
            .get_peers_handling_message(&binding)
            .iter()
            .map(|peer| peer.id().to_string())
            .collect();
        ids.sort();
        ids
    }

    async fn registered_client() -> PeerDirectoryClient {
        let client = PeerDirectoryClient::new(
            configuration(),
            Arc::new(RecordingDispatcher::default()),
        );
        client
            .register(self_peer(), vec![subscription("T.Command", "")])
            .await
            .expect("registration");
        client
    }

    #[tokio::test]
    async fn register_merges_the_directory_snapshot() {
        let response = RegisterPeerResponse {
            peer_descriptors: vec![descriptor(
                "Abc.Other.0",
                vec![subscription("T.Event", "a.*")],
                0,
            )],
        };
        let dispatcher = Arc::new(
            RecordingDispatcher::default()
                .reply(0, Reply::Result(CommandResult::success(Some(response)))),
        );
        let client = PeerDirectoryClient::new(configuration(), dispatcher.clone());

        client
            .register(self_peer(), vec![subscription("T.Command", "")])
            .await
            .expect("registration");

        assert_eq!(client.registration_state(), RegistrationState::Registered);
        assert_eq!(handlers(&client, "T.Command", ""), vec!["Abc.Self.0"]);
        assert_eq!(handlers(&client, "T.Event", "a.b"), vec!["Abc.Other.0"]);
        assert_eq!(client.get_peer_descriptors().len(), 2);
        assert_eq!(dispatcher.sent().len(), 1);
        assert_eq!(dispatcher.sent()[0].1, PeerId::directory(0));
    }

    #[tokio::test(start_paused = true)]
    async fn register_falls_back_to_the_next_directory_peer() {
        let dispatcher = Arc::new(RecordingDispatcher::default().reply(0, Reply::Hang));
        let client = PeerDirectoryClient::new(configuration(), dispatcher.clone());

        client.register(self_peer(), Vec::new()).await.expect("registration");

        let targets: Vec<PeerId> = dispatcher.sent().into_iter().map(|(_, peer)| peer).collect();
        assert_eq!(targets, vec![PeerId::directory(0), PeerId::directory(1)]);
    }

    #[tokio::test]
    async fn register_fails_when_every_directory_peer_rejects() {
        let dispatcher = Arc::new(
            RecordingDispatcher::default()
                .reply(0, Reply::Result(CommandResult::error(error_codes::PEER_ALREADY_EXISTS)))
                .reply(
                    1,
                    Reply::Result(CommandResult::error(error_codes::INVALID_PEER_DESCRIPTOR)),
                ),
        );
        let client = PeerDirectoryClient::new(configuration(), dispatcher);

        let result = client.register(self_peer(), Vec::new()).await;

        assert!(matches!(result, Err(BusError::RegistrationTimeout { .. })));
        assert_eq!(client.registration_state(), RegistrationState::Unregistered);
    }

    #[tokio::test]
    async fn events_received_during_registration_are_applied_after_the_snapshot() {
        let (release, gate) = oneshot::channel();
        let dispatcher = Arc::new(RecordingDispatcher::default().gated(gate));
        let client = PeerDirectoryClient::new(configuration(), dispatcher.clone());

        let register = client.register(self_peer(), Vec::new());
        let concurrent_event = async {
            dispatcher.entered.notified().await;
            client.handle(DirectoryEvent::PeerStarted(PeerStarted {
                peer_descriptor: descriptor("Abc.Other.0", vec![subscription("T.Event", "")], 0),
            }));
            assert!(client.get_peer_descriptor(&PeerId::new("Abc.Other.0")).is_none());
            release.send(()).expect("release registration");
        };

        let (result, ()) = tokio::join!(register, concurrent_event);

        result.expect("registration");
        assert!(client.get_peer_descriptor(&PeerId::new("Abc.Other.0")).is_some());
        assert_eq!(handlers(&client, "T.Event", ""), vec!["Abc.Other.0"]);
    }

    #[tokio::test]
    async fn stale_subscriptions_update_is_ignored() {
        let client = registered_client().await;
        client.handle(DirectoryEvent::PeerStarted(PeerStarted {
            peer_descriptor: descriptor("Abc.Other.0", Vec::new(), 0),
        }));

        client.handle(DirectoryEvent::PeerSubscriptionsUpdated(PeerSubscriptionsUpdated {
            peer_descriptor: descriptor("Abc.Other.0", vec![subscription("T.Event", "new")], 10),
        }));
        client.handle(DirectoryEvent::PeerSubscriptionsUpdated(PeerSubscriptionsUpdated {
            peer_descriptor: descriptor("Abc.Other.0", vec![subscription("T.Event", "old")], 5),
        }));

        assert_eq!(handlers(&client, "T.Event", "new"), vec!["Abc.Other.0"]);
        assert!(handlers(&client, "T.Event", "old").is_empty());
    }

    #[tokio::test]
    async fn peer_stopped_is_visible_through_every_handle() {
        let client = registered_client().await;
        client.handle(DirectoryEvent::PeerStarted(PeerStarted {
            peer_descriptor: descriptor("Abc.Other.0", vec![subscription("T.Event", "")], 0),
        }));
        let routed = handlers_peers(&client, "T.Event");

        client.handle(DirectoryEvent::PeerStopped(PeerStopped {
            peer_id: PeerId::new("Abc.Other.0"),
            peer_end_point: None,
            timestamp_utc: t(1),
        }));

        assert!(!routed[0].is_up());
        assert!(!routed[0].is_responding());
        let peer = client.get_peer(&PeerId::new("Abc.Other.0")).expect("known peer");
        assert!(Peer::same_instance(&peer, &routed[0]));
    }

    fn handlers_peers(client: &PeerDirectoryClient, message_type: &str) -> Vec<Peer> {
        client.get_peers_handling_message(&MessageBinding::new(
            MessageTypeId::new(message_type),
            BindingKey::empty(),
        ))
    }

    #[tokio::test]
    async fn stale_peer_stopped_is_ignored() {
        let client = registered_client().await;
        client.handle(DirectoryEvent::PeerStarted(PeerStarted {
            peer_descriptor: descriptor("Abc.Other.0", Vec::new(), 10),
        }));

        client.handle(DirectoryEvent::PeerStopped(PeerStopped {
            peer_id: PeerId::new("Abc.Other.0"),
            peer_end_point: None,
            timestamp_utc: t(5),
        }));

        let peer = client.get_peer(&PeerId::new("Abc.Other.0")).expect("known peer");
        assert!(peer.is_up());
    }

    #[tokio::test]
    async fn decommission_removes_the_peer_and_notifies_observers() {
        let client = registered_client().await;
        let mut updates = client.subscribe_peer_updates();
        client.handle(DirectoryEvent::PeerStarted(PeerStarted {
            peer_descriptor: descriptor("Abc.Other.0", vec![subscription("T.Event", "")], 0),
        }));

        client.handle(DirectoryEvent::PeerDecommissioned(PeerDecommissioned {
            peer_id: PeerId::new("Abc.Other.0"),
        }));

        assert!(client.get_peer(&PeerId::new("Abc.Other.0")).is_none());
        assert!(handlers(&client, "T.Event", "").is_empty());
        assert_eq!(updates.recv().await.unwrap().action, PeerUpdateAction::Started);
        assert_eq!(updates.recv().await.unwrap().action, PeerUpdateAction::Decommissioned);
    }

    #[tokio::test]
    async fn responding_state_is_applied_without_timestamp_ordering() {
        let client = registered_client().await;
        client.handle(DirectoryEvent::PeerStarted(PeerStarted {
            peer_descriptor: descriptor("Abc.Other.0", Vec::new(), 10),
        }));
        let peer = client.get_peer(&PeerId::new("Abc.Other.0")).expect("known peer");

        client.handle(DirectoryEvent::PeerNotResponding(PeerNotResponding {
            peer_id: PeerId::new("Abc.Other.0"),
        }));
        assert!(!peer.is_responding());

        client.handle(DirectoryEvent::PeerResponding(PeerResponding {
            peer_id: PeerId::new("Abc.Other.0"),
            timestamp_utc: t(0),
        }));
        assert!(peer.is_responding());
    }

    #[tokio::test]
    async fn update_subscriptions_requires_registration() {
        let client = PeerDirectoryClient::new(
            configuration(),
            Arc::new(RecordingDispatcher::default()),
        );

        let result = client.update_subscriptions(Vec::new()).await;

        assert!(matches!(result, Err(BusError::NotRegistered)));
    }

    #[tokio::test]
    async fn update_subscriptions_applies_locally_with_increasing_timestamps() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let client = PeerDirectoryClient::new(configuration(), dispatcher.clone());
        client
            .register(self_peer(), vec![subscription("T.Command", "")])
            .await
            .expect("registration");

        client
            .update_subscriptions(vec![subscription("T.Event", "a")])
            .await
            .expect("first update");
        client
            .update_subscriptions(vec![subscription("T.Event", "b")])
            .await
            .expect("second update");

        assert!(handlers(&client, "T.Command", "").is_empty());
        assert!(handlers(&client, "T.Event", "a").is_empty());
        assert_eq!(handlers(&client, "T.Event", "b"), vec!["Abc.Self.0"]);

        let timestamps: Vec<_> = dispatcher
            .sent()
            .into_iter()
            .filter_map(|(command, _)| match command {
                DirectoryCommand::UpdatePeerSubscriptions(command) => command.timestamp_utc,
                _ => None,
            })
            .collect();
        assert_eq!(timestamps.len(), 2);
        assert!(timestamps[0] < timestamps[1]);
    }

    #[tokio::test]
    async fn unregister_uses_the_cached_directory_selection() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let client = PeerDirectoryClient::new(configuration(), dispatcher.clone());
        client.register(self_peer(), Vec::new()).await.expect("registration");

        client.unregister().await.expect("unregister");

        let (command, target) = dispatcher.sent().pop().expect("unregister command");
        assert!(matches!(command, DirectoryCommand::UnregisterPeer(_)));
        assert_eq!(target, PeerId::directory(0));
        assert_eq!(client.registration_state(), RegistrationState::Unregistered);
    }
}
