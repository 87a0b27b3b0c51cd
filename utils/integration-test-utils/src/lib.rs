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

//! In-memory fakes shared by the `peer-bus` integration tests.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use peer_bus::directory::protocol::RegisterPeerResponse;
use peer_bus::directory::{CommandResult, DirectoryCommand, DirectoryDispatcher};
use peer_bus::{
    BindingKey, BusError, BusMessage, MessageId, Peer, PeerDescriptor, PeerId, Subscription,
    Transport, TransportListener, TransportMessage,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Once};
use tokio::sync::{oneshot, Notify};
use tracing::debug;
use tracing_subscriber::EnvFilter;

static INIT_LOGGING: Once = Once::new();

/// Installs a test-friendly subscriber once per process. `RUST_LOG` overrides the filter.
pub fn init_logging() {
    INIT_LOGGING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Fixed reference instant, offset by `seconds`.
pub fn timestamp(seconds: i64) -> Option<DateTime<Utc>> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0)
        .single()
        .map(|origin| origin + Duration::seconds(seconds))
}

pub fn peer(id: &str) -> Peer {
    Peer::new(PeerId::new(id), format!("tcp://{id}:1"))
}

pub fn descriptor(id: &str, subscriptions: Vec<Subscription>, seconds: i64) -> PeerDescriptor {
    PeerDescriptor::new(peer(id), subscriptions, true, timestamp(seconds))
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FakeCommand {
    pub value: u32,
}

impl BusMessage for FakeCommand {
    const MESSAGE_TYPE: &'static str = "Tests.FakeCommand";
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FakeEvent {
    pub value: u32,
}

impl BusMessage for FakeEvent {
    const MESSAGE_TYPE: &'static str = "Tests.FakeEvent";
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FakeTransientEvent;

impl BusMessage for FakeTransientEvent {
    const MESSAGE_TYPE: &'static str = "Tests.FakeTransientEvent";
    const IS_PERSISTENT: bool = false;
}

/// Command routed on `{id}.{name}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FakeRoutableCommand {
    pub id: u32,
    pub name: String,
}

impl BusMessage for FakeRoutableCommand {
    const MESSAGE_TYPE: &'static str = "Tests.FakeRoutableCommand";

    fn routing_key(&self) -> BindingKey {
        BindingKey::new([self.id.to_string(), self.name.clone()])
    }
}

/// Transport that records what is sent and lets tests push inbound messages.
pub struct FakeTransport {
    peer_id: PeerId,
    end_point: String,
    sent: Mutex<Vec<(TransportMessage, Vec<PeerId>)>>,
    acked: Mutex<Vec<MessageId>>,
    listener: Mutex<Option<Arc<dyn TransportListener>>>,
    sent_signal: Notify,
}

impl FakeTransport {
    pub fn new(peer_id: &str) -> Self {
        Self {
            peer_id: PeerId::new(peer_id),
            end_point: format!("tcp://{peer_id}:1"),
            sent: Mutex::new(Vec::new()),
            acked: Mutex::new(Vec::new()),
            listener: Mutex::new(None),
            sent_signal: Notify::new(),
        }
    }

    /// Delivers `message` to the installed listener, as if it came off the wire.
    pub async fn receive(&self, message: TransportMessage) -> Result<(), BusError> {
        let listener = self.listener.lock().unwrap().clone();
        match listener {
            Some(listener) => listener.on_message_received(message).await,
            None => panic!("no listener installed on {}", self.peer_id),
        }
    }

    pub fn sent_of<M: BusMessage>(&self) -> Vec<(M, Vec<PeerId>)> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(message, _)| message.is::<M>())
            .map(|(message, peers)| (message.decode().expect("decode sent message"), peers.clone()))
            .collect()
    }

    pub fn sent_messages(&self) -> Vec<(TransportMessage, Vec<PeerId>)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn acked(&self) -> Vec<MessageId> {
        self.acked.lock().unwrap().clone()
    }

    /// Waits until at least one message of type `M` was sent and returns the latest.
    pub async fn wait_for_sent<M: BusMessage>(&self) -> (M, Vec<PeerId>) {
        loop {
            let notified = self.sent_signal.notified();
            if let Some(sent) = self.sent_of::<M>().pop() {
                return sent;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl Transport for FakeTransport {
    fn peer_id(&self) -> PeerId {
        self.peer_id.clone()
    }

    fn inbound_end_point(&self) -> String {
        self.end_point.clone()
    }

    fn set_listener(&self, listener: Arc<dyn TransportListener>) {
        *self.listener.lock().unwrap() = Some(listener);
    }

    async fn send(&self, message: TransportMessage, peers: Vec<Peer>) -> Result<(), BusError> {
        let peer_ids: Vec<PeerId> = peers.iter().map(|peer| peer.id().clone()).collect();
        debug!(message_type = %message.message_type_id, ?peer_ids, "fake transport send");
        self.sent.lock().unwrap().push((message, peer_ids));
        self.sent_signal.notify_waiters();
        Ok(())
    }

    async fn ack_message(&self, message: &TransportMessage) -> Result<(), BusError> {
        self.acked.lock().unwrap().push(message.id);
        Ok(())
    }
}

/// Listener that keeps every delivered message, in delivery order.
#[derive(Default)]
pub struct RecordingListener {
    received: Mutex<Vec<TransportMessage>>,
}

impl RecordingListener {
    pub fn received(&self) -> Vec<TransportMessage> {
        self.received.lock().unwrap().clone()
    }

    pub fn received_ids(&self) -> Vec<MessageId> {
        self.received().iter().map(|message| message.id).collect()
    }
}

#[async_trait]
impl TransportListener for RecordingListener {
    async fn on_message_received(&self, message: TransportMessage) -> Result<(), BusError> {
        self.received.lock().unwrap().push(message);
        Ok(())
    }
}

/// Scripted reply of a directory peer.
pub enum DirectoryReply {
    Result(CommandResult),
    /// Never answers; the caller's timeout decides.
    Hang,
}

/// Dispatcher answering on behalf of the directory peers.
///
/// Unscripted registrations succeed with the default snapshot. A gate, when set,
/// holds the first command until it is released.
#[derive(Default)]
pub struct FakeDirectoryDispatcher {
    sent: Mutex<Vec<(DirectoryCommand, PeerId)>>,
    replies: Mutex<HashMap<PeerId, DirectoryReply>>,
    snapshot: Mutex<Vec<PeerDescriptor>>,
    gate: Mutex<Option<oneshot::Receiver<()>>>,
    entered: Notify,
}

impl FakeDirectoryDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(self, peer_descriptors: Vec<PeerDescriptor>) -> Self {
        *self.snapshot.lock().unwrap() = peer_descriptors;
        self
    }

    pub fn with_reply(self, directory_index: usize, reply: DirectoryReply) -> Self {
        self.replies
            .lock()
            .unwrap()
            .insert(PeerId::directory(directory_index), reply);
        self
    }

    /// Returns the sender that releases the gated command.
    pub fn gated(&self) -> oneshot::Sender<()> {
        let (release, gate) = oneshot::channel();
        *self.gate.lock().unwrap() = Some(gate);
        release
    }

    /// Resolves once a command reached the dispatcher.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    pub fn sent(&self) -> Vec<(DirectoryCommand, PeerId)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl DirectoryDispatcher for FakeDirectoryDispatcher {
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
            Some(DirectoryReply::Result(result)) => Ok(result),
            Some(DirectoryReply::Hang) => futures::future::pending().await,
            None => Ok(CommandResult::success(match command {
                DirectoryCommand::RegisterPeer(_) => Some(RegisterPeerResponse {
                    peer_descriptors: self.snapshot.lock().unwrap().clone(),
                }),
                _ => None,
            })),
        }
    }
}
