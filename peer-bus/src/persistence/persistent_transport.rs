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

//! Transport decorator running the replay protocol of persistent peers.
//!
//! A persistent peer goes through three reception phases after it registers:
//!
//! - **Replay**: messages replayed by the persistence service are delivered at once;
//!   live messages are parked in the pending queue.
//! - **Safety**: replayed and live messages both go through the pending queue, drained
//!   in arrival order by a worker task that skips ids it already delivered.
//! - **Normal**: live messages are delivered directly.
//!
//! Non-persistent peers stay in the `NoReplay` phase and deliver everything directly.
//! Phases only move forward.
//!
//! Outbound, persistent messages sent to persistent peers are mirrored to the
//! persistence service as `PersistMessageCommand`s. While the service is down or
//! cannot be resolved through the directory, those commands (and `MessageHandled`
//! acks) are buffered and flushed when the service is seen starting again.

use super::protocol::{
    MessageHandled, MessageReplayed, PersistMessageCommand, PersistenceStopping,
    PersistenceStoppingAck, ReplayPhaseEnded, SafetyPhaseEnded, StartMessageReplayCommand,
};
use crate::config::BusConfiguration;
use crate::directory::{PeerDirectory, PeerUpdateAction, PeerUpdated};
use crate::error::BusError;
use crate::message::{BusMessage, MessageId, MessageTypeId, TransportMessage};
use crate::observability::{events, fields};
use crate::peer::{Peer, PeerId};
use crate::routing::{BindingKey, MessageBinding};
use crate::runtime::worker_runtime;
use crate::transport::{Transport, TransportListener};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const COMPONENT: &str = "persistent_transport";

/// Observable reception phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PhaseKind {
    NoReplay,
    Replay,
    Safety,
    Normal,
}

enum Phase {
    NoReplay,
    Replay {
        /// Set once the replay was requested.
        replay_id: Option<Uuid>,
        pending: UnboundedSender<TransportMessage>,
        pending_receiver: UnboundedReceiver<TransportMessage>,
    },
    Safety {
        replay_id: Uuid,
        pending: UnboundedSender<TransportMessage>,
        worker: JoinHandle<()>,
    },
    Normal,
}

impl Phase {
    fn kind(&self) -> PhaseKind {
        match self {
            Phase::NoReplay => PhaseKind::NoReplay,
            Phase::Replay { .. } => PhaseKind::Replay,
            Phase::Safety { .. } => PhaseKind::Safety,
            Phase::Normal => PhaseKind::Normal,
        }
    }

    fn replay_id(&self) -> Option<Uuid> {
        match self {
            Phase::Replay { replay_id, .. } => *replay_id,
            Phase::Safety { replay_id, .. } => Some(*replay_id),
            Phase::NoReplay | Phase::Normal => None,
        }
    }
}

/// Delivery side shared with the safety worker.
#[derive(Default)]
struct InboundDelivery {
    listener: RwLock<Option<Arc<dyn TransportListener>>>,
    received_ids: Mutex<HashSet<MessageId>>,
}

impl InboundDelivery {
    async fn deliver(&self, message: TransportMessage) -> Result<(), BusError> {
        let listener = self
            .listener
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        match listener {
            Some(listener) => listener.on_message_received(message).await,
            None => {
                warn!(
                    event = events::DELIVERY_FAILED,
                    component = COMPONENT,
                    msg_id = %fields::format_message_id(&message),
                    msg_type = %fields::format_message_type(&message),
                    reason = "no_listener",
                    "dropping inbound message"
                );
                Ok(())
            }
        }
    }

    /// Returns false when the id was already recorded.
    fn record_received(&self, message_id: MessageId) -> bool {
        self.received_ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(message_id)
    }

    fn clear_received(&self) {
        self.received_ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[derive(Default)]
struct PersistenceLink {
    is_down: bool,
    buffer: Vec<TransportMessage>,
}

struct Shared {
    inner: Arc<dyn Transport>,
    directory: Arc<dyn PeerDirectory>,
    configuration: BusConfiguration,
    inbound: Arc<InboundDelivery>,
    phase: tokio::sync::Mutex<Phase>,
    persistence: tokio::sync::Mutex<PersistenceLink>,
    replay_started: watch::Sender<bool>,
    peer_update_loop: Mutex<Option<JoinHandle<()>>>,
}

pub struct PersistentTransport {
    shared: Arc<Shared>,
}

impl PersistentTransport {
    /// Wraps `inner` and installs itself as its listener.
    pub fn new(
        configuration: BusConfiguration,
        inner: Arc<dyn Transport>,
        directory: Arc<dyn PeerDirectory>,
    ) -> Self {
        let phase = if configuration.is_persistent {
            let (pending, pending_receiver) = mpsc::unbounded_channel();
            Phase::Replay {
                replay_id: None,
                pending,
                pending_receiver,
            }
        } else {
            Phase::NoReplay
        };

        let (replay_started, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            inner: Arc::clone(&inner),
            directory,
            configuration,
            inbound: Arc::new(InboundDelivery::default()),
            phase: tokio::sync::Mutex::new(phase),
            persistence: tokio::sync::Mutex::new(PersistenceLink::default()),
            replay_started,
            peer_update_loop: Mutex::new(None),
        });

        inner.set_listener(Arc::new(InnerTransportListener {
            shared: Arc::downgrade(&shared),
        }));

        Self { shared }
    }

    /// Starts following persistence service updates. Must run inside a Tokio runtime.
    pub fn start(&self) {
        let updates = self.shared.directory.subscribe_peer_updates();
        let shared = Arc::downgrade(&self.shared);
        let handle = worker_runtime::spawn_peer_update_loop(updates, move |updates| {
            run_peer_update_loop(shared, updates)
        });

        let previous = self
            .shared
            .peer_update_loop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Requests the replay and waits for the first replay event.
    ///
    /// No-op for non-persistent peers. Fails with [`BusError::PersistenceUnreachable`]
    /// when nothing arrives within the start-replay timeout.
    pub async fn on_registered(&self) -> Result<(), BusError> {
        let replay_id = {
            let mut phase = self.shared.phase.lock().await;
            match &mut *phase {
                Phase::Replay { replay_id, .. } => *replay_id.get_or_insert_with(Uuid::new_v4),
                _ => return Ok(()),
            }
        };

        let persistence_peer = self.shared.resolve_persistence_peer();
        info!(
            event = events::REPLAY_START,
            component = COMPONENT,
            replay_id = %replay_id,
            persistence_peer = ?persistence_peer.as_ref().map(|peer| peer.id().to_string()),
            "requesting message replay"
        );

        if let Some(persistence_peer) = persistence_peer {
            let command = TransportMessage::encode(
                &StartMessageReplayCommand { replay_id },
                self.shared.inner.originator(),
            )?;
            self.shared.inner.send(command, vec![persistence_peer]).await?;
        }

        let timeout = self.shared.configuration.start_replay_timeout();
        let mut replay_started = self.shared.replay_started.subscribe();
        let started = matches!(
            tokio::time::timeout(timeout, replay_started.wait_for(|started| *started)).await,
            Ok(Ok(_))
        );
        if !started {
            return Err(BusError::PersistenceUnreachable { timeout });
        }
        Ok(())
    }

    /// Stops the peer-update loop and joins the safety worker, if any.
    pub async fn stop(&self) {
        let peer_update_loop = self
            .shared
            .peer_update_loop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(peer_update_loop) = peer_update_loop {
            peer_update_loop.abort();
        }

        let mut phase = self.shared.phase.lock().await;
        if !matches!(&*phase, Phase::Safety { .. }) {
            return;
        }
        if let Phase::Safety { pending, worker, .. } =
            std::mem::replace(&mut *phase, Phase::Normal)
        {
            drop(pending);
            self.shared.join_safety_worker(worker).await;
        }
    }

    pub async fn current_phase(&self) -> PhaseKind {
        self.shared.phase.lock().await.kind()
    }

    /// Number of persistence messages waiting for the service to come back.
    pub async fn pending_persistence_count(&self) -> usize {
        self.shared.persistence.lock().await.buffer.len()
    }
}

#[async_trait]
impl Transport for PersistentTransport {
    fn peer_id(&self) -> PeerId {
        self.shared.inner.peer_id()
    }

    fn inbound_end_point(&self) -> String {
        self.shared.inner.inbound_end_point()
    }

    fn set_listener(&self, listener: Arc<dyn TransportListener>) {
        *self
            .shared
            .inbound
            .listener
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(listener);
    }

    /// Sends `message`, marking the copies for persistent peers and mirroring them to
    /// the persistence service.
    async fn send(&self, message: TransportMessage, peers: Vec<Peer>) -> Result<(), BusError> {
        if !message.is_persistent {
            return self.shared.inner.send(message, peers).await;
        }

        let (persistent_peers, transient_peers): (Vec<Peer>, Vec<Peer>) = peers
            .into_iter()
            .partition(|peer| self.shared.directory.is_persistent(peer.id()));

        if !transient_peers.is_empty() {
            self.shared.inner.send(message.clone(), transient_peers).await?;
        }
        if persistent_peers.is_empty() {
            return Ok(());
        }

        let mut persisted = message;
        persisted.was_persisted = true;
        let target_peer_ids = persistent_peers.iter().map(|peer| peer.id().clone()).collect();
        self.shared.inner.send(persisted.clone(), persistent_peers).await?;

        let command = TransportMessage::encode(
            &PersistMessageCommand {
                message: persisted,
                target_peer_ids,
            },
            self.shared.inner.originator(),
        )?;
        self.shared.send_to_persistence(command).await;
        Ok(())
    }

    async fn ack_message(&self, message: &TransportMessage) -> Result<(), BusError> {
        if self.shared.configuration.is_persistent && message.requires_persistence_ack() {
            let handled = TransportMessage::encode(
                &MessageHandled {
                    message_id: message.id,
                },
                self.shared.inner.originator(),
            )?;
            self.shared.send_to_persistence(handled).await;
        }
        self.shared.inner.ack_message(message).await
    }
}

impl Shared {
    async fn on_message_received(&self, message: TransportMessage) -> Result<(), BusError> {
        if message.is::<PersistenceStopping>() {
            return self.on_persistence_stopping(&message).await;
        }
        if message.is::<MessageReplayed>() {
            return self.on_message_replayed(message.decode()?).await;
        }
        if message.is::<ReplayPhaseEnded>() {
            let event: ReplayPhaseEnded = message.decode()?;
            self.on_replay_phase_ended(event.replay_id).await;
            return Ok(());
        }
        if message.is::<SafetyPhaseEnded>() {
            let event: SafetyPhaseEnded = message.decode()?;
            self.on_safety_phase_ended(event.replay_id).await;
            return Ok(());
        }
        self.on_real_time_message(message).await
    }

    async fn on_real_time_message(&self, message: TransportMessage) -> Result<(), BusError> {
        let phase = self.phase.lock().await;
        match &*phase {
            Phase::Replay { pending, .. } | Phase::Safety { pending, .. } => {
                enqueue(pending, message);
                Ok(())
            }
            Phase::NoReplay | Phase::Normal => {
                drop(phase);
                self.inbound.deliver(message).await
            }
        }
    }

    async fn on_message_replayed(&self, replayed: MessageReplayed) -> Result<(), BusError> {
        let phase = self.phase.lock().await;
        if !self.is_current_replay(&phase, replayed.replay_id, MessageReplayed::MESSAGE_TYPE) {
            return Ok(());
        }
        self.replay_started.send_replace(true);

        let mut message = replayed.message;
        message.force_persistence_ack = true;

        match &*phase {
            Phase::Safety { pending, .. } => {
                enqueue(pending, message);
                Ok(())
            }
            _ => {
                self.inbound.record_received(message.id);
                self.inbound.deliver(message).await
            }
        }
    }

    async fn on_replay_phase_ended(&self, replay_id: Uuid) {
        let mut phase = self.phase.lock().await;
        if !matches!(&*phase, Phase::Replay { .. })
            || !self.is_current_replay(&phase, replay_id, ReplayPhaseEnded::MESSAGE_TYPE)
        {
            return;
        }
        self.replay_started.send_replace(true);

        if let Phase::Replay {
            pending,
            pending_receiver,
            ..
        } = std::mem::replace(&mut *phase, Phase::Normal)
        {
            let inbound = Arc::clone(&self.inbound);
            let worker = worker_runtime::spawn_queue_worker(pending_receiver, move |pending| {
                run_safety_worker(inbound, pending)
            });
            *phase = Phase::Safety {
                replay_id,
                pending,
                worker,
            };
        }

        info!(
            event = events::REPLAY_PHASE_ENDED,
            component = COMPONENT,
            replay_id = %replay_id,
            "replay phase ended, entering safety phase"
        );
    }

    async fn on_safety_phase_ended(&self, replay_id: Uuid) {
        let mut phase = self.phase.lock().await;
        if !matches!(&*phase, Phase::Safety { .. })
            || !self.is_current_replay(&phase, replay_id, SafetyPhaseEnded::MESSAGE_TYPE)
        {
            return;
        }

        if let Phase::Safety { pending, worker, .. } = std::mem::replace(&mut *phase, Phase::Normal)
        {
            drop(pending);
            self.join_safety_worker(worker).await;
        }
        self.inbound.clear_received();

        info!(
            event = events::SAFETY_PHASE_ENDED,
            component = COMPONENT,
            replay_id = %replay_id,
            "safety phase ended, delivering messages directly"
        );
    }

    /// Checks the replay id against the current session, logging mismatches.
    fn is_current_replay(
        &self,
        phase: &Phase,
        replay_id: Uuid,
        replay_event: &'static str,
    ) -> bool {
        if phase.replay_id() == Some(replay_id) {
            return true;
        }
        warn!(
            event = events::REPLAY_EVENT_IGNORED,
            component = COMPONENT,
            replay_event,
            replay_id = %replay_id,
            current_replay_id = ?phase.replay_id(),
            phase = ?phase.kind(),
            "ignoring replay event"
        );
        false
    }

    async fn join_safety_worker(&self, worker: JoinHandle<()>) {
        let timeout = self.configuration.safety_worker_join_timeout();
        match tokio::time::timeout(timeout, worker).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!(
                event = events::SAFETY_WORKER_JOIN_TIMEOUT,
                component = COMPONENT,
                err = %err,
                "safety worker terminated abnormally"
            ),
            Err(_) => error!(
                event = events::SAFETY_WORKER_JOIN_TIMEOUT,
                component = COMPONENT,
                timeout = ?timeout,
                "safety worker did not terminate in time"
            ),
        }
    }

    async fn on_persistence_stopping(&self, message: &TransportMessage) -> Result<(), BusError> {
        info!(
            event = events::PERSISTENCE_STOPPING,
            component = COMPONENT,
            src = %fields::format_originator(message),
            "persistence service is stopping"
        );
        self.persistence.lock().await.is_down = true;

        let ack = self
            .inner
            .create_infrastructure_message(MessageTypeId::of::<PersistenceStoppingAck>());
        let persistence_peer = Peer::new(
            message.originator.sender_id.clone(),
            message.originator.sender_end_point.clone(),
        );
        self.inner.send(ack, vec![persistence_peer]).await
    }

    async fn on_peer_updated(&self, update: PeerUpdated) {
        if !update.peer_id.is_persistence() {
            return;
        }

        let mut link = self.persistence.lock().await;
        match update.action {
            PeerUpdateAction::Decommissioned => {
                link.is_down = true;
                info!(
                    event = events::PERSISTENCE_DOWN,
                    component = COMPONENT,
                    peer_id = %update.peer_id,
                    "persistence service decommissioned"
                );
            }
            PeerUpdateAction::Started => {
                link.is_down = false;
                info!(
                    event = events::PERSISTENCE_UP,
                    component = COMPONENT,
                    peer_id = %update.peer_id,
                    buffered = link.buffer.len(),
                    "persistence service started"
                );
                self.flush_persistence_buffer(&mut link).await;
            }
            PeerUpdateAction::Stopped | PeerUpdateAction::Updated => {}
        }
    }

    async fn send_to_persistence(&self, message: TransportMessage) {
        let mut link = self.persistence.lock().await;
        let persistence_peer = if link.is_down {
            None
        } else {
            self.resolve_persistence_peer()
        };

        let Some(persistence_peer) = persistence_peer else {
            debug!(
                event = events::PERSISTENCE_BUFFERED,
                component = COMPONENT,
                msg_id = %fields::format_message_id(&message),
                msg_type = %fields::format_message_type(&message),
                buffered = link.buffer.len() + 1,
                "persistence service unavailable, buffering"
            );
            link.buffer.push(message);
            return;
        };

        if let Err(err) = self.inner.send(message.clone(), vec![persistence_peer]).await {
            warn!(
                event = events::PERSISTENCE_SEND_FAILED,
                component = COMPONENT,
                msg_id = %fields::format_message_id(&message),
                err = %err,
                "unable to reach persistence service, buffering"
            );
            link.buffer.push(message);
        }
    }

    async fn flush_persistence_buffer(&self, link: &mut PersistenceLink) {
        if link.buffer.is_empty() {
            return;
        }
        let Some(persistence_peer) = self.resolve_persistence_peer() else {
            warn!(
                event = events::PERSISTENCE_FLUSH,
                component = COMPONENT,
                buffered = link.buffer.len(),
                reason = "unresolved_persistence_peer",
                "keeping persistence buffer"
            );
            return;
        };

        info!(
            event = events::PERSISTENCE_FLUSH,
            component = COMPONENT,
            buffered = link.buffer.len(),
            persistence_peer = %persistence_peer.id(),
            "flushing persistence buffer"
        );

        let mut buffered = std::mem::take(&mut link.buffer).into_iter();
        while let Some(message) = buffered.next() {
            let sent = self
                .inner
                .send(message.clone(), vec![persistence_peer.clone()])
                .await;
            if let Err(err) = sent {
                warn!(
                    event = events::PERSISTENCE_SEND_FAILED,
                    component = COMPONENT,
                    msg_id = %fields::format_message_id(&message),
                    err = %err,
                    "persistence flush interrupted"
                );
                link.buffer.push(message);
                link.buffer.extend(buffered);
                return;
            }
        }
    }

    /// Rebuilds the link state from the directory after missed peer updates.
    async fn resync_persistence_link(&self) {
        let mut link = self.persistence.lock().await;
        if !link.is_down || self.resolve_persistence_peer().is_none() {
            return;
        }
        link.is_down = false;
        info!(
            event = events::PERSISTENCE_UP,
            component = COMPONENT,
            buffered = link.buffer.len(),
            "persistence service resolved after missed updates"
        );
        self.flush_persistence_buffer(&mut link).await;
    }

    /// The first live peer handling `PersistMessageCommand`.
    fn resolve_persistence_peer(&self) -> Option<Peer> {
        let binding = MessageBinding::new(
            MessageTypeId::of::<PersistMessageCommand>(),
            BindingKey::empty(),
        );
        self.directory
            .get_peers_handling_message(&binding)
            .into_iter()
            .find(|peer| peer.is_up())
    }
}

fn enqueue(pending: &UnboundedSender<TransportMessage>, message: TransportMessage) {
    if let Err(err) = pending.send(message) {
        let message = err.0;
        error!(
            event = events::DELIVERY_FAILED,
            component = COMPONENT,
            msg_id = %fields::format_message_id(&message),
            reason = "pending_queue_closed",
            "dropping inbound message"
        );
    }
}

async fn run_safety_worker(
    inbound: Arc<InboundDelivery>,
    mut pending: UnboundedReceiver<TransportMessage>,
) {
    while let Some(message) = pending.recv().await {
        if !inbound.record_received(message.id) {
            debug!(
                event = events::SAFETY_DUPLICATE_SKIPPED,
                component = COMPONENT,
                msg_id = %fields::format_message_id(&message),
                "skipping already delivered message"
            );
            continue;
        }

        let msg_id = message.id;
        if let Err(err) = inbound.deliver(message).await {
            error!(
                event = events::SAFETY_DELIVERY_FAILED,
                component = COMPONENT,
                msg_id = %msg_id,
                err = %err,
                "unable to deliver pending message"
            );
        }
    }
}

async fn run_peer_update_loop(shared: Weak<Shared>, mut updates: broadcast::Receiver<PeerUpdated>) {
    loop {
        match updates.recv().await {
            Ok(update) => {
                let Some(shared) = shared.upgrade() else {
                    return;
                };
                shared.on_peer_updated(update).await;
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(
                    event = events::PEER_UPDATE_LOOP_LAGGED,
                    component = COMPONENT,
                    skipped,
                    "peer update loop lagged, resyncing persistence link"
                );
                let Some(shared) = shared.upgrade() else {
                    return;
                };
                shared.resync_persistence_link().await;
            }
            Err(RecvError::Closed) => {
                debug!(
                    event = events::PEER_UPDATE_LOOP_CLOSED,
                    component = COMPONENT,
                    "peer update feed closed"
                );
                return;
            }
        }
    }
}

/// Listener installed on the inner transport; does not keep the decorator alive.
struct InnerTransportListener {
    shared: Weak<Shared>,
}

#[async_trait]
impl TransportListener for InnerTransportListener {
    async fn on_message_received(&self, message: TransportMessage) -> Result<(), BusError> {
        match self.shared.upgrade() {
            Some(shared) => shared.on_message_received(message).await,
            None => Ok(()),
        }
    }
}
