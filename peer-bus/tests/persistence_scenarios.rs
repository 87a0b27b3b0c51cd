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

use integration_test_utils::{
    descriptor, init_logging, peer, FakeDirectoryDispatcher, FakeEvent, FakeTransientEvent,
    FakeTransport, RecordingListener,
};
use peer_bus::directory::protocol::PeerStarted;
use peer_bus::directory::DirectoryEvent;
use peer_bus::persistence::protocol::{
    MessageHandled, MessageReplayed, PersistMessageCommand, PersistenceStopping,
    PersistenceStoppingAck, ReplayPhaseEnded, SafetyPhaseEnded, StartMessageReplayCommand,
};
use peer_bus::{
    BusConfiguration, BusMessage, MessageId, OriginatorInfo, PeerDescriptor, PeerDirectoryClient,
    PeerId, PersistentTransport, PhaseKind, Subscription, Transport, TransportMessage,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

const PERSISTENCE_ID: &str = "Bus.PersistenceService.0";

fn configuration(is_persistent: bool) -> BusConfiguration {
    BusConfiguration {
        directory_service_end_points: vec!["tcp://directory-a:129".to_string()],
        is_persistent,
        start_replay_timeout_ms: 5_000,
        ..BusConfiguration::default()
    }
}

fn persistence_descriptor(seconds: i64) -> PeerDescriptor {
    descriptor(
        PERSISTENCE_ID,
        vec![Subscription::any::<PersistMessageCommand>()],
        seconds,
    )
}

fn from_persistence() -> OriginatorInfo {
    OriginatorInfo::new(PeerId::new(PERSISTENCE_ID), format!("tcp://{PERSISTENCE_ID}:1"))
}

fn live(value: u32) -> TransportMessage {
    let originator = OriginatorInfo::new(PeerId::new("Abc.Sender.0"), "tcp://sender:1");
    TransportMessage::encode(&FakeEvent { value }, originator).expect("encode live message")
}

fn encode<M: BusMessage>(message: &M) -> TransportMessage {
    TransportMessage::encode(message, from_persistence()).expect("encode persistence message")
}

struct Bus {
    inner: Arc<FakeTransport>,
    directory: Arc<PeerDirectoryClient>,
    transport: Arc<PersistentTransport>,
    listener: Arc<RecordingListener>,
}

async fn registered_bus(is_persistent: bool, snapshot: Vec<PeerDescriptor>) -> Bus {
    registered_bus_with(configuration(is_persistent), snapshot).await
}

async fn registered_bus_with(
    configuration: BusConfiguration,
    snapshot: Vec<PeerDescriptor>,
) -> Bus {
    init_logging();
    let dispatcher = Arc::new(FakeDirectoryDispatcher::new().with_snapshot(snapshot));
    let directory = Arc::new(PeerDirectoryClient::new(configuration.clone(), dispatcher));
    directory
        .register(peer("Abc.Self.0"), Vec::new())
        .await
        .expect("registration");

    let inner = Arc::new(FakeTransport::new("Abc.Self.0"));
    let transport = Arc::new(PersistentTransport::new(
        configuration,
        inner.clone(),
        directory.clone(),
    ));
    let listener = Arc::new(RecordingListener::default());
    transport.set_listener(listener.clone());

    Bus {
        inner,
        directory,
        transport,
        listener,
    }
}

#[tokio::test]
async fn every_message_is_delivered_once_across_the_replay_cutover() {
    let bus = registered_bus(true, vec![persistence_descriptor(0)]).await;
    assert_eq!(bus.transport.current_phase().await, PhaseKind::Replay);

    let on_registered = tokio::spawn({
        let transport = Arc::clone(&bus.transport);
        async move { transport.on_registered().await }
    });
    let (start, targets) = bus.inner.wait_for_sent::<StartMessageReplayCommand>().await;
    assert_eq!(targets, [PeerId::new(PERSISTENCE_ID)]);
    let replay_id = start.replay_id;

    let replayed: Vec<TransportMessage> = (0..3).map(live).collect();
    for message in &replayed {
        bus.inner
            .receive(encode(&MessageReplayed {
                replay_id,
                message: message.clone(),
            }))
            .await
            .expect("replayed message");
    }
    on_registered.await.expect("join").expect("replay started");

    let live_during_replay = live(10);
    bus.inner.receive(live_during_replay.clone()).await.expect("live");
    bus.inner.receive(replayed[1].clone()).await.expect("live duplicate");

    bus.inner
        .receive(encode(&ReplayPhaseEnded { replay_id }))
        .await
        .expect("replay phase ended");
    assert_eq!(bus.transport.current_phase().await, PhaseKind::Safety);

    let live_during_safety = live(11);
    let replayed_late = live(4);
    bus.inner
        .receive(encode(&MessageReplayed {
            replay_id,
            message: replayed[2].clone(),
        }))
        .await
        .expect("replayed duplicate");
    bus.inner.receive(live_during_safety.clone()).await.expect("live");
    bus.inner
        .receive(encode(&MessageReplayed {
            replay_id,
            message: replayed_late.clone(),
        }))
        .await
        .expect("late replayed message");

    bus.inner
        .receive(encode(&SafetyPhaseEnded { replay_id }))
        .await
        .expect("safety phase ended");
    assert_eq!(bus.transport.current_phase().await, PhaseKind::Normal);

    let live_after = live(12);
    bus.inner.receive(live_after.clone()).await.expect("live");

    let expected: Vec<MessageId> = [
        &replayed[0],
        &replayed[1],
        &replayed[2],
        &live_during_replay,
        &live_during_safety,
        &replayed_late,
        &live_after,
    ]
    .iter()
    .map(|message| message.id)
    .collect();
    let delivered = bus.listener.received_ids();
    assert_eq!(delivered, expected);
    assert_eq!(
        delivered.iter().collect::<HashSet<_>>().len(),
        delivered.len()
    );

    let first = bus.listener.received().remove(0);
    bus.transport.ack_message(&first).await.expect("ack");
    let (handled, targets) = bus.inner.wait_for_sent::<MessageHandled>().await;
    assert_eq!(handled.message_id, first.id);
    assert_eq!(targets, [PeerId::new(PERSISTENCE_ID)]);
    assert_eq!(bus.inner.acked(), [first.id]);
}

#[tokio::test]
async fn non_persistent_peer_skips_the_replay() {
    let bus = registered_bus(false, vec![persistence_descriptor(0)]).await;

    bus.transport.on_registered().await.expect("no replay");

    let message = live(1);
    bus.inner.receive(message.clone()).await.expect("live");

    assert_eq!(bus.transport.current_phase().await, PhaseKind::NoReplay);
    assert_eq!(bus.listener.received_ids(), [message.id]);
    assert!(bus.inner.sent_of::<StartMessageReplayCommand>().is_empty());
}

#[tokio::test]
async fn persistence_traffic_is_buffered_until_the_service_restarts() {
    let durable = descriptor("Abc.Durable.0", vec![Subscription::any::<FakeEvent>()], 0);
    let mut volatile = descriptor("Abc.Volatile.0", vec![Subscription::any::<FakeEvent>()], 0);
    volatile.is_persistent = false;
    let bus = registered_bus(false, vec![persistence_descriptor(0), durable, volatile]).await;
    bus.transport.start();

    bus.inner
        .receive(TransportMessage::infrastructure(
            PersistenceStopping::message_type_id(),
            from_persistence(),
        ))
        .await
        .expect("persistence stopping");
    let acks: Vec<_> = bus
        .inner
        .sent_messages()
        .into_iter()
        .filter(|(message, _)| message.is::<PersistenceStoppingAck>())
        .map(|(_, targets)| targets)
        .collect();
    assert_eq!(acks, [vec![PeerId::new(PERSISTENCE_ID)]]);

    let event = live(1);
    let targets = bus.directory.get_peers_handling(&FakeEvent { value: 1 });
    bus.transport.send(event.clone(), targets).await.expect("send");

    assert!(bus.inner.sent_of::<PersistMessageCommand>().is_empty());
    assert_eq!(bus.transport.pending_persistence_count().await, 1);

    bus.directory.handle(DirectoryEvent::PeerStarted(PeerStarted {
        peer_descriptor: persistence_descriptor(10),
    }));

    tokio::time::timeout(Duration::from_secs(5), async {
        while bus.transport.pending_persistence_count().await > 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("buffer flushed");

    let (command, targets) = bus.inner.wait_for_sent::<PersistMessageCommand>().await;
    assert_eq!(targets, [PeerId::new(PERSISTENCE_ID)]);
    assert_eq!(command.target_peer_ids, [PeerId::new("Abc.Durable.0")]);
    assert_eq!(command.message.id, event.id);
    assert!(command.message.was_persisted);

    let originator = OriginatorInfo::new(PeerId::new("Abc.Self.0"), "tcp://Abc.Self.0:1");
    let transient = TransportMessage::encode(&FakeTransientEvent, originator).expect("encode");
    let durable = bus.directory.get_peer(&PeerId::new("Abc.Durable.0")).expect("durable peer");
    bus.transport.send(transient, vec![durable]).await.expect("send");
    assert_eq!(bus.inner.sent_of::<PersistMessageCommand>().len(), 1);

    bus.transport.stop().await;
}

#[tokio::test]
async fn buffer_is_flushed_when_the_restart_update_is_lost_to_a_full_queue() {
    let durable = descriptor("Abc.Durable.0", vec![Subscription::any::<FakeEvent>()], 0);
    let configuration = BusConfiguration {
        peer_update_queue_size: 2,
        ..configuration(false)
    };
    let bus = registered_bus_with(configuration, vec![persistence_descriptor(0), durable]).await;
    bus.transport.start();

    bus.inner
        .receive(TransportMessage::infrastructure(
            PersistenceStopping::message_type_id(),
            from_persistence(),
        ))
        .await
        .expect("persistence stopping");
    let event = live(1);
    let targets = bus.directory.get_peers_handling(&FakeEvent { value: 1 });
    bus.transport.send(event.clone(), targets).await.expect("send");
    assert_eq!(bus.transport.pending_persistence_count().await, 1);

    bus.directory.handle(DirectoryEvent::PeerStarted(PeerStarted {
        peer_descriptor: persistence_descriptor(10),
    }));
    for index in 0..3 {
        bus.directory.handle(DirectoryEvent::PeerStarted(PeerStarted {
            peer_descriptor: descriptor(&format!("Abc.Other.{index}"), Vec::new(), 10),
        }));
    }

    tokio::time::timeout(Duration::from_secs(5), async {
        while bus.transport.pending_persistence_count().await > 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("buffer flushed after resync");

    let (command, targets) = bus.inner.wait_for_sent::<PersistMessageCommand>().await;
    assert_eq!(targets, [PeerId::new(PERSISTENCE_ID)]);
    assert_eq!(command.message.id, event.id);

    bus.transport.stop().await;
}
