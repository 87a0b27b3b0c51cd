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

//! Runtime helpers for spawning worker loops on the current Tokio runtime.

use crate::directory::PeerUpdated;
use crate::message::TransportMessage;
use std::future::Future;
use tokio::sync::broadcast;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

/// Spawns the consumer of a pending-message queue.
///
/// The loop is expected to exit once every sender of the queue is dropped.
pub(crate) fn spawn_queue_worker<F, Fut>(
    pending: UnboundedReceiver<TransportMessage>,
    run_loop: F,
) -> JoinHandle<()>
where
    F: FnOnce(UnboundedReceiver<TransportMessage>) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(run_loop(pending))
}

pub(crate) fn spawn_peer_update_loop<F, Fut>(
    updates: broadcast::Receiver<PeerUpdated>,
    run_loop: F,
) -> JoinHandle<()>
where
    F: FnOnce(broadcast::Receiver<PeerUpdated>) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(run_loop(updates))
}
