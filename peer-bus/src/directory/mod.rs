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

//! Peer directory: registration with the directory service and the local,
//! event-sourced view of every known peer and its subscriptions.

mod client;
mod directory_selector;
pub mod dispatcher;
mod peer_entry;
pub mod protocol;
pub mod timestamp;

pub use client::{PeerDirectoryClient, RegistrationState};
pub use directory_selector::DirectoryPeerSelector;
pub use dispatcher::DirectoryDispatcher;
pub use protocol::{CommandResult, DirectoryCommand, DirectoryEvent};
pub use timestamp::{Clock, SystemClock, UniqueTimestampProvider};

use crate::peer::{Peer, PeerDescriptor, PeerId};
use crate::routing::MessageBinding;
use tokio::sync::broadcast;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PeerUpdateAction {
    Started,
    Stopped,
    Decommissioned,
    Updated,
}

/// Notification broadcast after a directory event was applied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerUpdated {
    pub peer_id: PeerId,
    pub action: PeerUpdateAction,
}

/// Read side of the directory, as seen by routing and the persistent transport.
pub trait PeerDirectory: Send + Sync {
    fn get_peers_handling_message(&self, binding: &MessageBinding) -> Vec<Peer>;

    fn get_peer_descriptor(&self, peer_id: &PeerId) -> Option<PeerDescriptor>;

    fn is_persistent(&self, peer_id: &PeerId) -> bool;

    fn subscribe_peer_updates(&self) -> broadcast::Receiver<PeerUpdated>;
}
