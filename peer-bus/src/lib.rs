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

//! # peer-bus
//!
//! `peer-bus` is the core of a peer-to-peer service bus: peers register with a
//! directory service, advertise subscriptions (message type plus binding key) and
//! exchange commands and events directly, with an optional persistence service that
//! replays missed messages to a restarting persistent peer.
//!
//! ## Subscription matching
//!
//! Binding keys are dotted token sequences where `*` matches exactly one token and
//! `#` matches any remaining suffix.
//!
//! ```
//! use peer_bus::{BindingKey, Peer, PeerId, PeerSubscriptionTree};
//!
//! let tree = PeerSubscriptionTree::new();
//! let orders = Peer::new(PeerId::new("Abc.Orders.0"), "tcp://orders:1");
//! let audit = Peer::new(PeerId::new("Abc.Audit.0"), "tcp://audit:1");
//!
//! tree.add(&orders, &BindingKey::parse("eu.*.placed"));
//! tree.add(&audit, &BindingKey::parse("eu.#"));
//!
//! let peers = tree.get_peers(&BindingKey::parse("eu.fr.placed"));
//! assert_eq!(peers.len(), 2);
//!
//! let peers = tree.get_peers(&BindingKey::parse("eu.fr.cancelled"));
//! assert_eq!(peers.len(), 1);
//! assert_eq!(peers[0].id(), &PeerId::new("Abc.Audit.0"));
//! ```
//!
//! ## Internal architecture map
//!
//! - Messages: message identity, the transport envelope and typed messages
//! - Peers: peer identity, shared peer handles and descriptors
//! - Routing: binding keys, subscription trees and outgoing target resolution
//! - Directory: registration handshake and the event-sourced peer registry
//! - Persistence: replay protocol and mirroring of persistent traffic
//! - Transport: seam with the wire transport
//! - Runtime: spawning of background worker loops
//!
//! ## Observability model
//!
//! The crate uses `tracing` for logs/events.
//! Library code emits events and does not initialize a global subscriber. Binaries
//! and tests are responsible for one-time `tracing_subscriber` initialization at
//! process boundaries.

mod config;
pub use config::BusConfiguration;

mod error;
pub use error::BusError;

pub mod directory;
pub use directory::{PeerDirectory, PeerDirectoryClient, PeerUpdateAction, PeerUpdated};

pub mod message;
pub use message::{BusMessage, MessageId, MessageTypeId, OriginatorInfo, TransportMessage};

mod peer;
pub use peer::{Peer, PeerDescriptor, PeerId};

pub mod persistence;
pub use persistence::{PersistentTransport, PhaseKind};

pub mod routing;
pub use routing::{
    BindingKey, MessageBinding, OutboundRouter, PeerSubscriptionTree, RoundRobinPeerSelector,
    Subscription,
};

pub mod transport;
pub use transport::{Transport, TransportListener};

#[doc(hidden)]
pub mod observability;
mod runtime;
