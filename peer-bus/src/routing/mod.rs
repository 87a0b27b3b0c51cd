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

//! Routing layer.
//!
//! Binding keys and subscriptions, the per-message-type subscription tree that maps a
//! routing key to interested peers, and the resolution of outgoing message targets.

pub(crate) mod binding_key;
mod message_binding;
mod outbound;
mod peer_selection;
pub(crate) mod subscription;
mod subscription_tree;

pub use binding_key::BindingKey;
pub use message_binding::MessageBinding;
pub use outbound::OutboundRouter;
pub use peer_selection::RoundRobinPeerSelector;
pub use subscription::Subscription;
pub use subscription_tree::PeerSubscriptionTree;
