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

//! Peer identity, shared peer handles and peer descriptors.

mod peer_descriptor;
mod peer_handle;
mod peer_id;

pub use peer_descriptor::PeerDescriptor;
pub use peer_handle::Peer;
pub use peer_id::PeerId;
