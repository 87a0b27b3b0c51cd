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

//! Persistence integration: the replay protocol run by a restarting persistent peer,
//! and the mirroring of persistent traffic to the persistence service.

mod persistent_transport;
pub mod protocol;

pub use persistent_transport::{PersistentTransport, PhaseKind};
