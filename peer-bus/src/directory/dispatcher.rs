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

//! Seam between the directory client and the directory peers it talks to.

use super::protocol::{CommandResult, DirectoryCommand};
use crate::error::BusError;
use crate::peer::Peer;
use async_trait::async_trait;

/// Sends a command to one directory peer and waits for its result.
///
/// Implementations are free to never complete; the directory client bounds every
/// call with the configured registration timeout.
#[async_trait]
pub trait DirectoryDispatcher: Send + Sync {
    async fn send(
        &self,
        command: DirectoryCommand,
        directory_peer: &Peer,
    ) -> Result<CommandResult, BusError>;
}
