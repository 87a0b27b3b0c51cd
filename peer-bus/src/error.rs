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

//! Error type shared by the directory client, the persistent transport and the
//! configuration loader.

use std::time::Duration;

/// Errors surfaced synchronously to the caller that initiated an operation.
///
/// Steady-state event application never returns these; it logs and carries on.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// Every directory peer timed out or rejected the registration.
    #[error("unable to register peer on directory (tried: {tried}) after {timeout:?}")]
    RegistrationTimeout {
        /// Directory peers that were attempted, in attempt order.
        tried: String,
        /// Timeout applied to each attempt.
        timeout: Duration,
    },

    /// No directory peer acknowledged an update or unregister command.
    #[error("unable to {operation} on directory (tried: {tried})")]
    DirectoryUnreachable {
        /// Name of the failed operation.
        operation: &'static str,
        /// Directory peers that were attempted.
        tried: String,
    },

    /// The operation requires a registered peer.
    #[error("peer is not registered on the directory")]
    NotRegistered,

    /// The persistence service did not start the replay in time.
    #[error("persistence service unreachable: no replay event received after {timeout:?}")]
    PersistenceUnreachable {
        /// Configured start-replay timeout.
        timeout: Duration,
    },

    /// The underlying transport failed.
    #[error("transport error: {message}")]
    Transport {
        /// Details about the transport failure.
        message: String,
    },

    /// A message body could not be encoded or decoded.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The configuration could not be read or parsed.
    #[error("invalid configuration: {message}")]
    Configuration {
        /// Details about the configuration failure.
        message: String,
    },

    /// A message of an unexpected type was handed to a decoder.
    #[error("unexpected message type: expected {expected}, got {actual}")]
    UnexpectedMessageType {
        /// Type id the decoder handles.
        expected: String,
        /// Type id that was received.
        actual: String,
    },
}

impl BusError {
    pub fn transport(message: impl Into<String>) -> Self {
        BusError::Transport {
            message: message.into(),
        }
    }
}
