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

//! Bus configuration.
//!
//! A flat set of named options, deserialized from JSON5 the same way the streamer
//! binaries read their configuration files. Missing keys fall back to defaults.
//!
//! ```
//! use peer_bus::BusConfiguration;
//! use std::time::Duration;
//!
//! let config = BusConfiguration::from_json5_str(
//!     r#"{
//!         directory_service_end_points: ["tcp://directory-a:129", "tcp://directory-b:129"],
//!         is_persistent: true,
//!         registration_timeout_ms: 500,
//!     }"#,
//! )
//! .unwrap();
//!
//! assert_eq!(config.registration_timeout(), Duration::from_millis(500));
//! assert!(!config.is_directory_picked_randomly);
//! ```

use crate::error::BusError;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

const DEFAULT_REGISTRATION_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_FAULTY_DIRECTORY_COOLDOWN_MS: u64 = 60_000;
const DEFAULT_START_REPLAY_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_SAFETY_WORKER_JOIN_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_PEER_UPDATE_QUEUE_SIZE: usize = 1024;

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BusConfiguration {
    pub directory_service_end_points: Vec<String>,
    pub registration_timeout_ms: u64,
    pub is_directory_picked_randomly: bool,
    /// How long a directory peer stays deprioritized after a failed interaction.
    pub faulty_directory_cooldown_ms: u64,
    pub is_persistent: bool,
    pub start_replay_timeout_ms: u64,
    pub safety_worker_join_timeout_ms: u64,
    /// Capacity of the `PeerUpdated` broadcast channel.
    pub peer_update_queue_size: usize,
}

impl Default for BusConfiguration {
    fn default() -> Self {
        Self {
            directory_service_end_points: Vec::new(),
            registration_timeout_ms: DEFAULT_REGISTRATION_TIMEOUT_MS,
            is_directory_picked_randomly: false,
            faulty_directory_cooldown_ms: DEFAULT_FAULTY_DIRECTORY_COOLDOWN_MS,
            is_persistent: false,
            start_replay_timeout_ms: DEFAULT_START_REPLAY_TIMEOUT_MS,
            safety_worker_join_timeout_ms: DEFAULT_SAFETY_WORKER_JOIN_TIMEOUT_MS,
            peer_update_queue_size: DEFAULT_PEER_UPDATE_QUEUE_SIZE,
        }
    }
}

impl BusConfiguration {
    pub fn from_json5_str(text: &str) -> Result<Self, BusError> {
        json5::from_str(text).map_err(|err| BusError::Configuration {
            message: format!("unable to parse JSON5 configuration: {err}"),
        })
    }

    pub fn from_json5_file(path: impl AsRef<Path>) -> Result<Self, BusError> {
        let path = path.as_ref();
        debug!("loading bus configuration from {path:?}");

        let text = fs::read_to_string(path).map_err(|err| BusError::Configuration {
            message: format!("unable to read {}: {err}", path.display()),
        })?;
        Self::from_json5_str(&text)
    }

    pub fn registration_timeout(&self) -> Duration {
        Duration::from_millis(self.registration_timeout_ms)
    }

    pub fn faulty_directory_cooldown(&self) -> Duration {
        Duration::from_millis(self.faulty_directory_cooldown_ms)
    }

    pub fn start_replay_timeout(&self) -> Duration {
        Duration::from_millis(self.start_replay_timeout_ms)
    }

    pub fn safety_worker_join_timeout(&self) -> Duration {
        Duration::from_millis(self.safety_worker_join_timeout_ms)
    }
}
