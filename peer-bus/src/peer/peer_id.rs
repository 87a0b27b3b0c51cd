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

use serde::{Deserialize, Serialize};
use std::fmt;

const DIRECTORY_SERVICE_PREFIX: &str = "Bus.DirectoryService.";
const PERSISTENCE_SERVICE_PREFIX: &str = "Bus.PersistenceService.";

/// Opaque peer identifier, unique per process instance.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Well-known id of the directory peer configured at `index`.
    pub fn directory(index: usize) -> Self {
        Self(format!("{DIRECTORY_SERVICE_PREFIX}{index}"))
    }

    pub fn persistence(instance: &str) -> Self {
        Self(format!("{PERSISTENCE_SERVICE_PREFIX}{instance}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_directory(&self) -> bool {
        self.0.starts_with(DIRECTORY_SERVICE_PREFIX)
    }

    pub fn is_persistence(&self) -> bool {
        self.0.starts_with(PERSISTENCE_SERVICE_PREFIX)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}
