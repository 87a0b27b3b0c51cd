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

//! Subscriptions and the pure matching predicate.

use crate::message::{BusMessage, MessageTypeId};
use crate::routing::binding_key::{BindingKey, SHARP, STAR};
use crate::routing::MessageBinding;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Interest of a peer in messages of one type whose routing key matches a pattern.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subscription {
    pub message_type_id: MessageTypeId,
    pub binding_key: BindingKey,
}

impl Subscription {
    pub fn new(message_type_id: MessageTypeId, binding_key: BindingKey) -> Self {
        Self {
            message_type_id,
            binding_key,
        }
    }

    /// Subscribes to every message of type `M`.
    pub fn any<M: BusMessage>() -> Self {
        Self::new(M::message_type_id(), BindingKey::empty())
    }

    pub fn matching<M: BusMessage>(binding_key: BindingKey) -> Self {
        Self::new(M::message_type_id(), binding_key)
    }

    pub fn is_matching_all_messages(&self) -> bool {
        self.binding_key.is_empty()
    }

    pub fn matches_binding(&self, binding: &MessageBinding) -> bool {
        binding.message_type_id == self.message_type_id && self.matches(&binding.routing_key)
    }

    pub fn matches(&self, routing_key: &BindingKey) -> bool {
        binding_key_matches(&self.binding_key, routing_key)
    }
}

/// Matches a routing key against a binding-key pattern.
pub(crate) fn binding_key_matches(binding_key: &BindingKey, routing_key: &BindingKey) -> bool {
    if binding_key.is_empty() {
        return true;
    }

    if routing_key.is_joined() && binding_key.part_count() > 1 {
        return matches_joined(binding_key, routing_key.part(0).unwrap_or_default());
    }

    for index in 0..routing_key.part_count() {
        let Some(pattern_part) = binding_key.part(index) else {
            return false;
        };
        if pattern_part == SHARP {
            return true;
        }
        if pattern_part != STAR && routing_key.part(index) != Some(pattern_part) {
            return false;
        }
    }

    routing_key.part_count() == binding_key.part_count()
}

fn matches_joined(binding_key: &BindingKey, joined_routing_key: &str) -> bool {
    let pattern = joined_pattern(binding_key);
    match Regex::new(&pattern) {
        Ok(regex) => regex.is_match(joined_routing_key),
        Err(err) => {
            warn!("unable to build joined routing pattern {pattern:?}: {err}");
            false
        }
    }
}

// `#` truncates the pattern, `*` becomes `.*`.
fn joined_pattern(binding_key: &BindingKey) -> String {
    let mut tokens = Vec::with_capacity(binding_key.part_count());
    let mut is_open_ended = false;

    for part in binding_key.parts() {
        match part.as_str() {
            SHARP => {
                is_open_ended = true;
                break;
            }
            STAR => tokens.push(".*".to_string()),
            literal => tokens.push(regex::escape(literal)),
        }
    }

    let mut pattern = format!("^{}", tokens.join("\\."));
    if !is_open_ended {
        pattern.push('$');
    }
    pattern
}
