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

//! Dotted token sequences used both as routing keys and as subscription patterns.

use serde::{Deserialize, Serialize};
use std::fmt;

pub const STAR: &str = "*";
pub const SHARP: &str = "#";

/// An ordered sequence of tokens.
///
/// As a pattern, `*` matches exactly one token and `#` matches any remaining suffix.
/// A key with no parts, or with the single part `#`, is empty and matches everything.
///
/// A joined key carries a legacy dot-joined routing key as its single part.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BindingKey {
    parts: Vec<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    is_joined: bool,
}

impl BindingKey {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            parts: parts.into_iter().map(Into::into).collect(),
            is_joined: false,
        }
    }

    /// Splits a dotted key, `"a.*.c"` -> `["a", "*", "c"]`.
    pub fn parse(dotted: &str) -> Self {
        if dotted.is_empty() {
            return Self::empty();
        }
        Self::new(dotted.split('.'))
    }

    /// Wraps a routing key that arrives pre-joined from an older transport.
    pub fn joined(dotted: impl Into<String>) -> Self {
        Self {
            parts: vec![dotted.into()],
            is_joined: true,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty() || (self.parts.len() == 1 && self.parts[0] == SHARP)
    }

    pub fn is_joined(&self) -> bool {
        self.is_joined
    }

    pub fn part_count(&self) -> usize {
        self.parts.len()
    }

    pub fn part(&self, index: usize) -> Option<&str> {
        self.parts.get(index).map(String::as_str)
    }

    pub fn parts(&self) -> &[String] {
        &self.parts
    }
}

impl fmt::Display for BindingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.parts.join("."))
    }
}

#[cfg(test)]
mod tests {
    use super::BindingKey;

    #[test]
    fn sharp_alone_is_empty() {
        assert!(BindingKey::empty().is_empty());
        assert!(BindingKey::new(["#"]).is_empty());
        assert!(!BindingKey::new(["*"]).is_empty());
        assert!(!BindingKey::new(["a", "#"]).is_empty());
    }

    #[test]
    fn parse_splits_on_dots() {
        let key = BindingKey::parse("a.*.c");

        assert_eq!(key.part_count(), 3);
        assert_eq!(key.part(1), Some("*"));
        assert_eq!(key.part(3), None);
        assert_eq!(key.to_string(), "a.*.c");
        assert!(BindingKey::parse("").is_empty());
    }

    #[test]
    fn joined_key_keeps_text_as_single_part() {
        let key = BindingKey::joined("a.b.c");

        assert!(key.is_joined());
        assert_eq!(key.part_count(), 1);
        assert_ne!(key, BindingKey::new(["a.b.c"]));
    }
}
