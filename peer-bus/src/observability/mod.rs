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

//! Structured logging vocabulary shared by every component.
//!
//! Components emit `tracing` events tagged with `event = events::NAME` and
//! `component = COMPONENT`; value formatting lives in [`fields`] so log lines stay
//! greppable across modules.

pub mod events;
pub mod fields;
