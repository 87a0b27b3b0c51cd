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

//! Stable event names used in the `event` field of log records.

pub const DIRECTORY_REGISTER_START: &str = "directory_register_start";
pub const DIRECTORY_REGISTER_ATTEMPT_FAILED: &str = "directory_register_attempt_failed";
pub const DIRECTORY_REGISTER_REJECTED: &str = "directory_register_rejected";
pub const DIRECTORY_REGISTER_OK: &str = "directory_register_ok";
pub const DIRECTORY_EVENT_BUFFERED: &str = "directory_event_buffered";
pub const DIRECTORY_EVENT_BUFFER_DRAINED: &str = "directory_event_buffer_drained";
pub const DIRECTORY_EVENT_STALE: &str = "directory_event_stale";
pub const DIRECTORY_EVENT_UNKNOWN_PEER: &str = "directory_event_unknown_peer";
pub const DIRECTORY_COMMAND_FAILED: &str = "directory_command_failed";
pub const DIRECTORY_PEER_UPDATED: &str = "directory_peer_updated";
pub const DIRECTORY_PEER_UPDATE_NOT_BROADCAST: &str = "directory_peer_update_not_broadcast";

pub const REPLAY_START: &str = "replay_start";
pub const REPLAY_EVENT_IGNORED: &str = "replay_event_ignored";
pub const REPLAY_PHASE_ENDED: &str = "replay_phase_ended";
pub const SAFETY_PHASE_ENDED: &str = "safety_phase_ended";
pub const SAFETY_DUPLICATE_SKIPPED: &str = "safety_duplicate_skipped";
pub const SAFETY_DELIVERY_FAILED: &str = "safety_delivery_failed";
pub const SAFETY_WORKER_JOIN_TIMEOUT: &str = "safety_worker_join_timeout";
pub const DELIVERY_FAILED: &str = "delivery_failed";

pub const PERSISTENCE_DOWN: &str = "persistence_down";
pub const PERSISTENCE_UP: &str = "persistence_up";
pub const PERSISTENCE_BUFFERED: &str = "persistence_buffered";
pub const PERSISTENCE_FLUSH: &str = "persistence_flush";
pub const PERSISTENCE_SEND_FAILED: &str = "persistence_send_failed";
pub const PERSISTENCE_STOPPING: &str = "persistence_stopping";

pub const PEER_UPDATE_LOOP_LAGGED: &str = "peer_update_loop_lagged";
pub const PEER_UPDATE_LOOP_CLOSED: &str = "peer_update_loop_closed";
pub const ROUTING_NO_HANDLER: &str = "routing_no_handler";
