// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use lazy_static::lazy_static;
use prometheus::*;

pub const OVERSEER_LABEL: &str = "overseer";

lazy_static! {
    pub static ref LABORS_ACTIVE: IntGaugeVec = register_int_gauge_vec!(
        "overseer_labors_active",
        "Number of non-terminated labors currently tracked",
        &[OVERSEER_LABEL]
    )
    .unwrap();
    pub static ref LABORS_SPAWNED: IntCounterVec = register_int_counter_vec!(
        "overseer_labors_spawned_total",
        "Total number of labors spawned via start_child",
        &[OVERSEER_LABEL]
    )
    .unwrap();
    pub static ref LABORS_TERMINATED: IntCounterVec = register_int_counter_vec!(
        "overseer_labors_terminated_total",
        "Total number of labors terminated, voluntarily or otherwise",
        &[OVERSEER_LABEL]
    )
    .unwrap();
    pub static ref SPAWN_FAILURES: IntCounterVec = register_int_counter_vec!(
        "overseer_spawn_failures_total",
        "Total number of adapter spawn failures",
        &[OVERSEER_LABEL]
    )
    .unwrap();
    pub static ref CONNECT_TIMEOUTS: IntCounterVec = register_int_counter_vec!(
        "overseer_connect_timeouts_total",
        "Total number of labors dropped for failing to (re)connect in time",
        &[OVERSEER_LABEL]
    )
    .unwrap();
    pub static ref PAIR_RETRIES: IntCounterVec = register_int_counter_vec!(
        "overseer_pair_retries_total",
        "Total number of times Pair.initiate re-drove the load/pair sequence",
        &[OVERSEER_LABEL]
    )
    .unwrap();
    pub static ref TELEMETRY_RECEIVED: IntCounterVec = register_int_counter_vec!(
        "overseer_telemetry_received_total",
        "Total number of telemetry messages delivered to handle_telemetry",
        &[OVERSEER_LABEL]
    )
    .unwrap();
    pub static ref TELEMETRY_DROPPED: IntCounterVec = register_int_counter_vec!(
        "overseer_telemetry_dropped_total",
        "Total number of telemetry messages dropped for an unknown labor name",
        &[OVERSEER_LABEL]
    )
    .unwrap();
}
