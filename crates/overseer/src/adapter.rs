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

//! The provisioning plugin contract (spec §4.1). Overseer ships reference
//! implementations in `overseer-adapter-local` and `overseer-adapter-ec2`;
//! this crate only defines the trait they implement against.

use async_trait::async_trait;

use crate::{id::OverseerId, labor::Labor};

/// Any error an adapter raises is opaque to Overseer: it is wrapped into the
/// relevant `OverseerError` variant (`SpawnFailed`, `AdapterConnect`,
/// `AdapterTerminate`) and surfaced to the controller as an event, which
/// decides whether to retry, respawn, or drop (spec §4.1 failure semantics).
pub type AdapterError = Box<dyn std::error::Error + Send + Sync>;

/// Provisioning plugin: spawns hosts, tears them down, and (re)establishes
/// the low-level control channel. Implementations must not block the
/// controller — provisioning work runs on the adapter's own tasks, and
/// `spawn`/`terminate`/`connect` only await until the outcome is known
/// (spec §4.1, §5 suspension points).
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Provision a host and start a worker process on it, returning a
    /// `Labor` in phase `Spawning` carrying the adapter-assigned name and
    /// opaque handle.
    async fn spawn(&self, overseer_id: &OverseerId) -> Result<Labor, AdapterError>;

    /// Release the labor's underlying resources (kill process / terminate
    /// instance). Must be idempotent: terminating an already-terminated
    /// labor succeeds without error.
    async fn terminate(&self, labor: &Labor) -> Result<Labor, AdapterError>;

    /// Establish or re-establish the low-level control channel to `labor`.
    /// Called once after `node_up`, and again on every `Pair.initiate`
    /// retry.
    async fn connect(&self, labor: &Labor) -> Result<(), AdapterError>;
}

#[cfg(test)]
mod tests {
    use super::Adapter;
    use crate::{id::OverseerId, test_support::FakeAdapter};

    #[tokio::test]
    async fn fake_adapter_spawns_unique_names() {
        let adapter = FakeAdapter::new("w", "host-1");
        let first = adapter.spawn(&OverseerId::generate()).await.unwrap();
        let second = adapter.spawn(&OverseerId::generate()).await.unwrap();
        assert_ne!(first.name(), second.name());
    }
}
