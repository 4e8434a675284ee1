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

//! `Spec` (immutable configuration, spec §3) and `State` (the mutable
//! registry + user state the controller owns exclusively, spec §4.5).

use std::{collections::HashMap, sync::Arc, time::Duration};

use bon::Builder;
use overseer_release::ReleaseRef;
use snafu::ensure;

use crate::{
    adapter::Adapter,
    callback::UserCallback,
    err::{BadStartSpecSnafu, OverseerError},
    id::{LaborName, OverseerId},
    labor::Labor,
    pair::Transport,
};

/// Respawn policy (spec §3, §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    /// Named slots: on terminal `node_down`, the controller respawns into
    /// the same slot. Documented but not reachable through `start_link` —
    /// see `DESIGN.md`.
    OneForOne,
    /// Anonymous pool: new slots only via `start_child`; a dead worker's
    /// slot is simply dropped.
    #[default]
    SimpleOneForOne,
}

/// `{module, function}` invoked on the worker once its release has loaded
/// (spec §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPoint {
    pub module:   String,
    pub function: String,
}

/// Immutable configuration, fixed for the lifetime of an overseer instance.
#[derive(Builder)]
pub struct Spec {
    pub(crate) adapter: Arc<dyn Adapter>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) release: ReleaseRef,
    #[builder(default)]
    pub(crate) entry_point: Option<EntryPoint>,
    #[builder(default)]
    pub(crate) strategy: Strategy,
    #[builder(default = 8)]
    pub(crate) max_nodes: usize,
    #[builder(default = Duration::from_secs(30))]
    pub(crate) conn_timeout: Duration,
    #[builder(default = Duration::from_secs(30))]
    pub(crate) pair_timeout: Duration,
    #[builder(default = OverseerId::generate())]
    pub(crate) overseer_id: OverseerId,
}

impl Spec {
    #[must_use]
    pub fn overseer_id(&self) -> &OverseerId { &self.overseer_id }

    #[must_use]
    pub const fn max_nodes(&self) -> usize { self.max_nodes }

    #[must_use]
    pub const fn strategy(&self) -> Strategy { self.strategy }
}

/// The registry: `name -> Labor`, mutated exclusively by the controller
/// (spec §3 invariant 5).
pub type Registry = HashMap<LaborName, Labor>;

/// `count_active_labors(registry)` per spec §3 invariant 1: every labor
/// whose phase isn't `Terminated`.
#[must_use]
pub fn count_active_labors(registry: &Registry) -> usize {
    registry.values().filter(|labor| labor.phase().is_active()).count()
}

/// Composed at init from the user module, adapter, release, and options
/// (spec §4.5). Owns the immutable `Spec`, the mutable registry, and the
/// user's own state — the controller is the sole mutator of either.
pub struct State<CB: UserCallback> {
    pub spec:       Arc<Spec>,
    pub registry:   Registry,
    pub user_state: CB::State,
    pub callback:   Arc<CB>,
    /// Slots reserved by a `StartChild` that has offloaded `adapter.spawn`
    /// but whose result hasn't come back as a `Spawned` event yet. Counted
    /// toward the `max_nodes` cap (see `reserved_slots`) so two `StartChild`
    /// calls racing the same offloaded spawn can't both observe room under
    /// the cap before either lands in the registry (spec §3 invariant 1).
    pub(crate) pending_spawns: usize,
}

impl<CB: UserCallback> State<CB> {
    /// Validate and compose the initial state. Per spec §4.4/§9, the
    /// reference source always initialises as `simple_one_for_one`
    /// regardless of what strategy was requested, and errors for anything
    /// else — this crate keeps that contract explicit rather than silently
    /// downgrading the strategy.
    pub fn init(spec: Spec, callback: CB, user_init_state: CB::State) -> Result<Self, OverseerError> {
        ensure!(
            spec.strategy == Strategy::SimpleOneForOne,
            BadStartSpecSnafu {
                reason: "only Strategy::SimpleOneForOne is supported at start_link; \
                          Strategy::OneForOne is defined but not start-able (see DESIGN.md)"
                    .to_string(),
            }
        );

        Ok(Self {
            spec: Arc::new(spec),
            registry: Registry::new(),
            user_state: user_init_state,
            callback: Arc::new(callback),
            pending_spawns: 0,
        })
    }

    #[must_use]
    pub fn count_active_labors(&self) -> usize { count_active_labors(&self.registry) }

    /// `count_active_labors` plus spawns offloaded but not yet landed in the
    /// registry. `start_child` must check against this, not
    /// `count_active_labors` alone, or two calls in flight concurrently can
    /// both pass the cap check before either labor is inserted.
    #[must_use]
    pub fn reserved_slots(&self) -> usize { self.count_active_labors() + self.pending_spawns }
}

#[cfg(test)]
mod tests {
    use overseer_release::ReleaseRef;

    use super::*;
    use crate::{
        callback::Reply,
        test_support::{FakeAdapter, FakeTransport},
    };

    struct NoopCallback;
    impl UserCallback for NoopCallback {
        type State = ();
    }

    fn test_spec() -> Spec {
        Spec::builder()
            .adapter(Arc::new(FakeAdapter::new("w", "host")))
            .transport(Arc::new(FakeTransport::new()))
            .release(ReleaseRef::parse("file:///tmp/release.tar.gz").unwrap())
            .build()
    }

    #[test]
    fn init_rejects_one_for_one() {
        let spec = Spec::builder()
            .adapter(Arc::new(FakeAdapter::new("w", "host")))
            .transport(Arc::new(FakeTransport::new()))
            .release(ReleaseRef::parse("file:///tmp/release.tar.gz").unwrap())
            .strategy(Strategy::OneForOne)
            .build();
        let err = State::init(spec, NoopCallback, ()).err().unwrap();
        assert!(matches!(err, OverseerError::BadStartSpec { .. }));
    }

    #[test]
    fn init_accepts_simple_one_for_one_with_empty_registry() {
        let state = State::init(test_spec(), NoopCallback, ()).unwrap();
        assert_eq!(state.count_active_labors(), 0);
    }

    #[test]
    fn reserved_slots_counts_pending_spawns_alongside_the_registry() {
        let mut state = State::init(test_spec(), NoopCallback, ()).unwrap();
        assert_eq!(state.reserved_slots(), 0);
        state.pending_spawns = 2;
        assert_eq!(state.reserved_slots(), 2);
    }

    #[tokio::test]
    async fn default_callback_hooks_are_grounded_in_reply_noreply() {
        let cb = NoopCallback;
        let name = LaborName::new("w-1@host");
        let reply = cb.handle_connected(&name, ()).await;
        assert!(matches!(reply, Reply::Noreply(())));
    }
}
