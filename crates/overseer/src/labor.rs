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

//! A `Labor` is Overseer's per-worker record (spec §3): identity, the
//! adapter's opaque handle, lifecycle phase, and the at-most-one-per-kind
//! timers that drive recovery.

use std::time::Instant;

use crate::id::{LaborName, PairPid};

/// Lifecycle phase of a labor, per spec §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// `adapter.spawn` has returned; waiting for `node_up`.
    Spawning,
    /// `node_up` arrived; `adapter.connect` is in flight.
    Connecting,
    /// Control channel established; the release artifact is being fetched
    /// and pushed to the worker.
    Loading,
    /// Release loaded and the worker's entry point started; waiting for the
    /// worker's `pair` callback.
    Pairing,
    /// Paired: `pair_pid` is set and the control endpoint is linked.
    Active,
    /// The control channel was lost after having been `Active` or mid
    /// handshake; a `conn` timer is running for the reconnect window.
    Disconnected,
    /// Resources released. Retained in the registry only long enough to
    /// emit a callback (spec §3 invariant 2).
    Terminated,
}

impl Phase {
    /// `count_active_labors` (spec §3 invariant 1) counts every phase but
    /// this one.
    #[must_use]
    pub const fn is_active(self) -> bool { !matches!(self, Self::Terminated) }
}

/// The kind of a labor timer. Each labor holds at most one timer per kind
/// (spec §3 invariant 3); arming a new one of the same kind cancels the
/// prior one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Bounds time-to-connect from `spawn`, and time-to-reconnect from
    /// `disconnected`.
    Conn,
    /// Bounds the post-connect load/pair handshake.
    Pair,
}

/// Per-worker record tracked in the controller's registry.
///
/// Labors are treated as immutable values in spec §5: every transition
/// produces a new `Labor` that replaces the old one in the registry, rather
/// than mutating fields in place. `Clone` is cheap (a name, an opaque
/// handle, and a few small fields).
#[derive(Debug, Clone)]
pub struct Labor {
    name:               LaborName,
    handle:             String,
    phase:              Phase,
    pair_pid:           Option<PairPid>,
    conn_timer_armed:   bool,
    pair_timer_armed:   bool,
    created_at:         Instant,
    last_transition_at: Instant,
}

impl Labor {
    /// Construct a freshly spawned labor in phase `Spawning`.
    #[must_use]
    pub fn spawning(name: LaborName, handle: impl Into<String>) -> Self {
        let now = Instant::now();
        Self {
            name,
            handle: handle.into(),
            phase: Phase::Spawning,
            pair_pid: None,
            conn_timer_armed: false,
            pair_timer_armed: false,
            created_at: now,
            last_transition_at: now,
        }
    }

    #[must_use]
    pub const fn name(&self) -> &LaborName { &self.name }

    #[must_use]
    pub fn handle(&self) -> &str { &self.handle }

    #[must_use]
    pub const fn phase(&self) -> Phase { self.phase }

    #[must_use]
    pub const fn pair_pid(&self) -> Option<&PairPid> { self.pair_pid.as_ref() }

    #[must_use]
    pub const fn created_at(&self) -> Instant { self.created_at }

    #[must_use]
    pub const fn last_transition_at(&self) -> Instant { self.last_transition_at }

    #[must_use]
    pub const fn has_timer(&self, kind: TimerKind) -> bool {
        match kind {
            TimerKind::Conn => self.conn_timer_armed,
            TimerKind::Pair => self.pair_timer_armed,
        }
    }

    /// Produce a copy transitioned to `phase`, recording the transition
    /// time. Does not touch timer flags; callers arm/cancel separately so
    /// the "at most one timer per kind" invariant stays explicit at call
    /// sites.
    #[must_use]
    pub fn with_phase(&self, phase: Phase) -> Self {
        let mut next = self.clone();
        next.phase = phase;
        next.last_transition_at = Instant::now();
        next
    }

    #[must_use]
    pub fn with_pair_pid(&self, pid: PairPid) -> Self {
        let mut next = self.clone();
        next.pair_pid = Some(pid);
        next
    }

    #[must_use]
    pub fn with_timer_armed(&self, kind: TimerKind, armed: bool) -> Self {
        let mut next = self.clone();
        match kind {
            TimerKind::Conn => next.conn_timer_armed = armed,
            TimerKind::Pair => next.pair_timer_armed = armed,
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminated_is_the_only_inactive_phase() {
        assert!(!Phase::Terminated.is_active());
        for phase in [
            Phase::Spawning,
            Phase::Connecting,
            Phase::Loading,
            Phase::Pairing,
            Phase::Active,
            Phase::Disconnected,
        ] {
            assert!(phase.is_active());
        }
    }

    #[test]
    fn transitions_produce_new_values_without_touching_timers() {
        let labor = Labor::spawning(LaborName::new("w-1@host"), "pid-1")
            .with_timer_armed(TimerKind::Conn, true);
        let next = labor.with_phase(Phase::Connecting);
        assert_eq!(next.phase(), Phase::Connecting);
        assert!(next.has_timer(TimerKind::Conn));
        assert!(!next.has_timer(TimerKind::Pair));
    }
}
