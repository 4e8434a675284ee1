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

//! The embedder-supplied callback contract (spec §4.4, §9).
//!
//! A user module implements [`UserCallback`] against its own `State` type.
//! Every hook returns a tagged reply threading the (possibly updated) state
//! back through the controller's event loop. Because the reply type is a
//! plain Rust enum, `bad_return_value` (spec §7) is unreachable through the
//! typed hooks — it is kept only as an `OverseerError` variant for the
//! untyped `handle_call`/`handle_cast`/`handle_info` pass-through path,
//! where a user module could in principle construct an invalid combination
//! before this crate ever sees it (e.g. replying on a cast). See
//! `DESIGN.md` for the resolved open question.

use async_trait::async_trait;

use crate::{id::LaborName, telemetry::Telemetry};

/// Reply from a hook that never produces a caller-visible value.
#[derive(Debug, Clone)]
pub enum Reply<S> {
    /// Continue with `state`.
    Noreply(S),
    /// Continue with `state`, hinting the controller to release memory
    /// until the next event (spec §4.4). Implementations may treat this
    /// the same as `Noreply`; it is not required to shrink anything.
    NoreplyHibernate(S),
    /// Shut down the overseer with `reason`.
    Stop(String, S),
}

impl<S> Reply<S> {
    /// Extract the carried state, regardless of variant.
    pub fn into_state(self) -> S {
        match self {
            Self::Noreply(s) | Self::NoreplyHibernate(s) | Self::Stop(_, s) => s,
        }
    }

    #[must_use]
    pub const fn is_stop(&self) -> bool { matches!(self, Self::Stop(..)) }
}

/// Reply from a hook that can answer a request/response call
/// (`handle_call`), per spec §4.4's `reply(value, new_user_state)` variant.
#[derive(Debug, Clone)]
pub enum CallReply<S> {
    Reply(serde_json::Value, S),
    Noreply(S),
    NoreplyHibernate(S),
    Stop(String, S),
}

impl<S> CallReply<S> {
    pub fn into_state(self) -> S {
        match self {
            Self::Reply(_, s) | Self::Noreply(s) | Self::NoreplyHibernate(s) | Self::Stop(_, s) => s,
        }
    }
}

/// The embedder's callback module. Every hook has a default `Noreply`
/// pass-through so user modules only override what they care about —
/// mirroring spec §4.4's "any message not matching the above is delivered
/// to the user module's generic handler" default behavior.
#[async_trait]
pub trait UserCallback: Send + Sync + 'static {
    type State: Clone + Send + Sync + 'static;

    /// A labor finished connecting (`node_up`) and its release load has
    /// been kicked off.
    async fn handle_connected(&self, _name: &LaborName, state: Self::State) -> Reply<Self::State> {
        Reply::Noreply(state)
    }

    /// A previously connected labor lost its control channel.
    async fn handle_disconnected(&self, _name: &LaborName, state: Self::State) -> Reply<Self::State> {
        Reply::Noreply(state)
    }

    /// A labor's registry entry was removed after reaching `Terminated`.
    async fn handle_terminated(&self, _name: &LaborName, state: Self::State) -> Reply<Self::State> {
        Reply::Noreply(state)
    }

    /// Unsolicited telemetry from a paired worker. Standardised on the
    /// `Noreply` family per spec §9 (the source had both `{:ok, state}` and
    /// `{:noreply, state}` shapes; this crate picks one).
    async fn handle_telemetry(&self, _telemetry: &Telemetry, state: Self::State) -> Reply<Self::State> {
        Reply::Noreply(state)
    }

    /// Any mailbox message that isn't one of the controller's native
    /// events. Fire-and-forget, matching `handle_info`/`handle_cast`.
    async fn handle_info(&self, _message: serde_json::Value, state: Self::State) -> Reply<Self::State> {
        Reply::Noreply(state)
    }

    /// A request/response style pass-through call.
    async fn handle_call(
        &self,
        _request: serde_json::Value,
        state: Self::State,
    ) -> CallReply<Self::State> {
        CallReply::Noreply(state)
    }

    /// Invoked once during overseer shutdown, after all labors have been
    /// terminated (best effort) and all timers cancelled.
    async fn terminate(&self, _reason: &str, _state: &Self::State) {}

    /// The source's hot-code-reload hook. Target implementations have no
    /// runtime notion of hot code change, so this unconditionally reports
    /// unsupported (spec §9).
    fn code_change(&self) -> std::result::Result<(), &'static str> { Err("code_change not supported") }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DefaultCallback;
    impl UserCallback for DefaultCallback {
        type State = u32;
    }

    #[tokio::test]
    async fn unoverridden_hooks_pass_state_through_unchanged() {
        let cb = DefaultCallback;
        let name = LaborName::new("w-1@host");
        let reply = cb.handle_connected(&name, 42).await;
        assert!(matches!(reply, Reply::Noreply(42)));
        assert!(cb.code_change().is_err());
    }
}
