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

//! Named, cancellable one-shot timers (spec §4.2).
//!
//! A timer is a background task that sleeps for a duration and then posts a
//! pre-built event back to the controller's mailbox, unless cancelled first.
//! `TimerService` tracks at most one in-flight [`CancellationToken`] per
//! `(labor, kind)` pair, matching the "arming a new timer of the same kind
//! cancels the prior one" rule.
//!
//! The controller owns its `TimerService` exclusively and only touches it
//! from within the single-threaded event loop, so the token map needs no
//! locking even though the sleeps themselves run as separate tasks.

use std::{collections::HashMap, time::Duration};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{id::LaborName, labor::TimerKind};

pub struct TimerService<E> {
    tokens: HashMap<(LaborName, TimerKind), CancellationToken>,
    sender: mpsc::UnboundedSender<E>,
}

impl<E> TimerService<E>
where
    E: Send + 'static,
{
    #[must_use]
    pub fn new(sender: mpsc::UnboundedSender<E>) -> Self { Self { tokens: HashMap::new(), sender } }

    /// Arm a timer for `name`/`kind`, cancelling any prior timer of the same
    /// kind on that labor first. `event` is posted to the controller mailbox
    /// if the timer is not cancelled before `duration` elapses.
    pub fn set(&mut self, name: LaborName, kind: TimerKind, duration: Duration, event: E) {
        self.cancel(&name, kind);

        let token = CancellationToken::new();
        self.tokens.insert((name, kind), token.clone());

        let sender = self.sender.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(duration) => {
                    let _ = sender.send(event);
                }
                () = token.cancelled() => {}
            }
        });
    }

    /// Cancel the timer for `name`/`kind`, if one is armed. Returns whether
    /// a timer was actually cancelled.
    pub fn cancel(&mut self, name: &LaborName, kind: TimerKind) -> bool {
        match self.tokens.remove(&(name.clone(), kind)) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every timer held for `name` (both kinds). Used by
    /// `terminate_child` and on shutdown.
    pub fn cancel_all(&mut self, name: &LaborName) {
        self.cancel(name, TimerKind::Conn);
        self.cancel(name, TimerKind::Pair);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn fires_after_duration_unless_cancelled() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = TimerService::new(tx);
        let name = LaborName::new("w-1@host");

        timers.set(name.clone(), TimerKind::Conn, Duration::from_millis(10), "conn_timeout");
        let event = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await.unwrap();
        assert_eq!(event, Some("conn_timeout"));
    }

    #[tokio::test]
    async fn cancelling_prevents_delivery() {
        let (tx, mut rx) = mpsc::unbounded_channel::<&'static str>();
        let mut timers = TimerService::new(tx);
        let name = LaborName::new("w-1@host");

        timers.set(name.clone(), TimerKind::Pair, Duration::from_millis(50), "pair_timeout");
        assert!(timers.cancel(&name, TimerKind::Pair));

        let result = tokio::time::timeout(Duration::from_millis(150), rx.recv()).await;
        assert!(result.is_err(), "cancelled timer must not deliver its event");
    }

    #[tokio::test]
    async fn rearming_cancels_the_prior_timer_of_the_same_kind() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = TimerService::new(tx);
        let name = LaborName::new("w-1@host");

        timers.set(name.clone(), TimerKind::Conn, Duration::from_millis(200), "first");
        timers.set(name.clone(), TimerKind::Conn, Duration::from_millis(10), "second");

        let event = tokio::time::timeout(Duration::from_millis(300), rx.recv()).await.unwrap();
        assert_eq!(event, Some("second"));
    }
}
