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

//! The controller: a single-threaded event loop owning the registry and
//! user state exclusively (spec §4.4, §5). Every external interaction —
//! API calls, adapter-reported infrastructure events, timer firings, and
//! the outcome of background work — arrives as an [`Event`] on one mailbox
//! and is handled to completion before the next is read. This is what
//! makes the "exactly one timer per (labor, kind)" and "registry mutated
//! only by the controller" invariants hold without any locking.

use std::sync::Arc;

use overseer_release::{Downloader, DownloaderConfig, ReleaseFetcher};
use snafu::IntoError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::{
    adapter::AdapterError,
    callback::{CallReply, Reply, UserCallback},
    err::{
        AdapterTerminateSnafu, CapacityExceededSnafu, OverseerError, SpawnFailedSnafu, StoppedSnafu,
        UnknownLaborSnafu,
    },
    id::{LaborName, OverseerId, PairPid},
    labor::{Labor, Phase, TimerKind},
    metrics, pair,
    state::{Spec, State},
    telemetry::Telemetry,
    timer::TimerService,
};

/// A read-only view of one tracked labor, returned by [`Overseer::snapshot`]
/// (spec §6's debug introspection).
#[derive(Debug, Clone)]
pub struct LaborSnapshot {
    pub name:     LaborName,
    pub phase:    Phase,
    pub pair_pid: Option<PairPid>,
}

/// The full registry snapshot handed back for debug introspection.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub overseer_id:   OverseerId,
    pub active_labors: usize,
    pub labors:        Vec<LaborSnapshot>,
}

/// Everything the controller's mailbox can receive: API calls from
/// [`Overseer`] handles, infrastructure events from adapters/workers, timer
/// firings, and the outcomes of background work the loop itself kicked off.
enum Event {
    StartChild {
        reply: oneshot::Sender<Result<LaborName, OverseerError>>,
    },
    TerminateChild {
        name:  LaborName,
        reply: oneshot::Sender<Result<(), OverseerError>>,
    },
    CountChildren {
        reply: oneshot::Sender<usize>,
    },
    Snapshot {
        reply: oneshot::Sender<Snapshot>,
    },
    Pair {
        name:  LaborName,
        pid:   PairPid,
        reply: oneshot::Sender<Result<(), OverseerError>>,
    },
    Telemetry(Telemetry),
    Info(serde_json::Value),
    Call {
        request: serde_json::Value,
        reply:   oneshot::Sender<serde_json::Value>,
    },

    NodeUp {
        name: LaborName,
    },
    NodeDown {
        name: LaborName,
    },
    Exit {
        name:   LaborName,
        reason: String,
    },
    ConnTimeout {
        name: LaborName,
    },
    PairTimeout {
        name: LaborName,
    },

    Spawned {
        result: Result<Labor, AdapterError>,
        reply:  oneshot::Sender<Result<LaborName, OverseerError>>,
    },
    Connected {
        name:   LaborName,
        result: Result<(), AdapterError>,
    },
    ReleaseLoaded {
        name:   LaborName,
        result: Result<(), OverseerError>,
    },
    Terminated {
        name:   LaborName,
        result: Result<Labor, AdapterError>,
        reply:  Option<oneshot::Sender<Result<(), OverseerError>>>,
    },

    Shutdown {
        reason: String,
    },
}

/// A handle to a running controller task. Cloning it (via `Arc` internally
/// on the sender) is cheap; dropping every handle lets the mailbox close
/// and the controller shut down on its own.
pub struct Overseer {
    sender:      mpsc::UnboundedSender<Event>,
    join_handle: tokio::task::JoinHandle<()>,
    overseer_id: OverseerId,
}

/// A cloneable, narrow handle carrying only the infrastructure-event side of
/// [`Overseer`]'s API (spec §4.4's `node_up`/`node_down`/`exit`/`telemetry`).
///
/// Adapters (`overseer-adapter-local`, `overseer-adapter-ec2`) are
/// constructed *before* the controller task exists — `Spec` needs the
/// adapter, and `Overseer::start_link` needs `Spec` — so they cannot hold an
/// `Overseer` directly. They instead hold a cell the embedder fills in with
/// an `EventSink` right after `start_link` returns, and use it from whatever
/// background task watches host/process liveness.
#[derive(Clone)]
pub struct EventSink {
    sender: mpsc::UnboundedSender<Event>,
}

impl EventSink {
    pub fn node_up(&self, name: LaborName) -> Result<(), OverseerError> { self.send(Event::NodeUp { name }) }

    pub fn node_down(&self, name: LaborName) -> Result<(), OverseerError> { self.send(Event::NodeDown { name }) }

    pub fn exit(&self, name: LaborName, reason: impl Into<String>) -> Result<(), OverseerError> {
        self.send(Event::Exit { name, reason: reason.into() })
    }

    pub fn telemetry(&self, telemetry: Telemetry) -> Result<(), OverseerError> {
        self.send(Event::Telemetry(telemetry))
    }

    fn send(&self, event: Event) -> Result<(), OverseerError> {
        self.sender.send(event).map_err(|_| StoppedSnafu { overseer_id: String::new() }.build())
    }
}

impl Overseer {
    /// Start a controller task bound to `callback` and `spec`, per spec
    /// §4.4/§9. Only `Strategy::SimpleOneForOne` is accepted; see
    /// `State::init` and `DESIGN.md`.
    pub fn start_link<CB: UserCallback>(
        spec: Spec,
        callback: CB,
        user_init_state: CB::State,
    ) -> Result<Self, OverseerError> {
        let state = State::init(spec, callback, user_init_state)?;
        let overseer_id = state.spec.overseer_id().clone();

        let (tx, rx) = mpsc::unbounded_channel();
        let timers = TimerService::new(tx.clone());
        let join_handle = tokio::spawn(run(state, rx, timers, tx.clone()));

        Ok(Self { sender: tx, join_handle, overseer_id })
    }

    #[must_use]
    pub const fn overseer_id(&self) -> &OverseerId { &self.overseer_id }

    /// A cloneable handle an adapter can use to report `node_up`/`node_down`/
    /// `exit`/`telemetry` from its own background tasks. See [`EventSink`].
    #[must_use]
    pub fn event_sink(&self) -> EventSink { EventSink { sender: self.sender.clone() } }

    /// Start a new labor, per spec §6. Returns the adapter-assigned name
    /// once `adapter.spawn` has returned (not once the worker has paired —
    /// callers that need to wait for `Active` should watch for a
    /// `handle_connected`/telemetry signal on their own side, the same way
    /// the source's `start_child` only guarantees the child was started).
    pub async fn start_child(&self) -> Result<LaborName, OverseerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Event::StartChild { reply })?;
        rx.await.map_err(|_| self.stopped())?
    }

    pub async fn terminate_child(&self, name: LaborName) -> Result<(), OverseerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Event::TerminateChild { name, reply })?;
        rx.await.map_err(|_| self.stopped())?
    }

    pub async fn count_children(&self) -> Result<usize, OverseerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Event::CountChildren { reply })?;
        rx.await.map_err(|_| self.stopped())
    }

    /// Debug introspection (spec §6): the full registry as of the moment
    /// the controller processes this request.
    pub async fn snapshot(&self) -> Result<Snapshot, OverseerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Event::Snapshot { reply })?;
        rx.await.map_err(|_| self.stopped())
    }

    /// The worker's reverse call once its entry point is up (spec §4.3
    /// step 3): "I am `pid`, here for `name`."
    pub async fn pair(&self, name: LaborName, pid: PairPid) -> Result<(), OverseerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Event::Pair { name, pid, reply })?;
        rx.await.map_err(|_| self.stopped())?
    }

    /// Adapter-reported: the host booted and the worker process is up, but
    /// not yet connected.
    pub fn node_up(&self, name: LaborName) -> Result<(), OverseerError> { self.send(Event::NodeUp { name }) }

    /// Adapter-reported: the control channel to `name` was lost.
    pub fn node_down(&self, name: LaborName) -> Result<(), OverseerError> { self.send(Event::NodeDown { name }) }

    /// Adapter-reported: the worker process itself exited.
    pub fn exit(&self, name: LaborName, reason: impl Into<String>) -> Result<(), OverseerError> {
        self.send(Event::Exit { name, reason: reason.into() })
    }

    /// Unsolicited telemetry from a paired worker (spec §6).
    pub fn telemetry(&self, telemetry: Telemetry) -> Result<(), OverseerError> {
        self.send(Event::Telemetry(telemetry))
    }

    /// Fire-and-forget message routed to `UserCallback::handle_info`.
    pub fn cast(&self, message: serde_json::Value) -> Result<(), OverseerError> { self.send(Event::Info(message)) }

    /// Request/response message routed to `UserCallback::handle_call`.
    pub async fn call(&self, request: serde_json::Value) -> Result<serde_json::Value, OverseerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Event::Call { request, reply })?;
        rx.await.map_err(|_| self.stopped())
    }

    /// Ask the controller to shut down: terminate every active labor,
    /// invoke `UserCallback::terminate`, and exit the event loop. Consumes
    /// the handle and waits for the task to finish.
    pub async fn shutdown(self, reason: impl Into<String>) {
        let _ = self.sender.send(Event::Shutdown { reason: reason.into() });
        let _ = self.join_handle.await;
    }

    fn send(&self, event: Event) -> Result<(), OverseerError> {
        self.sender.send(event).map_err(|_| self.stopped())
    }

    fn stopped(&self) -> OverseerError {
        StoppedSnafu { overseer_id: self.overseer_id.as_str().to_string() }.build()
    }
}

/// The event loop proper. Runs until the mailbox closes (every `Overseer`
/// handle dropped) or a `Shutdown` event is processed.
async fn run<CB: UserCallback>(
    mut state: State<CB>,
    mut rx: mpsc::UnboundedReceiver<Event>,
    mut timers: TimerService<Event>,
    tx: mpsc::UnboundedSender<Event>,
) {
    metrics::LABORS_ACTIVE
        .with_label_values(&[metrics::OVERSEER_LABEL])
        .set(0);

    while let Some(event) = rx.recv().await {
        if let Some(reason) = handle_event(&mut state, &mut timers, &tx, event).await {
            shutdown_loop(&state, &mut timers, &reason).await;
            return;
        }
    }

    // Mailbox closed without an explicit Shutdown: every handle was dropped.
    shutdown_loop(&state, &mut timers, "all overseer handles dropped").await;
}

/// Handle one event to completion. Returns `Some(reason)` if this event
/// should end the event loop (an explicit `Shutdown`, or a user callback
/// returning `Stop`).
async fn handle_event<CB: UserCallback>(
    state: &mut State<CB>,
    timers: &mut TimerService<Event>,
    tx: &mpsc::UnboundedSender<Event>,
    event: Event,
) -> Option<String> {
    match event {
        Event::StartChild { reply } => {
            start_child(state, tx, reply);
            None
        }
        Event::Spawned { result, reply } => {
            on_spawned(state, timers, result, reply);
            None
        }
        Event::NodeUp { name } => {
            on_node_up(state, timers, tx, name);
            None
        }
        Event::Connected { name, result } => on_connected(state, timers, tx, name, result).await,
        Event::ReleaseLoaded { name, result } => on_release_loaded(state, timers, tx, name, result).await,
        Event::Pair { name, pid, reply } => {
            on_pair(state, timers, name, pid, reply);
            None
        }
        Event::NodeDown { name } => on_node_down(state, timers, name).await,
        Event::Exit { name, reason } => on_exit(state, timers, tx, name, reason).await,
        Event::ConnTimeout { name } => on_conn_timeout(state, timers, name).await,
        Event::PairTimeout { name } => on_pair_timeout(state, timers, tx, name).await,
        Event::TerminateChild { name, reply } => {
            terminate_child(state, timers, tx, name, Some(reply));
            None
        }
        Event::Terminated { name, result, reply } => on_terminated(state, result, name, reply).await,
        Event::CountChildren { reply } => {
            let _ = reply.send(state.count_active_labors());
            None
        }
        Event::Snapshot { reply } => {
            let _ = reply.send(snapshot_of(state));
            None
        }
        Event::Telemetry(telemetry) => {
            on_telemetry(state, telemetry).await;
            None
        }
        Event::Info(message) => on_info(state, message).await,
        Event::Call { request, reply } => on_call(state, request, reply).await,
        Event::Shutdown { reason } => Some(reason),
    }
}

fn start_child<CB: UserCallback>(
    state: &mut State<CB>,
    tx: &mpsc::UnboundedSender<Event>,
    reply: oneshot::Sender<Result<LaborName, OverseerError>>,
) {
    // Check (and reserve) against pending spawns too, not just the
    // registry: the labor isn't inserted until `on_spawned` runs, which
    // happens only after `adapter.spawn` returns on a background task. Two
    // `StartChild` events processed back to back, both before either spawn
    // lands, must not both pass this check (spec §3 invariant 1).
    if state.reserved_slots() >= state.spec.max_nodes() {
        let _ = reply.send(Err(CapacityExceededSnafu { max_nodes: state.spec.max_nodes() }.build()));
        return;
    }
    state.pending_spawns += 1;

    let adapter = Arc::clone(&state.spec.adapter);
    let overseer_id = state.spec.overseer_id().clone();
    let tx = tx.clone();
    overseer_runtime::spawn_background(async move {
        let result = adapter.spawn(&overseer_id).await;
        let _ = tx.send(Event::Spawned { result, reply });
    });
}

fn on_spawned<CB: UserCallback>(
    state: &mut State<CB>,
    timers: &mut TimerService<Event>,
    result: Result<Labor, AdapterError>,
    reply: oneshot::Sender<Result<LaborName, OverseerError>>,
) {
    state.pending_spawns = state.pending_spawns.saturating_sub(1);

    match result {
        Ok(labor) => {
            let name = labor.name().clone();
            metrics::LABORS_SPAWNED.with_label_values(&[metrics::OVERSEER_LABEL]).inc();
            metrics::LABORS_ACTIVE.with_label_values(&[metrics::OVERSEER_LABEL]).inc();
            timers.set(name.clone(), TimerKind::Conn, state.spec.conn_timeout, Event::ConnTimeout { name: name.clone() });
            let labor = labor.with_timer_armed(TimerKind::Conn, true);
            state.registry.insert(name.clone(), labor);
            let _ = reply.send(Ok(name));
        }
        Err(source) => {
            metrics::SPAWN_FAILURES.with_label_values(&[metrics::OVERSEER_LABEL]).inc();
            let _ = reply.send(Err(SpawnFailedSnafu.into_error(source)));
        }
    }
}

fn on_node_up<CB: UserCallback>(
    state: &mut State<CB>,
    timers: &mut TimerService<Event>,
    tx: &mpsc::UnboundedSender<Event>,
    name: LaborName,
) {
    let Some(labor) = state.registry.get(&name) else {
        warn!(%name, "node_up for unknown labor");
        return;
    };
    if !matches!(labor.phase(), Phase::Spawning | Phase::Disconnected) {
        debug!(%name, phase = ?labor.phase(), "ignoring node_up: not waiting for one");
        return;
    }

    timers.cancel(&name, TimerKind::Conn);
    let labor = labor.with_phase(Phase::Connecting).with_timer_armed(TimerKind::Conn, false);
    state.registry.insert(name.clone(), labor.clone());

    let adapter = Arc::clone(&state.spec.adapter);
    let tx = tx.clone();
    overseer_runtime::spawn_background(async move {
        let result = adapter.connect(&labor).await;
        let _ = tx.send(Event::Connected { name, result });
    });
}

async fn on_connected<CB: UserCallback>(
    state: &mut State<CB>,
    timers: &mut TimerService<Event>,
    tx: &mpsc::UnboundedSender<Event>,
    name: LaborName,
    result: Result<(), AdapterError>,
) -> Option<String> {
    let Some(labor) = state.registry.get(&name).cloned() else { return None };
    if labor.phase() != Phase::Connecting {
        debug!(%name, phase = ?labor.phase(), "ignoring stale connect result: phase has moved on");
        return None;
    }

    match result {
        Ok(()) => {
            let labor = labor.with_phase(Phase::Loading);
            state.registry.insert(name.clone(), labor.clone());

            let reply = state.callback.clone().handle_connected(&name, state.user_state.clone()).await;
            let stop = invoke_reply(state, reply);

            let release = state.spec.release.clone();
            let transport = Arc::clone(&state.spec.transport);
            let entry_point = state.spec.entry_point.clone();
            let work_dir = pair::default_work_dir();
            let tx = tx.clone();
            overseer_runtime::spawn_background(async move {
                let _ = tokio::fs::create_dir_all(&work_dir).await;
                let fetcher = ReleaseFetcher::new(Downloader::new(DownloaderConfig::default()));
                let result = pair::load_release(&fetcher, transport.as_ref(), &release, entry_point.as_ref(), &name, &work_dir).await;
                let _ = tx.send(Event::ReleaseLoaded { name, result });
            });

            stop
        }
        Err(_) => {
            warn!(%name, "adapter connect failed; re-driving Pair.initiate");
            retry_pair(state, timers, tx, labor);
            None
        }
    }
}

async fn on_release_loaded<CB: UserCallback>(
    state: &mut State<CB>,
    timers: &mut TimerService<Event>,
    tx: &mpsc::UnboundedSender<Event>,
    name: LaborName,
    result: Result<(), OverseerError>,
) -> Option<String> {
    let Some(labor) = state.registry.get(&name).cloned() else { return None };
    if labor.phase() != Phase::Loading {
        debug!(%name, phase = ?labor.phase(), "ignoring stale release-load result: phase has moved on");
        return None;
    }

    match result {
        Ok(()) => {
            timers.set(name.clone(), TimerKind::Pair, state.spec.pair_timeout, Event::PairTimeout { name: name.clone() });
            let labor = labor.with_phase(Phase::Pairing).with_timer_armed(TimerKind::Pair, true);
            state.registry.insert(name, labor);
            None
        }
        Err(error) => {
            warn!(%name, %error, "release load/handshake failed; re-driving Pair.initiate");
            retry_pair(state, timers, tx, labor);
            None
        }
    }
}

fn on_pair<CB: UserCallback>(
    state: &mut State<CB>,
    timers: &mut TimerService<Event>,
    name: LaborName,
    pid: PairPid,
    reply: oneshot::Sender<Result<(), OverseerError>>,
) {
    let Some(labor) = state.registry.get(&name) else {
        let _ = reply.send(Err(UnknownLaborSnafu { name }.build()));
        return;
    };
    if labor.phase() != Phase::Pairing {
        debug!(%name, phase = ?labor.phase(), "pair call outside the pairing window; accepting anyway");
    }

    timers.cancel(&name, TimerKind::Pair);
    let labor = labor
        .with_phase(Phase::Active)
        .with_pair_pid(pid)
        .with_timer_armed(TimerKind::Pair, false);
    state.registry.insert(name, labor);
    let _ = reply.send(Ok(()));
}

async fn on_node_down<CB: UserCallback>(
    state: &mut State<CB>,
    timers: &mut TimerService<Event>,
    name: LaborName,
) -> Option<String> {
    let Some(labor) = state.registry.get(&name).cloned() else { return None };
    if matches!(labor.phase(), Phase::Terminated) {
        return None;
    }

    timers.set(name.clone(), TimerKind::Conn, state.spec.conn_timeout, Event::ConnTimeout { name: name.clone() });
    let labor = labor.with_phase(Phase::Disconnected).with_timer_armed(TimerKind::Conn, true);
    state.registry.insert(name.clone(), labor);

    let reply = state.callback.clone().handle_disconnected(&name, state.user_state.clone()).await;
    invoke_reply(state, reply)
}

async fn on_exit<CB: UserCallback>(
    state: &mut State<CB>,
    timers: &mut TimerService<Event>,
    tx: &mpsc::UnboundedSender<Event>,
    name: LaborName,
    reason: String,
) -> Option<String> {
    let Some(labor) = state.registry.get(&name).cloned() else { return None };
    info!(%name, %reason, "linked pair endpoint exited; re-driving Pair.initiate against the still-live host");
    retry_pair(state, timers, tx, labor);
    None
}

async fn on_conn_timeout<CB: UserCallback>(
    state: &mut State<CB>,
    timers: &mut TimerService<Event>,
    name: LaborName,
) -> Option<String> {
    let Some(labor) = state.registry.get(&name).cloned() else { return None };
    // The conn timer is only ever armed while Spawning (waiting for the
    // first node_up) or Disconnected (waiting to reconnect); node_up cancels
    // it the moment it's processed (see on_node_up), moving the labor to
    // Connecting. A timeout delivered for a labor already in Connecting (or
    // later) raced with that cancellation and is stale — ignore it rather
    // than tearing down a worker that actually connected.
    if !matches!(labor.phase(), Phase::Spawning | Phase::Disconnected) {
        debug!(%name, phase = ?labor.phase(), "ignoring stale conn_timeout: phase has moved on");
        return None;
    }
    metrics::CONNECT_TIMEOUTS.with_label_values(&[metrics::OVERSEER_LABEL]).inc();
    warn!(%name, "labor failed to (re)connect in time");
    teardown(state, timers, labor, "connect timeout").await
}

async fn on_pair_timeout<CB: UserCallback>(
    state: &mut State<CB>,
    timers: &mut TimerService<Event>,
    tx: &mpsc::UnboundedSender<Event>,
    name: LaborName,
) -> Option<String> {
    let Some(labor) = state.registry.get(&name).cloned() else { return None };
    if labor.phase() != Phase::Pairing {
        return None;
    }
    warn!(%name, "labor failed to pair in time; re-driving Pair.initiate");
    retry_pair(state, timers, tx, labor);
    None
}

/// `Pair.initiate` (spec §4.3, §4.4, §7): restart the load/pair sequence
/// against a host that is still live, rather than tearing the labor down.
/// Used for connect failures, release-load failures, a `pair_timeout` fire,
/// and a linked control-endpoint `exit` — every case the error table marks
/// "retry" rather than "drop". Only `conn_timeout` on a `disconnected` labor
/// actually removes it from the registry.
fn retry_pair<CB: UserCallback>(
    state: &mut State<CB>,
    timers: &mut TimerService<Event>,
    tx: &mpsc::UnboundedSender<Event>,
    labor: Labor,
) {
    let name = labor.name().clone();
    metrics::PAIR_RETRIES.with_label_values(&[metrics::OVERSEER_LABEL]).inc();

    timers.cancel_all(&name);
    let labor = labor
        .with_phase(Phase::Connecting)
        .with_timer_armed(TimerKind::Conn, false)
        .with_timer_armed(TimerKind::Pair, false);
    state.registry.insert(name.clone(), labor.clone());

    let adapter = Arc::clone(&state.spec.adapter);
    let tx = tx.clone();
    overseer_runtime::spawn_background(async move {
        let result = adapter.connect(&labor).await;
        let _ = tx.send(Event::Connected { name, result });
    });
}

fn terminate_child<CB: UserCallback>(
    state: &mut State<CB>,
    timers: &mut TimerService<Event>,
    tx: &mpsc::UnboundedSender<Event>,
    name: LaborName,
    reply: Option<oneshot::Sender<Result<(), OverseerError>>>,
) {
    let Some(labor) = state.registry.get(&name).cloned() else {
        if let Some(reply) = reply {
            let _ = reply.send(Ok(()));
        }
        return;
    };

    timers.cancel_all(&name);
    let adapter = Arc::clone(&state.spec.adapter);
    let tx = tx.clone();
    overseer_runtime::spawn_background(async move {
        let result = adapter.terminate(&labor).await;
        let _ = tx.send(Event::Terminated { name, result, reply });
    });
}

async fn on_terminated<CB: UserCallback>(
    state: &mut State<CB>,
    result: Result<Labor, AdapterError>,
    name: LaborName,
    reply: Option<oneshot::Sender<Result<(), OverseerError>>>,
) -> Option<String> {
    let was_active = state.registry.remove(&name).is_some_and(|labor| labor.phase().is_active());
    if was_active {
        metrics::LABORS_ACTIVE.with_label_values(&[metrics::OVERSEER_LABEL]).dec();
    }
    metrics::LABORS_TERMINATED.with_label_values(&[metrics::OVERSEER_LABEL]).inc();

    let stop = invoke_reply(state, state.callback.clone().handle_terminated(&name, state.user_state.clone()).await);

    if let Some(reply) = reply {
        let outcome = result
            .map(|_| ())
            .map_err(|source| AdapterTerminateSnafu { name }.into_error(source));
        let _ = reply.send(outcome);
    }

    stop
}

async fn on_telemetry<CB: UserCallback>(state: &mut State<CB>, telemetry: Telemetry) {
    let name = telemetry.name.clone().into_labor_name();
    if !state.registry.contains_key(&name) {
        metrics::TELEMETRY_DROPPED.with_label_values(&[metrics::OVERSEER_LABEL]).inc();
        debug!(%name, "telemetry for unknown labor dropped");
        return;
    }
    metrics::TELEMETRY_RECEIVED.with_label_values(&[metrics::OVERSEER_LABEL]).inc();
    let reply = state.callback.clone().handle_telemetry(&telemetry, state.user_state.clone()).await;
    // handle_telemetry cannot stop the overseer (spec §9): only the state is
    // threaded back.
    state.user_state = reply.into_state();
}

async fn on_info<CB: UserCallback>(state: &mut State<CB>, message: serde_json::Value) -> Option<String> {
    invoke_reply(state, state.callback.clone().handle_info(message, state.user_state.clone()).await)
}

async fn on_call<CB: UserCallback>(
    state: &mut State<CB>,
    request: serde_json::Value,
    reply: oneshot::Sender<serde_json::Value>,
) -> Option<String> {
    match state.callback.clone().handle_call(request, state.user_state.clone()).await {
        CallReply::Reply(value, next_state) => {
            state.user_state = next_state;
            let _ = reply.send(value);
            None
        }
        CallReply::Noreply(next_state) | CallReply::NoreplyHibernate(next_state) => {
            state.user_state = next_state;
            let _ = reply.send(serde_json::Value::Null);
            None
        }
        CallReply::Stop(reason, next_state) => {
            state.user_state = next_state;
            let _ = reply.send(serde_json::Value::Null);
            Some(reason)
        }
    }
}

/// Drop a labor that failed to (re)connect within `conn_timeout` (spec §7):
/// terminate the adapter's resources best-effort, remove the registry
/// entry, and notify the user module. The only failure path that actually
/// gives up on a host rather than retrying via [`retry_pair`].
async fn teardown<CB: UserCallback>(
    state: &mut State<CB>,
    timers: &mut TimerService<Event>,
    labor: Labor,
    reason: &str,
) -> Option<String> {
    let name = labor.name().clone();
    timers.cancel_all(&name);

    if let Err(error) = state.spec.adapter.terminate(&labor).await {
        warn!(%name, %error, "adapter terminate failed during teardown");
    }

    let was_active = state.registry.remove(&name).is_some_and(|l| l.phase().is_active());
    if was_active {
        metrics::LABORS_ACTIVE.with_label_values(&[metrics::OVERSEER_LABEL]).dec();
    }
    metrics::LABORS_TERMINATED.with_label_values(&[metrics::OVERSEER_LABEL]).inc();
    debug!(%name, %reason, "labor torn down");

    invoke_reply(state, state.callback.clone().handle_terminated(&name, state.user_state.clone()).await)
}

/// Thread a `Reply` back into `state.user_state`, returning a stop reason
/// if the hook asked to stop.
fn invoke_reply<CB: UserCallback>(state: &mut State<CB>, reply: Reply<CB::State>) -> Option<String> {
    match reply {
        Reply::Stop(reason, next_state) => {
            state.user_state = next_state;
            Some(reason)
        }
        Reply::Noreply(next_state) | Reply::NoreplyHibernate(next_state) => {
            state.user_state = next_state;
            None
        }
    }
}

fn snapshot_of<CB: UserCallback>(state: &State<CB>) -> Snapshot {
    Snapshot {
        overseer_id:   state.spec.overseer_id().clone(),
        active_labors: state.count_active_labors(),
        labors:        state
            .registry
            .values()
            .map(|labor| LaborSnapshot {
                name:     labor.name().clone(),
                phase:    labor.phase(),
                pair_pid: labor.pair_pid().cloned(),
            })
            .collect(),
    }
}

/// Best-effort graceful shutdown (spec §4.4): terminate every tracked
/// labor concurrently, bounded by a `JoinSet`, then invoke
/// `UserCallback::terminate` once.
async fn shutdown_loop<CB: UserCallback>(state: &State<CB>, timers: &mut TimerService<Event>, reason: &str) {
    info!(%reason, "overseer shutting down");

    let mut joins = tokio::task::JoinSet::new();
    for labor in state.registry.values().cloned() {
        timers.cancel_all(labor.name());
        let adapter = Arc::clone(&state.spec.adapter);
        joins.spawn(async move { adapter.terminate(&labor).await });
    }
    while let Some(outcome) = joins.join_next().await {
        if let Err(error) = outcome {
            warn!(%error, "labor termination task panicked during shutdown");
        }
    }

    state.callback.terminate(reason, &state.user_state).await;
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use overseer_release::ReleaseRef;

    use super::*;
    use crate::{
        id::LaborName,
        state::Spec,
        test_support::{FakeAdapter, FakeTransport},
    };

    struct CountingCallback;
    impl UserCallback for CountingCallback {
        type State = u32;
    }

    fn test_spec(adapter: FakeAdapter, transport: FakeTransport) -> Spec {
        Spec::builder()
            .adapter(Arc::new(adapter))
            .transport(Arc::new(transport))
            .release(ReleaseRef::parse("file:///tmp/release.tar.gz").unwrap())
            .conn_timeout(Duration::from_millis(50))
            .pair_timeout(Duration::from_millis(50))
            .build()
    }

    #[tokio::test]
    async fn start_child_rejects_past_capacity() {
        let spec = Spec::builder()
            .adapter(Arc::new(FakeAdapter::new("w", "host")))
            .transport(Arc::new(FakeTransport::new()))
            .release(ReleaseRef::parse("file:///tmp/release.tar.gz").unwrap())
            .max_nodes(0)
            .build();
        let overseer = Overseer::start_link(spec, CountingCallback, 0).unwrap();

        let err = overseer.start_child().await.unwrap_err();
        assert!(matches!(err, OverseerError::CapacityExceeded { .. }));

        overseer.shutdown("test done").await;
    }

    #[tokio::test]
    async fn count_children_reflects_started_labors() {
        let spec = test_spec(FakeAdapter::new("w", "host"), FakeTransport::new());
        let overseer = Overseer::start_link(spec, CountingCallback, 0).unwrap();

        overseer.start_child().await.unwrap();
        overseer.start_child().await.unwrap();
        assert_eq!(overseer.count_children().await.unwrap(), 2);

        overseer.shutdown("test done").await;
    }

    /// An adapter whose `spawn` only resolves once told to, so a test can
    /// hold two `StartChild` calls in flight at once and control exactly
    /// when each offloaded spawn lands.
    struct SlowAdapter {
        spawn_calls: std::sync::atomic::AtomicUsize,
        release:     tokio::sync::Notify,
    }

    impl SlowAdapter {
        fn new() -> Arc<Self> {
            Arc::new(Self { spawn_calls: std::sync::atomic::AtomicUsize::new(0), release: tokio::sync::Notify::new() })
        }

        fn release_one(&self) { self.release.notify_one(); }
    }

    #[async_trait::async_trait]
    impl crate::adapter::Adapter for SlowAdapter {
        async fn spawn(&self, _overseer_id: &OverseerId) -> Result<Labor, AdapterError> {
            self.release.notified().await;
            let n = self.spawn_calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(Labor::spawning(LaborName::new(format!("w-{n}@host")), format!("pid-{n}")))
        }

        async fn terminate(&self, labor: &Labor) -> Result<Labor, AdapterError> {
            Ok(labor.with_phase(Phase::Terminated))
        }

        async fn connect(&self, _labor: &Labor) -> Result<(), AdapterError> { Ok(()) }
    }

    /// Regression test for the `start_child`/`on_spawned` capacity race: two
    /// `StartChild` calls in flight concurrently, both offloaded before
    /// either spawn lands in the registry, must not both pass the
    /// `max_nodes` check (spec §3 invariant 1, §8 boundary behaviour).
    #[tokio::test]
    async fn concurrent_start_child_never_exceeds_max_nodes() {
        let adapter = SlowAdapter::new();
        let spec = Spec::builder()
            .adapter(Arc::clone(&adapter) as Arc<dyn crate::adapter::Adapter>)
            .transport(Arc::new(FakeTransport::new()))
            .release(ReleaseRef::parse("file:///tmp/release.tar.gz").unwrap())
            .max_nodes(1)
            .build();
        let overseer = Overseer::start_link(spec, CountingCallback, 0).unwrap();

        // `join!` polls both calls in source order every time either one is
        // re-polled, so both StartChild events reach the controller's
        // mailbox before the first one's offloaded spawn can possibly
        // finish: the first reserves the only slot via `pending_spawns`,
        // and the second must be rejected without ever reaching the
        // adapter. Release the held spawn only once both are in flight.
        let first = overseer.start_child();
        let second = overseer.start_child();
        tokio::pin!(first, second);
        adapter.release_one();
        let (first_result, second_result) = tokio::join!(first, second);

        let results = [first_result, second_result];
        let ok_count = results.iter().filter(|r| r.is_ok()).count();
        let err_count = results
            .iter()
            .filter(|r| matches!(r, Err(OverseerError::CapacityExceeded { .. })))
            .count();
        assert_eq!(ok_count, 1, "exactly one start_child must succeed at max_nodes=1");
        assert_eq!(err_count, 1, "the other must be rejected as CapacityExceeded");
        assert_eq!(adapter.spawn_calls.load(std::sync::atomic::Ordering::SeqCst), 1);

        overseer.shutdown("test done").await;
    }

    #[tokio::test]
    async fn terminate_child_is_idempotent_for_unknown_names() {
        let spec = test_spec(FakeAdapter::new("w", "host"), FakeTransport::new());
        let overseer = Overseer::start_link(spec, CountingCallback, 0).unwrap();

        overseer.terminate_child(LaborName::new("ghost@host")).await.unwrap();

        overseer.shutdown("test done").await;
    }

    #[tokio::test]
    async fn stale_connected_event_does_not_revert_an_active_labor() {
        let spec = test_spec(FakeAdapter::new("w", "host"), FakeTransport::new());
        let mut state = State::init(spec, CountingCallback, 0).unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut timers = TimerService::new(tx.clone());

        let name = LaborName::new("w-0@host");
        let labor = Labor::spawning(name.clone(), "pid-0").with_phase(Phase::Active);
        state.registry.insert(name.clone(), labor);

        let stop = on_connected(&mut state, &mut timers, &tx, name.clone(), Ok(())).await;

        assert!(stop.is_none());
        assert_eq!(state.registry.get(&name).unwrap().phase(), Phase::Active);
    }

    #[tokio::test]
    async fn stale_release_loaded_event_does_not_revert_an_active_labor() {
        let spec = test_spec(FakeAdapter::new("w", "host"), FakeTransport::new());
        let mut state = State::init(spec, CountingCallback, 0).unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut timers = TimerService::new(tx.clone());

        let name = LaborName::new("w-0@host");
        let labor = Labor::spawning(name.clone(), "pid-0").with_phase(Phase::Active);
        state.registry.insert(name.clone(), labor);

        let stop = on_release_loaded(&mut state, &mut timers, &tx, name.clone(), Ok(())).await;

        assert!(stop.is_none());
        assert_eq!(state.registry.get(&name).unwrap().phase(), Phase::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn conn_timeout_drops_a_labor_that_never_connects() {
        let spec = test_spec(FakeAdapter::new("w", "host"), FakeTransport::new());
        let overseer = Overseer::start_link(spec, CountingCallback, 0).unwrap();

        let name = overseer.start_child().await.unwrap();
        assert_eq!(overseer.count_children().await.unwrap(), 1);

        tokio::time::advance(Duration::from_millis(200)).await;
        tokio::task::yield_now().await;

        assert_eq!(overseer.count_children().await.unwrap(), 0);
        let _ = name;

        overseer.shutdown("test done").await;
    }
}
