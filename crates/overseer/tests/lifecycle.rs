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

//! Integration coverage for the concrete scenarios in spec §8: happy path,
//! connect timeout, disconnect/reconnect, permanent loss, worker exit, and
//! capacity exceeded. Drives a real `Overseer` against a controllable fake
//! `Adapter`/`Transport` pair — no real process or network involved.

use std::{
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use overseer::{
    Adapter, AdapterError, EventSink, Labor, LaborName, Overseer, Phase, Reply, Spec, Transport, TransportError,
    UserCallback,
};
use overseer_release::ReleaseRef;
use tokio::sync::{Mutex, watch};

/// An adapter that hands out unique names instantly and reports liveness
/// only when told to via its bound [`EventSink`] — tests drive `node_up`/
/// `exit` themselves instead of racing a background task.
struct ScriptedAdapter {
    prefix:        &'static str,
    host:          &'static str,
    spawn_count:   AtomicUsize,
    sink_tx:       watch::Sender<Option<EventSink>>,
    sink_rx:       watch::Receiver<Option<EventSink>>,
    terminate_log: Mutex<Vec<LaborName>>,
}

impl ScriptedAdapter {
    fn new(prefix: &'static str, host: &'static str) -> Arc<Self> {
        let (sink_tx, sink_rx) = watch::channel(None);
        Arc::new(Self {
            prefix,
            host,
            spawn_count: AtomicUsize::new(0),
            sink_tx,
            sink_rx,
            terminate_log: Mutex::new(Vec::new()),
        })
    }

    fn bind(&self, sink: EventSink) { let _ = self.sink_tx.send(Some(sink)); }

    fn sink(&self) -> EventSink { self.sink_rx.borrow().clone().expect("bind() called before use") }
}

#[async_trait]
impl Adapter for ScriptedAdapter {
    async fn spawn(&self, _overseer_id: &overseer::OverseerId) -> Result<Labor, AdapterError> {
        let n = self.spawn_count.fetch_add(1, Ordering::SeqCst);
        let name = LaborName::new(format!("{}-{n}@{}", self.prefix, self.host));
        Ok(Labor::spawning(name, format!("handle-{n}")))
    }

    async fn terminate(&self, labor: &Labor) -> Result<Labor, AdapterError> {
        self.terminate_log.lock().await.push(labor.name().clone());
        Ok(labor.with_phase(Phase::Terminated))
    }

    async fn connect(&self, _labor: &Labor) -> Result<(), AdapterError> { Ok(()) }
}

struct NoopTransport;

#[async_trait]
impl Transport for NoopTransport {
    async fn push_release(&self, _name: &LaborName, _artifact: &Path) -> Result<(), TransportError> { Ok(()) }

    async fn start_entry_point(
        &self,
        _name: &LaborName,
        _entry_point: Option<&overseer::EntryPoint>,
    ) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Counts callback invocations so assertions don't need a channel.
#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    connected:    u32,
    disconnected: u32,
    terminated:   u32,
}

struct RecordingCallback;

#[async_trait]
impl UserCallback for RecordingCallback {
    type State = Counters;

    async fn handle_connected(&self, _name: &LaborName, mut state: Self::State) -> Reply<Self::State> {
        state.connected += 1;
        Reply::Noreply(state)
    }

    async fn handle_disconnected(&self, _name: &LaborName, mut state: Self::State) -> Reply<Self::State> {
        state.disconnected += 1;
        Reply::Noreply(state)
    }

    async fn handle_terminated(&self, _name: &LaborName, mut state: Self::State) -> Reply<Self::State> {
        state.terminated += 1;
        Reply::Noreply(state)
    }
}

fn test_spec(adapter: Arc<ScriptedAdapter>, max_nodes: usize) -> Spec {
    Spec::builder()
        .adapter(adapter)
        .transport(Arc::new(NoopTransport))
        .release(ReleaseRef::parse("file:///tmp/release.tar.gz").unwrap())
        .max_nodes(max_nodes)
        .conn_timeout(Duration::from_millis(80))
        .pair_timeout(Duration::from_millis(80))
        .build()
}

/// Scenario 1: happy path in a simple pool — `start_child`, `node_up`,
/// `pair` all arrive, and the labor ends up `Active` with `handle_connected`
/// invoked exactly once.
#[tokio::test]
async fn happy_path_reaches_active() {
    let adapter = ScriptedAdapter::new("w", "host");
    let overseer = Overseer::start_link(test_spec(Arc::clone(&adapter), 2), RecordingCallback, Counters::default())
        .unwrap();
    adapter.bind(overseer.event_sink());

    let name = overseer.start_child().await.unwrap();
    adapter.sink().node_up(name.clone()).unwrap();

    // Give the connect + release-load background steps a moment to settle,
    // then pair.
    tokio::time::sleep(Duration::from_millis(40)).await;
    overseer.pair(name.clone(), overseer::PairPid::new("pid-1")).await.unwrap();

    let snapshot = overseer.snapshot().await.unwrap();
    let labor = snapshot.labors.iter().find(|l| l.name == name).unwrap();
    assert_eq!(labor.phase, Phase::Active);
    assert_eq!(overseer.count_children().await.unwrap(), 1);

    overseer.shutdown("test done").await;
}

/// Scenario 2: a labor that never connects is dropped when `conn_timeout`
/// fires, without ever invoking `handle_disconnected`.
#[tokio::test(start_paused = true)]
async fn connect_timeout_drops_without_disconnect_callback() {
    let adapter = ScriptedAdapter::new("w", "host");
    let overseer = Overseer::start_link(test_spec(Arc::clone(&adapter), 2), RecordingCallback, Counters::default())
        .unwrap();
    adapter.bind(overseer.event_sink());

    let _name = overseer.start_child().await.unwrap();
    assert_eq!(overseer.count_children().await.unwrap(), 1);

    tokio::time::advance(Duration::from_millis(200)).await;
    tokio::task::yield_now().await;

    assert_eq!(overseer.count_children().await.unwrap(), 0);

    overseer.shutdown("test done").await;
}

/// Scenario 3: disconnect then reconnect before the timer fires brings the
/// labor back to `Active` via a fresh `handle_connected`.
#[tokio::test]
async fn disconnect_then_reconnect_goes_active_again() {
    let adapter = ScriptedAdapter::new("w", "host");
    let overseer = Overseer::start_link(test_spec(Arc::clone(&adapter), 2), RecordingCallback, Counters::default())
        .unwrap();
    adapter.bind(overseer.event_sink());

    let name = overseer.start_child().await.unwrap();
    adapter.sink().node_up(name.clone()).unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    overseer.pair(name.clone(), overseer::PairPid::new("pid-1")).await.unwrap();

    adapter.sink().node_down(name.clone()).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    let mid = overseer.snapshot().await.unwrap();
    assert_eq!(mid.labors.iter().find(|l| l.name == name).unwrap().phase, Phase::Disconnected);

    adapter.sink().node_up(name.clone()).unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    overseer.pair(name.clone(), overseer::PairPid::new("pid-2")).await.unwrap();

    let snapshot = overseer.snapshot().await.unwrap();
    assert_eq!(snapshot.labors.iter().find(|l| l.name == name).unwrap().phase, Phase::Active);

    overseer.shutdown("test done").await;
}

/// Scenario 5: the linked pair endpoint exits under an `Active` labor whose
/// host is still live. `on_exit` re-drives `Pair.initiate` (connect -> load
/// -> pairing) rather than tearing the labor down; it stays tracked under
/// the same name and returns to `Active` once a fresh `pair` call lands.
#[tokio::test]
async fn worker_exit_redrives_pair_and_returns_to_active() {
    let adapter = ScriptedAdapter::new("w", "host");
    let overseer = Overseer::start_link(test_spec(Arc::clone(&adapter), 2), RecordingCallback, Counters::default())
        .unwrap();
    adapter.bind(overseer.event_sink());

    let name = overseer.start_child().await.unwrap();
    adapter.sink().node_up(name.clone()).unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    overseer.pair(name.clone(), overseer::PairPid::new("pid-1")).await.unwrap();

    let before = overseer.snapshot().await.unwrap();
    assert_eq!(before.labors.iter().find(|l| l.name == name).unwrap().phase, Phase::Active);

    adapter.sink().exit(name.clone(), "worker process died").unwrap();

    // Give the re-driven connect + release-load background steps a moment
    // to settle before pairing again.
    tokio::time::sleep(Duration::from_millis(30)).await;
    overseer.pair(name.clone(), overseer::PairPid::new("pid-2")).await.unwrap();

    let snapshot = overseer.snapshot().await.unwrap();
    let labor = snapshot.labors.iter().find(|l| l.name == name).unwrap();
    assert_eq!(labor.phase, Phase::Active);
    assert_eq!(overseer.count_children().await.unwrap(), 1, "exit must not drop the labor from the registry");

    overseer.shutdown("test done").await;
}

/// Scenario 4: disconnect with no reconnect drops the labor once
/// `conn_timeout` fires, decrementing `count_children`.
#[tokio::test(start_paused = true)]
async fn disconnect_without_reconnect_is_permanently_dropped() {
    let adapter = ScriptedAdapter::new("w", "host");
    let overseer = Overseer::start_link(test_spec(Arc::clone(&adapter), 2), RecordingCallback, Counters::default())
        .unwrap();
    adapter.bind(overseer.event_sink());

    let name = overseer.start_child().await.unwrap();
    adapter.sink().node_up(name.clone()).unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    overseer.pair(name.clone(), overseer::PairPid::new("pid-1")).await.unwrap();

    adapter.sink().node_down(name.clone()).unwrap();
    tokio::time::advance(Duration::from_millis(200)).await;
    tokio::task::yield_now().await;

    assert_eq!(overseer.count_children().await.unwrap(), 0);

    overseer.shutdown("test done").await;
}

/// Scenario 6: `start_child` at capacity returns an error without ever
/// calling the adapter.
#[tokio::test]
async fn cap_exceeded_never_touches_the_adapter() {
    let adapter = ScriptedAdapter::new("w", "host");
    let overseer = Overseer::start_link(test_spec(Arc::clone(&adapter), 1), RecordingCallback, Counters::default())
        .unwrap();
    adapter.bind(overseer.event_sink());

    overseer.start_child().await.unwrap();
    let err = overseer.start_child().await.unwrap_err();
    assert!(matches!(err, overseer::OverseerError::CapacityExceeded { .. }));
    assert_eq!(adapter.spawn_count.load(Ordering::SeqCst), 1);

    overseer.shutdown("test done").await;
}
