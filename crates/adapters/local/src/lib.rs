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

//! The `Local` reference adapter (spec §4.1, §6): provisions workers as
//! plain child OS processes on the same host the overseer runs on. No
//! network hop, no cloud API — the simplest adapter that still honours the
//! full `spawn`/`terminate`/`connect` contract, useful for local development
//! and for the test fleet in `demos/echo-fleet`.

use std::{path::PathBuf, process::Stdio, sync::Arc};

use async_trait::async_trait;
use nix::{
    sys::signal::{Signal, kill},
    unistd::Pid,
};
use overseer::{Adapter, AdapterError, EventSink, Labor, LaborName, OverseerId};
use snafu::{IntoError, ResultExt, Snafu};
use tokio::{process::Command, sync::watch};
use tracing::warn;

#[derive(Debug, Snafu)]
pub enum LocalAdapterError {
    #[snafu(display("failed to spawn local worker process {binary}: {source}"))]
    Spawn {
        binary: String,
        #[snafu(source)]
        source: std::io::Error,
    },

    #[snafu(display("local worker process exposed no OS pid"))]
    NoPid,

    #[snafu(display("labor handle {handle:?} is not a valid pid"))]
    BadHandle { handle: String },

    #[snafu(display("failed to signal pid {pid}: {source}"))]
    Signal {
        pid: i32,
        #[snafu(source)]
        source: nix::Error,
    },
}

/// Options recognised by the `Local` adapter (spec §6): the binary to run
/// per worker plus a name prefix. Everything else an embedder needs (env
/// vars, args) is set on the builder before `spawn_link`.
#[derive(Debug, Clone)]
pub struct LocalOptions {
    pub prefix: String,
    pub binary: PathBuf,
    pub args:   Vec<String>,
    pub envs:   Vec<(String, String)>,
}

impl LocalOptions {
    #[must_use]
    pub fn new(prefix: impl Into<String>, binary: impl Into<PathBuf>) -> Self {
        Self { prefix: prefix.into(), binary: binary.into(), args: Vec::new(), envs: Vec::new() }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }
}

/// Spawns and monitors local child processes. Node liveness is reported
/// through an [`EventSink`] that the embedder binds in once the controller
/// is up (see [`LocalAdapter::bind`]) — adapters are constructed before
/// `Overseer::start_link` runs, so they cannot hold the sink at construction
/// time.
pub struct LocalAdapter {
    options: LocalOptions,
    host:    String,
    sink_tx: watch::Sender<Option<EventSink>>,
    sink_rx: watch::Receiver<Option<EventSink>>,
}

impl LocalAdapter {
    #[must_use]
    pub fn new(options: LocalOptions) -> Self { Self::with_host(options, "localhost") }

    /// Like [`LocalAdapter::new`], but with an explicit host label for
    /// `LaborName` generation — useful when several `LocalAdapter`s share a
    /// machine in tests and need distinguishable names.
    #[must_use]
    pub fn with_host(options: LocalOptions, host: impl Into<String>) -> Self {
        let (sink_tx, sink_rx) = watch::channel(None);
        Self { options, host: host.into(), sink_tx, sink_rx }
    }

    /// Give the adapter a way to report `node_up`/`exit` once the
    /// controller task is running. Must be called exactly once, right after
    /// `Overseer::start_link`, before the first `start_child`.
    pub fn bind(&self, sink: EventSink) {
        let _ = self.sink_tx.send(Some(sink));
    }
}

#[async_trait]
impl Adapter for LocalAdapter {
    async fn spawn(&self, overseer_id: &OverseerId) -> Result<Labor, AdapterError> {
        let name = LaborName::generate(&self.options.prefix, &self.host);

        let mut cmd = Command::new(&self.options.binary);
        cmd.args(&self.options.args)
            .envs(self.options.envs.iter().cloned())
            .env("OVERSEER_ID", overseer_id.as_str())
            .env("OVERSEER_WORKER_NAME", name.as_str())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);

        let mut child = cmd.spawn().with_context(|_| SpawnSnafu {
            binary: self.options.binary.display().to_string(),
        })?;
        let pid = child.id().ok_or(NoPidSnafu.build())?;

        let mut sink_rx = self.sink_rx.clone();
        let watch_name = name.clone();
        tokio::spawn(async move {
            while sink_rx.borrow().is_none() {
                if sink_rx.changed().await.is_err() {
                    return;
                }
            }
            let sink = sink_rx.borrow().clone().expect("checked above");

            // A local process is its own control channel: the instant it's
            // running, it's reachable. Real adapters with a network hop
            // would wait for a handshake here instead.
            if let Err(error) = sink.node_up(watch_name.clone()) {
                warn!(%error, name = %watch_name, "failed to report node_up for local worker");
                return;
            }

            let reason = match child.wait().await {
                Ok(status) => format!("local worker process exited: {status}"),
                Err(error) => format!("failed to wait on local worker process: {error}"),
            };
            // Harmless if the controller already removed this labor via a
            // deliberate `terminate_child` — `on_exit` no-ops for unknown
            // names.
            let _ = sink.exit(watch_name, reason);
        });

        Ok(Labor::spawning(name, pid.to_string()))
    }

    async fn terminate(&self, labor: &Labor) -> Result<Labor, AdapterError> {
        let pid: i32 = labor
            .handle()
            .parse()
            .map_err(|_| BadHandleSnafu { handle: labor.handle().to_string() }.build())?;

        // Idempotent: ESRCH (no such process) means it's already gone, which
        // is exactly the postcondition `terminate` promises.
        match kill(Pid::from_raw(pid), Signal::SIGTERM) {
            Ok(()) | Err(nix::Error::ESRCH) => {}
            Err(source) => return Err(Box::new(SignalSnafu { pid }.into_error(source))),
        }

        Ok(labor.with_phase(overseer::Phase::Terminated))
    }

    async fn connect(&self, _labor: &Labor) -> Result<(), AdapterError> {
        // Loopback process: no separate handshake to perform. `node_up`
        // already established that the worker is reachable.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use overseer::{Overseer, Phase, Spec, UserCallback};
    use overseer_release::ReleaseRef;

    use super::*;

    struct NoopTransport;
    #[async_trait]
    impl overseer::Transport for NoopTransport {
        async fn push_release(
            &self,
            _name: &LaborName,
            _artifact: &std::path::Path,
        ) -> Result<(), overseer::TransportError> {
            Ok(())
        }

        async fn start_entry_point(
            &self,
            _name: &LaborName,
            _entry_point: Option<&overseer::EntryPoint>,
        ) -> Result<(), overseer::TransportError> {
            Ok(())
        }
    }

    struct NoopCallback;
    impl UserCallback for NoopCallback {
        type State = ();
    }

    #[tokio::test]
    async fn spawns_a_real_process_and_reports_node_up() {
        let options = LocalOptions::new("echo", "/bin/sleep").arg("30");
        let adapter = Arc::new(LocalAdapter::new(options));

        let spec = Spec::builder()
            .adapter(adapter.clone())
            .transport(Arc::new(NoopTransport))
            .release(ReleaseRef::parse("file:///tmp/release.tar.gz").unwrap())
            .conn_timeout(Duration::from_secs(5))
            .pair_timeout(Duration::from_secs(5))
            .build();

        let overseer = Overseer::start_link(spec, NoopCallback, ()).unwrap();
        adapter.bind(overseer.event_sink());

        let name = overseer.start_child().await.unwrap();

        // Give the monitor task a moment to observe the spawned process and
        // report node_up; then the controller should have moved past
        // `Spawning`.
        tokio::time::sleep(Duration::from_millis(200)).await;
        let snapshot = overseer.snapshot().await.unwrap();
        let labor = snapshot.labors.iter().find(|l| l.name == name).unwrap();
        assert_ne!(labor.phase, Phase::Spawning);

        overseer.terminate_child(name).await.unwrap();
        overseer.shutdown("test done").await;
    }
}
