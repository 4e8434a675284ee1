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

//! A small CLI that drives a real `Overseer` over the `Local` adapter:
//! spawns a handful of `sleep`-based "worker" processes, watches them
//! connect, and logs every lifecycle callback. No release artifact is
//! actually pushed (the demo worker never calls `pair`), so every labor
//! sits in `Loading` once `node_up` fires — enough to exercise spawn,
//! connect, and crash-recovery without a real worker payload.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use clap::Parser;
use overseer::{EntryPoint, LaborName, Overseer, Reply, Spec, Transport, TransportError, UserCallback};
use overseer_adapter_local::{LocalAdapter, LocalOptions};
use overseer_release::ReleaseRef;
use overseer_telemetry::{LoggingOptions, init_global_logging};
use snafu::Whatever;
use tracing::info;

#[derive(Debug, Parser)]
#[clap(name = "echo-fleet", about = "Demo fleet driven by Overseer's Local adapter")]
struct Cli {
    /// Worker name prefix.
    #[arg(long, default_value = "echo")]
    prefix: String,

    /// Binary each worker runs; defaults to a long-lived no-op process.
    #[arg(long, default_value = "/bin/sleep")]
    binary: String,

    /// Argument passed to `binary` (ignored if you supply your own binary
    /// that doesn't take a duration argument).
    #[arg(long, default_value = "300")]
    binary_arg: String,

    /// How many workers to start.
    #[arg(long, default_value_t = 3)]
    count: usize,

    /// Upper bound on concurrently active labors.
    #[arg(long, default_value_t = 8)]
    max_nodes: usize,

    /// Seconds to wait for a worker to connect (or reconnect).
    #[arg(long, default_value_t = 10)]
    conn_timeout_secs: u64,

    /// Seconds to wait for the post-connect pairing handshake.
    #[arg(long, default_value_t = 10)]
    pair_timeout_secs: u64,

    /// Seconds to run before shutting the fleet down.
    #[arg(long, default_value_t = 30)]
    run_for_secs: u64,
}

/// A `Transport` that logs what it would push/start instead of talking to a
/// real worker payload. Stands in for the scp-equivalent-plus-remote-command
/// transport `pair.rs` documents as the typical real implementation.
struct LoggingTransport;

#[async_trait]
impl Transport for LoggingTransport {
    async fn push_release(&self, name: &LaborName, artifact: &std::path::Path) -> Result<(), TransportError> {
        info!(%name, artifact = %artifact.display(), "would push release to worker");
        Ok(())
    }

    async fn start_entry_point(
        &self,
        name: &LaborName,
        entry_point: Option<&EntryPoint>,
    ) -> Result<(), TransportError> {
        info!(%name, ?entry_point, "would start worker entry point");
        Ok(())
    }
}

/// Counts lifecycle events so the demo can print a final summary.
#[derive(Debug, Default, Clone, Copy)]
struct FleetCounters {
    connected:    u32,
    disconnected: u32,
    terminated:   u32,
}

struct FleetCallback;

#[async_trait]
impl UserCallback for FleetCallback {
    type State = FleetCounters;

    async fn handle_connected(&self, name: &LaborName, mut state: Self::State) -> Reply<Self::State> {
        info!(%name, "worker connected");
        state.connected += 1;
        Reply::Noreply(state)
    }

    async fn handle_disconnected(&self, name: &LaborName, mut state: Self::State) -> Reply<Self::State> {
        info!(%name, "worker disconnected; reconnect window armed");
        state.disconnected += 1;
        Reply::Noreply(state)
    }

    async fn handle_terminated(&self, name: &LaborName, mut state: Self::State) -> Reply<Self::State> {
        info!(%name, "worker torn down");
        state.terminated += 1;
        Reply::Noreply(state)
    }
}

#[tokio::main]
async fn main() -> Result<(), Whatever> {
    let cli = Cli::parse();
    let _guards = init_global_logging("echo-fleet", &LoggingOptions::default());

    let options = LocalOptions::new(cli.prefix, cli.binary).arg(cli.binary_arg);
    let adapter = Arc::new(LocalAdapter::new(options));

    let spec = Spec::builder()
        .adapter(adapter.clone())
        .transport(Arc::new(LoggingTransport))
        .release(
            ReleaseRef::parse("file:///dev/null")
                .unwrap_or_else(|_| unreachable!("file:// scheme always parses")),
        )
        .max_nodes(cli.max_nodes)
        .conn_timeout(Duration::from_secs(cli.conn_timeout_secs))
        .pair_timeout(Duration::from_secs(cli.pair_timeout_secs))
        .build();

    let overseer =
        Overseer::start_link(spec, FleetCallback, FleetCounters::default()).expect("SimpleOneForOne always starts");
    adapter.bind(overseer.event_sink());

    for _ in 0..cli.count {
        match overseer.start_child().await {
            Ok(name) => info!(%name, "started worker"),
            Err(error) => tracing::warn!(%error, "failed to start worker"),
        }
    }

    tokio::select! {
        () = tokio::time::sleep(Duration::from_secs(cli.run_for_secs)) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("received ctrl-c, shutting down early");
        }
    }

    let snapshot = overseer.snapshot().await.expect("overseer still running");
    info!(active = snapshot.active_labors, "fleet snapshot before shutdown");
    for labor in &snapshot.labors {
        info!(name = %labor.name, phase = ?labor.phase, "labor");
    }

    overseer.shutdown("demo run complete").await;
    Ok(())
}
