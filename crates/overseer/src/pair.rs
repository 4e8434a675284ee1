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

//! The release delivery + handshake protocol (spec §4.3).
//!
//! The source leaves the release-push transport unspecified ("referenced
//! but not shown" — spec §9). This crate picks a concrete one: a
//! `Transport` implementation pushes the fetched release bytes to the
//! worker over whatever channel `adapter.connect` established, then issues
//! a remote "load and start" command. Controller-side framing (`LoadRelease`
//! + `StartEntryPoint`) is `Transport`'s contract, not this module's.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use overseer_release::{ReleaseFetcher, ReleaseRef};
use snafu::ResultExt;

use crate::{
    err::{OverseerError, ReleaseLoadSnafu, TransportFailedSnafu},
    id::LaborName,
    state::EntryPoint,
};

/// Errors raised by a `Transport` implementation when pushing a release or
/// invoking the worker's entry point. Opaque to the controller, the same
/// way `AdapterError` is.
pub type TransportError = Box<dyn std::error::Error + Send + Sync>;

/// Pushes a fetched release archive to a connected worker and starts it.
/// Implementations typically layer this over whatever channel
/// `Adapter::connect` established (an scp-equivalent copy followed by a
/// remote command, per spec §9's suggested default).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Copy the release archive at `artifact` onto the worker identified by
    /// `name`.
    async fn push_release(&self, name: &LaborName, artifact: &Path) -> Result<(), TransportError>;

    /// Tell the worker to extract the pushed archive and invoke
    /// `entry_point` (or its own default if `None`). The worker is expected
    /// to open its control endpoint and call back with `pair` once ready.
    async fn start_entry_point(
        &self,
        name: &LaborName,
        entry_point: Option<&EntryPoint>,
    ) -> Result<(), TransportError>;
}

/// Fetch the release artifact and push it through `transport`, per spec
/// §4.3 step 1. Runs entirely off the controller's event loop; callers are
/// expected to invoke this from a background task and post the outcome
/// back as an event.
pub async fn load_release(
    fetcher: &ReleaseFetcher,
    transport: &dyn Transport,
    release: &ReleaseRef,
    entry_point: Option<&EntryPoint>,
    name: &LaborName,
    work_dir: &Path,
) -> Result<(), OverseerError> {
    let dest = work_dir.join(format!("{name}.release"));

    fetcher.fetch(release, &dest).await.context(ReleaseLoadSnafu { name: name.clone() })?;

    transport
        .push_release(name, &dest)
        .await
        .context(TransportFailedSnafu { name: name.clone() })?;

    transport
        .start_entry_point(name, entry_point)
        .await
        .context(TransportFailedSnafu { name: name.clone() })?;

    Ok(())
}

/// Where fetched release archives are staged before being pushed. Each
/// labor gets its own file named after it; nothing is shared across
/// concurrent loads.
#[must_use]
pub fn default_work_dir() -> PathBuf { std::env::temp_dir().join("overseer-releases") }

#[cfg(test)]
mod tests {
    use overseer_release::{Downloader, DownloaderConfig};

    use super::*;

    struct RecordingTransport {
        pub pushed:  std::sync::Mutex<Vec<LaborName>>,
        pub started: std::sync::Mutex<Vec<LaborName>>,
    }

    impl RecordingTransport {
        fn new() -> Self { Self { pushed: std::sync::Mutex::new(vec![]), started: std::sync::Mutex::new(vec![]) } }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn push_release(&self, name: &LaborName, _artifact: &Path) -> Result<(), TransportError> {
            self.pushed.lock().unwrap().push(name.clone());
            Ok(())
        }

        async fn start_entry_point(
            &self,
            name: &LaborName,
            _entry_point: Option<&EntryPoint>,
        ) -> Result<(), TransportError> {
            self.started.lock().unwrap().push(name.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn loads_and_starts_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("src.tar.gz");
        tokio::fs::write(&source, b"fake archive bytes").await.unwrap();

        let fetcher = ReleaseFetcher::new(Downloader::new(DownloaderConfig::default()));
        let release = ReleaseRef::parse(&format!("file://{}", source.display())).unwrap();
        let transport = RecordingTransport::new();
        let name = LaborName::new("w-1@host");

        load_release(&fetcher, &transport, &release, None, &name, tmp.path()).await.unwrap();

        assert_eq!(transport.pushed.lock().unwrap().as_slice(), &[name.clone()]);
        assert_eq!(transport.started.lock().unwrap().as_slice(), &[name]);
    }
}
