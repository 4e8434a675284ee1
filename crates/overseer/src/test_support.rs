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

//! In-memory test doubles shared by this crate's unit and integration
//! tests. Not part of the public API.

use std::{
    path::Path,
    sync::atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;

use crate::{
    adapter::{Adapter, AdapterError},
    id::{LaborName, OverseerId},
    labor::{Labor, Phase},
    pair::{Transport, TransportError},
    state::EntryPoint,
};

/// An adapter that spawns instantly, in-process, and never touches the
/// network. Every call can be made to fail via the `fail_*` flags so
/// controller tests can exercise `SpawnFailed`/`AdapterConnect`/
/// `AdapterTerminate` paths.
pub struct FakeAdapter {
    pub prefix:         &'static str,
    pub host:           &'static str,
    pub spawn_calls:    AtomicUsize,
    pub fail_spawn:     bool,
    pub fail_connect:   bool,
    pub fail_terminate: bool,
}

impl FakeAdapter {
    #[must_use]
    pub fn new(prefix: &'static str, host: &'static str) -> Self {
        Self {
            prefix,
            host,
            spawn_calls: AtomicUsize::new(0),
            fail_spawn: false,
            fail_connect: false,
            fail_terminate: false,
        }
    }
}

#[async_trait]
impl Adapter for FakeAdapter {
    async fn spawn(&self, _overseer_id: &OverseerId) -> Result<Labor, AdapterError> {
        if self.fail_spawn {
            return Err("fake spawn failure".into());
        }
        let n = self.spawn_calls.fetch_add(1, Ordering::SeqCst);
        let name = crate::id::LaborName::new(format!("{}-{n}@{}", self.prefix, self.host));
        Ok(Labor::spawning(name, format!("pid-{n}")))
    }

    async fn terminate(&self, labor: &Labor) -> Result<Labor, AdapterError> {
        if self.fail_terminate {
            return Err("fake terminate failure".into());
        }
        Ok(labor.with_phase(Phase::Terminated))
    }

    async fn connect(&self, _labor: &Labor) -> Result<(), AdapterError> {
        if self.fail_connect {
            return Err("fake connect failure".into());
        }
        Ok(())
    }
}

/// A `Transport` that records what it was asked to do instead of touching a
/// real worker. Mirrors `FakeAdapter`'s `fail_*` knobs.
pub struct FakeTransport {
    pub pushed:     std::sync::Mutex<Vec<LaborName>>,
    pub started:    std::sync::Mutex<Vec<LaborName>>,
    pub fail_push:  bool,
    pub fail_start: bool,
}

impl FakeTransport {
    #[must_use]
    pub fn new() -> Self {
        Self {
            pushed:     std::sync::Mutex::new(vec![]),
            started:    std::sync::Mutex::new(vec![]),
            fail_push:  false,
            fail_start: false,
        }
    }
}

impl Default for FakeTransport {
    fn default() -> Self { Self::new() }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn push_release(&self, name: &LaborName, _artifact: &Path) -> Result<(), TransportError> {
        if self.fail_push {
            return Err("fake push failure".into());
        }
        self.pushed.lock().unwrap().push(name.clone());
        Ok(())
    }

    async fn start_entry_point(
        &self,
        name: &LaborName,
        _entry_point: Option<&EntryPoint>,
    ) -> Result<(), TransportError> {
        if self.fail_start {
            return Err("fake start failure".into());
        }
        self.started.lock().unwrap().push(name.clone());
        Ok(())
    }
}
