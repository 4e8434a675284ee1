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

//! Overseer: a dynamic supervisor for a fleet of remote compute workers.
//!
//! An `Overseer` holds no workers itself — it drives an [`Adapter`] to
//! provision hosts, a [`Transport`] to push a release and start its entry
//! point, and a user-supplied [`UserCallback`] module that reacts to
//! lifecycle events and telemetry. Everything the controller mutates (the
//! labor registry, per-labor timers, the user's own state) is owned
//! exclusively by a single event loop task, so none of it needs locking.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use overseer::{
//!     Adapter, AdapterError, EntryPoint, Labor, LaborName, Overseer, OverseerId, Spec, Transport,
//!     TransportError, UserCallback,
//! };
//! use overseer_release::ReleaseRef;
//!
//! struct MyAdapter;
//! #[async_trait]
//! impl Adapter for MyAdapter {
//!     async fn spawn(&self, _overseer_id: &OverseerId) -> Result<Labor, AdapterError> {
//!         unimplemented!("provision a host and start the worker process")
//!     }
//!     async fn terminate(&self, labor: &Labor) -> Result<Labor, AdapterError> { Ok(labor.clone()) }
//!     async fn connect(&self, _labor: &Labor) -> Result<(), AdapterError> { Ok(()) }
//! }
//!
//! struct MyTransport;
//! #[async_trait]
//! impl Transport for MyTransport {
//!     async fn push_release(&self, _name: &LaborName, _artifact: &std::path::Path) -> Result<(), TransportError> {
//!         Ok(())
//!     }
//!     async fn start_entry_point(
//!         &self,
//!         _name: &LaborName,
//!         _entry_point: Option<&EntryPoint>,
//!     ) -> Result<(), TransportError> {
//!         Ok(())
//!     }
//! }
//!
//! struct MyCallback;
//! impl UserCallback for MyCallback {
//!     type State = ();
//! }
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let spec = Spec::builder()
//!     .adapter(Arc::new(MyAdapter))
//!     .transport(Arc::new(MyTransport))
//!     .release(ReleaseRef::parse("https://example.com/release.tar.gz")?)
//!     .build();
//!
//! let overseer = Overseer::start_link(spec, MyCallback, ())?;
//! let name = overseer.start_child().await?;
//! println!("started {name}");
//! # Ok(())
//! # }
//! ```

mod adapter;
mod callback;
mod controller;
mod err;
mod id;
mod labor;
mod metrics;
mod pair;
mod state;
mod telemetry;
mod timer;

#[cfg(test)]
mod test_support;

pub use adapter::{Adapter, AdapterError};
pub use callback::{CallReply, Reply, UserCallback};
pub use controller::{EventSink, LaborSnapshot, Overseer, Snapshot};
pub use err::{OverseerError, Result};
pub use id::{LaborName, OverseerId, PairPid};
pub use labor::{Labor, Phase, TimerKind};
pub use pair::{Transport, TransportError, default_work_dir, load_release};
pub use state::{EntryPoint, Registry, Spec, Strategy, count_active_labors};
pub use telemetry::{LaborNameField, Telemetry};
