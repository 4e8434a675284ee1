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

//! Identifiers: labor names, the overseer's own identity, and the worker-side
//! control-endpoint pid reported during pairing.

use derive_more::{Debug, Display};
use uuid::Uuid;

/// Unique name of a managed labor, conventionally `prefix-<random>@host`.
///
/// Adapters are free to choose any unique string; Overseer never parses it.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Display, PartialOrd, Ord)]
#[debug("LaborName({_0})")]
#[display("{_0}")]
pub struct LaborName(String);

impl LaborName {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self { Self(name.into()) }

    /// Generates `prefix-<random>@host`, the convention described in spec
    /// §3 for adapter-assigned names.
    #[must_use]
    pub fn generate(prefix: &str, host: &str) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        let short = &suffix[..8];
        Self(format!("{prefix}-{short}@{host}"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str { &self.0 }
}

impl From<String> for LaborName {
    fn from(value: String) -> Self { Self(value) }
}

/// Stable identity of an overseer instance, used by workers to address their
/// reverse `pair` call. Defaults to a fresh UUID; embedders may override it
/// with a process or node identity.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Display)]
#[debug("OverseerId({_0})")]
#[display("{_0}")]
pub struct OverseerId(String);

impl OverseerId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self { Self(id.into()) }

    #[must_use]
    pub fn generate() -> Self { Self(Uuid::new_v4().to_string()) }

    #[must_use]
    pub fn as_str(&self) -> &str { &self.0 }
}

impl Default for OverseerId {
    fn default() -> Self { Self::generate() }
}

/// Identifier of the worker-side control endpoint, reported by the worker
/// when it calls `pair`. Opaque to Overseer beyond equality and linking.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Display)]
#[debug("PairPid({_0})")]
#[display("{_0}")]
pub struct PairPid(String);

impl PairPid {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self { Self(id.into()) }

    #[must_use]
    pub fn as_str(&self) -> &str { &self.0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_names_carry_prefix_and_host() {
        let name = LaborName::generate("w", "host-1");
        assert!(name.as_str().starts_with("w-"));
        assert!(name.as_str().ends_with("@host-1"));
    }

    #[test]
    fn overseer_id_defaults_to_a_fresh_value() {
        assert_ne!(OverseerId::default(), OverseerId::default());
    }
}
