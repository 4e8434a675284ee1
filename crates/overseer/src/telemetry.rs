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

//! Telemetry: unsolicited status/metric messages from a paired worker
//! (spec §6).

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use crate::id::LaborName;

/// A single telemetry event, delivered fire-and-forget from a paired
/// worker and routed to `handle_telemetry` by labor name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Telemetry {
    pub name:      LaborNameField,
    pub payload:   serde_json::Value,
    pub timestamp: Timestamp,
}

/// `LaborName` isn't directly `Deserialize` (it never needs to be parsed
/// back from the wire in the rest of the crate); telemetry is the one place
/// a worker-supplied name string crosses the boundary, so the field carries
/// the raw string and converts on access.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaborNameField(String);

impl LaborNameField {
    #[must_use]
    pub fn into_labor_name(self) -> LaborName { LaborName::new(self.0) }

    #[must_use]
    pub fn as_str(&self) -> &str { &self.0 }
}

impl From<LaborName> for LaborNameField {
    fn from(value: LaborName) -> Self { Self(value.as_str().to_string()) }
}

impl Telemetry {
    #[must_use]
    pub fn new(name: LaborName, payload: serde_json::Value) -> Self {
        Self { name: name.into(), payload, timestamp: Timestamp::now() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_name_through_the_wire_field() {
        let name = LaborName::new("w-1@host");
        let t = Telemetry::new(name.clone(), serde_json::json!({"cpu": 0.4}));
        assert_eq!(t.name.clone().into_labor_name(), name);
    }
}
