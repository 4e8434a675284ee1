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

//! Error kinds per the table in spec §7: what each means, and whether it is
//! surfaced to the embedder or handled transparently by the controller.

use std::any::Any;

use overseer_error::{ErrorExt, Severity, StackError};
use snafu::Snafu;
use strum::EnumProperty;

use crate::id::LaborName;

#[derive(Debug, Snafu, strum_macros::EnumProperty)]
#[snafu(visibility(pub))]
pub enum OverseerError {
    /// The adapter failed to provision a host or start the worker process.
    /// Surfaced to the caller of `start_child` as a `None` reply.
    #[snafu(display("adapter failed to spawn labor: {source}"))]
    #[strum(props(severity = "caller_visible"))]
    SpawnFailed {
        #[snafu(source)]
        source: Box<dyn std::error::Error + Send + Sync>,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    /// `start_child` was called with `count_active_labors == max_nodes`.
    #[snafu(display("cannot start child: at capacity ({max_nodes} active labors)"))]
    #[strum(props(severity = "caller_visible"))]
    CapacityExceeded {
        max_nodes: usize,
        #[snafu(implicit)]
        loc:       snafu::Location,
    },

    /// A `conn` timer fired while the labor was still `disconnected`
    /// (never reconnected in time). The labor is dropped.
    #[snafu(display("labor {name} failed to (re)connect within the configured timeout"))]
    #[strum(props(severity = "transient"))]
    ConnectTimeout {
        name: LaborName,
        #[snafu(implicit)]
        loc:  snafu::Location,
    },

    /// `start_link` was called with an unsupported strategy. Per spec
    /// §4.4/§9, only `Strategy::SimpleOneForOne` is accepted at init.
    #[snafu(display("unsupported start spec: {reason}"))]
    #[strum(props(severity = "caller_visible"))]
    BadStartSpec {
        reason: String,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    /// A user callback returned something other than `Noreply`,
    /// `NoreplyHibernate`, `Stop`, or `Reply` where one of those was
    /// required. Fatal: stops the overseer.
    #[snafu(display("user callback returned a malformed value: {reason}"))]
    #[strum(props(severity = "fatal"))]
    BadReturnValue {
        reason: String,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    /// The adapter failed to establish or re-establish the low-level
    /// control channel.
    #[snafu(display("adapter failed to connect to labor {name}: {source}"))]
    #[strum(props(severity = "transient"))]
    AdapterConnect {
        name:   LaborName,
        #[snafu(source)]
        source: Box<dyn std::error::Error + Send + Sync>,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    /// The adapter failed to terminate a labor's underlying resources.
    #[snafu(display("adapter failed to terminate labor {name}: {source}"))]
    #[strum(props(severity = "transient"))]
    AdapterTerminate {
        name:   LaborName,
        #[snafu(source)]
        source: Box<dyn std::error::Error + Send + Sync>,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    /// Release fetch failed (`ReleaseFetcher::fetch`).
    #[snafu(display("failed to load release for labor {name}: {source}"))]
    #[strum(props(severity = "transient"))]
    ReleaseLoad {
        name:   LaborName,
        #[snafu(source)]
        source: overseer_release::ReleaseError,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    /// The `Transport` failed to push the release or start the worker's
    /// entry point once fetched.
    #[snafu(display("failed to push release to labor {name}: {source}"))]
    #[strum(props(severity = "transient"))]
    TransportFailed {
        name:   LaborName,
        #[snafu(source)]
        source: Box<dyn std::error::Error + Send + Sync>,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    /// A `pair` call named a labor the controller has no record of (never
    /// spawned, or already torn down).
    #[snafu(display("no such labor: {name}"))]
    #[strum(props(severity = "caller_visible"))]
    UnknownLabor {
        name: LaborName,
        #[snafu(implicit)]
        loc:  snafu::Location,
    },

    /// The mailbox channel to a running controller was closed; the
    /// overseer has already shut down.
    #[snafu(display("overseer {overseer_id} has already shut down"))]
    #[strum(props(severity = "caller_visible"))]
    Stopped {
        overseer_id: String,
        #[snafu(implicit)]
        loc:         snafu::Location,
    },
}

impl OverseerError {
    /// Classifies this error per the table in spec §7: whether the
    /// controller retries it transparently, stops the overseer outright, or
    /// hands it back to whichever API call triggered it.
    #[must_use]
    pub fn severity(&self) -> Severity {
        self.get_str("severity")
            .and_then(|value| value.parse().ok())
            .unwrap_or(Severity::Fatal)
    }
}

impl StackError for OverseerError {
    fn next(&self) -> Option<&dyn StackError> { None }
}

impl ErrorExt for OverseerError {
    fn as_any(&self) -> &dyn Any { self }
}

pub type Result<T, E = OverseerError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_exceeded_is_caller_visible() {
        let err = CapacityExceededSnafu { max_nodes: 8_usize }.build();
        assert_eq!(err.severity(), Severity::CallerVisible);
        assert!(!err.severity().is_retryable());
    }

    #[test]
    fn connect_timeout_is_transient() {
        let err = ConnectTimeoutSnafu { name: LaborName::new("w-1") }.build();
        assert_eq!(err.severity(), Severity::Transient);
        assert!(err.severity().is_retryable());
    }

    #[test]
    fn bad_return_value_is_fatal() {
        let err = BadReturnValueSnafu { reason: "not a Reply" }.build();
        assert_eq!(err.severity(), Severity::Fatal);
        assert_eq!(err.output_msg(), "user callback returned a malformed value: not a Reply");
    }
}
