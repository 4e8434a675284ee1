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

//! Error-stack formatting shared by every crate in the overseer workspace.
//!
//! Each crate still defines its own `snafu` error enum; this crate only
//! supplies the `StackError`/`ErrorExt` traits so error chains render
//! consistently (innermost cause first) across `overseer`, the adapters,
//! and the release fetcher.

use std::{any::Any, error::Error as StdError};

use strum::EnumProperty;

/// Coarse classification used by callers deciding whether to log-and-drop,
/// retry, or surface an error to the embedder (spec §7's error table).
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    PartialEq,
    strum_macros::EnumProperty,
    strum_macros::EnumString,
    strum_macros::Display,
)]
#[strum(serialize_all = "snake_case")]
pub enum Severity {
    /// Transient infrastructure failure; the controller retries.
    #[strum(props(retry = "true"))]
    Transient,
    /// Protocol or contract violation; fatal to the overseer instance.
    #[strum(props(retry = "false"))]
    Fatal,
    /// Caller-visible failure returned from an API call (`start_child`, ...).
    #[strum(props(retry = "false"))]
    CallerVisible,
}

impl Severity {
    #[must_use]
    pub fn is_retryable(self) -> bool { self.get_str("retry").is_some_and(|v| v == "true") }
}

/// A node in an error chain that knows how to walk to its root cause.
pub trait StackError: StdError {
    fn next(&self) -> Option<&dyn StackError>;

    fn last(&self) -> &dyn StackError
    where
        Self: Sized,
    {
        let Some(mut result) = self.next() else {
            return self;
        };
        while let Some(err) = result.next() {
            result = err;
        }
        result
    }
}

pub trait ErrorExt: StackError {
    fn as_any(&self) -> &dyn Any;

    /// Render `self` followed by every `source()` in the chain, outermost
    /// first.
    fn output_msg(&self) -> String
    where
        Self: Sized,
    {
        let mut lines = vec![self.to_string()];
        let mut cause = StdError::source(self);
        while let Some(err) = cause {
            lines.push(err.to_string());
            cause = err.source();
        }
        lines.join(": caused by: ")
    }
}

#[cfg(test)]
mod tests {
    use snafu::Snafu;

    use super::*;

    #[derive(Debug, Snafu)]
    #[snafu(display("outer failure"))]
    struct Outer {
        #[snafu(source)]
        source: Inner,
    }

    #[derive(Debug, Snafu)]
    #[snafu(display("inner failure"))]
    struct Inner;

    impl StackError for Outer {
        fn next(&self) -> Option<&dyn StackError> { None }
    }

    impl ErrorExt for Outer {
        fn as_any(&self) -> &dyn Any { self }
    }

    #[test]
    fn output_msg_chains_causes() {
        let err = Outer { source: Inner };
        assert_eq!(err.output_msg(), "outer failure: caused by: inner failure");
    }

    #[test]
    fn severity_retry_flag() {
        assert!(Severity::Transient.is_retryable());
        assert!(!Severity::Fatal.is_retryable());
        assert!(!Severity::CallerVisible.is_retryable());
    }
}
