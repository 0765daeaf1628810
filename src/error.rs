// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Unified error types for the clusterspace library.
//!
//! Every failure mode of a preflight check maps to one variant here, with
//! enough context (node name, volume name, offending token) for the caller to
//! act on it. Cancellation and timeout are distinct variants so callers can
//! retry a timed-out reap but abort entirely on cancellation.

use std::fmt;

use thiserror::Error;

use crate::cluster::StoreError;

/// The main error type for clusterspace operations.
#[derive(Debug, Error)]
pub enum Error {
    /// No probe container image was supplied to the checker.
    #[error("empty image")]
    EmptyImage,

    /// No source storage class name was supplied to the checker.
    #[error("empty source storage class")]
    EmptySourceStorageClass,

    /// No destination storage class name was supplied to the checker.
    #[error("empty destination storage class")]
    EmptyDestinationStorageClass,

    /// The destination storage class carries no configuration annotation.
    #[error("{annotation} annotation not found in storage class {storage_class:?}")]
    AnnotationNotFound {
        storage_class: String,
        annotation: &'static str,
    },

    /// The configuration annotation is present but not a valid YAML sequence
    /// of name/value pairs.
    #[error("failed to parse openebs config annotation: {reason}")]
    AnnotationParse { reason: String },

    /// The configuration annotation has no `BasePath` entry.
    #[error("openebs base path not defined in the storage class")]
    BasePathNotDefined,

    /// The configured base path is empty or not absolute.
    #[error("invalid openebs base path {path:?}")]
    InvalidBasePath { path: String },

    /// The node carries an annotation from the recognized not-ready /
    /// unschedulable / shutting-down set and cannot host the probe.
    #[error("node {node:?} cannot host the disk space probe: {annotation} is set")]
    NodeUnschedulable { node: String, annotation: String },

    /// No line of the probe's disk-usage output ended with the expected
    /// mount point.
    #[error("failed to locate free space info in pod log")]
    FreeSpaceNotFound,

    /// A disk-usage column did not parse as a plain byte count. Human-readable
    /// size tokens land here too: the probe is required to emit
    /// byte-granularity columns.
    #[error("failed to parse {token:?} as {field} space")]
    UnparsableSpaceField { token: String, field: SpaceField },

    /// The probe's mount table contained no usable mount point.
    #[error("failed to locate any mount point")]
    NoMountPoints,

    /// The caller cancelled the operation. Propagates immediately; waits
    /// never swallow it into a clean exit.
    #[error("context cancelled")]
    Cancelled,

    /// A deleted claim's backing volume was still present when the
    /// reclamation deadline elapsed.
    #[error("timeout waiting for volume {volume:?} to be released")]
    ReclaimTimeout { volume: String },

    /// A resource-store operation failed; carries the operation and the
    /// resource name it was applied to.
    #[error("failed to {operation} {resource:?}: {source}")]
    Store {
        operation: &'static str,
        resource: String,
        #[source]
        source: StoreError,
    },

    /// One or more transient claims could not be released. Cleanup of the
    /// remaining claims was still attempted; the summary lists every failure.
    #[error("failed to release {failed} transient claim(s): {summary}")]
    ReapIncomplete { failed: usize, summary: String },
}

impl Error {
    pub(crate) fn store(
        operation: &'static str,
        resource: impl Into<String>,
        source: StoreError,
    ) -> Self {
        Self::Store {
            operation,
            resource: resource.into(),
            source,
        }
    }
}

/// Which disk-usage column failed to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpaceField {
    Available,
    Used,
}

impl fmt::Display for SpaceField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpaceField::Available => f.write_str("available"),
            SpaceField::Used => f.write_str("used"),
        }
    }
}

/// A specialized Result type for clusterspace operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::UnparsableSpaceField {
            token: "6.9G".to_string(),
            field: SpaceField::Available,
        };
        assert_eq!(err.to_string(), "failed to parse \"6.9G\" as available space");

        let err = Error::UnparsableSpaceField {
            token: "49G".to_string(),
            field: SpaceField::Used,
        };
        assert_eq!(err.to_string(), "failed to parse \"49G\" as used space");

        let err = Error::ReclaimTimeout {
            volume: "pvc-1234".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "timeout waiting for volume \"pvc-1234\" to be released"
        );

        assert_eq!(Error::Cancelled.to_string(), "context cancelled");
    }

    #[test]
    fn test_store_error_wrapping() {
        let err = Error::store(
            "delete claim",
            "disk-free-node0-abcde",
            StoreError::Backend("connection reset".to_string()),
        );
        assert_eq!(
            err.to_string(),
            "failed to delete claim \"disk-free-node0-abcde\": connection reset"
        );
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Error>();
    }
}
