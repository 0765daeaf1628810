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

use async_trait::async_trait;
use thiserror::Error;

use crate::cluster::types::{Job, PersistentVolume, PersistentVolumeClaim, StorageClass};

/// Transport-level failure surface of a [`ClusterClient`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("{kind} {name:?} not found")]
    NotFound { kind: &'static str, name: String },

    #[error("{kind} {name:?} already exists")]
    AlreadyExists { kind: &'static str, name: String },

    /// Any other backend failure (connection loss, conflict, permission).
    #[error("{0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// The capability set the preflight engine needs from the cluster's resource
/// store. The engine depends only on this trait, not on any transport; the
/// production implementation wraps a real Kubernetes client, tests use
/// [`MemoryCluster`](crate::cluster::MemoryCluster).
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn storage_class(&self, name: &str) -> Result<StorageClass, StoreError>;

    async fn create_claim(&self, claim: &PersistentVolumeClaim) -> Result<(), StoreError>;

    async fn delete_claim(&self, namespace: &str, name: &str) -> Result<(), StoreError>;

    async fn volume(&self, name: &str) -> Result<PersistentVolume, StoreError>;

    async fn list_volumes(&self) -> Result<Vec<PersistentVolume>, StoreError>;

    async fn create_job(&self, job: &Job) -> Result<(), StoreError>;

    async fn delete_job(&self, namespace: &str, name: &str) -> Result<(), StoreError>;

    /// Combined log output of one container of the job's pod. `Ok(None)`
    /// means the pod has not produced retrievable output yet; callers poll.
    async fn job_logs(
        &self,
        namespace: &str,
        job: &str,
        container: &str,
    ) -> Result<Option<Vec<u8>>, StoreError>;
}
