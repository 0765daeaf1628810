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

//! Deterministic in-memory resource store for tests and demos.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::cluster::client::{ClusterClient, StoreError};
use crate::cluster::types::{Job, PersistentVolume, PersistentVolumeClaim, StorageClass};

#[derive(Default)]
struct State {
    storage_classes: HashMap<String, StorageClass>,
    claims: HashMap<String, PersistentVolumeClaim>,
    volumes: HashMap<String, PersistentVolume>,
    jobs: HashMap<String, Job>,
    container_logs: HashMap<String, Vec<u8>>,
    provision_volumes: bool,
}

/// An in-memory [`ClusterClient`].
///
/// Objects are seeded through the `add_*` helpers and inspected through the
/// snapshot accessors. Every trait call increments a counter so tests can
/// assert that an operation touched the store a given number of times (or not
/// at all).
///
/// With [`provision_volumes`](Self::provision_volumes) enabled the store
/// behaves like a local-volume provisioner with immediate reclaim: creating a
/// claim binds a `pvc-<claim>` volume to it, and deleting the claim releases
/// that volume again.
#[derive(Default)]
pub struct MemoryCluster {
    state: Mutex<State>,
    calls: AtomicUsize,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn provision_volumes(&self, enabled: bool) {
        self.lock().provision_volumes = enabled;
    }

    pub fn add_storage_class(&self, storage_class: StorageClass) {
        self.lock()
            .storage_classes
            .insert(storage_class.name.clone(), storage_class);
    }

    pub fn add_claim(&self, claim: PersistentVolumeClaim) {
        self.lock()
            .claims
            .insert(claim_key(&claim.namespace, &claim.name), claim);
    }

    pub fn add_volume(&self, volume: PersistentVolume) {
        self.lock().volumes.insert(volume.name.clone(), volume);
    }

    pub fn remove_volume(&self, name: &str) {
        self.lock().volumes.remove(name);
    }

    /// Canned log output for a container, returned for any job that mounts
    /// one by that name. Until set, `job_logs` reports output as not yet
    /// retrievable.
    pub fn set_container_logs(&self, container: &str, content: impl Into<Vec<u8>>) {
        self.lock()
            .container_logs
            .insert(container.to_string(), content.into());
    }

    pub fn claims(&self) -> Vec<PersistentVolumeClaim> {
        self.lock().claims.values().cloned().collect()
    }

    pub fn volumes(&self) -> Vec<PersistentVolume> {
        self.lock().volumes.values().cloned().collect()
    }

    pub fn jobs(&self) -> Vec<Job> {
        self.lock().jobs.values().cloned().collect()
    }

    /// Total number of trait calls served so far.
    pub fn store_calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn tick(&self) {
        self.calls.fetch_add(1, Ordering::Relaxed);
    }
}

fn claim_key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

#[async_trait]
impl ClusterClient for MemoryCluster {
    async fn storage_class(&self, name: &str) -> Result<StorageClass, StoreError> {
        self.tick();
        self.lock()
            .storage_classes
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: "storage class",
                name: name.to_string(),
            })
    }

    async fn create_claim(&self, claim: &PersistentVolumeClaim) -> Result<(), StoreError> {
        self.tick();
        let mut state = self.lock();
        let key = claim_key(&claim.namespace, &claim.name);
        if state.claims.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                kind: "claim",
                name: claim.name.clone(),
            });
        }
        if state.provision_volumes {
            let volume = PersistentVolume {
                name: format!("pvc-{}", claim.name),
                claim_ref: Some(crate::cluster::types::ClaimRef {
                    name: claim.name.clone(),
                    namespace: claim.namespace.clone(),
                }),
            };
            state.volumes.insert(volume.name.clone(), volume);
        }
        state.claims.insert(key, claim.clone());
        Ok(())
    }

    async fn delete_claim(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        self.tick();
        let mut state = self.lock();
        if state.claims.remove(&claim_key(namespace, name)).is_none() {
            return Err(StoreError::NotFound {
                kind: "claim",
                name: name.to_string(),
            });
        }
        if state.provision_volumes {
            state
                .volumes
                .retain(|_, v| v.claim_ref.as_ref().is_none_or(|r| r.name != name));
        }
        Ok(())
    }

    async fn volume(&self, name: &str) -> Result<PersistentVolume, StoreError> {
        self.tick();
        self.lock()
            .volumes
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: "volume",
                name: name.to_string(),
            })
    }

    async fn list_volumes(&self) -> Result<Vec<PersistentVolume>, StoreError> {
        self.tick();
        Ok(self.lock().volumes.values().cloned().collect())
    }

    async fn create_job(&self, job: &Job) -> Result<(), StoreError> {
        self.tick();
        let mut state = self.lock();
        if state.jobs.contains_key(&job.name) {
            return Err(StoreError::AlreadyExists {
                kind: "job",
                name: job.name.clone(),
            });
        }
        state.jobs.insert(job.name.clone(), job.clone());
        Ok(())
    }

    async fn delete_job(&self, _namespace: &str, name: &str) -> Result<(), StoreError> {
        self.tick();
        if self.lock().jobs.remove(name).is_none() {
            return Err(StoreError::NotFound {
                kind: "job",
                name: name.to_string(),
            });
        }
        Ok(())
    }

    async fn job_logs(
        &self,
        _namespace: &str,
        job: &str,
        container: &str,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        self.tick();
        let state = self.lock();
        let job = state.jobs.get(job).ok_or_else(|| StoreError::NotFound {
            kind: "job",
            name: job.to_string(),
        })?;
        if !job.spec.containers.iter().any(|c| c.name == container) {
            return Err(StoreError::NotFound {
                kind: "container",
                name: container.to_string(),
            });
        }
        Ok(state.container_logs.get(container).cloned())
    }
}
