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

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cluster::{ClusterClient, PersistentVolumeClaim};
use crate::error::{Error, Result};

/// Deletes transient claims and waits until their backing volumes are
/// actually released by the storage backend.
///
/// A claim disappears from the resource store immediately, but its volume is
/// reclaimed asynchronously; returning before the volume is gone would let a
/// caller believe cleanup finished while the storage it is about to measure
/// is still occupied.
pub struct ClaimReaper {
    client: Arc<dyn ClusterClient>,
    poll_interval: Duration,
    reclaim_timeout: Duration,
}

impl ClaimReaper {
    pub fn new(
        client: Arc<dyn ClusterClient>,
        poll_interval: Duration,
        reclaim_timeout: Duration,
    ) -> Self {
        Self {
            client,
            poll_interval,
            reclaim_timeout,
        }
    }

    /// Delete every claim and wait, per claim, for its volume to be released.
    ///
    /// Claims are reaped independently: a timeout or store failure on one
    /// claim does not skip the rest, since abandoning later claims would leak
    /// exactly the capacity the next check depends on. Failures are
    /// aggregated into the returned error. Cancellation is the one exception
    /// and aborts the whole reap immediately.
    pub async fn reap(
        &self,
        token: &CancellationToken,
        claims: &[PersistentVolumeClaim],
    ) -> Result<()> {
        if claims.is_empty() {
            return Ok(());
        }
        let mut failures: Vec<Error> = Vec::new();
        for claim in claims {
            match self.reap_claim(token, claim).await {
                Ok(()) => {}
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(err) => {
                    warn!(claim = %claim.name, error = %err, "failed to release transient claim");
                    failures.push(err);
                }
            }
        }
        match failures.len() {
            0 => Ok(()),
            1 => Err(failures.remove(0)),
            failed => Err(Error::ReapIncomplete {
                failed,
                summary: failures
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; "),
            }),
        }
    }

    async fn reap_claim(
        &self,
        token: &CancellationToken,
        claim: &PersistentVolumeClaim,
    ) -> Result<()> {
        let volume = self.bound_volume(claim).await?;

        match self.client.delete_claim(&claim.namespace, &claim.name).await {
            Ok(()) => {}
            // Repeated cleanup of an already-gone claim is not an error.
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(Error::store("delete claim", &claim.name, err)),
        }

        let Some(volume) = volume else {
            debug!(claim = %claim.name, "no volume bound to claim, nothing to wait for");
            return Ok(());
        };

        debug!(claim = %claim.name, volume = %volume, "waiting for volume to be released");
        match tokio::time::timeout(self.reclaim_timeout, self.wait_released(token, &volume)).await {
            Ok(result) => result,
            Err(_) => Err(Error::ReclaimTimeout { volume }),
        }
    }

    /// The volume backing `claim`, discovered by scanning claim references.
    /// Volumes without a reference, or referencing a different claim, do not
    /// count: their lifecycle is not ours to wait on.
    async fn bound_volume(&self, claim: &PersistentVolumeClaim) -> Result<Option<String>> {
        let volumes = self
            .client
            .list_volumes()
            .await
            .map_err(|err| Error::store("locate volume for claim", &claim.name, err))?;
        Ok(volumes
            .into_iter()
            .find(|volume| {
                volume.claim_ref.as_ref().is_some_and(|claim_ref| {
                    claim_ref.name == claim.name
                        && (claim_ref.namespace.is_empty() || claim_ref.namespace == claim.namespace)
                })
            })
            .map(|volume| volume.name))
    }

    async fn wait_released(&self, token: &CancellationToken, volume: &str) -> Result<()> {
        loop {
            match self.client.volume(volume).await {
                Ok(_) => {}
                Err(err) if err.is_not_found() => return Ok(()),
                Err(err) => return Err(Error::store("fetch volume", volume, err)),
            }
            tokio::select! {
                _ = token.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}
