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

//! Disk-space preflight against an OpenEBS LocalPV destination.
//!
//! [`OpenEbsChecker`] runs one probe per node: it resolves the destination
//! base path from the storage class configuration, provisions a transient
//! claim and job on the node, parses the probe's `df` and `fstab` output and
//! decides whether the node keeps at least the requested reservation free.
//! Transient resources are always reaped before a node's check returns,
//! success or failure notwithstanding.

pub mod capacity;
pub mod reaper;
mod resources;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use yaml_rust2::YamlLoader;

use crate::cluster::{ClusterClient, Job, Node, PersistentVolumeClaim};
use crate::error::{Error, Result};
use crate::parsing;

pub use capacity::DiskUsageSample;
pub use reaper::ClaimReaper;

/// Storage class annotation holding the OpenEBS configuration, a YAML
/// sequence of `{name, value}` pairs.
pub const CONFIG_ANNOTATION: &str = "cas.openebs.io/config";

/// Configuration entry naming the directory the provisioner places volume
/// data under. Matched case-sensitively.
const BASE_PATH_KEY: &str = "BasePath";

/// A node carrying any of these annotations cannot host the probe; the first
/// match is reported and the node is skipped without provisioning anything.
const UNSCHEDULABLE_ANNOTATIONS: [&str; 4] = [
    "node.kubernetes.io/not-ready",
    "node.kubernetes.io/unreachable",
    "node.kubernetes.io/unschedulable",
    "node.cloudprovider.kubernetes.io/shutdown",
];

/// Tunables every checker instance carries explicitly, so tests can override
/// them without process-wide state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckerConfig {
    /// Namespace transient probe resources are created in.
    pub namespace: String,
    /// Where the probe job mounts the transient claim; the mount point the
    /// disk-usage parser anchors on.
    pub mount_path: String,
    /// Interval between polls while awaiting probe output or volume release.
    pub poll_interval: Duration,
    /// How long a deleted claim's volume may take to disappear before the
    /// reap fails with a timeout.
    pub reclaim_timeout: Duration,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            mount_path: "/data".to_string(),
            poll_interval: Duration::from_secs(1),
            reclaim_timeout: Duration::from_secs(300),
        }
    }
}

/// Terminal output of one node's check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub free_bytes: i64,
    pub sufficient: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeOutcome {
    /// The probe ran and produced a verdict.
    Checked(Verdict),
    /// The node was skipped before anything was provisioned.
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeVerdict {
    pub node: String,
    pub outcome: NodeOutcome,
}

/// Preflight checker verifying that nodes have enough free disk space under
/// the destination storage class's base path to receive migrated volumes.
pub struct OpenEbsChecker {
    client: Arc<dyn ClusterClient>,
    image: String,
    source_storage_class: String,
    destination_storage_class: String,
    config: CheckerConfig,
}

impl std::fmt::Debug for OpenEbsChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenEbsChecker")
            .field("image", &self.image)
            .field("source_storage_class", &self.source_storage_class)
            .field("destination_storage_class", &self.destination_storage_class)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl OpenEbsChecker {
    /// Build a checker. Fails fast on empty arguments, before any
    /// resource-store interaction.
    pub fn new(
        client: Arc<dyn ClusterClient>,
        image: impl Into<String>,
        source_storage_class: impl Into<String>,
        destination_storage_class: impl Into<String>,
    ) -> Result<Self> {
        let image = image.into();
        if image.is_empty() {
            return Err(Error::EmptyImage);
        }
        let source_storage_class = source_storage_class.into();
        if source_storage_class.is_empty() {
            return Err(Error::EmptySourceStorageClass);
        }
        let destination_storage_class = destination_storage_class.into();
        if destination_storage_class.is_empty() {
            return Err(Error::EmptyDestinationStorageClass);
        }
        Ok(Self {
            client,
            image,
            source_storage_class,
            destination_storage_class,
            config: CheckerConfig::default(),
        })
    }

    pub fn with_config(mut self, config: CheckerConfig) -> Self {
        self.config = config;
        self
    }

    /// Check every node against `reserved_bytes`.
    ///
    /// The base path is resolved once; a configuration error aborts the whole
    /// check since it is shared across nodes. Unschedulable nodes are skipped
    /// and reported as such, other nodes unaffected. Any other per-node
    /// failure aborts the check after that node's transient resources have
    /// been reaped.
    pub async fn check(
        &self,
        token: &CancellationToken,
        nodes: &[Node],
        reserved_bytes: i64,
    ) -> Result<Vec<NodeVerdict>> {
        let base_path = self.base_path().await?;
        info!(
            source = %self.source_storage_class,
            destination = %self.destination_storage_class,
            %base_path,
            nodes = nodes.len(),
            reserved_bytes,
            "starting disk space preflight"
        );

        let mut verdicts = Vec::with_capacity(nodes.len());
        for node in nodes {
            if let Err(err) = node_is_schedulable(node) {
                warn!(node = %node.name, error = %err, "skipping node");
                verdicts.push(NodeVerdict {
                    node: node.name.clone(),
                    outcome: NodeOutcome::Skipped {
                        reason: err.to_string(),
                    },
                });
                continue;
            }
            let verdict = self.check_node(token, node, &base_path, reserved_bytes).await?;
            info!(
                node = %node.name,
                free_bytes = verdict.free_bytes,
                sufficient = verdict.sufficient,
                "node verdict"
            );
            verdicts.push(NodeVerdict {
                node: node.name.clone(),
                outcome: NodeOutcome::Checked(verdict),
            });
        }
        Ok(verdicts)
    }

    /// Resolve the destination base path from the storage class
    /// configuration annotation.
    pub async fn base_path(&self) -> Result<String> {
        let storage_class = self
            .client
            .storage_class(&self.destination_storage_class)
            .await
            .map_err(|err| {
                Error::store("fetch storage class", &self.destination_storage_class, err)
            })?;

        let Some(raw) = storage_class.annotations.get(CONFIG_ANNOTATION) else {
            return Err(Error::AnnotationNotFound {
                storage_class: storage_class.name.clone(),
                annotation: CONFIG_ANNOTATION,
            });
        };

        let base_path = base_path_from_config(raw)?;
        if !base_path.starts_with('/') {
            return Err(Error::InvalidBasePath { path: base_path });
        }
        Ok(base_path)
    }

    async fn check_node(
        &self,
        token: &CancellationToken,
        node: &Node,
        base_path: &str,
        reserved_bytes: i64,
    ) -> Result<Verdict> {
        let claim = resources::probe_claim(
            &node.name,
            &self.config.namespace,
            &self.destination_storage_class,
        );
        let job = resources::probe_job(
            &node.name,
            &self.config.namespace,
            &self.image,
            base_path,
            &claim.name,
            &self.config.mount_path,
        );

        let probed = self.probe(token, &claim, &job, base_path, reserved_bytes).await;
        let cleaned = self.cleanup(token, &claim, &job).await;
        match (probed, cleaned) {
            (Ok(verdict), Ok(())) => Ok(verdict),
            (Ok(_), Err(cleanup_err)) => Err(cleanup_err),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(cleanup_err)) => {
                warn!(node = %node.name, error = %cleanup_err, "cleanup failed after probe error");
                Err(err)
            }
        }
    }

    async fn probe(
        &self,
        token: &CancellationToken,
        claim: &PersistentVolumeClaim,
        job: &Job,
        base_path: &str,
        reserved_bytes: i64,
    ) -> Result<Verdict> {
        self.client
            .create_claim(claim)
            .await
            .map_err(|err| Error::store("create claim", &claim.name, err))?;
        self.client
            .create_job(job)
            .await
            .map_err(|err| Error::store("create job", &job.name, err))?;
        debug!(claim = %claim.name, job = %job.name, "probe resources submitted");

        let df_output = self
            .await_container_logs(token, &job.name, resources::DF_CONTAINER)
            .await?;
        let (free_bytes, used_bytes) =
            parsing::parse_df_output(&df_output, &self.config.mount_path)?;

        let fstab_output = self
            .await_container_logs(token, &job.name, resources::FSTAB_CONTAINER)
            .await?;
        let mount_points = parsing::parse_fstab_output(&fstab_output)?;

        let sample = DiskUsageSample {
            free_bytes,
            used_bytes,
            mounted_at_root: capacity::mounted_at_root(&mount_points, base_path),
        };
        debug!(
            free_bytes,
            used_bytes,
            mounted_at_root = sample.mounted_at_root,
            "disk usage sample"
        );

        let (free_bytes, sufficient) = capacity::has_enough_space(sample, reserved_bytes);
        Ok(Verdict {
            free_bytes,
            sufficient,
        })
    }

    async fn await_container_logs(
        &self,
        token: &CancellationToken,
        job: &str,
        container: &str,
    ) -> Result<Vec<u8>> {
        loop {
            match self.client.job_logs(&self.config.namespace, job, container).await {
                Ok(Some(content)) => return Ok(content),
                Ok(None) => debug!(job, container, "probe output not retrievable yet"),
                Err(err) => return Err(Error::store("fetch logs for job", job, err)),
            }
            tokio::select! {
                _ = token.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }

    async fn cleanup(
        &self,
        token: &CancellationToken,
        claim: &PersistentVolumeClaim,
        job: &Job,
    ) -> Result<()> {
        let job_deleted = match self.client.delete_job(&job.namespace, &job.name).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(Error::store("delete job", &job.name, err)),
        };

        let reaper = ClaimReaper::new(
            Arc::clone(&self.client),
            self.config.poll_interval,
            self.config.reclaim_timeout,
        );
        let claim_reaped = reaper.reap(token, std::slice::from_ref(claim)).await;

        match (job_deleted, claim_reaped) {
            (Ok(()), result) => result,
            (Err(err), Ok(())) => Err(err),
            (Err(job_err), Err(claim_err)) => {
                warn!(job = %job.name, error = %job_err, "failed to delete probe job");
                Err(claim_err)
            }
        }
    }
}

fn node_is_schedulable(node: &Node) -> Result<()> {
    for annotation in UNSCHEDULABLE_ANNOTATIONS {
        if node.annotations.contains_key(annotation) {
            return Err(Error::NodeUnschedulable {
                node: node.name.clone(),
                annotation: annotation.to_string(),
            });
        }
    }
    Ok(())
}

/// Pull the `BasePath` entry out of the configuration annotation, a YAML
/// sequence of `{name, value}` pairs.
fn base_path_from_config(raw: &str) -> Result<String> {
    let docs = YamlLoader::load_from_str(raw).map_err(|err| Error::AnnotationParse {
        reason: err.to_string(),
    })?;
    let entries = docs
        .first()
        .and_then(|doc| doc.as_vec())
        .ok_or_else(|| Error::AnnotationParse {
            reason: "expected a sequence of name/value pairs".to_string(),
        })?;
    for entry in entries {
        if entry["name"].as_str() == Some(BASE_PATH_KEY) {
            return Ok(entry["value"].as_str().unwrap_or_default().to_string());
        }
    }
    Err(Error::BasePathNotDefined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{MemoryCluster, StorageClass};

    fn checker(client: Arc<MemoryCluster>, destination: &str) -> OpenEbsChecker {
        OpenEbsChecker::new(client, "image", "src", destination).unwrap()
    }

    #[test]
    fn test_schedulable_node() {
        assert!(node_is_schedulable(&Node::new("node0")).is_ok());
    }

    #[test]
    fn test_not_ready_node() {
        let node = Node::new("node0")
            .with_annotation("node.kubernetes.io/not-ready", "NoExecute");
        let err = node_is_schedulable(&node).unwrap_err();
        assert!(matches!(err, Error::NodeUnschedulable { .. }));
        assert!(err.to_string().contains("node.kubernetes.io/not-ready"));
    }

    #[test]
    fn test_multiple_markers_report_first_match() {
        let node = Node::new("node0")
            .with_annotation("node.kubernetes.io/not-ready", "NoExecute")
            .with_annotation("node.cloudprovider.kubernetes.io/shutdown", "NoExecute")
            .with_annotation("node.kubernetes.io/unschedulable", "NoExecute");
        let err = node_is_schedulable(&node).unwrap_err();
        assert!(err.to_string().contains("node.kubernetes.io/not-ready"));
    }

    #[tokio::test]
    async fn test_base_path_storage_class_missing() {
        let client = Arc::new(MemoryCluster::new());
        let err = checker(client, "does-not-exist").base_path().await.unwrap_err();
        assert!(err.to_string().contains("storage class \"does-not-exist\" not found"));
    }

    #[tokio::test]
    async fn test_base_path_annotation_missing() {
        let client = Arc::new(MemoryCluster::new());
        client.add_storage_class(StorageClass::new("default"));
        let err = checker(client, "default").base_path().await.unwrap_err();
        assert!(err.to_string().contains("annotation not found in storage class"));
    }

    #[tokio::test]
    async fn test_base_path_annotation_malformed() {
        let client = Arc::new(MemoryCluster::new());
        client.add_storage_class(
            StorageClass::new("default").with_annotation(CONFIG_ANNOTATION, "{{{ not yaml"),
        );
        let err = checker(client, "default").base_path().await.unwrap_err();
        assert!(
            err.to_string().contains("failed to parse openebs config annotation"),
            "unexpected error: {err}"
        );
    }

    #[tokio::test]
    async fn test_base_path_annotation_not_a_sequence() {
        let client = Arc::new(MemoryCluster::new());
        client.add_storage_class(
            StorageClass::new("default").with_annotation(CONFIG_ANNOTATION, "just a scalar"),
        );
        let err = checker(client, "default").base_path().await.unwrap_err();
        assert!(matches!(err, Error::AnnotationParse { .. }));
    }

    #[tokio::test]
    async fn test_base_path_entry_missing() {
        let client = Arc::new(MemoryCluster::new());
        client.add_storage_class(
            StorageClass::new("default")
                .with_annotation(CONFIG_ANNOTATION, "- name: abc\n  value: cba"),
        );
        let err = checker(client, "default").base_path().await.unwrap_err();
        assert!(matches!(err, Error::BasePathNotDefined));
    }

    #[tokio::test]
    async fn test_base_path_empty_value() {
        let client = Arc::new(MemoryCluster::new());
        client.add_storage_class(
            StorageClass::new("default")
                .with_annotation(CONFIG_ANNOTATION, "- name: BasePath\n  value: \"\""),
        );
        let err = checker(client, "default").base_path().await.unwrap_err();
        assert!(matches!(err, Error::InvalidBasePath { .. }));
    }

    #[tokio::test]
    async fn test_base_path_relative_value() {
        let client = Arc::new(MemoryCluster::new());
        client.add_storage_class(
            StorageClass::new("default")
                .with_annotation(CONFIG_ANNOTATION, "- name: BasePath\n  value: invalid"),
        );
        let err = checker(client, "default").base_path().await.unwrap_err();
        assert_eq!(err.to_string(), "invalid openebs base path \"invalid\"");
    }

    #[tokio::test]
    async fn test_base_path_happy_path() {
        let client = Arc::new(MemoryCluster::new());
        client.add_storage_class(
            StorageClass::new("default")
                .with_annotation(CONFIG_ANNOTATION, "- name: BasePath\n  value: /var/local"),
        );
        let base_path = checker(client, "default").base_path().await.unwrap();
        assert_eq!(base_path, "/var/local");
    }

    #[tokio::test]
    async fn test_base_path_key_is_case_sensitive() {
        let client = Arc::new(MemoryCluster::new());
        client.add_storage_class(
            StorageClass::new("default")
                .with_annotation(CONFIG_ANNOTATION, "- name: basepath\n  value: /var/local"),
        );
        let err = checker(client, "default").base_path().await.unwrap_err();
        assert!(matches!(err, Error::BasePathNotDefined));
    }
}
