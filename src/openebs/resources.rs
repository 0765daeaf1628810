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

//! Builders for the transient probe claim and job.

use std::collections::BTreeMap;

use rand::Rng;

use crate::cluster::types::{
    AccessMode, Container, Job, JobSpec, PersistentVolumeClaim, Volume, VolumeMount, VolumeSource,
};

/// Every transient resource is named `disk-free-<node>-<suffix>`.
pub(crate) const PROBE_NAME_PREFIX: &str = "disk-free-";

/// Just enough storage to bind a volume and run `df` against it.
const PROBE_CLAIM_SIZE: &str = "1Mi";

/// Container of the probe job emitting byte-granularity `df` output.
pub(crate) const DF_CONTAINER: &str = "df";

/// Container of the probe job emitting the node's mount table.
pub(crate) const FSTAB_CONTAINER: &str = "fstab";

/// The resolved base path is recorded on the job for operators digging
/// through failed preflights.
pub(crate) const BASE_PATH_ANNOTATION: &str = "clusterspace/base-path";

const FSTAB_HOST_PATH: &str = "/etc/fstab";
const FSTAB_MOUNT_PATH: &str = "/node/etc/fstab";

/// Kubernetes object names are capped at 63 characters.
const MAX_NAME_LEN: usize = 63;
const SUFFIX_LEN: usize = 5;

/// Derive a fresh probe resource name from the node name.
///
/// Short node names embed unmodified: `disk-free-<node>-<suffix>`. Stems that
/// would push the final name past 63 characters are trimmed in the middle,
/// keeping head and tail so the name stays visually attributable to its node.
pub(crate) fn probe_name(node: &str) -> String {
    let stem = trim_middle(
        &format!("{PROBE_NAME_PREFIX}{node}-"),
        MAX_NAME_LEN - SUFFIX_LEN,
    );
    format!("{stem}{}", random_suffix(SUFFIX_LEN))
}

fn trim_middle(stem: &str, max: usize) -> String {
    if stem.len() <= max {
        return stem.to_string();
    }
    // Node names are DNS-1123 subdomains, so byte offsets are char offsets.
    let head = (max + 2) / 2;
    let tail = max - head - 1;
    format!("{}-{}", &stem[..head], &stem[stem.len() - tail..])
}

fn random_suffix(len: usize) -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::rng();
    (0..len)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect()
}

/// The transient measurement claim: minimal, read-write-once, bound to the
/// destination storage class so the provisioner places it under the base path
/// on the probed node.
pub(crate) fn probe_claim(
    node: &str,
    namespace: &str,
    storage_class: &str,
) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        name: probe_name(node),
        namespace: namespace.to_string(),
        storage_class: storage_class.to_string(),
        access_modes: vec![AccessMode::ReadWriteOnce],
        storage_request: PROBE_CLAIM_SIZE.to_string(),
    }
}

/// The transient probe job: pinned to the target node, mounting the claim at
/// the probe path and the node's fstab read-only, one container per
/// diagnostic command so each output is separably addressable by name.
pub(crate) fn probe_job(
    node: &str,
    namespace: &str,
    image: &str,
    base_path: &str,
    claim_name: &str,
    mount_path: &str,
) -> Job {
    let mut annotations = BTreeMap::new();
    annotations.insert(BASE_PATH_ANNOTATION.to_string(), base_path.to_string());
    Job {
        name: probe_name(node),
        namespace: namespace.to_string(),
        annotations,
        spec: JobSpec {
            pinned_node: node.to_string(),
            volumes: vec![
                Volume {
                    name: "probe".to_string(),
                    source: VolumeSource::PersistentVolumeClaim {
                        claim_name: claim_name.to_string(),
                    },
                },
                Volume {
                    name: "fstab".to_string(),
                    source: VolumeSource::HostPath {
                        path: FSTAB_HOST_PATH.to_string(),
                    },
                },
            ],
            containers: vec![
                Container {
                    name: DF_CONTAINER.to_string(),
                    image: image.to_string(),
                    command: vec![
                        "df".to_string(),
                        "-B1".to_string(),
                        mount_path.to_string(),
                    ],
                    volume_mounts: vec![VolumeMount {
                        name: "probe".to_string(),
                        mount_path: mount_path.to_string(),
                    }],
                },
                Container {
                    name: FSTAB_CONTAINER.to_string(),
                    image: image.to_string(),
                    command: vec!["cat".to_string(), FSTAB_MOUNT_PATH.to_string()],
                    volume_mounts: vec![VolumeMount {
                        name: "fstab".to_string(),
                        mount_path: FSTAB_MOUNT_PATH.to_string(),
                    }],
                },
            ],
        },
    }
}
