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

//! Runs a full preflight against the in-memory cluster and prints the
//! per-node verdicts as JSON.
//!
//! ```sh
//! cargo run --example preflight
//! ```

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use clusterspace::cluster::{MemoryCluster, Node, StorageClass};
use clusterspace::openebs::CONFIG_ANNOTATION;
use clusterspace::OpenEbsChecker;

const DF_OUTPUT: &str = "Filesystem       1B-blocks        Used  Available Use% Mounted on\n\
                         /dev/sda2      63087357952 52521754624 7327760384  88% /data";
const FSTAB_OUTPUT: &str = "# <file system> <mount point> <type> <options> <dump> <pass>\n\
                            /dev/disk/by-uuid/ba03d262 / ext4 defaults 0 1";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cluster = Arc::new(MemoryCluster::new());
    cluster.add_storage_class(
        StorageClass::new("openebs-localpv")
            .with_annotation(CONFIG_ANNOTATION, "- name: BasePath\n  value: /var/local"),
    );
    cluster.provision_volumes(true);
    cluster.set_container_logs("df", DF_OUTPUT);
    cluster.set_container_logs("fstab", FSTAB_OUTPUT);

    let checker = OpenEbsChecker::new(
        cluster.clone(),
        "registry.example.com/preflight:latest",
        "rook-ceph-block",
        "openebs-localpv",
    )?;

    let nodes = [
        Node::new("node0"),
        Node::new("node1").with_annotation("node.kubernetes.io/not-ready", "NoExecute"),
    ];

    // Require five gigabytes free on every node.
    let verdicts = checker
        .check(&CancellationToken::new(), &nodes, 5 * 1024 * 1024 * 1024)
        .await?;

    println!("{}", serde_json::to_string_pretty(&verdicts)?);
    Ok(())
}
