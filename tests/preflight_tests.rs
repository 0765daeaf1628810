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

use clusterspace::cluster::{
    AccessMode, ClaimRef, MemoryCluster, Node, PersistentVolume, PersistentVolumeClaim,
    StorageClass,
};
use clusterspace::openebs::{ClaimReaper, CONFIG_ANNOTATION};
use clusterspace::{CheckerConfig, Error, NodeOutcome, OpenEbsChecker};

const DF_OUTPUT: &str = "Filesystem       1B-blocks        Used  Available Use% Mounted on\n\
                         /dev/sda2      63087357952 52521754624 7327760384  88% /data";
const FSTAB_OUTPUT: &str = "# <file system> <mount point> <type> <options> <dump> <pass>\n\
                            /dev/disk/by-uuid/ba03d262 / ext4 defaults 0 1";

fn claim(name: &str) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        name: name.to_string(),
        namespace: "namespace".to_string(),
        storage_class: "default".to_string(),
        access_modes: vec![AccessMode::ReadWriteOnce],
        storage_request: "1Mi".to_string(),
    }
}

fn volume(name: &str, claim_ref: Option<&str>) -> PersistentVolume {
    PersistentVolume {
        name: name.to_string(),
        claim_ref: claim_ref.map(|claim_name| ClaimRef {
            name: claim_name.to_string(),
            namespace: String::new(),
        }),
    }
}

fn reaper(client: Arc<MemoryCluster>) -> ClaimReaper {
    ClaimReaper::new(client, Duration::from_secs(1), Duration::from_secs(20))
}

fn seeded_client() -> Arc<MemoryCluster> {
    let client = Arc::new(MemoryCluster::new());
    client.add_storage_class(
        StorageClass::new("dst-sc")
            .with_annotation(CONFIG_ANNOTATION, "- name: BasePath\n  value: /var/local"),
    );
    client.provision_volumes(true);
    client.set_container_logs("df", DF_OUTPUT);
    client.set_container_logs("fstab", FSTAB_OUTPUT);
    client
}

fn checker(client: Arc<MemoryCluster>) -> OpenEbsChecker {
    OpenEbsChecker::new(client, "myimage:latest", "src-sc", "dst-sc")
        .unwrap()
        .with_config(CheckerConfig {
            poll_interval: Duration::from_millis(100),
            reclaim_timeout: Duration::from_secs(5),
            ..CheckerConfig::default()
        })
}

#[test]
fn test_new_checker_validation() {
    let client = Arc::new(MemoryCluster::new());

    let err = OpenEbsChecker::new(client.clone(), "", "src", "dst").unwrap_err();
    assert_eq!(err.to_string(), "empty image");

    let err = OpenEbsChecker::new(client.clone(), "image", "", "dst").unwrap_err();
    assert_eq!(err.to_string(), "empty source storage class");

    let err = OpenEbsChecker::new(client.clone(), "image", "src", "").unwrap_err();
    assert_eq!(err.to_string(), "empty destination storage class");

    assert!(OpenEbsChecker::new(client.clone(), "image", "src", "dst").is_ok());
    // Construction never touches the resource store.
    assert_eq!(client.store_calls(), 0);
}

#[tokio::test]
async fn test_reap_empty_set_makes_no_store_calls() {
    let client = Arc::new(MemoryCluster::new());
    reaper(Arc::clone(&client))
        .reap(&CancellationToken::new(), &[])
        .await
        .unwrap();
    assert_eq!(client.store_calls(), 0);
}

#[tokio::test]
async fn test_reap_missing_claim_is_idempotent() {
    let client = Arc::new(MemoryCluster::new());
    reaper(client)
        .reap(&CancellationToken::new(), &[claim("pvc0")])
        .await
        .unwrap();
}

#[tokio::test]
async fn test_reap_ignores_volume_without_claim_ref() {
    let client = Arc::new(MemoryCluster::new());
    client.add_claim(claim("pvc0"));
    client.add_volume(volume("pv", None));

    reaper(Arc::clone(&client))
        .reap(&CancellationToken::new(), &[claim("pvc0")])
        .await
        .unwrap();
    // Not our volume: the claim is gone but the volume stays untouched.
    assert!(client.claims().is_empty());
    assert_eq!(client.volumes().len(), 1);
}

#[tokio::test]
async fn test_reap_ignores_volume_bound_to_other_claim() {
    let client = Arc::new(MemoryCluster::new());
    client.add_claim(claim("pvc0"));
    client.add_volume(volume("pv", Some("abc")));

    reaper(Arc::clone(&client))
        .reap(&CancellationToken::new(), &[claim("pvc0")])
        .await
        .unwrap();
    assert_eq!(client.volumes().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reap_cancelled_before_volume_released() {
    let client = Arc::new(MemoryCluster::new());
    client.add_claim(claim("pvc0"));
    client.add_volume(volume("pv", Some("pvc0")));

    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(3)).await;
        cancel.cancel();
    });

    let err = reaper(client).reap(&token, &[claim("pvc0")]).await.unwrap_err();
    assert_eq!(err.to_string(), "context cancelled");
}

#[tokio::test(start_paused = true)]
async fn test_reap_waits_for_volume_release() {
    let client = Arc::new(MemoryCluster::new());
    client.add_claim(claim("pvc0"));
    client.add_volume(volume("pv", Some("pvc0")));

    let releaser = Arc::clone(&client);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(10)).await;
        releaser.remove_volume("pv");
    });

    reaper(Arc::clone(&client))
        .reap(&CancellationToken::new(), &[claim("pvc0")])
        .await
        .unwrap();
    assert!(client.claims().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_reap_times_out_and_names_the_volume() {
    let client = Arc::new(MemoryCluster::new());
    client.add_claim(claim("pvc0"));
    client.add_volume(volume("pv", Some("pvc0")));

    let reaper = ClaimReaper::new(client, Duration::from_secs(1), Duration::from_secs(2));
    let err = reaper
        .reap(&CancellationToken::new(), &[claim("pvc0")])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ReclaimTimeout { .. }));
    assert!(err.to_string().contains("timeout"));
    assert!(err.to_string().contains("pv"));
}

#[tokio::test(start_paused = true)]
async fn test_reap_attempts_remaining_claims_after_failure() {
    let client = Arc::new(MemoryCluster::new());
    client.add_claim(claim("pvc0"));
    client.add_claim(claim("pvc1"));
    // pvc0's volume never goes away; pvc1 has nothing to wait for.
    client.add_volume(volume("pv", Some("pvc0")));

    let reaper = ClaimReaper::new(
        client.clone(),
        Duration::from_secs(1),
        Duration::from_secs(2),
    );
    let err = reaper
        .reap(&CancellationToken::new(), &[claim("pvc0"), claim("pvc1")])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ReclaimTimeout { .. }));
    // The failure on pvc0 did not skip pvc1.
    assert!(client.claims().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_reap_aggregates_multiple_failures() {
    let client = Arc::new(MemoryCluster::new());
    client.add_claim(claim("pvc0"));
    client.add_claim(claim("pvc1"));
    client.add_volume(volume("pv0", Some("pvc0")));
    client.add_volume(volume("pv1", Some("pvc1")));

    let reaper = ClaimReaper::new(client, Duration::from_secs(1), Duration::from_secs(2));
    let err = reaper
        .reap(&CancellationToken::new(), &[claim("pvc0"), claim("pvc1")])
        .await
        .unwrap_err();
    match err {
        Error::ReapIncomplete { failed, summary } => {
            assert_eq!(failed, 2);
            assert!(summary.contains("pv0"));
            assert!(summary.contains("pv1"));
        }
        other => panic!("expected ReapIncomplete, got: {other}"),
    }
}

#[tokio::test]
async fn test_check_sufficient_space() {
    let client = seeded_client();
    let verdicts = checker(Arc::clone(&client))
        .check(&CancellationToken::new(), &[Node::new("node0")], 7327760384)
        .await
        .unwrap();

    assert_eq!(verdicts.len(), 1);
    assert_eq!(verdicts[0].node, "node0");
    match &verdicts[0].outcome {
        NodeOutcome::Checked(verdict) => {
            assert_eq!(verdict.free_bytes, 7327760384);
            assert!(verdict.sufficient);
        }
        other => panic!("expected a verdict, got: {other:?}"),
    }

    // All transient resources are gone, volume included.
    assert!(client.claims().is_empty());
    assert!(client.jobs().is_empty());
    assert!(client.volumes().is_empty());
}

#[tokio::test]
async fn test_check_insufficient_space() {
    let client = seeded_client();
    let verdicts = checker(client)
        .check(&CancellationToken::new(), &[Node::new("node0")], 7327760385)
        .await
        .unwrap();

    match &verdicts[0].outcome {
        NodeOutcome::Checked(verdict) => {
            assert_eq!(verdict.free_bytes, 7327760384);
            assert!(!verdict.sufficient);
        }
        other => panic!("expected a verdict, got: {other:?}"),
    }
}

#[tokio::test]
async fn test_check_skips_unschedulable_node() {
    let client = seeded_client();
    let nodes = [
        Node::new("node0").with_annotation("node.kubernetes.io/unschedulable", "NoExecute"),
        Node::new("node1"),
    ];
    let verdicts = checker(Arc::clone(&client))
        .check(&CancellationToken::new(), &nodes, 1024)
        .await
        .unwrap();

    assert_eq!(verdicts.len(), 2);
    match &verdicts[0].outcome {
        NodeOutcome::Skipped { reason } => {
            assert!(reason.contains("node.kubernetes.io/unschedulable"));
        }
        other => panic!("expected a skip, got: {other:?}"),
    }
    assert!(matches!(verdicts[1].outcome, NodeOutcome::Checked(_)));
    assert!(client.claims().is_empty());
    assert!(client.jobs().is_empty());
}

#[tokio::test]
async fn test_check_cleans_up_after_parse_failure() {
    let client = seeded_client();
    client.set_container_logs(
        "df",
        "Filesystem      Size  Used Avail Use% Mounted on\n\
         /dev/sda2        59G   49G  6.9G  88% /data",
    );

    let err = checker(Arc::clone(&client))
        .check(&CancellationToken::new(), &[Node::new("node0")], 1024)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "failed to parse \"6.9G\" as available space");

    // Cleaning ran even though parsing failed.
    assert!(client.claims().is_empty());
    assert!(client.jobs().is_empty());
    assert!(client.volumes().is_empty());
}

#[tokio::test]
async fn test_check_fails_fast_on_missing_configuration() {
    let client = Arc::new(MemoryCluster::new());
    client.add_storage_class(StorageClass::new("dst-sc"));

    let err = checker(Arc::clone(&client))
        .check(&CancellationToken::new(), &[Node::new("node0")], 1024)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AnnotationNotFound { .. }));
    // Nothing was provisioned for any node.
    assert!(client.claims().is_empty());
    assert!(client.jobs().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_check_cancelled_while_awaiting_output() {
    let client = Arc::new(MemoryCluster::new());
    client.add_storage_class(
        StorageClass::new("dst-sc")
            .with_annotation(CONFIG_ANNOTATION, "- name: BasePath\n  value: /var/local"),
    );
    client.provision_volumes(true);
    client.set_container_logs("df", DF_OUTPUT);
    // The fstab output never becomes available, so the checker has to poll.

    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(2)).await;
        cancel.cancel();
    });

    let checker = OpenEbsChecker::new(client.clone(), "myimage:latest", "src-sc", "dst-sc")
        .unwrap()
        .with_config(CheckerConfig {
            poll_interval: Duration::from_secs(1),
            reclaim_timeout: Duration::from_secs(30),
            ..CheckerConfig::default()
        });

    let err = checker
        .check(&token, &[Node::new("node0")], 1024)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled));

    // Cleaning still ran: the transient claim, job and volume are gone.
    assert!(client.claims().is_empty());
    assert!(client.jobs().is_empty());
    assert!(client.volumes().is_empty());
}

#[test]
fn test_verdict_serializes_for_reporting() {
    let verdict = clusterspace::NodeVerdict {
        node: "node0".to_string(),
        outcome: NodeOutcome::Checked(clusterspace::Verdict {
            free_bytes: 42,
            sufficient: true,
        }),
    };
    let json = serde_json::to_string(&verdict).unwrap();
    assert!(json.contains("\"node\":\"node0\""));
    assert!(json.contains("\"free_bytes\":42"));
}
