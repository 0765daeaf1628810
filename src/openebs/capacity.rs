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

use serde::{Deserialize, Serialize};

/// One node's measured mount, as reported by the probe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskUsageSample {
    pub free_bytes: i64,
    pub used_bytes: i64,
    /// Whether the probe's mount point lives on the node's root filesystem
    /// rather than a dedicated backing volume.
    pub mounted_at_root: bool,
}

/// Decide whether the sampled mount leaves at least `reserved` bytes free.
///
/// Returns the usable free figure and the verdict. The free figure the OS
/// reports is already net of everything else sharing the backing device, so
/// the reservation is compared against it directly whether or not the mount
/// shares the root filesystem; `mounted_at_root` is carried for observability
/// only. The boundary is inclusive: `free == reserved` passes. A zero sample
/// never passes, even against a zero reservation — an absent measurement must
/// not read as "enough space".
pub fn has_enough_space(sample: DiskUsageSample, reserved: i64) -> (i64, bool) {
    let free = sample.free_bytes;
    (free, free > 0 && free >= reserved)
}

/// Whether `base_path` lives on the root filesystem, given the node's mount
/// points. The owning mount is the longest listed mount point that prefixes
/// the base path on a component boundary; a path no listed mount covers falls
/// through to the root filesystem as well.
pub fn mounted_at_root(mount_points: &[String], base_path: &str) -> bool {
    let owner = mount_points
        .iter()
        .filter(|mount_point| covers(mount_point, base_path))
        .max_by_key(|mount_point| mount_point.len());
    match owner {
        None => true,
        Some(mount_point) => mount_point == "/",
    }
}

fn covers(mount_point: &str, path: &str) -> bool {
    if mount_point == "/" {
        return true;
    }
    match path.strip_prefix(mount_point) {
        Some("") => true,
        Some(rest) => rest.starts_with('/'),
        None => false,
    }
}
