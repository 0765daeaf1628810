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

use crate::error::{Error, Result};

/// Extract the mount points from an `fstab` listing, in order of appearance.
///
/// Blank lines and `#` comments are ignored; the second whitespace-delimited
/// field of every other line is its mount point. Swap entries use the literal
/// mount point `none` and are skipped. Duplicates are preserved as written.
pub fn parse_fstab_output(content: &[u8]) -> Result<Vec<String>> {
    let text = String::from_utf8_lossy(content);
    let mut mount_points = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some(mount_point) = line.split_whitespace().nth(1) else {
            continue;
        };
        if mount_point == "none" {
            continue;
        }
        mount_points.push(mount_point.to_string());
    }
    if mount_points.is_empty() {
        return Err(Error::NoMountPoints);
    }
    Ok(mount_points)
}
