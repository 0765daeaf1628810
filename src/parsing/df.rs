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

use crate::error::{Error, Result, SpaceField};

/// Extract `(free, used)` byte counts from `df` output.
///
/// The report line is the one whose last whitespace-delimited field equals
/// `mount_point`. Columns are addressed **from the end** of that line: the
/// field three from the end is available space, four from the end is used
/// space. Counting from the end keeps the parser insensitive to blank lines
/// and to arbitrary-width device columns (long device paths, multi-word
/// prefixes) that would shift any from-the-start offset.
///
/// Both columns must be plain base-10 byte counts. Human-readable tokens such
/// as `6.9G` are rejected with a field-named error: the probe is required to
/// run `df` in byte mode, and accepting a unit-suffixed value here would
/// silently turn a misconfigured probe into a wildly wrong verdict.
pub fn parse_df_output(content: &[u8], mount_point: &str) -> Result<(i64, i64)> {
    let text = String::from_utf8_lossy(content);
    for line in text.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.last().copied() != Some(mount_point) {
            continue;
        }
        // Too short to address the used column from the end; keep scanning.
        if fields.len() < 4 {
            continue;
        }
        let free = parse_space_field(fields[fields.len() - 3], SpaceField::Available)?;
        let used = parse_space_field(fields[fields.len() - 4], SpaceField::Used)?;
        return Ok((free, used));
    }
    Err(Error::FreeSpaceNotFound)
}

fn parse_space_field(token: &str, field: SpaceField) -> Result<i64> {
    token
        .parse::<i64>()
        .ok()
        .filter(|bytes| *bytes >= 0)
        .ok_or_else(|| Error::UnparsableSpaceField {
            token: token.to_string(),
            field,
        })
}
