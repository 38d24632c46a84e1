//! Line-level deltas between two versions of a file
//!
//! A delta rebuilds the new content from the old one with two operations:
//! copy a run of old lines, or insert literal bytes. Lines keep their
//! terminators, so applying a delta reproduces the new content byte for byte
//! whatever line endings it uses.
//!
//! The common subsequence is found with the classic dynamic-programming LCS
//! after trimming the shared prefix and suffix. Content that looks binary,
//! or whose changed region would need too large a table, gets no delta; the
//! caller then stores the full content instead.

use serde::{Deserialize, Serialize};

/// Largest LCS table (old lines × new lines) computed for one file
pub const MAX_LCS_CELLS: usize = 4_000_000;

/// Bytes inspected when deciding whether content is binary
const BINARY_SNIFF_LEN: usize = 8192;

/// One step of a line delta
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeltaOp {
    /// Copy `count` lines of the old content starting at line `start`
    Copy { start: u64, count: u64 },
    /// Insert literal bytes
    Insert(Vec<u8>),
}

/// Whether content should be treated as binary
pub fn is_binary_content(data: &[u8]) -> bool {
    data[..data.len().min(BINARY_SNIFF_LEN)].contains(&0)
}

/// Split into lines, each keeping its trailing `\n` if it has one
pub fn split_lines(data: &[u8]) -> Vec<&[u8]> {
    data.split_inclusive(|b| *b == b'\n').collect()
}

/// Compute a delta turning `old` into `new`
///
/// Returns `None` when either side is binary or the changed region is too
/// large to diff.
pub fn compute_line_delta(old: &[u8], new: &[u8]) -> Option<Vec<DeltaOp>> {
    if is_binary_content(old) || is_binary_content(new) {
        return None;
    }

    let old_lines = split_lines(old);
    let new_lines = split_lines(new);

    let prefix = old_lines
        .iter()
        .zip(new_lines.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let suffix = old_lines[prefix..]
        .iter()
        .rev()
        .zip(new_lines[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();

    let old_mid = &old_lines[prefix..old_lines.len() - suffix];
    let new_mid = &new_lines[prefix..new_lines.len() - suffix];

    if old_mid.len().saturating_mul(new_mid.len()) > MAX_LCS_CELLS {
        return None;
    }

    let mut builder = DeltaBuilder::default();
    builder.copy(0, prefix);

    let lcs = compute_lcs(old_mid, new_mid);
    for change in lcs_to_changes(&lcs, old_mid.len(), new_mid.len()) {
        match change {
            ChangeOp::Keep(old_idx) => builder.copy(prefix + old_idx, 1),
            ChangeOp::Insert(new_idx) => builder.insert(new_mid[new_idx]),
            ChangeOp::Delete => {}
        }
    }

    builder.copy(old_lines.len() - suffix, suffix);
    Some(builder.ops)
}

/// Rebuild new content from `old` and a delta
pub fn apply_line_delta(old: &[u8], delta: &[DeltaOp]) -> Result<Vec<u8>, String> {
    let old_lines = split_lines(old);
    let mut out = Vec::with_capacity(old.len());
    for op in delta {
        match op {
            DeltaOp::Copy { start, count } => {
                let start = *start as usize;
                let end = start.checked_add(*count as usize).unwrap_or(usize::MAX);
                if end > old_lines.len() {
                    return Err(format!(
                        "copy of lines {}..{} exceeds base of {} lines",
                        start,
                        end,
                        old_lines.len()
                    ));
                }
                for line in &old_lines[start..end] {
                    out.extend_from_slice(line);
                }
            }
            DeltaOp::Insert(bytes) => out.extend_from_slice(bytes),
        }
    }
    Ok(out)
}

/// Bytes a delta carries literally
pub fn inserted_bytes(delta: &[DeltaOp]) -> usize {
    delta
        .iter()
        .map(|op| match op {
            DeltaOp::Insert(bytes) => bytes.len(),
            DeltaOp::Copy { .. } => 0,
        })
        .sum()
}

#[derive(Debug, Clone, Copy)]
enum ChangeOp {
    Keep(usize),
    Delete,
    Insert(usize),
}

/// Merges adjacent copies and inserts as they are emitted
#[derive(Default)]
struct DeltaBuilder {
    ops: Vec<DeltaOp>,
}

impl DeltaBuilder {
    fn copy(&mut self, start: usize, count: usize) {
        if count == 0 {
            return;
        }
        if let Some(DeltaOp::Copy {
            start: last_start,
            count: last_count,
        }) = self.ops.last_mut()
        {
            if *last_start + *last_count == start as u64 {
                *last_count += count as u64;
                return;
            }
        }
        self.ops.push(DeltaOp::Copy {
            start: start as u64,
            count: count as u64,
        });
    }

    fn insert(&mut self, bytes: &[u8]) {
        if let Some(DeltaOp::Insert(last)) = self.ops.last_mut() {
            last.extend_from_slice(bytes);
            return;
        }
        self.ops.push(DeltaOp::Insert(bytes.to_vec()));
    }
}

/// Longest common subsequence as (old index, new index) pairs
fn compute_lcs(old_lines: &[&[u8]], new_lines: &[&[u8]]) -> Vec<(usize, usize)> {
    let m = old_lines.len();
    let n = new_lines.len();
    if m == 0 || n == 0 {
        return Vec::new();
    }

    // Row-major (m + 1) × (n + 1) table
    let width = n + 1;
    let mut dp = vec![0u32; (m + 1) * width];
    for i in 1..=m {
        for j in 1..=n {
            dp[i * width + j] = if old_lines[i - 1] == new_lines[j - 1] {
                dp[(i - 1) * width + j - 1] + 1
            } else {
                dp[(i - 1) * width + j].max(dp[i * width + j - 1])
            };
        }
    }

    let mut lcs = Vec::new();
    let mut i = m;
    let mut j = n;
    while i > 0 && j > 0 {
        if old_lines[i - 1] == new_lines[j - 1] {
            lcs.push((i - 1, j - 1));
            i -= 1;
            j -= 1;
        } else if dp[(i - 1) * width + j] > dp[i * width + j - 1] {
            i -= 1;
        } else {
            j -= 1;
        }
    }
    lcs.reverse();
    lcs
}

fn lcs_to_changes(lcs: &[(usize, usize)], old_len: usize, new_len: usize) -> Vec<ChangeOp> {
    let mut changes = Vec::with_capacity(old_len.max(new_len));
    let mut old_idx = 0;
    let mut new_idx = 0;

    for &(lcs_old, lcs_new) in lcs {
        while old_idx < lcs_old {
            changes.push(ChangeOp::Delete);
            old_idx += 1;
        }
        while new_idx < lcs_new {
            changes.push(ChangeOp::Insert(new_idx));
            new_idx += 1;
        }
        changes.push(ChangeOp::Keep(old_idx));
        old_idx += 1;
        new_idx += 1;
    }
    while old_idx < old_len {
        changes.push(ChangeOp::Delete);
        old_idx += 1;
    }
    while new_idx < new_len {
        changes.push(ChangeOp::Insert(new_idx));
        new_idx += 1;
    }

    changes
}
