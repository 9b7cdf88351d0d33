//! JSONL read/write for partition files.
//!
//! Reading is strict: a line that fails to parse into the row type aborts the
//! read with [`LedgerError::Corrupt`] naming the file and line. Writing emits
//! one JSON object per line with object keys in sorted order, so rewrites
//! produce deterministic diffs.

use crate::error::{LedgerError, Result};
use crate::safe_io::{PendingWrite, write_pending};
use log::debug;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Read every row of a JSONL file.
///
/// Blank lines are ignored. Returns an empty Vec if the file doesn't exist.
pub fn read_jsonl_file<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut rows = Vec::new();

    for (line_num, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let row = serde_json::from_str(&line).map_err(|e| LedgerError::Corrupt {
            path: path.to_path_buf(),
            line: line_num + 1,
            message: e.to_string(),
        })?;
        rows.push(row);
    }

    debug!("read {} rows from {}", rows.len(), path.display());
    Ok(rows)
}

/// Serialize rows as JSONL with sorted object keys.
pub fn encode_jsonl<T: Serialize>(rows: &[T]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for row in rows {
        // serde_json's Value map is ordered by key, which gives the sorted
        // field order independent of struct declaration order.
        let value = serde_json::to_value(row)
            .map_err(|e| LedgerError::Io(std::io::Error::other(format!("JSON serialize: {}", e))))?;
        serde_json::to_writer(&mut out, &value)
            .map_err(|e| LedgerError::Io(std::io::Error::other(format!("JSON serialize: {}", e))))?;
        out.push(b'\n');
    }
    Ok(out)
}

/// Write `rows` to the temporary sibling of a JSONL file. The file itself
/// is replaced once the returned [`PendingWrite`] is committed.
pub fn stage_jsonl_file<T: Serialize>(path: &Path, rows: &[T], fsync: bool) -> Result<PendingWrite> {
    let contents = encode_jsonl(rows)?;
    let pending = write_pending(path, &contents, fsync)?;
    debug!("staged {} rows for {}", rows.len(), pending.target().display());
    Ok(pending)
}

/// Atomically replace a JSONL file with `rows`, in the given order.
pub fn write_jsonl_file<T: Serialize>(path: &Path, rows: &[T], fsync: bool) -> Result<()> {
    stage_jsonl_file(path, rows, fsync)?.commit()?;
    debug!("wrote {} rows to {}", rows.len(), path.display());
    Ok(())
}
