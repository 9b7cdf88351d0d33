//! Atomic file replacement.
//!
//! Partition files are only ever rewritten whole: the new content goes to a
//! hidden temporary sibling (`.<name>.tmp`), optionally fsynced, then renamed
//! over the target. Readers see the old file or the complete new one.
//!
//! [`write_pending`] and [`PendingWrite::commit`] split the two halves so a
//! caller can write every temporary file of a multi-file change before
//! renaming any of them.

use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Suffix of in-flight temporary files.
pub const TEMP_SUFFIX: &str = ".tmp";

/// Temporary sibling used while rewriting `path`.
pub fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = OsString::from(".");
    if let Some(file_name) = path.file_name() {
        name.push(file_name);
    }
    name.push(TEMP_SUFFIX);
    path.with_file_name(name)
}

/// A fully written temporary file waiting to replace its target.
///
/// Dropping it without calling [`commit`](PendingWrite::commit) deletes the
/// temporary file and leaves the target untouched.
#[derive(Debug)]
pub struct PendingWrite {
    tmp_path: PathBuf,
    target: PathBuf,
    renamed: bool,
}

impl PendingWrite {
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Renames the temporary file over the target.
    pub fn commit(mut self) -> io::Result<()> {
        fs::rename(&self.tmp_path, &self.target)?;
        self.renamed = true;
        Ok(())
    }
}

impl Drop for PendingWrite {
    fn drop(&mut self) {
        if !self.renamed {
            let _ = fs::remove_file(&self.tmp_path);
        }
    }
}

/// Write `contents` to the temporary sibling of `path` without touching
/// `path` itself.
///
/// Creates parent directories as needed. With `fsync` set, the temporary
/// file is synced to disk before this returns.
///
/// # Errors
///
/// Returns an error if the temporary file cannot be created, written, or
/// synced. Any partially written temporary file is removed.
pub fn write_pending(path: &Path, contents: &[u8], fsync: bool) -> io::Result<PendingWrite> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let tmp_path = temp_path_for(path);

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp_path)?;
    let pending = PendingWrite {
        tmp_path,
        target: path.to_path_buf(),
        renamed: false,
    };

    {
        let mut writer = BufWriter::new(&mut file);
        writer.write_all(contents)?;
        writer.flush()?;
    }

    if fsync {
        file.sync_all()?;
    }

    Ok(pending)
}

/// Renames every pending file in order.
///
/// Stops at the first failure; files not yet renamed are discarded.
pub fn commit_all(pending: Vec<PendingWrite>) -> io::Result<()> {
    for write in pending {
        write.commit()?;
    }
    Ok(())
}

/// Atomically replace `path` with `contents`.
///
/// # Errors
///
/// Returns an error if the temporary file cannot be created, written, synced,
/// or renamed. On error the target is left untouched.
pub fn atomic_write(path: &Path, contents: &[u8], fsync: bool) -> io::Result<()> {
    write_pending(path, contents, fsync)?.commit()
}
