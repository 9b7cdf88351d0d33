//! Ledger configuration (`ledger.toml`).
//!
//! ```toml
//! root = "import"
//! partitions = ["2025", "2024"]
//! fsync = true
//! ```
//!
//! All fields are optional; the accessors apply defaults.

use crate::error::{LedgerError, Result};
use crate::partition::{Namespace, PartitionKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable naming the ledger root when the config doesn't.
pub const ROOT_ENV_VAR: &str = "GRLEDGER_ROOT";

/// Ledger root used when neither the config nor the environment sets one.
pub const DEFAULT_ROOT: &str = "import";

/// Config file name looked up by [`LedgerConfig::load_from_dir`].
pub const CONFIG_FILE_NAME: &str = "ledger.toml";

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LedgerConfig {
    /// Directory holding `urlinfos/`, `uploadinfos/` and `pdfinfos/`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,

    /// Only these partitions are loaded; writes to others fail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partitions: Option<Vec<String>>,

    /// Sync temp files to disk before the rename. Default true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fsync: Option<bool>,
}

impl LedgerConfig {
    /// Config rooted at `root`, other fields default.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
            ..Default::default()
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| LedgerError::Config(format!("failed to parse ledger config: {}", e)))
    }

    /// Reads `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content).map_err(|e| match e {
            LedgerError::Config(message) => {
                LedgerError::Config(format!("{}: {}", path.display(), message))
            }
            other => other,
        })
    }

    /// Reads `<dir>/ledger.toml`.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        Self::load(&dir.join(CONFIG_FILE_NAME))
    }

    /// Effective ledger root: `root`, then `$GRLEDGER_ROOT`, then `./import`.
    ///
    /// A path naming a namespace directory (or a legacy `grinfo` directory)
    /// resolves to its parent.
    pub fn root_dir(&self) -> PathBuf {
        let requested = match &self.root {
            Some(root) => root.clone(),
            None => match std::env::var(ROOT_ENV_VAR) {
                Ok(root) if !root.trim().is_empty() => PathBuf::from(root.trim()),
                _ => PathBuf::from(DEFAULT_ROOT),
            },
        };
        resolve_root_dir(requested)
    }

    /// Parsed partition filter. `None` loads every partition.
    pub fn partition_filter(&self) -> Result<Option<BTreeSet<PartitionKey>>> {
        let Some(names) = &self.partitions else {
            return Ok(None);
        };
        let mut filter = BTreeSet::new();
        for name in names.iter().map(|n| n.trim()).filter(|n| !n.is_empty()) {
            let partition = name
                .parse::<PartitionKey>()
                .map_err(LedgerError::Config)?;
            filter.insert(partition);
        }
        Ok((!filter.is_empty()).then_some(filter))
    }

    pub fn fsync_enabled(&self) -> bool {
        self.fsync.unwrap_or(true)
    }
}

fn resolve_root_dir(requested: PathBuf) -> PathBuf {
    let has_namespace_dirs =
        |dir: &Path| Namespace::ALL.iter().any(|ns| dir.join(ns.dir_name()).exists());
    if has_namespace_dirs(&requested) {
        return requested;
    }

    let is_nested_name = requested.file_name().is_some_and(|name| {
        name == "grinfo" || Namespace::ALL.iter().any(|ns| name == ns.dir_name())
    });
    if is_nested_name
        && let Some(parent) = requested.parent()
        && (has_namespace_dirs(parent) || requested.ends_with("grinfo"))
    {
        return parent.to_path_buf();
    }
    requested
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = LedgerConfig::default();
        assert!(config.fsync_enabled());
        assert_eq!(config.partition_filter().unwrap(), None);
    }

    #[test]
    fn test_from_toml_str() {
        let config = LedgerConfig::from_toml_str(
            "root = \"/data/ledger\"\npartitions = [\"2024\", \" unknown \", \"\"]\nfsync = false\n",
        )
        .unwrap();

        assert_eq!(config.root_dir(), PathBuf::from("/data/ledger"));
        assert!(!config.fsync_enabled());
        assert_eq!(
            config.partition_filter().unwrap(),
            Some(BTreeSet::from([PartitionKey::Year(2024), PartitionKey::Unknown]))
        );
    }

    #[test]
    fn test_bad_partition_name_is_config_error() {
        let config = LedgerConfig::from_toml_str("partitions = [\"24\"]").unwrap();
        assert!(matches!(
            config.partition_filter(),
            Err(LedgerError::Config(_))
        ));
    }

    #[test]
    fn test_unknown_key_is_config_error() {
        assert!(matches!(
            LedgerConfig::from_toml_str("rooot = \"x\""),
            Err(LedgerError::Config(_))
        ));
    }

    #[test]
    fn test_load_missing_and_present_file() {
        let temp_dir = TempDir::new().unwrap();
        assert_eq!(
            LedgerConfig::load_from_dir(temp_dir.path()).unwrap(),
            LedgerConfig::default()
        );

        fs::write(temp_dir.path().join(CONFIG_FILE_NAME), "fsync = false\n").unwrap();
        let config = LedgerConfig::load_from_dir(temp_dir.path()).unwrap();
        assert_eq!(config.fsync, Some(false));

        fs::write(temp_dir.path().join(CONFIG_FILE_NAME), "fsync = [").unwrap();
        assert!(LedgerConfig::load_from_dir(temp_dir.path()).is_err());
    }

    #[test]
    fn test_root_resolves_namespace_dir_to_parent() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir_all(temp_dir.path().join("urlinfos")).unwrap();

        let config = LedgerConfig::with_root(temp_dir.path().join("urlinfos"));
        assert_eq!(config.root_dir(), temp_dir.path());

        let config = LedgerConfig::with_root(temp_dir.path().join("grinfo"));
        assert_eq!(config.root_dir(), temp_dir.path());

        let config = LedgerConfig::with_root(temp_dir.path());
        assert_eq!(config.root_dir(), temp_dir.path());
    }

    #[test]
    #[serial]
    fn test_root_from_env_then_default() {
        // SAFETY: serialized with the other env tests
        unsafe {
            std::env::set_var(ROOT_ENV_VAR, "/env/ledger");
        }
        let from_env = LedgerConfig::default().root_dir();
        let explicit = LedgerConfig::with_root("/explicit").root_dir();
        unsafe {
            std::env::remove_var(ROOT_ENV_VAR);
        }
        assert_eq!(from_env, PathBuf::from("/env/ledger"));
        assert_eq!(explicit, PathBuf::from("/explicit"));
        assert_eq!(LedgerConfig::default().root_dir(), PathBuf::from(DEFAULT_ROOT));
    }
}
