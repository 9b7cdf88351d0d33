//! # Ledger Audit
//!
//! Read-only consistency check of a ledger directory. [`audit_ledger`] reads
//! the partition files directly, without opening a store, and keeps going
//! past every problem it finds: the result is an [`AuditReport`] listing all
//! issues with their file and line.
//!
//! Checks:
//! - partition file names and stale temp files
//! - rows that fail to decode (bad JSON, unknown fields, wrong types)
//! - duplicate keys within a namespace
//! - identity partition vs `gr_date`
//! - pipeline and extraction rows without an identity row, or in a
//!   different partition than it
//! - stage attempts above [`MAX_STAGE_ATTEMPTS`]
//! - lifecycle state vs stage statuses
//! - empty `source_url` and crawl date order
//! - `updated_at_utc` before `created_at_utc`

use crate::error::Result;
use crate::lifecycle::{LifecycleState, Stage};
use crate::model::{
    ExtractionRow, IdentityRow, LedgerRow, MAX_STAGE_ATTEMPTS, PipelineRow, StageStatus,
};
use crate::partition::{Namespace, PARTITION_EXTENSION, PartitionKey};
use crate::safe_io::TEMP_SUFFIX;
use log::info;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use strum::{AsRefStr, Display};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Display, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Issue {
    pub severity: Severity,
    pub code: &'static str,
    pub message: String,
    pub path: PathBuf,
    /// 1-based line number; 0 for file-level issues.
    pub line: usize,
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {}:{}: {}",
            self.severity,
            self.code,
            self.path.display(),
            self.line,
            self.message
        )
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AuditReport {
    pub root: PathBuf,
    /// Non-blank lines read across all namespaces.
    pub rows_checked: usize,
    pub issues: Vec<Issue>,
    /// Effective lifecycle state per identity record. Records without a
    /// pipeline row count as `FETCHED`.
    pub state_counts: BTreeMap<LifecycleState, usize>,
}

impl AuditReport {
    pub fn error_count(&self) -> usize {
        self.count(Severity::Error)
    }

    pub fn warning_count(&self) -> usize {
        self.count(Severity::Warning)
    }

    /// True when no error-level issue was found. Warnings are allowed.
    pub fn is_clean(&self) -> bool {
        self.error_count() == 0
    }

    pub fn issues_with_code<'a>(&'a self, code: &'a str) -> impl Iterator<Item = &'a Issue> + 'a {
        self.issues.iter().filter(move |issue| issue.code == code)
    }

    fn count(&self, severity: Severity) -> usize {
        self.issues
            .iter()
            .filter(|issue| issue.severity == severity)
            .count()
    }

    fn push(
        &mut self,
        severity: Severity,
        code: &'static str,
        message: impl Into<String>,
        site: &Site<'_>,
    ) {
        self.issues.push(Issue {
            severity,
            code,
            message: message.into(),
            path: site.path.to_path_buf(),
            line: site.line,
        });
    }
}

/// Where a row was read from.
struct Site<'a> {
    partition: PartitionKey,
    path: &'a Path,
    line: usize,
}

struct Located<R> {
    partition: PartitionKey,
    path: PathBuf,
    line: usize,
    row: R,
}

impl<R> Located<R> {
    fn site(&self) -> Site<'_> {
        Site {
            partition: self.partition,
            path: &self.path,
            line: self.line,
        }
    }
}

/// Audits the ledger rooted at `root`.
///
/// # Errors
///
/// Only I/O failures other than a missing namespace directory are returned
/// as errors; everything wrong with the data is reported as an [`Issue`].
pub fn audit_ledger(root: &Path) -> Result<AuditReport> {
    let mut report = AuditReport {
        root: root.to_path_buf(),
        ..Default::default()
    };

    let identity = scan_namespace::<IdentityRow>(root, &mut report, check_identity)?;
    let pipeline = scan_namespace::<PipelineRow>(root, &mut report, check_pipeline)?;
    let extraction = scan_namespace::<ExtractionRow>(root, &mut report, |_, _, _| {})?;

    if identity.files == 0 {
        let dir = root.join(Namespace::Identity.dir_name());
        report.push(
            Severity::Error,
            "ledger_files_missing",
            format!("no partition files in {}", dir.display()),
            &Site {
                partition: PartitionKey::Unknown,
                path: &dir,
                line: 0,
            },
        );
    }

    check_companions(&identity.rows, &pipeline.rows, &mut report);
    check_companions(&identity.rows, &extraction.rows, &mut report);

    for key in identity.rows.keys() {
        let state = pipeline
            .rows
            .get(key)
            .map(|located| located.row.state)
            .unwrap_or_default();
        *report.state_counts.entry(state).or_default() += 1;
    }

    info!(
        "audited {} rows under {}: {} errors, {} warnings",
        report.rows_checked,
        root.display(),
        report.error_count(),
        report.warning_count()
    );
    Ok(report)
}

// ============================================================================
// Scanning
// ============================================================================

struct Scanned<R> {
    files: usize,
    rows: BTreeMap<String, Located<R>>,
}

fn scan_namespace<R: LedgerRow>(
    root: &Path,
    report: &mut AuditReport,
    check: impl Fn(&R, &Site<'_>, &mut AuditReport),
) -> Result<Scanned<R>> {
    let mut scanned = Scanned {
        files: 0,
        rows: BTreeMap::new(),
    };
    for (partition, path) in partition_files(&root.join(R::NAMESPACE.dir_name()), report)? {
        scanned.files += 1;
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                report.push(
                    Severity::Error,
                    "file_not_utf8",
                    e.to_string(),
                    &Site {
                        partition,
                        path: &path,
                        line: 0,
                    },
                );
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        for (index, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            report.rows_checked += 1;
            let site = Site {
                partition,
                path: &path,
                line: index + 1,
            };
            let row: R = match serde_json::from_str(line) {
                Ok(row) => row,
                Err(e) => {
                    report.push(Severity::Error, "json_decode_error", e.to_string(), &site);
                    continue;
                }
            };
            check_row(&row, &site, report);
            check(&row, &site, report);

            let key = row.record_key().to_string();
            if let Some(first) = scanned.rows.get(&key) {
                report.push(
                    Severity::Error,
                    "duplicate_key",
                    format!(
                        "duplicate record_key={} in {} (first seen at {}:{})",
                        key,
                        R::NAMESPACE,
                        first.path.display(),
                        first.line
                    ),
                    &site,
                );
                continue;
            }
            scanned.rows.insert(
                key,
                Located {
                    partition,
                    path: path.clone(),
                    line: site.line,
                    row,
                },
            );
        }
    }
    Ok(scanned)
}

/// Partition files of one namespace directory, sorted by name. Misnamed
/// files and leftover temp files are reported and skipped.
fn partition_files(dir: &Path, report: &mut AuditReport) -> Result<Vec<(PartitionKey, PathBuf)>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            paths.push(entry.path());
        }
    }
    paths.sort();

    let suffix = format!(".{}", PARTITION_EXTENSION);
    let mut files = Vec::new();
    for path in paths {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let site = Site {
            partition: PartitionKey::Unknown,
            path: &path,
            line: 0,
        };
        if name.starts_with('.') && name.ends_with(TEMP_SUFFIX) {
            report.push(
                Severity::Warning,
                "stale_temp_file",
                format!("leftover temp file {}", name),
                &site,
            );
            continue;
        }
        let Some(stem) = name.strip_suffix(&suffix) else {
            continue;
        };
        match stem.parse::<PartitionKey>() {
            Ok(partition) => files.push((partition, path)),
            Err(e) => report.push(Severity::Error, "invalid_partition_filename", e, &site),
        }
    }
    Ok(files)
}

// ============================================================================
// Row checks
// ============================================================================

fn check_row<R: LedgerRow>(row: &R, site: &Site<'_>, report: &mut AuditReport) {
    if let Some(updated) = row.updated_at()
        && updated < row.created_at()
    {
        report.push(
            Severity::Warning,
            "created_after_updated",
            format!(
                "created_at_utc={} > updated_at_utc={}",
                row.created_at(),
                updated
            ),
            site,
        );
    }
}

fn check_identity(row: &IdentityRow, site: &Site<'_>, report: &mut AuditReport) {
    match (site.partition, PartitionKey::for_date(&row.gr_date)) {
        (actual, expected) if actual == expected => {}
        (PartitionKey::Unknown, _) => report.push(
            Severity::Error,
            "unknown_partition_has_valid_gr_date",
            format!("unknown partition holds a row with gr_date={}", row.gr_date),
            site,
        ),
        (actual, PartitionKey::Unknown) => report.push(
            Severity::Error,
            "partition_record_missing_valid_gr_date",
            format!("partition {} holds a row with gr_date={:?}", actual, row.gr_date),
            site,
        ),
        (actual, _) => report.push(
            Severity::Error,
            "partition_year_mismatch",
            format!("partition {} but gr_date={}", actual, row.gr_date),
            site,
        ),
    }

    if row.source_url.trim().is_empty() {
        report.push(Severity::Warning, "source_url_empty", "source_url is empty", site);
    }

    if row.first_seen_crawl_date > row.last_seen_crawl_date {
        report.push(
            Severity::Error,
            "crawl_date_order_invalid",
            format!(
                "first_seen_crawl_date={} > last_seen_crawl_date={}",
                row.first_seen_crawl_date, row.last_seen_crawl_date
            ),
            site,
        );
    }
}

fn check_pipeline(row: &PipelineRow, site: &Site<'_>, report: &mut AuditReport) {
    for stage in Stage::ALL {
        let attempts = row.attempts(stage);
        if attempts > MAX_STAGE_ATTEMPTS {
            report.push(
                Severity::Error,
                "attempt_counts_out_of_range",
                format!(
                    "{}.attempts must be in [0,{}], got {}",
                    stage, MAX_STAGE_ATTEMPTS, attempts
                ),
                site,
            );
        }
    }
    check_state(row, site, report);
}

fn check_state(row: &PipelineRow, site: &Site<'_>, report: &mut AuditReport) {
    use LifecycleState::*;

    let state = row.state;
    let required = match state {
        Fetched => None,
        DownloadSuccess => Some((Stage::Download, StageStatus::Success)),
        DownloadFailed => Some((Stage::Download, StageStatus::Failed)),
        WaybackUploaded => Some((Stage::Wayback, StageStatus::Success)),
        WaybackUploadFailed => Some((Stage::Wayback, StageStatus::Failed)),
        ArchiveUploadedWithWaybackUrl
        | ArchiveUploadedWithoutWaybackUrl
        | ArchiveUploadedWithoutDocument => Some((Stage::Archive, StageStatus::Success)),
    };
    if let Some((stage, status)) = required
        && row.status(stage) != status
    {
        report.push(
            Severity::Error,
            "state_stage_status_mismatch",
            format!(
                "{} requires {}.status={}, got {}",
                state,
                stage,
                status,
                row.status(stage)
            ),
            site,
        );
    }

    if state == Fetched && row.download.status != StageStatus::NotAttempted {
        report.push(
            Severity::Warning,
            "state_fetched_download_attempted",
            format!("FETCHED with download.status={}", row.download.status),
            site,
        );
    }
    // A record re-entering download after a no-document archival keeps its
    // archive status, so this is only a warning.
    if !state.is_archived() && row.archive.status == StageStatus::Success {
        report.push(
            Severity::Warning,
            "state_archive_success_not_archived",
            format!("{} with archive.status=success", state),
            site,
        );
    }

    match state {
        ArchiveUploadedWithWaybackUrl if !row.has_wayback_url() => report.push(
            Severity::Warning,
            "state_archive_with_wayback_missing_url",
            "ARCHIVE_UPLOADED_WITH_WAYBACK_URL has empty wayback.url",
            site,
        ),
        ArchiveUploadedWithoutWaybackUrl if row.has_wayback_url() => report.push(
            Severity::Warning,
            "state_archive_without_wayback_has_url",
            "ARCHIVE_UPLOADED_WITHOUT_WAYBACK_URL has non-empty wayback.url",
            site,
        ),
        ArchiveUploadedWithoutDocument if row.download.status == StageStatus::Success => report
            .push(
                Severity::Warning,
                "state_archive_without_document_download_success",
                "ARCHIVE_UPLOADED_WITHOUT_DOCUMENT with download.status=success",
                site,
            ),
        _ => {}
    }
}

// ============================================================================
// Cross-namespace checks
// ============================================================================

fn check_companions<R: LedgerRow>(
    identity: &BTreeMap<String, Located<IdentityRow>>,
    companions: &BTreeMap<String, Located<R>>,
    report: &mut AuditReport,
) {
    for (key, located) in companions {
        let site = located.site();
        match identity.get(key) {
            None => report.push(
                Severity::Error,
                "orphan_row",
                format!(
                    "{} row {} has no {} row",
                    R::NAMESPACE,
                    key,
                    Namespace::Identity
                ),
                &site,
            ),
            Some(owner) if owner.partition != located.partition => report.push(
                Severity::Error,
                "partition_inconsistent",
                format!(
                    "{} row {} is in partition {} but its {} row is in {}",
                    R::NAMESPACE,
                    key,
                    located.partition,
                    Namespace::Identity,
                    owner.partition
                ),
                &site,
            ),
            Some(_) => {}
        }
    }
}
