//! End-to-end tests for the record ledger.
//!
//! Drives a store through discovery, every pipeline stage, and extraction,
//! then checks the files on disk, a fresh reopen, and the audit.

use std::fs;
use std::path::Path;

use chrono::NaiveDate;
use grledger_core::{
    CrawlContext, ExtractionInfo, ExtractionStatus, LedgerConfig, LedgerError, LifecycleState,
    Operation, PartitionKey, RecordPatch, RecordStore, RunType, Stage, StageMetadata, StageResult,
    audit_ledger,
};
use tempfile::TempDir;

fn monthly(y: i32, m: u32, d: u32) -> CrawlContext {
    CrawlContext::new(RunType::Monthly, NaiveDate::from_ymd_opt(y, m, d).unwrap())
}

fn discover(store: &mut RecordStore, key: &str, gr_date: &str, crawl: &CrawlContext) {
    let patch = RecordPatch::new(key)
        .title(format!("Resolution {}", key))
        .department("Finance", "FIN")
        .gr_date(gr_date)
        .source_url(format!("https://gr.example/{}.pdf", key));
    store.upsert(&patch, crawl).unwrap();
}

fn lines(path: &Path) -> Vec<serde_json::Value> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[test]
fn full_pipeline_round_trip() {
    let tmp = TempDir::new().unwrap();
    let mut store = RecordStore::open_dir(tmp.path()).unwrap();
    let crawl = monthly(2024, 4, 1);

    discover(&mut store, "20", "2024-03-01", &crawl);
    discover(&mut store, "3", "2024-01-15", &crawl);
    discover(&mut store, "7", "2019-12-31", &crawl);

    // "20": full happy path with a wayback capture
    store
        .apply_stage_result(
            "20",
            &StageResult::succeeded(Stage::Download).with_metadata(
                StageMetadata::default()
                    .with_path("pdfs/2024/20.pdf")
                    .with_hash("abc123"),
            ),
        )
        .unwrap();
    store
        .apply_stage_result(
            "20",
            &StageResult::succeeded(Stage::Wayback)
                .with_metadata(StageMetadata::default().with_url("https://web.archive.org/20")),
        )
        .unwrap();
    store
        .apply_stage_result(
            "20",
            &StageResult::succeeded(Stage::Archive)
                .with_metadata(StageMetadata::default().with_identifier("gr-20")),
        )
        .unwrap();
    store
        .update(&RecordPatch::new("20").extraction(ExtractionInfo {
            page_count: Some(3),
            ..ExtractionInfo::with_status(ExtractionStatus::Success)
        }))
        .unwrap();

    // "3": download fails twice, then archived without a document
    store
        .apply_stage_result("3", &StageResult::failed(Stage::Download).with_error("404"))
        .unwrap();
    store
        .apply_stage_result("3", &StageResult::failed(Stage::Download))
        .unwrap();
    let exhausted = store
        .apply_stage_result("3", &StageResult::succeeded(Stage::Download))
        .unwrap_err();
    assert!(exhausted.is_retry_exhausted());
    store
        .apply_stage_result(
            "3",
            &StageResult::succeeded(Stage::Archive).with_document(false),
        )
        .unwrap();

    let states: Vec<(String, LifecycleState)> = store
        .iter_records()
        .map(|record| (record.key().to_string(), record.state()))
        .collect();
    assert_eq!(
        states,
        vec![
            ("20".to_string(), LifecycleState::ArchiveUploadedWithWaybackUrl),
            ("3".to_string(), LifecycleState::ArchiveUploadedWithoutDocument),
            ("7".to_string(), LifecycleState::Fetched),
        ]
    );

    // Partition files are key-sorted with sorted object keys
    let identity_2024 = lines(&tmp.path().join("urlinfos").join("2024.jsonl"));
    let keys: Vec<&str> = identity_2024
        .iter()
        .map(|row| row["record_key"].as_str().unwrap())
        .collect();
    assert_eq!(keys, vec!["20", "3"]);
    let raw = fs::read_to_string(tmp.path().join("urlinfos").join("2024.jsonl")).unwrap();
    assert!(raw.starts_with("{\"created_at_utc\":"));

    let pipeline_2024 = lines(&tmp.path().join("uploadinfos").join("2024.jsonl"));
    assert_eq!(pipeline_2024.len(), 2);
    assert_eq!(pipeline_2024[0]["download"]["path"], "pdfs/2024/20.pdf");
    assert_eq!(pipeline_2024[1]["download"]["attempts"], 2);
    assert_eq!(pipeline_2024[1]["download"]["error"], "download_failed");
    assert!(!tmp.path().join("uploadinfos").join("2019.jsonl").exists());

    // A fresh store sees exactly the same records
    let expected: Vec<_> = store.iter_records().collect();
    drop(store);
    let reopened = RecordStore::open_dir(tmp.path()).unwrap();
    let actual: Vec<_> = reopened.iter_records().collect();
    assert_eq!(actual, expected);
    assert_eq!(
        reopened.list_partitions(),
        vec![PartitionKey::Year(2024), PartitionKey::Year(2019)]
    );

    let report = audit_ledger(tmp.path()).unwrap();
    assert!(report.is_clean(), "{:?}", report.issues);
    assert_eq!(
        report.state_counts.get(&LifecycleState::Fetched),
        Some(&1)
    );
}

#[test]
fn rejected_operations_leave_files_untouched() {
    let tmp = TempDir::new().unwrap();
    let mut store = RecordStore::open_dir(tmp.path()).unwrap();
    let crawl = monthly(2024, 4, 1);
    discover(&mut store, "1", "2024-03-01", &crawl);
    discover(&mut store, "2", "2023-03-01", &crawl);
    store
        .apply_stage_result("1", &StageResult::succeeded(Stage::Download))
        .unwrap();

    let snapshot = |dir: &Path| -> Vec<(String, String)> {
        let mut files = Vec::new();
        for ns in ["urlinfos", "uploadinfos", "pdfinfos"] {
            let Ok(entries) = fs::read_dir(dir.join(ns)) else {
                continue;
            };
            for entry in entries {
                let path = entry.unwrap().path();
                files.push((
                    path.display().to_string(),
                    fs::read_to_string(&path).unwrap(),
                ));
            }
        }
        files.sort();
        files
    };
    let before = snapshot(tmp.path());

    let batch = [
        RecordPatch::new("2").title("renamed"),
        RecordPatch::new("1").gr_date("2022-01-01"),
    ];
    assert!(matches!(
        store.update_many(&batch),
        Err(LedgerError::RepartitionUnsupported { .. })
    ));
    assert!(matches!(
        store.insert(&RecordPatch::new("2"), &crawl),
        Err(LedgerError::DuplicateKey { .. })
    ));
    assert_eq!(snapshot(tmp.path()), before);

    store
        .apply_stage_result(
            "1",
            &StageResult::succeeded(Stage::Wayback)
                .with_metadata(StageMetadata::default().with_url("https://web.archive.org/1")),
        )
        .unwrap();
    store
        .apply_stage_result("1", &StageResult::succeeded(Stage::Archive))
        .unwrap();
    let after_valid = snapshot(tmp.path());
    assert_ne!(after_valid, before);

    assert!(matches!(
        store.apply_stage_result("1", &StageResult::succeeded(Stage::Download)),
        Err(LedgerError::InvalidTransition { .. })
    ));
    assert_eq!(snapshot(tmp.path()), after_valid);
    assert_eq!(store.find("2").unwrap().identity.title, "Resolution 2");
}

#[test]
fn identity_only_record_moves_between_partitions() {
    let tmp = TempDir::new().unwrap();
    let mut store = RecordStore::open_dir(tmp.path()).unwrap();
    discover(&mut store, "5", "not-a-date", &monthly(2024, 4, 1));
    assert_eq!(store.find("5").unwrap().partition(), PartitionKey::Unknown);

    let moved = store
        .update(&RecordPatch::new("5").gr_date("2021-07-04"))
        .unwrap();

    assert_eq!(moved.operation, Operation::Moved);
    assert_eq!(moved.partition, PartitionKey::Year(2021));
    assert!(lines(&tmp.path().join("urlinfos").join("unknown.jsonl")).is_empty());
    assert_eq!(store.list_partitions(), vec![PartitionKey::Year(2021)]);
    assert!(audit_ledger(tmp.path()).unwrap().is_clean());
}

#[test]
fn config_file_selects_root_and_partitions() {
    let tmp = TempDir::new().unwrap();
    let ledger_root = tmp.path().join("ledger");
    fs::write(
        tmp.path().join("ledger.toml"),
        format!(
            "root = {:?}\npartitions = [\"2024\"]\nfsync = false\n",
            ledger_root.display().to_string()
        ),
    )
    .unwrap();

    let config = LedgerConfig::load_from_dir(tmp.path()).unwrap();
    let mut store = RecordStore::open(&config).unwrap();
    assert_eq!(store.root(), ledger_root);

    discover(&mut store, "1", "2024-02-02", &monthly(2024, 4, 1));
    let err = store
        .upsert(
            &RecordPatch::new("2").gr_date("2020-02-02"),
            &monthly(2024, 4, 1),
        )
        .unwrap_err();
    assert!(matches!(err, LedgerError::PartitionNotLoaded { .. }));
    assert!(ledger_root.join("urlinfos").join("2024.jsonl").exists());
}

#[test]
fn legacy_extraction_status_is_read() {
    let tmp = TempDir::new().unwrap();
    let mut store = RecordStore::open_dir(tmp.path()).unwrap();
    discover(&mut store, "9", "2024-05-05", &monthly(2024, 6, 1));
    let created = store.find("9").unwrap().identity.created_at_utc;

    fs::create_dir_all(tmp.path().join("pdfinfos")).unwrap();
    fs::write(
        tmp.path().join("pdfinfos").join("2024.jsonl"),
        format!(
            "{{\"created_at_utc\":\"{}\",\"record_key\":\"9\",\"status\":\"missing_pdf\"}}\n",
            created
        ),
    )
    .unwrap();
    store.refresh().unwrap();

    let record = store.find("9").unwrap();
    assert!(record.has_extraction_row);
    assert_eq!(record.extraction.status, ExtractionStatus::MissingSource);
}
