//! grledger-core: partitioned, crash-safe record ledger
//!
//! Tracks government-document records through the acquisition pipeline
//! (discovery, download, web-archive capture, archival upload, extraction).
//! Each record is kept as up to three rows in separate namespaces under one
//! ledger root:
//!
//! ```text
//! <root>/urlinfos/<year>.jsonl      identity rows
//! <root>/uploadinfos/<year>.jsonl   pipeline rows (state, stage results)
//! <root>/pdfinfos/<year>.jsonl      extraction rows
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use grledger_core::{CrawlContext, RecordPatch, RecordStore, RunType, Stage, StageResult};
//!
//! fn main() -> grledger_core::Result<()> {
//!     let mut store = RecordStore::open_dir("import")?;
//!     let crawl = CrawlContext::today(RunType::Daily);
//!
//!     store.upsert(&RecordPatch::new("123").gr_date("2024-03-01"), &crawl)?;
//!     store.apply_stage_result("123", &StageResult::succeeded(Stage::Download))?;
//!
//!     for record in store.iter_records() {
//!         println!("{} {}", record.key(), record.state());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! [`RecordStore`] is the only writer that keeps the namespaces consistent.
//! [`audit_ledger`] checks a ledger directory without opening a store.

pub mod audit;
pub mod config;
pub mod dates;
pub mod error;
pub mod index;
pub mod jsonl;
pub mod lifecycle;
pub mod model;
pub mod partition;
pub mod patch;
pub mod record;
pub mod safe_io;
pub mod stage_result;
pub mod store;
pub mod table;

// Re-export commonly used types
pub use audit::{AuditReport, Issue, Severity, audit_ledger};
pub use config::LedgerConfig;
pub use dates::{CrawlContext, RunType, Timestamp};
pub use error::{LedgerError, Result};
pub use lifecycle::{LifecycleState, Stage, StageOutcome, next_state, validate_transition};
pub use model::{
    ExtractionInfo, ExtractionRow, ExtractionStatus, IdentityRow, LedgerRow, MAX_STAGE_ATTEMPTS,
    PipelineRow, StageStatus,
};
pub use partition::{Namespace, PartitionKey};
pub use patch::{PipelinePatch, RecordPatch};
pub use record::{Record, compose};
pub use stage_result::{StageMetadata, StageResult};
pub use store::{Operation, RecordStore, UpsertResult};
