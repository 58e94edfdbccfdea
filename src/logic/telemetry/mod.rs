//! Telemetry Module
//!
//! The durable audit trail. Every terminal decision is written here before
//! the command is released or reported as blocked; the records double as
//! training data for the classifier.
//!
//! ## Structure
//! - `record.rs` - AuditRecord, SessionRecord, PolicyChange
//! - `recorder.rs` - Append-only, lock-serialised JSONL writer (`AuditLog`)
//! - `exporter.rs` - Read-only export (JSONL, CSV, JSON) + analytics
//! - `diagnostics.rs` - Fallback channel for audit write failures
//!
//! ## Usage
//! ```ignore
//! use crate::logic::telemetry::{AuditLog, AuditRecord};
//!
//! let log = AuditLog::from_config(&config);
//! if let Err(e) = log.append(&AuditRecord::new(&event, &vector, &decision)) {
//!     diagnostics.report("decision", &e);
//! }
//! ```

pub mod record;
pub mod recorder;
pub mod exporter;
pub mod diagnostics;

pub use record::{AuditRecord, PolicyChange, PolicyChangeKind, SessionEventKind, SessionRecord};

pub use recorder::{
    list_decision_files, read_records, AuditLog, ReadOutcome, DECISIONS_FILE, POLICY_CHANGES_FILE,
    SESSIONS_FILE,
};

pub use exporter::{
    default_export_name, export_audit, export_records, generate_analytics, load_records, summarize,
    AnalyticsSummary, ExportFilter, ExportFormat, ExportReport,
};

pub use diagnostics::Diagnostics;
