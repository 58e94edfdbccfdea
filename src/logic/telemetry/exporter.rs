//! Audit Exporter
//!
//! Read-only bulk export of decision records for offline dataset curation,
//! plus a summary for quick inspection. Reads hold a shared lock on the audit
//! directory so an export never sees a half-written rotation. Historical
//! records are never modified.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::Serialize;

use crate::error::ExportError;
use crate::logic::escalation::{DecisionSource, Outcome};

use super::record::AuditRecord;
use super::recorder::{list_decision_files, read_records, LOCK_FILE};

// ============================================================================
// EXPORT FORMATS
// ============================================================================

/// Supported export formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// JSONL (default, one JSON per line)
    Jsonl,
    /// CSV for spreadsheet analysis
    Csv,
    /// Pretty JSON array
    JsonArray,
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "jsonl" | "ndjson" => Ok(ExportFormat::Jsonl),
            "csv" => Ok(ExportFormat::Csv),
            "json" | "json-array" => Ok(ExportFormat::JsonArray),
            other => Err(format!("unknown export format `{}` (jsonl, csv, json)", other)),
        }
    }
}

/// Record selection
#[derive(Debug, Clone, Default)]
pub struct ExportFilter {
    pub session_id: Option<String>,
    pub outcome: Option<Outcome>,
    pub since: Option<DateTime<Utc>>,
}

impl ExportFilter {
    pub fn matches(&self, record: &AuditRecord) -> bool {
        self.session_id.as_deref().map_or(true, |s| record.session_id == s)
            && self.outcome.map_or(true, |o| record.outcome == o)
            && self.since.map_or(true, |t| record.timestamp >= t)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExportReport {
    pub exported: usize,
    /// Lines skipped because they did not parse
    pub malformed: usize,
    pub files_read: usize,
}

// ============================================================================
// LOADING
// ============================================================================

/// All decision records in `audit_dir`, chronological, filtered
pub fn load_records(audit_dir: &Path, filter: &ExportFilter) -> Result<(Vec<AuditRecord>, ExportReport), ExportError> {
    let _lock = SharedLock::acquire(audit_dir)?;

    let files = list_decision_files(audit_dir).map_err(|source| ExportError::Io {
        path: audit_dir.to_path_buf(),
        source,
    })?;

    let mut report = ExportReport {
        files_read: files.len(),
        ..Default::default()
    };
    let mut records = Vec::new();
    for path in &files {
        let read = read_records(path).map_err(|source| ExportError::Io {
            path: path.clone(),
            source,
        })?;
        report.malformed += read.malformed;
        records.extend(read.records.into_iter().filter(|r| filter.matches(r)));
    }

    // Stable: equal timestamps keep write order
    records.sort_by_key(|r| r.timestamp);
    report.exported = records.len();
    if report.malformed > 0 {
        log::warn!("Skipped {} malformed audit line(s) in {:?}", report.malformed, audit_dir);
    }
    Ok((records, report))
}

/// Shared advisory lock on `.audit.lock`, released on drop
struct SharedLock {
    file: Option<File>,
}

impl SharedLock {
    fn acquire(audit_dir: &Path) -> Result<Self, ExportError> {
        let path = audit_dir.join(LOCK_FILE);
        if !audit_dir.exists() {
            return Ok(Self { file: None });
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|source| ExportError::Io {
                path: path.clone(),
                source,
            })?;
        FileExt::lock_shared(&file).map_err(|source| ExportError::Io { path, source })?;
        Ok(Self { file: Some(file) })
    }
}

impl Drop for SharedLock {
    fn drop(&mut self) {
        if let Some(file) = &self.file {
            let _ = FileExt::unlock(file);
        }
    }
}

// ============================================================================
// EXPORT FUNCTIONS
// ============================================================================

/// Export matching records from `audit_dir` to `destination`
pub fn export_audit(
    audit_dir: &Path,
    destination: &Path,
    format: ExportFormat,
    filter: &ExportFilter,
) -> Result<ExportReport, ExportError> {
    let (records, report) = load_records(audit_dir, filter)?;
    export_records(&records, destination, format)?;
    log::info!("Exported {} audit record(s) to {:?}", report.exported, destination);
    Ok(report)
}

/// Write records to a file
pub fn export_records(records: &[AuditRecord], destination: &Path, format: ExportFormat) -> Result<usize, ExportError> {
    let io_err = |source: std::io::Error| ExportError::Io {
        path: destination.to_path_buf(),
        source,
    };
    let file = File::create(destination).map_err(io_err)?;
    let mut out = BufWriter::new(file);

    match format {
        ExportFormat::Jsonl => {
            for record in records {
                writeln!(out, "{}", serde_json::to_string(record)?).map_err(io_err)?;
            }
        }
        ExportFormat::JsonArray => {
            serde_json::to_writer_pretty(&mut out, records)?;
            writeln!(out).map_err(io_err)?;
        }
        ExportFormat::Csv => {
            write_csv(&mut out, records).map_err(io_err)?;
        }
    }

    out.flush().map_err(io_err)?;
    Ok(records.len())
}

pub const CSV_HEADER: &str = "id,timestamp,session_id,raw_command,tier,initial_tier,decision_source,outcome,score,latency_ms,ruleset_version,pinned,faults,llm_decision,llm_confidence,llm_latency_ms,human_answer,human_latency_ms,reasoning";

fn write_csv<W: Write>(out: &mut W, records: &[AuditRecord]) -> std::io::Result<()> {
    writeln!(out, "{}", CSV_HEADER)?;

    for r in records {
        let pinned = r.pinned.join("|");
        let faults: Vec<&str> = r.faults.iter().map(|f| f.as_str()).collect();
        let (llm_decision, llm_confidence, llm_latency) = match &r.llm {
            Some(llm) => (llm.decision.as_str(), format!("{:.2}", llm.confidence), llm.latency_ms.to_string()),
            None => ("", String::new(), String::new()),
        };
        let (human_answer, human_latency) = match &r.human {
            Some(human) => (human.answer.as_str(), human.latency_ms.to_string()),
            None => ("", String::new()),
        };
        writeln!(
            out,
            "{},{},{},{},{},{},{},{},{:.4},{},{},{},{},{},{},{},{},{},{}",
            r.id,
            r.timestamp.to_rfc3339(),
            csv_field(&r.session_id),
            csv_field(&r.raw_command),
            r.tier.as_str(),
            r.initial_tier.as_str(),
            r.decision_source.as_str(),
            r.outcome.as_str(),
            r.score,
            r.latency_ms,
            r.ruleset_version,
            csv_field(&pinned),
            faults.join("|"),
            llm_decision,
            llm_confidence,
            llm_latency,
            human_answer,
            human_latency,
            csv_field(&r.reasoning),
        )?;
    }

    Ok(())
}

/// Quote always; double embedded quotes; keep one record per line
fn csv_field(value: &str) -> String {
    let flat = value.replace(['\n', '\r'], " ");
    format!("\"{}\"", flat.replace('"', "\"\""))
}

// ============================================================================
// ANALYTICS
// ============================================================================

/// Summary over decision records
#[derive(Debug, Clone, Default, Serialize)]
pub struct AnalyticsSummary {
    pub total: u64,
    pub by_outcome: BTreeMap<String, u64>,
    pub by_source: BTreeMap<String, u64>,
    pub by_tier: BTreeMap<String, u64>,
    pub average_latency_ms: f64,
    pub fail_safe_count: u64,
    /// Share of decisions a human was asked for (or timed out on)
    pub escalation_rate: f32,
    /// Human allowed a pinned command or denied an unpinned one
    pub human_overrides: u64,
    pub malformed_lines: usize,
    pub first_timestamp: Option<DateTime<Utc>>,
    pub last_timestamp: Option<DateTime<Utc>>,
}

pub fn summarize(records: &[AuditRecord]) -> AnalyticsSummary {
    let mut summary = AnalyticsSummary::default();
    let mut latency_total: u128 = 0;
    let mut escalated = 0u64;

    for r in records {
        summary.total += 1;
        *summary.by_outcome.entry(r.outcome.as_str().to_string()).or_insert(0) += 1;
        *summary.by_source.entry(r.decision_source.as_str().to_string()).or_insert(0) += 1;
        *summary.by_tier.entry(r.tier.as_str().to_string()).or_insert(0) += 1;
        latency_total += r.latency_ms as u128;

        if r.is_fail_safe() {
            summary.fail_safe_count += 1;
        }
        if r.was_escalated() {
            escalated += 1;
        }
        if r.decision_source == DecisionSource::Human
            && ((r.outcome == Outcome::Allow && !r.pinned.is_empty())
                || (r.outcome == Outcome::Deny && r.pinned.is_empty()))
        {
            summary.human_overrides += 1;
        }

        summary.first_timestamp = Some(summary.first_timestamp.map_or(r.timestamp, |t| t.min(r.timestamp)));
        summary.last_timestamp = Some(summary.last_timestamp.map_or(r.timestamp, |t| t.max(r.timestamp)));
    }

    if summary.total > 0 {
        summary.average_latency_ms = latency_total as f64 / summary.total as f64;
        summary.escalation_rate = escalated as f32 / summary.total as f32;
    }
    summary
}

/// Summary straight from an audit directory
pub fn generate_analytics(audit_dir: &Path, filter: &ExportFilter) -> Result<AnalyticsSummary, ExportError> {
    let (records, report) = load_records(audit_dir, filter)?;
    let mut summary = summarize(&records);
    summary.malformed_lines = report.malformed;
    Ok(summary)
}

/// Default export file name for a format
pub fn default_export_name(format: ExportFormat) -> PathBuf {
    let stamp = Utc::now().format("%Y%m%dT%H%M%SZ");
    let ext = match format {
        ExportFormat::Jsonl => "jsonl",
        ExportFormat::Csv => "csv",
        ExportFormat::JsonArray => "json",
    };
    PathBuf::from(format!("agent-guard-export-{}.{}", stamp, ext))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::telemetry::recorder::AuditLog;
    use crate::logic::telemetry::test_support::sample_record;
    use tempfile::TempDir;

    fn populated() -> (TempDir, AuditLog) {
        let dir = TempDir::new().unwrap();
        let log = AuditLog::new(dir.path(), 1024 * 1024);
        log.append(&sample_record("ls -la", "alpha")).unwrap();
        log.append(&sample_record("rm -rf /", "alpha")).unwrap();
        log.append(&sample_record("git status", "beta")).unwrap();
        (dir, log)
    }

    #[test]
    fn test_export_jsonl() {
        let (dir, _log) = populated();
        let dest = dir.path().join("export.jsonl");

        let report = export_audit(dir.path(), &dest, ExportFormat::Jsonl, &ExportFilter::default()).unwrap();
        assert_eq!(report.exported, 3);

        let content = std::fs::read_to_string(&dest).unwrap();
        assert_eq!(content.lines().count(), 3);
    }

    #[test]
    fn test_export_csv() {
        let (dir, _log) = populated();
        let dest = dir.path().join("export.csv");

        export_audit(dir.path(), &dest, ExportFormat::Csv, &ExportFilter::default()).unwrap();

        let content = std::fs::read_to_string(&dest).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 4); // header + 3 records
        assert!(lines[0].starts_with("id,timestamp"));
        assert!(lines[2].contains("\"rm -rf /\""));
    }

    #[test]
    fn test_export_json_array_with_filter() {
        let (dir, _log) = populated();
        let dest = dir.path().join("export.json");
        let filter = ExportFilter {
            session_id: Some("alpha".to_string()),
            ..Default::default()
        };

        export_audit(dir.path(), &dest, ExportFormat::JsonArray, &filter).unwrap();

        let content = std::fs::read_to_string(&dest).unwrap();
        let parsed: Vec<serde_json::Value> = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed.len(), 2);
    }

    #[test]
    fn test_export_does_not_modify_log() {
        let (dir, log) = populated();
        let before = std::fs::read(log.decisions_path()).unwrap();
        export_audit(dir.path(), &dir.path().join("x.jsonl"), ExportFormat::Jsonl, &ExportFilter::default()).unwrap();
        assert_eq!(std::fs::read(log.decisions_path()).unwrap(), before);
    }

    #[test]
    fn test_summary() {
        let (dir, _log) = populated();
        let summary = generate_analytics(dir.path(), &ExportFilter::default()).unwrap();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.by_outcome.values().sum::<u64>(), 3);
        assert!(summary.first_timestamp <= summary.last_timestamp);
    }

    #[test]
    fn test_missing_dir_exports_nothing() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        let (records, report) = load_records(&missing, &ExportFilter::default()).unwrap();
        assert!(records.is_empty());
        assert_eq!(report.files_read, 0);
    }

    #[test]
    fn test_format_parse() {
        assert_eq!("CSV".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        assert_eq!("json".parse::<ExportFormat>().unwrap(), ExportFormat::JsonArray);
        assert!("xml".parse::<ExportFormat>().is_err());
    }

    #[test]
    fn test_csv_field_escaping() {
        assert_eq!(csv_field("say \"hi\"\nnow"), "\"say \"\"hi\"\" now\"");
    }
}
