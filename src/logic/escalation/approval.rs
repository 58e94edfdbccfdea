//! Human Approval
//!
//! The `AwaitingHuman` suspension point. An approver shows the reasoning
//! chain and waits for an explicit answer, never longer than the timeout.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::logic::command::CommandEvent;
use crate::logic::risk::RiskTier;

// ============================================================================
// TYPES
// ============================================================================

/// Command waiting for a human
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingApproval {
    pub event_id: Uuid,
    pub raw_command: String,
    pub working_directory: PathBuf,
    pub tier: RiskTier,
    /// Reasoning chain, earliest stage first
    pub reasons: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PendingApproval {
    pub fn new(event: &CommandEvent, tier: RiskTier, reasons: Vec<String>, timeout: Duration) -> Self {
        let created_at = Utc::now();
        let window = chrono::Duration::from_std(timeout).unwrap_or_else(|_| chrono::Duration::seconds(60));
        Self {
            event_id: event.id,
            raw_command: event.raw_command.clone(),
            working_directory: event.working_directory.clone(),
            tier,
            reasons,
            created_at,
            expires_at: created_at + window,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Prompt text shown to the operator
    pub fn render(&self) -> String {
        let mut out = format!(
            "\nagent-guard: {} risk command needs approval\n  command: {}\n  cwd:     {}\n",
            self.tier.as_str().to_uppercase(),
            self.raw_command,
            self.working_directory.display()
        );
        if !self.reasons.is_empty() {
            out.push_str("  why:\n");
            for reason in &self.reasons {
                out.push_str(&format!("    - {}\n", reason));
            }
        }
        let secs = (self.expires_at - self.created_at).num_seconds().max(0);
        out.push_str(&format!("Allow? [y/N] (denied automatically in {}s): ", secs));
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalResponse {
    Allow,
    Deny,
    /// Window elapsed with no answer
    Timeout,
    /// No way to ask (no terminal, closed input)
    Unavailable(String),
}

/// Human approval stage
pub trait Approver: Send + Sync {
    /// Block until an answer arrives or `timeout` elapses
    fn request(&self, pending: &PendingApproval, timeout: Duration) -> ApprovalResponse;
}

/// Only an explicit `y` / `yes` allows
pub fn parse_answer(line: &str) -> ApprovalResponse {
    match line.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => ApprovalResponse::Allow,
        _ => ApprovalResponse::Deny,
    }
}

// ============================================================================
// TERMINAL APPROVER
// ============================================================================

/// What the terminal reader thread forwards
enum ReaderEvent {
    Line(String),
    Closed,
    Failed(String),
}

/// Prompts on the controlling terminal, independent of redirected stdio.
///
/// One reader thread per approver owns the input for its whole life. A
/// prompt that times out leaves the reader in place; lines that arrive
/// between prompts are discarded before the next prompt is shown.
pub struct TerminalApprover {
    input: PathBuf,
    output: PathBuf,
    reader: Mutex<Option<Receiver<ReaderEvent>>>,
}

impl Default for TerminalApprover {
    fn default() -> Self {
        Self::with_devices("/dev/tty", "/dev/tty")
    }
}

impl TerminalApprover {
    pub fn with_devices(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            reader: Mutex::new(None),
        }
    }

    fn spawn_reader(&self) -> Result<Receiver<ReaderEvent>, String> {
        let input = File::open(&self.input).map_err(|e| format!("{}: {}", self.input.display(), e))?;
        let (tx, rx) = mpsc::channel();
        std::thread::Builder::new()
            .name("agent-guard-tty".to_string())
            .spawn(move || {
                let mut reader = BufReader::new(input);
                loop {
                    let mut line = String::new();
                    let event = match reader.read_line(&mut line) {
                        Ok(0) => ReaderEvent::Closed,
                        Ok(_) => ReaderEvent::Line(line),
                        Err(e) => ReaderEvent::Failed(e.to_string()),
                    };
                    let last = !matches!(event, ReaderEvent::Line(_));
                    if tx.send(event).is_err() || last {
                        break;
                    }
                }
            })
            .map_err(|e| e.to_string())?;
        Ok(rx)
    }
}

/// Drop queued lines; false when the reader is gone and must be replaced
fn drain_stale(rx: &Receiver<ReaderEvent>) -> bool {
    loop {
        match rx.try_recv() {
            Ok(ReaderEvent::Line(stale)) => log::debug!("Discarding unprompted input: {:?}", stale.trim()),
            Ok(ReaderEvent::Closed) | Ok(ReaderEvent::Failed(_)) => return false,
            Err(TryRecvError::Empty) => return true,
            Err(TryRecvError::Disconnected) => return false,
        }
    }
}

impl Approver for TerminalApprover {
    fn request(&self, pending: &PendingApproval, timeout: Duration) -> ApprovalResponse {
        if pending.is_expired() {
            return ApprovalResponse::Timeout;
        }
        let mut out = match OpenOptions::new().append(true).open(&self.output) {
            Ok(f) => f,
            Err(e) => return ApprovalResponse::Unavailable(format!("{}: {}", self.output.display(), e)),
        };

        // Held for the whole prompt: one question on the terminal at a time
        let mut reader = self.reader.lock();
        let gone = reader.as_ref().map_or(false, |rx| !drain_stale(rx));
        if gone {
            *reader = None;
        }
        if reader.is_none() {
            match self.spawn_reader() {
                Ok(rx) => *reader = Some(rx),
                Err(e) => return ApprovalResponse::Unavailable(e),
            }
        }
        let rx = match reader.as_ref() {
            Some(rx) => rx,
            None => return ApprovalResponse::Unavailable("no terminal reader".to_string()),
        };

        if let Err(e) = out.write_all(pending.render().as_bytes()).and_then(|_| out.flush()) {
            return ApprovalResponse::Unavailable(e.to_string());
        }

        let response = match rx.recv_timeout(timeout) {
            Ok(ReaderEvent::Line(line)) => return parse_answer(&line),
            Ok(ReaderEvent::Closed) => ApprovalResponse::Unavailable("input closed".to_string()),
            Ok(ReaderEvent::Failed(e)) => ApprovalResponse::Unavailable(e),
            Err(RecvTimeoutError::Timeout) => {
                let _ = writeln!(out, "\nagent-guard: no answer, command denied");
                return ApprovalResponse::Timeout;
            }
            Err(RecvTimeoutError::Disconnected) => ApprovalResponse::Unavailable("reader stopped".to_string()),
        };
        // Reader has exited; the next prompt starts a fresh one
        *reader = None;
        response
    }
}

// ============================================================================
// TESTS
// ============================================================================
