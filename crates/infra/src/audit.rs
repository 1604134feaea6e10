//! Append-only audit trail of state-changing job operations.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

use forgejobs_core::PrincipalId;

/// What was done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    JobCreated,
    ItemStarted,
    ItemCompleted,
    JobCompleted,
    JobCanceled,
    JobRetried,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::JobCreated => "job.created",
            AuditAction::ItemStarted => "job.item.started",
            AuditAction::ItemCompleted => "job.item.completed",
            AuditAction::JobCompleted => "job.completed",
            AuditAction::JobCanceled => "job.canceled",
            AuditAction::JobRetried => "job.retried",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditRecord {
    /// `None` when the background worker acted.
    pub principal: Option<PrincipalId>,
    pub action: AuditAction,
    pub entity_type: &'static str,
    pub entity_id: String,
    pub payload: Option<serde_json::Value>,
    pub error: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(
        principal: Option<PrincipalId>,
        action: AuditAction,
        entity_type: &'static str,
        entity_id: impl Into<String>,
    ) -> Self {
        Self {
            principal,
            action,
            entity_type,
            entity_id: entity_id.into(),
            payload: None,
            error: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Audit writer. Fire-and-forget like the event sink.
pub trait AuditSink: Send + Sync {
    fn record(&self, record: AuditRecord);
}

/// Emits audit records as structured log lines on the `audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, record: AuditRecord) {
        let principal = record
            .principal
            .map(|p| p.to_string())
            .unwrap_or_else(|| "system".to_string());
        tracing::info!(
            target: "audit",
            principal = %principal,
            action = record.action.as_str(),
            entity_type = record.entity_type,
            entity_id = %record.entity_id,
            payload = ?record.payload,
            error = ?record.error,
            "audit"
        );
    }
}

/// In-memory audit log for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryAuditLog {
    records: Mutex<Vec<AuditRecord>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn actions(&self) -> Vec<AuditAction> {
        self.records().into_iter().map(|r| r.action).collect()
    }
}

impl AuditSink for InMemoryAuditLog {
    fn record(&self, record: AuditRecord) {
        if let Ok(mut records) = self.records.lock() {
            records.push(record);
        }
    }
}
