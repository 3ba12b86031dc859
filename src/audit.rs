//! Structured audit events for governance decisions.
//!
//! Every decision produces one JSON line on the `schema_governor::audit` log
//! target, so the default logger setup keeps them and `RUST_LOG` can route
//! them on their own.

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::drift::DriftReport;

pub const AUDIT_TARGET: &str = "schema_governor::audit";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Submit,
    Resolve,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub audit_id: Uuid,
    pub run_id: Uuid,
    pub action: AuditAction,
    pub dataset_id: String,
    pub version: u32,
    /// `accepted`, `rejected`, `pending_approval`, or `unchanged`.
    pub decision: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<String>,
    pub breaking_changes: usize,
    pub non_breaking_changes: usize,
    pub pii_detected: bool,
    pub sensitive_detected: bool,
    pub timestamp: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(
        run_id: Uuid,
        action: AuditAction,
        version: u32,
        decision: &str,
        drift: &DriftReport,
    ) -> Self {
        let breaking_changes = drift.breaking_changes().count();
        Self {
            audit_id: Uuid::new_v4(),
            run_id,
            action,
            dataset_id: drift.dataset_id.clone(),
            version,
            decision: decision.to_string(),
            decided_by: None,
            breaking_changes,
            non_breaking_changes: drift.changes.len() - breaking_changes,
            pii_detected: false,
            sensitive_detected: false,
            timestamp: Utc::now(),
        }
    }

    pub fn decided_by(mut self, who: impl Into<String>) -> Self {
        self.decided_by = Some(who.into());
        self
    }

    pub fn sensitivity(mut self, pii: bool, sensitive: bool) -> Self {
        self.pii_detected = pii;
        self.sensitive_detected = sensitive;
        self
    }

    pub fn emit(&self) {
        match serde_json::to_string(self) {
            Ok(line) => info!(target: AUDIT_TARGET, "{line}"),
            Err(err) => warn!(target: AUDIT_TARGET, "Run {}: audit record not serialisable: {err}", self.run_id),
        }
    }
}
