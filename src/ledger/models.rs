use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, Type};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::sources::SourceContribution;

/// Transfer attempt lifecycle.
///
/// `pending` is written before the external call; `completed` / `failed` /
/// `skipped` are terminal for the settlement run; `corrected` is reached
/// only through the repair workflow, which links a new processor transfer
/// instead of rewriting the failed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "attempt_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AttemptStatus {
    Pending,
    Completed,
    Failed,
    Skipped,
    Corrected,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::Pending => "pending",
            AttemptStatus::Completed => "completed",
            AttemptStatus::Failed => "failed",
            AttemptStatus::Skipped => "skipped",
            AttemptStatus::Corrected => "corrected",
        }
    }
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AttemptStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(AttemptStatus::Pending),
            "completed" => Ok(AttemptStatus::Completed),
            "failed" => Ok(AttemptStatus::Failed),
            "skipped" => Ok(AttemptStatus::Skipped),
            "corrected" => Ok(AttemptStatus::Corrected),
            other => Err(AppError::InvalidInput(format!(
                "unknown attempt status: {}",
                other
            ))),
        }
    }
}

/// One settlement execution, append-only. The row id doubles as the
/// execution id referenced in reports and idempotency keys.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TransferAttempt {
    pub id: Uuid,
    pub requested_amount: Decimal,
    pub executed_amount: Decimal,
    pub currency: String,
    pub status: AttemptStatus,
    pub processor_transfer_id: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub metadata: serde_json::Value,
    pub corrective_transfer_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransferAttempt {
    pub fn parse_metadata(&self) -> AppResult<AttemptMetadata> {
        Ok(serde_json::from_value(self.metadata.clone())?)
    }
}

/// Snapshot stored on each attempt: the ordered contributions selected for
/// settlement plus any sources that failed to read during aggregation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttemptMetadata {
    pub contributions: Vec<SourceContribution>,
    #[serde(default)]
    pub failed_sources: Vec<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl AttemptMetadata {
    pub fn breakdown(&self) -> std::collections::HashMap<String, Decimal> {
        self.contributions
            .iter()
            .map(|c| (c.source.clone(), c.amount))
            .collect()
    }
}

/// Immutable record of one job execution, written after every run and
/// every repair action. Never updated.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub attempt_id: Uuid,
    pub outcome: AttemptStatus,
    pub total_aggregated: Decimal,
    pub total_transferred: Decimal,
    pub total_reconciled: Decimal,
    pub breakdown: serde_json::Value,
    pub anomaly: bool,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Input for a new audit entry; ids and timestamps are assigned on insert.
#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub attempt_id: Uuid,
    pub outcome: AttemptStatus,
    pub total_aggregated: Decimal,
    pub total_transferred: Decimal,
    pub total_reconciled: Decimal,
    pub breakdown: serde_json::Value,
    pub anomaly: bool,
    pub message: Option<String>,
}
