use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct RunSettlementRequest {
    /// Report what would happen without persisting or moving funds.
    #[serde(default)]
    pub dry_run: bool,
}

/// Filters for the attempt history endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct AttemptsQuery {
    pub status: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}
