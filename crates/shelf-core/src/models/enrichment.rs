use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};

/// SSE event name sent once the enrichment stream is established.
pub const ENRICHMENT_CONNECTED_EVENT: &str = "connected";

/// SSE event name carrying an [`EnrichmentQueueUpdate`].
pub const ENRICHMENT_UPDATE_EVENT: &str = "enrichment-update";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueItemStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl Display for QueueItemStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            QueueItemStatus::Pending => write!(f, "pending"),
            QueueItemStatus::Processing => write!(f, "processing"),
            QueueItemStatus::Completed => write!(f, "completed"),
            QueueItemStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Value extracted by the backend for one list field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputedValue {
    #[serde(default)]
    pub value_string: Option<String>,
    #[serde(default)]
    pub value_number: Option<f64>,
    #[serde(default)]
    pub value_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub value_boolean: Option<bool>,
}

impl ComputedValue {
    /// Human-readable rendering, preferring boolean, date, number, then string.
    pub fn display_value(&self) -> String {
        if let Some(b) = self.value_boolean {
            return b.to_string();
        }
        if let Some(date) = self.value_date {
            return date.format("%Y-%m-%d %H:%M").to_string();
        }
        if let Some(n) = self.value_number {
            return n.to_string();
        }
        if let Some(s) = self.value_string.as_ref().filter(|s| !s.is_empty()) {
            return s.clone();
        }
        "no value".to_string()
    }
}

/// Status change of one enrichment queue item, pushed by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentQueueUpdate {
    pub queue_item_id: String,
    pub list_id: String,
    pub field_id: String,
    pub file_id: String,
    pub status: QueueItemStatus,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub computed_value: Option<ComputedValue>,
}

impl EnrichmentQueueUpdate {
    pub fn display_value(&self) -> String {
        match &self.computed_value {
            Some(value) => value.display_value(),
            None => "null".to_string(),
        }
    }
}
