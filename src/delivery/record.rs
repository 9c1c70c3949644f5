//! Wire payload sent to the remote log API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Value sections of a log record. Updates carry the old/new pairs; creates
/// and deletes carry the full attribute snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_values: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_values: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Map<String, Value>>,
}

/// One audit entry as shipped to the log API. Built once per change event and
/// never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub action_type: String,
    pub entity_type: String,
    pub entity_id: String,
    /// `None` when no actor could be resolved (system/background work).
    pub user_identifier: Option<String>,
    pub user_name: String,
    pub details: LogDetails,
    /// ISO-8601 UTC timestamp taken when the record was assembled.
    pub logged_at: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}
