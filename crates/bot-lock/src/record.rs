//! The JSON shape stored at `lock:<name>`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockRecord {
    pub instance_id: String,
    pub version: String,
    pub expires_at: DateTime<Utc>,
    pub heartbeat_count: u64,
    pub stolen_from: Option<String>,
    pub stolen_at: Option<DateTime<Utc>>,
    pub stolen_reason: Option<String>,
}

impl LockRecord {
    pub fn fresh(instance_id: &str, version: &str, expires_at: DateTime<Utc>) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            version: version.to_string(),
            expires_at,
            heartbeat_count: 0,
            stolen_from: None,
            stolen_at: None,
            stolen_reason: None,
        }
    }

    pub fn stolen(instance_id: &str, version: &str, expires_at: DateTime<Utc>, prior_owner: &str, now: DateTime<Utc>) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            version: version.to_string(),
            expires_at,
            heartbeat_count: 0,
            stolen_from: Some(prior_owner.to_string()),
            stolen_at: Some(now),
            stolen_reason: Some("expired".to_string()),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
