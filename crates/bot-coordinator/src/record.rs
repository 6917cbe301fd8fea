//! The JSON shape stored at `instance:<id>`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Active,
    Draining,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub id: String,
    pub hostname: String,
    pub status: InstanceStatus,
    pub last_heartbeat: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
}

impl InstanceRecord {
    pub fn new(id: &str, hostname: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: id.to_string(),
            hostname: hostname.to_string(),
            status: InstanceStatus::Active,
            last_heartbeat: now,
            started_at: now,
        }
    }

    pub fn is_active(&self, now: DateTime<Utc>, instance_timeout: chrono::Duration) -> bool {
        now - self.last_heartbeat < instance_timeout
    }
}
