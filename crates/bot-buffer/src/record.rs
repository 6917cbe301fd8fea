//! KV-persisted shapes for a media group's buffered state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One buffered message, keyed by `buffer:<gid>:msg:<msgId>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferedMessage {
    pub id: String,
    pub seq: i64,
    pub has_media: bool,
    pub payload: serde_json::Value,
}

/// Group-level bookkeeping, keyed by `buffer:<gid>:meta`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMeta {
    pub gid: String,
    pub target: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub error_count: u32,
}

impl GroupMeta {
    pub fn new(gid: &str, target: &str, user_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            gid: gid.to_string(),
            target: target.to_string(),
            user_id: user_id.to_string(),
            created_at: now,
            updated_at: now,
            error_count: 0,
        }
    }
}

/// Local-timer marker, keyed by `timer:<gid>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerEntry {
    pub gid: String,
    pub expires_at: DateTime<Utc>,
}

/// One group's worth of state persisted at `<instance>:media_group_buffer`
/// so a restart (or another instance after a crash) can rebuild pending
/// groups instead of abandoning them outright.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub gid: String,
    pub target: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BufferSnapshot {
    pub groups: Vec<SnapshotEntry>,
}
