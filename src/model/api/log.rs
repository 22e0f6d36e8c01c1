use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{
    auth::{Principal, Rights},
    db::log_entry::LogEntry,
};

use super::id::ApiId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorDescription {
    pub id: ApiId,
    pub rights: Rights,
}

impl From<Principal> for ActorDescription {
    fn from(principal: Principal) -> Self {
        Self {
            id: principal.id.into(),
            rights: principal.rights,
        }
    }
}

/// An audit log entry, as shown to admins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntryDescription {
    pub id: ApiId,
    pub actor: Option<ActorDescription>,
    pub action: String,
    pub notes: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl From<LogEntry> for LogEntryDescription {
    fn from(entry: LogEntry) -> Self {
        Self {
            id: entry.id.into(),
            actor: entry.actor.map(Into::into),
            action: entry.entry.action,
            notes: entry.entry.notes,
            timestamp: entry.entry.timestamp,
        }
    }
}
