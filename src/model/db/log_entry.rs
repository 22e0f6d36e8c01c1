use std::ops::Deref;

use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::model::{auth::Principal, mongodb::Id};

/// One line of the audit trail. Entries are only ever appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntryCore {
    /// Who did it. Absent for system actions.
    pub actor: Option<Principal>,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub timestamp: DateTime<Utc>,
}

impl LogEntryCore {
    /// An entry stamped with the current time.
    pub fn now(actor: Option<Principal>, action: impl Into<String>, notes: Option<String>) -> Self {
        Self {
            actor,
            action: action.into(),
            notes,
            timestamp: Utc::now(),
        }
    }
}

/// An audit log entry, with its unique ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub entry: LogEntryCore,
}

impl LogEntry {
    pub fn new(entry: LogEntryCore) -> Self {
        Self {
            id: Id::new(),
            entry,
        }
    }
}

impl Deref for LogEntry {
    type Target = LogEntryCore;

    fn deref(&self) -> &Self::Target {
        &self.entry
    }
}
