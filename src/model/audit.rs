use mongodb::{
    bson::{doc, Document},
    error::Result as DbResult,
    options::FindOptions,
    ClientSession, Database,
};
use rocket::{
    futures::TryStreamExt,
    outcome::try_outcome,
    request::{self, FromRequest, Request},
    State,
};

use crate::model::{
    api::log::LogEntryDescription,
    auth::Principal,
    db::log_entry::{LogEntry, LogEntryCore},
    mongodb::{Coll, Id},
    pagination::{Paginated, Pagination},
};

/// The append-only audit trail.
pub struct AuditLog(Coll<LogEntry>);

impl AuditLog {
    pub fn from_db(db: &Database) -> Self {
        Self(Coll::from_db(db))
    }

    /// Append an entry on its own.
    pub async fn append(
        &self,
        actor: Option<Principal>,
        action: impl Into<String>,
        notes: Option<String>,
    ) -> DbResult<LogEntry> {
        let entry = LogEntry::new(LogEntryCore::now(actor, action, notes));
        self.0.insert_one(&entry, None).await?;
        Ok(entry)
    }

    /// Append an entry as part of whatever transaction `session` is in, so
    /// it commits or aborts along with it.
    pub async fn append_with_session(
        &self,
        session: &mut ClientSession,
        actor: Option<Principal>,
        action: impl Into<String>,
        notes: Option<String>,
    ) -> DbResult<LogEntry> {
        let entry = LogEntry::new(LogEntryCore::now(actor, action, notes));
        self.0
            .insert_one_with_session(&entry, None, session)
            .await?;
        Ok(entry)
    }

    /// Most recent entries first, optionally only those by one actor.
    pub async fn list(
        &self,
        actor: Option<Id>,
        pagination: Pagination,
    ) -> DbResult<Paginated<LogEntryDescription>> {
        let filter = actor
            .map(|id| doc! { "actor.id": id })
            .unwrap_or_else(Document::new);

        let total = self.0.count_documents(filter.clone(), None).await?;

        // Past the end.
        if pagination.skip() >= total {
            return Ok(Paginated {
                items: Vec::new(),
                pagination: pagination.result(total as usize),
            });
        }

        let options = FindOptions::builder()
            .sort(doc! { "timestamp": -1, "_id": -1 })
            .skip(pagination.skip())
            .limit(pagination.page_size() as i64)
            .build();
        let items = self
            .0
            .find(filter, options)
            .await?
            .map_ok(LogEntryDescription::from)
            .try_collect()
            .await?;

        Ok(Paginated {
            items,
            pagination: pagination.result(total as usize),
        })
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AuditLog {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let db = try_outcome!(req.guard::<&State<Database>>().await);
        request::Outcome::Success(Self::from_db(db))
    }
}

#[cfg(test)]
mod tests {
    use mongodb::Database;

    use super::*;

    #[backend_test]
    async fn lists_newest_first_with_actor_filter(db: Database) {
        let log = AuditLog::from_db(&db);
        let admin = Principal::admin(Id::new());
        let voter = Principal::voter(Id::new());

        log.append(Some(admin), "Created election", None).await.unwrap();
        log.append(Some(voter), "Logged in", None).await.unwrap();
        log.append(None, "Startup", Some("system".to_string()))
            .await
            .unwrap();
        log.append(Some(admin), "Activated voter", Some(voter.id.to_string()))
            .await
            .unwrap();

        let all = log.list(None, Pagination::default()).await.unwrap();
        assert_eq!(all.pagination.total, 4);
        let actions: Vec<_> = all.items.iter().map(|e| e.action.as_str()).collect();
        assert_eq!(
            actions,
            ["Activated voter", "Startup", "Logged in", "Created election"]
        );

        let by_admin = log.list(Some(admin.id), Pagination::default()).await.unwrap();
        assert_eq!(by_admin.pagination.total, 2);
        assert!(by_admin
            .items
            .iter()
            .all(|e| e.actor.map(|a| *a.id) == Some(admin.id)));
    }

    #[backend_test]
    async fn pages_through_entries(db: Database) {
        let log = AuditLog::from_db(&db);
        for i in 0..5 {
            log.append(None, format!("Action {i}"), None).await.unwrap();
        }

        let page = log.list(None, Pagination::new(2, 2)).await.unwrap();
        assert_eq!(page.pagination.total, 5);
        assert_eq!(page.pagination.page_num, 2);
        let actions: Vec<_> = page.items.iter().map(|e| e.action.as_str()).collect();
        assert_eq!(actions, ["Action 2", "Action 1"]);

        let last = log.list(None, Pagination::new(3, 2)).await.unwrap();
        assert_eq!(last.items.len(), 1);
    }
}
