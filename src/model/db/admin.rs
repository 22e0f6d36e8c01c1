use std::ops::{Deref, DerefMut};

use log::warn;
use mongodb::bson::doc;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{auth::password, mongodb::{Coll, Id}};

/// Username of the admin created when the database has none.
pub const DEFAULT_ADMIN_USERNAME: &str = "admin";

/// Core admin user data.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminCore {
    pub username: String,
    pub password_hash: String,
    /// Disabled admins cannot log in.
    #[serde(default = "enabled")]
    pub active: bool,
}

fn enabled() -> bool {
    true
}

impl AdminCore {
    /// Check whether the given password is correct.
    pub fn verify_password(&self, password: &str) -> bool {
        password::verify(&self.password_hash, password)
    }
}

/// An admin without an ID.
pub type NewAdmin = AdminCore;

/// An admin user from the database, with its unique ID.
#[derive(Debug, Serialize, Deserialize)]
pub struct Admin {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub admin: AdminCore,
}

impl Deref for Admin {
    type Target = AdminCore;

    fn deref(&self) -> &Self::Target {
        &self.admin
    }
}

impl DerefMut for Admin {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.admin
    }
}

/// Ensure that at least one admin exists, creating the default one with the
/// given password if not.
pub async fn ensure_admin_exists(admins: &Coll<NewAdmin>, default_password: &str) -> Result<()> {
    let count = admins.count_documents(doc! {}, None).await?;
    if count == 0 {
        warn!(
            "No admins found; creating default admin '{}'. Change its password!",
            DEFAULT_ADMIN_USERNAME
        );
        let admin = NewAdmin {
            username: DEFAULT_ADMIN_USERNAME.to_string(),
            password_hash: password::hash(default_password)?,
            active: true,
        };
        admins.insert_one(admin, None).await?;
    }
    Ok(())
}
