use serde::{Deserialize, Serialize};

use crate::{
    error::Result,
    model::{
        auth::password,
        db::admin::{Admin, NewAdmin},
    },
};

use super::{
    field::{self, FieldError},
    id::ApiId,
};

/// Shortest password accepted for a new admin.
pub const MIN_ADMIN_PASSWORD_LENGTH: usize = 8;

/// Raw admin credentials, received from a user. These are never stored
/// directly, since the password is in plaintext.
#[derive(Clone, Deserialize, Serialize)]
pub struct AdminCredentials {
    pub username: String,
    pub password: String,
}

impl AdminCredentials {
    /// Validate the credentials and hash the password for a new admin.
    pub fn into_admin(self) -> Result<NewAdmin> {
        let username = field::name("username", &self.username)?;
        if self.password.chars().count() < MIN_ADMIN_PASSWORD_LENGTH {
            return Err(FieldError::new(
                "password",
                format!("must be at least {MIN_ADMIN_PASSWORD_LENGTH} characters"),
            )
            .into());
        }
        Ok(NewAdmin {
            username,
            password_hash: password::hash(&self.password)?,
            active: true,
        })
    }
}

/// An admin, as shown to other admins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminDescription {
    pub id: ApiId,
    pub username: String,
    pub active: bool,
}

impl From<Admin> for AdminDescription {
    fn from(admin: Admin) -> Self {
        Self {
            id: admin.id.into(),
            active: admin.active,
            username: admin.admin.username,
        }
    }
}

/// Enable or disable an admin account.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AdminStatusUpdate {
    pub active: bool,
}

#[cfg(test)]
mod examples {
    use super::*;

    impl AdminCredentials {
        pub fn example() -> Self {
            Self {
                username: "returning-officer".into(),
                password: "ballotbox2025".into(),
            }
        }

        pub fn example2() -> Self {
            Self {
                username: "deputy-officer".into(),
                password: "countingroom".into(),
            }
        }
    }
}
