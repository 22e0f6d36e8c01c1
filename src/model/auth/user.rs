use std::fmt::Display;

use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::model::{
    db::{admin::Admin, voter::Voter},
    mongodb::Id,
};

/// A kind of user that can hold an [`AuthToken`](super::AuthToken).
pub trait User {
    /// The rights every user of this kind holds.
    const RIGHTS: Rights;

    /// The user's unique ID.
    fn id(&self) -> Id;
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum Rights {
    Voter = 0,
    Admin = 1,
}

impl Display for Rights {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            formatter,
            "{}",
            match self {
                Self::Voter => "voter",
                Self::Admin => "admin",
            }
        )
    }
}

impl User for Voter {
    const RIGHTS: Rights = Rights::Voter;

    fn id(&self) -> Id {
        self.id
    }
}

impl User for Admin {
    const RIGHTS: Rights = Rights::Admin;

    fn id(&self) -> Id {
        self.id
    }
}

/// An explicit caller identity. Every core operation takes one of these
/// rather than looking up an ambient session, and the audit log records it
/// as the actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: Id,
    pub rights: Rights,
}

impl Principal {
    pub fn admin(id: Id) -> Self {
        Self {
            id,
            rights: Rights::Admin,
        }
    }

    pub fn voter(id: Id) -> Self {
        Self {
            id,
            rights: Rights::Voter,
        }
    }

    /// Does this principal hold the given rights?
    pub fn permits(&self, target: Rights) -> bool {
        self.rights == target
    }
}

impl Display for Principal {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{} {}", self.rights, self.id)
    }
}
