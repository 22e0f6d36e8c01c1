//! Principals: who is making a request, and with which rights.

pub mod password;
mod token;
mod user;

pub use token::{AuthToken, AUTH_TOKEN_COOKIE};
pub use user::{Principal, Rights, User};
