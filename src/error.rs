use argon2::Error as Argon2Error;
use jsonwebtoken::errors::{Error as JwtError, ErrorKind as JwtErrorKind};
use log::error;
use mongodb::error::Error as DbError;
use rocket::{
    http::Status,
    response::{self, Responder},
    serde::json::{json, Json},
    Request,
};
use thiserror::Error;

use crate::logging::RequestId;
use crate::model::{
    api::field::FieldError,
    ballot::{BallotError, BallotErrorBody},
    mongodb::is_duplicate_key_error,
};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Jwt(#[from] JwtError),
    #[error(transparent)]
    Argon2(#[from] Argon2Error),
    #[error(transparent)]
    Ballot(#[from] BallotError),
    #[error(transparent)]
    Field(#[from] FieldError),
    #[error("{1}")]
    Status(Status, String),
}

impl Error {
    pub fn not_found(what: String) -> Self {
        Self::Status(Status::NotFound, format!("Not found: {what}"))
    }

    /// Map a duplicate key error to `409 Conflict` with the given message,
    /// passing other errors through.
    pub fn conflict_on_duplicate(err: DbError, message: impl FnOnce() -> String) -> Self {
        if is_duplicate_key_error(&err) {
            Self::Status(Status::Conflict, message())
        } else {
            Self::Db(err)
        }
    }

    pub fn status(&self) -> Status {
        match self {
            Self::Db(_) => Status::InternalServerError,
            Self::Jwt(err) => match err.kind() {
                JwtErrorKind::ExpiredSignature | JwtErrorKind::ImmatureSignature => {
                    Status::Unauthorized
                }
                _ => Status::BadRequest,
            },
            Self::Argon2(_) => Status::BadRequest,
            Self::Ballot(err) => err.status(),
            Self::Field(_) => Status::UnprocessableEntity,
            Self::Status(status, _) => *status,
        }
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'o> {
        let status = self.status();
        if status.class().is_server_error() {
            error!("rsp{} {self}", RequestId::of(req));
        }

        let body = match &self {
            Self::Ballot(err) => json!(BallotErrorBody::from(err)),
            Self::Field(err) => json!({ "field": err.field, "message": err.to_string() }),
            // Don't leak internals.
            Self::Db(_) => json!({ "message": "Internal server error" }),
            other => json!({ "message": other.to_string() }),
        };
        response::status::Custom(status, Json(body)).respond_to(req)
    }
}
