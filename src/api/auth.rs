use log::warn;
use mongodb::bson::doc;
use rocket::{
    http::{Cookie, CookieJar, Status},
    serde::json::Json,
    Route, State,
};

use crate::{
    error::{Error, Result},
    model::{
        api::{admin::AdminCredentials, voter::VoterCredentials},
        audit::AuditLog,
        auth::{AuthToken, Principal, AUTH_TOKEN_COOKIE},
        db::{admin::Admin, voter::Voter},
        eligibility::EligibilityStore,
        mongodb::Coll,
    },
    Config,
};

pub fn routes() -> Vec<Route> {
    routes![authenticate_admin, authenticate_voter, logout]
}

/// Only active admins may log in.
#[post("/auth/admin", data = "<credentials>", format = "json")]
pub async fn authenticate_admin(
    cookies: &CookieJar<'_>,
    credentials: Json<AdminCredentials>,
    admins: Coll<Admin>,
    config: &State<Config>,
) -> Result<()> {
    let with_username = doc! {
        "username": &credentials.username
    };

    let admin = admins
        .find_one(with_username, None)
        .await?
        .filter(|admin| admin.verify_password(&credentials.password))
        .ok_or_else(|| {
            Error::Status(
                Status::Unauthorized,
                "No admin found with the provided username and password combination.".to_string(),
            )
        })?;

    if !admin.active {
        return Err(Error::Status(
            Status::Forbidden,
            "This admin account has been disabled.".to_string(),
        ));
    }

    let token = AuthToken::new(&admin);
    cookies.add(token.into_cookie(config)?);

    Ok(())
}

/// Only voters whose status is activated may log in.
#[post("/auth/voter", data = "<credentials>", format = "json")]
pub async fn authenticate_voter(
    cookies: &CookieJar<'_>,
    credentials: Json<VoterCredentials>,
    store: EligibilityStore,
    audit: AuditLog,
    config: &State<Config>,
) -> Result<()> {
    let unauthorized = || {
        Error::Status(
            Status::Unauthorized,
            "No voter found with the provided student number and password combination."
                .to_string(),
        )
    };

    let voter: Voter = store
        .voter_by_student_number(credentials.student_number.trim())
        .await?
        .filter(|voter| voter.verify_password(&credentials.password))
        .ok_or_else(unauthorized)?;

    let activated = store
        .voter_status(voter.id)
        .await?
        .map(|status| status.activated)
        .unwrap_or(false);
    if !activated {
        return Err(Error::Status(
            Status::Forbidden,
            "Your account has not been activated yet.".to_string(),
        ));
    }

    let token = AuthToken::new(&voter);
    cookies.add(token.into_cookie(config)?);

    if let Err(err) = audit
        .append(Some(Principal::voter(voter.id)), "Logged in", None)
        .await
    {
        warn!("Failed to record login for voter {}: {err}", voter.id);
    }

    Ok(())
}

#[delete("/auth")]
pub fn logout(cookies: &CookieJar) -> Status {
    cookies.remove(Cookie::named(AUTH_TOKEN_COOKIE));
    Status::Ok
}

#[cfg(test)]
mod tests {
    use mongodb::Database;
    use rocket::{http::ContentType, local::asynchronous::Client, serde::json::serde_json::json};

    use crate::model::{
        db::{admin::NewAdmin, log_entry::LogEntry, voter::VoterCore},
        fixtures::Fixture,
    };

    use super::*;

    async fn login_voter(client: &Client, credentials: &VoterCredentials) -> Status {
        client
            .post(uri!(authenticate_voter))
            .header(ContentType::JSON)
            .body(json!(credentials).to_string())
            .dispatch()
            .await
            .status()
    }

    #[backend_test]
    async fn admin_authenticate_valid(client: Client, admins: Coll<NewAdmin>) {
        // Ensure there is an admin to login as
        admins.insert_one(NewAdmin::example(), None).await.unwrap();

        // Use valid credentials to attempt admin login
        let response = client
            .post(uri!(authenticate_admin))
            .header(ContentType::JSON)
            .body(json!(AdminCredentials::example()).to_string())
            .dispatch()
            .await;

        assert_eq!(Status::Ok, response.status());
        assert!(client.cookies().get(AUTH_TOKEN_COOKIE).is_some());
    }

    #[backend_test]
    async fn admin_authenticate_invalid(client: Client, admins: Coll<NewAdmin>) {
        // Ensure there is an admin to fail to login as
        admins.insert_one(NewAdmin::example(), None).await.unwrap();

        // Use invalid password to attempt admin login
        let response = client
            .post(uri!(authenticate_admin))
            .header(ContentType::JSON)
            .body(
                json! ({
                    "username": &NewAdmin::example().username,
                    "password": "",
                })
                .to_string(),
            )
            .dispatch()
            .await;

        assert_eq!(Status::Unauthorized, response.status());
        assert_eq!(None, client.cookies().get(AUTH_TOKEN_COOKIE));
    }

    #[backend_test]
    async fn voter_authenticate(client: Client, db: Database, logs: Coll<LogEntry>) {
        let voter = Fixture::activated_voter(&db).await;

        // Wrong password.
        let mut credentials = VoterCredentials::example();
        credentials.password = "not my password".to_string();
        assert_eq!(login_voter(&client, &credentials).await, Status::Unauthorized);
        assert_eq!(None, client.cookies().get(AUTH_TOKEN_COOKIE));

        // Right password.
        assert_eq!(
            login_voter(&client, &VoterCredentials::example()).await,
            Status::Ok
        );
        assert!(client.cookies().get(AUTH_TOKEN_COOKIE).is_some());

        let entry = logs.find_one(None, None).await.unwrap().unwrap();
        assert_eq!(entry.action, "Logged in");
        assert_eq!(entry.actor, Some(Principal::voter(voter.id)));
    }

    #[backend_test]
    async fn inactive_voter_cannot_log_in(client: Client, db: Database) {
        let mongo = client.rocket().state::<mongodb::Client>().unwrap().clone();
        let store = EligibilityStore::new(mongo, &db);
        let voter = store
            .register_voter(VoterCore::example2(), false)
            .await
            .unwrap();

        let credentials = VoterCredentials {
            student_number: voter.student_number.clone(),
            password: voter.student_number.clone(),
        };
        assert_eq!(login_voter(&client, &credentials).await, Status::Forbidden);
        assert_eq!(None, client.cookies().get(AUTH_TOKEN_COOKIE));
    }

    #[backend_test(admin)]
    async fn logout_admin(client: Client) {
        let response = client.delete(uri!(logout)).dispatch().await;

        assert_eq!(Status::Ok, response.status());
        assert_eq!(None, client.cookies().get(AUTH_TOKEN_COOKIE));
    }

    #[backend_test(voter)]
    async fn logout_voter(client: Client) {
        assert!(client.cookies().get(AUTH_TOKEN_COOKIE).is_some());

        let response = client.delete(uri!(logout)).dispatch().await;

        assert_eq!(Status::Ok, response.status());
        assert_eq!(None, client.cookies().get(AUTH_TOKEN_COOKIE));
    }

    #[backend_test]
    async fn logout_not_logged_in(client: Client) {
        let response = client.delete(uri!(logout)).dispatch().await;

        assert_eq!(Status::Ok, response.status());
    }
}
