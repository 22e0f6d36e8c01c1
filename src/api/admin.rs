use log::info;
use mongodb::{
    bson::doc,
    options::{FindOneAndUpdateOptions, FindOptions, ReturnDocument},
};
use rocket::{futures::TryStreamExt, http::Status, serde::json::Json, Route};

use crate::{
    error::{Error, Result},
    model::{
        api::admin::{AdminCredentials, AdminDescription, AdminStatusUpdate},
        audit::AuditLog,
        auth::AuthToken,
        db::admin::Admin,
        mongodb::{Coll, Id},
    },
};

pub fn routes() -> Vec<Route> {
    routes![list_admins, create_admin, set_admin_status, delete_admin]
}

#[get("/admins")]
async fn list_admins(
    _token: AuthToken<Admin>,
    admins: Coll<Admin>,
) -> Result<Json<Vec<AdminDescription>>> {
    let options = FindOptions::builder().sort(doc! { "username": 1 }).build();
    let admins = admins
        .find(None, options)
        .await?
        .map_ok(AdminDescription::from)
        .try_collect()
        .await?;
    Ok(Json(admins))
}

#[post("/admins", data = "<credentials>", format = "json")]
async fn create_admin(
    token: AuthToken<Admin>,
    credentials: Json<AdminCredentials>,
    admins: Coll<Admin>,
    audit: AuditLog,
) -> Result<Json<AdminDescription>> {
    let admin = Admin {
        id: Id::new(),
        admin: credentials.0.into_admin()?,
    };
    admins.insert_one(&admin, None).await.map_err(|err| {
        Error::conflict_on_duplicate(err, || format!("Admin {} already exists", admin.username))
    })?;

    info!("Created admin {} ({})", admin.id, admin.username);
    audit
        .append(
            Some(token.principal()),
            format!("Created admin: {}", admin.username),
            None,
        )
        .await?;
    Ok(Json(admin.into()))
}

/// Enable or disable an admin. Disabled admins cannot log in; a session they
/// already hold lasts until its token expires.
///
/// Nobody can disable themselves, so whoever is managing admins always
/// remains able to log in.
#[put("/admins/<admin_id>/status", data = "<update>", format = "json")]
async fn set_admin_status(
    token: AuthToken<Admin>,
    admin_id: Id,
    update: Json<AdminStatusUpdate>,
    admins: Coll<Admin>,
    audit: AuditLog,
) -> Result<Json<AdminDescription>> {
    if admin_id == token.id() && !update.active {
        return Err(Error::Status(
            Status::Conflict,
            "Admins cannot disable their own account".to_string(),
        ));
    }

    let options = FindOneAndUpdateOptions::builder()
        .return_document(ReturnDocument::After)
        .build();
    let admin = admins
        .find_one_and_update(
            admin_id.as_doc(),
            doc! { "$set": { "active": update.active } },
            options,
        )
        .await?
        .ok_or_else(|| Error::not_found(format!("Admin {admin_id}")))?;

    let action = if admin.active {
        "Enabled admin"
    } else {
        "Disabled admin"
    };
    info!("{action} {admin_id}");
    audit
        .append(
            Some(token.principal()),
            format!("{action}: {}", admin.username),
            None,
        )
        .await?;
    Ok(Json(admin.into()))
}

#[delete("/admins/<admin_id>")]
async fn delete_admin(
    token: AuthToken<Admin>,
    admin_id: Id,
    admins: Coll<Admin>,
    audit: AuditLog,
) -> Result<()> {
    if admin_id == token.id() {
        return Err(Error::Status(
            Status::Conflict,
            "Admins cannot delete their own account".to_string(),
        ));
    }

    let admin = admins
        .find_one_and_delete(admin_id.as_doc(), None)
        .await?
        .ok_or_else(|| Error::not_found(format!("Admin {admin_id}")))?;

    info!("Deleted admin {admin_id}");
    audit
        .append(
            Some(token.principal()),
            format!("Deleted admin: {}", admin.username),
            None,
        )
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use mongodb::bson::doc;
    use rocket::{
        http::{ContentType, Status},
        local::asynchronous::Client,
        serde::json::serde_json,
    };

    use crate::{
        api::auth::{authenticate_admin, rocket_uri_macro_authenticate_admin},
        model::db::log_entry::LogEntry,
    };

    use super::*;

    async fn create(client: &Client, credentials: &AdminCredentials) -> Status {
        client
            .post(uri!(create_admin))
            .header(ContentType::JSON)
            .body(serde_json::to_string(credentials).unwrap())
            .dispatch()
            .await
            .status()
    }

    async fn set_status(client: &Client, admin_id: Id, active: bool) -> Status {
        client
            .put(uri!(set_admin_status(admin_id)))
            .header(ContentType::JSON)
            .body(serde_json::to_string(&AdminStatusUpdate { active }).unwrap())
            .dispatch()
            .await
            .status()
    }

    async fn admin_id(admins: &Coll<Admin>, username: &str) -> Id {
        admins
            .find_one(doc! { "username": username }, None)
            .await
            .unwrap()
            .unwrap()
            .id
    }

    #[backend_test(admin)]
    async fn create_and_list_admins(client: Client, admins: Coll<Admin>, logs: Coll<LogEntry>) {
        assert_eq!(Status::Ok, create(&client, &AdminCredentials::example2()).await);
        // Usernames are unique.
        assert_eq!(Status::Conflict, create(&client, &AdminCredentials::example2()).await);

        let mut weak = AdminCredentials::example2();
        weak.username = "another".into();
        weak.password = "short".into();
        assert_eq!(Status::UnprocessableEntity, create(&client, &weak).await);

        let response = client.get(uri!(list_admins)).dispatch().await;
        assert_eq!(Status::Ok, response.status());
        let listed: Vec<AdminDescription> =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        let names: Vec<_> = listed.iter().map(|a| a.username.as_str()).collect();
        assert_eq!(names, ["deputy-officer", "returning-officer"]);
        assert!(listed.iter().all(|a| a.active));

        let stored = admins
            .find_one(doc! { "username": "deputy-officer" }, None)
            .await
            .unwrap()
            .unwrap();
        assert!(stored.verify_password("countingroom"));

        let entries = logs
            .count_documents(doc! { "action": "Created admin: deputy-officer" }, None)
            .await
            .unwrap();
        assert_eq!(entries, 1);
    }

    #[backend_test(admin)]
    async fn disabled_admins_cannot_log_in(client: Client, admins: Coll<Admin>) {
        assert_eq!(Status::Ok, create(&client, &AdminCredentials::example2()).await);
        let deputy = admin_id(&admins, "deputy-officer").await;
        let me = admin_id(&admins, "returning-officer").await;

        // Nobody can lock themselves out.
        assert_eq!(Status::Conflict, set_status(&client, me, false).await);
        assert_eq!(Status::NotFound, set_status(&client, Id::new(), false).await);

        assert_eq!(Status::Ok, set_status(&client, deputy, false).await);
        let login = |credentials: AdminCredentials| {
            client
                .post(uri!(authenticate_admin))
                .header(ContentType::JSON)
                .body(serde_json::to_string(&credentials).unwrap())
                .dispatch()
        };
        assert_eq!(Status::Forbidden, login(AdminCredentials::example2()).await.status());

        assert_eq!(Status::Ok, set_status(&client, deputy, true).await);
        assert_eq!(Status::Ok, login(AdminCredentials::example2()).await.status());
    }

    #[backend_test(admin)]
    async fn delete_other_admins_only(client: Client, admins: Coll<Admin>) {
        assert_eq!(Status::Ok, create(&client, &AdminCredentials::example2()).await);
        let deputy = admin_id(&admins, "deputy-officer").await;
        let me = admin_id(&admins, "returning-officer").await;

        let response = client.delete(uri!(delete_admin(me))).dispatch().await;
        assert_eq!(Status::Conflict, response.status());

        let response = client.delete(uri!(delete_admin(deputy))).dispatch().await;
        assert_eq!(Status::Ok, response.status());
        assert_eq!(admins.count_documents(None, None).await.unwrap(), 1);

        let response = client.delete(uri!(delete_admin(deputy))).dispatch().await;
        assert_eq!(Status::NotFound, response.status());
    }
}
