/*!
 * @file mongodb_cr.rs
 * @brief Legacy MONGODB-CR authentication (getNonce -> authenticate)
 */

use bson::doc;

use crate::config::Credential;
use crate::connection::Connection;
use crate::error::{AuthErrorKind, Error, Result};
use crate::fauxdb_client_debug;

fn mongo_digest(username: &str, password: &str) -> String {
    format!("{:x}", md5::compute(format!("{username}:mongo:{password}")))
}

pub async fn authenticate(connection: &Connection, credential: &Credential) -> Result<()> {
    fauxdb_client_debug!("MONGODB-CR: requesting nonce for user {}", credential.username);

    let nonce_reply = connection
        .run_command(&credential.source, doc! { "getnonce": 1 })
        .await?;
    require_ok(&nonce_reply)?;

    let nonce = nonce_reply
        .get_str("nonce")
        .map_err(|_| Error::Auth(AuthErrorKind::UnexpectedPayload))?
        .to_string();

    let digest = mongo_digest(&credential.username, &credential.password);
    let key = format!("{:x}", md5::compute(format!("{nonce}{}{digest}", credential.username)));

    let auth_reply = connection
        .run_command(
            &credential.source,
            doc! {
                "authenticate": 1,
                "nonce": nonce,
                "user": &credential.username,
                "key": key,
            },
        )
        .await?;
    require_ok(&auth_reply)?;

    Ok(())
}

fn require_ok(reply: &bson::Document) -> Result<()> {
    let ok = reply
        .get_f64("ok")
        .or_else(|_| reply.get_i32("ok").map(|v| v as f64))
        .unwrap_or(0.0);
    if ok == 1.0 {
        Ok(())
    } else {
        Err(Error::Auth(AuthErrorKind::IncorrectCredentials))
    }
}
