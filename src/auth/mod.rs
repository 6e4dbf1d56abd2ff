/*!
 * @file mod.rs
 * @brief Authenticator: dispatches to SCRAM-SHA-1 or MONGODB-CR by configuration
 */

pub mod mongodb_cr;
pub mod scram;

use crate::config::{AuthMechanism, Credential};
use crate::connection::Connection;
use crate::error::Result;

/// Runs once, synchronously with respect to other commands, before the
/// connection is handed to the caller.
pub async fn authenticate(connection: &Connection, credential: &Credential) -> Result<()> {
    match credential.mechanism {
        AuthMechanism::ScramSha1 => scram::authenticate(connection, credential).await,
        AuthMechanism::MongoCr => mongodb_cr::authenticate(connection, credential).await,
    }
}
