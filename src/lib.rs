/*
 * Copyright (c) 2025 pgElephant. All rights reserved.
 *
 * MongoDB wire-protocol client core
 *
 * @file lib.rs
 * @brief Library entry point: connection, authentication, commands, cursors
 */

pub mod auth;
pub mod commands;
pub mod config;
pub mod connection;
pub mod cursor;
pub mod error;
pub mod logging;
pub mod namespace;
pub mod oid;
pub mod wire;

pub use commands::{
    DeleteOutcome, DeleteStatement, FindOptions, InsertOutcome, UpdateOutcome, UpdateStatement,
};
pub use config::{AuthMechanism, ConnectionConfig, Credential};
pub use connection::{Connection, ServerDescription};
pub use cursor::Cursor;
pub use error::{AuthErrorKind, CommandError, Error, Result, WriteError};
pub use logging::{init_logger, LogLevel};
pub use namespace::{Collection, Database, Namespace};
pub use oid::{ObjectId, ObjectIdGenerator};

/// Opens a TCP connection, runs the `isMaster` handshake, and
/// authenticates if `config.auth` is set.
pub async fn dial(config: &ConnectionConfig) -> Result<std::sync::Arc<Connection>> {
    Connection::dial(config).await
}
