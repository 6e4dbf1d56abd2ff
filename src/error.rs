/*
 * Copyright (c) 2025 pgElephant. All rights reserved.
 *
 * MongoDB wire-protocol client core
 *
 * @file error.rs
 * @brief Error taxonomy for the connection, authenticator, and cursor
 */

use thiserror::Error;

/// Reasons a SCRAM or MONGODB-CR handshake can fail.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthErrorKind {
    #[error("server rejected credentials")]
    IncorrectCredentials,

    #[error("base64 payload could not be decoded")]
    Base64Failure,

    #[error("server signature did not match the locally computed value")]
    ServerSignatureInvalid,

    #[error("server payload was missing a required field or malformed")]
    UnexpectedPayload,

    #[error("server nonce did not begin with the client nonce")]
    NonceMismatch,
}

/// A server command reply with `ok != 1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandError {
    pub code: i32,
    pub code_name: Option<String>,
    pub message: String,
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "command failed (code {}{}): {}",
            self.code,
            self.code_name
                .as_ref()
                .map(|n| format!(" {n}"))
                .unwrap_or_default(),
            self.message
        )
    }
}

/// A single failed statement inside a batched write (`insert`/`update`/`delete`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteError {
    pub index: i64,
    pub code: i32,
    pub message: String,
}

impl std::fmt::Display for WriteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "write error at index {} (code {}): {}",
            self.index, self.code, self.message
        )
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("authentication failed: {0}")]
    Auth(AuthErrorKind),

    #[error("{0}")]
    Command(CommandError),

    #[error("{0}")]
    Write(WriteError),

    #[error("operation attempted on an exhausted or closed cursor")]
    CursorClosed,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    #[error("BSON decode error: {0}")]
    BsonDe(#[from] bson::de::Error),

    #[error("BSON encode error: {0}")]
    BsonSer(#[from] bson::ser::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
