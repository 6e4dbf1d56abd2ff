/*
 * Copyright (c) 2025 pgElephant. All rights reserved.
 *
 * MongoDB wire-protocol client core
 *
 * @file config.rs
 * @brief Connection configuration and credentials
 */

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthMechanism {
    ScramSha1,
    MongoCr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub username: String,
    pub password: String,
    /// Authentication database, e.g. "admin".
    pub source: String,
    pub mechanism: AuthMechanism,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub application_name: String,
    pub auth: Option<Credential>,
    /// Prefer OP_MSG framing when `true`; fall back to legacy OP_QUERY
    /// against `$cmd` when `false`.
    pub use_op_msg: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 27017,
            connect_timeout_ms: 10_000,
            read_timeout_ms: 30_000,
            application_name: "mongowire".to_string(),
            auth: None,
            use_op_msg: true,
        }
    }
}

impl ConnectionConfig {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            let config = Self::default();
            config.save(path).await?;
            return Ok(config);
        }

        let content = tokio::fs::read_to_string(path).await?;
        toml::from_str(&content).map_err(|e| Error::Protocol(format!("invalid config: {e}")))
    }

    pub async fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Protocol(format!("cannot serialize config: {e}")))?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
