//! Exasol websocket driver.
//!
//! This crate speaks the Exasol JSON-over-websocket protocol. It provides:
//!
//! - Login handshake with RSA password encryption
//! - Direct and prepared statement execution with bind matrices
//! - A per-connection prepared statement cache with stale handle recovery
//! - Result sets streamed by a background producer through a bounded queue
//! - Session attributes (autocommit, query timeout, schema)
//! - A pluggable [`Transport`] for test doubles and traffic interception
//!
//! # Protocol Overview
//!
//! Every command is one JSON request answered by exactly one JSON reply
//! over a single websocket. There is no pipelining, so the connection
//! serializes commands internally.
//!
//! # Example
//!
//! ```rust,ignore
//! use exaws::{Connection, ExaConfig, ExecOptions};
//! use serde_json::json;
//!
//! let config = ExaConfig::new()
//!     .host("exa.example.com")
//!     .user("sys")
//!     .password("exasol")
//!     .cache_prepared_statements(true);
//!
//! let conn = Connection::connect(config)?;
//! conn.execute("CREATE TABLE t (x INT)", ExecOptions::new())?;
//! conn.execute(
//!     "INSERT INTO t VALUES (?)",
//!     ExecOptions::new().binds(vec![vec![json!(1)], vec![json!(2)]]),
//! )?;
//! for row in conn.query("SELECT x FROM t", ExecOptions::new())? {
//!     let x: i64 = row?.get_as(0)?;
//! }
//! ```

pub mod auth;
mod channel;
pub mod config;
pub mod connection;
mod prepared;
pub mod protocol;
pub mod session;
pub mod statement;
pub mod stream;
pub mod tls;
pub mod transport;

pub use config::{ExaConfig, TlsMode};
pub use connection::{Connection, ConnectionLock};
pub use prepared::PreparedStatement;
pub use protocol::{Attributes, Column, DataType, SessionMetadata};
pub use session::Session;
pub use statement::{ExecOptions, transpose};
pub use stream::RowStream;
pub use tls::TlsSettings;
pub use transport::{Transport, WebSocketTransport};

pub use exaws_core::error;
pub use exaws_core::{ColumnInfo, Error, FromValue, Result, Row, Value};
