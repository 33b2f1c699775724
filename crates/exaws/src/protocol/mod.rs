//! Exasol websocket protocol envelope.
//!
//! Every exchange is one JSON request followed by exactly one JSON reply:
//!
//! ```text
//! -> {"command": "execute", "sqlText": "SELECT 1", ...}
//! <- {"status": "ok", "responseData": {...}, "attributes": {...}}
//! <- {"status": "error", "exception": {"text": "...", "sqlCode": "42000"}}
//! ```
//!
//! There is no pipelining and the server never sends unsolicited
//! messages, so a reply always belongs to the request just written.

pub mod messages;

use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};

use exaws_core::error::{ProtocolError, QueryError};
use exaws_core::{Error, Result};

pub use messages::{
    Attributes, Column, DataType, ExecuteResponseData, FetchResponseData, ResultSetData,
    SessionMetadata, StatementResult,
};

/// Websocket API version announced in the login request.
pub const PROTOCOL_VERSION: u32 = 1;

/// Commands understood by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Command {
    /// Start the login handshake
    Login,
    /// Read session attributes
    GetAttributes,
    /// Change session attributes
    SetAttributes,
    /// Execute SQL text directly
    Execute,
    /// Compile a statement with placeholders
    CreatePreparedStatement,
    /// Execute a compiled statement with column-major data
    ExecutePreparedStatement,
    /// Release a compiled statement
    ClosePreparedStatement,
    /// Read a page of a result set
    Fetch,
    /// Release result set handles
    CloseResultSet,
    /// End the session
    Disconnect,
}

/// Reply status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Error,
}

/// Server exception payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Exception {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub sql_code: Option<String>,
}

/// Reply envelope shared by every command.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", bound(deserialize = "T: Deserialize<'de>"))]
pub struct Response<T> {
    pub status: Status,
    #[serde(default)]
    pub response_data: Option<T>,
    #[serde(default)]
    pub attributes: Option<Attributes>,
    #[serde(default)]
    pub exception: Option<Exception>,
}

/// Reply whose payload is ignored.
pub type Ack = Response<IgnoredAny>;

impl<T> Response<T> {
    /// Turn an error envelope into a [`QueryError`].
    #[allow(clippy::result_large_err)]
    pub fn into_result(self) -> Result<Self> {
        match self.status {
            Status::Ok => Ok(self),
            Status::Error => {
                let exception = self.exception.unwrap_or(Exception {
                    text: "server reported an error without details".to_string(),
                    sql_code: None,
                });
                Err(Error::Query(QueryError::from_server(
                    exception.text,
                    exception.sql_code,
                )))
            }
        }
    }

    /// Take the `responseData` payload, failing if the server left it out.
    #[allow(clippy::result_large_err)]
    pub fn data(self) -> Result<T> {
        self.response_data
            .ok_or_else(|| protocol_error("Missing responseData in reply"))
    }
}

pub(crate) fn protocol_error(msg: impl Into<String>) -> Error {
    Error::Protocol(ProtocolError {
        message: msg.into(),
        source: None,
    })
}
