//! Error types for driver operations.

use std::fmt;

/// Server message that marks a prepared statement handle the server no longer knows.
pub const STALE_HANDLE_MESSAGE: &str = "Statement handle not found";

/// The primary error type for all driver operations.
#[derive(Debug)]
pub enum Error {
    /// Transport and handshake errors (connect, login, read, write, closed)
    Connection(ConnectionError),
    /// The server answered with an explicit error payload
    Query(QueryError),
    /// Type conversion errors when reading row values
    Type(TypeError),
    /// Malformed or unexpected response from the server
    Protocol(ProtocolError),
    /// Configuration errors
    Config(ConfigError),
    /// Caller passed arguments of the wrong shape
    Argument(String),
    /// An inner error annotated with the public operation that failed
    Context(ContextError),
    /// I/O errors
    Io(std::io::Error),
    /// Operation was cancelled through the connection's cancel token
    Cancelled,
    /// Serialization/deserialization errors
    Serde(String),
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to establish the transport
    Connect,
    /// Connection refused by the remote host
    Refused,
    /// TLS negotiation failed
    Tls,
    /// Connection lost or closed during operation
    Disconnected,
    /// The login step of the handshake failed
    Login,
    /// The authentication step of the handshake failed
    Authentication,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub message: String,
    pub sql_code: Option<String>,
    pub sql: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Syntax or access rule violation
    Syntax,
    /// Constraint violation
    Constraint,
    /// Object not found
    NotFound,
    /// Insufficient privileges
    Permission,
    /// Transaction conflict, retry may succeed
    Serialization,
    /// Query timeout reached
    Timeout,
    /// Prepared statement handle no longer valid on the server
    StaleHandle,
    /// Other database error
    Database,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

#[derive(Debug)]
pub struct ProtocolError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
}

#[derive(Debug)]
pub struct ContextError {
    pub context: String,
    pub source: Box<Error>,
}

impl QueryError {
    /// Build a query error from a server exception, classifying it once.
    pub fn from_server(message: impl Into<String>, sql_code: Option<String>) -> Self {
        let message = message.into();
        let kind = classify(&message, sql_code.as_deref());
        Self {
            kind,
            message,
            sql_code,
            sql: None,
        }
    }

    /// Attach the SQL text that produced this error.
    #[must_use]
    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.sql = Some(sql.into());
        self
    }

    /// Is this the server telling us a prepared statement handle is gone?
    pub fn is_stale_handle(&self) -> bool {
        self.kind == QueryErrorKind::StaleHandle
    }
}

fn classify(message: &str, sql_code: Option<&str>) -> QueryErrorKind {
    // The server has no dedicated code for a vanished statement handle.
    if message.contains(STALE_HANDLE_MESSAGE) {
        return QueryErrorKind::StaleHandle;
    }
    match sql_code.unwrap_or_default() {
        "40001" => QueryErrorKind::Serialization,
        "R0001" => QueryErrorKind::Timeout,
        "42500" => QueryErrorKind::Permission,
        code if code.starts_with("23") => QueryErrorKind::Constraint,
        code if code.starts_with("42") => {
            if message.contains("not found") {
                QueryErrorKind::NotFound
            } else {
                QueryErrorKind::Syntax
            }
        }
        _ => QueryErrorKind::Database,
    }
}

impl Error {
    /// Wrap this error with the name of the public operation that failed.
    #[must_use]
    pub fn context(self, context: impl Into<String>) -> Self {
        Error::Context(ContextError {
            context: context.into(),
            source: Box::new(self),
        })
    }

    /// The innermost error, looking through any context wrappers.
    pub fn root(&self) -> &Error {
        match self {
            Error::Context(c) => c.source.root(),
            other => other,
        }
    }

    /// Is this a stale prepared statement handle reported by the server?
    pub fn is_stale_handle(&self) -> bool {
        matches!(self.root(), Error::Query(q) if q.is_stale_handle())
    }

    /// Is this a server error response (as opposed to a transport failure)?
    pub fn is_server_error(&self) -> bool {
        matches!(self.root(), Error::Query(_))
    }

    /// Is this a connection error that leaves the connection unusable?
    pub fn is_connection_error(&self) -> bool {
        matches!(self.root(), Error::Connection(_) | Error::Io(_))
    }

    /// Is this a caller contract violation?
    pub fn is_argument_error(&self) -> bool {
        matches!(self.root(), Error::Argument(_))
    }

    /// Server-supplied SQL code, if the server returned one.
    pub fn sql_code(&self) -> Option<&str> {
        match self.root() {
            Error::Query(q) => q.sql_code.as_deref(),
            _ => None,
        }
    }

    /// The connection error kind, if this is a transport or handshake failure.
    pub fn connection_kind(&self) -> Option<ConnectionErrorKind> {
        match self.root() {
            Error::Connection(c) => Some(c.kind),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Query(e) => write!(f, "Query error: {e}"),
            Error::Type(e) => write!(f, "Type error: {e}"),
            Error::Protocol(e) => write!(f, "Protocol error: {}", e.message),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Argument(msg) => write!(f, "Invalid argument: {msg}"),
            Error::Context(e) => write!(f, "{}: {}", e.context, e.source),
            Error::Io(e) => write!(f, "I/O error: {e}"),
            Error::Cancelled => write!(f, "Operation cancelled"),
            Error::Serde(msg) => write!(f, "Serialization error: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Protocol(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Context(e) => Some(e.source.as_ref()),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(code) = &self.sql_code {
            write!(f, "{} (SQL code {})", self.message, code)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serde(err.to_string())
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Error::Protocol(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

/// Result type alias for driver operations.
pub type Result<T> = std::result::Result<T, Error>;
