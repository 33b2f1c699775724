//! Exasol connection.
//!
//! A [`Connection`] owns one transport, one authenticated session and one
//! prepared statement cache. Every command runs under the connection's
//! engine lock, so at most one request is ever in flight. A separate,
//! caller-facing lock ([`Connection::lock`]) lets callers group several
//! operations (execute, then commit) without interleaving from other
//! threads.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use exaws_core::{Result, Row};

use crate::channel::Channel;
use crate::config::ExaConfig;
use crate::prepared::{self, StatementCache};
use crate::protocol::messages::{
    CloseResultSetRequest, CommandRequest, FetchRequest, SetAttributesRequest,
};
use crate::protocol::{
    Ack, Attributes, Command, FetchResponseData, SessionMetadata, StatementResult,
    protocol_error,
};
use crate::session::{self, Session};
use crate::statement::{ExecOptions, Executor, rows_affected};
use crate::stream::{self, Fetcher, RowStream};
use crate::tls::TlsSettings;
use crate::transport::{Transport, WebSocketTransport};

/// Exasol connection.
///
/// Safe to share between threads. Commands are serialized internally;
/// use [`Connection::lock`] to make a sequence of commands atomic with
/// respect to other callers that also lock.
pub struct Connection {
    inner: Arc<Inner>,
    coordination: Mutex<()>,
}

struct Inner {
    engine: Mutex<Engine>,
    config: ExaConfig,
    session: Session,
    cancel: CancellationToken,
}

struct Engine {
    channel: Channel,
    statements: StatementCache,
}

impl Inner {
    fn engine(&self) -> MutexGuard<'_, Engine> {
        self.engine.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("session_id", &self.inner.session.id())
            .field("host", &self.inner.config.host)
            .field("port", &self.inner.config.port)
            .field("user", &self.inner.config.user)
            .finish_non_exhaustive()
    }
}

/// Guard returned by [`Connection::lock`]; releases on drop.
#[must_use = "the connection is unlocked as soon as the guard is dropped"]
pub struct ConnectionLock<'a> {
    _guard: MutexGuard<'a, ()>,
}

impl ConnectionLock<'_> {
    /// Release the lock.
    pub fn unlock(self) {}
}

impl std::fmt::Debug for ConnectionLock<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ConnectionLock")
    }
}

impl Connection {
    /// Connect over the default websocket transport.
    #[allow(clippy::result_large_err)]
    pub fn connect(config: ExaConfig) -> Result<Self> {
        Self::connect_with(
            config,
            Box::new(WebSocketTransport::new()),
            CancellationToken::new(),
        )
    }

    /// Connect over `transport`, governed by `cancel`.
    ///
    /// Cancelling the token makes every later command fail with
    /// [`Error::Cancelled`](exaws_core::Error::Cancelled) and ends open
    /// row streams.
    #[allow(clippy::result_large_err)]
    pub fn connect_with(
        config: ExaConfig,
        mut transport: Box<dyn Transport>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let tls = TlsSettings::for_mode(config.tls_mode)
            .map_err(|e| e.context("Unable to connect to Exasol"))?;
        let endpoint = config.endpoint();
        tracing::debug!(endpoint = %endpoint, user = %config.user, "connecting");

        transport
            .connect(&endpoint, tls.as_ref(), config.connect_timeout)
            .map_err(|e| e.context("Unable to connect to Exasol"))?;

        let mut channel = Channel::new(transport, config.suppress_errors, cancel.clone());
        let session = match session::authenticate(&mut channel, &config) {
            Ok(session) => session,
            Err(e) => {
                channel.close();
                return Err(e.context("Unable to login to Exasol"));
            }
        };

        Ok(Self {
            inner: Arc::new(Inner {
                engine: Mutex::new(Engine {
                    channel,
                    statements: StatementCache::new(),
                }),
                config,
                session,
                cancel,
            }),
            coordination: Mutex::new(()),
        })
    }

    /// Server-assigned session identifier.
    pub fn session_id(&self) -> u64 {
        self.inner.session.id()
    }

    /// The authenticated session.
    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    /// Server metadata negotiated at login.
    pub fn metadata(&self) -> &SessionMetadata {
        self.inner.session.metadata()
    }

    pub fn config(&self) -> &ExaConfig {
        &self.inner.config
    }

    /// Token governing this connection's lifetime.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    /// Session attributes as last reported by the server, without a round trip.
    pub fn attributes(&self) -> Attributes {
        self.inner.engine().channel.attributes().clone()
    }

    /// Whether [`disconnect`](Self::disconnect) has run.
    pub fn is_closed(&self) -> bool {
        !self.inner.engine().channel.is_open()
    }

    /// Number of prepared statements currently cached.
    pub fn cached_statements(&self) -> usize {
        self.inner.engine().statements.len()
    }

    /// Acquire the caller-facing lock.
    ///
    /// Commands still work while it is held; the lock only excludes other
    /// callers of `lock`.
    pub fn lock(&self) -> ConnectionLock<'_> {
        ConnectionLock {
            _guard: self
                .coordination
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        }
    }

    /// Fetch the current session attributes from the server.
    #[allow(clippy::result_large_err)]
    pub fn get_session_attributes(&self) -> Result<Attributes> {
        let mut engine = self.inner.engine();
        let _: Ack = engine
            .channel
            .send(&CommandRequest {
                command: Command::GetAttributes,
            })
            .map_err(|e| e.context("Unable to get session attributes"))?;
        Ok(engine.channel.attributes().clone())
    }

    /// Change session attributes. Unset fields are left alone.
    #[allow(clippy::result_large_err)]
    pub fn set_session_attributes(&self, attributes: &Attributes) -> Result<()> {
        self.send_attributes(attributes)
            .map_err(|e| e.context("Unable to set session attributes"))
    }

    #[allow(clippy::result_large_err)]
    pub fn enable_autocommit(&self) -> Result<()> {
        tracing::info!(session_id = self.session_id(), "enabling autocommit");
        self.send_attributes(&Attributes {
            autocommit: Some(true),
            ..Attributes::default()
        })
        .map_err(|e| e.context("Unable to enable autocommit"))
    }

    /// Turn autocommit off; the `false` is sent explicitly.
    #[allow(clippy::result_large_err)]
    pub fn disable_autocommit(&self) -> Result<()> {
        tracing::info!(session_id = self.session_id(), "disabling autocommit");
        self.send_attributes(&Attributes {
            autocommit: Some(false),
            ..Attributes::default()
        })
        .map_err(|e| e.context("Unable to disable autocommit"))
    }

    /// Set the session query timeout in whole seconds; zero disables it.
    #[allow(clippy::result_large_err)]
    pub fn set_query_timeout(&self, timeout: Duration) -> Result<()> {
        self.send_attributes(&Attributes {
            query_timeout: Some(timeout.as_secs()),
            ..Attributes::default()
        })
        .map_err(|e| e.context("Unable to set timeout"))
    }

    #[allow(clippy::result_large_err)]
    pub fn commit(&self) -> Result<()> {
        tracing::info!(session_id = self.session_id(), "committing transaction");
        self.run("COMMIT", &ExecOptions::default())
            .map(|_| ())
            .map_err(|e| e.context("Unable to commit"))
    }

    #[allow(clippy::result_large_err)]
    pub fn rollback(&self) -> Result<()> {
        tracing::info!(session_id = self.session_id(), "rolling back transaction");
        self.run("ROLLBACK", &ExecOptions::default())
            .map(|_| ())
            .map_err(|e| e.context("Unable to rollback"))
    }

    /// Execute a statement and return the number of rows affected.
    ///
    /// With bind values the statement is prepared and executed once for
    /// the whole matrix. Statements that produce a result set report 0.
    #[allow(clippy::result_large_err)]
    pub fn execute(&self, sql: &str, options: ExecOptions) -> Result<i64> {
        self.run(sql, &options)
            .map_err(|e| e.context("Unable to execute"))
    }

    /// Run a query and stream its rows.
    ///
    /// Rows are fetched by a background producer as the stream is consumed.
    #[allow(clippy::result_large_err)]
    pub fn query(&self, sql: &str, options: ExecOptions) -> Result<RowStream> {
        self.start_query(sql, &options)
            .map_err(|e| e.context("Unable to query"))
    }

    /// Run a query and collect every row.
    #[allow(clippy::result_large_err)]
    pub fn query_all(&self, sql: &str, options: ExecOptions) -> Result<Vec<Row>> {
        self.query(sql, options)?.collect()
    }

    /// Close cached statements, end the session and close the transport.
    ///
    /// Failures are logged, not returned. Calling it again does nothing.
    pub fn disconnect(&self) {
        let mut guard = self.inner.engine();
        let engine = &mut *guard;
        if !engine.channel.is_open() {
            return;
        }
        tracing::info!(session_id = self.session_id(), "disconnecting");

        for statement in engine.statements.drain() {
            prepared::close_quietly(&mut engine.channel, statement.handle());
        }
        let res: Result<Ack> = engine.channel.send(&CommandRequest {
            command: Command::Disconnect,
        });
        if let Err(e) = res {
            tracing::warn!(session_id = self.session_id(), error = %e, "unable to disconnect cleanly");
        }
        engine.channel.close();
    }

    #[allow(clippy::result_large_err)]
    fn send_attributes(&self, attributes: &Attributes) -> Result<()> {
        let _: Ack = self.inner.engine().channel.send(&SetAttributesRequest {
            command: Command::SetAttributes,
            attributes,
        })?;
        Ok(())
    }

    #[allow(clippy::result_large_err)]
    fn run(&self, sql: &str, options: &ExecOptions) -> Result<i64> {
        let mut guard = self.inner.engine();
        let engine = &mut *guard;
        let data = Executor::new(
            &mut engine.channel,
            &mut engine.statements,
            self.inner.config.cache_prepared_statements,
        )
        .run(sql, options)?;

        // Nobody will read this result set, release it.
        if let Some(StatementResult::ResultSet {
            result_set: Some(rs),
        }) = data.results.first()
        {
            if let Some(handle) = rs.result_set_handle.filter(|h| *h > 0) {
                if let Err(e) = close_result_set(&mut engine.channel, handle) {
                    tracing::warn!(handle, error = %e, "unable to close result set");
                }
            }
        }

        Ok(rows_affected(&data))
    }

    #[allow(clippy::result_large_err)]
    fn start_query(&self, sql: &str, options: &ExecOptions) -> Result<RowStream> {
        let data = {
            let mut guard = self.inner.engine();
            let engine = &mut *guard;
            Executor::new(
                &mut engine.channel,
                &mut engine.statements,
                self.inner.config.cache_prepared_statements,
            )
            .run(sql, options)?
        };

        if data.num_results != 1 {
            return Err(protocol_error(format!(
                "Unexpected numResults: {}",
                data.num_results
            )));
        }
        let result_set = match data.results.into_iter().next() {
            Some(StatementResult::ResultSet {
                result_set: Some(rs),
            }) => rs,
            Some(StatementResult::ResultSet { result_set: None }) | None => {
                return Err(protocol_error("Missing result set"));
            }
            Some(StatementResult::RowCount { .. }) => {
                return Err(protocol_error("Unexpected result type: rowCount"));
            }
        };

        stream::spawn(
            Arc::clone(&self.inner),
            result_set,
            self.inner.config.effective_fetch_size(),
            self.inner.cancel.child_token(),
        )
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl Fetcher for Arc<Inner> {
    fn fetch(&self, handle: i64, start: u64, num_bytes: usize) -> Result<FetchResponseData> {
        self.engine()
            .channel
            .send(&FetchRequest {
                command: Command::Fetch,
                result_set_handle: handle,
                start_position: start,
                num_bytes,
            })?
            .data()
    }

    fn close_result_set(&self, handle: i64) -> Result<()> {
        close_result_set(&mut self.engine().channel, handle)
    }
}

#[allow(clippy::result_large_err)]
fn close_result_set(channel: &mut Channel, handle: i64) -> Result<()> {
    let _: Ack = channel.send(&CloseResultSetRequest {
        command: Command::CloseResultSet,
        result_set_handles: vec![handle],
    })?;
    Ok(())
}
