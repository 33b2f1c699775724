//! Request/response correlation over a [`Transport`].
//!
//! The protocol is strictly one request, one reply, so correlation is
//! positional: the next message read answers the message just written.
//! Callers hold the connection's engine lock for the whole exchange.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use exaws_core::error::{ConnectionError, ConnectionErrorKind};
use exaws_core::{Error, Result};

use crate::protocol::{Attributes, Response};
use crate::transport::Transport;

/// One transport plus the bookkeeping every command shares.
pub(crate) struct Channel {
    transport: Option<Box<dyn Transport>>,
    suppress_errors: bool,
    cancel: CancellationToken,
    attributes: Attributes,
}

impl Channel {
    pub(crate) fn new(
        transport: Box<dyn Transport>,
        suppress_errors: bool,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            transport: Some(transport),
            suppress_errors,
            cancel,
            attributes: Attributes::default(),
        }
    }

    pub(crate) fn transport_mut(&mut self) -> Result<&mut (dyn Transport + 'static)> {
        self.transport
            .as_deref_mut()
            .ok_or_else(|| Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Disconnected,
                message: "connection is closed".to_string(),
                source: None,
            }))
    }

    pub(crate) fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    /// Attributes as last reported by the server.
    pub(crate) fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Send `request` and wait for its reply.
    ///
    /// Server error replies come back as [`Error::Query`]; transport
    /// failures as [`Error::Connection`]. Attributes piggybacked on the
    /// reply are folded into the cached attribute set either way.
    #[allow(clippy::result_large_err)]
    pub(crate) fn send<Req, T>(&mut self, request: &Req) -> Result<Response<T>>
    where
        Req: Serialize,
        T: DeserializeOwned,
    {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let message = serde_json::to_value(request)?;
        let command = message
            .get("command")
            .and_then(|c| c.as_str())
            .unwrap_or("auth")
            .to_string();
        tracing::trace!(command = %command, "sending command");

        let transport = self.transport_mut()?;
        transport.write_message(&message)?;
        let reply = transport.read_message()?;

        let response: Response<T> = serde_json::from_value(reply).map_err(|e| {
            crate::protocol::protocol_error(format!("Malformed reply to {command}: {e}"))
        })?;

        if let Some(attrs) = &response.attributes {
            self.attributes.merge(attrs);
        }

        response.into_result().inspect_err(|err| {
            if !self.suppress_errors {
                tracing::error!(command = %command, error = %err, "server returned an error");
            }
        })
    }

    /// Close the transport. Later sends fail with `Disconnected`.
    pub(crate) fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
    }
}
