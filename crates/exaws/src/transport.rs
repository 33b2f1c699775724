//! Message transport.
//!
//! A [`Transport`] moves one JSON message at a time over a full-duplex
//! connection. [`WebSocketTransport`] is the default implementation;
//! tests and traffic interceptors can supply their own through
//! [`Connection::connect_with`](crate::Connection::connect_with).

use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tungstenite::stream::MaybeTlsStream;
use tungstenite::{HandshakeError, Message, WebSocket};

use exaws_core::error::{ConnectionError, ConnectionErrorKind};
use exaws_core::{Error, Result, Value};

use crate::protocol::protocol_error;
use crate::tls::TlsSettings;

/// Full-duplex message channel to the server.
pub trait Transport: Send {
    /// Open the connection. `tls` is `Some` for `wss://` endpoints.
    #[allow(clippy::result_large_err)]
    fn connect(&mut self, endpoint: &str, tls: Option<&TlsSettings>, timeout: Duration)
    -> Result<()>;

    /// Record whether message compression should be used.
    fn enable_compression(&mut self, enabled: bool);

    #[allow(clippy::result_large_err)]
    fn write_message(&mut self, message: &Value) -> Result<()>;

    #[allow(clippy::result_large_err)]
    fn read_message(&mut self) -> Result<Value>;

    /// Close the connection. Safe to call more than once.
    fn close(&mut self);
}

type Socket = WebSocket<MaybeTlsStream<TcpStream>>;

/// Blocking websocket transport built on `tungstenite`.
#[derive(Default)]
pub struct WebSocketTransport {
    socket: Option<Socket>,
    compression: bool,
}

impl std::fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("connected", &self.socket.is_some())
            .field("compression", &self.compression)
            .finish()
    }
}

impl WebSocketTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether compression was requested. Frames are always sent uncompressed.
    pub fn compression_requested(&self) -> bool {
        self.compression
    }

    #[allow(clippy::result_large_err)]
    fn socket(&mut self) -> Result<&mut Socket> {
        self.socket
            .as_mut()
            .ok_or_else(|| disconnected("websocket is not connected", None))
    }
}

impl Transport for WebSocketTransport {
    fn connect(
        &mut self,
        endpoint: &str,
        tls: Option<&TlsSettings>,
        timeout: Duration,
    ) -> Result<()> {
        let authority = endpoint
            .split_once("://")
            .map_or(endpoint, |(_, rest)| rest)
            .trim_end_matches('/');

        let stream = connect_tcp(authority, timeout)?;
        stream.set_nodelay(true)?;

        // Bound the handshake by the connect timeout, then go back to blocking reads.
        let handle = stream.try_clone()?;
        if !timeout.is_zero() {
            handle.set_read_timeout(Some(timeout))?;
            handle.set_write_timeout(Some(timeout))?;
        }

        let socket = handshake(endpoint, stream, tls)?;

        handle.set_read_timeout(None)?;
        handle.set_write_timeout(None)?;

        tracing::debug!(endpoint = %endpoint, tls = tls.is_some(), "websocket connected");
        self.socket = Some(socket);
        Ok(())
    }

    fn enable_compression(&mut self, enabled: bool) {
        self.compression = enabled;
    }

    fn write_message(&mut self, message: &Value) -> Result<()> {
        let text = serde_json::to_string(message)?;
        self.socket()?
            .send(Message::Text(text))
            .map_err(|e| map_ws_error("write", e))
    }

    fn read_message(&mut self) -> Result<Value> {
        let socket = self.socket()?;
        loop {
            let message = socket.read().map_err(|e| map_ws_error("read", e))?;
            match message {
                Message::Text(text) => return Ok(serde_json::from_str(&text)?),
                Message::Binary(bytes) => return Ok(serde_json::from_slice(&bytes)?),
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
                Message::Close(frame) => {
                    let reason = frame.map_or_else(
                        || "server closed the websocket".to_string(),
                        |f| format!("server closed the websocket: {} {}", f.code, f.reason),
                    );
                    return Err(disconnected(reason, None));
                }
            }
        }
    }

    fn close(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            if let Err(e) = socket.close(None).and_then(|()| socket.flush()) {
                tracing::debug!(error = %e, "websocket close was not clean");
            }
        }
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.close();
    }
}

#[allow(clippy::result_large_err)]
fn connect_tcp(authority: &str, timeout: Duration) -> Result<TcpStream> {
    let addrs: Vec<SocketAddr> = authority
        .to_socket_addrs()
        .map_err(|e| {
            Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Connect,
                message: format!("Failed to resolve {authority}: {e}"),
                source: Some(Box::new(e)),
            })
        })?
        .collect();

    let mut last_error = None;
    for addr in addrs {
        let attempt = if timeout.is_zero() {
            TcpStream::connect(addr)
        } else {
            TcpStream::connect_timeout(&addr, timeout)
        };
        match attempt {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = Some(e),
        }
    }

    let err = last_error
        .unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no addresses resolved"));
    let kind = if err.kind() == io::ErrorKind::ConnectionRefused {
        ConnectionErrorKind::Refused
    } else {
        ConnectionErrorKind::Connect
    };
    Err(Error::Connection(ConnectionError {
        kind,
        message: format!("Failed to connect to {authority}: {err}"),
        source: Some(Box::new(err)),
    }))
}

#[allow(clippy::result_large_err)]
fn handshake(endpoint: &str, stream: TcpStream, tls: Option<&TlsSettings>) -> Result<Socket> {
    #[cfg(feature = "tls")]
    if let Some(tls) = tls {
        let connector = tungstenite::Connector::Rustls(tls.client_config());
        return tungstenite::client_tls_with_config(endpoint, stream, None, Some(connector))
            .map(|(socket, _)| socket)
            .map_err(|e| handshake_error(ConnectionErrorKind::Tls, e));
    }

    #[cfg(not(feature = "tls"))]
    if let Some(tls) = tls {
        return Err(Error::Connection(ConnectionError {
            kind: ConnectionErrorKind::Tls,
            message: format!("TLS mode {:?} needs the `tls` feature", tls.mode()),
            source: None,
        }));
    }

    tungstenite::client::client(endpoint, MaybeTlsStream::Plain(stream))
        .map(|(socket, _)| socket)
        .map_err(|e| handshake_error(ConnectionErrorKind::Connect, e))
}

fn handshake_error<R: tungstenite::handshake::HandshakeRole>(
    kind: ConnectionErrorKind,
    err: HandshakeError<R>,
) -> Error {
    match err {
        HandshakeError::Failure(e) => Error::Connection(ConnectionError {
            kind,
            message: format!("Websocket handshake failed: {e}"),
            source: Some(Box::new(e)),
        }),
        HandshakeError::Interrupted(_) => Error::Connection(ConnectionError {
            kind,
            message: "Websocket handshake timed out".to_string(),
            source: None,
        }),
    }
}

fn disconnected(
    message: impl Into<String>,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
) -> Error {
    Error::Connection(ConnectionError {
        kind: ConnectionErrorKind::Disconnected,
        message: message.into(),
        source,
    })
}

fn map_ws_error(op: &str, err: tungstenite::Error) -> Error {
    match err {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            disconnected(format!("Websocket {op} failed: connection closed"), None)
        }
        tungstenite::Error::Io(e) => {
            disconnected(format!("Websocket {op} failed: {e}"), Some(Box::new(e)))
        }
        other => protocol_error(format!("Websocket {op} failed: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn unconnected_transport_reports_disconnected() {
        let mut transport = WebSocketTransport::new();
        let err = transport.read_message().unwrap_err();
        assert_eq!(
            err.connection_kind(),
            Some(ConnectionErrorKind::Disconnected)
        );
        assert!(transport.write_message(&Value::Null).is_err());
        transport.close();
    }

    #[test]
    fn refused_connection_is_classified() {
        // Bind then drop to get a port nobody listens on.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut transport = WebSocketTransport::new();
        let err = transport
            .connect(
                &format!("ws://127.0.0.1:{port}"),
                None,
                Duration::from_secs(2),
            )
            .unwrap_err();
        assert!(err.is_connection_error());
    }

    #[test]
    fn compression_flag_is_recorded() {
        let mut transport = WebSocketTransport::new();
        assert!(!transport.compression_requested());
        transport.enable_compression(true);
        assert!(transport.compression_requested());
    }
}
