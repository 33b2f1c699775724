//! Login handshake.
//!
//! ```text
//! -> {"command": "login", "protocolVersion": 1}
//! <- {"status": "ok", "responseData": {"publicKeyModulus": .., "publicKeyExponent": ..}}
//! -> {"username": .., "password": base64(rsa(password)), "clientName": .., "attributes": {..}}
//! <- {"status": "ok", "responseData": {"sessionId": .., ...}}
//! ```

use exaws_core::error::{ConnectionError, ConnectionErrorKind};
use exaws_core::{Error, Result};

use crate::auth::encrypt_password;
use crate::channel::Channel;
use crate::config::ExaConfig;
use crate::protocol::messages::{AuthRequest, LoginRequest, PublicKey};
use crate::protocol::{Attributes, Command, PROTOCOL_VERSION, SessionMetadata, protocol_error};

const CLIENT_RUNTIME: &str = "Rust";

/// An authenticated server session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    id: u64,
    metadata: SessionMetadata,
}

impl Session {
    /// Server-assigned session identifier.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Server metadata negotiated at login.
    pub fn metadata(&self) -> &SessionMetadata {
        &self.metadata
    }
}

/// Run the login handshake on a freshly connected channel.
#[allow(clippy::result_large_err)]
pub(crate) fn authenticate(channel: &mut Channel, config: &ExaConfig) -> Result<Session> {
    let key: PublicKey = channel
        .send(&LoginRequest {
            command: Command::Login,
            protocol_version: PROTOCOL_VERSION,
        })
        .and_then(|res| res.data())
        .map_err(|e| handshake_error(ConnectionErrorKind::Login, "Login request failed", e))?;

    let password = encrypt_password(&config.password, &key).map_err(|message| {
        Error::Connection(ConnectionError {
            kind: ConnectionErrorKind::Login,
            message: format!("Unable to encrypt password: {message}"),
            source: None,
        })
    })?;

    let request = AuthRequest {
        username: &config.user,
        password,
        use_compression: false,
        client_name: &config.client_name,
        driver_name: format!("exaws v{}", env!("CARGO_PKG_VERSION")),
        client_os: std::env::consts::OS,
        client_os_username: os_username(),
        client_version: &config.client_version,
        client_runtime: CLIENT_RUNTIME,
        attributes: Attributes {
            autocommit: Some(true),
            query_timeout: config.query_timeout_secs(),
            ..Attributes::default()
        },
    };

    let metadata: SessionMetadata = channel
        .send(&request)
        .and_then(|res| res.data())
        .and_then(|metadata: SessionMetadata| {
            if metadata.session_id == 0 {
                return Err(protocol_error("Authentication reply carried no sessionId"));
            }
            Ok(metadata)
        })
        .map_err(|e| {
            handshake_error(
                ConnectionErrorKind::Authentication,
                "Authentication failed",
                e,
            )
        })?;

    // Compression is negotiated off until the transport supports it.
    channel.transport_mut()?.enable_compression(false);

    tracing::info!(
        session_id = metadata.session_id,
        database = %metadata.database_name,
        release = %metadata.release_version,
        "session established"
    );

    Ok(Session {
        id: metadata.session_id,
        metadata,
    })
}

fn handshake_error(kind: ConnectionErrorKind, step: &str, err: Error) -> Error {
    Error::Connection(ConnectionError {
        kind,
        message: format!("{step}: {err}"),
        source: Some(Box::new(err)),
    })
}

fn os_username() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::tests::Script;
    use rand::rngs::OsRng;
    use rsa::traits::PublicKeyParts;
    use rsa::{Pkcs1v15Encrypt, RsaPrivateKey};
    use serde_json::json;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;

    fn login_reply(key: &RsaPrivateKey) -> serde_json::Value {
        let public = key.to_public_key();
        json!({
            "status": "ok",
            "responseData": {
                "publicKeyModulus": public.n().to_str_radix(16),
                "publicKeyExponent": public.e().to_str_radix(16)
            }
        })
    }

    fn channel(script: &Script) -> Channel {
        Channel::new(Box::new(script.clone()), true, CancellationToken::new())
    }

    #[test]
    fn successful_handshake() {
        let key = RsaPrivateKey::new(&mut OsRng, 1024).unwrap();
        let script = Script::new(vec![
            login_reply(&key),
            json!({
                "status": "ok",
                "responseData": {
                    "sessionId": 1_234_567_u64,
                    "protocolVersion": 1,
                    "releaseVersion": "7.1.0",
                    "databaseName": "EXA_DB",
                    "productName": "EXASolution",
                    "maxDataMessageSize": 4_194_304,
                    "timeZone": "UTC"
                }
            }),
        ]);
        let config = ExaConfig::new()
            .user("sys")
            .password("exasol")
            .query_timeout(Duration::from_secs(90));

        let session = authenticate(&mut channel(&script), &config).unwrap();
        assert_eq!(session.id(), 1_234_567);
        assert_eq!(session.metadata().database_name, "EXA_DB");

        let sent = script.sent();
        assert_eq!(sent[0], json!({"command": "login", "protocolVersion": 1}));

        let auth = &sent[1];
        assert_eq!(auth["username"], "sys");
        assert_eq!(auth["useCompression"], false);
        assert_eq!(auth["clientName"], "exaws");
        assert_eq!(auth["clientRuntime"], "Rust");
        assert_eq!(auth["attributes"], json!({"autocommit": true, "queryTimeout": 90}));

        let cipher = STANDARD.decode(auth["password"].as_str().unwrap()).unwrap();
        let plain = key.decrypt(Pkcs1v15Encrypt, &cipher).unwrap();
        assert_eq!(plain, b"exasol");
    }

    #[test]
    fn query_timeout_is_omitted_when_unset() {
        let key = RsaPrivateKey::new(&mut OsRng, 1024).unwrap();
        let script = Script::new(vec![
            login_reply(&key),
            json!({"status": "ok", "responseData": {"sessionId": 9}}),
        ]);

        authenticate(&mut channel(&script), &ExaConfig::new()).unwrap();
        assert_eq!(script.sent()[1]["attributes"], json!({"autocommit": true}));
    }

    #[test]
    fn login_failure_is_classified() {
        let script = Script::new(vec![json!({
            "status": "error",
            "exception": {"text": "protocol not supported", "sqlCode": "08004"}
        })]);

        let err = authenticate(&mut channel(&script), &ExaConfig::new()).unwrap_err();
        assert_eq!(err.connection_kind(), Some(ConnectionErrorKind::Login));
        assert!(err.to_string().contains("Login request failed"));
    }

    #[test]
    fn unusable_public_key_fails_before_authentication() {
        let script = Script::new(vec![json!({
            "status": "ok",
            "responseData": {"publicKeyModulus": "FF", "publicKeyExponent": "3"}
        })]);

        let err = authenticate(&mut channel(&script), &ExaConfig::new().password("pw")).unwrap_err();
        assert_eq!(err.connection_kind(), Some(ConnectionErrorKind::Login));
        assert_eq!(script.sent().len(), 1);
    }

    #[test]
    fn authentication_failure_is_classified() {
        let key = RsaPrivateKey::new(&mut OsRng, 1024).unwrap();
        let script = Script::new(vec![
            login_reply(&key),
            json!({
                "status": "error",
                "exception": {"text": "Connection exception - authentication failed.", "sqlCode": "08004"}
            }),
        ]);

        let err = authenticate(&mut channel(&script), &ExaConfig::new()).unwrap_err();
        assert_eq!(
            err.connection_kind(),
            Some(ConnectionErrorKind::Authentication)
        );
    }

    #[test]
    fn missing_session_id_is_an_authentication_failure() {
        let key = RsaPrivateKey::new(&mut OsRng, 1024).unwrap();
        for reply in [
            json!({"status": "ok", "responseData": {}}),
            json!({"status": "ok", "responseData": {"sessionId": 0, "databaseName": "EXA_DB"}}),
        ] {
            let script = Script::new(vec![login_reply(&key), reply]);

            let err = authenticate(&mut channel(&script), &ExaConfig::new()).unwrap_err();
            assert_eq!(
                err.connection_kind(),
                Some(ConnectionErrorKind::Authentication)
            );
            assert!(err.to_string().contains("no sessionId"));
        }
    }
}
