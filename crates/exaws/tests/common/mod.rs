//! In-memory Exasol double for driver tests.
//!
//! `FakeServer` answers the login handshake itself (with a real RSA key
//! pair, so the encrypted password can be checked) and hands every other
//! command to a test-supplied handler. Every outgoing message is logged.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::rngs::OsRng;
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use exaws::{Connection, ExaConfig, Result, TlsSettings, Transport};

pub const SESSION_ID: u64 = 4_242_424_242;

type Handler = Box<dyn FnMut(&str, &Value) -> Value + Send>;

fn server_key() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| RsaPrivateKey::new(&mut OsRng, 1024).expect("generate RSA key"))
}

/// Shared view of what the driver sent.
#[derive(Clone, Default)]
pub struct Log(Arc<Mutex<Vec<Value>>>);

impl Log {
    pub fn messages(&self) -> Vec<Value> {
        self.0.lock().unwrap().clone()
    }

    /// Messages after the login handshake.
    pub fn commands(&self) -> Vec<Value> {
        self.messages().into_iter().skip(2).collect()
    }

    pub fn count(&self, command: &str) -> usize {
        self.messages()
            .iter()
            .filter(|m| m["command"] == command)
            .count()
    }

    pub fn last(&self, command: &str) -> Option<Value> {
        self.messages()
            .into_iter()
            .filter(|m| m["command"] == command)
            .last()
    }

    pub fn names(&self) -> Vec<String> {
        self.commands()
            .iter()
            .map(|m| m["command"].as_str().unwrap_or("?").to_string())
            .collect()
    }

    /// The password the driver sent, decrypted with the server key.
    pub fn decrypted_password(&self) -> String {
        let auth = &self.messages()[1];
        let cipher = STANDARD.decode(auth["password"].as_str().unwrap()).unwrap();
        let plain = server_key().decrypt(Pkcs1v15Encrypt, &cipher).unwrap();
        String::from_utf8(plain).unwrap()
    }
}

pub struct FakeServer {
    log: Log,
    pending: VecDeque<Value>,
    handler: Handler,
    pub endpoint: Arc<Mutex<Option<String>>>,
}

impl FakeServer {
    pub fn new(handler: impl FnMut(&str, &Value) -> Value + Send + 'static) -> Self {
        Self {
            log: Log::default(),
            pending: VecDeque::new(),
            handler: Box::new(handler),
            endpoint: Arc::default(),
        }
    }

    pub fn log(&self) -> Log {
        self.log.clone()
    }

    fn respond(&mut self, message: &Value) -> Value {
        match message["command"].as_str() {
            Some("login") => {
                let public = server_key().to_public_key();
                ok(json!({
                    "publicKeyModulus": public.n().to_str_radix(16).to_uppercase(),
                    "publicKeyExponent": public.e().to_str_radix(16),
                    "publicKeyPem": ""
                }))
            }
            None if message.get("username").is_some() => ok(json!({
                "sessionId": SESSION_ID,
                "protocolVersion": 1,
                "releaseVersion": "7.1.0",
                "databaseName": "EXA_TEST",
                "productName": "Exasol DB",
                "maxDataMessageSize": 4_194_304,
                "timeZone": "UTC"
            })),
            Some(command) => (self.handler)(command, message),
            None => error("unknown message", "42000"),
        }
    }
}

impl Transport for FakeServer {
    fn connect(&mut self, endpoint: &str, _tls: Option<&TlsSettings>, _timeout: Duration) -> Result<()> {
        *self.endpoint.lock().unwrap() = Some(endpoint.to_string());
        Ok(())
    }

    fn enable_compression(&mut self, _enabled: bool) {}

    fn write_message(&mut self, message: &Value) -> Result<()> {
        self.log.0.lock().unwrap().push(message.clone());
        let reply = self.respond(message);
        self.pending.push_back(reply);
        Ok(())
    }

    fn read_message(&mut self) -> Result<Value> {
        Ok(self
            .pending
            .pop_front()
            .unwrap_or_else(|| error("no reply queued", "42000")))
    }

    fn close(&mut self) {}
}

pub fn ok(data: Value) -> Value {
    json!({"status": "ok", "responseData": data})
}

pub fn ack() -> Value {
    json!({"status": "ok"})
}

pub fn error(text: &str, sql_code: &str) -> Value {
    json!({"status": "error", "exception": {"text": text, "sqlCode": sql_code}})
}

pub fn row_count(rows: i64) -> Value {
    ok(json!({"numResults": 1, "results": [{"resultType": "rowCount", "rowCount": rows}]}))
}

pub fn no_results() -> Value {
    ok(json!({"numResults": 0, "results": []}))
}

pub fn prepared(handle: i64, num_params: usize) -> Value {
    let columns: Vec<Value> = (0..num_params)
        .map(|i| json!({"name": format!("P{i}"), "dataType": {"type": "DECIMAL", "precision": 18, "scale": 0}}))
        .collect();
    ok(json!({
        "statementHandle": handle,
        "parameterData": {"numColumns": num_params, "columns": columns}
    }))
}

/// Result set header for a single `ID` column.
pub fn result_set(num_rows: u64, handle: Option<i64>, inline: Option<Vec<i64>>) -> Value {
    let mut rs = json!({
        "numColumns": 1,
        "numRows": num_rows,
        "numRowsInMessage": inline.as_ref().map_or(0, Vec::len),
        "columns": [{"name": "ID", "dataType": {"type": "DECIMAL", "precision": 18, "scale": 0}}]
    });
    if let Some(handle) = handle {
        rs["resultSetHandle"] = json!(handle);
    }
    if let Some(values) = inline {
        rs["data"] = json!([values]);
    }
    ok(json!({"numResults": 1, "results": [{"resultType": "resultSet", "resultSet": rs}]}))
}

/// Reply to a `fetch` over rows `0..total`, at most `page` rows at a time.
pub fn fetch_page(message: &Value, total: u64, page: u64) -> Value {
    let start = message["startPosition"].as_u64().unwrap();
    let end = (start + page).min(total);
    let ids: Vec<u64> = (start..end).collect();
    ok(json!({"numRows": end - start, "data": [ids]}))
}

pub fn config() -> ExaConfig {
    ExaConfig::new()
        .host("exa.test")
        .user("sys")
        .password("exasol")
        .suppress_errors(true)
}

pub fn connect(
    config: ExaConfig,
    handler: impl FnMut(&str, &Value) -> Value + Send + 'static,
) -> (Connection, Log) {
    let server = FakeServer::new(handler);
    let log = server.log();
    let conn = Connection::connect_with(config, Box::new(server), CancellationToken::new())
        .expect("connect to fake server");
    (conn, log)
}
