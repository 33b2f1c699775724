//! Typed request and response payloads.
//!
//! Field names follow the server's camelCase JSON. Request structs carry
//! their [`Command`] so a single `serde_json::to_value` produces the full
//! message.

use serde::{Deserialize, Serialize};

use super::Command;
use exaws_core::Value;

// ==================== Handshake ====================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub command: Command,
    pub protocol_version: u32,
}

/// Public key the server hands out for password encryption.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKey {
    #[serde(default)]
    pub public_key_pem: Option<String>,
    /// Hex encoded modulus
    pub public_key_modulus: String,
    /// Hex encoded public exponent
    pub public_key_exponent: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthRequest<'a> {
    pub username: &'a str,
    pub password: String,
    pub use_compression: bool,
    pub client_name: &'a str,
    pub driver_name: String,
    pub client_os: &'a str,
    pub client_os_username: String,
    pub client_version: &'a str,
    pub client_runtime: &'a str,
    pub attributes: Attributes,
}

/// Server metadata negotiated at login.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionMetadata {
    pub session_id: u64,
    pub protocol_version: u32,
    pub release_version: String,
    pub database_name: String,
    pub product_name: String,
    pub max_data_message_size: u64,
    pub max_identifier_length: u32,
    pub max_varchar_length: u32,
    pub identifier_quote_string: String,
    pub time_zone: String,
    pub time_zone_behavior: String,
}

// ==================== Attributes ====================

/// Session attributes.
///
/// Every field is optional: unset fields are left out of outgoing
/// messages while `Some(false)` is sent as an explicit `false`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Attributes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub autocommit: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_schema: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datetime_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_like_escape_character: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback_interval: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub numeric_characters: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_transaction: Option<bool>,
    /// Seconds, 0 disables the limit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_timeout: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_transactions_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp_utc_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone_behavior: Option<String>,
}

impl Attributes {
    /// Overwrite every field that is set in `other`.
    pub fn merge(&mut self, other: &Attributes) {
        macro_rules! take {
            ($($field:ident),* $(,)?) => {
                $(
                    if other.$field.is_some() {
                        self.$field.clone_from(&other.$field);
                    }
                )*
            };
        }
        take!(
            autocommit,
            compression_enabled,
            current_schema,
            date_format,
            date_language,
            datetime_format,
            default_like_escape_character,
            feedback_interval,
            numeric_characters,
            open_transaction,
            query_timeout,
            snapshot_transactions_enabled,
            timestamp_utc_enabled,
            timezone,
            timezone_behavior,
        );
    }

    /// True when no field is set.
    pub fn is_empty(&self) -> bool {
        *self == Attributes::default()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRequest {
    pub command: Command,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetAttributesRequest<'a> {
    pub command: Command,
    pub attributes: &'a Attributes,
}

// ==================== Column metadata ====================

/// Declared SQL type of a column or parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataType {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character_set: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub with_local_time_zone: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fraction: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub srid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_range: Option<u32>,
}

impl DataType {
    /// A bare type name with no modifiers.
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            precision: None,
            scale: None,
            size: None,
            character_set: None,
            with_local_time_zone: None,
            fraction: None,
            srid: None,
            interval_range: None,
        }
    }

    pub fn decimal(precision: u32, scale: u32) -> Self {
        Self {
            precision: Some(precision),
            scale: Some(scale),
            ..Self::new("DECIMAL")
        }
    }

    pub fn double() -> Self {
        Self::new("DOUBLE")
    }

    pub fn boolean() -> Self {
        Self::new("BOOLEAN")
    }

    pub fn varchar(size: u64) -> Self {
        Self {
            size: Some(size),
            character_set: Some("UTF8".to_string()),
            ..Self::new("VARCHAR")
        }
    }
}

/// A named, typed column as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    #[serde(default)]
    pub name: String,
    pub data_type: DataType,
}

// ==================== Execution ====================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest<'a> {
    pub command: Command,
    pub sql_text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Attributes>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecuteResponseData {
    pub num_results: usize,
    pub results: Vec<StatementResult>,
}

/// Outcome of one statement.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "resultType", rename_all = "camelCase")]
pub enum StatementResult {
    #[serde(rename_all = "camelCase")]
    RowCount {
        #[serde(default)]
        row_count: i64,
    },
    #[serde(rename_all = "camelCase")]
    ResultSet {
        #[serde(default)]
        result_set: Option<ResultSetData>,
    },
}

/// Result set header, with the first chunk of rows when they fit.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResultSetData {
    /// Present when rows have to be fetched separately
    pub result_set_handle: Option<i64>,
    pub num_columns: usize,
    pub num_rows: u64,
    pub num_rows_in_message: u64,
    pub columns: Vec<Column>,
    /// Column-major cells
    pub data: Option<Vec<Vec<Value>>>,
}

// ==================== Prepared statements ====================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePreparedStatementRequest<'a> {
    pub command: Command,
    pub sql_text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Attributes>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePreparedStatementResponseData {
    pub statement_handle: i64,
    #[serde(default)]
    pub parameter_data: Option<ParameterData>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParameterData {
    pub num_columns: usize,
    pub columns: Vec<Column>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutePreparedStatementRequest<'a> {
    pub command: Command,
    pub statement_handle: i64,
    pub num_columns: usize,
    pub num_rows: usize,
    pub columns: &'a [Column],
    /// Column-major bind values
    pub data: &'a [Vec<Value>],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosePreparedStatementRequest {
    pub command: Command,
    pub statement_handle: i64,
}

// ==================== Fetching ====================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchRequest {
    pub command: Command,
    pub result_set_handle: i64,
    pub start_position: u64,
    pub num_bytes: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FetchResponseData {
    pub num_rows: u64,
    /// Column-major cells
    pub data: Vec<Vec<Value>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseResultSetRequest {
    pub command: Command,
    pub result_set_handles: Vec<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn explicit_false_survives_serialization() {
        let attrs = Attributes {
            autocommit: Some(false),
            ..Attributes::default()
        };
        assert_eq!(serde_json::to_value(&attrs).unwrap(), json!({"autocommit": false}));
        assert_eq!(serde_json::to_value(Attributes::default()).unwrap(), json!({}));
    }

    #[test]
    fn merge_only_overwrites_set_fields() {
        let mut current = Attributes {
            autocommit: Some(true),
            current_schema: Some("A".to_string()),
            ..Attributes::default()
        };
        current.merge(&Attributes {
            autocommit: Some(false),
            query_timeout: Some(30),
            ..Attributes::default()
        });

        assert_eq!(current.autocommit, Some(false));
        assert_eq!(current.current_schema.as_deref(), Some("A"));
        assert_eq!(current.query_timeout, Some(30));
        assert!(!current.is_empty());
        assert!(Attributes::default().is_empty());
    }

    #[test]
    fn statement_results_by_tag() {
        let data: ExecuteResponseData = serde_json::from_value(json!({
            "numResults": 2,
            "results": [
                {"resultType": "rowCount", "rowCount": 3},
                {"resultType": "resultSet", "resultSet": {
                    "resultSetHandle": 7,
                    "numColumns": 1,
                    "numRows": 5000,
                    "numRowsInMessage": 0,
                    "columns": [{"name": "X", "dataType": {"type": "DECIMAL", "precision": 18, "scale": 0}}]
                }}
            ]
        }))
        .unwrap();

        assert_eq!(data.num_results, 2);
        assert!(matches!(data.results[0], StatementResult::RowCount { row_count: 3 }));
        match &data.results[1] {
            StatementResult::ResultSet { result_set: Some(rs) } => {
                assert_eq!(rs.result_set_handle, Some(7));
                assert_eq!(rs.num_rows, 5000);
                assert_eq!(rs.columns[0].data_type, DataType::decimal(18, 0));
                assert!(rs.data.is_none());
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn execute_prepared_request_shape() {
        let columns = vec![Column {
            name: "C0".to_string(),
            data_type: DataType::varchar(10),
        }];
        let data = vec![vec![json!("a"), json!("b")]];
        let req = ExecutePreparedStatementRequest {
            command: Command::ExecutePreparedStatement,
            statement_handle: 4,
            num_columns: 1,
            num_rows: 2,
            columns: &columns,
            data: &data,
        };

        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({
                "command": "executePreparedStatement",
                "statementHandle": 4,
                "numColumns": 1,
                "numRows": 2,
                "columns": [{"name": "C0", "dataType": {"type": "VARCHAR", "size": 10, "characterSet": "UTF8"}}],
                "data": [["a", "b"]]
            })
        );
    }
}
