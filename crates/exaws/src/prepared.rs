//! Prepared statement cache.
//!
//! Server-side statements are keyed by (schema, SQL text). The cache is
//! owned by one connection and only touched while its engine lock is
//! held, so lookups never race command dispatch.

use std::collections::HashMap;

use exaws_core::{Error, Result};

use crate::channel::Channel;
use crate::protocol::messages::{
    ClosePreparedStatementRequest, CreatePreparedStatementRequest,
    CreatePreparedStatementResponseData,
};
use crate::protocol::{Ack, Attributes, Column, Command, DataType};

/// Cache key: the schema the statement was compiled in and its SQL text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct StatementKey {
    pub(crate) schema: Option<String>,
    pub(crate) sql: String,
}

impl StatementKey {
    pub(crate) fn new(schema: Option<&str>, sql: &str) -> Self {
        Self {
            schema: schema.map(str::to_string),
            sql: sql.to_string(),
        }
    }
}

/// A compiled statement and its parameter columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedStatement {
    handle: i64,
    columns: Vec<Column>,
}

impl PreparedStatement {
    pub(crate) fn new(handle: i64, columns: Vec<Column>) -> Self {
        Self { handle, columns }
    }

    /// Server-assigned statement handle.
    pub fn handle(&self) -> i64 {
        self.handle
    }

    /// Parameter columns as reported by the server.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Parameter columns with `overrides` replacing the reported data types.
    ///
    /// Older servers misreport some parameter types; an override only
    /// replaces the data type at its position and keeps the column name.
    #[allow(clippy::result_large_err)]
    pub fn columns_with_types(&self, overrides: Option<&[DataType]>) -> Result<Vec<Column>> {
        let mut columns = self.columns.clone();
        let Some(overrides) = overrides else {
            return Ok(columns);
        };
        if overrides.len() > columns.len() {
            return Err(Error::Argument(format!(
                "{} column types given but the statement has {} parameters",
                overrides.len(),
                columns.len()
            )));
        }
        for (column, data_type) in columns.iter_mut().zip(overrides) {
            column.data_type = data_type.clone();
        }
        Ok(columns)
    }
}

/// Per-connection map of open prepared statements.
#[derive(Debug, Default)]
pub(crate) struct StatementCache {
    statements: HashMap<StatementKey, PreparedStatement>,
}

impl StatementCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get(&self, key: &StatementKey) -> Option<&PreparedStatement> {
        self.statements.get(key)
    }

    pub(crate) fn insert(&mut self, key: StatementKey, statement: PreparedStatement) {
        if let Some(old) = self.statements.insert(key, statement) {
            tracing::debug!(handle = old.handle, "replaced cached statement");
        }
    }

    pub(crate) fn remove(&mut self, key: &StatementKey) -> Option<PreparedStatement> {
        self.statements.remove(key)
    }

    pub(crate) fn len(&self) -> usize {
        self.statements.len()
    }

    /// Remove and return every cached statement.
    pub(crate) fn drain(&mut self) -> Vec<PreparedStatement> {
        self.statements.drain().map(|(_, stmt)| stmt).collect()
    }
}

/// Compile `key.sql` on the server.
#[allow(clippy::result_large_err)]
pub(crate) fn create(channel: &mut Channel, key: &StatementKey) -> Result<PreparedStatement> {
    let data: CreatePreparedStatementResponseData = channel
        .send(&CreatePreparedStatementRequest {
            command: Command::CreatePreparedStatement,
            sql_text: &key.sql,
            attributes: schema_attributes(key.schema.as_deref()),
        })?
        .data()?;

    let columns = data.parameter_data.map(|p| p.columns).unwrap_or_default();
    tracing::debug!(
        handle = data.statement_handle,
        parameters = columns.len(),
        "prepared statement"
    );
    Ok(PreparedStatement::new(data.statement_handle, columns))
}

/// Release a statement on the server.
#[allow(clippy::result_large_err)]
pub(crate) fn close(channel: &mut Channel, handle: i64) -> Result<()> {
    let _: Ack = channel.send(&ClosePreparedStatementRequest {
        command: Command::ClosePreparedStatement,
        statement_handle: handle,
    })?;
    Ok(())
}

/// Release a statement, logging instead of failing.
pub(crate) fn close_quietly(channel: &mut Channel, handle: i64) {
    if let Err(e) = close(channel, handle) {
        tracing::warn!(handle, error = %e, "unable to close prepared statement");
    }
}

pub(crate) fn schema_attributes(schema: Option<&str>) -> Option<Attributes> {
    schema.map(|s| Attributes {
        current_schema: Some(s.to_string()),
        ..Attributes::default()
    })
}
