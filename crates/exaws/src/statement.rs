//! Statement execution.
//!
//! Statements without bind values go straight to `execute`. Statements
//! with bind values are prepared (through the cache) and executed with
//! column-major data:
//!
//! ```text
//! rows [[1, "a"], [2, "b"]]  ->  columns [[1, 2], ["a", "b"]]
//! ```

use exaws_core::{Error, Result, Value};

use crate::channel::Channel;
use crate::prepared::{self, PreparedStatement, StatementCache, StatementKey};
use crate::protocol::messages::{ExecutePreparedStatementRequest, ExecuteRequest};
use crate::protocol::{Command, DataType, ExecuteResponseData, StatementResult};

/// Options for [`Connection::execute`](crate::Connection::execute) and
/// [`Connection::query`](crate::Connection::query).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecOptions {
    /// Bind matrix, row-major unless `columnar` is set
    pub binds: Option<Vec<Vec<Value>>>,
    /// Schema to resolve unqualified names against
    pub schema: Option<String>,
    /// Parameter type overrides, by position
    pub column_types: Option<Vec<DataType>>,
    /// `binds` is already column-major
    pub columnar: bool,
}

impl ExecOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the whole bind matrix.
    pub fn binds(mut self, binds: Vec<Vec<Value>>) -> Self {
        self.binds = Some(binds);
        self
    }

    /// Append one row of bind values.
    pub fn bind_row(mut self, row: Vec<Value>) -> Self {
        self.binds.get_or_insert_with(Vec::new).push(row);
        self
    }

    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn column_types(mut self, types: Vec<DataType>) -> Self {
        self.column_types = Some(types);
        self
    }

    pub fn columnar(mut self, columnar: bool) -> Self {
        self.columnar = columnar;
        self
    }

    /// Validate the bind matrix and return it column-major.
    ///
    /// `None` means there is nothing to bind and the statement runs directly.
    #[allow(clippy::result_large_err)]
    pub fn bind_columns(&self) -> Result<Option<Vec<Vec<Value>>>> {
        let Some(binds) = &self.binds else {
            return Ok(None);
        };
        if binds.iter().all(Vec::is_empty) {
            return Ok(None);
        }

        let width = binds[0].len();
        if let Some((i, row)) = binds.iter().enumerate().find(|(_, r)| r.len() != width) {
            let what = if self.columnar { "column" } else { "row" };
            return Err(Error::Argument(format!(
                "bind {what} {i} has {} values, expected {width}",
                row.len()
            )));
        }

        Ok(Some(if self.columnar {
            binds.clone()
        } else {
            transpose(binds.clone())
        }))
    }
}

/// Swap rows and columns of a rectangular matrix.
pub fn transpose<T>(matrix: Vec<Vec<T>>) -> Vec<Vec<T>> {
    let width = matrix.first().map_or(0, Vec::len);
    let mut out: Vec<Vec<T>> = (0..width)
        .map(|_| Vec::with_capacity(matrix.len()))
        .collect();
    for row in matrix {
        for (column, value) in out.iter_mut().zip(row) {
            column.push(value);
        }
    }
    out
}

/// Runs statements on one channel with one statement cache.
pub(crate) struct Executor<'a> {
    channel: &'a mut Channel,
    cache: &'a mut StatementCache,
    caching: bool,
}

impl<'a> Executor<'a> {
    pub(crate) fn new(
        channel: &'a mut Channel,
        cache: &'a mut StatementCache,
        caching: bool,
    ) -> Self {
        Self {
            channel,
            cache,
            caching,
        }
    }

    /// Execute `sql`, directly or through a prepared statement.
    #[allow(clippy::result_large_err)]
    pub(crate) fn run(&mut self, sql: &str, options: &ExecOptions) -> Result<ExecuteResponseData> {
        match options.bind_columns()? {
            None => self.run_direct(sql, options.schema.as_deref()),
            Some(columns) => self.run_prepared(
                sql,
                options.schema.as_deref(),
                &columns,
                options.column_types.as_deref(),
            ),
        }
    }

    #[allow(clippy::result_large_err)]
    fn run_direct(&mut self, sql: &str, schema: Option<&str>) -> Result<ExecuteResponseData> {
        tracing::debug!(sql, "execute");
        self.channel
            .send(&ExecuteRequest {
                command: Command::Execute,
                sql_text: sql,
                attributes: prepared::schema_attributes(schema),
            })
            .and_then(|res| res.data())
            .map_err(|e| with_sql(e, sql))
    }

    #[allow(clippy::result_large_err)]
    fn run_prepared(
        &mut self,
        sql: &str,
        schema: Option<&str>,
        data: &[Vec<Value>],
        column_types: Option<&[DataType]>,
    ) -> Result<ExecuteResponseData> {
        let key = StatementKey::new(schema, sql);
        let statement = self.prepare(&key)?;

        let (handle, result) = match self.run_statement(&statement, data, column_types) {
            Err(e) if e.is_stale_handle() => {
                tracing::warn!(handle = statement.handle(), "statement handle not found");
                self.cache.remove(&key);
                match self.prepare(&key) {
                    Ok(fresh) => {
                        tracing::warn!(handle = fresh.handle(), "retrying with new statement handle");
                        let result = self.run_statement(&fresh, data, column_types);
                        (Some(fresh.handle()), result)
                    }
                    Err(e) => (None, Err(e)),
                }
            }
            other => (Some(statement.handle()), other),
        };

        if !self.caching {
            if let Some(handle) = handle {
                prepared::close_quietly(self.channel, handle);
            }
        }

        result.map_err(|e| with_sql(e, sql))
    }

    /// Look the statement up in the cache or compile it.
    #[allow(clippy::result_large_err)]
    fn prepare(&mut self, key: &StatementKey) -> Result<PreparedStatement> {
        if let Some(statement) = self.cache.get(key) {
            return Ok(statement.clone());
        }
        let statement = prepared::create(self.channel, key)?;
        if self.caching {
            self.cache.insert(key.clone(), statement.clone());
        }
        Ok(statement)
    }

    #[allow(clippy::result_large_err)]
    fn run_statement(
        &mut self,
        statement: &PreparedStatement,
        data: &[Vec<Value>],
        column_types: Option<&[DataType]>,
    ) -> Result<ExecuteResponseData> {
        let columns = statement.columns_with_types(column_types)?;
        if columns.len() != data.len() {
            return Err(Error::Argument(format!(
                "statement has {} parameters but {} bind columns were given",
                columns.len(),
                data.len()
            )));
        }
        let num_rows = data.first().map_or(0, Vec::len);

        tracing::debug!(
            handle = statement.handle(),
            columns = columns.len(),
            rows = num_rows,
            "execute prepared statement"
        );
        self.channel
            .send(&ExecutePreparedStatementRequest {
                command: Command::ExecutePreparedStatement,
                statement_handle: statement.handle(),
                num_columns: columns.len(),
                num_rows,
                columns: &columns,
                data,
            })?
            .data()
    }
}

/// Rows affected according to an execute reply.
///
/// Statements producing a result set count as zero rows affected.
pub(crate) fn rows_affected(data: &ExecuteResponseData) -> i64 {
    if data.num_results == 0 {
        return 0;
    }
    match data.results.first() {
        Some(StatementResult::RowCount { row_count }) => *row_count,
        _ => 0,
    }
}

fn with_sql(err: Error, sql: &str) -> Error {
    match err {
        Error::Query(q) if q.sql.is_none() => Error::Query(q.with_sql(sql)),
        other => other,
    }
}
