//! Streaming result sets.
//!
//! A background producer turns a result set into rows and pushes them
//! through a bounded queue. When the queue is full the producer blocks,
//! so at most [`QUEUE_CAPACITY`] rows are buffered ahead of the consumer.
//!
//! Small result sets arrive inline with the execute reply. Large ones
//! come with a handle and are paged in with `fetch`:
//!
//! ```text
//! fetch(handle, start = 0)     -> k rows
//! fetch(handle, start = k)     -> m rows
//! ...                             until start == numRows
//! closeResultSet([handle])
//! ```

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, SendTimeoutError, Sender, bounded};
use tokio_util::sync::CancellationToken;

use exaws_core::{ColumnInfo, Error, Result, Row, Value};

use crate::protocol::{FetchResponseData, ResultSetData, protocol_error};
use crate::statement::transpose;

/// Rows buffered between producer and consumer.
pub const QUEUE_CAPACITY: usize = 1000;

/// How often a blocked producer checks for cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Server operations the producer needs.
pub(crate) trait Fetcher: Send + 'static {
    #[allow(clippy::result_large_err)]
    fn fetch(&self, handle: i64, start: u64, num_bytes: usize) -> Result<FetchResponseData>;

    #[allow(clippy::result_large_err)]
    fn close_result_set(&self, handle: i64) -> Result<()>;
}

/// Lazily produced rows of one result set.
///
/// Yields `Ok(row)` in server order. A failure ends the stream with one
/// final `Err` item.
#[derive(Debug)]
pub struct RowStream {
    receiver: Receiver<Result<Row>>,
    columns: Arc<ColumnInfo>,
    total_rows: u64,
    cancel: CancellationToken,
    finished: bool,
}

impl RowStream {
    /// Column names shared by every row.
    pub fn columns(&self) -> &Arc<ColumnInfo> {
        &self.columns
    }

    /// Row count declared by the server.
    pub fn total_rows(&self) -> u64 {
        self.total_rows
    }

    /// Stop the producer. Rows already queued are discarded.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Iterator for RowStream {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        if let Ok(item) = self.receiver.recv() {
            if item.is_err() {
                self.finished = true;
            }
            Some(item)
        } else {
            self.finished = true;
            None
        }
    }
}

impl Drop for RowStream {
    fn drop(&mut self) {
        // Unblocks a producer waiting on a full queue.
        self.cancel.cancel();
    }
}

/// Start streaming `result_set`.
#[allow(clippy::result_large_err)]
pub(crate) fn spawn<F: Fetcher>(
    fetcher: F,
    result_set: ResultSetData,
    fetch_size: usize,
    cancel: CancellationToken,
) -> Result<RowStream> {
    let names = result_set.columns.iter().map(|c| c.name.clone()).collect();
    let columns = Arc::new(ColumnInfo::new(names));
    let total_rows = result_set.num_rows;
    let (sender, receiver) = bounded(QUEUE_CAPACITY);

    let stream = RowStream {
        receiver,
        columns: Arc::clone(&columns),
        total_rows,
        cancel: cancel.clone(),
        finished: false,
    };

    if total_rows == 0 {
        // The sender is dropped here, so the stream is already at its end.
        return Ok(stream);
    }

    let producer = Producer {
        sender,
        columns,
        cancel,
    };
    thread::Builder::new()
        .name("exaws-fetch".to_string())
        .spawn(move || producer.run(&fetcher, result_set, fetch_size))?;

    Ok(stream)
}

enum Flow {
    Continue,
    /// Cancelled or consumer gone
    Stop,
}

struct Producer {
    sender: Sender<Result<Row>>,
    columns: Arc<ColumnInfo>,
    cancel: CancellationToken,
}

impl Producer {
    fn run<F: Fetcher>(&self, fetcher: &F, result_set: ResultSetData, fetch_size: usize) {
        match result_set.result_set_handle.filter(|h| *h > 0) {
            Some(handle) => self.page(fetcher, handle, result_set.num_rows, fetch_size),
            None => {
                let data = result_set.data.unwrap_or_default();
                if let Err(e) = self.check_chunk(&data, result_set.num_rows) {
                    self.deliver(Err(e));
                    return;
                }
                self.emit(data);
            }
        }
    }

    fn page<F: Fetcher>(&self, fetcher: &F, handle: i64, total: u64, fetch_size: usize) {
        let mut position = 0;
        while position < total {
            let chunk = match fetcher.fetch(handle, position, fetch_size) {
                Ok(chunk) => chunk,
                Err(e) => {
                    self.deliver(Err(e.context("Unable to fetch")));
                    return;
                }
            };
            if chunk.num_rows == 0 {
                self.deliver(Err(protocol_error(format!(
                    "fetch returned no rows at position {position} of {total}"
                ))));
                release(fetcher, handle);
                return;
            }
            if let Err(e) = self.check_chunk(&chunk.data, chunk.num_rows) {
                self.deliver(Err(e));
                release(fetcher, handle);
                return;
            }
            tracing::trace!(handle, position, rows = chunk.num_rows, "fetched chunk");
            position += chunk.num_rows;

            if let Flow::Stop = self.emit(chunk.data) {
                tracing::debug!(handle, position, "result stream abandoned");
                release(fetcher, handle);
                return;
            }
        }
        release(fetcher, handle);
    }

    /// A chunk must carry one column per result column, each holding
    /// exactly `rows` values.
    #[allow(clippy::result_large_err)]
    fn check_chunk(&self, data: &[Vec<Value>], rows: u64) -> Result<()> {
        if data.len() != self.columns.len() {
            return Err(protocol_error(format!(
                "result chunk has {} columns, expected {}",
                data.len(),
                self.columns.len()
            )));
        }
        if let Some((i, column)) = data
            .iter()
            .enumerate()
            .find(|(_, c)| c.len() as u64 != rows)
        {
            return Err(protocol_error(format!(
                "result column {i} has {} values, {rows} rows declared",
                column.len()
            )));
        }
        Ok(())
    }

    /// Push the rows of one column-major chunk.
    fn emit(&self, data: Vec<Vec<Value>>) -> Flow {
        for values in transpose(data) {
            let row = Row::with_columns(Arc::clone(&self.columns), values);
            if let Flow::Stop = self.deliver(Ok(row)) {
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    fn deliver(&self, mut item: Result<Row>) -> Flow {
        loop {
            if self.cancel.is_cancelled() {
                // Best effort; a full or closed queue just drops it.
                let _ = self.sender.try_send(Err(Error::Cancelled));
                return Flow::Stop;
            }
            match self.sender.send_timeout(item, POLL_INTERVAL) {
                Ok(()) => return Flow::Continue,
                Err(SendTimeoutError::Timeout(back)) => item = back,
                Err(SendTimeoutError::Disconnected(_)) => return Flow::Stop,
            }
        }
    }
}

fn release<F: Fetcher>(fetcher: &F, handle: i64) {
    match fetcher.close_result_set(handle) {
        Ok(()) => {}
        Err(Error::Cancelled) => {
            tracing::debug!(handle, "result set left open after cancellation");
        }
        Err(e) => tracing::warn!(handle, error = %e, "unable to close result set"),
    }
}
