//! Core types for the exaws driver.
//!
//! This crate holds the driver-independent foundation:
//!
//! - [`Error`] taxonomy shared by every layer of the driver
//! - [`Row`] and [`ColumnInfo`] for streamed result rows
//! - [`Value`], the JSON cell type used on the wire for bind values and results

pub mod error;
pub mod row;

pub use error::{Error, Result};
pub use row::{ColumnInfo, FromValue, Row};

/// A single cell value as carried by the websocket protocol.
pub type Value = serde_json::Value;
