//! Core types and traits for sqldao.
//!
//! This crate holds what the engine and the native clients share:
//!
//! - `Value` and `Row` for parameters and fetched data
//! - `DriverError`, the failure vocabulary of a native client
//! - `Error`/`ErrorKind`, the classified errors surfaced to callers
//! - the `Driver` trait a native client implements

pub mod driver;
pub mod error;
pub mod row;
pub mod value;

pub use driver::{Driver, PreparedStatement, ResultSet};
pub use error::{DriverError, DriverResult, Error, ErrorKind, Result};
pub use row::{ColumnInfo, FromValue, Row};
pub use value::Value;
