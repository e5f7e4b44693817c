//! dbexec - blocking convenience layer for running SQL queries and stored
//! procedure calls.
//!
//! An [`Executor`] opens a connection per call, binds positional parameters
//! using its wire type map, executes the statement and turns the produced
//! rows into string keyed [`Record`]s, passing column values through its
//! converter table. Databases are reached through the [`driver`] seam; the
//! built-in [`SqlxDriver`] covers SQLite and PostgreSQL.

pub mod config;
pub mod driver;
pub mod error;
pub mod executor;
pub mod rows;
pub mod sql;
pub mod sql_impl;
mod sql_replace;
mod sql_utils;
pub mod wire;

#[cfg(test)]
mod fake_driver;

// Re-export commonly used types
pub use config::{Config, DbConfig};
pub use error::{Error, Result};
pub use executor::{Executor, UnmappedTypePolicy};
pub use rows::{Converter, ConverterTable, convert_rows};
pub use sql::{DbValue, Parameter, Record, RowSet, ValueKind};
pub use sql_impl::SqlxDriver;
pub use wire::{WireType, WireTypeMap};
