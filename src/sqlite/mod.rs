// SQLite driver for the execution bridge.
//
// - config: connection options and their builder
// - params: conversion between `RowValues` and SQLite values
// - worker: the thread that owns each `rusqlite::Connection`
// - connection: connection, statement and cursor handles talking to the worker
// - source: connection sources for auto-managed and caller-managed connections

pub mod config;
pub mod connection;
pub mod params;
pub mod source;
mod worker;

pub use config::{SqliteOptions, SqliteOptionsBuilder};
pub use connection::{SqliteConnection, SqliteCursor, SqliteStatement};
pub use source::SqliteSource;
