//! Async Postgres data-access helper.
//!
//! Two jobs:
//!
//! - **Schema sync**: [`reconcile()`] brings tables in line with declarative
//!   [`TableSchema`] definitions merged with the [`standard_fields`]. It only
//!   ever creates tables and adds columns.
//! - **Generic CRUD**: [`dispatch`] runs a [`Command`] (load, list, update,
//!   insert, del, raw) against a table.
//!
//! [`ConnectionManager`] creates the target database on demand and hands out
//! connections; [`DbHelper`] ties the pieces together.

pub mod libs;

pub use libs::*;
