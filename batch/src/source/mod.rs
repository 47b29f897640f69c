//! Database access used by producers, consumers and export workers.
//!
//! Statements are sent as plain text. Every worker takes its own [`Connection`] from the shared
//! [`DataSource`] and gives it back when it stops.

mod base;
pub mod metadata;
mod mysql;

pub use base::*;
pub use mysql::{MySqlDataSource, MySqlPooledConnection};
