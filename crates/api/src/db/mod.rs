//! SQL query builders (sea-query, SQLite backend).
//!
//! Each function returns `(sql, values)` ready for the server's prepared
//! statement helpers. Raw SQL appears only where sea-query's ON CONFLICT
//! support is limited.

pub mod contexts;
pub mod ledger;
pub mod queue;
pub mod repos;
pub mod states;
pub mod tables;
pub mod templates;
pub mod tokens;
pub mod usage;
pub mod users;

pub type Built = (String, sea_query::Values);
