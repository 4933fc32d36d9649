//! Domain model structs and DTOs.
//!
//! Each submodule contains the row struct read back from SQLite and the
//! input DTO used for inserts.

pub mod job;
pub mod task;
pub mod user;
