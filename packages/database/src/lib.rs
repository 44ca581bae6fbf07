#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! `PostGIS` connection management for the GIS incident query engine.
//!
//! Uses `switchy_database` for connections. The schema (incidents,
//! overlays, agencies, agency staff) is owned by the platform's migration
//! tooling; this crate only connects to it.

pub mod db;

/// Errors that can occur while connecting to the database.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// Database query error.
    #[error("Database error: {0}")]
    Database(#[from] switchy_database::DatabaseError),

    /// The connection could not be established.
    #[error("Connection error: {message}")]
    Connection {
        /// Description of what went wrong.
        message: String,
    },
}
