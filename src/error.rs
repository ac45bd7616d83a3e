//! Error types and result handling for mssql-capture.
//!
//! This module defines the main error type [`Error`] and a convenience
//! [`Result`] type alias used throughout the crate.
//!
//! # Example
//!
//! ```rust
//! use mssql_capture::{Error, Result};
//!
//! fn connect_to_database() -> Result<()> {
//!     // Simulating a connection error
//!     Err(Error::Connection("Failed to connect".to_string()))
//! }
//!
//! match connect_to_database() {
//!     Ok(()) => println!("Connected"),
//!     Err(Error::Connection(msg)) => eprintln!("Connection error: {}", msg),
//!     Err(e) => eprintln!("Other error: {}", e),
//! }
//! ```

use thiserror::Error;

/// Driver message fragment SQL Server uses when CDC is enabled a second time.
const ALREADY_ENABLED_FRAGMENT: &str = "is already enabled";

/// The main error type for mssql-capture operations.
///
/// Errors raised inside a single reconciliation unit (one database or one
/// table) are caught at that unit's boundary and reported; only errors that
/// prevent a whole run from starting reach the caller of a bulk operation.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error: missing file, missing key, malformed value.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A configuration file could not be read or parsed.
    #[error("Configuration source error: {0}")]
    Settings(#[from] ::config::ConfigError),

    /// SQL Server driver or protocol error.
    #[error("SQL Server error: {0}")]
    SqlServer(#[from] tiberius::error::Error),

    /// A session could not be established.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A statement ran but its result could not be interpreted.
    #[error("Query error: {message}")]
    Query {
        /// Description of what went wrong
        message: String,
    },

    /// JSON serialization error for payloads, reports and config files.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error, typically from config or report files.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Transport-level HTTP failure talking to the connector API.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The connector API answered with a non-success status.
    #[error("Connector API error ({status}): {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Response body, truncated
        message: String,
    },

    /// Object storage listing failure.
    #[error("Object storage error: {0}")]
    Storage(#[from] object_store::Error),

    /// Operation timeout.
    #[error("Timeout error: {message}")]
    Timeout {
        /// Description of what timed out
        message: String,
    },
}

impl Error {
    /// Whether the driver rejected a CDC enable because it is already on.
    ///
    /// SQL Server exposes no structured code for this condition, so the
    /// message text is the only signal.
    pub fn is_already_enabled(&self) -> bool {
        self.to_string().contains(ALREADY_ENABLED_FRAGMENT)
    }

    pub(crate) fn query(message: impl Into<String>) -> Self {
        Error::Query {
            message: message.into(),
        }
    }
}

/// A convenient Result type alias for mssql-capture operations.
///
/// This is equivalent to `std::result::Result<T, mssql_capture::Error>`.
///
/// # Example
///
/// ```rust
/// use mssql_capture::Result;
///
/// fn do_something() -> Result<String> {
///     Ok("Success".to_string())
/// }
/// ```
pub type Result<T> = std::result::Result<T, Error>;
