pub mod connection;
pub mod types;

#[cfg(test)]
pub mod test_utils;

pub use connection::{quote_identifier, release, ConnectionProvider, SqlServerProvider, SqlSession};
pub use types::*;
