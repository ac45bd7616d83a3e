use mssql_capture::DatabaseSettings;
use std::env;

/// Get test connection settings from environment variables
pub fn get_test_settings() -> DatabaseSettings {
    // Use TEST_MSSQL_ prefix for test environment variables
    DatabaseSettings {
        server: env::var("TEST_MSSQL_SERVER").unwrap_or_else(|_| "localhost".to_string()),
        database: env::var("TEST_MSSQL_DATABASE").unwrap_or_else(|_| "cdc_capture_test".to_string()),
        user: env::var("TEST_MSSQL_USER").unwrap_or_else(|_| "sa".to_string()),
        password: env::var("TEST_MSSQL_PASSWORD").unwrap_or_else(|_| "Passw0rd!".to_string()),
        port: env::var("TEST_MSSQL_PORT").ok().and_then(|p| p.parse().ok()),
        encrypt: false,
        trust_server_certificate: true,
        connect_timeout_secs: 10,
        application_name: "mssql-capture-tests".to_string(),
        template_database: None,
        role_name: "role_name".to_string(),
    }
}

/// Table name unique to this test process
pub fn unique_table(prefix: &str) -> String {
    format!("{}_{}", prefix, std::process::id())
}
