use mssql_capture::config::{
    ConfigSource, API_CONFIG, DATABASE_CONFIG, DATABASE_CONNECTOR_TEMPLATE,
};
use mssql_capture::Error;
use std::fs;
use tempfile::TempDir;

fn write(dir: &TempDir, name: &str, content: serde_json::Value) {
    fs::write(dir.path().join(name), content.to_string()).unwrap();
}

#[test]
fn test_working_directory_overrides_home_per_key() {
    let home = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();
    write(
        &home,
        DATABASE_CONFIG,
        serde_json::json!({
            "server": "prod.example.net",
            "database": "Deployment",
            "user": "cdc_admin",
            "password": "home-secret",
            "template_database": "0000000075_System"
        }),
    );
    write(
        &work,
        DATABASE_CONFIG,
        serde_json::json!({"server": "qa.example.net,1444", "password": "work-secret"}),
    );

    let source = ConfigSource::new(Some(home.path().to_path_buf()), work.path());
    let merged = source.load(DATABASE_CONFIG).unwrap();
    assert_eq!(merged.origin().len(), 2);
    assert_eq!(merged.get("server").unwrap(), "qa.example.net,1444");
    assert_eq!(merged.get("user").unwrap(), "cdc_admin");

    let settings = source.database_settings(DATABASE_CONFIG).unwrap();
    assert_eq!(settings.password, "work-secret");
    assert_eq!(settings.template_database.as_deref(), Some("0000000075_System"));
    assert_eq!(settings.address().unwrap(), ("qa.example.net".to_string(), 1444));
}

#[test]
fn test_home_only_and_work_only() {
    let home = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();
    write(&home, API_CONFIG, serde_json::json!({"api_key": "k", "api_secret": "s"}));
    write(&work, "storage.json", serde_json::json!({"container": "ib-sap"}));

    let source = ConfigSource::new(Some(home.path().to_path_buf()), work.path());

    let api = source.api_settings().unwrap();
    assert_eq!(api.base_url, "https://api.fivetran.com/v1");
    assert_eq!(api.timeout_secs, 60);

    let storage = source.storage_settings().unwrap();
    assert_eq!(storage.container, "ib-sap");
    assert!(storage.connection_string.is_none());
}

#[test]
fn test_same_directory_is_read_once() {
    let dir = TempDir::new().unwrap();
    write(&dir, API_CONFIG, serde_json::json!({"api_key": "k", "api_secret": "s"}));

    let source = ConfigSource::new(Some(dir.path().to_path_buf()), dir.path());

    assert_eq!(source.load(API_CONFIG).unwrap().origin().len(), 1);
}

#[test]
fn test_missing_and_malformed_configuration() {
    let work = TempDir::new().unwrap();
    let source = ConfigSource::new(None, work.path());

    assert!(matches!(source.load(DATABASE_CONFIG), Err(Error::Config(_))));

    fs::write(work.path().join(DATABASE_CONFIG), "[1, 2, 3]").unwrap();
    assert!(source.load(DATABASE_CONFIG).is_err());

    fs::write(work.path().join(DATABASE_CONFIG), "{not json").unwrap();
    assert!(matches!(source.load(DATABASE_CONFIG), Err(Error::Settings(_))));
    assert!(matches!(
        source.database_settings(DATABASE_CONFIG),
        Err(Error::Settings(_))
    ));

    write(&work, DATABASE_CONFIG, serde_json::json!({"server": "only-a-server"}));
    assert!(matches!(
        source.database_settings(DATABASE_CONFIG),
        Err(Error::Config(_))
    ));
}

#[test]
fn test_template_config_object_replaced_wholesale() {
    let home = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();
    write(
        &home,
        DATABASE_CONNECTOR_TEMPLATE,
        serde_json::json!({
            "service": "sql_server",
            "group_id": "state_exceptional",
            "config": {"host": "prod.example.net", "port": 1433, "database": "placeholder"}
        }),
    );
    write(
        &work,
        DATABASE_CONNECTOR_TEMPLATE,
        serde_json::json!({"config": {"host": "qa.example.net"}}),
    );

    let source = ConfigSource::new(Some(home.path().to_path_buf()), work.path());
    let template = source.load(DATABASE_CONNECTOR_TEMPLATE).unwrap().to_value();

    assert_eq!(template["service"], "sql_server");
    assert_eq!(template["config"], serde_json::json!({"host": "qa.example.net"}));
}

#[test]
fn test_environment_overrides_database_file() {
    let work = TempDir::new().unwrap();
    write(
        &work,
        DATABASE_CONFIG,
        serde_json::json!({
            "server": "sql.example.net",
            "database": "Deployment",
            "user": "cdc_admin",
            "password": "secret",
            "role_name": "file_role"
        }),
    );
    std::env::set_var("MSSQL_CAPTURE_DB_ROLE_NAME", "cdc_reader");

    let settings = ConfigSource::new(None, work.path())
        .database_settings(DATABASE_CONFIG);
    std::env::remove_var("MSSQL_CAPTURE_DB_ROLE_NAME");

    let settings = settings.unwrap();
    assert_eq!(settings.role_name, "cdc_reader");
    assert_eq!(settings.server, "sql.example.net");
}
