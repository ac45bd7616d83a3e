use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use super::connection::{ConnectionProvider, SqlSession};
use super::types::{Row, Value};
use crate::cdc::statements::{
    BASE_TABLES, CAPTURE_INSTANCE, DATABASE_CDC_STATE, DISABLE_DATABASE, DISABLE_TABLE,
    ENABLE_DATABASE, ENABLE_TABLE, EXCLUDED_SCHEMAS, TABLE_CDC_STATE,
};
use crate::facilities::ACTIVE_FACILITIES_QUERY;
use crate::{Error, Result};

/// In-memory stand-in for a SQL Server estate: per-database CDC flags,
/// tables with their capture instances, and the control database's
/// directory rows. Statements are recognised by the engine's own SQL text.
#[derive(Clone, Default)]
pub struct FakeCatalog {
    state: Arc<Mutex<CatalogState>>,
}

#[derive(Default)]
struct CatalogState {
    databases: BTreeMap<String, FakeDatabase>,
    unreachable: HashSet<String>,
    failing: HashSet<(String, &'static str)>,
    open_sessions: usize,
    total_sessions: usize,
    statements: Vec<ExecutedStatement>,
}

#[derive(Default)]
struct FakeDatabase {
    cdc_enabled: bool,
    tables: Vec<FakeTable>,
    directory_rows: Vec<Row>,
    base_table_rows: Option<Vec<Row>>,
    table_state_rows: Option<Vec<Row>>,
}

struct FakeTable {
    schema: String,
    name: String,
    capture_instances: Vec<String>,
    role: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ExecutedStatement {
    pub database: String,
    pub sql: String,
    pub params: Vec<Value>,
}

impl FakeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CatalogState> {
        self.state.lock().unwrap()
    }

    pub fn with_database(self, name: &str, cdc_enabled: bool) -> Self {
        self.lock()
            .databases
            .entry(name.to_string())
            .or_default()
            .cdc_enabled = cdc_enabled;
        self
    }

    pub fn with_table(self, database: &str, schema: &str, table: &str) -> Self {
        self.lock()
            .databases
            .entry(database.to_string())
            .or_default()
            .tables
            .push(FakeTable {
                schema: schema.to_string(),
                name: table.to_string(),
                capture_instances: Vec::new(),
                role: None,
            });
        self
    }

    pub fn with_tracked_table(self, database: &str, schema: &str, table: &str) -> Self {
        let default_instance = format!("{}_{}", schema, table);
        self.with_capture_instances(database, schema, table, &[default_instance.as_str()])
    }

    /// Adds a table carrying the given capture instances, oldest first.
    pub fn with_capture_instances(
        self,
        database: &str,
        schema: &str,
        table: &str,
        instances: &[&str],
    ) -> Self {
        let catalog = self.with_table(database, schema, table);
        {
            let mut state = catalog.lock();
            if let Some(t) = state
                .databases
                .get_mut(database)
                .and_then(|db| db.tables.last_mut())
            {
                t.capture_instances = instances.iter().map(|i| i.to_string()).collect();
            }
        }
        catalog
    }

    pub fn with_directory_rows(self, database: &str, rows: Vec<Row>) -> Self {
        self.lock()
            .databases
            .entry(database.to_string())
            .or_default()
            .directory_rows = rows;
        self
    }

    /// Raw rows returned for the base-table query, bypassing the
    /// server-side filter.
    pub fn with_base_table_rows(self, database: &str, rows: Vec<Row>) -> Self {
        self.lock()
            .databases
            .entry(database.to_string())
            .or_default()
            .base_table_rows = Some(rows);
        self
    }

    /// Rows returned for table verification regardless of real state.
    pub fn with_table_state_rows(self, database: &str, rows: Vec<Row>) -> Self {
        self.lock()
            .databases
            .entry(database.to_string())
            .or_default()
            .table_state_rows = Some(rows);
        self
    }

    pub fn unreachable(self, database: &str) -> Self {
        self.lock().unreachable.insert(database.to_string());
        self
    }

    /// Makes one statement fail in one database.
    pub fn failing(self, database: &str, statement: &'static str) -> Self {
        self.lock()
            .failing
            .insert((database.to_string(), statement));
        self
    }

    pub fn cdc_enabled(&self, database: &str) -> bool {
        self.lock()
            .databases
            .get(database)
            .map(|db| db.cdc_enabled)
            .unwrap_or(false)
    }

    pub fn capture_instance(&self, database: &str, schema: &str, table: &str) -> Option<String> {
        self.capture_instances(database, schema, table)
            .into_iter()
            .next()
    }

    pub fn capture_instances(&self, database: &str, schema: &str, table: &str) -> Vec<String> {
        self.lock()
            .databases
            .get(database)
            .and_then(|db| {
                db.tables
                    .iter()
                    .find(|t| t.schema == schema && t.name == table)
                    .map(|t| t.capture_instances.clone())
            })
            .unwrap_or_default()
    }

    pub fn role(&self, database: &str, schema: &str, table: &str) -> Option<String> {
        self.lock().databases.get(database).and_then(|db| {
            db.tables
                .iter()
                .find(|t| t.schema == schema && t.name == table)
                .and_then(|t| t.role.clone())
        })
    }

    pub fn open_sessions(&self) -> usize {
        self.lock().open_sessions
    }

    pub fn total_sessions(&self) -> usize {
        self.lock().total_sessions
    }

    pub fn statements(&self) -> Vec<ExecutedStatement> {
        self.lock().statements.clone()
    }

    pub fn count_statements(&self, database: &str, sql: &str) -> usize {
        self.lock()
            .statements
            .iter()
            .filter(|s| s.database == database && s.sql == sql)
            .count()
    }
}

#[async_trait]
impl ConnectionProvider for FakeCatalog {
    async fn connect(&self, database: &str) -> Result<Box<dyn SqlSession>> {
        let mut state = self.lock();
        if state.unreachable.contains(database) || !state.databases.contains_key(database) {
            return Err(Error::Connection(format!(
                "Cannot open database \"{}\" requested by the login",
                database
            )));
        }
        state.open_sessions += 1;
        state.total_sessions += 1;
        drop(state);

        Ok(Box::new(FakeSession {
            catalog: self.clone(),
            database: database.to_string(),
            context: database.to_string(),
        }))
    }
}

struct FakeSession {
    catalog: FakeCatalog,
    database: String,
    context: String,
}

fn param(params: &[Value], idx: usize) -> String {
    params
        .get(idx)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

impl FakeSession {
    fn run(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let mut state = self.catalog.lock();
        state.statements.push(ExecutedStatement {
            database: self.context.clone(),
            sql: sql.to_string(),
            params: params.to_vec(),
        });

        if let Some(target) = sql.strip_prefix("USE [").and_then(|s| s.strip_suffix(']')) {
            let target = target.replace("]]", "]");
            if !state.databases.contains_key(&target) {
                return Err(Error::query(format!("Database '{}' does not exist", target)));
            }
            self.context = target;
            return Ok(Vec::new());
        }

        let failing = state
            .failing
            .iter()
            .any(|(db, stmt)| *db == self.context && *stmt == sql);
        if failing {
            return Err(Error::query(format!("injected failure for: {}", sql)));
        }

        let context = self.context.clone();
        let db = state
            .databases
            .get_mut(&context)
            .ok_or_else(|| Error::query("no database context"))?;

        match sql {
            DATABASE_CDC_STATE => {
                let name = param(params, 0);
                // Only the session's own database is visible in this fake.
                if name == context {
                    Ok(vec![Row::new().with("is_cdc_enabled", db.cdc_enabled)])
                } else {
                    Ok(Vec::new())
                }
            }
            ENABLE_DATABASE => {
                if db.cdc_enabled {
                    return Err(Error::query(format!(
                        "Database '{}' is already enabled for Change Data Capture.",
                        context
                    )));
                }
                db.cdc_enabled = true;
                Ok(Vec::new())
            }
            DISABLE_DATABASE => {
                if !db.cdc_enabled {
                    return Err(Error::query(format!(
                        "Database '{}' is not enabled for Change Data Capture.",
                        context
                    )));
                }
                db.cdc_enabled = false;
                for table in &mut db.tables {
                    table.capture_instances.clear();
                    table.role = None;
                }
                Ok(Vec::new())
            }
            ENABLE_TABLE => {
                let (schema, name, role) = (param(params, 0), param(params, 1), param(params, 2));
                if !db.cdc_enabled {
                    return Err(Error::query(format!(
                        "Database '{}' is not enabled for Change Data Capture.",
                        context
                    )));
                }
                let table = db
                    .tables
                    .iter_mut()
                    .find(|t| t.schema == schema && t.name == name)
                    .ok_or_else(|| Error::query(format!("Object '{}.{}' does not exist", schema, name)))?;
                let instance = format!("{}_{}", schema, name);
                if table.capture_instances.contains(&instance) {
                    return Err(Error::query(format!(
                        "Capture instance '{}' already exists.",
                        instance
                    )));
                }
                if table.capture_instances.len() >= 2 {
                    return Err(Error::query(format!(
                        "Source table '{}.{}' already has two capture instances.",
                        schema, name
                    )));
                }
                table.capture_instances.push(instance);
                table.role = Some(role);
                Ok(Vec::new())
            }
            DISABLE_TABLE => {
                let (schema, name, instance) =
                    (param(params, 0), param(params, 1), param(params, 2));
                let table = db
                    .tables
                    .iter_mut()
                    .find(|t| t.schema == schema && t.name == name)
                    .ok_or_else(|| Error::query(format!("Object '{}.{}' does not exist", schema, name)))?;
                let Some(pos) = table.capture_instances.iter().position(|ci| *ci == instance) else {
                    return Err(Error::query(format!(
                        "Capture instance '{}' does not exist for '{}.{}'.",
                        instance, schema, name
                    )));
                };
                table.capture_instances.remove(pos);
                if table.capture_instances.is_empty() {
                    table.role = None;
                }
                Ok(Vec::new())
            }
            TABLE_CDC_STATE => {
                if let Some(rows) = &db.table_state_rows {
                    return Ok(rows.clone());
                }
                let name = param(params, 0);
                Ok(db
                    .tables
                    .iter()
                    .filter(|t| t.name == name)
                    .map(|t| {
                        Row::new()
                            .with("name", t.name.as_str())
                            .with("is_tracked_by_cdc", !t.capture_instances.is_empty())
                    })
                    .collect())
            }
            CAPTURE_INSTANCE => {
                let (schema, name) = (param(params, 0), param(params, 1));
                Ok(db
                    .tables
                    .iter()
                    .filter(|t| t.schema == schema && t.name == name)
                    .flat_map(|t| t.capture_instances.iter())
                    .map(|ci| Row::new().with("capture_instance", ci.as_str()))
                    .collect())
            }
            BASE_TABLES => {
                if let Some(rows) = &db.base_table_rows {
                    return Ok(rows.clone());
                }
                let mut tables: Vec<(&str, &str)> = db
                    .tables
                    .iter()
                    .filter(|t| !EXCLUDED_SCHEMAS.contains(&t.schema.as_str()))
                    .map(|t| (t.schema.as_str(), t.name.as_str()))
                    .collect();
                tables.sort();
                Ok(tables
                    .into_iter()
                    .map(|(s, t)| Row::new().with("table_schema", s).with("table_name", t))
                    .collect())
            }
            ACTIVE_FACILITIES_QUERY => Ok(db.directory_rows.clone()),
            other => Err(Error::query(format!("unsupported statement: {}", other))),
        }
    }
}

#[async_trait]
impl SqlSession for FakeSession {
    fn database(&self) -> &str {
        &self.database
    }

    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.run(sql, params)
    }

    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        self.run(sql, params).map(|rows| rows.len() as u64)
    }

    async fn commit(&mut self) -> Result<()> {
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let mut state = self.catalog.lock();
        state.open_sessions = state.open_sessions.saturating_sub(1);
        Ok(())
    }
}

/// Directory rows as the control database returns them.
pub fn directory_rows(names: &[&str]) -> Vec<Row> {
    names
        .iter()
        .map(|name| Row::new().with("dbname", *name))
        .collect()
}
