//! Active facility discovery.
//!
//! The control database lists one connection string per plant; the tenant
//! database name is the `Initial Catalog` of that string.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{info, warn};

use crate::mssql::{release, ConnectionProvider, Row, Value};
use crate::Result;

/// Prefix of every facility key.
pub const FACILITY_KEY_PREFIX: &str = "cip_prd_sql_";

pub(crate) const ACTIVE_FACILITIES_QUERY: &str = "SELECT SUBSTRING(c.Value, \
     CHARINDEX(';Initial Catalog=', c.Value)+1+16, \
     CHARINDEX(';User ID=', c.Value)- CHARINDEX(';Initial Catalog=', c.Value)-1-16) dbname \
     from [Connection].[Connections] c \
     left join [Organization].[Plants] p on c.PlantId = p.Id \
     where p.isdeleted=0 and c.[Key] = 'SystemDatabase' \
     order by dbname desc";

/// One active facility: its key and the directory row it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct FacilityRecord {
    pub key: String,
    pub row: Row,
}

impl FacilityRecord {
    /// Tenant database name, if the directory row carried one.
    pub fn database(&self) -> Option<&str> {
        self.row.get_str("dbname").filter(|name| !name.is_empty())
    }
}

/// Immutable set of active facilities, in directory order, unique by key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FacilitySnapshot {
    records: Vec<FacilityRecord>,
}

impl FacilitySnapshot {
    /// Keys each row as `cip_prd_sql_<dbname>`. A repeated key keeps its
    /// first position and takes the later row.
    pub fn from_rows(rows: Vec<Row>) -> Self {
        let mut records: Vec<FacilityRecord> = Vec::with_capacity(rows.len());
        let mut positions: HashMap<String, usize> = HashMap::new();

        for row in rows {
            let dbname = match row.get("dbname") {
                None | Some(Value::Null) => String::new(),
                Some(value) => value.to_string(),
            };
            let key = format!("{}{}", FACILITY_KEY_PREFIX, dbname);

            match positions.get(&key) {
                Some(&idx) => records[idx].row = row,
                None => {
                    positions.insert(key.clone(), records.len());
                    records.push(FacilityRecord { key, row });
                }
            }
        }

        Self { records }
    }

    pub fn records(&self) -> &[FacilityRecord] {
        &self.records
    }

    pub fn get(&self, key: &str) -> Option<&FacilityRecord> {
        self.records.iter().find(|r| r.key == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(|r| r.key.as_str())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Which facility databases a bulk operation may touch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSelection {
    All,
    Only(BTreeSet<String>),
}

impl TargetSelection {
    pub fn only<I, S>(databases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TargetSelection::Only(databases.into_iter().map(Into::into).collect())
    }

    pub fn includes(&self, database: &str) -> bool {
        match self {
            TargetSelection::All => true,
            TargetSelection::Only(set) => set.contains(database),
        }
    }
}

/// Reads the active facility list from the control database.
pub struct FacilityDirectory {
    provider: Arc<dyn ConnectionProvider>,
    control_database: String,
}

impl FacilityDirectory {
    pub fn new(provider: Arc<dyn ConnectionProvider>, control_database: impl Into<String>) -> Self {
        Self {
            provider,
            control_database: control_database.into(),
        }
    }

    /// Fetches the current snapshot.
    ///
    /// `Ok(None)` when the control database cannot be reached; `Err` when the
    /// query itself fails.
    pub async fn fetch_active_facilities(&self) -> Result<Option<FacilitySnapshot>> {
        let mut session = match self.provider.connect(&self.control_database).await {
            Ok(session) => session,
            Err(e) => {
                warn!(
                    database = %self.control_database,
                    "Could not connect to the facility directory: {}", e
                );
                return Ok(None);
            }
        };

        let rows = session.query(ACTIVE_FACILITIES_QUERY, &[]).await;
        release(session).await;

        let snapshot = FacilitySnapshot::from_rows(rows?);
        info!("Found {} active facilities", snapshot.len());
        Ok(Some(snapshot))
    }
}
