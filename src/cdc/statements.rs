//! T-SQL issued by the reconciliation engine.
//!
//! Catalog reads are the verification oracle: every mutation below is
//! followed by one of the `*_STATE` queries.

pub const DATABASE_CDC_STATE: &str = "SELECT is_cdc_enabled FROM sys.databases WHERE name = @P1";

pub const ENABLE_DATABASE: &str = "EXEC sys.sp_cdc_enable_db";

pub const DISABLE_DATABASE: &str = "EXEC sys.sp_cdc_disable_db";

pub const ENABLE_TABLE: &str = "EXEC sys.sp_cdc_enable_table \
     @source_schema = @P1, @source_name = @P2, @role_name = @P3";

pub const DISABLE_TABLE: &str = "EXEC sys.sp_cdc_disable_table \
     @source_schema = @P1, @source_name = @P2, @capture_instance = @P3";

/// Looked up by table name only, so a name shared by two schemas can
/// confirm the wrong object.
pub const TABLE_CDC_STATE: &str = "SELECT name, is_tracked_by_cdc FROM sys.tables WHERE name = @P1";

pub const CAPTURE_INSTANCE: &str = "SELECT ct.capture_instance \
     FROM cdc.change_tables ct \
     JOIN sys.tables t ON ct.source_object_id = t.object_id \
     JOIN sys.schemas s ON t.schema_id = s.schema_id \
     WHERE s.name = @P1 AND t.name = @P2 \
     ORDER BY ct.create_date";

pub const BASE_TABLES: &str = "SELECT table_schema, table_name \
     FROM information_schema.tables \
     WHERE table_type = 'BASE TABLE' \
     AND TABLE_SCHEMA <> 'cdc' AND TABLE_SCHEMA <> 'sys' AND TABLE_SCHEMA <> 'dbo' \
     ORDER BY 1, 2";

/// Schemas never replayed onto tenants.
pub const EXCLUDED_SCHEMAS: [&str; 3] = ["cdc", "sys", "dbo"];
