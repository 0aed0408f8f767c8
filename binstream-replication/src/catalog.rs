use std::collections::HashMap;

use async_trait::async_trait;
use mysql_async::prelude::Queryable;
use serde::Serialize;
use tracing::debug;

use crate::error::ReplicationResult;

const COLUMNS_QUERY: &str = "SELECT column_name, data_type \
     FROM information_schema.columns \
     WHERE table_schema = ? AND table_name = ? \
     ORDER BY ordinal_position";

/// Name and declared type of one column, in table order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "dataType")]
    pub data_type: String,
}

/// The cached shape of one table at row-event time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableInfo {
    pub schema: String,
    pub table: String,
    pub columns: Vec<ColumnInfo>,
}

/// Source of column metadata for tables referenced by row events.
#[async_trait]
pub trait SchemaProvider: Send {
    async fn columns(&mut self, schema: &str, table: &str) -> ReplicationResult<Vec<ColumnInfo>>;
}

#[async_trait]
impl<P: SchemaProvider + ?Sized> SchemaProvider for Box<P> {
    async fn columns(&mut self, schema: &str, table: &str) -> ReplicationResult<Vec<ColumnInfo>> {
        (**self).columns(schema, table).await
    }
}

/// Queries `information_schema.columns` over a regular connection, opened
/// lazily on first use so the provider can be constructed before the server
/// is reachable.
pub struct MySqlSchemaProvider {
    opts: mysql_async::Opts,
    conn: Option<mysql_async::Conn>,
}

impl MySqlSchemaProvider {
    pub fn new(opts: mysql_async::Opts) -> Self {
        MySqlSchemaProvider { opts, conn: None }
    }
}

#[async_trait]
impl SchemaProvider for MySqlSchemaProvider {
    async fn columns(&mut self, schema: &str, table: &str) -> ReplicationResult<Vec<ColumnInfo>> {
        let conn = match &mut self.conn {
            Some(conn) => conn,
            None => self
                .conn
                .insert(mysql_async::Conn::new(self.opts.clone()).await?),
        };

        let rows: Vec<(String, String)> = conn.exec(COLUMNS_QUERY, (schema, table)).await?;
        Ok(rows
            .into_iter()
            .map(|(name, data_type)| ColumnInfo { name, data_type })
            .collect())
    }
}

/// Per-(schema, table) cache of column metadata.
///
/// Owned exclusively by the reader task; the `&mut self` API makes the
/// single-threaded use explicit, so no locking is involved. Entries are
/// populated lazily and evicted on `TABLE_MAP` frames and detected
/// `ALTER TABLE` statements.
pub struct TableCatalog<P> {
    provider: P,
    tables: HashMap<(String, String), TableInfo>,
}

impl<P: SchemaProvider> TableCatalog<P> {
    pub fn new(provider: P) -> Self {
        TableCatalog {
            provider,
            tables: HashMap::new(),
        }
    }

    /// The cached entry, or a fresh catalog query when none is cached.
    pub async fn table_info(&mut self, schema: &str, table: &str) -> ReplicationResult<TableInfo> {
        let key = (schema.to_string(), table.to_string());
        if let Some(info) = self.tables.get(&key) {
            return Ok(info.clone());
        }

        let columns = self.provider.columns(schema, table).await?;
        debug!(schema, table, columns = columns.len(), "loaded table metadata");

        let info = TableInfo {
            schema: schema.to_string(),
            table: table.to_string(),
            columns,
        };
        self.tables.insert(key, info.clone());
        Ok(info)
    }

    pub fn invalidate(&mut self, schema: &str, table: &str) {
        self.tables
            .remove(&(schema.to_string(), table.to_string()));
    }
}
