//! SQLite-backed extract files.
//!
//! A session is an in-memory connection with the extract file attached
//! under the table's schema name, so tables are addressed as
//! `"Extract"."Metric"` just like in the published extract.

use std::path::Path;

use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{Connection, ToSql, Transaction};
use tracing::{debug, instrument};

use super::{CreateMode, ExtractStore};
use crate::error::{ExportError, Result};
use crate::logging::LogConfig;
use crate::schema::{coerce_row, SqlType, TableDefinition};
use crate::security::SqlSecurity;
use crate::value::{Row, Value};

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        use rusqlite::types::Value as Sql;
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(Sql::Null),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Int(v) => ToSqlOutput::Owned(Sql::Integer(*v)),
            Value::Double(v) => ToSqlOutput::Owned(Sql::Real(*v)),
            Value::Bool(v) => ToSqlOutput::Owned(Sql::Integer(i64::from(*v))),
        })
    }
}

fn column_type_sql(sql_type: SqlType) -> &'static str {
    match sql_type {
        SqlType::Text => "TEXT",
        SqlType::Int => "INTEGER",
        SqlType::Date => "DATE",
        SqlType::Bool => "BOOLEAN",
        SqlType::Double => "DOUBLE",
    }
}

fn qualified_table(definition: &TableDefinition) -> Result<String> {
    Ok(format!(
        "{}.{}",
        SqlSecurity::escape_identifier(&definition.table_name.schema)?,
        SqlSecurity::escape_identifier(&definition.table_name.table)?
    ))
}

/// One open extract file. The connection closes when the session drops.
pub struct SqliteSession {
    conn: Connection,
    created_file: bool,
}

impl SqliteSession {
    /// Opens `path` under `schema` following the rules of `mode`.
    pub fn open(path: &Path, schema: &str, mode: CreateMode) -> Result<Self> {
        let created_file = mode.prepare(path)?;
        let conn = Connection::open_in_memory()?;
        let schema = SqlSecurity::escape_identifier(schema)?;
        conn.execute(
            &format!("ATTACH DATABASE ?1 AS {schema}"),
            [path.to_string_lossy().into_owned()],
        )?;
        Ok(Self { conn, created_file })
    }

    /// Whether opening the session created the file.
    pub fn created_file(&self) -> bool {
        self.created_file
    }

    /// Creates the definition's table.
    pub fn create_table(&self, definition: &TableDefinition, if_not_exists: bool) -> Result<()> {
        let columns = definition
            .columns
            .iter()
            .map(|c| {
                Ok(format!(
                    "{} {}{}",
                    SqlSecurity::quote_column(&c.name)?,
                    column_type_sql(c.sql_type),
                    if c.nullable { "" } else { " NOT NULL" }
                ))
            })
            .collect::<Result<Vec<_>>>()?;

        let sql = format!(
            "CREATE TABLE {}{} ({})",
            if if_not_exists { "IF NOT EXISTS " } else { "" },
            qualified_table(definition)?,
            columns.join(", ")
        );
        self.conn.execute(&sql, [])?;
        Ok(())
    }

    /// Starts a bulk insert into the definition's table.
    pub fn inserter<'s>(&'s mut self, definition: &'s TableDefinition) -> Result<Inserter<'s>> {
        let placeholders: Vec<String> = (1..=definition.column_count())
            .map(|i| format!("?{i}"))
            .collect();
        let sql = format!(
            "INSERT INTO {} VALUES ({})",
            qualified_table(definition)?,
            placeholders.join(", ")
        );
        Ok(Inserter {
            tx: self.conn.transaction()?,
            definition,
            sql,
            added: 0,
        })
    }

    /// Reads every row of the definition's table in insertion order.
    pub fn read_rows(&self, definition: &TableDefinition) -> Result<Vec<Row>> {
        let columns = definition
            .columns
            .iter()
            .map(|c| SqlSecurity::quote_column(&c.name))
            .collect::<Result<Vec<_>>>()?;
        let sql = format!(
            "SELECT {} FROM {} ORDER BY rowid",
            columns.join(", "),
            qualified_table(definition)?
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(definition.column_count());
            for (i, column) in definition.columns.iter().enumerate() {
                let value = match (row.get_ref(i)?, column.sql_type) {
                    (ValueRef::Null, _) => Value::Null,
                    (ValueRef::Integer(v), SqlType::Bool) => Value::Bool(v != 0),
                    (ValueRef::Integer(v), SqlType::Double) => Value::Double(v as f64),
                    (ValueRef::Integer(v), _) => Value::Int(v),
                    (ValueRef::Real(v), _) => Value::Double(v),
                    (ValueRef::Text(bytes), _) => {
                        Value::Text(String::from_utf8_lossy(bytes).into_owned())
                    }
                    (ValueRef::Blob(_), _) => {
                        return Err(ExportError::type_mismatch(
                            &column.name,
                            column.sql_type.to_string(),
                            "blob",
                        ))
                    }
                };
                values.push(value);
            }
            out.push(values);
        }
        Ok(out)
    }
}

/// Bulk row insert inside one transaction.
///
/// Nothing is visible until [`Inserter::execute`]; dropping the inserter
/// rolls the transaction back.
pub struct Inserter<'s> {
    tx: Transaction<'s>,
    definition: &'s TableDefinition,
    sql: String,
    added: usize,
}

impl Inserter<'_> {
    /// Coerces and stages rows.
    pub fn add_rows(&mut self, rows: impl IntoIterator<Item = Row>) -> Result<()> {
        let mut stmt = self.tx.prepare_cached(&self.sql)?;
        for row in rows {
            let row = coerce_row(self.definition, row)?;
            stmt.execute(rusqlite::params_from_iter(row.iter()))?;
            self.added += 1;
        }
        Ok(())
    }

    /// Commits the staged rows and returns how many were inserted.
    pub fn execute(self) -> Result<usize> {
        self.tx.commit()?;
        Ok(self.added)
    }
}

/// Extract store writing SQLite database files.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteExtract {
    log: LogConfig,
}

impl SqliteExtract {
    pub fn new() -> Self {
        Self::default()
    }

    /// Controls create/insert logging through [`LogConfig::log_extract_operations`].
    pub fn with_log_config(mut self, log: LogConfig) -> Self {
        self.log = log;
        self
    }
}

impl ExtractStore for SqliteExtract {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    #[instrument(skip(self, path, definition), fields(table = %definition.table_name, path = %path.display()))]
    fn create(&self, path: &Path, definition: &TableDefinition, mode: CreateMode) -> Result<()> {
        let session = SqliteSession::open(path, &definition.table_name.schema, mode)?;
        session.create_table(definition, mode == CreateMode::CreateIfNotExists)?;
        if self.log.log_extract_operations {
            debug!(created_file = session.created_file(), "Created extract table");
        }
        Ok(())
    }

    #[instrument(skip(self, definition, rows), fields(table = %definition.table_name, rows = rows.len()))]
    fn insert(&self, path: &Path, definition: &TableDefinition, rows: Vec<Row>) -> Result<usize> {
        let mut session = SqliteSession::open(path, &definition.table_name.schema, CreateMode::None)?;
        let mut inserter = session.inserter(definition)?;
        inserter.add_rows(rows)?;
        let inserted = inserter.execute()?;
        if self.log.log_extract_operations {
            debug!(inserted, "Inserted rows");
        }
        Ok(inserted)
    }

    fn read(&self, path: &Path, definition: &TableDefinition) -> Result<Vec<Row>> {
        let session = SqliteSession::open(path, &definition.table_name.schema, CreateMode::None)?;
        session.read_rows(definition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, TableName};

    fn definition() -> TableDefinition {
        TableDefinition::new(
            TableName::extract("Bulb"),
            vec![
                Column::new("id", SqlType::Text, false),
                Column::new("installed", SqlType::Date, true),
                Column::new("on", SqlType::Bool, true),
                Column::new("fixture.wattage", SqlType::Int, true),
                Column::new("lumens", SqlType::Double, true),
            ],
        )
    }

    fn row(id: &str) -> Row {
        vec![
            id.into(),
            "2020-01-01 00:00:00".into(),
            Value::Bool(true),
            Value::Int(60),
            Value::Int(800),
        ]
    }

    #[test]
    fn test_create_insert_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bulbs.db");
        let store = SqliteExtract::new();
        let def = definition();

        store.create(&path, &def, CreateMode::CreateAndReplace).unwrap();
        assert!(path.exists());
        assert_eq!(store.insert(&path, &def, vec![row("b1"), row("b2")]).unwrap(), 2);
        assert_eq!(store.insert(&path, &def, vec![row("b3")]).unwrap(), 1);

        let rows = store.read(&path, &def).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(
            rows[0],
            vec![
                Value::Text("b1".into()),
                Value::Text("2020-01-01 00:00:00".into()),
                Value::Bool(true),
                Value::Int(60),
                Value::Double(800.0),
            ]
        );
        assert_eq!(rows[2][0], Value::Text("b3".into()));
    }

    #[test]
    fn test_failed_insert_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bulbs.db");
        let store = SqliteExtract::new();
        let def = definition();
        store.create(&path, &def, CreateMode::Create).unwrap();

        let mut bad = row("b2");
        bad[0] = Value::Null;
        let err = store.insert(&path, &def, vec![row("b1"), bad]).unwrap_err();
        assert!(matches!(err, ExportError::NullViolation { .. }));
        assert!(store.read(&path, &def).unwrap().is_empty());
    }

    #[test]
    fn test_insert_requires_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.db");
        let err = SqliteExtract::new()
            .insert(&path, &definition(), vec![row("b1")])
            .unwrap_err();
        assert!(matches!(err, ExportError::ExtractNotFound { .. }));
    }

    #[test]
    fn test_create_if_not_exists_keeps_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bulbs.db");
        let store = SqliteExtract::new();
        let def = definition();

        store.create(&path, &def, CreateMode::CreateIfNotExists).unwrap();
        store.insert(&path, &def, vec![row("b1")]).unwrap();
        store.create(&path, &def, CreateMode::CreateIfNotExists).unwrap();
        assert_eq!(store.read(&path, &def).unwrap().len(), 1);

        store.create(&path, &def, CreateMode::CreateAndReplace).unwrap();
        assert!(store.read(&path, &def).unwrap().is_empty());
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn capture_logs(f: impl FnOnce()) -> String {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        let bytes = logs.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_extract_operation_logging_follows_config() {
        let dir = tempfile::tempdir().unwrap();
        let def = definition();

        let path = dir.path().join("default.db");
        let store = SqliteExtract::new();
        let logs = capture_logs(|| {
            store.create(&path, &def, CreateMode::Create).unwrap();
            store.insert(&path, &def, vec![row("b1")]).unwrap();
        });
        assert!(logs.contains("Created extract table"));
        assert!(logs.contains("Inserted rows"));

        let path = dir.path().join("quiet.db");
        let store = SqliteExtract::new().with_log_config(LogConfig::production());
        let logs = capture_logs(|| {
            store.create(&path, &def, CreateMode::Create).unwrap();
            store.insert(&path, &def, vec![row("b1")]).unwrap();
        });
        assert!(!logs.contains("Created extract table"));
        assert!(!logs.contains("Inserted rows"));
        assert_eq!(store.read(&path, &def).unwrap().len(), 1);
    }
}
