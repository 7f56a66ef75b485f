use std::sync::Mutex;
use std::time::Duration;

use rusqlite::{params, Connection};

use crate::error::StorageError;
use crate::traits::{BatchOp, KvPairs, KvStore};

/// SQLite-backed key-value store.
///
/// Each store owns one table (`kv_<namespace>`) with BLOB key and value
/// columns, so several storage classes can share a single database file.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    table: String,
}

impl SqliteStore {
    /// Open (or create) the namespace table in the database at `path`.
    /// Use `:memory:` for an in-memory database.
    pub fn open(path: &str, namespace: &str) -> Result<Self, StorageError> {
        if namespace.is_empty()
            || !namespace
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(StorageError::SqliteError {
                reason: format!("invalid namespace '{namespace}'"),
            });
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        let table = format!("kv_{namespace}");
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {table} (key BLOB PRIMARY KEY, value BLOB NOT NULL)"
            ),
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
            table,
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|e| StorageError::SqliteError {
            reason: e.to_string(),
        })
    }
}

impl KvStore for SqliteStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare_cached(&format!("SELECT value FROM {} WHERE key = ?1", self.table))?;
        let mut rows = stmt.query(params![key])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        let conn = self.lock()?;
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO {} (key, value) VALUES (?1, ?2)",
                self.table
            ),
            params![key, value],
        )?;
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), StorageError> {
        let conn = self.lock()?;
        conn.execute(
            &format!("DELETE FROM {} WHERE key = ?1", self.table),
            params![key],
        )?;
        Ok(())
    }

    fn exists(&self, key: &[u8]) -> Result<bool, StorageError> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare_cached(&format!("SELECT 1 FROM {} WHERE key = ?1", self.table))?;
        let mut rows = stmt.query(params![key])?;
        Ok(rows.next()?.is_some())
    }

    fn prefix_scan(&self, prefix: &[u8]) -> Result<KvPairs, StorageError> {
        let conn = self.lock()?;
        let mut results = Vec::new();
        match increment_prefix(prefix) {
            Some(upper) => {
                let mut stmt = conn.prepare_cached(&format!(
                    "SELECT key, value FROM {} WHERE key >= ?1 AND key < ?2 ORDER BY key",
                    self.table
                ))?;
                let mut rows = stmt.query(params![prefix, upper])?;
                while let Some(row) = rows.next()? {
                    results.push((row.get(0)?, row.get(1)?));
                }
            }
            None => {
                let mut stmt = conn.prepare_cached(&format!(
                    "SELECT key, value FROM {} WHERE key >= ?1 ORDER BY key",
                    self.table
                ))?;
                let mut rows = stmt.query(params![prefix])?;
                while let Some(row) = rows.next()? {
                    let k: Vec<u8> = row.get(0)?;
                    if !k.starts_with(prefix) {
                        break;
                    }
                    results.push((k, row.get(1)?));
                }
            }
        }
        Ok(results)
    }

    fn write_batch(&self, ops: Vec<BatchOp>) -> Result<(), StorageError> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        let put_sql = format!(
            "INSERT OR REPLACE INTO {} (key, value) VALUES (?1, ?2)",
            self.table
        );
        let delete_sql = format!("DELETE FROM {} WHERE key = ?1", self.table);
        for op in ops {
            match op {
                BatchOp::Put { key, value } => {
                    tx.execute(&put_sql, params![key, value])?;
                }
                BatchOp::Delete { key } => {
                    tx.execute(&delete_sql, params![key])?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }
}

/// Exclusive upper bound for a prefix range, or `None` for an all-0xFF prefix.
fn increment_prefix(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut result = prefix.to_vec();
    for i in (0..result.len()).rev() {
        if result[i] < 0xFF {
            result[i] += 1;
            result.truncate(i + 1);
            return Some(result);
        }
    }
    None
}
