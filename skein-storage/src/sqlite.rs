use std::sync::Mutex;

use rusqlite::{params, Connection};

use crate::error::StorageError;
use crate::traits::{validate_key, Datastore, Entries};

/// SQLite-backed datastore.
/// Uses a single `records` table with TEXT key and BLOB value columns.
pub struct SqliteDatastore {
    conn: Mutex<Connection>,
}

impl SqliteDatastore {
    /// Open (or create) a datastore at the given path.
    /// Use `:memory:` for an in-memory database.
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS records (key TEXT PRIMARY KEY, value BLOB NOT NULL)",
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl Datastore for SqliteDatastore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let conn = self.conn.lock().map_err(|e| StorageError::ReadError {
            reason: e.to_string(),
        })?;
        let mut stmt = conn.prepare_cached("SELECT value FROM records WHERE key = ?1")?;
        let mut rows = stmt.query(params![key])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        validate_key(key)?;
        let conn = self.conn.lock().map_err(|e| StorageError::WriteError {
            reason: e.to_string(),
        })?;
        conn.execute(
            "INSERT OR REPLACE INTO records (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        let conn = self.conn.lock().map_err(|e| StorageError::WriteError {
            reason: e.to_string(),
        })?;
        conn.execute("DELETE FROM records WHERE key = ?1", params![key])?;
        Ok(())
    }

    fn has(&self, key: &str) -> Result<bool, StorageError> {
        let conn = self.conn.lock().map_err(|e| StorageError::ReadError {
            reason: e.to_string(),
        })?;
        let mut stmt = conn.prepare_cached("SELECT 1 FROM records WHERE key = ?1")?;
        let mut rows = stmt.query(params![key])?;
        Ok(rows.next()?.is_some())
    }

    fn query_prefix(&self, prefix: &str) -> Result<Entries, StorageError> {
        let conn = self.conn.lock().map_err(|e| StorageError::ReadError {
            reason: e.to_string(),
        })?;

        // Keys sort lexicographically, so the matches are a contiguous run
        // starting at the prefix itself.
        let mut stmt =
            conn.prepare_cached("SELECT key, value FROM records WHERE key >= ?1 ORDER BY key")?;
        let mut rows = stmt.query(params![prefix])?;
        let mut results = Vec::new();
        while let Some(row) = rows.next()? {
            let k: String = row.get(0)?;
            if !k.starts_with(prefix) {
                break;
            }
            results.push((k, row.get(1)?));
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_store() -> SqliteDatastore {
        SqliteDatastore::open(":memory:").unwrap()
    }

    #[test]
    fn test_basic_crud() {
        let store = make_store();

        store.put("/values/a", b"one").unwrap();
        assert_eq!(store.get("/values/a").unwrap(), Some(b"one".to_vec()));
        assert!(store.has("/values/a").unwrap());

        store.delete("/values/a").unwrap();
        assert_eq!(store.get("/values/a").unwrap(), None);
        assert!(!store.has("/values/a").unwrap());
    }

    #[test]
    fn test_overwrite() {
        let store = make_store();
        store.put("/k", b"value1").unwrap();
        store.put("/k", b"value2").unwrap();
        assert_eq!(store.get("/k").unwrap(), Some(b"value2".to_vec()));
    }

    #[test]
    fn test_query_prefix_stops_at_boundary() {
        let store = make_store();
        store.put("/providers/aa/p1", b"1").unwrap();
        store.put("/providers/aa/p2", b"2").unwrap();
        store.put("/providers/ab/p3", b"3").unwrap();

        let results = store.query_prefix("/providers/aa/").unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, "/providers/aa/p1");
        assert_eq!(results[1].1, b"2".to_vec());
    }

    #[test]
    fn test_put_rejects_invalid_key() {
        let store = make_store();
        assert!(matches!(
            store.put("no-slash", b"x"),
            Err(StorageError::InvalidKey { .. })
        ));
    }

    #[test]
    fn test_persists_across_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("skein.db");
        let path = path.to_str().unwrap();
        {
            let store = SqliteDatastore::open(path).unwrap();
            store.put("/values/kept", b"yes").unwrap();
        }
        let store = SqliteDatastore::open(path).unwrap();
        assert_eq!(store.get("/values/kept").unwrap(), Some(b"yes".to_vec()));
    }
}
