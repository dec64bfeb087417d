use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::config::DbConfig;
use rusqlite::{params, Connection, OptionalExtension};
use time::OffsetDateTime;

use crate::config::{ConfigPaths, StorageOptions};
use crate::error::StorageError;

mod schema;

pub const STORE_KEY: &str = "linkSaverChat";
pub const PREVIEW_CACHE_KEY: &str = "linkPreviewCache";
pub const THEME_KEY: &str = "theme";

/// Cloneable handle to the key/value document database. Every document is
/// written whole; there is no partial update.
#[derive(Clone, Debug)]
pub struct StorageHandle {
    db_path: Arc<PathBuf>,
    wal_autocheckpoint: u32,
}

impl StorageHandle {
    pub fn connect(&self) -> Result<Connection, StorageError> {
        let conn = Connection::open(&*self.db_path)?;
        prepare_connection(&conn, self.wal_autocheckpoint)?;
        Ok(conn)
    }

    pub fn with_connection<F, T>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&Connection) -> Result<T, StorageError>,
    {
        let conn = self.connect()?;
        f(&conn)
    }

    pub fn database_path(&self) -> &Path {
        &self.db_path
    }

    pub fn read_document(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.with_connection(|conn| {
            let value = conn
                .query_row(
                    "SELECT value FROM documents WHERE key = ?1",
                    params![key],
                    |row| row.get::<_, String>(0),
                )
                .optional()?;
            Ok(value)
        })
    }

    pub fn write_document(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO documents (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                                                updated_at = excluded.updated_at",
                params![key, value, now],
            )?;
            Ok(())
        })
    }

    pub fn delete_document(&self, key: &str) -> Result<bool, StorageError> {
        self.with_connection(|conn| {
            let removed = conn.execute("DELETE FROM documents WHERE key = ?1", params![key])?;
            Ok(removed > 0)
        })
    }

    /// Removes every document. Used by the full-data clear.
    pub fn clear_documents(&self) -> Result<usize, StorageError> {
        self.with_connection(|conn| Ok(conn.execute("DELETE FROM documents", [])?))
    }
}

pub fn init(paths: &ConfigPaths, storage: &StorageOptions) -> anyhow::Result<StorageHandle> {
    use anyhow::Context;

    let db_path = if storage.database_path.as_os_str().is_empty() {
        &paths.database_path
    } else {
        &storage.database_path
    };
    open(db_path, storage.wal_autocheckpoint)
        .with_context(|| format!("opening database {}", db_path.display()))
}

pub fn open(db_path: &Path, wal_autocheckpoint: u32) -> Result<StorageHandle, StorageError> {
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent).map_err(|err| {
            StorageError::Other(format!(
                "creating data directory {}: {err}",
                parent.display()
            ))
        })?;
    }
    let conn = Connection::open(db_path)?;
    prepare_connection(&conn, wal_autocheckpoint)?;
    schema::apply(&conn)?;
    Ok(StorageHandle {
        db_path: Arc::new(db_path.to_path_buf()),
        wal_autocheckpoint,
    })
}

pub(crate) fn prepare_connection(
    conn: &Connection,
    wal_autocheckpoint: u32,
) -> Result<(), StorageError> {
    conn.set_db_config(DbConfig::SQLITE_DBCONFIG_ENABLE_FKEY, true)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "wal_autocheckpoint", wal_autocheckpoint.to_string())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn init_storage() -> anyhow::Result<(TempDir, StorageHandle)> {
        let temp = TempDir::new()?;
        let storage = open(&temp.path().join("data/linksaver.db"), 1000)?;
        Ok((temp, storage))
    }

    #[test]
    fn missing_document_reads_as_none() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        assert_eq!(storage.read_document(STORE_KEY)?, None);
        Ok(())
    }

    #[test]
    fn write_replaces_whole_document() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        storage.write_document(STORE_KEY, r#"{"a":1}"#)?;
        storage.write_document(STORE_KEY, r#"{"b":2}"#)?;
        assert_eq!(storage.read_document(STORE_KEY)?.as_deref(), Some(r#"{"b":2}"#));
        Ok(())
    }

    #[test]
    fn documents_survive_reopen() -> anyhow::Result<()> {
        let (temp, storage) = init_storage()?;
        storage.write_document(THEME_KEY, "dark")?;
        drop(storage);
        let reopened = open(&temp.path().join("data/linksaver.db"), 1000)?;
        assert_eq!(reopened.read_document(THEME_KEY)?.as_deref(), Some("dark"));
        Ok(())
    }

    #[test]
    fn clear_documents_removes_every_key() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        storage.write_document(STORE_KEY, "{}")?;
        storage.write_document(PREVIEW_CACHE_KEY, "{}")?;
        assert!(storage.delete_document(THEME_KEY).map(|removed| !removed)?);
        assert_eq!(storage.clear_documents()?, 2);
        assert_eq!(storage.read_document(PREVIEW_CACHE_KEY)?, None);
        Ok(())
    }
}
