//! Named, versioned response buckets on SQLite.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use rusqlite::{params, Connection, OptionalExtension};
use time::OffsetDateTime;

use super::AssetResponse;
use crate::error::{AssetError, StorageError};
use crate::storage::prepare_connection;

/// Cloneable handle to the asset cache database. Shares nothing with the
/// document store.
#[derive(Clone, Debug)]
pub struct CacheStorage {
    db_path: Arc<PathBuf>,
    wal_autocheckpoint: u32,
}

impl CacheStorage {
    pub fn open(db_path: &Path, wal_autocheckpoint: u32) -> Result<Self, AssetError> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                StorageError::Other(format!("creating cache directory {}: {err}", parent.display()))
            })?;
        }
        let conn = Connection::open(db_path)?;
        prepare_connection(&conn, wal_autocheckpoint)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS buckets (
                name TEXT PRIMARY KEY,
                active INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS entries (
                bucket TEXT NOT NULL REFERENCES buckets(name) ON DELETE CASCADE,
                url TEXT NOT NULL,
                status INTEGER NOT NULL,
                headers TEXT NOT NULL,
                body BLOB NOT NULL,
                stored_at INTEGER NOT NULL,
                PRIMARY KEY (bucket, url)
            );
            "#,
        )?;
        Ok(Self {
            db_path: Arc::new(db_path.to_path_buf()),
            wal_autocheckpoint,
        })
    }

    fn connect(&self) -> Result<Connection, AssetError> {
        let conn = Connection::open(&*self.db_path)?;
        prepare_connection(&conn, self.wal_autocheckpoint)?;
        Ok(conn)
    }

    pub fn keys(&self) -> Result<Vec<String>, AssetError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT name FROM buckets ORDER BY created_at, name")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    pub fn delete(&self, bucket: &str) -> Result<bool, AssetError> {
        let conn = self.connect()?;
        Ok(conn.execute("DELETE FROM buckets WHERE name = ?1", params![bucket])? > 0)
    }

    /// The bucket currently serving requests, if any version was activated.
    pub fn active(&self) -> Result<Option<String>, AssetError> {
        let conn = self.connect()?;
        let name = conn
            .query_row("SELECT name FROM buckets WHERE active = 1", [], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
        Ok(name)
    }

    /// Makes `bucket` the only bucket left and marks it active. Returns the
    /// names that were pruned.
    pub fn activate(&self, bucket: &str) -> Result<Vec<String>, AssetError> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let exists = tx
            .query_row("SELECT 1 FROM buckets WHERE name = ?1", params![bucket], |_| Ok(()))
            .optional()?
            .is_some();
        if !exists {
            return Err(AssetError::NotInstalled(bucket.to_string()));
        }
        let stale = {
            let mut stmt = tx.prepare("SELECT name FROM buckets WHERE name != ?1 ORDER BY name")?;
            let names = stmt
                .query_map(params![bucket], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            names
        };
        tx.execute("DELETE FROM buckets WHERE name != ?1", params![bucket])?;
        tx.execute("UPDATE buckets SET active = 1 WHERE name = ?1", params![bucket])?;
        tx.commit()?;
        Ok(stale)
    }

    pub fn put(&self, bucket: &str, url: &str, response: &AssetResponse) -> Result<(), AssetError> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        ensure_bucket(&tx, bucket)?;
        insert_entry(&tx, bucket, url, response)?;
        tx.commit()?;
        Ok(())
    }

    /// Writes every entry or none of them.
    pub fn put_all(&self, bucket: &str, entries: &[(String, AssetResponse)]) -> Result<(), AssetError> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        ensure_bucket(&tx, bucket)?;
        for (url, response) in entries {
            insert_entry(&tx, bucket, url, response)?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn match_in(&self, bucket: &str, url: &str) -> Result<Option<AssetResponse>, AssetError> {
        let conn = self.connect()?;
        let row = conn
            .query_row(
                "SELECT status, headers, body FROM entries WHERE bucket = ?1 AND url = ?2",
                params![bucket, url],
                |row| {
                    Ok((
                        row.get::<_, u16>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Vec<u8>>(2)?,
                    ))
                },
            )
            .optional()?;
        row.map(decode_entry).transpose()
    }

    /// Looks `url` up across every bucket, the active one first.
    pub fn match_any(&self, url: &str) -> Result<Option<AssetResponse>, AssetError> {
        let conn = self.connect()?;
        let row = conn
            .query_row(
                "SELECT e.status, e.headers, e.body
                 FROM entries e JOIN buckets b ON b.name = e.bucket
                 WHERE e.url = ?1
                 ORDER BY b.active DESC, b.created_at DESC
                 LIMIT 1",
                params![url],
                |row| {
                    Ok((
                        row.get::<_, u16>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Vec<u8>>(2)?,
                    ))
                },
            )
            .optional()?;
        row.map(decode_entry).transpose()
    }
}

fn ensure_bucket(conn: &Connection, bucket: &str) -> Result<(), AssetError> {
    let now = OffsetDateTime::now_utc().unix_timestamp();
    conn.execute(
        "INSERT OR IGNORE INTO buckets (name, active, created_at) VALUES (?1, 0, ?2)",
        params![bucket, now],
    )?;
    Ok(())
}

fn insert_entry(
    conn: &Connection,
    bucket: &str,
    url: &str,
    response: &AssetResponse,
) -> Result<(), AssetError> {
    let now = OffsetDateTime::now_utc().unix_timestamp();
    let headers = serde_json::to_string(&response.headers).map_err(StorageError::from)?;
    conn.execute(
        "INSERT INTO entries (bucket, url, status, headers, body, stored_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(bucket, url) DO UPDATE SET status = excluded.status,
                                                headers = excluded.headers,
                                                body = excluded.body,
                                                stored_at = excluded.stored_at",
        params![bucket, url, response.status, headers, response.body.as_ref(), now],
    )?;
    Ok(())
}

fn decode_entry((status, headers, body): (u16, String, Vec<u8>)) -> Result<AssetResponse, AssetError> {
    Ok(AssetResponse {
        status,
        headers: serde_json::from_str(&headers).map_err(StorageError::from)?,
        body: Bytes::from(body),
    })
}
