//! Embedded certificate store backed by a single SQLite file.
//!
//! The database lives in one file (`certs.db`) with a single table acting as
//! the signing-certificate bucket. The connection runs in exclusive locking
//! mode with a one second busy timeout, so a second process opening the same
//! file fails fast instead of deadlocking. Every operation is a single
//! transaction; a successful put is durable before it is acknowledged.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, error, info};

use crate::entry::{decode_entry, encode_entry, SigningCertificateEntry};
use crate::{CertStore, Result, StoreError};

/// Name of the database file.
const CERT_DB_NAME: &str = "certs.db";

/// Table within the database where signing certificates are stored.
const CERTS_TABLE: &str = "SigningCertificates";

/// How long to wait for the exclusive file lock before failing the open.
const LOCK_ACQUISITION_TIMEOUT: Duration = Duration::from_secs(1);

/// Embedded signing certificate store.
pub struct LocalDbStore {
    conn: Mutex<Option<Connection>>,
    path: PathBuf,
}

impl LocalDbStore {
    /// Opens (creating if necessary) the certificate database inside the
    /// given directory.
    pub fn open(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(CERT_DB_NAME);
        let conn = Connection::open(&path).map_err(|e| {
            error!(path = %path.display(), "failed to open the local cert database");
            StoreError::Backend(e.to_string())
        })?;

        conn.busy_timeout(LOCK_ACQUISITION_TIMEOUT)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        conn.pragma_update(None, "locking_mode", "exclusive")
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        // The first write both creates the bucket and takes the exclusive
        // file lock, failing within the busy timeout if another process
        // holds it.
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {CERTS_TABLE} (
                    cert_id TEXT PRIMARY KEY,
                    cert BLOB NOT NULL
                )"
            ),
            [],
        )
        .map_err(|e| {
            error!("failed to create the signing certificate bucket");
            StoreError::Backend(e.to_string())
        })?;

        info!(path = %path.display(), "opened the local certificate database");
        Ok(Self {
            conn: Mutex::new(Some(conn)),
            path,
        })
    }

    /// Path of the underlying database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let guard = self
            .conn
            .lock()
            .map_err(|_| StoreError::Backend("store mutex poisoned".to_string()))?;
        match guard.as_ref() {
            Some(conn) => f(conn),
            None => Err(StoreError::Backend("store has been shut down".to_string())),
        }
    }
}

#[async_trait]
impl CertStore for LocalDbStore {
    async fn put(&self, entry: &SigningCertificateEntry) -> Result<()> {
        let encoded = encode_entry(entry)?;
        self.with_conn(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO {CERTS_TABLE} (cert_id, cert) VALUES (?1, ?2)
                     ON CONFLICT(cert_id) DO UPDATE SET cert = excluded.cert"
                ),
                params![entry.tenant_id, encoded],
            )
            .map_err(|e| {
                error!("failed to add the certificate to the store");
                StoreError::Backend(e.to_string())
            })?;
            Ok(())
        })?;
        debug!(tenant_id = %entry.tenant_id, "added the certificate to the store");
        Ok(())
    }

    async fn get(&self, cert_id: &str) -> Result<SigningCertificateEntry> {
        let encoded: Vec<u8> = self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT cert FROM {CERTS_TABLE} WHERE cert_id = ?1"),
                params![cert_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .ok_or(StoreError::NotFound)
        })?;
        decode_entry(&encoded)
    }

    async fn delete(&self, cert_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                &format!("DELETE FROM {CERTS_TABLE} WHERE cert_id = ?1"),
                params![cert_id],
            )
            .map_err(|e| {
                error!("failed to remove the signing certificate from the store");
                StoreError::Backend(e.to_string())
            })?;
            Ok(())
        })?;
        debug!(cert_id, "removed the signing certificate from the store");
        Ok(())
    }

    async fn shutdown(&self) {
        let conn = match self.conn.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(conn) = conn {
            if let Err((_conn, e)) = conn.close() {
                error!(error = %e, "failed to shut down the local certificate database");
                return;
            }
        }
        info!("shut down the local certificate database");
    }
}
