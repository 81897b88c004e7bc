//! Durable storage for tenant signing certificates.
//!
//! The certificate store maps a store identifier (a tenant id, or one of the
//! reserved ids for the root CA and common signing entries) to an encoded
//! [`SigningCertificateEntry`]. Two backends are provided:
//!
//! - [`LocalDbStore`] - an embedded single-file SQLite database
//! - [`DynamoDbStore`] - a DynamoDB table for production deployments
//!
//! Entries are serialized with a self-describing tagged binary encoding
//! (CBOR) whose field names are fixed on the wire, so entries written by one
//! process version decode in another.

pub mod dynamodb;
pub mod entry;
pub mod localdb;

pub use dynamodb::DynamoDbStore;
pub use entry::{decode_entry, encode_entry, SigningCertificateEntry};
pub use localdb::LocalDbStore;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use certforge_config::CertStoreKind;
use tracing::info;

/// Errors returned by certificate store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested signing certificate was not found in the store.
    #[error("certificate not found in store")]
    NotFound,

    /// An entry could not be encoded or decoded.
    #[error("signing certificate entry codec error: {0}")]
    Encoding(String),

    /// The backing store reported a failure.
    #[error("certificate store error: {0}")]
    Backend(String),

    /// A store request exceeded its deadline.
    #[error("certificate store request timed out")]
    Timeout,
}

/// Result type for certificate store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// A durable store for signing certificate entries, keyed by tenant id.
///
/// Reserved ids: `SharedTenantSigningKey` holds the common signing entry and
/// `alias/CAKey` holds the root CA entry in production deployments.
#[async_trait]
pub trait CertStore: Send + Sync {
    /// Upserts the entry under its tenant id. The write is durable before
    /// this returns.
    async fn put(&self, entry: &SigningCertificateEntry) -> Result<()>;

    /// Returns the entry stored under the given id.
    async fn get(&self, cert_id: &str) -> Result<SigningCertificateEntry>;

    /// Removes the entry stored under the given id. Deleting a missing id
    /// succeeds.
    async fn delete(&self, cert_id: &str) -> Result<()>;

    /// Releases backend resources. Behaviour of calls made after shutdown is
    /// undefined.
    async fn shutdown(&self);
}

/// Initializes the configured certificate store backend.
pub async fn init(kind: CertStoreKind, data_dir: &Path) -> Result<Arc<dyn CertStore>> {
    match kind {
        CertStoreKind::LocalDb => {
            let store = LocalDbStore::open(data_dir)?;
            info!("initialized the local certificate database");
            Ok(Arc::new(store))
        }
        CertStoreKind::DynamoDb => {
            let store = DynamoDbStore::connect().await?;
            info!("initialized the DynamoDB certificate store");
            Ok(Arc::new(store))
        }
    }
}
