//! DynamoDB-backed certificate store.
//!
//! Entries live in the `SigningCertificates` table: string partition key
//! `cert_id`, binary attribute `cert` holding the encoded entry. Credentials
//! come from the ambient AWS environment and are never logged. Every call is
//! wrapped in a ten second deadline.

use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_dynamodb::primitives::Blob;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client;
use tracing::{debug, error, info};

use crate::entry::{decode_entry, encode_entry, SigningCertificateEntry};
use crate::{CertStore, Result, StoreError};

/// Name of the table used to store signing certificates.
const CERTS_TABLE_NAME: &str = "SigningCertificates";

/// Partition key attribute.
const KEY_ATTRIBUTE: &str = "cert_id";

/// Binary attribute holding the encoded entry.
const CERT_ATTRIBUTE: &str = "cert";

/// Deadline applied to every DynamoDB call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Signing certificate store backed by a DynamoDB table.
pub struct DynamoDbStore {
    client: Client,
}

impl DynamoDbStore {
    /// Connects to DynamoDB using ambient credentials and verifies that the
    /// signing certificate table exists.
    pub async fn connect() -> Result<Self> {
        let aws_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .load()
            .await;
        let store = Self {
            client: Client::new(&aws_config),
        };
        store.check_table().await?;
        Ok(store)
    }

    /// Wraps an existing client. Used for tests against local endpoints.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    async fn check_table(&self) -> Result<()> {
        let described = with_deadline(
            self.client
                .describe_table()
                .table_name(CERTS_TABLE_NAME)
                .send(),
        )
        .await?
        .map_err(|e| {
            error!(table = CERTS_TABLE_NAME, "signing certificate table is not reachable");
            StoreError::Backend(e.to_string())
        })?;

        let status = described
            .table()
            .and_then(|t| t.table_status())
            .map(|s| s.as_str().to_string())
            .unwrap_or_default();
        info!(table = CERTS_TABLE_NAME, status, "verified the signing certificate table");
        Ok(())
    }
}

/// Applies the store deadline to a DynamoDB call.
async fn with_deadline<F, T, E>(fut: F) -> Result<std::result::Result<T, E>>
where
    F: std::future::Future<Output = std::result::Result<T, E>>,
{
    tokio::time::timeout(REQUEST_TIMEOUT, fut)
        .await
        .map_err(|_| StoreError::Timeout)
}

#[async_trait]
impl CertStore for DynamoDbStore {
    async fn put(&self, entry: &SigningCertificateEntry) -> Result<()> {
        let encoded = encode_entry(entry)?;
        with_deadline(
            self.client
                .put_item()
                .table_name(CERTS_TABLE_NAME)
                .item(KEY_ATTRIBUTE, AttributeValue::S(entry.tenant_id.clone()))
                .item(CERT_ATTRIBUTE, AttributeValue::B(Blob::new(encoded)))
                .send(),
        )
        .await?
        .map_err(|e| {
            error!(tenant_id = %entry.tenant_id, "failed to add the signing certificate entry");
            StoreError::Backend(e.to_string())
        })?;
        debug!(tenant_id = %entry.tenant_id, "added the certificate to the store");
        Ok(())
    }

    async fn get(&self, cert_id: &str) -> Result<SigningCertificateEntry> {
        let output = with_deadline(
            self.client
                .get_item()
                .table_name(CERTS_TABLE_NAME)
                .key(KEY_ATTRIBUTE, AttributeValue::S(cert_id.to_string()))
                .send(),
        )
        .await?
        .map_err(|e| {
            error!(cert_id, "failed to query for the signing certificate");
            StoreError::Backend(e.to_string())
        })?;

        let item = output.item().ok_or(StoreError::NotFound)?;
        match item.get(CERT_ATTRIBUTE) {
            Some(AttributeValue::B(blob)) => decode_entry(blob.as_ref()),
            _ => Err(StoreError::Backend(format!(
                "entry for {cert_id} is missing the {CERT_ATTRIBUTE} attribute"
            ))),
        }
    }

    async fn delete(&self, cert_id: &str) -> Result<()> {
        with_deadline(
            self.client
                .delete_item()
                .table_name(CERTS_TABLE_NAME)
                .key(KEY_ATTRIBUTE, AttributeValue::S(cert_id.to_string()))
                .send(),
        )
        .await?
        .map_err(|e| {
            error!(cert_id, "failed to delete the signing certificate");
            StoreError::Backend(e.to_string())
        })?;
        debug!(cert_id, "removed the signing certificate from the store");
        Ok(())
    }

    async fn shutdown(&self) {
        info!("shut down the DynamoDB certificate store");
    }
}
