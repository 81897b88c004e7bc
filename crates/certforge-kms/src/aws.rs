//! AWS KMS signer.
//!
//! Private keys are RSA-4096 sign/verify keys that never leave the KMS HSM;
//! signing hands a pre-computed digest to the service. Keys are addressed
//! through aliases of the form `alias/<tenantId>` plus the reserved CA and
//! common signing aliases. Credentials come from the ambient AWS
//! environment and are never logged.
//!
//! The SDK surface consumed here is captured behind the narrow [`KmsApi`]
//! trait so the signer can be exercised against an in-memory fake.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_kms::primitives::Blob;
use aws_sdk_kms::types::{KeySpec, KeyUsageType, MessageType, SigningAlgorithmSpec};
use tracing::{error, info};

use crate::{check_digest, KmsError, KmsSigner, Result, SigningScheme};

/// Deadline applied to every KMS request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Pending window before a scheduled key deletion becomes permanent.
const KEY_DELETION_PENDING_WINDOW_DAYS: i32 = 7;

/// The KMS operations consumed by the signer.
///
/// Implemented by the real SDK client and by test fakes.
#[async_trait]
pub trait KmsApi: Send + Sync {
    /// Resolves a key id or alias to the underlying key id.
    async fn describe_key(&self, key_id: &str) -> Result<String>;

    /// Creates an RSA-4096 sign/verify key and returns its key id.
    async fn create_key(&self, description: &str) -> Result<String>;

    /// Binds an alias to a key.
    async fn create_alias(&self, alias: &str, target_key_id: &str) -> Result<()>;

    /// Removes an alias.
    async fn delete_alias(&self, alias: &str) -> Result<()>;

    /// Schedules deletion of a key after the pending window.
    async fn schedule_key_deletion(&self, key_id: &str, pending_window_days: i32) -> Result<()>;

    /// Returns the DER-encoded SubjectPublicKeyInfo of a key.
    async fn get_public_key(&self, key_id: &str) -> Result<Vec<u8>>;

    /// Signs a SHA-256 digest with RSASSA-PKCS1-v1.5.
    async fn sign_digest(&self, key_id: &str, digest: &[u8]) -> Result<Vec<u8>>;
}

/// [`KmsApi`] implementation over the AWS SDK client.
pub struct AwsKmsClient {
    client: aws_sdk_kms::Client,
}

impl AwsKmsClient {
    /// Wraps an SDK client.
    pub fn new(client: aws_sdk_kms::Client) -> Self {
        Self { client }
    }

    /// Connects using the ambient AWS configuration.
    pub async fn connect() -> Self {
        let aws_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .load()
            .await;
        Self::new(aws_sdk_kms::Client::new(&aws_config))
    }
}

#[async_trait]
impl KmsApi for AwsKmsClient {
    async fn describe_key(&self, key_id: &str) -> Result<String> {
        match self.client.describe_key().key_id(key_id).send().await {
            Ok(output) => output
                .key_metadata()
                .map(|metadata| metadata.key_id().to_string())
                .ok_or_else(|| KmsError::Backend("DescribeKey returned no metadata".to_string())),
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_not_found_exception() {
                    Err(KmsError::NotFound(key_id.to_string()))
                } else {
                    Err(KmsError::Backend(service_error.to_string()))
                }
            }
        }
    }

    async fn create_key(&self, description: &str) -> Result<String> {
        let output = self
            .client
            .create_key()
            .description(description)
            .key_spec(KeySpec::Rsa4096)
            .key_usage(KeyUsageType::SignVerify)
            .send()
            .await
            .map_err(|e| KmsError::Backend(e.into_service_error().to_string()))?;
        output
            .key_metadata()
            .map(|metadata| metadata.key_id().to_string())
            .ok_or_else(|| KmsError::Backend("CreateKey returned no metadata".to_string()))
    }

    async fn create_alias(&self, alias: &str, target_key_id: &str) -> Result<()> {
        self.client
            .create_alias()
            .alias_name(alias)
            .target_key_id(target_key_id)
            .send()
            .await
            .map_err(|e| KmsError::Backend(e.into_service_error().to_string()))?;
        Ok(())
    }

    async fn delete_alias(&self, alias: &str) -> Result<()> {
        self.client
            .delete_alias()
            .alias_name(alias)
            .send()
            .await
            .map_err(|e| KmsError::Backend(e.into_service_error().to_string()))?;
        Ok(())
    }

    async fn schedule_key_deletion(&self, key_id: &str, pending_window_days: i32) -> Result<()> {
        self.client
            .schedule_key_deletion()
            .key_id(key_id)
            .pending_window_in_days(pending_window_days)
            .send()
            .await
            .map_err(|e| KmsError::Backend(e.into_service_error().to_string()))?;
        Ok(())
    }

    async fn get_public_key(&self, key_id: &str) -> Result<Vec<u8>> {
        let output = self
            .client
            .get_public_key()
            .key_id(key_id)
            .send()
            .await
            .map_err(|e| {
                let service_error = e.into_service_error();
                if service_error.is_not_found_exception() {
                    KmsError::NotFound(key_id.to_string())
                } else {
                    KmsError::Backend(service_error.to_string())
                }
            })?;
        output
            .public_key()
            .map(|blob| blob.as_ref().to_vec())
            .ok_or_else(|| KmsError::Backend("GetPublicKey returned no key".to_string()))
    }

    async fn sign_digest(&self, key_id: &str, digest: &[u8]) -> Result<Vec<u8>> {
        let output = self
            .client
            .sign()
            .key_id(key_id)
            .message(Blob::new(digest.to_vec()))
            .message_type(MessageType::Digest)
            .signing_algorithm(SigningAlgorithmSpec::RsassaPkcs1V15Sha256)
            .send()
            .await
            .map_err(|e| KmsError::Backend(e.into_service_error().to_string()))?;
        output
            .signature()
            .map(|blob| blob.as_ref().to_vec())
            .ok_or_else(|| KmsError::Backend("Sign returned no signature".to_string()))
    }
}

/// HSM-backed KMS signer.
pub struct AwsKmsSigner {
    api: Arc<dyn KmsApi>,
}

impl AwsKmsSigner {
    /// Connects a signer using ambient AWS credentials.
    pub async fn connect() -> Self {
        Self::with_api(Arc::new(AwsKmsClient::connect().await))
    }

    /// Builds a signer over an explicit API implementation.
    pub fn with_api(api: Arc<dyn KmsApi>) -> Self {
        Self { api }
    }
}

/// Applies the KMS deadline to a request future.
async fn with_deadline<F, T>(fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    tokio::time::timeout(REQUEST_TIMEOUT, fut)
        .await
        .map_err(|_| KmsError::Timeout)?
}

#[async_trait]
impl KmsSigner for AwsKmsSigner {
    async fn public_key(&self, key_id: &str) -> Result<Vec<u8>> {
        with_deadline(self.api.get_public_key(key_id)).await
    }

    async fn sign_digest(
        &self,
        key_id: &str,
        digest: &[u8],
        scheme: SigningScheme,
    ) -> Result<Vec<u8>> {
        check_digest(digest, scheme)?;
        with_deadline(self.api.sign_digest(key_id, digest)).await
    }

    async fn create_key(&self, description: &str, alias: &str) -> Result<String> {
        // Idempotent by alias: reuse an existing key, create only on
        // NotFound, abort on anything else.
        match with_deadline(self.api.describe_key(alias)).await {
            Ok(existing) => {
                info!(key_id = %existing, "requested key already exists in KMS");
                return Ok(existing);
            }
            Err(KmsError::NotFound(_)) => {}
            Err(e) => {
                error!("failed to check whether the key exists in KMS");
                return Err(e);
            }
        }

        let key_id = with_deadline(self.api.create_key(description)).await?;
        with_deadline(self.api.create_alias(alias, &key_id)).await?;
        info!(key_id = %key_id, "created a signing key in KMS");
        Ok(key_id)
    }

    async fn delete_key(&self, alias: &str) -> Result<()> {
        let key_id = with_deadline(self.api.describe_key(alias)).await?;
        with_deadline(
            self.api
                .schedule_key_deletion(&key_id, KEY_DELETION_PENDING_WINDOW_DAYS),
        )
        .await?;
        with_deadline(self.api.delete_alias(alias)).await?;
        info!("scheduled deletion of a signing key in KMS");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeKms;
    use sha2::{Digest, Sha256};

    fn signer() -> (Arc<FakeKms>, AwsKmsSigner) {
        let fake = Arc::new(FakeKms::new(1024));
        (fake.clone(), AwsKmsSigner::with_api(fake))
    }

    #[tokio::test]
    async fn create_key_is_idempotent_by_alias() {
        let (_fake, signer) = signer();

        let first = signer
            .create_key("Signing key: t1", "alias/t1")
            .await
            .unwrap();
        let second = signer
            .create_key("Signing key: t1", "alias/t1")
            .await
            .unwrap();
        assert_eq!(first, second, "back-to-back creates must return one key id");
    }

    #[tokio::test]
    async fn sign_digest_round_trips_through_the_api() {
        let (_fake, signer) = signer();
        let key_id = signer
            .create_key("Signing key: t1", "alias/t1")
            .await
            .unwrap();

        let digest = Sha256::digest(b"payload");
        let signature = signer
            .sign_digest(&key_id, &digest, SigningScheme::RsaPkcs1v15Sha256)
            .await
            .unwrap();
        assert!(!signature.is_empty());

        let spki = signer.public_key(&key_id).await.unwrap();
        use rsa::pkcs8::DecodePublicKey;
        let public_key = rsa::RsaPublicKey::from_public_key_der(&spki).unwrap();
        public_key
            .verify(rsa::Pkcs1v15Sign::new::<Sha256>(), &digest, &signature)
            .unwrap();
    }

    #[tokio::test]
    async fn sign_digest_rejects_bad_digest_length_before_the_backend() {
        let (fake, signer) = signer();
        let key_id = signer
            .create_key("Signing key: t1", "alias/t1")
            .await
            .unwrap();

        let err = signer
            .sign_digest(&key_id, &[0u8; 16], SigningScheme::RsaPkcs1v15Sha256)
            .await
            .unwrap_err();
        assert!(matches!(err, KmsError::DigestLength { .. }));
        assert_eq!(fake.sign_calls(), 0, "backend must not be reached");
    }

    #[tokio::test]
    async fn delete_key_schedules_deletion_and_drops_the_alias() {
        let (fake, signer) = signer();
        let key_id = signer
            .create_key("Signing key: t1", "alias/t1")
            .await
            .unwrap();

        signer.delete_key("alias/t1").await.unwrap();
        assert!(fake.deletion_scheduled(&key_id));
        assert!(matches!(
            signer.public_key("alias/t1").await,
            Err(KmsError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn delete_of_unknown_alias_fails() {
        let (_fake, signer) = signer();
        assert!(matches!(
            signer.delete_key("alias/ghost").await,
            Err(KmsError::NotFound(_))
        ));
    }
}
