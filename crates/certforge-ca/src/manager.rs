//! Certificate manager: selects and initializes the configured KMS provider
//! at startup and hands the provider to the caller. Initialization failure
//! is fatal.

use std::sync::Arc;

use certforge_config::{Config, KmsProviderKind};
use tracing::{error, info};

use crate::provider::{AwsKmsProvider, KmsProvider, LocalKmsProvider};
use crate::Result;

/// Startup entry point of the issuance engine.
pub struct CertificateManager;

impl CertificateManager {
    /// Initializes the certificate manager and the KMS provider selected by
    /// the configuration.
    pub async fn init(config: &Config) -> Result<Arc<dyn KmsProvider>> {
        config.validate()?;

        match config.kms_provider()? {
            KmsProviderKind::Aws => {
                let provider = AwsKmsProvider::init(config).await.map_err(|e| {
                    error!("failed to initialize the certificate authority with the AWS KMS provider");
                    e
                })?;
                info!("initialized the certificate authority with the AWS KMS provider");
                Ok(Arc::new(provider))
            }
            KmsProviderKind::Local => {
                // Recommended for test mode only; keys are not hardware bound.
                let provider = LocalKmsProvider::init(config).await.map_err(|e| {
                    error!("failed to initialize the certificate authority with the local KMS provider");
                    e
                })?;
                info!("initialized the certificate authority with the local KMS provider");
                Ok(Arc::new(provider))
            }
        }
    }
}
