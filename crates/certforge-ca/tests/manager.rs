//! Startup behaviour of the certificate manager.

use std::path::Path;

use certforge_ca::{CaError, CertificateManager, CsrOptions, KmsProvider};
use certforge_config::{CertTemplateConfig, CertificateAuthority, Config};
use uuid::Uuid;

fn local_config(data_dir: &Path) -> Config {
    Config {
        certificate_authority: CertificateAuthority {
            kms_provider: "local_kms".to_string(),
            cert_store: "localdb".to_string(),
            per_tenant_signing: false,
            cert_template: CertTemplateConfig {
                issuer_name: "Test Device Root CA".to_string(),
                country: "US".to_string(),
                province: "California".to_string(),
                locality: "Palo Alto".to_string(),
                street_address: "1501 Page Mill Road".to_string(),
                postal_code: "94304".to_string(),
                organization: "Test Inc.".to_string(),
            },
            data_dir: data_dir.to_path_buf(),
        },
        test_mode: true,
    }
}

#[tokio::test]
async fn initializes_the_local_provider_and_issues() {
    let dir = tempfile::tempdir().unwrap();
    let provider = CertificateManager::init(&local_config(dir.path()))
        .await
        .unwrap();

    let csr = CsrOptions::new().with_key_bits(2048).generate().unwrap();
    let issued = provider
        .create_device_certificate("t1", csr.der())
        .await
        .unwrap();
    Uuid::parse_str(&issued.device_id).unwrap();

    provider.shutdown().await;
}

#[tokio::test]
async fn rejects_an_unsupported_kms_provider() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = local_config(dir.path());
    config.certificate_authority.kms_provider = "vault".to_string();

    let err = CertificateManager::init(&config).await.unwrap_err();
    assert!(matches!(err, CaError::Config(_)));
}

#[tokio::test]
async fn rejects_an_incomplete_certificate_template() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = local_config(dir.path());
    config.certificate_authority.cert_template.organization = String::new();

    let err = CertificateManager::init(&config).await.unwrap_err();
    assert!(matches!(err, CaError::Config(_)));
}
