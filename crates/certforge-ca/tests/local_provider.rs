//! End-to-end issuance through the local KMS provider and the embedded
//! certificate store.

use std::path::Path;
use std::sync::Arc;

use certforge_ca::{
    pkcs7, CaError, CsrOptions, KmsProvider, LocalKmsProvider, COMMON_DEVICE_CERT_ISSUER,
};
use certforge_config::{CertTemplateConfig, CertificateAuthority, Config};
use certforge_kms::LocalKeyStore;
use certforge_store::{CertStore, LocalDbStore};
use uuid::Uuid;
use x509_parser::prelude::*;

fn test_config(data_dir: &Path, per_tenant_signing: bool) -> Config {
    Config {
        certificate_authority: CertificateAuthority {
            kms_provider: "local_kms".to_string(),
            cert_store: "localdb".to_string(),
            per_tenant_signing,
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

async fn provider(data_dir: &Path, per_tenant_signing: bool) -> LocalKmsProvider {
    let config = test_config(data_dir, per_tenant_signing);
    let store: Arc<dyn CertStore> = Arc::new(LocalDbStore::open(data_dir).unwrap());
    let signer = Arc::new(LocalKeyStore::new(data_dir).with_key_bits(2048));
    LocalKmsProvider::init_with(&config, store, signer)
        .await
        .unwrap()
}

fn small_csr() -> Vec<u8> {
    CsrOptions::new()
        .with_key_bits(2048)
        .generate()
        .unwrap()
        .into_der()
}

/// Splits a parent bundle into (tenant signing cert, root cert) DERs. The
/// root is the self-signed one.
fn split_bundle(bundle: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let certs = pkcs7::parse_bundle(bundle).unwrap();
    assert_eq!(certs.len(), 2, "bundle must carry the tenant and root certs");
    let mut tenant = None;
    let mut root = None;
    for der in certs {
        let self_signed = {
            let (_, cert) = X509Certificate::from_der(&der).unwrap();
            cert.subject() == cert.issuer()
        };
        if self_signed {
            root = Some(der);
        } else {
            tenant = Some(der);
        }
    }
    (tenant.expect("tenant cert"), root.expect("root cert"))
}

fn subject_cn(der: &[u8]) -> String {
    let (_, cert) = X509Certificate::from_der(der).unwrap();
    let cn = cert
        .subject()
        .iter_common_name()
        .next()
        .unwrap()
        .as_str()
        .unwrap()
        .to_string();
    cn
}

#[tokio::test]
async fn issues_a_device_certificate_under_the_common_signing_key() {
    let dir = tempfile::tempdir().unwrap();
    let provider = provider(dir.path(), false).await;

    // A true RSA-4096 enrollment CSR on this path.
    let csr = CsrOptions::new().generate().unwrap().into_der();
    let issued = provider
        .create_device_certificate("t1", &csr)
        .await
        .unwrap();

    // The device id is a fresh UUID and is bound into the subject CN.
    Uuid::parse_str(&issued.device_id).expect("device id must be a UUID");
    let (_, device) = X509Certificate::from_der(&issued.certificate).unwrap();
    let cn = device
        .subject()
        .iter_common_name()
        .next()
        .unwrap()
        .as_str()
        .unwrap();
    assert_eq!(cn, issued.device_id);

    // The tenant id rides in the 2.5.4.10 RDN, exactly once.
    let orgs: Vec<_> = device
        .subject()
        .iter_organization()
        .map(|o| o.as_str().unwrap().to_string())
        .collect();
    assert_eq!(orgs, vec!["t1".to_string()]);

    // Issued under the common signing certificate.
    let issuer_cn = device
        .issuer()
        .iter_common_name()
        .next()
        .unwrap()
        .as_str()
        .unwrap();
    assert_eq!(issuer_cn, COMMON_DEVICE_CERT_ISSUER);

    // The chain validates up to the root.
    let (tenant_der, root_der) = split_bundle(&issued.parent_bundle);
    let (_, tenant) = X509Certificate::from_der(&tenant_der).unwrap();
    let (_, root) = X509Certificate::from_der(&root_der).unwrap();
    device.verify_signature(Some(tenant.public_key())).unwrap();
    tenant.verify_signature(Some(root.public_key())).unwrap();
    root.verify_signature(None).unwrap();

    // One year lifetime, within a day of tolerance.
    let lifetime =
        device.validity().not_after.timestamp() - device.validity().not_before.timestamp();
    assert!((lifetime - 365 * 86_400).abs() < 86_400);
    let expiry_delta = issued.not_after.timestamp() - device.validity().not_after.timestamp();
    assert!(expiry_delta.abs() <= 1, "returned expiry must match the certificate");
}

#[tokio::test]
async fn renewal_reuses_the_device_id_with_a_fresh_serial() {
    let dir = tempfile::tempdir().unwrap();
    let provider = provider(dir.path(), false).await;

    let issued = provider
        .create_device_certificate("t1", &small_csr())
        .await
        .unwrap();
    let renewed = provider
        .renew_device_certificate("t1", &issued.device_id, &small_csr())
        .await
        .unwrap();

    assert_eq!(renewed.device_id, issued.device_id);

    let (_, first) = X509Certificate::from_der(&issued.certificate).unwrap();
    let (_, second) = X509Certificate::from_der(&renewed.certificate).unwrap();
    assert_ne!(first.serial, second.serial);
    assert_eq!(subject_cn(&renewed.certificate), issued.device_id);
}

#[tokio::test]
async fn per_tenant_signing_issues_under_the_tenant_certificate() {
    let dir = tempfile::tempdir().unwrap();
    let provider = provider(dir.path(), true).await;

    let cert_id = provider
        .create_tenant_signing_certificate("t2", "Acme")
        .await
        .unwrap();
    assert!(!cert_id.is_empty());
    assert!(hex::decode(&cert_id).is_ok(), "cert id must be hex");

    let issued = provider
        .create_device_certificate("t2", &small_csr())
        .await
        .unwrap();
    let (_, device) = X509Certificate::from_der(&issued.certificate).unwrap();
    let issuer_cn = device
        .issuer()
        .iter_common_name()
        .next()
        .unwrap()
        .as_str()
        .unwrap();
    assert_eq!(issuer_cn, "Device Certificate Issuer: Acme");

    // The tenant cert in the bundle chains to the root.
    let (tenant_der, root_der) = split_bundle(&issued.parent_bundle);
    let (_, tenant) = X509Certificate::from_der(&tenant_der).unwrap();
    let (_, root) = X509Certificate::from_der(&root_der).unwrap();
    device.verify_signature(Some(tenant.public_key())).unwrap();
    tenant.verify_signature(Some(root.public_key())).unwrap();
}

#[tokio::test]
async fn tenants_without_a_dedicated_key_fall_back_to_the_common_entry() {
    let dir = tempfile::tempdir().unwrap();
    let provider = provider(dir.path(), true).await;

    // No signing entry was created for this tenant.
    let issued = provider
        .create_device_certificate("t-fallback", &small_csr())
        .await
        .unwrap();

    let common_der = provider
        .get_tenant_signing_certificate(certforge_ca::COMMON_SIGNING_KEY_ID)
        .await
        .unwrap();
    let (_, device) = X509Certificate::from_der(&issued.certificate).unwrap();
    let (_, common) = X509Certificate::from_der(&common_der).unwrap();
    assert_eq!(device.issuer(), common.subject());
}

#[tokio::test]
async fn empty_tenant_id_is_a_bad_request() {
    let dir = tempfile::tempdir().unwrap();
    let provider = provider(dir.path(), false).await;

    let err = provider
        .create_device_certificate("", &small_csr())
        .await
        .unwrap_err();
    assert!(matches!(err, CaError::BadRequest(_)));
}

#[tokio::test]
async fn empty_csr_is_a_bad_request() {
    let dir = tempfile::tempdir().unwrap();
    let provider = provider(dir.path(), false).await;

    let err = provider
        .create_device_certificate("t3", &[])
        .await
        .unwrap_err();
    assert!(matches!(err, CaError::BadRequest(_)));
}

#[tokio::test]
async fn empty_device_id_on_renewal_is_a_bad_request() {
    let dir = tempfile::tempdir().unwrap();
    let provider = provider(dir.path(), false).await;

    let err = provider
        .renew_device_certificate("t3", "", &small_csr())
        .await
        .unwrap_err();
    assert!(matches!(err, CaError::BadRequest(_)));
}

#[tokio::test]
async fn rejected_csr_leaves_no_trace_in_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let provider = provider(dir.path(), true).await;

    // ECDSA is outside the fixed algorithm policy.
    let key_pair = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
    let ecdsa_csr = rcgen::CertificateParams::default()
        .serialize_request(&key_pair)
        .unwrap()
        .der()
        .as_ref()
        .to_vec();

    let err = provider
        .create_device_certificate("t4", &ecdsa_csr)
        .await
        .unwrap_err();
    assert!(matches!(err, CaError::BadRequest(_)));

    // No signing entry or key material appeared for the tenant.
    let err = provider
        .get_tenant_signing_certificate("t4")
        .await
        .unwrap_err();
    assert!(matches!(err, CaError::NotFound));
    assert!(!dir.path().join("t4.key").exists());
}

#[tokio::test]
async fn deleted_tenants_are_gone_from_store_and_key_ring() {
    let dir = tempfile::tempdir().unwrap();
    let provider = provider(dir.path(), true).await;

    provider
        .create_tenant_signing_certificate("t5", "Doomed")
        .await
        .unwrap();
    assert!(dir.path().join("t5.key").exists());

    provider.delete_tenant_signing_certificate("t5").await.unwrap();
    assert!(!dir.path().join("t5.key").exists());

    let err = provider
        .get_tenant_signing_certificate("t5")
        .await
        .unwrap_err();
    assert!(matches!(err, CaError::NotFound));
}

#[tokio::test]
async fn ca_material_survives_provider_restart() {
    let dir = tempfile::tempdir().unwrap();

    let first_root = {
        let provider = provider(dir.path(), false).await;
        let issued = provider
            .create_device_certificate("t6", &small_csr())
            .await
            .unwrap();
        provider.shutdown().await;
        split_bundle(&issued.parent_bundle).1
    };

    // A second start must reload the same root; certificates issued before
    // the restart keep chaining to it.
    let provider = provider(dir.path(), false).await;
    let issued = provider
        .create_device_certificate("t7", &small_csr())
        .await
        .unwrap();
    let (_, root_der) = split_bundle(&issued.parent_bundle);
    assert_eq!(root_der, first_root);
}

#[tokio::test]
async fn get_tenant_signing_certificate_requires_a_tenant_id() {
    let dir = tempfile::tempdir().unwrap();
    let provider = provider(dir.path(), false).await;

    let err = provider.get_tenant_signing_certificate("").await.unwrap_err();
    assert!(matches!(err, CaError::BadRequest(_)));
}
