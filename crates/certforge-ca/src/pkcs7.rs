//! Degenerate PKCS#7 "certs-only" bundles.
//!
//! The parent chain of an issued device certificate is returned as a
//! `SignedData` structure (RFC 5652) carrying certificates and nothing
//! else: no signed content, no digest algorithms, no signer infos. Only the
//! degenerate subset is modelled here. DER canonicalizes the certificate
//! SET, so the encoding is deterministic regardless of the order the chain
//! is supplied in.

use der::asn1::{ObjectIdentifier, SetOfVec};
use der::{Any, Decode, Encode, Sequence};
use x509_cert::Certificate;

use crate::{CaError, Result};

/// OID of the PKCS#7 signed-data content type.
const ID_SIGNED_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.2");

/// OID of the PKCS#7 data content type.
const ID_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.1");

/// `ContentInfo` wrapping a signed-data payload.
#[derive(Debug, Sequence)]
struct ContentInfo {
    content_type: ObjectIdentifier,
    #[asn1(context_specific = "0", tag_mode = "EXPLICIT")]
    content: Any,
}

/// `EncapsulatedContentInfo` with the content omitted.
#[derive(Debug, Sequence)]
struct EncapsulatedContentInfo {
    econtent_type: ObjectIdentifier,
    #[asn1(context_specific = "0", tag_mode = "EXPLICIT", optional = "true")]
    econtent: Option<Any>,
}

/// The certs-only subset of `SignedData`.
#[derive(Debug, Sequence)]
struct DegenerateSignedData {
    version: u8,
    digest_algorithms: SetOfVec<Any>,
    encap_content_info: EncapsulatedContentInfo,
    #[asn1(context_specific = "0", tag_mode = "IMPLICIT", optional = "true")]
    certificates: Option<SetOfVec<Certificate>>,
    signer_infos: SetOfVec<Any>,
}

fn encode_err(e: impl std::fmt::Display) -> CaError {
    CaError::Internal(format!("failed to build degenerate PKCS7 object: {e}"))
}

/// Builds a degenerate certs-only bundle from DER-encoded certificates.
pub fn degenerate_bundle(cert_ders: &[&[u8]]) -> Result<Vec<u8>> {
    let mut certs = Vec::with_capacity(cert_ders.len());
    for der in cert_ders {
        certs.push(Certificate::from_der(der).map_err(encode_err)?);
    }

    let signed_data = DegenerateSignedData {
        version: 1,
        digest_algorithms: SetOfVec::new(),
        encap_content_info: EncapsulatedContentInfo {
            econtent_type: ID_DATA,
            econtent: None,
        },
        certificates: Some(SetOfVec::try_from(certs).map_err(encode_err)?),
        signer_infos: SetOfVec::new(),
    };

    let content_info = ContentInfo {
        content_type: ID_SIGNED_DATA,
        content: Any::encode_from(&signed_data).map_err(encode_err)?,
    };
    content_info.to_der().map_err(encode_err)
}

/// Extracts the DER certificates from a certs-only bundle. Used by tests and
/// enrollment-side consumers of the parent chain.
pub fn parse_bundle(bundle: &[u8]) -> Result<Vec<Vec<u8>>> {
    let content_info = ContentInfo::from_der(bundle)
        .map_err(|e| CaError::Internal(format!("failed to parse PKCS7 object: {e}")))?;
    if content_info.content_type != ID_SIGNED_DATA {
        return Err(CaError::Internal(format!(
            "unexpected PKCS7 content type {}",
            content_info.content_type
        )));
    }

    let signed_data: DegenerateSignedData = content_info
        .content
        .decode_as()
        .map_err(|e| CaError::Internal(format!("failed to parse PKCS7 signed data: {e}")))?;

    let mut certs = Vec::new();
    if let Some(set) = signed_data.certificates {
        for certificate in set.iter() {
            certs.push(
                certificate
                    .to_der()
                    .map_err(|e| CaError::Internal(e.to_string()))?,
            );
        }
    }
    Ok(certs)
}
