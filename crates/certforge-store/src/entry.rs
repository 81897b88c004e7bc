//! Wire encoding of signing certificate entries.
//!
//! Entries are stored as self-describing tagged binary (CBOR maps keyed by
//! field name). The wire field names are part of the storage contract and
//! must not change: `TenantID`, `KmsKeyID`, `Certificate`.

use serde::{Deserialize, Serialize};

use crate::{Result, StoreError};

/// A signing certificate persisted in the certificate store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningCertificateEntry {
    /// The unique identifier for the tenant represented by this entry.
    #[serde(rename = "TenantID")]
    pub tenant_id: String,

    /// The KMS key id of the signing key for this tenant. Empty when the
    /// KMS backend does not expose key handles (the local signer stores
    /// keys as files keyed by tenant id).
    #[serde(rename = "KmsKeyID")]
    pub kms_key_id: String,

    /// The DER-encoded signed X.509 signing certificate.
    #[serde(rename = "Certificate", with = "serde_bytes_compat")]
    pub certificate: Vec<u8>,
}

/// Serializes the certificate bytes as a CBOR byte string rather than an
/// array of integers.
mod serde_bytes_compat {
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        struct BytesVisitor;

        impl<'de> serde::de::Visitor<'de> for BytesVisitor {
            type Value = Vec<u8>;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a byte string")
            }

            fn visit_bytes<E: serde::de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
                Ok(v.to_vec())
            }

            fn visit_byte_buf<E: serde::de::Error>(self, v: Vec<u8>) -> Result<Self::Value, E> {
                Ok(v)
            }

            fn visit_seq<A: serde::de::SeqAccess<'de>>(
                self,
                mut seq: A,
            ) -> Result<Self::Value, A::Error> {
                let mut out = Vec::with_capacity(seq.size_hint().unwrap_or(0));
                while let Some(byte) = seq.next_element::<u8>()? {
                    out.push(byte);
                }
                Ok(out)
            }
        }

        deserializer.deserialize_any(BytesVisitor)
    }
}

/// Encodes a signing certificate entry for storage.
pub fn encode_entry(entry: &SigningCertificateEntry) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    ciborium::ser::into_writer(entry, &mut buffer)
        .map_err(|e| StoreError::Encoding(e.to_string()))?;
    Ok(buffer)
}

/// Decodes a signing certificate entry read back from storage.
pub fn decode_entry(encoded: &[u8]) -> Result<SigningCertificateEntry> {
    ciborium::de::from_reader(encoded).map_err(|e| StoreError::Encoding(e.to_string()))
}
