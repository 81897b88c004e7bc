//! In-memory KMS fake for tests.
//!
//! Implements [`KmsApi`] with process-local RSA keys so the AWS signer and
//! the providers above it can be exercised without cloud credentials.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use rsa::pkcs8::EncodePublicKey;
use rsa::{Pkcs1v15Sign, RsaPrivateKey};
use sha2::Sha256;

use crate::aws::KmsApi;
use crate::{KmsError, Result};

struct FakeKey {
    key: RsaPrivateKey,
    deletion_scheduled: bool,
}

/// An in-memory stand-in for AWS KMS.
pub struct FakeKms {
    keys: Mutex<HashMap<String, FakeKey>>,
    aliases: Mutex<HashMap<String, String>>,
    next_id: AtomicU64,
    sign_calls: AtomicU64,
    key_bits: usize,
}

impl FakeKms {
    /// Creates a fake generating keys of the given size.
    pub fn new(key_bits: usize) -> Self {
        Self {
            keys: Mutex::new(HashMap::new()),
            aliases: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            sign_calls: AtomicU64::new(0),
            key_bits,
        }
    }

    /// Number of sign requests that reached the fake.
    pub fn sign_calls(&self) -> u64 {
        self.sign_calls.load(Ordering::SeqCst)
    }

    /// Whether deletion has been scheduled for the given key id.
    pub fn deletion_scheduled(&self, key_id: &str) -> bool {
        self.keys
            .lock()
            .unwrap()
            .get(key_id)
            .map(|k| k.deletion_scheduled)
            .unwrap_or(false)
    }

    /// Number of keys currently held (scheduled deletions included).
    pub fn key_count(&self) -> usize {
        self.keys.lock().unwrap().len()
    }

    fn resolve(&self, key_id_or_alias: &str) -> Result<String> {
        if self.keys.lock().unwrap().contains_key(key_id_or_alias) {
            return Ok(key_id_or_alias.to_string());
        }
        self.aliases
            .lock()
            .unwrap()
            .get(key_id_or_alias)
            .cloned()
            .ok_or_else(|| KmsError::NotFound(key_id_or_alias.to_string()))
    }
}

#[async_trait]
impl KmsApi for FakeKms {
    async fn describe_key(&self, key_id: &str) -> Result<String> {
        self.resolve(key_id)
    }

    async fn create_key(&self, _description: &str) -> Result<String> {
        let mut rng = rand::thread_rng();
        let key = RsaPrivateKey::new(&mut rng, self.key_bits)
            .map_err(|e| KmsError::Backend(e.to_string()))?;
        let key_id = format!("fake-key-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.keys.lock().unwrap().insert(
            key_id.clone(),
            FakeKey {
                key,
                deletion_scheduled: false,
            },
        );
        Ok(key_id)
    }

    async fn create_alias(&self, alias: &str, target_key_id: &str) -> Result<()> {
        if !self.keys.lock().unwrap().contains_key(target_key_id) {
            return Err(KmsError::NotFound(target_key_id.to_string()));
        }
        self.aliases
            .lock()
            .unwrap()
            .insert(alias.to_string(), target_key_id.to_string());
        Ok(())
    }

    async fn delete_alias(&self, alias: &str) -> Result<()> {
        self.aliases
            .lock()
            .unwrap()
            .remove(alias)
            .map(|_| ())
            .ok_or_else(|| KmsError::NotFound(alias.to_string()))
    }

    async fn schedule_key_deletion(&self, key_id: &str, _pending_window_days: i32) -> Result<()> {
        let mut keys = self.keys.lock().unwrap();
        let key = keys
            .get_mut(key_id)
            .ok_or_else(|| KmsError::NotFound(key_id.to_string()))?;
        key.deletion_scheduled = true;
        Ok(())
    }

    async fn get_public_key(&self, key_id: &str) -> Result<Vec<u8>> {
        let resolved = self.resolve(key_id)?;
        let keys = self.keys.lock().unwrap();
        let key = keys
            .get(&resolved)
            .ok_or_else(|| KmsError::NotFound(resolved.clone()))?;
        Ok(key
            .key
            .to_public_key()
            .to_public_key_der()
            .map_err(|e| KmsError::KeyMaterial(e.to_string()))?
            .as_bytes()
            .to_vec())
    }

    async fn sign_digest(&self, key_id: &str, digest: &[u8]) -> Result<Vec<u8>> {
        self.sign_calls.fetch_add(1, Ordering::SeqCst);
        let resolved = self.resolve(key_id)?;
        let keys = self.keys.lock().unwrap();
        let key = keys
            .get(&resolved)
            .ok_or_else(|| KmsError::NotFound(resolved.clone()))?;
        key.key
            .sign(Pkcs1v15Sign::new::<Sha256>(), digest)
            .map_err(|e| KmsError::Backend(e.to_string()))
    }
}
