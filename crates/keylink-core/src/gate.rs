//! Gate between the trust state and the sync data pipeline.
//!
//! Sync code never touches root keys directly. It asks the [`SyncGate`] for
//! the derived key of the current version, and the gate refuses with
//! `NeedsRepairing` unless the device is trusted at that version.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

use keylink_crypto::{derive_key, DerivedKey};

use crate::errors::{CoreError, CoreResult};
use crate::secret_store::{load_root_key, SecretStore};
use crate::trust::TrustSnapshot;

#[derive(Clone)]
pub struct SyncGate {
    trust: watch::Receiver<TrustSnapshot>,
    secrets: Arc<dyn SecretStore>,
}

impl SyncGate {
    pub fn new(trust: watch::Receiver<TrustSnapshot>, secrets: Arc<dyn SecretStore>) -> Self {
        Self { trust, secrets }
    }

    /// Key version sync may run with right now.
    pub fn check(&self) -> CoreResult<u32> {
        self.trust.borrow().require_current()
    }

    pub async fn derived_key(&self) -> CoreResult<DerivedKey> {
        let version = self.check()?;
        self.key_for(version).await
    }

    /// Encrypt a record under the current derived key.
    ///
    /// Returns the key version alongside the ciphertext; callers store both.
    pub async fn encrypt(&self, plaintext: &[u8]) -> CoreResult<(u32, Vec<u8>)> {
        let key = self.derived_key().await?;
        Ok((key.version(), key.encrypt(plaintext)?))
    }

    pub async fn decrypt(&self, ciphertext: &[u8]) -> CoreResult<Vec<u8>> {
        let key = self.derived_key().await?;
        Ok(key.decrypt(ciphertext)?)
    }

    /// Decrypt data written under an older key version.
    ///
    /// Still requires the device to be trusted at the current version. Works
    /// for any version whose root key this device holds.
    pub async fn decrypt_with_version(&self, version: u32, ciphertext: &[u8]) -> CoreResult<Vec<u8>> {
        let current = self.check()?;
        if version > current {
            return Err(CoreError::invalid_state(format!(
                "key version {version} is newer than current {current}"
            )));
        }
        let key = self.key_for(version).await?;
        Ok(key.decrypt(ciphertext)?)
    }

    async fn key_for(&self, version: u32) -> CoreResult<DerivedKey> {
        let Some(root) = load_root_key(&*self.secrets, version).await? else {
            debug!(version, "root key missing for version");
            return Err(self.trust.borrow().needs_repairing());
        };
        Ok(derive_key(&root, version)?)
    }
}
