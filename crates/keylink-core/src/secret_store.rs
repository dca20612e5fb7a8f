//! Device-local secret storage.
//!
//! The [`SecretStore`] trait is implemented by the platform keychain in a
//! deployed app; [`MemorySecretStore`] backs tests and the demo. Values are
//! handed out as [`Zeroizing`] buffers.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use zeroize::Zeroizing;

use keylink_crypto::{RootKey, KEY_LEN};

use crate::errors::{CoreError, CoreResult};

/// Name under which the device id is stored.
pub const DEVICE_ID: &str = "device_id";
/// Name of the current key version.
pub const KEY_VERSION: &str = "key_version";

fn root_key_name(version: u32) -> String {
    format!("root_key.v{version}")
}

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get(&self, name: &str) -> CoreResult<Option<Zeroizing<Vec<u8>>>>;
    async fn set(&self, name: &str, value: &[u8]) -> CoreResult<()>;
    async fn delete(&self, name: &str) -> CoreResult<()>;
}

#[derive(Default)]
pub struct MemorySecretStore {
    inner: RwLock<HashMap<String, Zeroizing<Vec<u8>>>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get(&self, name: &str) -> CoreResult<Option<Zeroizing<Vec<u8>>>> {
        Ok(self.inner.read().await.get(name).cloned())
    }

    async fn set(&self, name: &str, value: &[u8]) -> CoreResult<()> {
        self.inner
            .write()
            .await
            .insert(name.to_string(), Zeroizing::new(value.to_vec()));
        Ok(())
    }

    async fn delete(&self, name: &str) -> CoreResult<()> {
        self.inner.write().await.remove(name);
        Ok(())
    }
}

pub async fn load_device_id(store: &dyn SecretStore) -> CoreResult<Option<String>> {
    match store.get(DEVICE_ID).await? {
        Some(raw) => String::from_utf8(raw.to_vec())
            .map(Some)
            .map_err(|_| CoreError::Store("stored device id is not utf-8".into())),
        None => Ok(None),
    }
}

pub async fn store_device_id(store: &dyn SecretStore, device_id: &str) -> CoreResult<()> {
    store.set(DEVICE_ID, device_id.as_bytes()).await
}

/// Store the root key for `version` and make it current.
///
/// Keys of earlier versions are kept so older ciphertexts stay readable.
pub async fn store_root_key(store: &dyn SecretStore, root: &RootKey, version: u32) -> CoreResult<()> {
    store.set(&root_key_name(version), root.as_bytes()).await?;
    store.set(KEY_VERSION, &version.to_be_bytes()).await
}

pub async fn current_key_version(store: &dyn SecretStore) -> CoreResult<Option<u32>> {
    match store.get(KEY_VERSION).await? {
        Some(raw) => {
            let bytes: [u8; 4] = raw
                .as_slice()
                .try_into()
                .map_err(|_| CoreError::Store("corrupt key version".into()))?;
            Ok(Some(u32::from_be_bytes(bytes)))
        }
        None => Ok(None),
    }
}

pub async fn load_root_key(store: &dyn SecretStore, version: u32) -> CoreResult<Option<RootKey>> {
    match store.get(&root_key_name(version)).await? {
        Some(raw) => {
            let bytes: [u8; KEY_LEN] = raw
                .as_slice()
                .try_into()
                .map_err(|_| CoreError::Store("corrupt root key".into()))?;
            Ok(Some(RootKey::from_bytes(bytes)))
        }
        None => Ok(None),
    }
}

/// The current root key and its version, if this device holds one.
pub async fn load_current_root_key(store: &dyn SecretStore) -> CoreResult<Option<(RootKey, u32)>> {
    let Some(version) = current_key_version(store).await? else {
        return Ok(None);
    };
    Ok(load_root_key(store, version).await?.map(|k| (k, version)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use keylink_crypto::generate_root_key;

    #[tokio::test]
    async fn test_device_id_round_trip() {
        let store = MemorySecretStore::new();
        assert_eq!(load_device_id(&store).await.unwrap(), None);
        store_device_id(&store, "abc").await.unwrap();
        assert_eq!(load_device_id(&store).await.unwrap().as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn test_root_keys_are_kept_per_version() {
        let store = MemorySecretStore::new();
        let v1 = generate_root_key().unwrap();
        let v2 = generate_root_key().unwrap();
        store_root_key(&store, &v1, 1).await.unwrap();
        store_root_key(&store, &v2, 2).await.unwrap();

        let (current, version) = load_current_root_key(&store).await.unwrap().unwrap();
        assert_eq!(version, 2);
        assert_eq!(current, v2);
        assert_eq!(load_root_key(&store, 1).await.unwrap(), Some(v1));
        assert_eq!(load_root_key(&store, 3).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_corrupt_key_is_store_error() {
        let store = MemorySecretStore::new();
        store.set(KEY_VERSION, &[0, 0, 0, 1]).await.unwrap();
        store.set("root_key.v1", b"short").await.unwrap();
        assert!(matches!(
            load_current_root_key(&store).await,
            Err(CoreError::Store(_))
        ));
    }

    #[tokio::test]
    async fn test_delete() {
        let store = MemorySecretStore::new();
        store.set("x", b"1").await.unwrap();
        store.delete("x").await.unwrap();
        assert!(store.get("x").await.unwrap().is_none());
    }
}
