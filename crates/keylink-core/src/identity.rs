//! This device's identifier and its record in the account device directory.

use tracing::{debug, info};

use keylink_crypto::generate_device_id;

use crate::errors::{CoreError, CoreResult, InputError};
use crate::relay::Relay;
use crate::secret_store::{load_device_id, store_device_id, SecretStore};
use crate::types::{Device, DeviceInfo};

#[derive(Debug, Clone)]
pub struct DeviceIdentity {
    device_id: String,
    record: Device,
}

impl DeviceIdentity {
    /// Reuse the stored device id or generate and register a new one.
    pub async fn load_or_register(
        relay: &dyn Relay,
        secrets: &dyn SecretStore,
        info: &DeviceInfo,
    ) -> CoreResult<Self> {
        if let Some(device_id) = load_device_id(secrets).await? {
            let record = match relay.get_device(&device_id).await {
                Ok(record) => record,
                Err(CoreError::Input(InputError::UnknownDevice)) => {
                    debug!(device_id = %device_id, "stored device unknown to relay, registering");
                    relay.register_device(&device_id, info).await?
                }
                Err(e) => return Err(e),
            };
            return Ok(Self { device_id, record });
        }

        let device_id = generate_device_id()?;
        let record = relay.register_device(&device_id, info).await?;
        store_device_id(secrets, &device_id).await?;
        info!(device_id = %device_id, "registered new device");
        Ok(Self { device_id, record })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn record(&self) -> &Device {
        &self.record
    }

    pub(crate) fn update(&mut self, record: Device) {
        self.record = record;
    }

    /// Refresh `lastSeenAt` at the relay.
    pub async fn heartbeat(&mut self, relay: &dyn Relay) -> CoreResult<Device> {
        let record = relay.heartbeat(&self.device_id).await?;
        self.record = record.clone();
        Ok(record)
    }

    pub async fn rename(&mut self, relay: &dyn Relay, name: &str) -> CoreResult<Device> {
        let record = relay.rename_device(&self.device_id, name).await?;
        self.record = record.clone();
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::clock::ManualClock;
    use crate::memory_relay::{AccountPolicy, MemoryRelay};
    use crate::secret_store::MemorySecretStore;
    use crate::types::TrustState;

    fn info() -> DeviceInfo {
        DeviceInfo {
            name: "Phone".into(),
            platform: "ios".into(),
            app_version: "2.3.0".into(),
            os_version: Some("17.4".into()),
        }
    }

    #[tokio::test]
    async fn test_register_then_reload_keeps_id() {
        let clock = Arc::new(ManualClock::default());
        let relay = MemoryRelay::new(AccountPolicy::default(), clock.clone());
        let secrets = MemorySecretStore::new();

        let first = DeviceIdentity::load_or_register(&relay, &secrets, &info())
            .await
            .unwrap();
        assert_eq!(first.record().trust_state, TrustState::Untrusted);
        assert_eq!(first.record().os_version.as_deref(), Some("17.4"));

        let again = DeviceIdentity::load_or_register(&relay, &secrets, &info())
            .await
            .unwrap();
        assert_eq!(again.device_id(), first.device_id());
        assert_eq!(relay.list_devices(first.device_id()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_heartbeat_and_rename() {
        let clock = Arc::new(ManualClock::default());
        let relay = MemoryRelay::new(AccountPolicy::default(), clock.clone());
        let secrets = MemorySecretStore::new();
        let mut identity = DeviceIdentity::load_or_register(&relay, &secrets, &info())
            .await
            .unwrap();
        let before = identity.record().last_seen_at;

        clock.advance_secs(30);
        let record = identity.heartbeat(&relay).await.unwrap();
        assert_eq!(record.last_seen_at - before, chrono::Duration::seconds(30));

        identity.rename(&relay, "  Work phone ").await.unwrap();
        assert_eq!(identity.record().name, "Work phone");
    }
}
