//! [`Relay`] over HTTPS with JSON bodies.
//!
//! The calling device is sent in the `x-keylink-device` header. Error bodies
//! are [`WireError`]s; 5xx responses and connection failures map to
//! `CoreError::Transport`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::errors::{CoreError, CoreResult, WireError};
use crate::relay::Relay;
use crate::types::{
    ClaimResponse, CreatedSession, Device, DeviceInfo, OutgoingMessage, PairingMessage,
    PairingPolicy, PollResponse, SessionStatus, SyncStatus,
};

pub const DEVICE_HEADER: &str = "x-keylink-device";

#[derive(Clone)]
pub struct HttpRelayClient {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterBody<'a> {
    device_id: &'a str,
    #[serde(flatten)]
    info: &'a DeviceInfo,
}

#[derive(Serialize)]
struct RenameBody<'a> {
    name: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateBody<'a> {
    code_hash: &'a str,
    issuer_public_key: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ClaimBody<'a> {
    code_hash: &'a str,
    claimer_public_key: &'a str,
}

#[derive(Serialize)]
struct CompleteBody {
    version: u32,
}

#[derive(serde::Deserialize)]
struct StatusBody {
    status: SessionStatus,
}

fn transport(e: reqwest::Error) -> CoreError {
    CoreError::Transport(e.to_string())
}

impl HttpRelayClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> CoreResult<Self> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .build()
            .map_err(transport)?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1{}", self.base_url, path)
    }

    fn request(&self, method: Method, path: &str, caller: &str) -> RequestBuilder {
        self.client
            .request(method, self.url(path))
            .header(DEVICE_HEADER, caller)
    }

    async fn call<T: DeserializeOwned>(&self, req: RequestBuilder) -> CoreResult<T> {
        let resp = req.send().await.map_err(transport)?;
        let status = resp.status();
        if status.is_success() {
            return resp
                .json::<T>()
                .await
                .map_err(|e| CoreError::Transport(format!("bad response: {e}")));
        }
        if status.is_server_error() {
            return Err(CoreError::Transport(format!("status={status}")));
        }
        match resp.json::<WireError>().await {
            Ok(err) => Err(CoreError::from_wire(&err)),
            Err(_) => Err(CoreError::Transport(format!("status={status}"))),
        }
    }

    async fn session_action(
        &self,
        caller: &str,
        session_id: &str,
        action: &str,
    ) -> CoreResult<SessionStatus> {
        let path = format!("/pairing/sessions/{session_id}/{action}");
        let body: StatusBody = self.call(self.request(Method::POST, &path, caller)).await?;
        Ok(body.status)
    }
}

#[async_trait]
impl Relay for HttpRelayClient {
    async fn register_device(&self, device_id: &str, info: &DeviceInfo) -> CoreResult<Device> {
        let req = self
            .request(Method::POST, "/devices", device_id)
            .json(&RegisterBody { device_id, info });
        self.call(req).await
    }

    async fn get_device(&self, device_id: &str) -> CoreResult<Device> {
        let path = format!("/devices/{device_id}");
        self.call(self.request(Method::GET, &path, device_id)).await
    }

    async fn list_devices(&self, caller: &str) -> CoreResult<Vec<Device>> {
        self.call(self.request(Method::GET, "/devices", caller)).await
    }

    async fn heartbeat(&self, device_id: &str) -> CoreResult<Device> {
        let path = format!("/devices/{device_id}/heartbeat");
        self.call(self.request(Method::POST, &path, device_id)).await
    }

    async fn rename_device(&self, device_id: &str, name: &str) -> CoreResult<Device> {
        let path = format!("/devices/{device_id}");
        let req = self
            .request(Method::PATCH, &path, device_id)
            .json(&RenameBody { name });
        self.call(req).await
    }

    async fn revoke_device(&self, caller: &str, target: &str) -> CoreResult<Device> {
        let path = format!("/devices/{target}/revoke");
        self.call(self.request(Method::POST, &path, caller)).await
    }

    async fn sync_status(&self) -> CoreResult<SyncStatus> {
        self.call(self.client.get(self.url("/sync/status"))).await
    }

    async fn enable_encryption(&self, caller: &str) -> CoreResult<SyncStatus> {
        self.call(self.request(Method::POST, "/sync/enable", caller))
            .await
    }

    async fn reset_sync(&self, caller: &str) -> CoreResult<SyncStatus> {
        self.call(self.request(Method::POST, "/sync/reset", caller))
            .await
    }

    async fn set_pairing_policy(
        &self,
        caller: &str,
        policy: &PairingPolicy,
    ) -> CoreResult<SyncStatus> {
        let req = self.request(Method::PUT, "/sync/policy", caller).json(policy);
        self.call(req).await
    }

    async fn create_session(
        &self,
        caller: &str,
        code_hash: &str,
        issuer_public_key: &str,
    ) -> CoreResult<CreatedSession> {
        let req = self
            .request(Method::POST, "/pairing/sessions", caller)
            .json(&CreateBody {
                code_hash,
                issuer_public_key,
            });
        self.call(req).await
    }

    async fn claim_session(
        &self,
        caller: &str,
        code_hash: &str,
        claimer_public_key: &str,
    ) -> CoreResult<ClaimResponse> {
        let req = self
            .request(Method::POST, "/pairing/claim", caller)
            .json(&ClaimBody {
                code_hash,
                claimer_public_key,
            });
        self.call(req).await
    }

    async fn begin_verification(&self, caller: &str, session_id: &str)
        -> CoreResult<SessionStatus> {
        self.session_action(caller, session_id, "verify").await
    }

    async fn approve_session(&self, caller: &str, session_id: &str) -> CoreResult<SessionStatus> {
        self.session_action(caller, session_id, "approve").await
    }

    async fn cancel_session(&self, caller: &str, session_id: &str) -> CoreResult<SessionStatus> {
        self.session_action(caller, session_id, "cancel").await
    }

    async fn send_message(
        &self,
        caller: &str,
        session_id: &str,
        message: &OutgoingMessage,
    ) -> CoreResult<PairingMessage> {
        let path = format!("/pairing/sessions/{session_id}/messages");
        let req = self.request(Method::POST, &path, caller).json(message);
        self.call(req).await
    }

    async fn poll_session(
        &self,
        caller: &str,
        session_id: &str,
        cursor: u64,
    ) -> CoreResult<PollResponse> {
        let path = format!("/pairing/sessions/{session_id}?cursor={cursor}");
        self.call(self.request(Method::GET, &path, caller)).await
    }

    async fn mark_trusted(
        &self,
        caller: &str,
        session_id: &str,
        version: u32,
    ) -> CoreResult<Device> {
        let path = format!("/pairing/sessions/{session_id}/complete");
        let req = self
            .request(Method::POST, &path, caller)
            .json(&CompleteBody { version });
        self.call(req).await
    }
}
