use std::time::Duration;

use caph_domain::Fingerprint;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::RemoteError;

/// Credentials resolved fresh for each call — never cached across
/// reconciles, so a rotated Robot password takes effect on the very next
/// call rather than waiting for some cache TTL.
#[derive(Debug, Clone)]
pub struct RobotCredentials {
    pub user: String,
    pub password: String,
}

/// The subset of Robot's reset types this crate drives directly. `Ssh` and
/// `Manual` reboots never reach this client — SSH reboots run over an SSH
/// session and manual ones require a human.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RobotResetType {
    Software,
    Hardware,
    Power,
}

impl RobotResetType {
    fn as_api_str(&self) -> &'static str {
        match self {
            RobotResetType::Software => "sw",
            RobotResetType::Hardware => "hw",
            RobotResetType::Power => "power",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RobotServer {
    pub server_ip: Option<String>,
    pub server_number: u64,
    pub server_name: String,
    pub status: String,
    #[serde(default)]
    pub reset: bool,
    #[serde(default)]
    pub rescue: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RescueConfig {
    pub server_ip: Option<String>,
    pub server_number: u64,
    pub os: String,
    pub active: bool,
    #[serde(default)]
    pub authorized_key: Vec<SshKeyFingerprintRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SshKeyFingerprintRef {
    pub fingerprint: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SshKeyRecord {
    pub name: String,
    pub fingerprint: String,
    #[serde(rename = "type")]
    pub key_type: String,
    pub size: u32,
}

impl SshKeyRecord {
    /// Robot returns either a SHA-256 hex digest or, for older keys, the
    /// legacy MD5-colon form. `parse_legacy` accepts both.
    pub fn parsed_fingerprint(&self) -> Result<Fingerprint, caph_domain::DomainError> {
        Fingerprint::parse_legacy(&self.fingerprint)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BootConfig {
    pub server_number: u64,
    #[serde(default)]
    pub rescue: Option<RescueConfig>,
}

/// Typed wrapper over Hetzner Robot's REST API. The base URL is pluggable
/// so tests can point it at a local mock server instead of the real
/// vendor endpoint.
#[derive(Clone)]
pub struct RobotClient {
    http: reqwest::Client,
    base_url: String,
}

impl Default for RobotClient {
    fn default() -> Self {
        Self::new()
    }
}

impl RobotClient {
    pub fn new() -> Self {
        Self::with_base_url("https://robot-ws.your-server.de")
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self { http: reqwest::Client::new(), base_url: base_url.into() }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Turn a Robot HTTP response into a typed value or a classified error.
    /// 401/403 and other 4xx (besides 404/429) are permanent — retrying
    /// without operator intervention will not help. 404 is terminal for the
    /// resource looked up. 429 carries a `Retry-After` the caller should
    /// honor cluster-wide. 5xx is transient.
    async fn handle<T: serde::de::DeserializeOwned>(&self, resp: reqwest::Response) -> Result<T, RemoteError> {
        let status = resp.status();
        if status.is_success() {
            return resp.json().await.map_err(|e| RemoteError::Transient(e.to_string()));
        }
        let retry_after = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let body: Value = resp.json().await.unwrap_or_default();
        let message = body["error"]["message"].as_str().unwrap_or("unknown error").to_string();

        match status.as_u16() {
            404 => Err(RemoteError::NotFound(message)),
            429 => Err(RemoteError::RateLimited { retry_after_secs: retry_after.unwrap_or(3600) }),
            401 | 403 => Err(RemoteError::Permanent { status: status.as_u16(), message }),
            400..=499 => Err(RemoteError::Permanent { status: status.as_u16(), message }),
            _ => Err(RemoteError::Transient(format!("{}: {}", status, message))),
        }
    }

    pub async fn list_servers(&self, creds: &RobotCredentials) -> Result<Vec<RobotServer>, RemoteError> {
        debug!("robot: list servers");
        #[derive(Deserialize)]
        struct Entry {
            server: RobotServer,
        }
        let resp = self
            .http
            .get(self.url("/server"))
            .basic_auth(&creds.user, Some(&creds.password))
            .send()
            .await
            .map_err(|e| RemoteError::Transient(e.to_string()))?;
        let entries: Vec<Entry> = self.handle(resp).await?;
        Ok(entries.into_iter().map(|e| e.server).collect())
    }

    pub async fn get_server(&self, creds: &RobotCredentials, server_id: u64) -> Result<RobotServer, RemoteError> {
        #[derive(Deserialize)]
        struct Wrapper {
            server: RobotServer,
        }
        let resp = self
            .http
            .get(self.url(&format!("/server/{}", server_id)))
            .basic_auth(&creds.user, Some(&creds.password))
            .send()
            .await
            .map_err(|e| RemoteError::Transient(e.to_string()))?;
        let w: Wrapper = self.handle(resp).await?;
        Ok(w.server)
    }

    pub async fn set_rescue(
        &self,
        creds: &RobotCredentials,
        server_id: u64,
        os: &str,
        authorized_keys: &[Fingerprint],
    ) -> Result<RescueConfig, RemoteError> {
        debug!(server_id, os, "robot: activate rescue");
        #[derive(Deserialize)]
        struct Wrapper {
            rescue: RescueConfig,
        }
        let fp_csv = authorized_keys.iter().map(|fp| fp.as_str().to_string()).collect::<Vec<_>>();
        let resp = self
            .http
            .post(self.url(&format!("/boot/{}/rescue", server_id)))
            .basic_auth(&creds.user, Some(&creds.password))
            .form(&[("os", os.to_string()), ("authorized_key", fp_csv.join(","))])
            .send()
            .await
            .map_err(|e| RemoteError::Transient(e.to_string()))?;
        let w: Wrapper = self.handle(resp).await?;
        Ok(w.rescue)
    }

    pub async fn get_boot_config(&self, creds: &RobotCredentials, server_id: u64) -> Result<BootConfig, RemoteError> {
        let resp = self
            .http
            .get(self.url(&format!("/boot/{}", server_id)))
            .basic_auth(&creds.user, Some(&creds.password))
            .send()
            .await
            .map_err(|e| RemoteError::Transient(e.to_string()))?;
        self.handle(resp).await
    }

    pub async fn reboot(
        &self,
        creds: &RobotCredentials,
        server_id: u64,
        reset_type: RobotResetType,
    ) -> Result<(), RemoteError> {
        debug!(server_id, kind = reset_type.as_api_str(), "robot: reboot");
        let resp = self
            .http
            .post(self.url(&format!("/reset/{}", server_id)))
            .basic_auth(&creds.user, Some(&creds.password))
            .form(&[("type", reset_type.as_api_str())])
            .send()
            .await
            .map_err(|e| RemoteError::Transient(e.to_string()))?;
        // reset has no useful body to deserialize; just classify the status.
        if resp.status().is_success() {
            Ok(())
        } else {
            self.handle::<Value>(resp).await.map(|_| ())
        }
    }

    pub async fn list_ssh_keys(&self, creds: &RobotCredentials) -> Result<Vec<SshKeyRecord>, RemoteError> {
        #[derive(Deserialize)]
        struct Entry {
            key: SshKeyRecord,
        }
        let resp = self
            .http
            .get(self.url("/key"))
            .basic_auth(&creds.user, Some(&creds.password))
            .send()
            .await
            .map_err(|e| RemoteError::Transient(e.to_string()))?;
        let entries: Vec<Entry> = self.handle(resp).await?;
        Ok(entries.into_iter().map(|e| e.key).collect())
    }

    pub async fn set_ssh_key(
        &self,
        creds: &RobotCredentials,
        name: &str,
        public_key: &str,
    ) -> Result<SshKeyRecord, RemoteError> {
        #[derive(Deserialize)]
        struct Wrapper {
            key: SshKeyRecord,
        }
        let resp = self
            .http
            .post(self.url("/key"))
            .basic_auth(&creds.user, Some(&creds.password))
            .form(&[("name", name), ("data", public_key)])
            .send()
            .await
            .map_err(|e| RemoteError::Transient(e.to_string()))?;
        let w: Wrapper = self.handle(resp).await?;
        Ok(w.key)
    }

    pub async fn delete_ssh_key(&self, creds: &RobotCredentials, fingerprint: &Fingerprint) -> Result<(), RemoteError> {
        let resp = self
            .http
            .delete(self.url(&format!("/key/{}", fingerprint.as_str())))
            .basic_auth(&creds.user, Some(&creds.password))
            .send()
            .await
            .map_err(|e| RemoteError::Transient(e.to_string()))?;
        if resp.status().is_success() || resp.status().as_u16() == 404 {
            Ok(())
        } else {
            warn!(status = %resp.status(), "robot: delete ssh key failed");
            self.handle::<Value>(resp).await.map(|_| ())
        }
    }

    /// Whether the client should currently be treated as globally
    /// rate-limited. Left as a free function on `RemoteError` rather than
    /// client state, since the rate-limit window lives on the cluster
    /// object, not here.
    pub fn retry_after(err: &RemoteError) -> Option<Duration> {
        match err {
            RemoteError::RateLimited { retry_after_secs } => Some(Duration::from_secs(*retry_after_secs)),
            _ => None,
        }
    }
}
