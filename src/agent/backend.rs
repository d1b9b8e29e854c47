//! Fleet Backend Client
//!
//! One stateless request/response function per backend operation. Every
//! call opens its own connection, sends a small JSON body and decodes a
//! fixed-schema response. Only HTTP 200 counts as success; the decode
//! step is separate so the orchestrator can tell a transport failure
//! from a malformed or incomplete body.

use crate::agent::config::Endpoints;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Header carrying the bearer token on every call after login.
pub const ACCESS_TOKEN_HEADER: &str = "x-access-token";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned status {0}")]
    Status(u16),
    #[error("invalid response body: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("missing field `{0}` in response")]
    MissingField(&'static str),
}

impl BackendError {
    /// Transport-level failure (connection, timeout, non-200) as opposed
    /// to a protocol failure in an otherwise delivered response.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Status(_))
    }
}

/// Bearer credential returned by login. Held for one cycle, never reused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(token: String) -> Self {
        Self(token)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A pending firmware assignment. `rollout_id` of `None` (absent or JSON
/// null) means no rollout is pending, the normal steady state.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RolloutOffer {
    #[serde(default)]
    pub firmware_id: Option<String>,
    #[serde(default)]
    pub rollout_id: Option<String>,
}

/// Resolved storage pointer for a firmware image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentLocator {
    pub cid: String,
}

/// The five backend operations the rollout cycle depends on.
pub trait Backend {
    fn login(
        &self,
        device_key: &str,
        device_signature: &str,
        timestamp: u64,
    ) -> Result<SessionToken, BackendError>;

    fn register(
        &self,
        token: &SessionToken,
        mac: &str,
        firmware_version: &str,
    ) -> Result<(), BackendError>;

    fn check_rollout(
        &self,
        token: &SessionToken,
        mac: &str,
        firmware_version: &str,
    ) -> Result<RolloutOffer, BackendError>;

    fn resolve_cid(
        &self,
        token: &SessionToken,
        firmware_id: &str,
    ) -> Result<ContentLocator, BackendError>;

    fn report_success(
        &self,
        token: &SessionToken,
        mac: &str,
        firmware_version: &str,
        rollout_id: &str,
    ) -> Result<(), BackendError>;
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    device_key: &'a str,
    device_signature: &'a str,
    timestamp: u64,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: Option<String>,
}

#[derive(Debug, Serialize)]
struct DeviceRequest<'a> {
    mac: &'a str,
    firmware_version: &'a str,
}

#[derive(Debug, Serialize)]
struct FirmwareInfoRequest<'a> {
    id: &'a str,
}

#[derive(Debug, Deserialize)]
struct FirmwareInfoResponse {
    cid: Option<String>,
}

#[derive(Debug, Serialize)]
struct ReportSuccessRequest<'a> {
    mac: &'a str,
    firmware_version: &'a str,
    rollout_id: &'a str,
}

/// Backend client over blocking HTTPS.
pub struct HttpBackend {
    client: reqwest::blocking::Client,
    endpoints: Endpoints,
}

impl HttpBackend {
    pub fn new(endpoints: Endpoints) -> Self {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("ota-agent/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client, endpoints }
    }

    fn post<T: Serialize>(
        &self,
        url: &str,
        token: Option<&SessionToken>,
        body: &T,
    ) -> Result<(u16, String), BackendError> {
        let mut request = self.client.post(url).json(body);
        if let Some(token) = token {
            request = request.header(ACCESS_TOKEN_HEADER, token.as_str());
        }
        let response = request.send()?;
        let status = response.status().as_u16();
        let body = response.text()?;
        Ok((status, body))
    }
}

impl Backend for HttpBackend {
    fn login(
        &self,
        device_key: &str,
        device_signature: &str,
        timestamp: u64,
    ) -> Result<SessionToken, BackendError> {
        let (status, body) = self.post(
            &self.endpoints.login,
            None,
            &LoginRequest {
                device_key,
                device_signature,
                timestamp,
            },
        )?;
        decode_login(status, &body)
    }

    fn register(
        &self,
        token: &SessionToken,
        mac: &str,
        firmware_version: &str,
    ) -> Result<(), BackendError> {
        let (status, _body) = self.post(
            &self.endpoints.register,
            Some(token),
            &DeviceRequest {
                mac,
                firmware_version,
            },
        )?;
        decode_status_only(status)
    }

    fn check_rollout(
        &self,
        token: &SessionToken,
        mac: &str,
        firmware_version: &str,
    ) -> Result<RolloutOffer, BackendError> {
        let (status, body) = self.post(
            &self.endpoints.next_rollout,
            Some(token),
            &DeviceRequest {
                mac,
                firmware_version,
            },
        )?;
        decode_rollout(status, &body)
    }

    fn resolve_cid(
        &self,
        token: &SessionToken,
        firmware_id: &str,
    ) -> Result<ContentLocator, BackendError> {
        let (status, body) = self.post(
            &self.endpoints.firmware_info,
            Some(token),
            &FirmwareInfoRequest { id: firmware_id },
        )?;
        decode_firmware_info(status, &body)
    }

    fn report_success(
        &self,
        token: &SessionToken,
        mac: &str,
        firmware_version: &str,
        rollout_id: &str,
    ) -> Result<(), BackendError> {
        let (status, _body) = self.post(
            &self.endpoints.rollout_success,
            Some(token),
            &ReportSuccessRequest {
                mac,
                firmware_version,
                rollout_id,
            },
        )?;
        decode_status_only(status)
    }
}

// Decode steps are free functions so status/parse handling is testable
// without a live server.

fn decode_status_only(status: u16) -> Result<(), BackendError> {
    if status != 200 {
        return Err(BackendError::Status(status));
    }
    Ok(())
}

fn decode_login(status: u16, body: &str) -> Result<SessionToken, BackendError> {
    decode_status_only(status)?;
    let response: LoginResponse = serde_json::from_str(body)?;
    match response.token {
        Some(token) if !token.is_empty() => Ok(SessionToken::new(token)),
        _ => Err(BackendError::MissingField("token")),
    }
}

fn decode_rollout(status: u16, body: &str) -> Result<RolloutOffer, BackendError> {
    decode_status_only(status)?;
    let offer: RolloutOffer = serde_json::from_str(body)?;
    Ok(offer)
}

fn decode_firmware_info(status: u16, body: &str) -> Result<ContentLocator, BackendError> {
    decode_status_only(status)?;
    let response: FirmwareInfoResponse = serde_json::from_str(body)?;
    // "present but empty" is surfaced as an empty locator, not a parse
    // error; the orchestrator treats both as CID-missing but logs them
    // differently.
    match response.cid {
        Some(cid) => Ok(ContentLocator { cid }),
        None => Err(BackendError::MissingField("cid")),
    }
}
