//! Netpulse mobile-backend HTTP client
//!
//! Speaks the same endpoints as the chain's mobile app:
//! - `POST exerciser/login` - form credentials, session cookie in Set-Cookie
//! - `GET thegymgroup/v1.0/exerciser/{uuid}/gym-busyness` - occupancy
//! - `GET exercisers/{uuid}/check-ins/history` - visit history
//!
//! The session cookie is process-wide state: written only by `login`, read
//! by every fetch. A 401 on a fetch triggers exactly one re-login followed
//! by a single retry of the failed request; the cap is structural (a loop
//! bound), never recursion.

use crate::domain::api::{OccupancyPayload, Profile, VisitHistoryPayload};
use crate::infra::config::Config;
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, COOKIE, SET_COOKIE};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

/// Wire timestamp format expected by the history endpoint (naive, seconds)
const QUERY_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Fetch-layer error taxonomy.
///
/// `Auth` is fatal for the session (bad credentials are never retried);
/// `Transport` is transient and retried with bounded backoff by the caller;
/// `MalformedResponse` is fatal for the cycle only.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("authentication rejected: {0}")]
    Auth(String),
    #[error("transport failure on {endpoint}: {reason}")]
    Transport { endpoint: &'static str, reason: String },
    #[error("malformed response from {endpoint}: {reason}")]
    MalformedResponse { endpoint: &'static str, reason: String },
}

impl ApiError {
    fn transport(endpoint: &'static str, err: reqwest::Error) -> Self {
        Self::Transport { endpoint, reason: err.to_string() }
    }

    fn malformed(endpoint: &'static str, err: reqwest::Error) -> Self {
        Self::MalformedResponse { endpoint, reason: err.to_string() }
    }
}

/// The authenticated fetch surface the refresh loop depends on.
///
/// Kept as a trait so the loop can be driven by a scripted mock in tests.
#[async_trait]
pub trait GymApi: Send + Sync {
    /// Authenticate and return the member profile. Resets the session.
    async fn login(&self) -> Result<Profile, ApiError>;

    /// Current occupancy of the given gym.
    async fn fetch_occupancy(
        &self,
        user_id: Uuid,
        gym_id: Uuid,
    ) -> Result<OccupancyPayload, ApiError>;

    /// Check-in history. `start` is omitted on the first call so the whole
    /// history seeds the aggregates.
    async fn fetch_visit_history(
        &self,
        user_id: Uuid,
        start: Option<DateTime<Utc>>,
        end: DateTime<Utc>,
    ) -> Result<VisitHistoryPayload, ApiError>;
}

struct Session {
    cookie: String,
}

pub struct NetpulseClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
    session: RwLock<Option<Session>>,
}

impl NetpulseClient {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.api_timeout())
            .default_headers(Self::static_headers())
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url: config.api_base_url().trim_end_matches('/').to_string(),
            username: config.api_username().to_string(),
            password: config.api_password().to_string(),
            session: RwLock::new(None),
        })
    }

    /// Headers the upstream expects from the mobile app on every request
    fn static_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("accept", HeaderValue::from_static("application/json"));
        headers.insert("user-agent", HeaderValue::from_static("okhttp/3.12.3"));
        headers.insert("x-np-api-version", HeaderValue::from_static("1.5"));
        headers.insert("x-np-app-version", HeaderValue::from_static("6.0.1"));
        headers.insert(
            "x-np-user-agent",
            HeaderValue::from_static(
                "clientType=MOBILE_DEVICE; devicePlatform=ANDROID; deviceUid=; \
                 applicationName=The Gym Group; applicationVersion=5.0; \
                 applicationVersionCode=38",
            ),
        );
        headers
    }

    async fn session_cookie(&self) -> Result<String, ApiError> {
        let session = self.session.read().await;
        session
            .as_ref()
            .map(|s| s.cookie.clone())
            .ok_or_else(|| ApiError::Auth("not logged in".to_string()))
    }

    /// GET `{base_url}/{path}` and decode the JSON body.
    ///
    /// One re-login is attempted on 401, then the request is retried once.
    async fn get_json<T: DeserializeOwned>(
        &self,
        path: String,
        endpoint: &'static str,
    ) -> Result<T, ApiError> {
        for attempt in 0..2u8 {
            let cookie = self.session_cookie().await?;
            let resp = self
                .http
                .get(format!("{}/{}", self.base_url, path))
                .header(COOKIE, cookie)
                .send()
                .await
                .map_err(|e| ApiError::transport(endpoint, e))?;

            let status = resp.status();
            if status == StatusCode::UNAUTHORIZED {
                if attempt == 0 {
                    warn!(endpoint, "netpulse_session_expired");
                    self.login().await?;
                    continue;
                }
                return Err(ApiError::Auth(format!(
                    "session rejected on {} after re-login",
                    endpoint
                )));
            }
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(ApiError::Transport {
                    endpoint,
                    reason: format!("status {}: {}", status, body),
                });
            }

            return resp.json::<T>().await.map_err(|e| ApiError::malformed(endpoint, e));
        }
        unreachable!("get_json loop always returns within two attempts")
    }
}

#[async_trait]
impl GymApi for NetpulseClient {
    async fn login(&self) -> Result<Profile, ApiError> {
        let endpoint = "exerciser/login";
        let resp = self
            .http
            .post(format!("{}/{}", self.base_url, endpoint))
            .form(&[("username", self.username.as_str()), ("password", self.password.as_str())])
            .send()
            .await
            .map_err(|e| ApiError::transport(endpoint, e))?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::Auth(format!("login rejected: {}", body)));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::Transport {
                endpoint,
                reason: format!("status {}: {}", status, body),
            });
        }

        let cookie = resp
            .headers()
            .get(SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or(ApiError::MalformedResponse {
                endpoint,
                reason: "missing Set-Cookie header".to_string(),
            })?;

        let profile: Profile =
            resp.json().await.map_err(|e| ApiError::malformed(endpoint, e))?;

        *self.session.write().await = Some(Session { cookie });
        info!(user_id = %profile.uuid, home_club = %profile.home_club_uuid, "netpulse_login_ok");

        Ok(profile)
    }

    async fn fetch_occupancy(
        &self,
        user_id: Uuid,
        gym_id: Uuid,
    ) -> Result<OccupancyPayload, ApiError> {
        let path = format!(
            "thegymgroup/v1.0/exerciser/{}/gym-busyness?gymLocationId={}",
            user_id, gym_id
        );
        self.get_json(path, "gym-busyness").await
    }

    async fn fetch_visit_history(
        &self,
        user_id: Uuid,
        start: Option<DateTime<Utc>>,
        end: DateTime<Utc>,
    ) -> Result<VisitHistoryPayload, ApiError> {
        let start_param = start
            .map(|s| format!("startDate={}&", s.format(QUERY_TIME_FORMAT)))
            .unwrap_or_default();
        let path = format!(
            "exercisers/{}/check-ins/history?{}endDate={}",
            user_id,
            start_param,
            end.format(QUERY_TIME_FORMAT)
        );
        self.get_json(path, "check-ins/history").await
    }
}
