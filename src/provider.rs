//! External music provider port. Consumed through a thin trait; the
//! core never parses provider HTTP itself. `HttpMusicProvider` caches
//! an access token behind an expiry check and transparently refreshes
//! and retries once on a 401, the way a Spotify web-API client keeps a
//! cached bearer token and re-requests it from the session worker on
//! expiry or an unauthorized response.

use crate::config::ProviderConfig;
use crate::error::{CoreError, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

#[async_trait]
pub trait MusicProvider: Send + Sync {
    async fn play_track(&self, venue_id: Uuid, track_uri: &str, device_id: &str) -> Result<()>;
    async fn pause_playback(&self, venue_id: Uuid, device_id: &str) -> Result<()>;
    async fn list_devices(&self, venue_id: Uuid) -> Result<Vec<DeviceInfo>>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceInfo {
    pub device_id: String,
    pub name: String,
}

#[derive(Debug, Clone)]
struct Token {
    access_token: String,
    expires_at: Instant,
}

/// HTTP-backed `MusicProvider`. Holds a refreshable bearer token and
/// retries a call exactly once after a successful refresh on 401. The
/// playback coordinator owns the timeout/retry-once policy around
/// `play_track` itself; this type only ever makes a single HTTP
/// attempt per call.
pub struct HttpMusicProvider {
    http: Client,
    config: ProviderConfig,
    token: Arc<RwLock<Option<Token>>>,
}

impl HttpMusicProvider {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            http: Client::new(),
            config,
            token: Arc::new(RwLock::new(None)),
        }
    }

    fn needs_refresh(&self) -> bool {
        match self.token.read().as_ref() {
            None => true,
            Some(t) => Instant::now() + self.config.token_expiry_skew >= t.expires_at,
        }
    }

    async fn refresh_token(&self) -> Result<()> {
        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
            expires_in: u64,
        }

        let response = self
            .http
            .post(format!("{}/oauth/token", self.config.base_url))
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", &self.config.client_id),
                ("client_secret", &self.config.client_secret),
            ])
            .send()
            .await
            .map_err(|e| CoreError::provider("refresh_token", e.to_string()))?;

        let body: TokenResponse = response
            .error_for_status()
            .map_err(|e| CoreError::provider("refresh_token", e.to_string()))?
            .json()
            .await
            .map_err(|e| CoreError::provider("refresh_token", e.to_string()))?;

        *self.token.write() = Some(Token {
            access_token: body.access_token,
            expires_at: Instant::now() + Duration::from_secs(body.expires_in),
        });
        Ok(())
    }

    async fn access_token(&self) -> Result<String> {
        if self.needs_refresh() {
            self.refresh_token().await?;
        }
        Ok(self
            .token
            .read()
            .as_ref()
            .expect("refreshed above")
            .access_token
            .clone())
    }

    async fn authed_request(
        &self,
        build: impl Fn(&Client, &str) -> reqwest::RequestBuilder,
        operation: &str,
    ) -> Result<reqwest::Response> {
        let token = self.access_token().await?;
        let response = build(&self.http, &token)
            .bearer_auth(&token)
            .timeout(self.config.play_call_timeout)
            .send()
            .await
            .map_err(|e| CoreError::provider(operation, e.to_string()))?;

        if response.status() == StatusCode::UNAUTHORIZED {
            self.refresh_token().await?;
            let retried_token = self.access_token().await?;
            return build(&self.http, &retried_token)
                .bearer_auth(&retried_token)
                .timeout(self.config.play_call_timeout)
                .send()
                .await
                .map_err(|e| CoreError::provider(operation, e.to_string()));
        }

        Ok(response)
    }
}

#[async_trait]
impl MusicProvider for HttpMusicProvider {
    async fn play_track(&self, venue_id: Uuid, track_uri: &str, device_id: &str) -> Result<()> {
        let url = format!("{}/venues/{}/devices/{}/play", self.config.base_url, venue_id, device_id);
        let body = serde_json::json!({ "trackUri": track_uri });

        let response = self
            .authed_request(|http, _token| http.post(&url).json(&body), "playTrack")
            .await?;

        response
            .error_for_status()
            .map_err(|e| CoreError::provider("playTrack", e.to_string()))?;
        Ok(())
    }

    async fn pause_playback(&self, venue_id: Uuid, device_id: &str) -> Result<()> {
        let url = format!("{}/venues/{}/devices/{}/pause", self.config.base_url, venue_id, device_id);
        let response = self
            .authed_request(|http, _| http.post(&url), "pausePlayback")
            .await?;
        response
            .error_for_status()
            .map_err(|e| CoreError::provider("pausePlayback", e.to_string()))?;
        Ok(())
    }

    async fn list_devices(&self, venue_id: Uuid) -> Result<Vec<DeviceInfo>> {
        let url = format!("{}/venues/{}/devices", self.config.base_url, venue_id);
        let response = self
            .authed_request(|http, _| http.get(&url), "listDevices")
            .await?;
        response
            .error_for_status()
            .map_err(|e| CoreError::provider("listDevices", e.to_string()))?
            .json()
            .await
            .map_err(|e| CoreError::provider("listDevices", e.to_string()))
    }
}
