use crate::{ArtworkError, ArtworkProvider, CredentialRefresher, RefreshError, RefreshedToken};
use async_trait::async_trait;
use presence_sync_core::{now_epoch_ms, urls, CredentialState};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";

#[derive(Debug, Deserialize)]
struct Image {
    url: String,
}

#[derive(Debug, Deserialize)]
struct Album {
    #[serde(default)]
    images: Vec<Image>,
}

#[derive(Debug, Deserialize)]
struct Item {
    album: Album,
}

#[derive(Debug, Deserialize)]
struct Page {
    #[serde(default)]
    items: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    tracks: Page,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    token_type: String,
    // seconds
    expires_in: i64,
    refresh_token: Option<String>,
}

fn http_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
}

pub struct SpotifyCovers {
    http: reqwest::Client,
}

impl SpotifyCovers {
    pub fn new() -> reqwest::Result<Self> {
        Ok(Self {
            http: http_client()?,
        })
    }
}

#[async_trait]
impl ArtworkProvider for SpotifyCovers {
    async fn cover(
        &self,
        identifier: &str,
        region: &str,
        credential: &CredentialState,
    ) -> Result<String, ArtworkError> {
        let url = urls::spotify_search_url(identifier, region);
        let response = self
            .http
            .get(&url)
            .header(
                reqwest::header::AUTHORIZATION,
                credential.authorization_header(),
            )
            .send()
            .await
            .map_err(|err| ArtworkError::Transport(err.to_string()))?;

        match response.status() {
            StatusCode::UNAUTHORIZED => return Err(ArtworkError::Unauthorized),
            status if !status.is_success() => {
                return Err(ArtworkError::Transport(format!("search returned {status}")))
            }
            _ => {}
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|err| ArtworkError::Transport(err.to_string()))?;
        first_cover(body).ok_or_else(|| ArtworkError::NotFound(identifier.to_string()))
    }
}

fn first_cover(body: SearchResponse) -> Option<String> {
    body.tracks
        .items
        .into_iter()
        .next()
        .and_then(|item| item.album.images.into_iter().next())
        .map(|image| image.url)
}

pub struct SpotifyTokenRefresher {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
}

impl SpotifyTokenRefresher {
    pub fn new(client_id: String, client_secret: String) -> reqwest::Result<Self> {
        Ok(Self {
            http: http_client()?,
            client_id,
            client_secret,
        })
    }
}

#[async_trait]
impl CredentialRefresher for SpotifyTokenRefresher {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedToken, RefreshError> {
        debug!("exchanging refresh token");
        let body: TokenResponse = self
            .http
            .post(TOKEN_URL)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|err| RefreshError::RefreshFailed(err.to_string()))?
            .json()
            .await
            .map_err(|err| RefreshError::RefreshFailed(err.to_string()))?;
        Ok(into_refreshed(body, now_epoch_ms()))
    }
}

fn into_refreshed(body: TokenResponse, now_ms: i64) -> RefreshedToken {
    RefreshedToken {
        access_token: body.access_token,
        token_type: body.token_type,
        expires_at: now_ms + body.expires_in * 1_000,
        refresh_token: body.refresh_token,
    }
}
