use async_trait::async_trait;
use slog::o;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::{Track, UpstreamTokens};

/// The parts of spotify's accounts and web api that we use
#[async_trait]
pub trait MusicService: Send + Sync {
    /// Trade a one-time authorization code for access and refresh tokens
    async fn exchange_code(&self, code: &str) -> Result<UpstreamTokens>;

    /// Get a new access token. Spotify may or may not rotate the refresh token.
    async fn refresh_tokens(&self, refresh_token: &str) -> Result<UpstreamTokens>;

    /// The spotify user id that owns `access_token`
    async fn fetch_profile(&self, access_token: &str) -> Result<String>;

    /// Search tracks with the genre tags as the query terms.
    /// Returns at most `limit` tracks, in the order spotify returned them.
    async fn search_tracks_by_genres(
        &self,
        access_token: &str,
        genres: &[&str],
        limit: usize,
    ) -> Result<Vec<Track>>;
}

#[derive(serde::Deserialize, Debug)]
struct SpotifyAccess {
    access_token: Option<String>,
    refresh_token: Option<String>,
}

impl SpotifyAccess {
    fn into_tokens(self) -> Result<UpstreamTokens> {
        let access_token = self
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::UpstreamAuth("Failed to get access token".to_string()))?;
        Ok(UpstreamTokens {
            access_token,
            refresh_token: self.refresh_token,
        })
    }
}

#[derive(serde::Serialize)]
struct SpotifyAccessParams<'a> {
    grant_type: &'a str,
    code: &'a str,
    redirect_uri: &'a str,
}

#[derive(serde::Serialize)]
struct RefreshParams<'a> {
    grant_type: &'a str,
    refresh_token: &'a str,
}

#[derive(serde::Deserialize)]
struct SpotifyProfile {
    id: Option<String>,
}

#[derive(serde::Deserialize)]
struct SearchResponse {
    tracks: Option<TrackPage>,
}

#[derive(serde::Deserialize)]
struct TrackPage {
    // spotify occasionally sends `null` in place of a track
    #[serde(default)]
    items: Vec<Option<SpotifyTrack>>,
}

#[derive(serde::Deserialize)]
struct SpotifyTrack {
    name: String,
    #[serde(default)]
    artists: Vec<SpotifyArtist>,
    external_urls: Option<ExternalUrls>,
}

#[derive(serde::Deserialize)]
struct SpotifyArtist {
    name: String,
}

#[derive(serde::Deserialize)]
struct ExternalUrls {
    spotify: Option<String>,
}

impl From<SpotifyTrack> for Track {
    fn from(t: SpotifyTrack) -> Self {
        Track {
            title: t.name,
            artist: t
                .artists
                .into_iter()
                .next()
                .map(|a| a.name)
                .unwrap_or_default(),
            external_url: t.external_urls.and_then(|u| u.spotify),
        }
    }
}

/// Pull `error.message` out of a spotify api error body
fn api_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(|s| s.to_string()))
        .unwrap_or_else(|| "Unknown error".to_string())
}

fn parse_tracks(body: &str, limit: usize) -> Result<Vec<Track>> {
    let resp: SearchResponse =
        serde_json::from_str(body).map_err(|e| se!("search json parse error {}", e))?;
    Ok(resp
        .tracks
        .map(|page| page.items)
        .unwrap_or_default()
        .into_iter()
        .flatten()
        .take(limit)
        .map(Track::from)
        .collect())
}

pub struct SpotifyClient {
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    accounts_url: String,
    api_url: String,
    log: slog::Logger,
}

impl SpotifyClient {
    pub fn new(config: &Config, log: &slog::Logger) -> Self {
        Self {
            client_id: config.spotify_client_id.clone(),
            client_secret: config.spotify_client_secret.clone(),
            redirect_uri: config.spotify_redirect_uri.clone(),
            accounts_url: config.spotify_accounts_url.clone(),
            api_url: config.spotify_api_url.clone(),
            log: log.new(o!("component" => "spotify")),
        }
    }

    fn basic_auth(&self) -> String {
        let auth = base64::encode(format!("{}:{}", self.client_id, self.client_secret).as_bytes());
        format!("Basic {}", auth)
    }

    async fn token_request<T: serde::Serialize>(&self, form: &T) -> Result<UpstreamTokens> {
        let body = surf::Body::from_form(form)
            .map_err(|e| se!("error generating token request form {}", e))?;
        let mut resp = surf::post(format!("{}/api/token", self.accounts_url))
            .body(body)
            .header("authorization", self.basic_auth())
            .send()
            .await
            .map_err(|e| Error::UpstreamAuth(format!("account request error {}", e)))?;
        if !resp.status().is_success() {
            slog::warn!(self.log, "token request rejected"; "status" => u16::from(resp.status()));
        }
        let access: SpotifyAccess = resp
            .body_json()
            .await
            .map_err(|e| Error::UpstreamAuth(format!("Failed to get access token: {}", e)))?;
        access.into_tokens()
    }
}

#[async_trait]
impl MusicService for SpotifyClient {
    async fn exchange_code(&self, code: &str) -> Result<UpstreamTokens> {
        self.token_request(&SpotifyAccessParams {
            grant_type: "authorization_code",
            code,
            redirect_uri: &self.redirect_uri,
        })
        .await
    }

    async fn refresh_tokens(&self, refresh_token: &str) -> Result<UpstreamTokens> {
        self.token_request(&RefreshParams {
            grant_type: "refresh_token",
            refresh_token,
        })
        .await
    }

    async fn fetch_profile(&self, access_token: &str) -> Result<String> {
        let mut resp = surf::get(format!("{}/me", self.api_url))
            .header("authorization", format!("Bearer {}", access_token))
            .send()
            .await
            .map_err(|e| Error::UpstreamAuth(format!("get user error {}", e)))?;
        let profile: SpotifyProfile = resp.body_json().await.map_err(|e| {
            Error::UpstreamAuth(format!("Failed to get Spotify user profile: {}", e))
        })?;
        profile
            .id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| Error::UpstreamAuth("Failed to get Spotify user profile".to_string()))
    }

    async fn search_tracks_by_genres(
        &self,
        access_token: &str,
        genres: &[&str],
        limit: usize,
    ) -> Result<Vec<Track>> {
        let query = genres.join(" ");
        let limit_param = limit.to_string();
        let url = surf::Url::parse_with_params(
            &format!("{}/search", self.api_url),
            &[
                ("q", query.as_str()),
                ("type", "track"),
                ("limit", limit_param.as_str()),
            ],
        )
        .map_err(|e| se!("invalid search url {}", e))?;
        slog::debug!(self.log, "searching tracks"; "q" => &query, "limit" => limit);
        let mut resp = surf::get(url)
            .header("authorization", format!("Bearer {}", access_token))
            .send()
            .await
            .map_err(|e| Error::UpstreamApi {
                status: 502,
                message: format!("search request error {}", e),
            })?;
        let status = u16::from(resp.status());
        let body = resp.body_string().await.map_err(|e| Error::UpstreamApi {
            status: 502,
            message: format!("error reading search response {}", e),
        })?;
        if !resp.status().is_success() {
            return Err(Error::UpstreamApi {
                status,
                message: api_error_message(&body),
            });
        }
        parse_tracks(&body, limit)
    }
}
