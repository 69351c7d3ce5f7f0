use std::sync::Mutex;

use async_trait::async_trait;
use jsonwebtoken::Algorithm;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::{Track, UpstreamTokens};
use crate::mood::SentimentScorer;
use crate::spotify::MusicService;

pub fn discard_log() -> slog::Logger {
    slog::Logger::root(slog::Discard, slog::o!())
}

pub fn test_config() -> Config {
    Config {
        version: "test".to_string(),
        ssl: false,
        host: "localhost".to_string(),
        port: 3030,
        log_format: "pretty".to_string(),
        log_level: "DEBUG".to_string(),
        spotify_client_id: "test-client-id".to_string(),
        spotify_client_secret: "test-client-secret".to_string(),
        spotify_redirect_uri: "http://localhost:3030/auth/callback".to_string(),
        spotify_accounts_url: "https://accounts.example.test".to_string(),
        spotify_api_url: "https://api.example.test/v1".to_string(),
        signing_secret: "test-signing-secret".to_string(),
        signing_algorithm: Algorithm::HS256,
        token_lifetime_minutes: 30,
        login_state_ttl_seconds: 300,
        db_url: None,
        enc_key: None,
    }
}

pub struct FixedScorer(pub f64);

impl SentimentScorer for FixedScorer {
    fn compound(&self, _text: &str) -> f64 {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchCall {
    pub access_token: String,
    pub genres: Vec<String>,
    pub limit: usize,
}

/// Stand-in for spotify. Every code exchanges to tokens derived from the
/// code, every access token belongs to `spotify-user`, and searches return
/// one track per genre.
#[derive(Default)]
pub struct FakeSpotify {
    // token endpoint answers without an access_token
    pub deny_token: bool,
    // /me answers without an id
    pub no_profile: bool,
    // search answers with this status and message
    pub search_error: Option<(u16, String)>,
    pub exchange_count: Mutex<usize>,
    pub searches: Mutex<Vec<SearchCall>>,
}

impl FakeSpotify {
    pub fn exchanges(&self) -> usize {
        *self.exchange_count.lock().unwrap()
    }

    pub fn searches(&self) -> Vec<SearchCall> {
        self.searches.lock().unwrap().clone()
    }
}

#[async_trait]
impl MusicService for FakeSpotify {
    async fn exchange_code(&self, code: &str) -> Result<UpstreamTokens> {
        *self.exchange_count.lock().unwrap() += 1;
        if self.deny_token {
            return Err(Error::UpstreamAuth("Failed to get access token".to_string()));
        }
        Ok(UpstreamTokens {
            access_token: format!("access-for-{}", code),
            refresh_token: Some(format!("refresh-for-{}", code)),
        })
    }

    async fn refresh_tokens(&self, refresh_token: &str) -> Result<UpstreamTokens> {
        Ok(UpstreamTokens {
            access_token: format!("refreshed-with-{}", refresh_token),
            refresh_token: None,
        })
    }

    async fn fetch_profile(&self, _access_token: &str) -> Result<String> {
        if self.no_profile {
            return Err(Error::UpstreamAuth(
                "Failed to get Spotify user profile".to_string(),
            ));
        }
        Ok("spotify-user".to_string())
    }

    async fn search_tracks_by_genres(
        &self,
        access_token: &str,
        genres: &[&str],
        limit: usize,
    ) -> Result<Vec<Track>> {
        self.searches.lock().unwrap().push(SearchCall {
            access_token: access_token.to_string(),
            genres: genres.iter().map(|g| g.to_string()).collect(),
            limit,
        });
        if let Some((status, message)) = &self.search_error {
            return Err(Error::UpstreamApi {
                status: *status,
                message: message.clone(),
            });
        }
        Ok(genres
            .iter()
            .take(limit)
            .map(|g| Track {
                title: format!("{} song", g),
                artist: format!("{} artist", g),
                external_url: Some(format!("https://open.spotify.com/track/{}", g)),
            })
            .collect())
    }
}
