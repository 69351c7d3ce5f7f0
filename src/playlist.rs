use std::sync::Arc;

use slog::o;

use crate::error::{Error, Result};
use crate::genres;
use crate::models::{Identity, PlaylistResponse};
use crate::mood::MoodDetector;
use crate::spotify::MusicService;

pub const PLAYLIST_LIMIT: usize = 10;

/// text -> mood -> genres -> spotify search
pub struct PlaylistGenerator {
    spotify: Arc<dyn MusicService>,
    moods: MoodDetector,
    log: slog::Logger,
}

impl PlaylistGenerator {
    pub fn new(spotify: Arc<dyn MusicService>, moods: MoodDetector, log: &slog::Logger) -> Self {
        Self {
            spotify,
            moods,
            log: log.new(o!("component" => "playlist")),
        }
    }

    pub async fn generate(&self, identity: &Identity, text: &str) -> Result<PlaylistResponse> {
        let mood = self.moods.infer(text);
        let genres = genres::genres_for(mood);
        slog::info!(
            self.log, "generating playlist";
            "user" => &identity.external_user_id,
            "mood" => mood.as_str(),
            "genres" => genres.join(","),
        );
        // logged out users keep their record but not their spotify tokens
        let access_token = identity.access_token.as_deref().ok_or_else(|| Error::UpstreamApi {
            status: 401,
            message: "No access token stored, log in again".to_string(),
        })?;
        let tracks = self
            .spotify
            .search_tracks_by_genres(access_token, genres, PLAYLIST_LIMIT)
            .await?;
        Ok(PlaylistResponse {
            name: format!("{} Vibes", mood.title()),
            tracks,
        })
    }
}
