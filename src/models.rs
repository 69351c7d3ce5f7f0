/// A spotify user we've seen log in. The tokens are the user's
/// spotify credentials, stored in the clear here; persistent stores
/// are responsible for encrypting them at rest.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    // the user id assigned by spotify
    pub external_user_id: String,
    // `None` after the user logs out
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub created: chrono::DateTime<chrono::Utc>,
    pub modified: chrono::DateTime<chrono::Utc>,
}

/// Access (and maybe refresh) token pair returned by spotify's token endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Track {
    pub title: String,
    pub artist: String,
    #[serde(rename = "spotify_url")]
    pub external_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PlaylistResponse {
    #[serde(rename = "playlist_name")]
    pub name: String,
    #[serde(rename = "songs")]
    pub tracks: Vec<Track>,
}

#[derive(Debug, serde::Deserialize)]
pub struct TextRequest {
    pub text: String,
}
