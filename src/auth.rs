use std::sync::Arc;

use async_mutex::Mutex;
use cached::stores::TimedCache;
use cached::Cached;
use slog::o;

use crate::config::{Config, SPOTIFY_SCOPES};
use crate::error::{Error, Result};
use crate::models::Identity;
use crate::session::{IssuedSession, SessionTokens};
use crate::spotify::MusicService;
use crate::store::IdentityStore;

/// One-time `state` values handed to spotify when starting a login.
/// A value is only good for a single callback, within its lifespan.
pub struct LoginStates {
    keys: Mutex<TimedCache<String, ()>>,
}

impl LoginStates {
    pub fn new(lifespan_seconds: u64) -> Self {
        Self {
            keys: Mutex::new(TimedCache::with_lifespan(lifespan_seconds)),
        }
    }

    pub async fn issue(&self) -> String {
        let s = uuid::Uuid::new_v4().simple().to_string();
        let mut lock = self.keys.lock().await;
        // abandoned logins never reach `consume`, drop them here
        lock.flush();
        lock.cache_set(s.clone(), ());
        s
    }

    /// True if `state` was issued, hasn't expired and hasn't been used yet
    pub async fn consume(&self, state: &str) -> bool {
        let mut lock = self.keys.lock().await;
        // `cache_get` drops expired entries, `cache_remove` does not check
        let live = lock.cache_get(&state.to_string()).is_some();
        lock.cache_remove(&state.to_string());
        live
    }
}

/// Drives the spotify login: sending users off to spotify,
/// handling the callback, and resolving session tokens to users.
pub struct Authenticator {
    client_id: String,
    redirect_uri: String,
    authorize_url: String,
    spotify: Arc<dyn MusicService>,
    store: Arc<dyn IdentityStore>,
    sessions: SessionTokens,
    login_states: LoginStates,
    log: slog::Logger,
}

impl Authenticator {
    pub fn new(
        config: &Config,
        spotify: Arc<dyn MusicService>,
        store: Arc<dyn IdentityStore>,
        log: &slog::Logger,
    ) -> Self {
        Self {
            client_id: config.spotify_client_id.clone(),
            redirect_uri: config.spotify_redirect_uri.clone(),
            authorize_url: format!("{}/authorize", config.spotify_accounts_url),
            spotify,
            store,
            sessions: SessionTokens::from_config(config),
            login_states: LoginStates::new(config.login_state_ttl_seconds),
            log: log.new(o!("component" => "auth")),
        }
    }

    /// The spotify url to send a user to so they can log in
    pub async fn begin_login(&self) -> Result<surf::Url> {
        let state = self.login_states.issue().await;
        let url = surf::Url::parse_with_params(
            &self.authorize_url,
            &[
                ("client_id", self.client_id.as_str()),
                ("response_type", "code"),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("scope", SPOTIFY_SCOPES),
                ("state", state.as_str()),
            ],
        )
        .map_err(|e| se!("invalid authorize url {}", e))?;
        slog::info!(self.log, "redirecting to spotify-auth"; "state" => &state);
        Ok(url)
    }

    /// After logging in, spotify sends users back with a one-time `code`
    /// and the `state` we sent along. The state must be one we issued.
    /// The code is traded for api tokens, which are stored against the
    /// spotify user id, and the user gets a session token of ours.
    pub async fn complete_login(&self, code: &str, state: &str) -> Result<IssuedSession> {
        if !self.login_states.consume(state).await {
            slog::warn!(self.log, "rejecting login callback"; "state" => state);
            return Err(Error::InvalidState(format!(
                "invalid one-time login state {}",
                state
            )));
        }
        let tokens = self.spotify.exchange_code(code).await?;
        let user_id = self.spotify.fetch_profile(&tokens.access_token).await?;
        let identity = self
            .store
            .upsert(
                &user_id,
                &tokens.access_token,
                tokens.refresh_token.as_deref(),
            )
            .await?;
        let session = self.sessions.issue(&user_id)?;
        slog::info!(
            self.log, "completing user login";
            "user" => &user_id,
            "is_new" => identity.created == identity.modified,
            "session_expires" => session.expires.to_rfc3339(),
        );
        Ok(session)
    }

    /// Resolve a bearer session token to the user's stored identity
    pub async fn authenticate(&self, token: &str) -> Result<Identity> {
        let user_id = self.sessions.verify(token)?;
        match self.store.find_by_id(&user_id).await? {
            Some(identity) => Ok(identity),
            None => {
                slog::info!(self.log, "session for unknown user"; "user" => &user_id);
                Err(Error::Auth("User not found".to_string()))
            }
        }
    }

    /// Drop the user's spotify tokens. Session tokens already handed
    /// out stay valid until they expire.
    pub async fn logout(&self, identity: &Identity) -> Result<()> {
        if let Err(e) = self.store.clear_tokens(&identity.external_user_id).await {
            if let Error::NotFound(_) = e {
                slog::error!(
                    self.log, "authenticated user vanished during logout";
                    "user" => &identity.external_user_id,
                );
            }
            return Err(e);
        }
        slog::info!(self.log, "logged out"; "user" => &identity.external_user_id);
        Ok(())
    }

    /// Swap the stored refresh token for a new spotify access token
    pub async fn refresh(&self, identity: &Identity) -> Result<Identity> {
        let refresh_token = identity.refresh_token.as_deref().ok_or_else(|| {
            Error::UpstreamAuth("No refresh token stored, log in again".to_string())
        })?;
        slog::info!(self.log, "refreshing access token"; "user" => &identity.external_user_id);
        let tokens = self.spotify.refresh_tokens(refresh_token).await?;
        let refresh_token = tokens
            .refresh_token
            .as_deref()
            .unwrap_or(refresh_token);
        // a logout that landed while spotify was answering wins
        self.store
            .replace_active_tokens(
                &identity.external_user_id,
                &tokens.access_token,
                Some(refresh_token),
            )
            .await?
            .ok_or_else(|| Error::UpstreamAuth("Logged out, log in again".to_string()))
    }
}
