use std::sync::Arc;

use slog::o;

use crate::auth::Authenticator;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::{Identity, TextRequest};
use crate::mood::{MoodDetector, SentimentScorer};
use crate::playlist::PlaylistGenerator;
use crate::spotify::MusicService;
use crate::store::IdentityStore;

#[derive(Clone)]
pub struct Context {
    version: String,
    auth: Arc<Authenticator>,
    playlists: Arc<PlaylistGenerator>,
    log: slog::Logger,
}

impl Context {
    pub fn new(
        config: &Config,
        store: Arc<dyn IdentityStore>,
        spotify: Arc<dyn MusicService>,
        scorer: Box<dyn SentimentScorer>,
        log: &slog::Logger,
    ) -> Self {
        Self {
            version: config.version.clone(),
            auth: Arc::new(Authenticator::new(config, spotify.clone(), store, log)),
            playlists: Arc::new(PlaylistGenerator::new(
                spotify,
                MoodDetector::new(scorer),
                log,
            )),
            log: log.new(o!("component" => "service")),
        }
    }
}

pub fn app(ctx: Context) -> tide::Server<Context> {
    let log = ctx.log.clone();
    let mut app = tide::with_state(ctx);
    app.at("/status").get(status);
    app.at("/auth/login").get(login);
    app.at("/auth/callback").get(auth_callback);
    app.at("/auth/logout").post(logout);
    app.at("/auth/refresh").post(refresh);
    app.at("/playlist").post(playlist);
    app.with(crate::logging::LogMiddleware::new(&log));
    app
}

pub async fn start(ctx: Context, config: &Config, log: &slog::Logger) -> anyhow::Result<()> {
    let app = app(ctx);
    slog::info!(log, "running at {}", config.host());
    app.listen(config.listen_addr()).await?;
    Ok(())
}

/// Turn a handler outcome into a response. Errors become
/// `{"detail": ...}` with the error's status.
fn respond<T: serde::Serialize>(ctx: &Context, out: Result<T>) -> tide::Result {
    match out {
        Ok(body) => Ok(resp!(json => body)),
        Err(e) => {
            match &e {
                Error::NotFound(_) | Error::Internal(_) => {
                    slog::error!(ctx.log, "request failed {}", e)
                }
                _ => slog::info!(ctx.log, "request failed {}", e),
            }
            Ok(e.into())
        }
    }
}

/// Pull the session token out of `Authorization: Bearer <token>`
fn bearer_token(header: Option<&str>) -> Result<String> {
    let header = header.ok_or_else(|| Error::Auth("Not authenticated".to_string()))?;
    let mut parts = header.splitn(2, ' ');
    match (parts.next(), parts.next()) {
        (Some(scheme), Some(token)) if scheme.eq_ignore_ascii_case("bearer") => {
            let token = token.trim();
            if token.is_empty() {
                Err(Error::Auth("Not authenticated".to_string()))
            } else {
                Ok(token.to_string())
            }
        }
        _ => Err(Error::Auth("Not authenticated".to_string())),
    }
}

async fn authenticated(req: &tide::Request<Context>) -> Result<Identity> {
    let token = bearer_token(req.header("authorization").map(|h| h.last().as_str()))?;
    req.state().auth.authenticate(&token).await
}

macro_rules! user_or_401 {
    ($req:expr) => {{
        match authenticated(&$req).await {
            Ok(identity) => identity,
            Err(e) => return respond::<()>($req.state(), Err(e)),
        }
    }};
}

#[derive(serde::Serialize)]
struct Status<'a> {
    ok: &'a str,
    version: &'a str,
}

async fn status(req: tide::Request<Context>) -> tide::Result {
    Ok(resp!(json => Status {
        ok: "ok",
        version: &req.state().version,
    }))
}

/// Send the user off to spotify to log in. Spotify redirects
/// back to our callback with a `code` and the `state` we sent.
async fn login(req: tide::Request<Context>) -> tide::Result {
    match req.state().auth.begin_login().await {
        Ok(url) => Ok(tide::Redirect::new(url).into()),
        Err(e) => respond::<()>(req.state(), Err(e)),
    }
}

#[derive(Debug, serde::Deserialize)]
struct SpotifyAuthCallback {
    code: Option<String>,
    state: Option<String>,
    // set instead of `code` when the user declines
    error: Option<String>,
}

#[derive(serde::Serialize)]
struct LoginResponse {
    message: &'static str,
    access_token: String,
    token_type: &'static str,
}

async fn complete_callback(req: &tide::Request<Context>) -> Result<LoginResponse> {
    let params: SpotifyAuthCallback = req
        .query()
        .map_err(|e| Error::BadRequest(format!("query parse error {}", e)))?;
    if let Some(error) = params.error {
        return Err(Error::UpstreamAuth(format!(
            "Spotify authorization failed: {}",
            error
        )));
    }
    let code = params
        .code
        .ok_or_else(|| Error::BadRequest("missing code".to_string()))?;
    let state = params
        .state
        .ok_or_else(|| Error::BadRequest("missing state".to_string()))?;
    let session = req.state().auth.complete_login(&code, &state).await?;
    Ok(LoginResponse {
        message: "Login successful",
        access_token: session.token,
        token_type: "bearer",
    })
}

async fn auth_callback(req: tide::Request<Context>) -> tide::Result {
    slog::info!(req.state().log, "got login redirect");
    let out = complete_callback(&req).await;
    respond(req.state(), out)
}

#[derive(serde::Serialize)]
struct MessageResponse {
    message: &'static str,
}

async fn logout(req: tide::Request<Context>) -> tide::Result {
    let user = user_or_401!(req);
    let out = req
        .state()
        .auth
        .logout(&user)
        .await
        .map(|_| MessageResponse {
            message: "Logged out successfully",
        });
    respond(req.state(), out)
}

async fn refresh(req: tide::Request<Context>) -> tide::Result {
    let user = user_or_401!(req);
    let out = req
        .state()
        .auth
        .refresh(&user)
        .await
        .map(|_| MessageResponse {
            message: "Access token refreshed",
        });
    respond(req.state(), out)
}

async fn playlist(mut req: tide::Request<Context>) -> tide::Result {
    let user = user_or_401!(req);
    let body: TextRequest = match req.body_json().await {
        Ok(body) => body,
        Err(e) => {
            return respond::<()>(
                req.state(),
                Err(Error::BadRequest(format!("invalid request body {}", e))),
            )
        }
    };
    let out = req.state().playlists.generate(&user, &body.text).await;
    respond(req.state(), out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PlaylistResponse;
    use crate::store::MemoryIdentityStore;
    use crate::test_support::{discard_log, test_config, FakeSpotify, FixedScorer};
    use tide::http::{Method, Request, Response, StatusCode, Url};

    struct Harness {
        app: tide::Server<Context>,
        spotify: Arc<FakeSpotify>,
        store: Arc<MemoryIdentityStore>,
    }

    fn harness(spotify: FakeSpotify, score: f64) -> Harness {
        let spotify = Arc::new(spotify);
        let store = Arc::new(MemoryIdentityStore::default());
        let ctx = Context::new(
            &test_config(),
            store.clone(),
            spotify.clone(),
            Box::new(FixedScorer(score)),
            &discard_log(),
        );
        Harness {
            app: app(ctx),
            spotify,
            store,
        }
    }

    impl Harness {
        async fn send(&self, req: Request) -> Response {
            self.app.respond(req).await.unwrap()
        }

        /// Go through /auth/login and /auth/callback, returning the session token
        async fn log_in(&self) -> String {
            let resp = self
                .send(Request::new(Method::Get, "http://localhost/auth/login"))
                .await;
            assert_eq!(resp.status(), StatusCode::Found);
            let location = Url::parse(resp.header("location").unwrap().last().as_str()).unwrap();
            let state = location
                .query_pairs()
                .find(|(k, _)| k == "state")
                .map(|(_, v)| v.into_owned())
                .unwrap();

            let mut resp = self
                .send(Request::new(
                    Method::Get,
                    format!("http://localhost/auth/callback?code=abc&state={}", state).as_str(),
                ))
                .await;
            assert_eq!(resp.status(), StatusCode::Ok);
            let body: serde_json::Value = resp.body_json().await.unwrap();
            assert_eq!(body["message"], "Login successful");
            assert_eq!(body["token_type"], "bearer");
            body["access_token"].as_str().unwrap().to_string()
        }
    }

    fn authed(method: Method, path: &str, token: &str) -> Request {
        let mut req = Request::new(method, format!("http://localhost{}", path).as_str());
        req.insert_header("authorization", format!("Bearer {}", token));
        req
    }

    fn playlist_request(token: &str, text: &str) -> Request {
        let mut req = authed(Method::Post, "/playlist", token);
        req.set_body(tide::Body::from_json(&serde_json::json!({ "text": text })).unwrap());
        req
    }

    #[async_std::test]
    async fn status_ok() {
        let h = harness(FakeSpotify::default(), 0.0);
        let mut resp = h
            .send(Request::new(Method::Get, "http://localhost/status"))
            .await;
        assert_eq!(resp.status(), StatusCode::Ok);
        let body: serde_json::Value = resp.body_json().await.unwrap();
        assert_eq!(body["version"], "test");
    }

    #[async_std::test]
    async fn login_then_playlist() {
        let h = harness(FakeSpotify::default(), 0.6);
        let token = h.log_in().await;

        let mut resp = h.send(playlist_request(&token, "I'm thrilled today!")).await;
        assert_eq!(resp.status(), StatusCode::Ok);
        let playlist: PlaylistResponse = resp.body_json().await.unwrap();
        assert_eq!(playlist.name, "Happy Vibes");
        assert_eq!(playlist.tracks.len(), 3);
        assert_eq!(
            playlist.tracks[0].external_url.as_deref(),
            Some("https://open.spotify.com/track/pop")
        );

        let searches = h.spotify.searches();
        assert_eq!(searches.len(), 1);
        assert_eq!(searches[0].access_token, "access-for-abc");
        assert_eq!(searches[0].genres, vec!["pop", "dance", "happy"]);
        assert_eq!(searches[0].limit, 10);
    }

    #[async_std::test]
    async fn playlist_requires_session() {
        let h = harness(FakeSpotify::default(), 0.6);
        let resp = h.send(playlist_request("not-a-token", "hello")).await;
        assert_eq!(resp.status(), StatusCode::Unauthorized);

        let mut req = Request::new(Method::Post, "http://localhost/playlist");
        req.set_body(tide::Body::from_json(&serde_json::json!({ "text": "hi" })).unwrap());
        let mut resp = h.send(req).await;
        assert_eq!(resp.status(), StatusCode::Unauthorized);
        let body: serde_json::Value = resp.body_json().await.unwrap();
        assert_eq!(body["detail"], "Not authenticated");
        assert!(h.spotify.searches().is_empty());
    }

    #[async_std::test]
    async fn playlist_bad_body() {
        let h = harness(FakeSpotify::default(), 0.6);
        let token = h.log_in().await;
        let mut req = authed(Method::Post, "/playlist", &token);
        req.set_body("{\"words\": 1}");
        req.set_content_type(tide::http::mime::JSON);
        let resp = h.send(req).await;
        assert_eq!(resp.status(), StatusCode::BadRequest);
    }

    #[async_std::test]
    async fn upstream_search_error_passes_status_through() {
        let h = harness(
            FakeSpotify {
                search_error: Some((403, "Insufficient client scope".to_string())),
                ..FakeSpotify::default()
            },
            0.6,
        );
        let token = h.log_in().await;
        let mut resp = h.send(playlist_request(&token, "yay")).await;
        assert_eq!(resp.status(), StatusCode::Forbidden);
        let body: serde_json::Value = resp.body_json().await.unwrap();
        assert_eq!(body["detail"], "Spotify API error: Insufficient client scope");
    }

    #[async_std::test]
    async fn callback_with_forged_state() {
        let h = harness(FakeSpotify::default(), 0.0);
        let resp = h
            .send(Request::new(
                Method::Get,
                "http://localhost/auth/callback?code=abc&state=random_string_for_csrf",
            ))
            .await;
        assert_eq!(resp.status(), StatusCode::BadRequest);
        assert_eq!(h.spotify.exchanges(), 0);
    }

    #[async_std::test]
    async fn callback_without_access_token() {
        let h = harness(
            FakeSpotify {
                deny_token: true,
                ..FakeSpotify::default()
            },
            0.0,
        );
        let resp = h
            .send(Request::new(Method::Get, "http://localhost/auth/login"))
            .await;
        let location = Url::parse(resp.header("location").unwrap().last().as_str()).unwrap();
        let state = location
            .query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned())
            .unwrap();
        let mut resp = h
            .send(Request::new(
                Method::Get,
                format!("http://localhost/auth/callback?code=abc&state={}", state).as_str(),
            ))
            .await;
        assert_eq!(resp.status(), StatusCode::BadRequest);
        let body: serde_json::Value = resp.body_json().await.unwrap();
        assert_eq!(body["detail"], "Failed to get access token");
        assert!(h.store.find_by_id("spotify-user").await.unwrap().is_none());
    }

    #[async_std::test]
    async fn callback_when_user_declines() {
        let h = harness(FakeSpotify::default(), 0.0);
        let resp = h
            .send(Request::new(
                Method::Get,
                "http://localhost/auth/callback?error=access_denied&state=x",
            ))
            .await;
        assert_eq!(resp.status(), StatusCode::BadRequest);
        assert_eq!(h.spotify.exchanges(), 0);
    }

    #[async_std::test]
    async fn logout_keeps_session_valid_but_playlist_fails() {
        let h = harness(FakeSpotify::default(), 0.6);
        let token = h.log_in().await;

        let mut resp = h.send(authed(Method::Post, "/auth/logout", &token)).await;
        assert_eq!(resp.status(), StatusCode::Ok);
        let body: serde_json::Value = resp.body_json().await.unwrap();
        assert_eq!(body["message"], "Logged out successfully");

        let identity = h.store.find_by_id("spotify-user").await.unwrap().unwrap();
        assert_eq!(identity.access_token, None);

        // the session token still authenticates after logout...
        let resp = h.send(authed(Method::Post, "/auth/logout", &token)).await;
        assert_eq!(resp.status(), StatusCode::Ok);
        // ...but there's no spotify token left to search with
        let resp = h.send(playlist_request(&token, "yay")).await;
        assert_eq!(resp.status(), StatusCode::Unauthorized);
        assert!(h.spotify.searches().is_empty());
    }

    #[async_std::test]
    async fn refresh_endpoint() {
        let h = harness(FakeSpotify::default(), 0.6);
        let token = h.log_in().await;
        let resp = h.send(authed(Method::Post, "/auth/refresh", &token)).await;
        assert_eq!(resp.status(), StatusCode::Ok);
        let identity = h.store.find_by_id("spotify-user").await.unwrap().unwrap();
        assert_eq!(
            identity.access_token.as_deref(),
            Some("refreshed-with-refresh-for-abc")
        );
        assert_eq!(identity.refresh_token.as_deref(), Some("refresh-for-abc"));
    }

    #[test]
    fn bearer_parsing() {
        assert_eq!(bearer_token(Some("Bearer abc.def")).unwrap(), "abc.def");
        assert_eq!(bearer_token(Some("bearer abc.def")).unwrap(), "abc.def");
        assert!(matches!(bearer_token(Some("Basic Zm9v")), Err(Error::Auth(_))));
        assert!(matches!(bearer_token(Some("Bearer ")), Err(Error::Auth(_))));
        assert!(matches!(bearer_token(Some("abc.def")), Err(Error::Auth(_))));
        assert!(matches!(bearer_token(None), Err(Error::Auth(_))));
    }
}
