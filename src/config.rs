use std::env;
use std::io::Read;
use std::fs;

use anyhow::{anyhow, Context as _};
use chrono::Duration;
use jsonwebtoken::Algorithm;

pub const SPOTIFY_SCOPES: &str = "user-read-private user-read-email user-top-read";

fn env_or(k: &str, default: &str) -> String {
    env::var(k).unwrap_or_else(|_| default.to_string())
}

fn env_required(k: &str) -> anyhow::Result<String> {
    env::var(k).map_err(|_| anyhow!("missing required env var {}", k))
}

/// Everything the service needs from its environment. Loaded once
/// in `main` and handed to each component's constructor.
#[derive(Clone, Debug)]
pub struct Config {
    pub version: String,
    pub ssl: bool,
    pub host: String,
    pub port: u16,
    pub log_format: String,
    pub log_level: String,
    pub spotify_client_id: String,
    pub spotify_client_secret: String,
    pub spotify_redirect_uri: String,
    pub spotify_accounts_url: String,
    pub spotify_api_url: String,
    // secret used to sign session tokens
    pub signing_secret: String,
    pub signing_algorithm: Algorithm,
    pub token_lifetime_minutes: i64,
    pub login_state_ttl_seconds: u64,
    pub db_url: Option<String>,
    // 32 byte AES_256_GCM key for tokens stored in postgres
    pub enc_key: Option<Vec<u8>>,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let version = fs::File::open("commit_hash.txt")
            .map(|mut f| {
                let mut s = String::new();
                f.read_to_string(&mut s).ok();
                s.trim().to_string()
            })
            .unwrap_or_else(|_| "unknown".to_string());
        let signing_algorithm = parse_algorithm(&env_or("ALGORITHM", "HS256"))?;
        let enc_key = env::var("ENC_KEY")
            .ok()
            .map(|k| parse_enc_key(&k))
            .transpose()?;
        let token_lifetime_minutes: i64 = env_or("ACCESS_TOKEN_EXPIRE_MINUTES", "30")
            .parse()
            .context("invalid ACCESS_TOKEN_EXPIRE_MINUTES")?;
        let db_url = env::var("DATABASE_URL").ok();
        check_storage_keys(db_url.as_deref(), enc_key.as_deref())?;
        if token_lifetime_minutes <= 0 {
            return Err(anyhow!("ACCESS_TOKEN_EXPIRE_MINUTES must be positive"));
        }
        Ok(Self {
            version,
            ssl: env_or("SSL", "false") == "true",
            host: env_or("HOST", "localhost"),
            port: env_or("PORT", "3030").parse().context("invalid PORT")?,
            log_format: env_or("LOG_FORMAT", "json")
                .to_lowercase()
                .trim()
                .to_string(),
            log_level: env_or("LOG_LEVEL", "INFO"),
            spotify_client_id: env_required("SPOTIFY_CLIENT_ID")?,
            spotify_client_secret: env_required("SPOTIFY_CLIENT_SECRET")?,
            spotify_redirect_uri: env_required("SPOTIFY_REDIRECT_URI")?,
            spotify_accounts_url: env_or("SPOTIFY_ACCOUNTS_URL", "https://accounts.spotify.com")
                .trim_end_matches('/')
                .to_string(),
            spotify_api_url: env_or("SPOTIFY_API_URL", "https://api.spotify.com/v1")
                .trim_end_matches('/')
                .to_string(),
            signing_secret: env_required("SECRET_KEY")?,
            signing_algorithm,
            token_lifetime_minutes,
            login_state_ttl_seconds: env_or("LOGIN_STATE_TTL_SECONDS", "300")
                .parse()
                .context("invalid LOGIN_STATE_TTL_SECONDS")?,
            db_url,
            enc_key,
        })
    }

    pub fn log_summary(&self, log: &slog::Logger) {
        slog::info!(
            log, "initialized config";
            "version" => &self.version,
            "ssl" => self.ssl,
            "host" => &self.host,
            "port" => self.port,
            "log_format" => &self.log_format,
            "log_level" => &self.log_level,
            "redirect_uri" => &self.spotify_redirect_uri,
            "algorithm" => format!("{:?}", self.signing_algorithm),
            "token_lifetime_minutes" => self.token_lifetime_minutes,
            "database" => self.db_url.is_some(),
        );
    }

    pub fn host(&self) -> String {
        let p = if self.ssl { "https" } else { "http" };
        format!("{}://{}:{}", p, self.host, self.port)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn token_lifetime(&self) -> Duration {
        Duration::minutes(self.token_lifetime_minutes)
    }
}

/// Session tokens are signed with a shared secret, so only the
/// HMAC family makes sense here.
pub fn parse_algorithm(s: &str) -> anyhow::Result<Algorithm> {
    match s.trim().to_uppercase().as_str() {
        "HS256" => Ok(Algorithm::HS256),
        "HS384" => Ok(Algorithm::HS384),
        "HS512" => Ok(Algorithm::HS512),
        other => Err(anyhow!("unsupported signing algorithm {:?}", other)),
    }
}

/// Tokens are only ever written to postgres encrypted
fn check_storage_keys(db_url: Option<&str>, enc_key: Option<&[u8]>) -> anyhow::Result<()> {
    if db_url.is_some() && enc_key.is_none() {
        return Err(anyhow!("ENC_KEY is required with DATABASE_URL"));
    }
    Ok(())
}

fn parse_enc_key(s: &str) -> anyhow::Result<Vec<u8>> {
    let key = s.as_bytes().to_vec();
    if key.len() != 32 {
        return Err(anyhow!("ENC_KEY must be 32 bytes, got {}", key.len()));
    }
    Ok(key)
}
