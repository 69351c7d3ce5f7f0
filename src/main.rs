use std::sync::Arc;

use slog::o;
use sqlx::postgres::PgPoolOptions;

/// Build an `Error::Internal` from format args
macro_rules! se {
    ($($arg:tt)*) => {
        crate::error::Error::Internal(format!($($arg)*))
    };
}

macro_rules! resp {
    (json => $obj:expr) => {{
        tide::Response::builder(200)
            .content_type(tide::http::mime::JSON)
            .body(tide::Body::from_json(&$obj)?)
            .build()
    }};
    (status => $status:expr, message => $msg:expr) => {{
        tide::Response::builder($status)
            .body(serde_json::json!({ "detail": $msg }))
            .build()
    }};
}

mod auth;
mod config;
mod crypto;
mod error;
mod genres;
mod logging;
mod models;
mod mood;
mod playlist;
mod service;
mod session;
mod spotify;
mod store;

#[cfg(test)]
mod test_support;

use config::Config;
use store::{IdentityStore, MemoryIdentityStore, PgIdentityStore};

#[async_std::main]
async fn main() -> anyhow::Result<()> {
    // try sourcing a .env if one exists
    dotenv::dotenv().ok();
    let config = Config::load()?;
    let log = logging::root_logger(&config.log_format, &config.log_level)?
        .new(o!("app" => "moodlist"));
    config.log_summary(&log);

    let store: Arc<dyn IdentityStore> = match &config.db_url {
        Some(db_url) => {
            let enc_key = config
                .enc_key
                .clone()
                .ok_or_else(|| anyhow::anyhow!("ENC_KEY is required with DATABASE_URL"))?;
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(db_url)
                .await?;
            sqlx::migrate!("./migrations").run(&pool).await?;
            Arc::new(PgIdentityStore::new(pool, enc_key, &log))
        }
        None => {
            slog::warn!(
                log,
                "DATABASE_URL not set, identities are kept in memory and lost on restart"
            );
            Arc::new(MemoryIdentityStore::default())
        }
    };
    let spotify = Arc::new(spotify::SpotifyClient::new(&config, &log));
    let scorer = Box::new(mood::VaderScorer::new());

    let ctx = service::Context::new(&config, store, spotify, scorer, &log);
    service::start(ctx, &config, &log).await
}
