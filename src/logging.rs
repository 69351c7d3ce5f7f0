use std::time::Instant;

use slog::{o, Drain};

/// Build the root logger that every component branches off of.
/// `format` is either "pretty" (terminal) or anything else for json.
pub fn root_logger(format: &str, level: &str) -> anyhow::Result<slog::Logger> {
    let level: slog::Level = level
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid log_level {:?}", level))?;
    let log = if format == "pretty" {
        let decorator = slog_term::TermDecorator::new().build();
        let drain = slog_term::CompactFormat::new(decorator).build().fuse();
        let drain = slog_async::Async::new(drain).build().fuse();
        let drain = slog::LevelFilter::new(drain, level).fuse();
        slog::Logger::root(drain, o!())
    } else {
        let drain = slog_json::Json::default(std::io::stderr()).fuse();
        let drain = slog_async::Async::new(drain).build().fuse();
        let drain = slog::LevelFilter::new(drain, level).fuse();
        slog::Logger::root(drain, o!())
    };
    Ok(log)
}

/// Logs a line per request with its status and how long it took
pub struct LogMiddleware {
    log: slog::Logger,
}

impl LogMiddleware {
    pub fn new(log: &slog::Logger) -> Self {
        Self {
            log: log.new(o!("component" => "http")),
        }
    }
}

#[tide::utils::async_trait]
impl<State: Clone + Send + Sync + 'static> tide::Middleware<State> for LogMiddleware {
    async fn handle(&self, req: tide::Request<State>, next: tide::Next<'_, State>) -> tide::Result {
        let method = req.method().to_string();
        let path = req.url().path().to_string();
        let start = Instant::now();
        let resp = next.run(req).await;
        let status = u16::from(resp.status());
        let elapsed_ms = start.elapsed().as_millis() as u64;
        if status >= 500 {
            slog::error!(
                self.log, "request";
                "method" => method, "path" => path, "status" => status, "elapsed_ms" => elapsed_ms,
            );
        } else {
            slog::info!(
                self.log, "request";
                "method" => method, "path" => path, "status" => status, "elapsed_ms" => elapsed_ms,
            );
        }
        Ok(resp)
    }
}
