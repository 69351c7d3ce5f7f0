use std::convert::TryFrom;

use tide::StatusCode;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Token exchange or profile lookup against spotify failed
    #[error("{0}")]
    UpstreamAuth(String),

    /// A spotify api call came back with a non-success status
    #[error("Spotify API error: {message}")]
    UpstreamApi { status: u16, message: String },

    /// Missing, invalid or expired session, or a session for an unknown user
    #[error("{0}")]
    Auth(String),

    /// The login `state` was never issued, already used, or expired
    #[error("{0}")]
    InvalidState(String),

    #[error("{0}")]
    BadRequest(String),

    /// Only reachable when an authenticated user's record has vanished
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Internal(String),
}

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Error::UpstreamAuth(_) | Error::InvalidState(_) | Error::BadRequest(_) => {
                StatusCode::BadRequest
            }
            Error::UpstreamApi { status, .. } => {
                StatusCode::try_from(*status).unwrap_or(StatusCode::BadGateway)
            }
            Error::Auth(_) => StatusCode::Unauthorized,
            Error::NotFound(_) | Error::Internal(_) => StatusCode::InternalServerError,
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        se!("database error {}", e)
    }
}

impl From<Error> for tide::Response {
    fn from(e: Error) -> Self {
        resp!(status => e.status(), message => e.to_string())
    }
}
