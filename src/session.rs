use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};

use crate::config::Config;
use crate::error::{Error, Result};

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct Claims {
    sub: String,
    exp: i64,
}

#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub token: String,
    pub expires: DateTime<Utc>,
}

/// Issues and verifies the signed bearer tokens handed to our users
/// after they log in with spotify.
///
/// Tokens are stateless: nothing is stored, so a token stays valid
/// until it expires even if the user logs out in the meantime.
pub struct SessionTokens {
    algorithm: Algorithm,
    encoding: EncodingKey,
    decoding: DecodingKey,
    lifetime: Duration,
}

impl SessionTokens {
    pub fn new(secret: &str, algorithm: Algorithm, lifetime: Duration) -> Self {
        Self {
            algorithm,
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            lifetime,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.signing_secret,
            config.signing_algorithm,
            config.token_lifetime(),
        )
    }

    pub fn issue(&self, external_user_id: &str) -> Result<IssuedSession> {
        self.issue_at(external_user_id, Utc::now())
    }

    pub fn issue_at(&self, external_user_id: &str, now: DateTime<Utc>) -> Result<IssuedSession> {
        let expires = now
            .checked_add_signed(self.lifetime)
            .ok_or_else(|| se!("error creating session expiration timestamp"))?;
        let claims = Claims {
            sub: external_user_id.to_string(),
            exp: expires.timestamp(),
        };
        let token = jsonwebtoken::encode(&Header::new(self.algorithm), &claims, &self.encoding)
            .map_err(|e| se!("error signing session token {}", e))?;
        Ok(IssuedSession { token, expires })
    }

    /// Return the token's subject (a spotify user id) if the token
    /// is well formed, correctly signed and not yet expired.
    pub fn verify(&self, token: &str) -> Result<String> {
        self.verify_at(token, Utc::now())
    }

    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<String> {
        // expiry is checked below against `now`, without jsonwebtoken's leeway
        let mut validation = Validation::new(self.algorithm);
        validation.validate_exp = false;
        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding, &validation)
            .map_err(|e| Error::Auth(format!("Invalid authentication: {}", e)))?;
        if now.timestamp() >= data.claims.exp {
            return Err(Error::Auth("Session expired".to_string()));
        }
        if data.claims.sub.is_empty() {
            return Err(Error::Auth("Invalid authentication".to_string()));
        }
        Ok(data.claims.sub)
    }
}
