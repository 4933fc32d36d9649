//! Access tokens for task owners.
//!
//! A token is an HS256 JWT naming the owner (`sub`) whose tasks the bearer
//! may submit, list, cancel and watch. It is issued by this gateway (`iss`)
//! and checked on every HTTP request and WebSocket upgrade. No session
//! state is kept; a token stays valid until `exp`.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use taskforge_core::types::DbId;
use uuid::Uuid;

/// `iss` claim of every token this gateway issues; others are refused.
pub const TOKEN_ISSUER: &str = "taskforge-gateway";

/// Default token lifetime in minutes.
const DEFAULT_EXPIRY_MINS: i64 = 60;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Owner id: the user whose tasks this token reaches.
    pub sub: DbId,
    /// Username at issue time, for logs only.
    pub name: String,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    /// Per-token id (UUID v4).
    pub jti: String,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    /// HMAC secret shared by every gateway instance.
    pub secret: String,
    pub access_token_expiry_mins: i64,
}

impl JwtConfig {
    /// Load from `JWT_SECRET` (required, non-empty) and `JWT_EXPIRY_MINS`
    /// (default `60`).
    pub fn from_env() -> Self {
        let secret =
            std::env::var("JWT_SECRET").expect("JWT_SECRET must be set in the environment");
        assert!(!secret.is_empty(), "JWT_SECRET must not be empty");

        let access_token_expiry_mins: i64 = std::env::var("JWT_EXPIRY_MINS")
            .unwrap_or_else(|_| DEFAULT_EXPIRY_MINS.to_string())
            .parse()
            .expect("JWT_EXPIRY_MINS must be a valid i64");
        assert!(access_token_expiry_mins > 0, "JWT_EXPIRY_MINS must be positive");

        Self {
            secret,
            access_token_expiry_mins,
        }
    }

    fn lifetime_secs(&self) -> i64 {
        self.access_token_expiry_mins * 60
    }
}

/// A freshly signed token and its lifetime in seconds.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_in: i64,
}

pub fn issue_access_token(
    owner_id: DbId,
    username: &str,
    config: &JwtConfig,
) -> Result<IssuedToken, jsonwebtoken::errors::Error> {
    let now = chrono::Utc::now().timestamp();
    let claims = Claims {
        sub: owner_id,
        name: username.to_string(),
        iss: TOKEN_ISSUER.to_string(),
        iat: now,
        exp: now + config.lifetime_secs(),
        jti: Uuid::new_v4().to_string(),
    };

    let token = encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(config.secret.as_bytes()),
    )?;
    Ok(IssuedToken {
        token,
        expires_in: config.lifetime_secs(),
    })
}

/// Check signature, expiry and issuer, and return the claims.
pub fn verify_access_token(
    token: &str,
    config: &JwtConfig,
) -> Result<Claims, jsonwebtoken::errors::Error> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[TOKEN_ISSUER]);
    validation.set_required_spec_claims(&["exp", "iss"]);

    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.secret.as_bytes()),
        &validation,
    )?;
    Ok(data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(secret: &str) -> JwtConfig {
        JwtConfig {
            secret: secret.to_string(),
            access_token_expiry_mins: 15,
        }
    }

    fn sign(claims: &Claims, secret: &str) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn claims_for(owner_id: DbId, iss: &str, exp_offset: i64) -> Claims {
        let now = chrono::Utc::now().timestamp();
        Claims {
            sub: owner_id,
            name: "alice".into(),
            iss: iss.into(),
            iat: now - 600,
            exp: now + exp_offset,
            jti: Uuid::new_v4().to_string(),
        }
    }

    #[test]
    fn issued_token_names_its_owner() {
        let config = config("test-secret-that-is-long-enough-for-hmac");
        let issued = issue_access_token(42, "alice", &config).unwrap();
        assert_eq!(issued.expires_in, 15 * 60);

        let claims = verify_access_token(&issued.token, &config).unwrap();
        assert_eq!(claims.sub, 42);
        assert_eq!(claims.name, "alice");
        assert_eq!(claims.iss, TOKEN_ISSUER);
        assert_eq!(claims.exp - claims.iat, issued.expires_in);
    }

    #[test]
    fn expired_token_is_refused() {
        let secret = "test-secret";
        // Well past the default 60-second leeway.
        let token = sign(&claims_for(1, TOKEN_ISSUER, -300), secret);
        assert!(verify_access_token(&token, &config(secret)).is_err());
    }

    #[test]
    fn token_from_another_issuer_is_refused() {
        let secret = "test-secret";
        let token = sign(&claims_for(1, "someone-else", 300), secret);
        assert!(verify_access_token(&token, &config(secret)).is_err());
    }

    #[test]
    fn token_signed_with_another_secret_is_refused() {
        let issued = issue_access_token(1, "alice", &config("secret-alpha")).unwrap();
        assert!(verify_access_token(&issued.token, &config("secret-bravo")).is_err());
    }
}
