//! Signed bearer tokens with a bounded permission cache.
//!
//! Tokens are HS256 JWTs carrying `{subject, permission_cache, issued_at,
//! expires_at}`. The service is a pure transform plus a signature check;
//! nothing is persisted, and the cache's LRU bookkeeping travels inside the
//! claim itself.

use casefile_core::config::CoreConfig;
use casefile_core::error::{AuthErrorKind, CasefileError, Result};
use casefile_core::permission::{PermissionCache, PermissionLevel};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// The claims carried by a bearer token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// The authenticated user
    pub sub: String,
    /// Advisory casefile-to-level cache; the ACL stays authoritative
    #[serde(default)]
    pub permission_cache: PermissionCache,
    /// Issued-at, seconds since epoch
    pub iat: i64,
    /// Expiry, seconds since epoch
    pub exp: i64,
}

/// Issues, validates, and refreshes bearer tokens.
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl_secs: i64,
    max_cache_entries: usize,
}

impl TokenService {
    /// Creates a service signing with the given secret.
    pub fn new(secret: &[u8], config: &CoreConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            ttl_secs: config.token_ttl_secs,
            max_cache_entries: config.permission_cache_max_entries,
        }
    }

    /// Issues a fresh token for `user_id` with the given permission cache.
    pub fn issue(&self, user_id: &str, permission_cache: PermissionCache) -> Result<String> {
        let now = Utc::now().timestamp();
        let claims = TokenClaims {
            sub: user_id.to_string(),
            permission_cache,
            iat: now,
            exp: now + self.ttl_secs,
        };
        self.sign(&claims)
    }

    /// Validates a token and returns its claims.
    pub fn validate(&self, token: &str) -> Result<TokenClaims> {
        decode::<TokenClaims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(map_jwt_error)
    }

    /// Merges new permission entries into the token's cache and re-signs.
    ///
    /// The original expiry is preserved: refreshing scopes must not extend
    /// the token's lifetime. The merged cache is bounded; least-recently-
    /// touched entries are evicted beyond the configured maximum.
    pub fn refresh_scopes(
        &self,
        token: &str,
        new_entries: impl IntoIterator<Item = (String, PermissionLevel)>,
    ) -> Result<String> {
        let mut claims = self.validate(token)?;
        claims
            .permission_cache
            .merge(new_entries, Utc::now(), self.max_cache_entries);
        self.sign(&claims)
    }

    fn sign(&self, claims: &TokenClaims) -> Result<String> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| CasefileError::internal(format!("failed to sign token: {e}")))
    }
}

fn map_jwt_error(err: jsonwebtoken::errors::Error) -> CasefileError {
    use jsonwebtoken::errors::ErrorKind;
    let kind = match err.kind() {
        ErrorKind::ExpiredSignature => AuthErrorKind::Expired,
        ErrorKind::InvalidSignature => AuthErrorKind::SignatureInvalid,
        _ => AuthErrorKind::Malformed,
    };
    CasefileError::auth(kind)
}
