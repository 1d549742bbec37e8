use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config;

/// Bearer token claims. `tenant_id` and `group_id` feed the request's TenantContext.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub tenant_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<Uuid>,
    pub exp: i64,
    pub iat: i64,
}

impl Claims {
    pub fn new(sub: impl Into<String>, tenant_id: Uuid, group_id: Option<Uuid>) -> Self {
        Self::with_expiry(sub, tenant_id, group_id, config::config().security.jwt_expiry_hours)
    }

    pub fn with_expiry(sub: impl Into<String>, tenant_id: Uuid, group_id: Option<Uuid>, expiry_hours: u64) -> Self {
        let now = Utc::now();
        let exp = (now + Duration::hours(expiry_hours as i64)).timestamp();

        Self {
            sub: sub.into(),
            tenant_id,
            group_id,
            exp,
            iat: now.timestamp(),
        }
    }
}

#[derive(Debug)]
pub enum JwtError {
    TokenGeneration(String),
    InvalidToken(String),
    InvalidSecret,
}

impl std::fmt::Display for JwtError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JwtError::TokenGeneration(msg) => write!(f, "JWT generation error: {}", msg),
            JwtError::InvalidToken(msg) => write!(f, "Invalid JWT token: {}", msg),
            JwtError::InvalidSecret => write!(f, "JWT secret not configured"),
        }
    }
}

impl std::error::Error for JwtError {}

pub fn generate_jwt(claims: &Claims) -> Result<String, JwtError> {
    encode_jwt(claims, &config::config().security.jwt_secret)
}

pub fn encode_jwt(claims: &Claims, secret: &str) -> Result<String, JwtError> {
    if secret.is_empty() {
        return Err(JwtError::InvalidSecret);
    }

    let encoding_key = EncodingKey::from_secret(secret.as_bytes());
    encode(&Header::default(), claims, &encoding_key)
        .map_err(|e| JwtError::TokenGeneration(e.to_string()))
}

pub fn decode_jwt(token: &str, secret: &str) -> Result<Claims, JwtError> {
    if secret.is_empty() {
        return Err(JwtError::InvalidSecret);
    }

    let decoding_key = DecodingKey::from_secret(secret.as_bytes());
    decode::<Claims>(token, &decoding_key, &Validation::default())
        .map(|data| data.claims)
        .map_err(|e| JwtError::InvalidToken(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_carries_tenant_and_group() {
        let tenant = Uuid::new_v4();
        let group = Uuid::new_v4();
        let claims = Claims::with_expiry("user-1", tenant, Some(group), 1);

        let token = encode_jwt(&claims, "test-secret").unwrap();
        let decoded = decode_jwt(&token, "test-secret").unwrap();

        assert_eq!(decoded, claims);
    }

    #[test]
    fn rejects_wrong_secret_and_empty_secret() {
        let claims = Claims::with_expiry("user-1", Uuid::new_v4(), None, 1);
        let token = encode_jwt(&claims, "test-secret").unwrap();

        assert!(matches!(decode_jwt(&token, "other"), Err(JwtError::InvalidToken(_))));
        assert!(matches!(encode_jwt(&claims, ""), Err(JwtError::InvalidSecret)));
    }
}
