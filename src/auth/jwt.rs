use axum::http::HeaderMap;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use log::warn;

use crate::auth::{Role, User};
use crate::config::TOKEN_TTL_HOURS;

// JWT Claims structure
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,      // Subject (user id as string)
    pub user_id: u64,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtManager {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 30; // Allow 30 seconds clock skew

        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn issue(&self, user: &User) -> Result<String, String> {
        let now = Utc::now();
        let claims = Claims {
            sub: user.id.to_string(),
            user_id: user.id,
            role: user.role,
            iat: now.timestamp(),
            exp: (now + Duration::hours(TOKEN_TTL_HOURS)).timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| format!("Failed to sign token: {}", e))
    }

    pub fn validate_token(&self, token: &str) -> Result<Claims, String> {
        match decode::<Claims>(token, &self.decoding_key, &self.validation) {
            Ok(token_data) => {
                let claims = token_data.claims;
                if claims.sub.is_empty() {
                    return Err("Invalid token claims".to_string());
                }
                Ok(claims)
            }
            Err(e) => {
                warn!("JWT validation error: {:?}", e);
                match e.kind() {
                    jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                        Err("Token has expired".to_string())
                    }
                    _ => Err("Token is invalid".to_string()),
                }
            }
        }
    }
}

// Extract JWT token from Authorization header
pub fn extract_jwt_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get("Authorization")
        .and_then(|auth_header| auth_header.to_str().ok())
        .and_then(|auth_str| auth_str.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}
