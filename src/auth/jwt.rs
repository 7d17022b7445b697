//! JWT token management

use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, TokenData, Validation, decode, encode,
    errors::ErrorKind,
};

use crate::auth::types::JwtClaims;
use crate::config::AuthConfig;
use crate::error::{HubError, Result};

/// JWT token manager
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: String,
    audience: String,
}

impl std::fmt::Debug for JwtManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtManager")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .finish_non_exhaustive()
    }
}

impl JwtManager {
    /// Create new JWT manager
    #[must_use]
    pub fn new(config: &AuthConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.jwt_secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(config.jwt_secret.as_bytes());

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[config.issuer.as_str()]);
        validation.set_audience(&[config.audience.as_str()]);
        validation.validate_exp = true;
        validation.validate_nbf = false;
        validation.leeway = config.leeway_seconds;

        Self {
            encoding_key,
            decoding_key,
            validation,
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
        }
    }

    /// Generate a token for the given user
    pub fn generate_token(&self, user_id: i32, expires_in_seconds: i64) -> Result<String> {
        let claims = JwtClaims::new(user_id, &self.issuer, &self.audience, expires_in_seconds);
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| HubError::internal_with_source("认证令牌生成失败", e))
    }

    /// Validate and parse token
    pub fn validate_token(&self, token: &str) -> Result<JwtClaims> {
        let token_data: TokenData<JwtClaims> = decode(token, &self.decoding_key, &self.validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => HubError::unauthorized("认证令牌已过期"),
                _ => HubError::unauthorized(format!("认证令牌无效: {e}")),
            })?;
        Ok(token_data.claims)
    }

    /// Validate token and return the user id
    pub fn authenticate(&self, token: &str) -> Result<i32> {
        self.validate_token(token)?
            .user_id()
            .map_err(|_| HubError::unauthorized("认证令牌中的用户ID无效"))
    }
}
