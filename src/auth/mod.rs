//! Bearer token authentication for storefront customers and admins.
//!
//! Tokens are issued by the storefront's session layer; this service only
//! verifies them. A request without a token is a guest.

use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::{errors::ServiceError, AppState};

pub const ADMIN_ROLE: &str = "admin";

/// Claim structure for JWT tokens
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,           // Subject (customer ID)
    pub email: Option<String>, // Customer's email
    #[serde(default)]
    pub roles: Vec<String>,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
}

/// Authenticated customer extracted from the bearer token
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub roles: Vec<String>,
}

impl AuthUser {
    /// Check if the user has a specific role
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Check if the user is an admin
    pub fn is_admin(&self) -> bool {
        self.has_role(ADMIN_ROLE)
    }
}

#[derive(Clone)]
pub struct AuthService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
}

impl AuthService {
    pub fn new(jwt_secret: &str, issuer: impl Into<String>) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(jwt_secret.as_bytes()),
            issuer: issuer.into(),
        }
    }

    /// Signs a token for a customer. Used by the session layer and tests.
    pub fn issue_token(
        &self,
        user_id: Uuid,
        email: Option<String>,
        roles: Vec<String>,
        ttl: Duration,
    ) -> Result<String, ServiceError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            email,
            roles,
            iss: self.issuer.clone(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| ServiceError::InternalError(format!("Failed to sign token: {}", e)))
    }

    pub fn validate_token(&self, token: &str) -> Result<AuthUser, ServiceError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.issuer.as_str()]);

        let data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(|e| {
            debug!("Rejected bearer token: {}", e);
            ServiceError::Unauthorized("Invalid or expired token".to_string())
        })?;

        let user_id = Uuid::parse_str(&data.claims.sub)
            .map_err(|_| ServiceError::Unauthorized("Invalid token subject".to_string()))?;

        Ok(AuthUser {
            user_id,
            email: data.claims.email,
            roles: data.claims.roles,
        })
    }

    fn authenticate(&self, parts: &Parts) -> Result<Option<AuthUser>, ServiceError> {
        let Some(value) = parts.headers.get(header::AUTHORIZATION) else {
            return Ok(None);
        };
        let value = value
            .to_str()
            .map_err(|_| ServiceError::Unauthorized("Malformed Authorization header".into()))?;
        let token = value
            .strip_prefix("Bearer ")
            .ok_or_else(|| ServiceError::Unauthorized("Expected a Bearer token".into()))?;
        self.validate_token(token.trim()).map(Some)
    }
}

/// Customer if a valid token was sent, guest otherwise.
#[derive(Debug, Clone)]
pub struct OptionalUser(pub Option<AuthUser>);

#[async_trait]
impl FromRequestParts<AppState> for OptionalUser {
    type Rejection = ServiceError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        state.auth.authenticate(parts).map(OptionalUser)
    }
}

/// Requires an authenticated user holding the admin role.
#[derive(Debug, Clone)]
pub struct AdminUser(pub AuthUser);

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = ServiceError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = state
            .auth
            .authenticate(parts)?
            .ok_or_else(|| ServiceError::Unauthorized("Authentication required".into()))?;
        if !user.is_admin() {
            return Err(ServiceError::Forbidden("Admin role required".into()));
        }
        Ok(AdminUser(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const SECRET: &str = "a_test_secret_that_is_at_least_32_chars_long";

    #[test]
    fn issued_token_validates() {
        let auth = AuthService::new(SECRET, "storefront-api");
        let id = Uuid::new_v4();
        let token = auth
            .issue_token(
                id,
                Some("ada@example.com".into()),
                vec![ADMIN_ROLE.into()],
                Duration::minutes(5),
            )
            .unwrap();
        let user = auth.validate_token(&token).unwrap();
        assert_eq!(user.user_id, id);
        assert!(user.is_admin());
    }

    #[test]
    fn wrong_issuer_is_rejected() {
        let issuer = AuthService::new(SECRET, "someone-else");
        let verifier = AuthService::new(SECRET, "storefront-api");
        let token = issuer
            .issue_token(Uuid::new_v4(), None, vec![], Duration::minutes(5))
            .unwrap();
        assert_matches!(verifier.validate_token(&token), Err(ServiceError::Unauthorized(_)));
    }

    #[test]
    fn expired_token_is_rejected() {
        let auth = AuthService::new(SECRET, "storefront-api");
        let token = auth
            .issue_token(Uuid::new_v4(), None, vec![], Duration::minutes(-10))
            .unwrap();
        assert_matches!(auth.validate_token(&token), Err(ServiceError::Unauthorized(_)));
    }
}
