use actix_web::{dev::Payload, Error, FromRequest, HttpRequest};
use actix_web_httpauth::extractors::bearer::BearerAuth;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::env;
use std::future::{ready, Ready};
use utoipa::ToSchema;

use crate::error::ApiError;
use crate::models::Id;

const TOKEN_TTL_HOURS: i64 = 24;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Some(Role::User),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Numeric user id, as a string.
    pub sub: String,
    pub username: String,
    pub exp: usize,
    pub roles: Vec<Role>,
}

#[derive(thiserror::Error, Debug)]
pub enum AuthError {
    #[error("JWT_SECRET not set")]
    MissingSecret,
    #[error(transparent)]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

fn secret() -> Result<String, AuthError> {
    env::var("JWT_SECRET").map_err(|_| AuthError::MissingSecret)
}

/// Validate a JWT and return its claims.
fn decode_jwt(token: &str) -> Result<Claims, AuthError> {
    let secret = secret()?;
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )?;
    Ok(data.claims)
}

/// Extractor yielding validated `Claims`.
pub struct Auth(pub Claims);

impl Auth {
    pub fn user_id(&self) -> Result<Id, ApiError> {
        self.0
            .sub
            .parse()
            .map_err(|_| ApiError::Unauthorized("Invalid token subject".into()))
    }

    pub fn username(&self) -> &str {
        &self.0.username
    }

    pub fn is_admin(&self) -> bool {
        self.0.roles.iter().any(|r| matches!(r, Role::Admin))
    }
}

impl FromRequest for Auth {
    type Error = Error;
    type Future = Ready<Result<Self, Error>>;

    fn from_request(req: &HttpRequest, pl: &mut Payload) -> Self::Future {
        // Delegate to BearerAuth to parse the header.
        if let Ok(bearer) = BearerAuth::from_request(req, pl).into_inner() {
            return match decode_jwt(bearer.token()) {
                Ok(claims) => ready(Ok(Auth(claims))),
                Err(e) => {
                    tracing::debug!(error = %e, "rejected bearer token");
                    ready(Err(ApiError::Unauthorized("Invalid token".into()).into()))
                }
            };
        }
        ready(Err(ApiError::Unauthorized("Authorization required".into()).into()))
    }
}

/// Helper macro for role-guarding handlers.
#[macro_export]
macro_rules! require_role {
    ($auth:expr, $role:pat) => {
        if !$auth.0.roles.iter().any(|r| matches!(r, $role)) {
            return Err($crate::error::ApiError::Forbidden.into());
        }
    };
}

/// Issue a bearer token for a user.
pub fn create_jwt(user_id: Id, username: &str, roles: Vec<Role>) -> Result<String, AuthError> {
    let secret = secret()?;
    let expiration = (chrono::Utc::now() + chrono::Duration::hours(TOKEN_TTL_HOURS)).timestamp() as usize;

    let claims = Claims {
        sub: user_id.to_string(),
        username: username.to_string(),
        exp: expiration,
        roles,
    };

    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?)
}
