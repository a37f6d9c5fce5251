/// Authentication extractors and utilities
///
/// Identity is issued elsewhere; this service only verifies HS256 bearer tokens
/// and turns them into an explicit [`Session`] handed to every operation.
use crate::{context::AppContext, error::RentalError, error::RentalResult};
use axum::{
    async_trait,
    extract::{FromRequestParts, Query},
    http::request::Parts,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Caller role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Client,
    Admin,
}

/// The authenticated caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub email: String,
    pub role: Role,
}

impl Session {
    pub fn new(email: &str, role: Role) -> Self {
        Self {
            email: email.trim().to_lowercase(),
            role,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// True when the caller is an admin or matches one of the owner emails
    pub fn can_act_for(&self, owner_emails: &[&str]) -> bool {
        self.is_admin()
            || owner_emails
                .iter()
                .any(|owner| owner.trim().eq_ignore_ascii_case(&self.email))
    }

    pub fn require_admin(&self) -> RentalResult<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(RentalError::Authorization(format!(
                "{} is not an administrator",
                self.email
            )))
        }
    }
}

/// Token claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub role: Option<String>,
    pub exp: usize,
}

/// Verify a JWT token with signature and expiry checks
pub fn verify_token(token: &str, jwt_secret: &str) -> RentalResult<Claims> {
    use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

    let decoding_key = DecodingKey::from_secret(jwt_secret.as_bytes());
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 60;

    decode::<Claims>(token, &decoding_key, &validation)
        .map(|data| data.claims)
        .map_err(|e| {
            tracing::warn!("JWT verification failed: {}", e);
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    RentalError::Authentication("Token has expired".to_string())
                }
                jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                    RentalError::Authentication("Invalid token signature".to_string())
                }
                _ => RentalError::Authentication(format!("Invalid token: {}", e)),
            }
        })
}

/// Build a session from verified claims
pub fn session_from_claims(claims: &Claims, ctx: &AppContext) -> RentalResult<Session> {
    let email = claims.sub.trim();
    if email.is_empty() {
        return Err(RentalError::Authentication(
            "Token subject is empty".to_string(),
        ));
    }

    let claimed_admin = claims
        .role
        .as_deref()
        .map(|r| r.eq_ignore_ascii_case("admin"))
        .unwrap_or(false);
    let role = if claimed_admin || ctx.config.is_admin_email(email) {
        Role::Admin
    } else {
        Role::Client
    };

    Ok(Session::new(email, role))
}

/// Bearer token from the Authorization header, or `access_token` query
/// parameter for WebSocket upgrades where browsers cannot set headers
async fn bearer_token(parts: &mut Parts, ctx: &AppContext) -> Option<String> {
    if let Ok(TypedHeader(Authorization(bearer))) =
        TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, ctx).await
    {
        return Some(bearer.token().to_string());
    }

    Query::<HashMap<String, String>>::try_from_uri(&parts.uri)
        .ok()
        .and_then(|Query(params)| params.get("access_token").cloned())
        .filter(|t| !t.is_empty())
}

#[async_trait]
impl FromRequestParts<AppContext> for Session {
    type Rejection = RentalError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts, state)
            .await
            .ok_or_else(|| RentalError::Authentication("Missing authorization header".to_string()))?;

        let claims = verify_token(&token, &state.config.authentication.jwt_secret)?;
        session_from_claims(&claims, state)
    }
}

/// Admin session - rejects callers without the admin role
#[derive(Debug, Clone)]
pub struct AdminSession(pub Session);

#[async_trait]
impl FromRequestParts<AppContext> for AdminSession {
    type Rejection = RentalError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let session = Session::from_request_parts(parts, state).await?;
        session.require_admin()?;
        Ok(AdminSession(session))
    }
}

/// Sign a token the way the identity provider does
#[cfg(test)]
pub(crate) fn issue_token(email: &str, role: Option<&str>, jwt_secret: &str) -> String {
    use jsonwebtoken::{encode, EncodingKey, Header};

    let claims = Claims {
        sub: email.to_string(),
        role: role.map(String::from),
        exp: (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp() as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(jwt_secret.as_bytes()),
    )
    .unwrap()
}
