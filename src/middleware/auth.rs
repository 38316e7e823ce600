use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Instructor,
    Admin,
}

impl Role {
    pub fn is_staff(&self) -> bool {
        matches!(self, Role::Instructor | Role::Admin)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub exp: usize,
    pub role: Role,
}

/// Caller identity, passed explicitly into every service operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub role: Role,
}

impl AuthContext {
    pub fn student(user_id: Uuid) -> Self {
        Self {
            user_id,
            role: Role::Student,
        }
    }
}

pub fn issue_token(secret: &str, user_id: Uuid, role: Role, ttl: Duration) -> Result<String> {
    let claims = Claims {
        sub: user_id,
        exp: (Utc::now() + ttl).timestamp().max(0) as usize,
        role,
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| Error::Internal(format!("Failed to sign token: {}", e)))
}

fn authenticate(headers: &HeaderMap, secret: &str) -> Result<AuthContext> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .ok_or_else(|| Error::Unauthorized("Missing authorization header".to_string()))?;
    let auth_str = auth_header
        .to_str()
        .map_err(|_| Error::Unauthorized("Malformed authorization header".to_string()))?;
    let token = auth_str
        .strip_prefix("Bearer ")
        .ok_or_else(|| Error::Unauthorized("Unsupported authorization scheme".to_string()))?;

    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|_| Error::Unauthorized("Invalid or expired token".to_string()))?;

    Ok(AuthContext {
        user_id: data.claims.sub,
        role: data.claims.role,
    })
}

pub async fn require_student(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let auth = match authenticate(req.headers(), &state.config.jwt_secret) {
        Ok(auth) => auth,
        Err(e) => return e.into_response(),
    };
    if auth.role != Role::Student {
        return Error::Forbidden("Student role required".to_string()).into_response();
    }
    req.extensions_mut().insert(auth);
    next.run(req).await
}

pub async fn require_staff(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let auth = match authenticate(req.headers(), &state.config.jwt_secret) {
        Ok(auth) => auth,
        Err(e) => return e.into_response(),
    };
    if !auth.role.is_staff() {
        return Error::Forbidden("Instructor or admin role required".to_string()).into_response();
    }
    req.extensions_mut().insert(auth);
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
        );
        headers
    }

    #[test]
    fn issued_token_round_trips_identity() {
        let user = Uuid::new_v4();
        let token = issue_token("secret", user, Role::Instructor, Duration::hours(1)).unwrap();
        let auth = authenticate(&bearer(&token), "secret").unwrap();
        assert_eq!(auth.user_id, user);
        assert!(auth.role.is_staff());
    }

    #[test]
    fn wrong_secret_and_expired_tokens_are_rejected() {
        let user = Uuid::new_v4();
        let token = issue_token("secret", user, Role::Student, Duration::hours(1)).unwrap();
        assert!(matches!(
            authenticate(&bearer(&token), "other"),
            Err(Error::Unauthorized(_))
        ));

        let expired = issue_token("secret", user, Role::Student, Duration::hours(-2)).unwrap();
        assert!(matches!(
            authenticate(&bearer(&expired), "secret"),
            Err(Error::Unauthorized(_))
        ));
    }

    #[test]
    fn missing_header_is_unauthorized() {
        assert!(matches!(
            authenticate(&HeaderMap::new(), "secret"),
            Err(Error::Unauthorized(_))
        ));
    }
}
