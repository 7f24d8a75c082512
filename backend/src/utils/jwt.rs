// src/utils/jwt.rs

use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode, header},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::{config::Config, error::AppError, services::session::StudentRef};

pub const ROLE_STUDENT: &str = "student";
pub const ROLE_TEACHER: &str = "teacher";
pub const ROLE_ADMIN: &str = "admin";

/// JWT Claims structure.
///
/// Tokens are issued by the school's identity service; this backend only
/// verifies them.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Claims {
    /// Subject - Stores the User ID (as string).
    pub sub: String,
    /// 'student', 'teacher' or 'admin'.
    pub role: String,
    /// Class of a student (e.g. "JSS2").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Expiration time as Unix timestamp.
    pub exp: usize,
}

impl Claims {
    pub fn user_id(&self) -> Result<i64, AppError> {
        self.sub
            .parse()
            .map_err(|_| AppError::AuthError("Invalid user ID in token".to_string()))
    }

    pub fn is_admin(&self) -> bool {
        self.role == ROLE_ADMIN
    }

    pub fn is_staff(&self) -> bool {
        self.role == ROLE_ADMIN || self.role == ROLE_TEACHER
    }

    /// The student behind this token. Students without a class cannot sit exams.
    pub fn student(&self) -> Result<StudentRef, AppError> {
        let id = self.user_id()?;
        let class_name = self
            .class_name
            .clone()
            .filter(|c| !c.is_empty())
            .ok_or(AppError::Forbidden("Your account has no class assigned".to_string()))?;
        Ok(StudentRef {
            id,
            name: self.name.clone().unwrap_or_else(|| format!("Student {}", id)),
            class_name,
        })
    }
}

/// Signs a new JWT for the user.
pub fn sign_jwt(
    id: i64,
    role: &str,
    class_name: Option<&str>,
    name: Option<&str>,
    secret: &str,
    expiration_seconds: u64,
) -> Result<String, AppError> {
    let expiration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| AppError::InternalServerError(e.to_string()))?
        .as_secs() as usize
        + expiration_seconds as usize;

    let claims = Claims {
        sub: id.to_string(),
        role: role.to_owned(),
        class_name: class_name.map(str::to_owned),
        name: name.map(str::to_owned),
        exp: expiration,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::InternalServerError(e.to_string()))
}

/// Verifies and decodes a JWT string.
pub fn verify_jwt(token: &str, secret: &str) -> Result<Claims, AppError> {
    let token_data = decode(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| AppError::AuthError("Invalid token".to_string()))?;

    Ok(token_data.claims)
}

/// Axum Middleware: Authentication.
///
/// Validates the 'Authorization: Bearer <token>' header and injects `Claims`
/// into the request extensions. Returns 401 otherwise.
pub async fn auth_middleware(
    State(config): State<Config>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    let token = match auth_header.and_then(|h| h.strip_prefix("Bearer ")) {
        Some(token) => token,
        None => return Err(StatusCode::UNAUTHORIZED),
    };

    match verify_jwt(token, &config.jwt_secret) {
        Ok(claims) => {
            req.extensions_mut().insert(claims);
            Ok(next.run(req).await)
        }
        Err(_) => Err(StatusCode::UNAUTHORIZED),
    }
}

fn require_role(req: &Request<Body>, allowed: impl Fn(&Claims) -> bool) -> Result<(), StatusCode> {
    let claims = req
        .extensions()
        .get::<Claims>()
        .ok_or(StatusCode::UNAUTHORIZED)?;

    if !allowed(claims) {
        return Err(StatusCode::FORBIDDEN);
    }
    Ok(())
}

/// Must be used AFTER `auth_middleware`. Admins only.
pub async fn admin_middleware(req: Request<Body>, next: Next) -> Result<Response, StatusCode> {
    require_role(&req, Claims::is_admin)?;
    Ok(next.run(req).await)
}

/// Must be used AFTER `auth_middleware`. Teachers and admins.
pub async fn staff_middleware(req: Request<Body>, next: Next) -> Result<Response, StatusCode> {
    require_role(&req, Claims::is_staff)?;
    Ok(next.run(req).await)
}

/// Must be used AFTER `auth_middleware`. Students only.
pub async fn student_middleware(req: Request<Body>, next: Next) -> Result<Response, StatusCode> {
    require_role(&req, |c| c.role == ROLE_STUDENT)?;
    Ok(next.run(req).await)
}
