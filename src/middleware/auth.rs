use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

/// Opaque principal supplied by the identity collaborator. `sub` is the
/// user id; `role` decides which surface the bearer may touch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    pub role: Option<String>,
}

impl Claims {
    pub fn user_id(&self) -> crate::error::Result<Uuid> {
        Uuid::parse_str(&self.sub)
            .map_err(|_| crate::error::Error::Unauthorized("Malformed subject claim".to_string()))
    }

    pub fn role(&self) -> String {
        self.role.clone().unwrap_or_default()
    }
}

fn decode_bearer(req: &Request) -> Result<Claims, Response> {
    let Some(auth_header) = req.headers().get(axum::http::header::AUTHORIZATION) else {
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({"error":"missing_authorization"})),
        )
            .into_response());
    };
    let Ok(auth_str) = auth_header.to_str() else {
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({"error":"bad_authorization"})),
        )
            .into_response());
    };
    let Some(token) = auth_str.strip_prefix("Bearer ") else {
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({"error":"unsupported_scheme"})),
        )
            .into_response());
    };

    let config = crate::config::get_config();
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    match decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &validation,
    ) {
        Ok(data) => Ok(data.claims),
        Err(_) => Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({"error":"invalid_token"})),
        )
            .into_response()),
    }
}

fn require_roles(req: &Request, allowed: &[&str]) -> Result<Claims, Response> {
    let claims = decode_bearer(req)?;
    let role = claims.role();
    if !allowed.iter().any(|r| r.eq_ignore_ascii_case(&role)) {
        return Err((StatusCode::FORBIDDEN, Json(json!({"error":"forbidden"}))).into_response());
    }
    Ok(claims)
}

/// Quiz authoring, publishing, and grading surface.
pub async fn require_teacher(mut req: Request, next: Next) -> Response {
    match require_roles(&req, &["teacher", "admin"]) {
        Ok(claims) => {
            req.extensions_mut().insert(claims);
            next.run(req).await
        }
        Err(resp) => resp,
    }
}

/// Attempt-taking surface; students act only on their own attempts.
pub async fn require_student(mut req: Request, next: Next) -> Response {
    match require_roles(&req, &["student"]) {
        Ok(claims) => {
            req.extensions_mut().insert(claims);
            next.run(req).await
        }
        Err(resp) => resp,
    }
}
