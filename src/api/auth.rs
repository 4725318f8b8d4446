// src/api/auth.rs

use actix_web::body::MessageBody;
use actix_web::dev::{Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::Error;
use actix_web::{post, web, HttpMessage, HttpResponse, Responder};
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{Duration, Utc};
use futures_util::future::{ready, LocalBoxFuture, Ready};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use std::task::{Context, Poll};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::ApiError;
use crate::AppState;

const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub exp: usize,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub username: Option<String>,
    pub full_name: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AuthResponse {
    pub token: String,
    pub user_id: Uuid,
}

fn validate_registration(payload: &RegisterRequest) -> Result<(), ApiError> {
    let email = payload.email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(ApiError::BadRequest("a valid email is required".into()));
    }
    if payload.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::BadRequest(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

#[utoipa::path(
    post,
    path = "/auth/register",
    tag = "auth",
    request_body = RegisterRequest,
    responses(
        (status = 200, description = "Registered", body = AuthResponse),
        (status = 400, description = "Invalid data or email taken")
    )
)]
#[post("/auth/register")]
pub async fn register(
    state: web::Data<AppState>,
    payload: web::Json<RegisterRequest>,
) -> Result<HttpResponse, ApiError> {
    validate_registration(&payload)?;

    let password_hash = hash(&payload.password, DEFAULT_COST)
        .map_err(|e| ApiError::Internal(format!("bcrypt hash: {e}")))?;

    let row = match sqlx::query(
        r#"INSERT INTO users (email, username, full_name, password_hash)
           VALUES ($1, $2, $3, $4)
           RETURNING id"#,
    )
    .bind(payload.email.trim().to_lowercase())
    .bind(payload.username.as_deref())
    .bind(payload.full_name.as_deref())
    .bind(password_hash)
    .fetch_one(&state.pool)
    .await
    {
        Ok(r) => r,
        Err(e) => {
            log::warn!("register db error: {e}");
            return Err(ApiError::BadRequest("user already exists or invalid data".into()));
        }
    };

    let user_id: Uuid = row.try_get("id")?;
    log::info!("user registered user_id={user_id}");

    let token = generate_jwt(user_id, &state.config.jwt_secret, state.config.jwt_ttl_days)
        .map_err(|e| ApiError::Internal(format!("jwt encode: {e}")))?;

    Ok(HttpResponse::Ok().json(AuthResponse { token, user_id }))
}

#[utoipa::path(
    post,
    path = "/auth/login",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in", body = AuthResponse),
        (status = 401, description = "Invalid credentials")
    )
)]
#[post("/auth/login")]
pub async fn login(
    state: web::Data<AppState>,
    payload: web::Json<LoginRequest>,
) -> Result<impl Responder, ApiError> {
    let row = sqlx::query(r#"SELECT id, password_hash FROM users WHERE email = $1"#)
        .bind(payload.email.trim().to_lowercase())
        .fetch_optional(&state.pool)
        .await?;

    let Some(row) = row else {
        return Err(ApiError::Unauthorized("invalid credentials".into()));
    };

    let user_id: Uuid = row.try_get("id")?;
    let password_hash: String = row.try_get("password_hash")?;

    match verify(&payload.password, &password_hash) {
        Ok(true) => {}
        Ok(false) => return Err(ApiError::Unauthorized("invalid credentials".into())),
        Err(e) => return Err(ApiError::Internal(format!("bcrypt verify: {e}"))),
    };

    let token = generate_jwt(user_id, &state.config.jwt_secret, state.config.jwt_ttl_days)
        .map_err(|e| ApiError::Internal(format!("jwt encode: {e}")))?;

    Ok(HttpResponse::Ok().json(AuthResponse { token, user_id }))
}

pub fn generate_jwt(
    user_id: Uuid,
    secret: &str,
    ttl_days: i64,
) -> Result<String, jsonwebtoken::errors::Error> {
    let expiration = (Utc::now() + Duration::days(ttl_days)).timestamp() as usize;

    let claims = Claims {
        sub: user_id,
        exp: expiration,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_ref()),
    )
}

/// Middleware that:
/// - reads `Authorization: Bearer <jwt>`
/// - validates the JWT against the configured secret
/// - puts the `Uuid` user id into `req.extensions_mut()`
pub struct JwtMiddleware;

impl<S, B> Transform<S, ServiceRequest> for JwtMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = JwtMiddlewareInner<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(JwtMiddlewareInner { service }))
    }
}

pub struct JwtMiddlewareInner<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for JwtMiddlewareInner<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let secret = match req.app_data::<web::Data<AppState>>() {
            Some(state) => state.config.jwt_secret.clone(),
            None => {
                return Box::pin(async move {
                    Err(ApiError::Internal("app state missing in jwt middleware".into()).into())
                })
            }
        };

        let auth_header = req
            .headers()
            .get(actix_web::http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .unwrap_or("");

        if let Some(token) = auth_header.strip_prefix("Bearer ") {
            match decode::<Claims>(
                token.trim(),
                &DecodingKey::from_secret(secret.as_ref()),
                &Validation::default(),
            ) {
                Ok(token_data) => {
                    req.extensions_mut().insert(token_data.claims.sub);
                    let fut = self.service.call(req);
                    return Box::pin(async move { fut.await });
                }
                Err(e) => {
                    log::debug!("jwt rejected: {e}");
                    return Box::pin(async move {
                        Err(ApiError::Unauthorized("invalid token".into()).into())
                    });
                }
            }
        }

        Box::pin(async move {
            Err(ApiError::Unauthorized("missing or invalid Authorization header".into()).into())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jwt_round_trips_user_id() {
        let user_id = Uuid::new_v4();
        let token = generate_jwt(user_id, "secret", 1).unwrap();
        let data = decode::<Claims>(
            &token,
            &DecodingKey::from_secret(b"secret"),
            &Validation::default(),
        )
        .unwrap();
        assert_eq!(data.claims.sub, user_id);
    }

    #[test]
    fn registration_requires_email_and_long_password() {
        let mut req = RegisterRequest {
            email: "feet@example.com".into(),
            password: "short".into(),
            username: None,
            full_name: None,
        };
        assert!(validate_registration(&req).is_err());

        req.password = "long enough".into();
        assert!(validate_registration(&req).is_ok());

        req.email = "not-an-email".into();
        assert!(validate_registration(&req).is_err());
    }
}
