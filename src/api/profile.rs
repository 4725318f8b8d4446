// src/api/profile.rs

use actix_web::web::ReqData;
use actix_web::{get, put, web, HttpResponse};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::ApiError;
use crate::{db, AppState};

const MAX_FIELD_LEN: usize = 200;

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UpdateProfileRequest {
    pub username: Option<String>,
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
}

fn clean(field: &str, value: Option<&str>) -> Result<Option<String>, ApiError> {
    let Some(value) = value.map(str::trim) else {
        return Ok(None);
    };
    if value.chars().count() > MAX_FIELD_LEN {
        return Err(ApiError::BadRequest(format!(
            "{field} must be at most {MAX_FIELD_LEN} characters"
        )));
    }
    Ok(Some(value.to_string()))
}

#[utoipa::path(
    get,
    path = "/api/profile",
    tag = "profile",
    responses(
        (status = 200, description = "Current user", body = crate::models::UserProfile),
        (status = 404, description = "User no longer exists")
    )
)]
#[get("/profile")]
pub async fn get_profile(
    user_id: ReqData<Uuid>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let profile = db::get_profile(&state.pool, user_id.into_inner())
        .await?
        .ok_or_else(|| ApiError::NotFound("user not found".into()))?;
    Ok(HttpResponse::Ok().json(profile))
}

#[utoipa::path(
    put,
    path = "/api/profile",
    tag = "profile",
    request_body = UpdateProfileRequest,
    responses(
        (status = 200, description = "Updated user", body = crate::models::UserProfile),
        (status = 404, description = "User no longer exists")
    )
)]
#[put("/profile")]
pub async fn update_profile(
    user_id: ReqData<Uuid>,
    state: web::Data<AppState>,
    payload: web::Json<UpdateProfileRequest>,
) -> Result<HttpResponse, ApiError> {
    let username = clean("username", payload.username.as_deref())?;
    let full_name = clean("full_name", payload.full_name.as_deref())?;
    let avatar_url = clean("avatar_url", payload.avatar_url.as_deref())?;

    let profile = db::update_profile(
        &state.pool,
        user_id.into_inner(),
        username.as_deref(),
        full_name.as_deref(),
        avatar_url.as_deref(),
    )
    .await?
    .ok_or_else(|| ApiError::NotFound("user not found".into()))?;

    Ok(HttpResponse::Ok().json(profile))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_trims_and_limits_length() {
        assert_eq!(clean("username", Some("  toes  ")).unwrap().as_deref(), Some("toes"));
        assert_eq!(clean("username", None).unwrap(), None);
        assert!(clean("username", Some(&"x".repeat(MAX_FIELD_LEN + 1))).is_err());
    }
}
