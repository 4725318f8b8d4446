// src/api/subscriptions.rs

use actix_web::web::ReqData;
use actix_web::{get, post, web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::billing;
use crate::error::ApiError;
use crate::AppState;

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct CancelRequest {
    pub reason: Option<String>,
    #[serde(default)]
    pub immediate: bool,
}

#[utoipa::path(
    get,
    path = "/api/subscription",
    tag = "subscription",
    responses((status = 200, description = "Current subscription status", body = crate::billing::StatusView))
)]
#[get("/subscription")]
pub async fn get_subscription(
    user_id: ReqData<Uuid>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let status = billing::get_status(&state.pool, user_id.into_inner()).await?;
    Ok(HttpResponse::Ok().json(status))
}

#[utoipa::path(
    post,
    path = "/api/subscription/cancel",
    tag = "subscription",
    request_body = CancelRequest,
    responses(
        (status = 200, description = "Canceled", body = crate::billing::CancelOutcome),
        (status = 400, description = "Free tier cannot be canceled")
    )
)]
#[post("/subscription/cancel")]
pub async fn cancel_subscription(
    user_id: ReqData<Uuid>,
    state: web::Data<AppState>,
    payload: Option<web::Json<CancelRequest>>,
) -> Result<HttpResponse, ApiError> {
    let payload = payload.map(|p| p.into_inner()).unwrap_or_default();
    let outcome = billing::cancel(
        &state.pool,
        user_id.into_inner(),
        payload.reason.as_deref(),
        payload.immediate,
    )
    .await?;
    Ok(HttpResponse::Ok().json(outcome))
}

#[utoipa::path(
    post,
    path = "/api/subscription/reactivate",
    tag = "subscription",
    responses(
        (status = 200, description = "Reactivated", body = crate::billing::StatusView),
        (status = 400, description = "Subscription is not canceled")
    )
)]
#[post("/subscription/reactivate")]
pub async fn reactivate_subscription(
    user_id: ReqData<Uuid>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let user_id = user_id.into_inner();
    billing::reactivate(&state.pool, user_id).await?;
    let status = billing::get_status(&state.pool, user_id).await?;
    Ok(HttpResponse::Ok().json(json!({
        "message": "Subscription reactivated",
        "subscription": status
    })))
}

#[utoipa::path(
    get,
    path = "/api/subscription/history",
    tag = "subscription",
    responses((status = 200, description = "Newest first", body = [crate::models::SubscriptionHistoryEntry]))
)]
#[get("/subscription/history")]
pub async fn subscription_history(
    user_id: ReqData<Uuid>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let entries = billing::history(&state.pool, user_id.into_inner()).await?;
    Ok(HttpResponse::Ok().json(entries))
}
