// src/api/payments.rs
//
// Checkout session creation for the hosted payment page, plus a test-mode
// confirmation endpoint that stands in for the vendor webhook.

use actix_web::web::ReqData;
use actix_web::{post, web, HttpResponse};
use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::billing::{self, StatusView};
use crate::config::Config;
use crate::error::ApiError;
use crate::models::{CheckoutMode, PaymentSession, PaymentSessionStatus, Tier};
use crate::{db, AppState};

/// Tag carried in checkout metadata so webhooks can be traced to this app.
pub const APP_TAG: &str = "footrate-ai";

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreatePaymentRequest {
    pub plan: Option<String>,
    /// Optional client-side price; must match the plan price when sent.
    pub amount: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreatePaymentResponse {
    pub session_id: String,
    pub payment_url: String,
    pub plan: Tier,
    pub amount: String,
    pub mode: CheckoutMode,
    pub message: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ConfirmPaymentRequest {
    pub session_id: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ConfirmPaymentResponse {
    pub session_id: String,
    pub already_completed: bool,
    pub subscription: StatusView,
}

/// `session_<unix millis>_<9 random lowercase alphanumerics>`
pub fn new_session_id(now: DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    format!("session_{}_{}", now.timestamp_millis(), suffix)
}

pub fn format_amount(tier: Tier) -> String {
    format!("{:.2}", f64::from(tier.price()))
}

fn build_url<I, K, V>(base: &str, params: I) -> Result<Url, ApiError>
where
    I: IntoIterator,
    I::Item: std::borrow::Borrow<(K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    Url::parse_with_params(base, params)
        .map_err(|e| ApiError::Internal(format!("invalid url {base}: {e}")))
}

/// Hosted checkout URL for production mode. The vendor redirects back to
/// the site with the session id so the frontend can poll for the upgrade.
pub fn production_checkout_url(
    config: &Config,
    product_id: &str,
    user_id: Uuid,
    plan: Tier,
    session_id: &str,
) -> Result<Url, ApiError> {
    let success_url = build_url(
        &format!("{}/payment/success", config.site_url),
        [
            ("session", session_id),
            ("plan", plan.as_str()),
            ("mode", CheckoutMode::Production.as_str()),
        ],
    )?;
    let cancel_url = build_url(
        &format!("{}/payment/cancelled", config.site_url),
        [("session", session_id)],
    )?;
    let metadata = json!({
        "userId": user_id,
        "plan": plan,
        "sessionId": session_id,
        "app": APP_TAG,
    })
    .to_string();

    build_url(
        &format!(
            "{}/buy/{}",
            config.dodo_checkout_base_url.trim_end_matches('/'),
            product_id
        ),
        [
            ("quantity", "1"),
            ("success_url", success_url.as_str()),
            ("cancel_url", cancel_url.as_str()),
            ("metadata", metadata.as_str()),
        ],
    )
}

/// In test mode the "checkout" is the site's own success page; the frontend
/// then calls the confirm endpoint.
pub fn test_checkout_url(
    config: &Config,
    user_id: Uuid,
    plan: Tier,
    amount: &str,
    session_id: &str,
) -> Result<Url, ApiError> {
    let user_id = user_id.to_string();
    build_url(
        &format!("{}/payment/success", config.site_url),
        [
            ("session", session_id),
            ("plan", plan.as_str()),
            ("amount", amount),
            ("userId", user_id.as_str()),
            ("mode", CheckoutMode::Test.as_str()),
            ("upgrade", "true"),
        ],
    )
}

fn requested_plan(payload: &CreatePaymentRequest) -> Result<Tier, ApiError> {
    let raw = payload
        .plan
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Missing required fields: plan".into()))?;

    let plan: Tier = raw
        .to_ascii_lowercase()
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("{e}")))?;
    if plan.price() == 0 {
        return Err(ApiError::BadRequest(format!("plan {plan} is not purchasable")));
    }

    if let Some(amount) = payload.amount {
        if (amount - f64::from(plan.price())).abs() > 0.005 {
            return Err(ApiError::BadRequest(format!(
                "amount {amount} does not match the {plan} price"
            )));
        }
    }
    Ok(plan)
}

#[utoipa::path(
    post,
    path = "/api/create-payment-session",
    tag = "payments",
    request_body = CreatePaymentRequest,
    responses(
        (status = 200, description = "Checkout session created", body = CreatePaymentResponse),
        (status = 400, description = "Missing or invalid plan")
    )
)]
#[post("/create-payment-session")]
pub async fn create_payment_session(
    user_id: ReqData<Uuid>,
    state: web::Data<AppState>,
    payload: web::Json<CreatePaymentRequest>,
) -> Result<HttpResponse, ApiError> {
    let user_id = user_id.into_inner();
    let plan = requested_plan(&payload)?;
    let config = &state.config;

    let now = Utc::now();
    let session_id = new_session_id(now);
    let amount = format_amount(plan);

    let (mode, payment_url) = if config.dodo_test_mode {
        let url = test_checkout_url(config, user_id, plan, &amount, &session_id)?;
        (CheckoutMode::Test, url)
    } else {
        let product_id = config
            .dodo_product_id
            .as_deref()
            .ok_or_else(|| ApiError::Internal("DODO_PRODUCT_ID is not configured".into()))?;
        let url = production_checkout_url(config, product_id, user_id, plan, &session_id)?;
        (CheckoutMode::Production, url)
    };

    let session = PaymentSession {
        session_id: session_id.clone(),
        user_id,
        plan,
        amount: amount.clone(),
        mode,
        status: PaymentSessionStatus::Pending,
        created_at: now,
        completed_at: None,
    };
    db::insert_payment_session(&state.pool, &session).await?;

    log::info!("payment session created user_id={user_id} session_id={session_id} plan={plan} mode={mode}");

    let message = match mode {
        CheckoutMode::Test => "Test mode: payment is simulated, confirm it to upgrade",
        CheckoutMode::Production => "Redirect to the payment page to complete your upgrade",
    };

    Ok(HttpResponse::Ok().json(CreatePaymentResponse {
        session_id,
        payment_url: payment_url.into(),
        plan,
        amount,
        mode,
        message: message.to_string(),
    }))
}

#[utoipa::path(
    post,
    path = "/api/payments/confirm",
    tag = "payments",
    request_body = ConfirmPaymentRequest,
    responses(
        (status = 200, description = "Session completed and plan applied", body = ConfirmPaymentResponse),
        (status = 404, description = "Unknown session or test mode disabled")
    )
)]
#[post("/payments/confirm")]
pub async fn confirm_payment(
    user_id: ReqData<Uuid>,
    state: web::Data<AppState>,
    payload: web::Json<ConfirmPaymentRequest>,
) -> Result<HttpResponse, ApiError> {
    if !state.config.dodo_test_mode {
        return Err(ApiError::NotFound("test payments are disabled".into()));
    }
    let user_id = user_id.into_inner();

    let session = db::get_payment_session(&state.pool, &payload.session_id)
        .await?
        .filter(|s| s.user_id == user_id)
        .ok_or_else(|| ApiError::NotFound("payment session not found".into()))?;

    if session.mode != CheckoutMode::Test {
        return Err(ApiError::BadRequest("only test sessions can be confirmed".into()));
    }

    let already_completed = session.status == PaymentSessionStatus::Completed;
    if !already_completed {
        billing::upgrade(&state.pool, user_id, session.plan, Some(&session.session_id)).await?;
        db::complete_payment_session(&state.pool, &session.session_id, Utc::now()).await?;
        log::info!("test payment confirmed user_id={user_id} session_id={}", session.session_id);
    }

    let subscription = billing::get_status(&state.pool, user_id).await?;
    Ok(HttpResponse::Ok().json(ConfirmPaymentResponse {
        session_id: session.session_id,
        already_completed,
        subscription,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_have_expected_shape() {
        let now = Utc::now();
        let id = new_session_id(now);
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "session");
        assert_eq!(parts[1], now.timestamp_millis().to_string());
        assert_eq!(parts[2].len(), 9);
        assert!(parts[2]
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }

    #[test]
    fn plan_validation() {
        let req = |plan: Option<&str>, amount: Option<f64>| CreatePaymentRequest {
            plan: plan.map(str::to_string),
            amount,
        };
        assert_eq!(requested_plan(&req(Some("pro"), None)).unwrap(), Tier::Pro);
        assert_eq!(requested_plan(&req(Some("PRO"), Some(9.0))).unwrap(), Tier::Pro);
        assert!(requested_plan(&req(None, Some(9.0))).is_err());
        assert!(requested_plan(&req(Some("free"), None)).is_err());
        assert!(requested_plan(&req(Some("pro"), Some(1.0))).is_err());
    }

    #[test]
    fn amount_has_two_decimals() {
        assert_eq!(format_amount(Tier::Pro), "9.00");
    }
}
