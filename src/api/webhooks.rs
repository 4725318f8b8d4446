// src/api/webhooks.rs
//
// Payment vendor webhooks. Two payload shapes are in the wild:
//   {"type": "...", "data": {"object": {...}}}
//   {"event": "...", "data": {...}}
// Both are normalized into `DodoEvent` before dispatch.

use actix_web::{post, web, HttpRequest, HttpResponse};
use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::api::signature::{self, SignatureError, SIGNATURE_HEADERS};
use crate::billing::{self, BillingError};
use crate::error::ApiError;
use crate::models::Tier;
use crate::{db, AppState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookAction {
    Upgrade,
    MarkPaymentActive,
    Downgrade,
    CancelAtPeriodEnd,
    PaymentFailed,
    Ignore,
}

impl WebhookAction {
    pub fn for_event(event_type: &str) -> Self {
        match event_type {
            "checkout.session.completed" | "payment.success" | "payment.succeeded" => {
                WebhookAction::Upgrade
            }
            "invoice.payment_succeeded" | "invoice.paid" => WebhookAction::MarkPaymentActive,
            "customer.subscription.deleted" | "subscription.deleted" => WebhookAction::Downgrade,
            "subscription.cancelled" | "subscription.canceled" => WebhookAction::CancelAtPeriodEnd,
            "payment.failed" => WebhookAction::PaymentFailed,
            _ => WebhookAction::Ignore,
        }
    }
}

/// Fields the handlers need, pulled out of either payload shape.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DodoEvent {
    pub event_type: String,
    pub user_id: Option<String>,
    pub plan: Option<String>,
    pub session_id: Option<String>,
    /// Vendor-side id later events use to find the subscription.
    pub reference: Option<String>,
    pub amount: Option<String>,
    pub reason: Option<String>,
}

pub fn parse_webhook_body(body: &[u8]) -> Result<Value, ApiError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| ApiError::BadRequest(format!("invalid webhook payload: {e}")))?;
    if !value.is_object() {
        return Err(ApiError::BadRequest("webhook payload must be an object".into()));
    }
    Ok(value)
}

fn str_field(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| value.get(*k))
        .find_map(|v| match v {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

pub fn normalize_payload(raw: &Value) -> DodoEvent {
    let event_type = str_field(raw, &["type", "event", "event_type"]).unwrap_or_default();

    let data = raw.get("data").unwrap_or(&Value::Null);
    let object = data.get("object").unwrap_or(data);
    let metadata = object.get("metadata").unwrap_or(&Value::Null);

    DodoEvent {
        event_type,
        user_id: str_field(metadata, &["userId", "user_id"])
            .or_else(|| str_field(object, &["user_id", "userId"])),
        plan: str_field(metadata, &["plan"]).or_else(|| str_field(object, &["plan"])),
        session_id: str_field(metadata, &["sessionId", "session_id"])
            .or_else(|| str_field(object, &["session_id"])),
        reference: str_field(object, &["subscription_id", "subscription", "id", "session_id"]),
        amount: str_field(object, &["amount", "amount_total", "total_amount"]),
        reason: str_field(object, &["reason", "cancellation_reason"]),
    }
}

pub fn extract_signature(req: &HttpRequest) -> Option<String> {
    SIGNATURE_HEADERS.iter().find_map(|name| {
        req.headers()
            .get(*name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    })
}

fn verify_request(req: &HttpRequest, body: &[u8], secret: Option<&str>) -> Result<(), ApiError> {
    let secret = secret
        .ok_or_else(|| ApiError::Internal("DODO_WEBHOOK_SECRET is not configured".into()))?;
    let header = extract_signature(req).ok_or(SignatureError::Missing);

    match header.and_then(|h| signature::verify_signature(secret, body, &h)) {
        Ok(()) => Ok(()),
        Err(e) => {
            log::warn!("dodo webhook rejected: {e}");
            Err(ApiError::Unauthorized("invalid webhook signature".into()))
        }
    }
}

fn ignored(reason: &str) -> HttpResponse {
    HttpResponse::Ok().json(json!({ "received": true, "ignored": true, "reason": reason }))
}

async fn handle_upgrade(state: &AppState, event: &DodoEvent) -> Result<HttpResponse, ApiError> {
    let session = match event.session_id.as_deref() {
        Some(id) => db::get_payment_session(&state.pool, id).await?,
        None => None,
    };

    let user_id = event
        .user_id
        .as_deref()
        .and_then(|raw| Uuid::parse_str(raw).ok())
        .or_else(|| session.as_ref().map(|s| s.user_id));
    let Some(user_id) = user_id else {
        log::warn!("dodo {} without a usable user id: {event:?}", event.event_type);
        return Ok(ignored("missing user id"));
    };

    let plan = event
        .plan
        .as_deref()
        .and_then(|raw| raw.to_ascii_lowercase().parse::<Tier>().ok())
        .or_else(|| session.as_ref().map(|s| s.plan))
        .unwrap_or(Tier::Pro);

    let reference = event.reference.as_deref().or(event.session_id.as_deref());
    billing::upgrade(&state.pool, user_id, plan, reference).await?;

    if let Some(session) = session {
        db::complete_payment_session(&state.pool, &session.session_id, Utc::now()).await?;
    }

    log::info!(
        "dodo payment applied user_id={user_id} plan={plan} reference={reference:?} amount={:?}",
        event.amount
    );
    Ok(HttpResponse::Ok().json(json!({ "received": true })))
}

/// Reference-driven events for a subscription we never saw are acknowledged
/// so the vendor stops retrying.
fn by_reference(result: Result<(), BillingError>) -> Result<HttpResponse, ApiError> {
    match result {
        Ok(()) => Ok(HttpResponse::Ok().json(json!({ "received": true }))),
        Err(BillingError::UnknownReference(reference)) => {
            log::warn!("dodo event for unknown reference {reference}");
            Ok(ignored("unknown subscription"))
        }
        Err(e) => Err(e.into()),
    }
}

async fn dispatch(state: &AppState, event: &DodoEvent) -> Result<HttpResponse, ApiError> {
    let action = WebhookAction::for_event(&event.event_type);
    log::info!("dodo webhook type={} action={action:?}", event.event_type);

    match action {
        WebhookAction::Upgrade => handle_upgrade(state, event).await,
        WebhookAction::MarkPaymentActive | WebhookAction::Downgrade | WebhookAction::CancelAtPeriodEnd => {
            let Some(reference) = event.reference.as_deref() else {
                log::warn!("dodo {} without a subscription reference", event.event_type);
                return Ok(ignored("missing reference"));
            };
            let result = match action {
                WebhookAction::MarkPaymentActive => {
                    billing::mark_payment_active(&state.pool, reference).await
                }
                WebhookAction::Downgrade => billing::downgrade_by_reference(&state.pool, reference).await,
                _ => billing::cancel_by_reference(&state.pool, reference, event.reason.as_deref()).await,
            };
            by_reference(result)
        }
        WebhookAction::PaymentFailed => {
            log::warn!(
                "dodo payment failed user_id={:?} reference={:?}",
                event.user_id,
                event.reference
            );
            Ok(HttpResponse::Ok().json(json!({ "received": true })))
        }
        WebhookAction::Ignore => Ok(ignored("unhandled event type")),
    }
}

async fn handle_dodo_webhook(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    verify_request(&req, &body, state.config.dodo_webhook_secret.as_deref())?;

    let raw = parse_webhook_body(&body)?;
    let event = normalize_payload(&raw);
    if event.event_type.is_empty() {
        return Err(ApiError::BadRequest("webhook payload has no event type".into()));
    }

    dispatch(&state, &event).await
}

#[utoipa::path(
    post,
    path = "/webhooks/dodo",
    tag = "webhooks",
    responses(
        (status = 200, description = "Event accepted or ignored"),
        (status = 400, description = "Unparseable payload"),
        (status = 401, description = "Missing or invalid signature"),
        (status = 500, description = "Processing failed, vendor should retry")
    )
)]
#[post("/webhooks/dodo")]
pub async fn dodo_webhook(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    handle_dodo_webhook(req, body, state).await
}

#[utoipa::path(
    post,
    path = "/api/webhooks/dodo-payment",
    tag = "webhooks",
    responses(
        (status = 200, description = "Event accepted or ignored"),
        (status = 401, description = "Missing or invalid signature")
    )
)]
#[post("/api/webhooks/dodo-payment")]
pub async fn dodo_webhook_alias(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    handle_dodo_webhook(req, body, state).await
}
