use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::api::auth::register,
        crate::api::auth::login,
        crate::api::subscriptions::get_subscription,
        crate::api::subscriptions::cancel_subscription,
        crate::api::subscriptions::reactivate_subscription,
        crate::api::subscriptions::subscription_history,
        crate::api::payments::create_payment_session,
        crate::api::payments::confirm_payment,
        crate::api::analyses::analyze,
        crate::api::analyses::list_analyses,
        crate::api::profile::get_profile,
        crate::api::profile::update_profile,
        crate::api::webhooks::dodo_webhook,
        crate::api::webhooks::dodo_webhook_alias,
        crate::api::debug::payment_debug
    ),
    components(
        schemas(
            crate::api::auth::RegisterRequest,
            crate::api::auth::LoginRequest,
            crate::api::auth::AuthResponse,
            crate::api::subscriptions::CancelRequest,
            crate::api::payments::CreatePaymentRequest,
            crate::api::payments::CreatePaymentResponse,
            crate::api::payments::ConfirmPaymentRequest,
            crate::api::payments::ConfirmPaymentResponse,
            crate::api::analyses::AnalyzeResponse,
            crate::api::analyses::AnalysisList,
            crate::api::profile::UpdateProfileRequest,
            crate::api::debug::PaymentDiagnostics,
            crate::api::debug::SettingPresence,
            crate::api::debug::ProbeResult,
            crate::billing::StatusView,
            crate::billing::CancelOutcome,
            crate::analysis::AnalysisResult,
            crate::analysis::Breakdown,
            crate::analysis::CategoryScore,
            crate::verdict::MemeVerdict,
            crate::models::Tier,
            crate::models::SubscriptionStatus,
            crate::models::PaymentStatus,
            crate::models::HistoryAction,
            crate::models::CheckoutMode,
            crate::models::SubscriptionHistoryEntry,
            crate::models::AnalysisRecord,
            crate::models::UserProfile
        )
    ),
    modifiers(&BearerAuth),
    tags(
        (name = "auth", description = "Registration and login"),
        (name = "subscription", description = "Tier, quota and cancellation"),
        (name = "payments", description = "Checkout sessions"),
        (name = "analyses", description = "Foot photo analysis"),
        (name = "profile", description = "User profile"),
        (name = "webhooks", description = "Callbacks from the payment vendor"),
        (name = "debug", description = "Payment configuration diagnostics")
    )
)]
pub struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).bearer_format("JWT").build()),
            );
        }
    }
}
