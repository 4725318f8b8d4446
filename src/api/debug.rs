// src/api/debug.rs

use actix_web::{get, web, HttpResponse};
use serde::Serialize;
use utoipa::ToSchema;

use crate::config::Config;
use crate::AppState;

#[derive(Debug, Serialize, ToSchema)]
pub struct SettingPresence {
    pub name: &'static str,
    pub set: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ProbeResult {
    pub endpoint: String,
    pub reachable: bool,
    pub status: Option<u16>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentDiagnostics {
    pub test_mode: bool,
    pub settings: Vec<SettingPresence>,
    pub missing: Vec<&'static str>,
    pub probe: ProbeResult,
}

/// Which payment settings are present. Values are never reported.
pub fn payment_settings(config: &Config) -> Vec<SettingPresence> {
    vec![
        SettingPresence {
            name: "DODO_PRODUCT_ID",
            set: config.dodo_product_id.is_some(),
        },
        SettingPresence {
            name: "DODO_SECRET_KEY",
            set: config.dodo_secret_key.is_some(),
        },
        SettingPresence {
            name: "DODO_WEBHOOK_SECRET",
            set: config.dodo_webhook_secret.is_some(),
        },
        SettingPresence {
            name: "SITE_URL",
            set: !config.site_url.is_empty(),
        },
    ]
}

async fn probe_vendor(http: &reqwest::Client, config: &Config) -> ProbeResult {
    let endpoint = config.dodo_api_base_url.trim_end_matches('/').to_string();
    let mut request = http.get(&endpoint).timeout(config.probe_timeout);
    if let Some(key) = config.dodo_secret_key.as_deref() {
        request = request.bearer_auth(key);
    }

    match request.send().await {
        // Any HTTP answer, including 401/404, proves the host is reachable.
        Ok(resp) => ProbeResult {
            endpoint,
            reachable: true,
            status: Some(resp.status().as_u16()),
            error: None,
        },
        Err(e) => {
            log::warn!("payment probe failed endpoint={endpoint}: {e}");
            ProbeResult {
                endpoint,
                reachable: false,
                status: None,
                error: Some(e.to_string()),
            }
        }
    }
}

#[utoipa::path(
    get,
    path = "/api/debug/payment",
    tag = "debug",
    responses((status = 200, description = "Payment configuration report", body = PaymentDiagnostics))
)]
#[get("/api/debug/payment")]
pub async fn payment_debug(state: web::Data<AppState>) -> HttpResponse {
    let settings = payment_settings(&state.config);
    let missing = settings.iter().filter(|s| !s.set).map(|s| s.name).collect();
    let probe = probe_vendor(&state.http, &state.config).await;

    HttpResponse::Ok().json(PaymentDiagnostics {
        test_mode: state.config.dodo_test_mode,
        settings,
        missing,
        probe,
    })
}
