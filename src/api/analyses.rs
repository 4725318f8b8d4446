// src/api/analyses.rs

use actix_multipart::Multipart;
use actix_web::web::ReqData;
use actix_web::{get, post, web, HttpResponse};
use futures_util::StreamExt;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::analysis::{AnalysisResult, ParsedAnalysis};
use crate::billing;
use crate::db::{self, NewAnalysis};
use crate::error::ApiError;
use crate::models::AnalysisRecord;
use crate::verdict::{self, MemeVerdict};
use crate::vision::image_data_url;
use crate::AppState;

pub const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Serialize, ToSchema)]
pub struct AnalyzeResponse {
    /// `None` when the result could not be stored; the analysis still counts.
    pub id: Option<Uuid>,
    pub analysis: AnalysisResult,
    pub parse_mode: String,
    pub verdict: MemeVerdict,
    pub remaining: i32,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AnalysisList {
    pub analyses: Vec<AnalysisRecord>,
    pub average_score: Option<f64>,
}

struct UploadedImage {
    mime: String,
    bytes: Vec<u8>,
}

/// Reads the first file part of the form. Only `image/*` parts are accepted.
async fn read_image(mut payload: Multipart) -> Result<UploadedImage, ApiError> {
    while let Some(item) = payload.next().await {
        let mut field = match item {
            Ok(f) => f,
            Err(e) => return Err(ApiError::BadRequest(format!("invalid multipart body: {e}"))),
        };

        // actix-multipart 0.6: content_disposition() -> &ContentDisposition
        if field.content_disposition().get_filename().is_none() {
            continue;
        }

        let mime = field
            .content_type()
            .map(|m| m.essence_str().to_string())
            .unwrap_or_default();
        if !mime.starts_with("image/") {
            return Err(ApiError::BadRequest("Please upload an image file".into()));
        }

        let mut bytes: Vec<u8> = Vec::new();
        while let Some(chunk) = field.next().await {
            let data = chunk.map_err(|e| ApiError::BadRequest(format!("upload interrupted: {e}")))?;
            if bytes.len() + data.len() > MAX_IMAGE_BYTES {
                return Err(ApiError::BadRequest("Image must be 10 MB or smaller".into()));
            }
            bytes.extend_from_slice(&data);
        }

        if bytes.is_empty() {
            return Err(ApiError::BadRequest("Uploaded image is empty".into()));
        }
        return Ok(UploadedImage { mime, bytes });
    }

    Err(ApiError::BadRequest("No image uploaded".into()))
}

fn new_analysis<'a>(
    user_id: Uuid,
    result: &'a AnalysisResult,
    parse_mode: &'a str,
) -> Result<NewAnalysis<'a>, ApiError> {
    let full_analysis = serde_json::to_value(result)
        .map_err(|e| ApiError::Internal(format!("serialize analysis: {e}")))?;
    let b = &result.breakdown;
    Ok(NewAnalysis {
        user_id,
        overall_score: result.overall_score,
        skin_score: b.skin_condition.score,
        nail_score: b.nail_health.score,
        structure_score: b.foot_structure.score,
        symmetry_score: b.symmetry.score,
        cleanliness_score: b.cleanliness.score,
        detected_issues: &result.detected_issues,
        improvement_tips: &result.improvement_tips,
        confidence_score: result.confidence_score,
        parse_mode,
        full_analysis,
    })
}

#[utoipa::path(
    post,
    path = "/api/analyses",
    tag = "analyses",
    responses(
        (status = 200, description = "Foot analyzed", body = AnalyzeResponse),
        (status = 400, description = "Missing or non-image upload"),
        (status = 402, description = "Monthly analysis limit reached"),
        (status = 422, description = "No foot detected in the image"),
        (status = 502, description = "Vision model unavailable")
    )
)]
#[post("/analyses")]
pub async fn analyze(
    payload: Multipart,
    state: web::Data<AppState>,
    user_id: ReqData<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let user_id = user_id.into_inner();

    let status = billing::get_status(&state.pool, user_id).await?;
    if !status.can_analyze {
        return Err(ApiError::PaymentRequired(format!(
            "Monthly limit of {} analyses reached",
            status.monthly_limit
        )));
    }

    let image = read_image(payload).await?;
    log::info!(
        "analysis requested user_id={user_id} mime={} bytes={}",
        image.mime,
        image.bytes.len()
    );

    let parsed = state
        .vision
        .analyze(&image_data_url(&image.mime, &image.bytes))
        .await?;
    let parse_mode = parsed.mode();
    let result = match parsed {
        ParsedAnalysis::Parsed(result) | ParsedAnalysis::Fallback(result) => result,
        ParsedAnalysis::Failed(reason) => return Err(ApiError::Upstream(reason)),
    };

    if !result.is_foot_detected {
        return Err(ApiError::Unprocessable(
            result
                .medical_warning
                .clone()
                .unwrap_or_else(|| "No foot detected in the image".to_string()),
        ));
    }

    // The quota check above is advisory; this is the atomic one.
    if !billing::increment_usage(&state.pool, user_id).await? {
        return Err(ApiError::PaymentRequired(format!(
            "Monthly limit of {} analyses reached",
            status.monthly_limit
        )));
    }

    let id = match db::insert_analysis(&state.pool, new_analysis(user_id, &result, parse_mode)?).await {
        Ok(id) => Some(id),
        Err(e) => {
            log::error!("analysis insert failed user_id={user_id}: {e}");
            None
        }
    };

    let remaining = billing::get_status(&state.pool, user_id)
        .await
        .map(|s| s.analyses_remaining)
        .unwrap_or((status.analyses_remaining - 1).max(0));

    log::info!(
        "analysis done user_id={user_id} score={:.1} mode={parse_mode} remaining={remaining}",
        result.overall_score
    );

    Ok(HttpResponse::Ok().json(AnalyzeResponse {
        id,
        verdict: verdict::meme_verdict(result.overall_score),
        analysis: result,
        parse_mode: parse_mode.to_string(),
        remaining,
    }))
}

#[utoipa::path(
    get,
    path = "/api/analyses",
    tag = "analyses",
    responses((status = 200, description = "Newest first", body = AnalysisList))
)]
#[get("/analyses")]
pub async fn list_analyses(
    user_id: ReqData<Uuid>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let analyses = db::list_analyses(&state.pool, user_id.into_inner()).await?;
    let average_score = average_score(&analyses);
    Ok(HttpResponse::Ok().json(AnalysisList {
        analyses,
        average_score,
    }))
}

pub fn average_score(analyses: &[AnalysisRecord]) -> Option<f64> {
    if analyses.is_empty() {
        return None;
    }
    let total: f64 = analyses.iter().map(|a| a.overall_score).sum();
    Some((total / analyses.len() as f64 * 10.0).round() / 10.0)
}
