use actix_web::dev::Service;
use actix_web::http::StatusCode;
use actix_web::{test, web, App, HttpMessage};
use httpmock::Method::POST;
use httpmock::MockServer;
use serde_json::{json, Value};
use uuid::Uuid;

use footrate_api::api::analyses::{analyze, list_analyses};
use footrate_api::billing;

mod support;

const BOUNDARY: &str = "footrate-boundary";

fn build_multipart_body(filename: &str, content_type: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"image\"; filename=\"{filename}\"\r\n")
            .as_bytes(),
    );
    body.extend_from_slice(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
    body.extend_from_slice(data);
    body.extend_from_slice(b"\r\n");
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn upload_request(content_type: &str) -> test::TestRequest {
    test::TestRequest::post()
        .uri("/analyses")
        .insert_header((
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        ))
        .set_payload(build_multipart_body("feet.jpg", content_type, b"\xff\xd8\xff\xe0fake-jpeg"))
}

fn chat_reply(content: Value) -> Value {
    json!({ "choices": [{ "message": { "role": "assistant", "content": content.to_string() } }] })
}

macro_rules! app_for {
    ($pool:expr, $server:expr, $user_id:expr) => {{
        let mut config = support::test_config();
        config.openai_base_url = $server.url("");
        let state = web::Data::new(support::build_state($pool, config));
        let user_id: Uuid = $user_id;
        test::init_service(
            App::new()
                .app_data(state)
                .wrap_fn(move |req, srv| {
                    req.extensions_mut().insert(user_id);
                    let fut = srv.call(req);
                    async move { fut.await }
                })
                .service(analyze)
                .service(list_analyses),
        )
        .await
    }};
}

#[actix_web::test]
async fn analysis_consumes_quota_and_is_listed() {
    let Some(test_db) = support::init_test_db().await else {
        return;
    };
    let pool = &test_db.pool;
    let user_id = support::create_user(pool).await;

    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v1/chat/completions")
                .body_contains("data:image/jpeg;base64,");
            then.status(200).json_body(chat_reply(json!({
                "isFootDetected": true,
                "skinCondition": { "score": 7, "feedback": "ok", "issues": ["dry heel"] },
                "overallScore": 7.4,
                "detectedIssues": ["dry heel"],
                "improvementTips": ["moisturize"],
                "confidenceScore": 88
            })));
        })
        .await;

    let app = app_for!(pool.clone(), server, user_id);

    let body: Value =
        test::call_and_read_body_json(&app, upload_request("image/jpeg").to_request()).await;
    mock.assert_async().await;

    assert_eq!(body["parse_mode"], "parsed");
    assert_eq!(body["analysis"]["overall_score"], 7.4);
    assert_eq!(body["verdict"]["score"], 7);
    assert_eq!(body["remaining"], 2);
    assert!(body["id"].is_string());

    let status = billing::get_status(pool, user_id).await.expect("status");
    assert_eq!(status.analyses_used, 1);

    let req = test::TestRequest::get().uri("/analyses").to_request();
    let list: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(list["analyses"].as_array().map(Vec::len), Some(1));
    assert_eq!(list["average_score"], 7.4);
    assert_eq!(list["analyses"][0]["detected_issues"][0], "dry heel");
}

#[actix_web::test]
async fn rejected_uploads_do_not_consume_quota() {
    let Some(test_db) = support::init_test_db().await else {
        return;
    };
    let pool = &test_db.pool;
    let user_id = support::create_user(pool).await;

    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(200)
                .json_body(chat_reply(json!({ "isFootDetected": false })));
        })
        .await;

    let app = app_for!(pool.clone(), server, user_id);

    let resp = test::call_service(&app, upload_request("text/plain").to_request()).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = test::call_service(&app, upload_request("image/png").to_request()).await;
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let status = billing::get_status(pool, user_id).await.expect("status");
    assert_eq!(status.analyses_used, 0);
}

#[actix_web::test]
async fn exhausted_quota_is_payment_required() {
    let Some(test_db) = support::init_test_db().await else {
        return;
    };
    let pool = &test_db.pool;
    let user_id = support::create_user(pool).await;
    for _ in 0..3 {
        assert!(billing::increment_usage(pool, user_id).await.expect("increment"));
    }

    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(200).json_body(chat_reply(json!({ "isFootDetected": true })));
        })
        .await;

    let app = app_for!(pool.clone(), server, user_id);
    let resp = test::call_service(&app, upload_request("image/jpeg").to_request()).await;
    assert_eq!(resp.status(), StatusCode::PAYMENT_REQUIRED);
    // the model is never called once the quota is gone
    mock.assert_hits_async(0).await;
}

#[actix_web::test]
async fn vision_outage_is_bad_gateway() {
    let Some(test_db) = support::init_test_db().await else {
        return;
    };
    let pool = &test_db.pool;
    let user_id = support::create_user(pool).await;

    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(503).body("overloaded");
        })
        .await;

    let app = app_for!(pool.clone(), server, user_id);
    let resp = test::call_service(&app, upload_request("image/jpeg").to_request()).await;
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);

    let status = billing::get_status(pool, user_id).await.expect("status");
    assert_eq!(status.analyses_used, 0);
}
