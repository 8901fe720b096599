use std::sync::Arc;

use actix_web::{test, web, App};
use otp_auth_server::{AppState, MemoryOtpStore, MemoryUserStore, OtpStore, Settings};
use serde_json::{json, Value};

fn state() -> (web::Data<AppState>, Arc<MemoryOtpStore>) {
    let config = Settings::new_for_test().expect("Failed to load test config");
    let otps = Arc::new(MemoryOtpStore::new());
    let state = AppState::with_stores(config, otps.clone(), Arc::new(MemoryUserStore::new()));
    (web::Data::new(state), otps)
}

async fn latest_code(otps: &MemoryOtpStore, phone: &str) -> String {
    otps.latest_valid(phone).await.unwrap().expect("pending challenge").code
}

macro_rules! app {
    ($state:expr) => {
        test::init_service(
            App::new()
                .app_data($state.clone())
                .configure(otp_auth_server::configure)
        ).await
    };
}

#[actix_web::test]
async fn test_generate_and_verify() {
    let (state, otps) = state();
    let app = app!(state);
    let phone = "+1555000111";

    let resp = test::TestRequest::post()
        .uri("/api/v1/auth/otp/generate")
        .set_json(json!({ "phone_number": phone }))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["message"], "OTP sent successfully");
    assert_eq!(body["expires_in_minutes"], 2);
    assert!(body.get("code").is_none());

    let code = latest_code(&otps, phone).await;
    let resp = test::TestRequest::post()
        .uri("/api/v1/auth/otp/verify")
        .set_json(json!({ "phone_number": phone, "code": code }))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert!(body["token"].as_str().is_some());
    assert_eq!(body["user"]["phone_number"], phone);
    assert_eq!(body["outcome"], "registered");
    assert!(body["expires_at"].as_str().is_some());

    // Replay of a consumed code
    let resp = test::TestRequest::post()
        .uri("/api/v1/auth/otp/verify")
        .set_json(json!({ "phone_number": phone, "code": code }))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), 401);
}

#[actix_web::test]
async fn test_wrong_code_is_unauthorized() {
    let (state, otps) = state();
    let app = app!(state);
    let phone = "+1555000112";

    test::TestRequest::post()
        .uri("/api/v1/auth/otp/generate")
        .set_json(json!({ "phone_number": phone }))
        .send_request(&app)
        .await;
    let code = latest_code(&otps, phone).await;
    let wrong = if code == "000000" { "111111" } else { "000000" };

    let resp = test::TestRequest::post()
        .uri("/api/v1/auth/otp/verify")
        .set_json(json!({ "phone_number": phone, "code": wrong }))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), 401);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["status"], 401);
}

#[actix_web::test]
async fn test_rate_limit_returns_429() {
    let (state, _) = state();
    let app = app!(state);

    for _ in 0..3 {
        let resp = test::TestRequest::post()
            .uri("/api/v1/auth/otp/generate")
            .set_json(json!({ "phone_number": "+1555000222" }))
            .send_request(&app)
            .await;
        assert_eq!(resp.status(), 200);
    }

    let resp = test::TestRequest::post()
        .uri("/api/v1/auth/otp/generate")
        .set_json(json!({ "phone_number": "+1555000222" }))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), 429);
}

#[actix_web::test]
async fn test_invalid_request_bodies() {
    let (state, _) = state();
    let app = app!(state);

    let resp = test::TestRequest::post()
        .uri("/api/v1/auth/otp/generate")
        .set_json(json!({ "phone_number": "   " }))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), 400);

    let resp = test::TestRequest::post()
        .uri("/api/v1/auth/otp/verify")
        .set_json(json!({ "phone_number": "+1555000111" }))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), 400);

    let resp = test::TestRequest::post()
        .uri("/api/v1/auth/otp/verify")
        .set_json(json!({ "phone_number": "+1555000111", "code": "" }))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), 400);
}

#[actix_web::test]
async fn test_overlong_phone_number_is_bad_request() {
    let (state, otps) = state();
    let app = app!(state);
    let overlong = "+".to_string() + &"1".repeat(20);

    for uri in ["/api/v1/auth/otp/generate", "/api/v1/auth/otp/verify"] {
        let resp = test::TestRequest::post()
            .uri(uri)
            .set_json(json!({ "phone_number": overlong, "code": "123456" }))
            .send_request(&app)
            .await;
        assert_eq!(resp.status(), 400);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"]["status"], 400);
    }
    assert!(otps.challenges_for(&overlong).await.is_empty());

    // Exactly twenty characters still fits the column.
    let resp = test::TestRequest::post()
        .uri("/api/v1/auth/otp/generate")
        .set_json(json!({ "phone_number": &overlong[1..] }))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), 200);
}

#[actix_web::test]
async fn test_user_routes_require_token() {
    let (state, otps) = state();
    let app = app!(state);

    let resp = test::TestRequest::get()
        .uri("/api/v1/users")
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), 401);

    let resp = test::TestRequest::get()
        .uri("/api/v1/users")
        .insert_header(("Authorization", "Bearer not-a-token"))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), 401);

    let phone = "+1555000333";
    test::TestRequest::post()
        .uri("/api/v1/auth/otp/generate")
        .set_json(json!({ "phone_number": phone }))
        .send_request(&app)
        .await;
    let code = latest_code(&otps, phone).await;
    let resp = test::TestRequest::post()
        .uri("/api/v1/auth/otp/verify")
        .set_json(json!({ "phone_number": phone, "code": code }))
        .send_request(&app)
        .await;
    let body: Value = test::read_body_json(resp).await;
    let token = body["token"].as_str().unwrap().to_string();
    let user_id = body["user"]["id"].as_str().unwrap().to_string();
    let bearer = ("Authorization", format!("Bearer {}", token));

    let resp = test::TestRequest::get()
        .uri("/api/v1/users?page=1&page_size=5&search=555000333")
        .insert_header(bearer.clone())
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), 200);
    let page: Value = test::read_body_json(resp).await;
    assert_eq!(page["total"], 1);
    assert_eq!(page["page_size"], 5);
    assert_eq!(page["users"][0]["id"], user_id.as_str());

    let resp = test::TestRequest::get()
        .uri(&format!("/api/v1/users/{}", user_id))
        .insert_header(bearer.clone())
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), 200);

    let resp = test::TestRequest::get()
        .uri("/api/v1/users/not-a-uuid")
        .insert_header(bearer.clone())
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), 400);

    let resp = test::TestRequest::delete()
        .uri(&format!("/api/v1/users/{}", user_id))
        .insert_header(bearer.clone())
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), 200);

    // Tokens are stateless, so the deleted user's token still authenticates.
    let resp = test::TestRequest::get()
        .uri(&format!("/api/v1/users/{}", user_id))
        .insert_header(bearer)
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), 404);
}
