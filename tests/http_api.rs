use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use household_hub::app::{AppState, Backend};
use household_hub::config::Config;
use household_hub::http::build_router;
use household_hub::store::MemoryService;
use serde_json::{json, Value};
use sha2::Sha256;
use tower::ServiceExt;
use uuid::Uuid;

const SECRET: &str = "test-jwt-secret";

fn config() -> Config {
    Config {
        server_addr: "127.0.0.1:0".parse().unwrap(),
        log_level: "info".to_string(),
        log_json: false,
        supabase_url: "http://localhost:54321".to_string(),
        supabase_anon_key: "anon".to_string(),
        supabase_jwt_secret: SECRET.to_string(),
        client_origin: "http://localhost:8081".to_string(),
        api_rate_limit: 1000,
        session_idle_secs: 1800,
    }
}

fn app() -> (Router, Arc<MemoryService>) {
    let svc = Arc::new(MemoryService::new());
    let state = AppState::with_backend(config(), Backend::Shared(svc.clone()));
    (build_router(state), svc)
}

fn sign(claims: Value, secret: &str) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(format!("{}.{}", header, payload).as_bytes());
    let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
    format!("{}.{}.{}", header, payload, signature)
}

fn token(user: Uuid) -> String {
    let exp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
        + 3600;
    sign(
        json!({"sub": user, "aud": "authenticated", "exp": exp}),
        SECRET,
    )
}

fn register(svc: &MemoryService, email: &str) -> Uuid {
    let id = Uuid::new_v4();
    svc.seed("profiles", vec![json!({"id": id, "email": email})]);
    id
}

async fn call(
    app: &Router,
    method: &str,
    uri: &str,
    user: Option<Uuid>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        request = request.header("authorization", format!("Bearer {}", token(user)));
    }
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string())),
        None => request.body(Body::empty()),
    }
    .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

// ── Health and auth ─────────────────────────────────────────────

#[tokio::test]
async fn health_is_public() {
    let (app, _) = app();
    let (status, body) = call(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["active_sessions"], 0);
}

#[tokio::test]
async fn protected_routes_need_a_valid_token() {
    let (app, _) = app();
    let (status, _) = call(&app, "GET", "/pantries", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let forged = sign(
        json!({"sub": Uuid::new_v4(), "exp": u64::MAX}),
        "some-other-secret",
    );
    let request = Request::builder()
        .uri("/pantries")
        .header("authorization", format!("Bearer {}", forged))
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

// ── Resources ───────────────────────────────────────────────────

#[tokio::test]
async fn shared_pantry_is_listed_for_both_but_deletable_by_owner_only() {
    let (app, svc) = app();
    let anna = register(&svc, "anna@example.com");
    let bob = register(&svc, "bob@example.com");

    let (status, created) = call(
        &app,
        "POST",
        "/pantries",
        Some(anna),
        Some(json!({"name": "Dom", "shared_with": [bob]})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["is_owner"], true);
    assert_eq!(created["owner_id"], json!(anna.to_string()));
    let id = created["id"].as_str().unwrap().to_string();

    let (status, listed) = call(&app, "GET", "/pantries", Some(bob), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed["items"].as_array().unwrap().len(), 1);
    assert_eq!(listed["items"][0]["is_owner"], false);

    let (status, body) = call(&app, "DELETE", &format!("/pantries/{}", id), Some(bob), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["error"].as_str().unwrap().contains("Brak uprawnień"));
    assert_eq!(svc.rows("pantries").len(), 1);

    let (status, _) = call(&app, "DELETE", &format!("/pantries/{}", id), Some(anna), None).await;
    assert_eq!(status, StatusCode::OK);
    let (_, listed) = call(&app, "GET", "/pantries", Some(anna), None).await;
    assert!(listed["items"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn members_route_maps_store_errors() {
    let (app, svc) = app();
    let anna = register(&svc, "anna@example.com");
    register(&svc, "bob@example.com");

    let (_, created) = call(
        &app,
        "POST",
        "/shopping-lists",
        Some(anna),
        Some(json!({"name": "Sobota"})),
    )
    .await;
    let members_uri = format!("/shopping-lists/{}/members", created["id"].as_str().unwrap());

    let (status, body) = call(
        &app,
        "POST",
        &members_uri,
        Some(anna),
        Some(json!({"email": "bob@example.com"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["members"][0]["email"], "bob@example.com");

    let (status, _) = call(
        &app,
        "POST",
        &members_uri,
        Some(anna),
        Some(json!({"email": "bob@example.com"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = call(
        &app,
        "POST",
        &members_uri,
        Some(anna),
        Some(json!({"email": "nikt@example.com"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn expense_summary_respects_date_range() {
    let (app, svc) = app();
    let anna = register(&svc, "anna@example.com");

    for (title, amount, category, day) in [
        ("Chleb", 10.0, "jedzenie", "2024-03-02"),
        ("Ser", 15.0, "jedzenie", "2024-03-05"),
        ("Czynsz", 1500.0, "mieszkanie", "2024-04-01"),
    ] {
        let (status, _) = call(
            &app,
            "POST",
            "/expenses",
            Some(anna),
            Some(json!({"title": title, "amount": amount, "category": category, "spent_on": day})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, body) = call(
        &app,
        "GET",
        "/expense-summary?from=2024-03-01&to=2024-03-31",
        Some(anna),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["totals"].as_array().unwrap().len(), 1);
    assert_eq!(body["totals"][0]["category"], "jedzenie");
    assert_eq!(body["totals"][0]["total"], 25.0);
}

// ── Items and friends ───────────────────────────────────────────

#[tokio::test]
async fn negative_quantity_is_a_bad_request() {
    let (app, svc) = app();
    let anna = register(&svc, "anna@example.com");

    let (_, pantry) = call(&app, "POST", "/pantries", Some(anna), Some(json!({"name": "Dom"}))).await;
    let (status, item) = call(
        &app,
        "POST",
        &format!("/pantries/{}/items", pantry["id"].as_str().unwrap()),
        Some(anna),
        Some(json!({"name": "Mąka", "quantity": 2.0})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = call(
        &app,
        "PUT",
        &format!("/pantry-items/{}/quantity", item["id"].as_str().unwrap()),
        Some(anna),
        Some(json!({"quantity": -1.0})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(svc.rows("pantry_items")[0]["quantity"], json!(2.0));
}

#[tokio::test]
async fn items_follow_their_parents_access() {
    let (app, svc) = app();
    let anna = register(&svc, "anna@example.com");
    let bob = register(&svc, "bob@example.com");
    let eve = register(&svc, "eve@example.com");

    let (_, pantry) = call(
        &app,
        "POST",
        "/pantries",
        Some(anna),
        Some(json!({"name": "Dom", "shared_with": [bob]})),
    )
    .await;
    let items_uri = format!("/pantries/{}/items", pantry["id"].as_str().unwrap());
    let (_, item) = call(
        &app,
        "POST",
        &items_uri,
        Some(anna),
        Some(json!({"name": "Mąka", "quantity": 2.0})),
    )
    .await;
    let item_uri = format!("/pantry-items/{}", item["id"].as_str().unwrap());

    let (status, _) = call(&app, "GET", &items_uri, Some(eve), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = call(
        &app,
        "POST",
        &items_uri,
        Some(eve),
        Some(json!({"name": "Cudze", "quantity": 1.0})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = call(
        &app,
        "PUT",
        &format!("{}/quantity", item_uri),
        Some(eve),
        Some(json!({"quantity": 0.0})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = call(&app, "PATCH", &item_uri, Some(eve), Some(json!({"name": "X"}))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = call(&app, "DELETE", &item_uri, Some(eve), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let stored = svc.rows("pantry_items");
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0]["quantity"], json!(2.0));
    assert_eq!(stored[0]["name"], "Mąka");

    let (status, listed) = call(&app, "GET", &items_uri, Some(bob), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed["items"].as_array().unwrap().len(), 1);
    let (status, _) = call(
        &app,
        "PUT",
        &format!("{}/quantity", item_uri),
        Some(bob),
        Some(json!({"quantity": 3.0})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(svc.rows("pantry_items")[0]["quantity"], json!(3.0));
}

#[tokio::test]
async fn only_the_owner_manages_members_over_http() {
    let (app, svc) = app();
    let anna = register(&svc, "anna@example.com");
    let eve = register(&svc, "eve@example.com");

    let (_, created) = call(&app, "POST", "/pantries", Some(anna), Some(json!({"name": "Dom"}))).await;
    let members_uri = format!("/pantries/{}/members", created["id"].as_str().unwrap());

    let (status, _) = call(
        &app,
        "POST",
        &members_uri,
        Some(eve),
        Some(json!({"email": "eve@example.com"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = call(&app, "GET", &members_uri, Some(eve), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(svc.rows("pantry_members").is_empty());

    let (_, listed) = call(&app, "GET", "/pantries", Some(eve), None).await;
    assert!(listed["items"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn friend_invites_over_http() {
    let (app, svc) = app();
    let anna = register(&svc, "anna@example.com");
    let bob = register(&svc, "bob@example.com");

    let (status, _) = call(
        &app,
        "POST",
        "/friends/invite",
        Some(anna),
        Some(json!({"email": "anna@example.com"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = call(
        &app,
        "POST",
        "/friends/invite",
        Some(anna),
        Some(json!({"email": "bob@example.com"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["friends"][0]["status"], "pending");

    let (_, listed) = call(&app, "GET", "/friends", Some(bob), None).await;
    let link = listed["friends"][0]["id"].as_str().unwrap().to_string();
    assert_eq!(listed["friends"][0]["incoming"], true);

    let (status, body) = call(&app, "POST", &format!("/friends/{}/accept", link), Some(bob), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["friends"][0]["status"], "accepted");
}

#[tokio::test]
async fn closing_a_session_drops_it() {
    let (app, svc) = app();
    let anna = register(&svc, "anna@example.com");

    call(&app, "GET", "/pantries", Some(anna), None).await;
    let (_, health) = call(&app, "GET", "/health", None, None).await;
    assert_eq!(health["active_sessions"], 1);

    let (status, _) = call(&app, "DELETE", "/session", Some(anna), None).await;
    assert_eq!(status, StatusCode::OK);
    let (_, health) = call(&app, "GET", "/health", None, None).await;
    assert_eq!(health["active_sessions"], 0);
}
