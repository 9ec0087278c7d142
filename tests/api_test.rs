//! HTTP surface: auth, routing and error envelopes.

mod common;

use axum::http::{Method, StatusCode};
use common::{payment_event, response_json, sign_checkout, sign_webhook, TestContext};
use rust_decimal_macros::dec;
use serde_json::json;
use storefront_api::auth::Role;
use storefront_api::entities::order::OrderStatus;

#[tokio::test]
async fn health_reports_database() {
    let ctx = TestContext::new().await;
    let response = ctx.request(Method::GET, "/health", None, None).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["status"], "up");
    assert_eq!(body["database"], "healthy");
}

#[tokio::test]
async fn openapi_document_is_served() {
    let ctx = TestContext::new().await;
    let response = ctx
        .request(Method::GET, "/api-docs/openapi.json", None, None)
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let doc = response_json(response).await;
    assert!(doc["paths"]["/api/v1/orders/products"].is_object());
    assert!(doc["paths"]["/api/v1/payments/webhook"].is_object());
}

#[tokio::test]
async fn order_routes_require_a_token() {
    let ctx = TestContext::new().await;
    let body = json!({"product_ids": ["lofi-beat"], "currency": "INR"});

    let missing = ctx
        .request(Method::POST, "/api/v1/orders/products", None, Some(body.clone()))
        .await;
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

    let garbage = ctx
        .request(
            Method::POST,
            "/api/v1/orders/products",
            Some("not-a-jwt"),
            Some(body),
        )
        .await;
    assert_eq!(garbage.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn checkout_and_verify_over_http() {
    let ctx = TestContext::new().await;
    let buyer = ctx.seed_user("buyer@example.com").await;
    ctx.seed_product("lofi-beat", dec!(100), dec!(100)).await;
    let token = ctx.token(buyer.id, Role::User);

    let created = ctx
        .request(
            Method::POST,
            "/api/v1/orders/products",
            Some(&token),
            Some(json!({"product_ids": ["lofi-beat"], "currency": "INR"})),
        )
        .await;
    assert_eq!(created.status(), StatusCode::CREATED);
    let created = response_json(created).await;
    assert_eq!(created["success"], true);
    let order_id = created["data"]["order_id"].as_str().unwrap().to_string();
    let remote = created["data"]["remote_order_id"].as_str().unwrap().to_string();

    let fetched = ctx
        .request(Method::GET, &format!("/api/v1/orders/{}", order_id), Some(&token), None)
        .await;
    assert_eq!(fetched.status(), StatusCode::OK);
    assert_eq!(response_json(fetched).await["data"]["status"], "PENDING");

    let verified = ctx
        .request(
            Method::POST,
            &format!("/api/v1/orders/{}/verify", order_id),
            Some(&token),
            Some(json!({
                "remote_order_id": remote,
                "payment_id": "pay_http",
                "signature": sign_checkout(&remote, "pay_http"),
            })),
        )
        .await;
    assert_eq!(verified.status(), StatusCode::OK);
    assert_eq!(response_json(verified).await["data"]["status"], "PAID");

    // buying the same product again is refused with the owned ids
    let again = ctx
        .request(
            Method::POST,
            "/api/v1/orders/products",
            Some(&token),
            Some(json!({"product_ids": ["lofi-beat"], "currency": "INR"})),
        )
        .await;
    assert_eq!(again.status(), StatusCode::BAD_REQUEST);
    let err = response_json(again).await;
    assert_eq!(err["details"]["product_ids"].as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn forged_verify_is_rejected() {
    let ctx = TestContext::new().await;
    let buyer = ctx.seed_user("buyer@example.com").await;
    ctx.seed_product("lofi-beat", dec!(100), dec!(100)).await;
    let placed = ctx.place_product_order(buyer.id, &["lofi-beat"], None).await;
    let token = ctx.token(buyer.id, Role::User);

    let response = ctx
        .request(
            Method::POST,
            &format!("/api/v1/orders/{}/verify", placed.order_id),
            Some(&token),
            Some(json!({
                "remote_order_id": placed.remote_order_id,
                "payment_id": "pay_1",
                "signature": "00".repeat(32),
            })),
        )
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(ctx.order(placed.order_id).await.status, OrderStatus::Pending);
}

#[tokio::test]
async fn other_users_cannot_read_an_order() {
    let ctx = TestContext::new().await;
    let buyer = ctx.seed_user("buyer@example.com").await;
    let snoop = ctx.seed_user("snoop@example.com").await;
    ctx.seed_product("lofi-beat", dec!(100), dec!(100)).await;
    let placed = ctx.place_product_order(buyer.id, &["lofi-beat"], None).await;

    let response = ctx
        .request(
            Method::GET,
            &format!("/api/v1/orders/{}", placed.order_id),
            Some(&ctx.token(snoop.id, Role::User)),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let admin = ctx
        .request(
            Method::GET,
            &format!("/api/v1/orders/{}", placed.order_id),
            Some(&ctx.token(snoop.id, Role::Admin)),
            None,
        )
        .await;
    assert_eq!(admin.status(), StatusCode::OK);
}

#[tokio::test]
async fn owner_can_cancel_pending_order() {
    let ctx = TestContext::new().await;
    let buyer = ctx.seed_user("buyer@example.com").await;
    ctx.seed_product("lofi-beat", dec!(100), dec!(100)).await;
    let placed = ctx.place_product_order(buyer.id, &["lofi-beat"], None).await;
    let token = ctx.token(buyer.id, Role::User);

    let response = ctx
        .request(
            Method::POST,
            &format!("/api/v1/orders/{}/cancel", placed.order_id),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response_json(response).await["data"]["status"], "CANCELLED");

    let twice = ctx
        .request(
            Method::POST,
            &format!("/api/v1/orders/{}/cancel", placed.order_id),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(twice.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn admin_routes_reject_regular_users() {
    let ctx = TestContext::new().await;
    let buyer = ctx.seed_user("buyer@example.com").await;
    ctx.seed_product("lofi-beat", dec!(100), dec!(100)).await;
    let placed = ctx.place_product_order(buyer.id, &["lofi-beat"], None).await;
    let body = payment_event("payment.captured", &placed.remote_order_id, "pay_1", 10_000);
    ctx.post_webhook(&body, Some(&sign_webhook(&body))).await;

    let uri = format!("/api/v1/admin/orders/{}/refund", placed.order_id);
    let as_user = ctx
        .request(Method::POST, &uri, Some(&ctx.token(buyer.id, Role::User)), None)
        .await;
    assert_eq!(as_user.status(), StatusCode::FORBIDDEN);

    let admin = ctx.seed_user("ops@example.com").await;
    let as_admin = ctx
        .request(Method::POST, &uri, Some(&ctx.token(admin.id, Role::Admin)), None)
        .await;
    assert_eq!(as_admin.status(), StatusCode::OK);
    let refunded = response_json(as_admin).await;
    assert!(refunded["data"]["refund_id"]
        .as_str()
        .unwrap()
        .starts_with("rfnd_test_"));
    assert_eq!(ctx.order(placed.order_id).await.status, OrderStatus::Refunded);
}

#[tokio::test]
async fn download_endpoints_meter_membership_use() {
    let ctx = TestContext::new().await;
    let member = ctx.seed_user("member@example.com").await;
    let beat = ctx.seed_product("lofi-beat", dec!(100), dec!(100)).await;
    let token = ctx.token(member.id, Role::User);

    let denied = ctx
        .request(
            Method::POST,
            &format!("/api/v1/downloads/{}", beat.id),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(denied.status(), StatusCode::FORBIDDEN);

    let access = ctx
        .request(
            Method::GET,
            &format!("/api/v1/downloads/{}", beat.id),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(access.status(), StatusCode::OK);
    assert_eq!(response_json(access).await["data"]["via"], "denied");
}

#[tokio::test]
async fn webhook_route_checks_signature() {
    let ctx = TestContext::new().await;
    let buyer = ctx.seed_user("buyer@example.com").await;
    ctx.seed_product("lofi-beat", dec!(100), dec!(100)).await;
    let placed = ctx.place_product_order(buyer.id, &["lofi-beat"], None).await;
    let body = payment_event("payment.captured", &placed.remote_order_id, "pay_1", 10_000);

    let rejected = ctx.post_webhook(&body, Some(&sign_webhook(b"other body"))).await;
    assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);

    let accepted = ctx.post_webhook(&body, Some(&sign_webhook(&body))).await;
    assert_eq!(accepted.status(), StatusCode::OK);
    let ack = response_json(accepted).await;
    assert_eq!(ack["status"], "ok");
    assert_eq!(ack["result"], "settled");
}
