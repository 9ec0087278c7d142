use std::collections::BTreeMap;

use assert_matches::assert_matches;
use serde_json::json;
use storefront_api::services::payment_gateway::{
    GatewayError, HttpPaymentGateway, PaymentGateway, RemoteOrderRequest,
};
use wiremock::matchers::{body_json, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn order_request() -> RemoteOrderRequest {
    let mut notes = BTreeMap::new();
    notes.insert("purchase_type".to_string(), "product".to_string());
    RemoteOrderRequest {
        amount: 25_000,
        currency: "INR".to_string(),
        receipt: "7f0c6a1e-0000-4000-8000-000000000001".to_string(),
        notes,
    }
}

#[tokio::test]
async fn creates_remote_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/orders"))
        .and(header_exists("authorization"))
        .and(body_json(json!({
            "amount": 25_000,
            "currency": "INR",
            "receipt": "7f0c6a1e-0000-4000-8000-000000000001",
            "notes": {"purchase_type": "product"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "order_remote_1",
            "entity": "order",
            "amount": 25_000,
            "currency": "INR",
            "status": "created"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = HttpPaymentGateway::new(server.uri(), "key_id", "key_secret").unwrap();
    let order = gateway.create_remote_order(order_request()).await.unwrap();

    assert_eq!(order.id, "order_remote_1");
    assert_eq!(order.amount, 25_000);
}

#[tokio::test]
async fn refund_posts_amount_for_payment() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/payments/pay_9/refund"))
        .and(body_json(json!({"amount": 4_200})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"id": "rfnd_9", "amount": 4_200})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let gateway = HttpPaymentGateway::new(format!("{}/", server.uri()), "key_id", "key_secret").unwrap();
    let refund = gateway.refund("pay_9", 4_200).await.unwrap();

    assert_eq!(refund.id, "rfnd_9");
}

#[tokio::test]
async fn rejected_calls_carry_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/orders"))
        .respond_with(ResponseTemplate::new(400).set_body_string("amount too small"))
        .mount(&server)
        .await;

    let gateway = HttpPaymentGateway::new(server.uri(), "key_id", "key_secret").unwrap();
    let err = gateway.create_remote_order(order_request()).await.unwrap_err();

    assert_matches!(err, GatewayError::Rejected { status: 400, ref body } if body == "amount too small");
}

#[tokio::test]
async fn malformed_response_is_invalid() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/orders"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let gateway = HttpPaymentGateway::new(server.uri(), "key_id", "key_secret").unwrap();
    let err = gateway.create_remote_order(order_request()).await.unwrap_err();

    assert_matches!(err, GatewayError::InvalidResponse(_));
}

#[tokio::test]
async fn missing_credentials_fail_without_a_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let gateway = HttpPaymentGateway::new(server.uri(), "", "").unwrap();
    let err = gateway.refund("pay_1", 100).await.unwrap_err();

    assert_matches!(err, GatewayError::NotConfigured(_));
}
