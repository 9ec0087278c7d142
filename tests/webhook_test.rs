//! Dual-path payment confirmation: gateway webhooks and client verify.

mod common;

use assert_matches::assert_matches;
use axum::http::StatusCode;
use chrono::Utc;
use common::{payment_event, refund_event, response_json, sign_checkout, sign_webhook, TestContext};
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, Set};
use storefront_api::entities::order::{CancelReason, OrderStatus};
use storefront_api::entities::user;
use storefront_api::errors::ServiceError;
use storefront_api::events::Event;
use storefront_api::services::orders::Actor;
use storefront_api::services::reconciliation::{ClientConfirmation, WebhookAck};
use storefront_api::services::refunds::CompensationOutcome;

struct Placed {
    ctx: TestContext,
    user_id: uuid::Uuid,
    order_id: uuid::Uuid,
    remote_order_id: String,
}

async fn placed_order() -> Placed {
    let ctx = TestContext::new().await;
    let user = ctx.seed_user("buyer@example.com").await;
    ctx.seed_product("lofi-beat", dec!(100), dec!(100)).await;
    let result = ctx.place_product_order(user.id, &["lofi-beat"], None).await;
    Placed {
        ctx,
        user_id: user.id,
        order_id: result.order_id,
        remote_order_id: result.remote_order_id,
    }
}

#[tokio::test]
async fn bad_signature_is_rejected_without_side_effects() {
    let p = placed_order().await;
    let body = payment_event("payment.captured", &p.remote_order_id, "pay_1", 10_000);

    let unsigned = p.ctx.post_webhook(&body, None).await;
    assert_eq!(unsigned.status(), StatusCode::BAD_REQUEST);

    let forged = p.ctx.post_webhook(&body, Some("deadbeef")).await;
    assert_eq!(forged.status(), StatusCode::BAD_REQUEST);

    assert_eq!(p.ctx.order(p.order_id).await.status, OrderStatus::Pending);
}

#[tokio::test]
async fn captured_webhook_settles_and_sends_one_email() {
    let p = placed_order().await;
    let body = payment_event("payment.captured", &p.remote_order_id, "pay_1", 10_000);
    let sig = sign_webhook(&body);

    let response = p.ctx.post_webhook(&body, Some(&sig)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = response_json(response).await;
    assert_eq!(json["result"], "settled");

    // gateway retries the same notification
    let retry = p.ctx.post_webhook(&body, Some(&sig)).await;
    assert_eq!(retry.status(), StatusCode::OK);
    assert_eq!(response_json(retry).await["result"], "already_settled");

    let order = p.ctx.order(p.order_id).await;
    assert_eq!(order.status, OrderStatus::Paid);
    assert_eq!(order.payment_id.as_deref(), Some("pay_1"));
    assert!(order.gateway_payload.is_some());

    let emails = p.ctx.email.wait_for(1).await;
    assert_eq!(emails.len(), 1);
    assert_eq!(emails[0].to, "buyer@example.com");
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(p.ctx.email.sent.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn client_verify_after_webhook_is_idempotent() {
    let p = placed_order().await;
    let body = payment_event("payment.captured", &p.remote_order_id, "pay_1", 10_000);
    p.ctx
        .services
        .reconciliation
        .handle_webhook(&body, Some(&sign_webhook(&body)), Utc::now())
        .await
        .unwrap();

    let view = p
        .ctx
        .services
        .reconciliation
        .confirm_payment_from_client(
            p.user_id,
            p.order_id,
            ClientConfirmation {
                remote_order_id: p.remote_order_id.clone(),
                payment_id: "pay_1".to_string(),
                signature: sign_checkout(&p.remote_order_id, "pay_1"),
            },
            Utc::now(),
        )
        .await
        .unwrap();
    assert_eq!(view.status, OrderStatus::Paid);

    let conflicting = p
        .ctx
        .services
        .reconciliation
        .confirm_payment_from_client(
            p.user_id,
            p.order_id,
            ClientConfirmation {
                remote_order_id: p.remote_order_id.clone(),
                payment_id: "pay_other".to_string(),
                signature: sign_checkout(&p.remote_order_id, "pay_other"),
            },
            Utc::now(),
        )
        .await
        .unwrap_err();
    assert_matches!(conflicting, ServiceError::Conflict(_));

    assert_eq!(p.ctx.email.wait_for(1).await.len(), 1);
}

#[tokio::test]
async fn client_verify_settles_then_webhook_is_acknowledged() {
    let p = placed_order().await;
    p.ctx
        .services
        .reconciliation
        .confirm_payment_from_client(
            p.user_id,
            p.order_id,
            ClientConfirmation {
                remote_order_id: p.remote_order_id.clone(),
                payment_id: "pay_1".to_string(),
                signature: sign_checkout(&p.remote_order_id, "pay_1"),
            },
            Utc::now(),
        )
        .await
        .unwrap();

    let body = payment_event("payment.captured", &p.remote_order_id, "pay_1", 10_000);
    let ack = p
        .ctx
        .services
        .reconciliation
        .handle_webhook(&body, Some(&sign_webhook(&body)), Utc::now())
        .await
        .unwrap();
    assert_eq!(ack, WebhookAck::AlreadySettled);
    assert_eq!(p.ctx.order(p.order_id).await.payment_signature.as_deref().map(str::len), Some(64));
}

#[tokio::test]
async fn client_verify_checks_owner_order_and_signature() {
    let p = placed_order().await;
    let recon = &p.ctx.services.reconciliation;
    let good = ClientConfirmation {
        remote_order_id: p.remote_order_id.clone(),
        payment_id: "pay_1".to_string(),
        signature: sign_checkout(&p.remote_order_id, "pay_1"),
    };

    let stranger = recon
        .confirm_payment_from_client(uuid::Uuid::new_v4(), p.order_id, good.clone(), Utc::now())
        .await
        .unwrap_err();
    assert_matches!(stranger, ServiceError::Forbidden(_));

    let wrong_order = recon
        .confirm_payment_from_client(
            p.user_id,
            p.order_id,
            ClientConfirmation {
                remote_order_id: "order_elsewhere".to_string(),
                ..good.clone()
            },
            Utc::now(),
        )
        .await
        .unwrap_err();
    assert_matches!(wrong_order, ServiceError::ValidationError(_));

    let forged = recon
        .confirm_payment_from_client(
            p.user_id,
            p.order_id,
            ClientConfirmation {
                signature: sign_checkout(&p.remote_order_id, "pay_2"),
                ..good.clone()
            },
            Utc::now(),
        )
        .await
        .unwrap_err();
    assert_matches!(forged, ServiceError::InvalidSignature);

    assert_eq!(p.ctx.order(p.order_id).await.status, OrderStatus::Pending);
}

#[tokio::test]
async fn capture_on_cancelled_order_is_acknowledged_only() {
    let p = placed_order().await;
    p.ctx
        .services
        .orders
        .cancel(Actor::User(p.user_id), p.order_id, Utc::now())
        .await
        .unwrap();

    let body = payment_event("payment.captured", &p.remote_order_id, "pay_1", 10_000);
    let response = p.ctx.post_webhook(&body, Some(&sign_webhook(&body))).await;

    assert_eq!(response.status(), StatusCode::OK);
    let order = p.ctx.order(p.order_id).await;
    assert_eq!(order.status, OrderStatus::Cancelled);
    assert!(order.payment_id.is_none());
}

#[tokio::test]
async fn failed_payment_marks_order_failed() {
    let p = placed_order().await;
    let body = payment_event("payment.failed", &p.remote_order_id, "pay_1", 10_000);

    let ack = p
        .ctx
        .services
        .reconciliation
        .handle_webhook(&body, Some(&sign_webhook(&body)), Utc::now())
        .await
        .unwrap();

    assert_eq!(ack, WebhookAck::Failed);
    let order = p.ctx.order(p.order_id).await;
    assert_eq!(order.status, OrderStatus::Failed);
    assert_eq!(order.cancel_reason, Some(CancelReason::PaymentFailed));
    assert!(order.payment_errors.unwrap().to_string().contains("card declined"));
    assert!(p.ctx.gateway.refund_calls().is_empty());
}

#[tokio::test]
async fn underpaid_capture_is_failed_and_refunded() {
    let p = placed_order().await;
    let body = payment_event("payment.captured", &p.remote_order_id, "pay_short", 5_000);

    let ack = p
        .ctx
        .services
        .reconciliation
        .handle_webhook(&body, Some(&sign_webhook(&body)), Utc::now())
        .await
        .unwrap();

    assert_matches!(ack, WebhookAck::Compensated(CompensationOutcome::Refunded { .. }));
    let order = p.ctx.order(p.order_id).await;
    assert_eq!(order.status, OrderStatus::Failed);
    assert_eq!(order.cancel_reason, Some(CancelReason::Underpaid));
    assert!(order.refund_id.is_some());
    assert_eq!(p.ctx.gateway.refund_calls(), vec![("pay_short".to_string(), 5_000)]);
}

#[tokio::test]
async fn settlement_failure_is_compensated_with_refund() {
    let p = placed_order().await;
    let mut banned: user::ActiveModel = p.ctx.user(p.user_id).await.into();
    banned.is_banned = Set(true);
    banned.update(&*p.ctx.db).await.unwrap();

    let body = payment_event("payment.captured", &p.remote_order_id, "pay_1", 10_000);
    let response = p.ctx.post_webhook(&body, Some(&sign_webhook(&body))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response_json(response).await["result"], "compensated");

    let order = p.ctx.order(p.order_id).await;
    assert_eq!(order.status, OrderStatus::Failed);
    assert_eq!(order.cancel_reason, Some(CancelReason::SystemCancelled));
    assert_eq!(order.payment_id.as_deref(), Some("pay_1"));
    assert_eq!(p.ctx.gateway.refund_calls(), vec![("pay_1".to_string(), 10_000)]);

    // a retry of the same capture does not refund twice
    let retry = p.ctx.post_webhook(&body, Some(&sign_webhook(&body))).await;
    assert_eq!(retry.status(), StatusCode::OK);
    assert_eq!(p.ctx.gateway.refund_calls().len(), 1);
    assert!(p.ctx.email.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn failed_compensating_refund_raises_manual_review() {
    let p = placed_order().await;
    let mut banned: user::ActiveModel = p.ctx.user(p.user_id).await.into();
    banned.is_deleted = Set(true);
    banned.update(&*p.ctx.db).await.unwrap();
    p.ctx.gateway.fail_refund(true);

    let body = payment_event("payment.captured", &p.remote_order_id, "pay_1", 10_000);
    let ack = p
        .ctx
        .services
        .reconciliation
        .handle_webhook(&body, Some(&sign_webhook(&body)), Utc::now())
        .await
        .unwrap();

    assert_eq!(ack, WebhookAck::Compensated(CompensationOutcome::RefundFailed));
    let events = p.ctx.drain_events().await;
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::ManualReviewRequired { order_id, .. } if *order_id == p.order_id)));
}

#[tokio::test]
async fn second_capture_on_paid_order_flags_manual_review() {
    let p = placed_order().await;
    let first = payment_event("payment.captured", &p.remote_order_id, "pay_1", 10_000);
    p.ctx
        .services
        .reconciliation
        .handle_webhook(&first, Some(&sign_webhook(&first)), Utc::now())
        .await
        .unwrap();

    let second = payment_event("payment.captured", &p.remote_order_id, "pay_2", 10_000);
    let ack = p
        .ctx
        .services
        .reconciliation
        .handle_webhook(&second, Some(&sign_webhook(&second)), Utc::now())
        .await
        .unwrap();

    assert_eq!(ack, WebhookAck::AlreadySettled);
    assert_eq!(p.ctx.order(p.order_id).await.payment_id.as_deref(), Some("pay_1"));
    let events = p.ctx.drain_events().await;
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::ManualReviewRequired { payment_id: Some(id), .. } if id == "pay_2")));
}

#[tokio::test]
async fn refund_processed_marks_paid_order_refunded() {
    let p = placed_order().await;
    let captured = payment_event("payment.captured", &p.remote_order_id, "pay_1", 10_000);
    p.ctx
        .services
        .reconciliation
        .handle_webhook(&captured, Some(&sign_webhook(&captured)), Utc::now())
        .await
        .unwrap();

    let refunded = refund_event("pay_1", "rfnd_async", 10_000);
    let ack = p
        .ctx
        .services
        .reconciliation
        .handle_webhook(&refunded, Some(&sign_webhook(&refunded)), Utc::now())
        .await
        .unwrap();
    assert_eq!(ack, WebhookAck::Refunded);

    let order = p.ctx.order(p.order_id).await;
    assert_eq!(order.status, OrderStatus::Refunded);
    assert_eq!(order.refund_id.as_deref(), Some("rfnd_async"));

    let again = p
        .ctx
        .services
        .reconciliation
        .handle_webhook(&refunded, Some(&sign_webhook(&refunded)), Utc::now())
        .await
        .unwrap();
    assert_matches!(again, WebhookAck::Ignored(_));
}

#[tokio::test]
async fn unknown_events_and_orders_are_acknowledged() {
    let p = placed_order().await;
    let ping = br#"{"event":"order.paid","payload":{}}"#;
    let response = p.ctx.post_webhook(ping, Some(&sign_webhook(ping))).await;
    assert_eq!(response.status(), StatusCode::OK);

    let stray = payment_event("payment.captured", "order_unknown", "pay_x", 100);
    let response = p.ctx.post_webhook(&stray, Some(&sign_webhook(&stray))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response_json(response).await["result"], "ignored");
}
