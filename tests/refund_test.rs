//! Admin refunds and access revocation.

mod common;

use assert_matches::assert_matches;
use chrono::Utc;
use common::TestContext;
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use storefront_api::entities::order::OrderStatus;
use storefront_api::entities::user::MembershipStatus;
use storefront_api::entities::{user_product, UserProduct};
use storefront_api::errors::ServiceError;
use storefront_api::events::Event;
use storefront_api::services::checkout::MembershipOrderInput;
use storefront_api::services::settlement::PaymentConfirmation;
use uuid::Uuid;

fn payment(id: &str) -> PaymentConfirmation {
    PaymentConfirmation {
        payment_id: id.to_string(),
        signature: None,
        payload: None,
    }
}

async fn owns(ctx: &TestContext, user_id: Uuid) -> usize {
    UserProduct::find()
        .filter(user_product::Column::UserId.eq(user_id))
        .all(&*ctx.db)
        .await
        .unwrap()
        .len()
}

async fn paid_product_order(ctx: &TestContext) -> (Uuid, Uuid) {
    let buyer = ctx.seed_user("buyer@example.com").await;
    ctx.seed_product("lofi-beat", dec!(100), dec!(100)).await;
    ctx.seed_product("drum-pack", dec!(50), dec!(50)).await;
    let placed = ctx
        .place_product_order(buyer.id, &["lofi-beat", "drum-pack"], None)
        .await;
    ctx.services
        .settlement
        .settle(placed.order_id, payment("pay_1"), Utc::now())
        .await
        .unwrap();
    (buyer.id, placed.order_id)
}

#[tokio::test]
async fn refund_revokes_products() {
    let ctx = TestContext::new().await;
    let (buyer, order_id) = paid_product_order(&ctx).await;
    assert_eq!(owns(&ctx, buyer).await, 2);

    let result = ctx
        .services
        .refunds
        .refund_order(order_id, Utc::now())
        .await
        .unwrap();

    assert!(result.refund_id.starts_with("rfnd_test_"));
    let order = ctx.order(order_id).await;
    assert_eq!(order.status, OrderStatus::Refunded);
    assert_eq!(order.refund_id.as_deref(), Some(result.refund_id.as_str()));
    assert!(order.refunded_at.is_some());
    assert_eq!(owns(&ctx, buyer).await, 0);
    assert_eq!(ctx.gateway.refund_calls(), vec![("pay_1".to_string(), 15_000)]);

    let events = ctx.drain_events().await;
    assert!(events.iter().any(|e| matches!(e, Event::RefundInitiated { .. })));
    assert!(events.iter().any(|e| matches!(e, Event::OrderRefunded { .. })));
}

#[tokio::test]
async fn refund_expires_membership() {
    let ctx = TestContext::new().await;
    let member = ctx.seed_user("member@example.com").await;
    ctx.seed_plan("pro", dec!(299), Some(20), &[], 2).await;
    let placed = ctx
        .services
        .checkout
        .create_membership_order(
            member.id,
            MembershipOrderInput {
                plan_key: "pro".to_string(),
                months: 1,
                currency: "INR".to_string(),
            },
            Utc::now(),
        )
        .await
        .unwrap();
    ctx.services
        .settlement
        .settle(placed.order_id, payment("pay_m"), Utc::now())
        .await
        .unwrap();
    assert_eq!(ctx.user(member.id).await.membership_status, MembershipStatus::Active);

    let now = Utc::now();
    ctx.services
        .refunds
        .refund_order(placed.order_id, now)
        .await
        .unwrap();

    let revoked = ctx.user(member.id).await;
    assert_eq!(revoked.membership_status, MembershipStatus::Refunded);
    assert!(revoked.membership_expires_at.unwrap() <= now);
}

#[tokio::test]
async fn gateway_failure_returns_order_to_paid() {
    let ctx = TestContext::new().await;
    let (buyer, order_id) = paid_product_order(&ctx).await;
    ctx.gateway.fail_refund(true);

    let err = ctx
        .services
        .refunds
        .refund_order(order_id, Utc::now())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ExternalServiceError(_));

    let order = ctx.order(order_id).await;
    assert_eq!(order.status, OrderStatus::Paid);
    assert!(order.refund_id.is_none());
    assert!(order.payment_errors.unwrap().to_string().contains("refund failed"));
    // access stays revoked until an operator retries
    assert_eq!(owns(&ctx, buyer).await, 0);

    ctx.gateway.fail_refund(false);
    ctx.services
        .refunds
        .refund_order(order_id, Utc::now())
        .await
        .unwrap();
    assert_eq!(ctx.order(order_id).await.status, OrderStatus::Refunded);
}

#[tokio::test]
async fn only_paid_orders_can_be_refunded() {
    let ctx = TestContext::new().await;
    let buyer = ctx.seed_user("buyer@example.com").await;
    ctx.seed_product("lofi-beat", dec!(100), dec!(100)).await;
    let placed = ctx.place_product_order(buyer.id, &["lofi-beat"], None).await;

    let err = ctx
        .services
        .refunds
        .refund_order(placed.order_id, Utc::now())
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::InvalidTransition { current: OrderStatus::Pending });
    assert!(ctx.gateway.refund_calls().is_empty());
}

#[tokio::test]
async fn refunded_order_is_not_refunded_twice() {
    let ctx = TestContext::new().await;
    let (_, order_id) = paid_product_order(&ctx).await;
    ctx.services
        .refunds
        .refund_order(order_id, Utc::now())
        .await
        .unwrap();

    let err = ctx
        .services
        .refunds
        .refund_order(order_id, Utc::now())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidTransition { current: OrderStatus::Refunded });
    assert_eq!(ctx.gateway.refund_calls().len(), 1);
}

#[tokio::test]
async fn unknown_order_is_not_found() {
    let ctx = TestContext::new().await;
    let err = ctx
        .services
        .refunds
        .refund_order(Uuid::new_v4(), Utc::now())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));
}
