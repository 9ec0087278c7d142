#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use serde_json::{json, Value};
use storefront_api::{
    auth::{self, Role},
    config::AppConfig,
    db::{self, DbPool},
    entities::{
        membership_plan, order, product,
        promo_code::{self, DiscountType},
        user::{self, MembershipStatus},
        Order,
    },
    events::{Event, EventSender},
    handlers::AppServices,
    notifications::{Email, EmailSender, NotificationError},
    services::checkout::{CheckoutResult, ProductOrderInput},
    services::payment_gateway::{
        GatewayError, GatewayRefund, PaymentGateway, RemoteOrder, RemoteOrderRequest,
    },
    webhooks::signature,
    AppState,
};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const JWT_SECRET: &str = "storefront-test-jwt-secret-0123456789abcdef";
pub const KEY_SECRET: &str = "gateway-key-secret-for-tests";
pub const WEBHOOK_SECRET: &str = "gateway-webhook-secret-for-tests";

/// Payment gateway double that records every call.
#[derive(Default)]
pub struct FakeGateway {
    pub created: Mutex<Vec<RemoteOrderRequest>>,
    pub refunds: Mutex<Vec<(String, i64)>>,
    fail_create: AtomicBool,
    fail_refund: AtomicBool,
    sequence: AtomicUsize,
}

impl FakeGateway {
    pub fn fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn fail_refund(&self, fail: bool) {
        self.fail_refund.store(fail, Ordering::SeqCst);
    }

    pub fn refund_calls(&self) -> Vec<(String, i64)> {
        self.refunds.lock().unwrap().clone()
    }

    pub fn created_orders(&self) -> Vec<RemoteOrderRequest> {
        self.created.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_remote_order(
        &self,
        request: RemoteOrderRequest,
    ) -> Result<RemoteOrder, GatewayError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(GatewayError::Rejected {
                status: 503,
                body: "gateway down".to_string(),
            });
        }
        let n = self.sequence.fetch_add(1, Ordering::SeqCst);
        let remote = RemoteOrder {
            id: format!("order_test_{}", n),
            amount: request.amount,
            currency: request.currency.clone(),
        };
        self.created.lock().unwrap().push(request);
        Ok(remote)
    }

    async fn refund(&self, payment_id: &str, amount: i64) -> Result<GatewayRefund, GatewayError> {
        self.refunds
            .lock()
            .unwrap()
            .push((payment_id.to_string(), amount));
        if self.fail_refund.load(Ordering::SeqCst) {
            return Err(GatewayError::Rejected {
                status: 500,
                body: "refund failed".to_string(),
            });
        }
        let n = self.sequence.fetch_add(1, Ordering::SeqCst);
        Ok(GatewayRefund {
            id: format!("rfnd_test_{}", n),
            amount,
        })
    }
}

/// Email sender that keeps what it was asked to send.
#[derive(Default)]
pub struct RecordingEmailSender {
    pub sent: Mutex<Vec<Email>>,
}

#[async_trait]
impl EmailSender for RecordingEmailSender {
    async fn send_email(&self, email: Email) -> Result<(), NotificationError> {
        self.sent.lock().unwrap().push(email);
        Ok(())
    }
}

impl RecordingEmailSender {
    /// Waits briefly for background sends, then returns everything sent.
    pub async fn wait_for(&self, expected: usize) -> Vec<Email> {
        for _ in 0..50 {
            if self.sent.lock().unwrap().len() >= expected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.sent.lock().unwrap().clone()
    }
}

/// Services over a fresh in-memory SQLite database.
pub struct TestContext {
    pub db: Arc<DbPool>,
    pub config: AppConfig,
    pub gateway: Arc<FakeGateway>,
    pub email: Arc<RecordingEmailSender>,
    pub events: EventSender,
    pub services: AppServices,
    events_rx: tokio::sync::Mutex<mpsc::Receiver<Event>>,
}

impl TestContext {
    pub async fn new() -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            JWT_SECRET.to_string(),
            "test".to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.gateway_key_id = "rzp_test_key".to_string();
        cfg.gateway_key_secret = KEY_SECRET.to_string();
        cfg.payment_webhook_secret = WEBHOOK_SECRET.to_string();

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db = Arc::new(pool);

        let (events, events_rx) = EventSender::channel(1024);
        let gateway = Arc::new(FakeGateway::default());
        let email = Arc::new(RecordingEmailSender::default());
        let services = AppServices::new(
            db.clone(),
            &cfg,
            gateway.clone(),
            email.clone(),
            events.clone(),
        );

        Self {
            db,
            config: cfg,
            gateway,
            email,
            events,
            services,
            events_rx: tokio::sync::Mutex::new(events_rx),
        }
    }

    pub fn state(&self) -> AppState {
        AppState {
            db: self.db.clone(),
            config: self.config.clone(),
            event_sender: self.events.clone(),
            services: self.services.clone(),
        }
    }

    pub fn router(&self) -> Router {
        storefront_api::app_router(self.state())
    }

    /// Events emitted so far.
    pub async fn drain_events(&self) -> Vec<Event> {
        let mut rx = self.events_rx.lock().await;
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    pub async fn seed_user(&self, email: &str) -> user::Model {
        let now = Utc::now();
        user::ActiveModel {
            id: Set(Uuid::new_v4()),
            email: Set(email.to_string()),
            name: Set("Test Buyer".to_string()),
            is_deleted: Set(false),
            is_banned: Set(false),
            membership_plan_key: Set(None),
            membership_status: Set(MembershipStatus::None),
            membership_started_at: Set(None),
            membership_expires_at: Set(None),
            usage_period_start: Set(None),
            usage_downloads: Set(0),
            usage_remix_requests: Set(0),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .expect("seed user")
    }

    pub async fn seed_product(&self, slug: &str, price: Decimal, mrp: Decimal) -> product::Model {
        self.seed_product_with(slug, price, mrp, "INR", "wav", true).await
    }

    pub async fn seed_product_with(
        &self,
        slug: &str,
        price: Decimal,
        mrp: Decimal,
        currency: &str,
        format: &str,
        is_public: bool,
    ) -> product::Model {
        let now = Utc::now();
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            slug: Set(slug.to_string()),
            title: Set(format!("Product {}", slug)),
            price: Set(price),
            mrp: Set(mrp),
            currency: Set(currency.to_string()),
            format: Set(format.to_string()),
            is_public: Set(is_public),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .expect("seed product")
    }

    pub async fn seed_plan(
        &self,
        key: &str,
        price: Decimal,
        max_downloads_per_month: Option<i32>,
        allowed_formats: &[&str],
        remix_request_quota: i32,
    ) -> membership_plan::Model {
        membership_plan::ActiveModel {
            key: Set(key.to_string()),
            name: Set(format!("{} plan", key)),
            price: Set(price),
            currency: Set("INR".to_string()),
            max_downloads_per_month: Set(max_downloads_per_month),
            allowed_formats: Set(json!(allowed_formats)),
            commercial_use: Set(true),
            remix_request_quota: Set(remix_request_quota),
            is_active: Set(true),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await
        .expect("seed plan")
    }

    pub async fn seed_promo(
        &self,
        code: &str,
        discount_type: DiscountType,
        discount_value: Decimal,
        max_discount: Option<Decimal>,
        min_order_amount: Option<Decimal>,
        usage_limit: Option<i32>,
    ) -> promo_code::Model {
        let now = Utc::now();
        promo_code::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code.to_uppercase()),
            discount_type: Set(discount_type),
            discount_value: Set(discount_value),
            max_discount: Set(max_discount),
            min_order_amount: Set(min_order_amount),
            usage_limit: Set(usage_limit),
            used_count: Set(0),
            expires_at: Set(None),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .expect("seed promo")
    }

    pub async fn place_product_order(
        &self,
        user_id: Uuid,
        refs: &[&str],
        promo_code: Option<&str>,
    ) -> CheckoutResult {
        self.services
            .checkout
            .create_product_order(
                user_id,
                ProductOrderInput {
                    product_refs: refs.iter().map(|r| r.to_string()).collect(),
                    currency: "INR".to_string(),
                    promo_code: promo_code.map(str::to_string),
                },
                Utc::now(),
            )
            .await
            .expect("order placement")
    }

    pub async fn order(&self, id: Uuid) -> order::Model {
        Order::find_by_id(id)
            .one(&*self.db)
            .await
            .expect("order query")
            .expect("order exists")
    }

    pub async fn user(&self, id: Uuid) -> user::Model {
        storefront_api::entities::User::find_by_id(id)
            .one(&*self.db)
            .await
            .expect("user query")
            .expect("user exists")
    }

    /// Moves an order's creation time, e.g. to age it past the reaper TTL.
    pub async fn set_created_at(&self, id: Uuid, created_at: DateTime<Utc>) {
        let mut active: order::ActiveModel = self.order(id).await.into();
        active.created_at = Set(created_at);
        active.update(&*self.db).await.expect("update created_at");
    }

    pub fn token(&self, user_id: Uuid, role: Role) -> String {
        auth::issue_token(JWT_SECRET, user_id, role, chrono::Duration::hours(1)).expect("token")
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.router().oneshot(request).await.unwrap()
    }

    pub async fn post_webhook(&self, raw: &[u8], signature: Option<&str>) -> Response {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/payments/webhook")
            .header("content-type", "application/json");
        if let Some(sig) = signature {
            builder = builder.header(storefront_api::webhooks::SIGNATURE_HEADER, sig);
        }
        self.router()
            .oneshot(builder.body(Body::from(raw.to_vec())).unwrap())
            .await
            .unwrap()
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

pub fn payment_event(event: &str, remote_order_id: &str, payment_id: &str, amount: i64) -> Vec<u8> {
    json!({
        "entity": "event",
        "event": event,
        "payload": {
            "payment": {
                "entity": {
                    "id": payment_id,
                    "order_id": remote_order_id,
                    "amount": amount,
                    "currency": "INR",
                    "status": if event == "payment.failed" { "failed" } else { "captured" },
                    "error_description": if event == "payment.failed" { Some("card declined") } else { None },
                }
            }
        }
    })
    .to_string()
    .into_bytes()
}

pub fn refund_event(payment_id: &str, refund_id: &str, amount: i64) -> Vec<u8> {
    json!({
        "entity": "event",
        "event": "refund.processed",
        "payload": {
            "refund": {
                "entity": { "id": refund_id, "payment_id": payment_id, "amount": amount }
            }
        }
    })
    .to_string()
    .into_bytes()
}

pub fn sign_webhook(raw: &[u8]) -> String {
    signature::sign(WEBHOOK_SECRET, raw)
}

pub fn sign_checkout(remote_order_id: &str, payment_id: &str) -> String {
    signature::sign_checkout(KEY_SECRET, remote_order_id, payment_id)
}
