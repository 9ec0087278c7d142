pub mod admin;
pub mod downloads;
pub mod health;
pub mod orders;
pub mod payment_webhooks;

use std::sync::Arc;

use crate::cache::PromoCache;
use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::notifications::EmailSender;
use crate::services::{
    catalog::CatalogService,
    checkout::{CheckoutLimits, CheckoutService},
    entitlements::EntitlementService,
    orders::OrderService,
    payment_bridge::PaymentBridge,
    payment_gateway::PaymentGateway,
    promotions::PromotionService,
    reaper::OrderReaper,
    reconciliation::{ReconciliationSecrets, ReconciliationService},
    refunds::RefundService,
    settlement::SettlementService,
};

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer used by the HTTP handlers and the background reaper
#[derive(Clone)]
pub struct AppServices {
    pub checkout: Arc<CheckoutService>,
    pub orders: Arc<OrderService>,
    pub settlement: Arc<SettlementService>,
    pub reconciliation: Arc<ReconciliationService>,
    pub refunds: Arc<RefundService>,
    pub entitlements: Arc<EntitlementService>,
    pub reaper: OrderReaper,
    pub promo_cache: Arc<PromoCache>,
}

impl AppServices {
    /// Wires every service over one pool, gateway, mailer and event channel.
    pub fn new(
        db_pool: Arc<DbPool>,
        config: &AppConfig,
        gateway: Arc<dyn PaymentGateway>,
        email: Arc<dyn EmailSender>,
        event_sender: EventSender,
    ) -> Self {
        let promo_cache = Arc::new(PromoCache::new(
            config.promo_cache_ttl(),
            config.promo_cache_capacity,
        ));

        let catalog = CatalogService::new(db_pool.clone());
        let promotions = PromotionService::new(db_pool.clone(), promo_cache.clone());
        let bridge = PaymentBridge::new(db_pool.clone(), gateway.clone(), event_sender.clone());
        let limits = CheckoutLimits {
            max_items_per_order: config.max_items_per_order,
            max_membership_months: config.max_membership_months,
        };
        let checkout = CheckoutService::new(
            db_pool.clone(),
            catalog,
            promotions,
            bridge,
            event_sender.clone(),
            limits,
        );

        let settlement =
            SettlementService::new(db_pool.clone(), promo_cache.clone(), event_sender.clone());
        let refunds = RefundService::new(db_pool.clone(), gateway, event_sender.clone());
        let reconciliation = ReconciliationService::new(
            db_pool.clone(),
            settlement.clone(),
            refunds.clone(),
            email,
            event_sender.clone(),
            ReconciliationSecrets {
                webhook_secret: config.payment_webhook_secret.clone(),
                key_secret: config.gateway_key_secret.clone(),
            },
            config.support_email.clone(),
        );

        Self {
            checkout: Arc::new(checkout),
            orders: Arc::new(OrderService::new(db_pool.clone(), event_sender.clone())),
            settlement: Arc::new(settlement),
            reconciliation: Arc::new(reconciliation),
            refunds: Arc::new(refunds),
            entitlements: Arc::new(EntitlementService::new(db_pool.clone())),
            reaper: OrderReaper::new(db_pool, event_sender, config.pending_order_ttl()),
            promo_cache,
        }
    }
}
