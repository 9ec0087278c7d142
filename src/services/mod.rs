pub mod catalog;
pub mod checkout;
pub mod entitlements;
pub mod orders;
pub mod payment_bridge;
pub mod payment_gateway;
pub mod pricing;
pub mod promotions;
pub mod reaper;
pub mod reconciliation;
pub mod refunds;
pub mod settlement;
