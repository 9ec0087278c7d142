//! Storage entities for the order lifecycle and entitlement engine.

pub mod membership_plan;
pub mod order;
pub mod order_item;
pub mod product;
pub mod promo_code;
pub mod user;
pub mod user_product;

pub use membership_plan::Entity as MembershipPlan;
pub use order::Entity as Order;
pub use order_item::Entity as OrderItem;
pub use product::Entity as Product;
pub use promo_code::Entity as PromoCode;
pub use user::Entity as User;
pub use user_product::Entity as UserProduct;
