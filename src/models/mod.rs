pub mod membership;
pub mod order;

pub use order::{OrderAmounts, OrderItemSnapshot, OrderKind, OrderView};
