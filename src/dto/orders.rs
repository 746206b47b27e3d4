use rust_decimal::Decimal;
use serde::Serialize;
use utoipa::ToSchema;

use crate::models::{Order, OrderItem, items_total};

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct OrderWithItems {
    pub order: Order,
    pub items: Vec<OrderItem>,
    /// Recomputed from the items' purchase-time prices.
    pub total: Decimal,
}

impl OrderWithItems {
    pub fn new(order: Order, items: Vec<OrderItem>) -> Self {
        let total = items_total(&items);
        if total != order.total {
            tracing::error!(
                order_id = %order.id,
                stored = %order.total,
                computed = %total,
                "order total does not match its items"
            );
        }
        Self {
            order,
            items,
            total,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderList {
    pub items: Vec<Order>,
}
