pub mod order_items;
pub mod orders;
pub mod products;
pub mod sessions;
pub mod users;
