pub mod order;
pub mod order_item;
pub mod payment_event;
pub mod product;
