//! Aggregates module
pub mod cart;
pub mod order;
pub mod payment;

pub use cart::{Address, Cart, CartError, LineItem, ShippingMethod};
pub use order::{Order, OrderError, OrderStatus, PaymentReference};
pub use payment::{PaymentSession, SessionError, SessionStatus};
