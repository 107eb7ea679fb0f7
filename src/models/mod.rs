// Checkout data model
pub mod cart;
pub mod order;
pub mod payment;

pub use cart::{CartLine, CartSnapshot, PriceBreakdown};
pub use order::{
    DeliveryAddress, DeliveryAddressRef, IdempotencyToken, Order, OrderId, PaymentMethod,
    PaymentStatus,
};
pub use payment::{
    CounterAccount, PayableReference, PaymentResult, PaymentSession, RemotePaymentStatus,
    SessionPhase,
};
