/// Commerce services module - cart pricing, addresses, orders and the checkout session
pub mod address_service;
pub mod cart_service;
pub mod checkout_service;
pub mod order_service;

// Re-export services for convenience
pub use address_service::AddressResolver;
pub use cart_service::{CartAggregator, PricingPolicy};
pub use checkout_service::{
    CheckoutManager, CheckoutRequest, CheckoutServices, CheckoutSession, SessionSettings,
    SessionSnapshot, TimerStats,
};
pub use order_service::{OrderCreator, OrderDraft, OrderIntent};
