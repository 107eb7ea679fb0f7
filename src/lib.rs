//! Storefront checkout library
//!
//! Cart pricing, order submission and the bank-transfer payment session
//! (payment link, countdown, status polling, confirmation) of the storefront
//! client.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod backend;
pub mod config;
pub mod errors;
pub mod events;
pub mod models;
pub mod services;

pub use backend::{HttpStorefrontBackend, StorefrontBackend};
pub use config::{load_config, CheckoutConfig};
pub use errors::{CheckoutError, ErrorKind};
pub use events::{Event, EventSender};
pub use services::commerce::{
    CheckoutManager, CheckoutRequest, CheckoutServices, CheckoutSession, SessionSettings,
    SessionSnapshot, TimerStats,
};
